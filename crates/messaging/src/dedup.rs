//! Deduplication of redelivered messages.
//!
//! The transport is at-least-once, so every state-changing consumer keys a
//! completion marker by `(saga_id, step)` and skips work it has already
//! done. Markers carry a TTL sized to outlive the slowest saga.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use common::SagaId;
use domain::SagaStep;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::DedupError;

fn marker_key(saga_id: SagaId, step: SagaStep) -> String {
    format!("dedup:{saga_id}:{step}")
}

/// Seam for the completion-marker store.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Returns true if work for `(saga_id, step)` was already completed.
    async fn seen(&self, saga_id: SagaId, step: SagaStep) -> Result<bool, DedupError>;

    /// Records completion of `(saga_id, step)` for `ttl`.
    async fn mark(&self, saga_id: SagaId, step: SagaStep, ttl: Duration)
    -> Result<(), DedupError>;
}

/// Redis-backed dedup store.
#[derive(Clone)]
pub struct RedisDedupStore {
    conn: ConnectionManager,
}

impl std::fmt::Debug for RedisDedupStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDedupStore").finish()
    }
}

impl RedisDedupStore {
    /// Connects to the Redis instance at `host` (a `host:port` address).
    pub async fn new(host: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(format!("redis://{host}"))?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }
}

#[async_trait]
impl DedupStore for RedisDedupStore {
    async fn seen(&self, saga_id: SagaId, step: SagaStep) -> Result<bool, DedupError> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(marker_key(saga_id, step)).await?;
        Ok(exists)
    }

    async fn mark(
        &self,
        saga_id: SagaId,
        step: SagaStep,
        ttl: Duration,
    ) -> Result<(), DedupError> {
        // SET NX EX: the first writer wins, so concurrent markers for the
        // same (saga, step) cannot extend each other's TTL.
        let mut conn = self.conn.clone();
        let _: () = redis::cmd("SET")
            .arg(marker_key(saga_id, step))
            .arg("1")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs())
            .query_async(&mut conn)
            .await?;
        Ok(())
    }
}

/// In-memory dedup store with TTL expiry, for testing.
#[derive(Clone, Default)]
pub struct InMemoryDedupStore {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl InMemoryDedupStore {
    /// Creates a new empty dedup store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for InMemoryDedupStore {
    async fn seen(&self, saga_id: SagaId, step: SagaStep) -> Result<bool, DedupError> {
        let mut entries = self.entries.lock().unwrap();
        let key = marker_key(saga_id, step);
        match entries.get(&key) {
            Some(expires_at) if *expires_at > Instant::now() => Ok(true),
            Some(_) => {
                entries.remove(&key);
                Ok(false)
            }
            None => Ok(false),
        }
    }

    async fn mark(
        &self,
        saga_id: SagaId,
        step: SagaStep,
        ttl: Duration,
    ) -> Result<(), DedupError> {
        self.entries
            .lock()
            .unwrap()
            .insert(marker_key(saga_id, step), Instant::now() + ttl);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mark_then_seen() {
        let store = InMemoryDedupStore::new();
        let saga_id = SagaId::new();

        assert!(
            !store
                .seen(saga_id, SagaStep::InventoryReserved)
                .await
                .unwrap()
        );

        store
            .mark(saga_id, SagaStep::InventoryReserved, Duration::from_secs(60))
            .await
            .unwrap();

        assert!(
            store
                .seen(saga_id, SagaStep::InventoryReserved)
                .await
                .unwrap()
        );
        // Markers are per step.
        assert!(
            !store
                .seen(saga_id, SagaStep::InventoryRollback)
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_expired_marker_is_not_seen() {
        let store = InMemoryDedupStore::new();
        let saga_id = SagaId::new();

        store
            .mark(saga_id, SagaStep::InventoryReserved, Duration::ZERO)
            .await
            .unwrap();

        assert!(
            !store
                .seen(saga_id, SagaStep::InventoryReserved)
                .await
                .unwrap()
        );
    }
}
