//! Message-driven surface of the inventory engine.
//!
//! The Kafka consumer loops are pure I/O drivers; each inbound envelope is
//! routed to one of the handlers here. Handlers dedup by `(saga_id, step)`
//! so replayed deliveries never repeat a state change, and they publish the
//! `saga-response` before the caller commits the offset.

use std::time::Duration;

use domain::{SagaEnvelope, SagaStep, topics};
use messaging::{DedupError, DedupStore, EventPublisher, PublishError};
use thiserror::Error;

use crate::store::{InventoryError, InventoryStore};

/// Errors that fail a handler and leave the message for redelivery.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("inventory error: {0}")]
    Inventory(#[from] InventoryError),

    #[error("dedup store error: {0}")]
    Dedup(#[from] DedupError),

    #[error("publish error: {0}")]
    Publish(#[from] PublishError),
}

/// Handles the inventory-side topics of the saga protocol.
pub struct InventoryListener<I, D, P>
where
    I: InventoryStore,
    D: DedupStore,
    P: EventPublisher,
{
    store: I,
    dedup: D,
    publisher: P,
    dedup_ttl: Duration,
}

impl<I, D, P> InventoryListener<I, D, P>
where
    I: InventoryStore,
    D: DedupStore,
    P: EventPublisher,
{
    /// Creates a new listener.
    pub fn new(store: I, dedup: D, publisher: P, dedup_ttl: Duration) -> Self {
        Self {
            store,
            dedup,
            publisher,
            dedup_ttl,
        }
    }

    /// Handles one `inventory-reserve` request.
    ///
    /// On success the completion marker is written before the response is
    /// published: if the response publish fails and the message is
    /// redelivered, the reservation is not repeated but the response is.
    #[tracing::instrument(skip(self, event), fields(saga_id = %event.saga_id, order_id = %event.order_id))]
    pub async fn handle_reserve(&self, event: &SagaEnvelope) -> Result<(), ListenerError> {
        let Some(items) = event.items() else {
            tracing::warn!("reserve request without items payload, dropping");
            metrics::counter!("inventory_operations_total", "op" => "reserve", "outcome" => "poison")
                .increment(1);
            return Ok(());
        };

        if self
            .dedup
            .seen(event.saga_id, SagaStep::InventoryReserved)
            .await?
        {
            tracing::info!("duplicate reserve request, re-sending response");
            return self
                .respond(event, true, "inventory reserved successfully")
                .await;
        }

        match self.store.reserve(items).await {
            Ok(()) => {
                self.dedup
                    .mark(event.saga_id, SagaStep::InventoryReserved, self.dedup_ttl)
                    .await?;
                metrics::counter!("inventory_operations_total", "op" => "reserve", "outcome" => "success")
                    .increment(1);
                tracing::info!("inventory reserved");
                self.respond(event, true, "inventory reserved successfully")
                    .await
            }
            Err(e) if e.is_domain() => {
                metrics::counter!("inventory_operations_total", "op" => "reserve", "outcome" => "rejected")
                    .increment(1);
                tracing::warn!(error = %e, "reservation rejected");
                self.respond(event, false, format!("failed to reserve inventory: {e}"))
                    .await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Handles one `inventory-rollback` compensation request.
    #[tracing::instrument(skip(self, event), fields(saga_id = %event.saga_id, order_id = %event.order_id))]
    pub async fn handle_rollback(&self, event: &SagaEnvelope) -> Result<(), ListenerError> {
        let Some(items) = event.items() else {
            tracing::warn!("rollback request without items payload, dropping");
            metrics::counter!("inventory_operations_total", "op" => "rollback", "outcome" => "poison")
                .increment(1);
            return Ok(());
        };

        if self
            .dedup
            .seen(event.saga_id, SagaStep::InventoryRollback)
            .await?
        {
            tracing::info!("duplicate rollback request, skipping");
            return Ok(());
        }

        match self.store.release(items).await {
            Ok(()) => {
                self.dedup
                    .mark(event.saga_id, SagaStep::InventoryRollback, self.dedup_ttl)
                    .await?;
                metrics::counter!("inventory_operations_total", "op" => "rollback", "outcome" => "success")
                    .increment(1);
                tracing::info!("reservation released");
                Ok(())
            }
            Err(e) if e.is_domain() => {
                // Retrying cannot fix a mismatched release; acknowledge it.
                metrics::counter!("inventory_operations_total", "op" => "rollback", "outcome" => "rejected")
                    .increment(1);
                tracing::error!(error = %e, "rollback did not match held stock, dropping");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Handles one `order-completed` notification by committing the hold.
    #[tracing::instrument(skip(self, event), fields(saga_id = %event.saga_id, order_id = %event.order_id))]
    pub async fn handle_completed(&self, event: &SagaEnvelope) -> Result<(), ListenerError> {
        let Some(items) = event.items() else {
            tracing::warn!("completion event without items payload, dropping");
            metrics::counter!("inventory_operations_total", "op" => "commit", "outcome" => "poison")
                .increment(1);
            return Ok(());
        };

        if self
            .dedup
            .seen(event.saga_id, SagaStep::OrderCompleted)
            .await?
        {
            tracing::info!("duplicate completion event, skipping");
            return Ok(());
        }

        match self.store.commit(items).await {
            Ok(()) => {
                self.dedup
                    .mark(event.saga_id, SagaStep::OrderCompleted, self.dedup_ttl)
                    .await?;
                metrics::counter!("inventory_operations_total", "op" => "commit", "outcome" => "success")
                    .increment(1);
                tracing::info!("reservation committed");
                Ok(())
            }
            Err(e) if e.is_domain() => {
                metrics::counter!("inventory_operations_total", "op" => "commit", "outcome" => "rejected")
                    .increment(1);
                tracing::error!(error = %e, "commit did not match held stock, dropping");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn respond(
        &self,
        event: &SagaEnvelope,
        success: bool,
        message: impl Into<String>,
    ) -> Result<(), ListenerError> {
        let response = SagaEnvelope::response(
            event.saga_id,
            event.order_id,
            SagaStep::InventoryReserved,
            success,
            message,
        );
        self.publisher
            .publish(topics::SAGA_RESPONSE, &response)
            .await?;
        Ok(())
    }
}
