use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderId, SagaId};
use domain::{Order, OrderStatus, SagaState, SagaStatus, SagaStep};
use tokio::sync::RwLock;

use crate::error::{Result, StoreError};
use crate::traits::{OrderStore, SagaStore};

/// In-memory order and saga store for testing.
///
/// Provides the same semantics as the PostgreSQL implementation, including
/// the unique-saga-per-order constraint.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    sagas: Arc<RwLock<HashMap<SagaId, SagaState>>>,
}

impl InMemoryStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored sagas.
    pub async fn saga_count(&self) -> usize {
        self.sagas.read().await.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        self.orders.write().await.insert(order.id, order.clone());
        Ok(())
    }

    async fn order(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn orders_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut matching: Vec<Order> = orders
            .values()
            .filter(|o| o.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn set_order_saga(&self, id: OrderId, saga_id: SagaId) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound(id))?;
        order.saga_id = Some(saga_id);
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn set_order_status(&self, id: OrderId, status: OrderStatus) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders.get_mut(&id).ok_or(StoreError::OrderNotFound(id))?;
        order.status = status;
        order.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl SagaStore for InMemoryStore {
    async fn insert_saga(&self, saga: &SagaState) -> Result<()> {
        let mut sagas = self.sagas.write().await;
        if sagas.values().any(|s| s.order_id == saga.order_id) {
            return Err(StoreError::DuplicateSaga(saga.order_id));
        }
        sagas.insert(saga.saga_id, saga.clone());
        Ok(())
    }

    async fn saga(&self, id: SagaId) -> Result<Option<SagaState>> {
        Ok(self.sagas.read().await.get(&id).cloned())
    }

    async fn saga_for_order(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        Ok(self
            .sagas
            .read()
            .await
            .values()
            .find(|s| s.order_id == order_id)
            .cloned())
    }

    async fn advance_saga(&self, id: SagaId, step: SagaStep) -> Result<()> {
        let mut sagas = self.sagas.write().await;
        let saga = sagas.get_mut(&id).ok_or(StoreError::SagaNotFound(id))?;
        saga.current_step = step;
        saga.updated_at = Utc::now();
        Ok(())
    }

    async fn close_saga(&self, id: SagaId, step: SagaStep, status: SagaStatus) -> Result<()> {
        let mut sagas = self.sagas.write().await;
        let saga = sagas.get_mut(&id).ok_or(StoreError::SagaNotFound(id))?;
        saga.current_step = step;
        saga.status = status;
        saga.updated_at = Utc::now();
        Ok(())
    }

    async fn sagas_in_progress(&self) -> Result<Vec<SagaState>> {
        let mut pending: Vec<SagaState> = self
            .sagas
            .read()
            .await
            .values()
            .filter(|s| s.status == SagaStatus::InProgress)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(pending)
    }
}
