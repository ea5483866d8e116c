use async_trait::async_trait;
use common::{OrderId, SagaId};
use domain::{Order, OrderStatus, SagaState, SagaStatus, SagaStep};

use crate::error::Result;

/// Persistence operations for orders and their items.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order together with its items.
    async fn insert_order(&self, order: &Order) -> Result<()>;

    /// Loads one order with its items.
    async fn order(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists a user's orders, newest first, up to `limit`.
    async fn orders_for_user(&self, user_id: &str, limit: i64) -> Result<Vec<Order>>;

    /// Links an order to its saga.
    async fn set_order_saga(&self, id: OrderId, saga_id: SagaId) -> Result<()>;

    /// Moves an order to a new status.
    async fn set_order_status(&self, id: OrderId, status: OrderStatus) -> Result<()>;
}

/// Persistence operations for saga state.
#[async_trait]
pub trait SagaStore: Send + Sync {
    /// Inserts a new saga row.
    ///
    /// Returns [`StoreError::DuplicateSaga`](crate::StoreError::DuplicateSaga)
    /// if a saga already exists for the order, so callers can retry
    /// idempotently.
    async fn insert_saga(&self, saga: &SagaState) -> Result<()>;

    /// Loads one saga by ID.
    async fn saga(&self, id: SagaId) -> Result<Option<SagaState>>;

    /// Loads the saga attached to an order, if any.
    async fn saga_for_order(&self, order_id: OrderId) -> Result<Option<SagaState>>;

    /// Writes a new current step, keeping the saga in progress.
    async fn advance_saga(&self, id: SagaId, step: SagaStep) -> Result<()>;

    /// Writes the final step and terminal status.
    async fn close_saga(&self, id: SagaId, step: SagaStep, status: SagaStatus) -> Result<()>;

    /// Lists all sagas still in progress, for the recovery sweep.
    async fn sagas_in_progress(&self) -> Result<Vec<SagaState>>;
}
