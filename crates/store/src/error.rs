use common::{OrderId, SagaId};
use thiserror::Error;

/// Errors that can occur when reading or writing durable state.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A saga already exists for this order (unique `order_id` constraint).
    #[error("a saga already exists for order {0}")]
    DuplicateSaga(OrderId),

    /// An update targeted an order that does not exist.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// An update targeted a saga that does not exist.
    #[error("saga not found: {0}")]
    SagaNotFound(SagaId),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row held a value the domain cannot parse.
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
