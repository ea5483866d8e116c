//! Orchestrator error types.

use messaging::PublishError;
use store::StoreError;
use thiserror::Error;

/// Errors that can occur during saga orchestration.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Durable state could not be read or written. Consumers surface this
    /// as a handler failure so the message is redelivered.
    #[error("persistence error: {0}")]
    Persistence(#[from] StoreError),

    /// An outbound event could not be published. The saga row is already
    /// durable, so the recovery sweep re-publishes it later.
    #[error("dispatch error: {0}")]
    Dispatch(#[from] PublishError),

    /// The persisted order snapshot could not be serialized or parsed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for orchestrator results.
pub type Result<T> = std::result::Result<T, SagaError>;
