use thiserror::Error;

/// Errors that can occur when publishing an event.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The broker rejected or timed out the delivery.
    #[error("kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    /// The event could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The in-memory publisher was told to fail (test injection).
    #[error("publish rejected")]
    Rejected,
}

/// Errors that can occur when talking to the dedup store.
#[derive(Debug, Error)]
pub enum DedupError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}
