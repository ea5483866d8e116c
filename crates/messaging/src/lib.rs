//! Message bus adapters: at-least-once Kafka publish/consume and the
//! deduplication store that makes redelivered messages safe.

pub mod consumer;
pub mod dedup;
pub mod error;
pub mod producer;

pub use consumer::KafkaEventConsumer;
pub use dedup::{DedupStore, InMemoryDedupStore, RedisDedupStore};
pub use error::{DedupError, PublishError};
pub use producer::{EventPublisher, InMemoryPublisher, KafkaEventProducer, PublishedEvent};
