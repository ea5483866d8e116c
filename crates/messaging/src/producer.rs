//! Event publication.
//!
//! All events are keyed by saga id so every event of one saga lands on the
//! same partition and is consumed in publish order.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use domain::SagaEnvelope;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};

use crate::error::PublishError;

/// Seam for publishing saga events to the bus.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publishes one event, keyed by its saga id.
    async fn publish(&self, topic: &str, event: &SagaEnvelope) -> Result<(), PublishError>;
}

/// Kafka producer with synchronous (awaited) delivery.
pub struct KafkaEventProducer {
    producer: FutureProducer,
}

impl std::fmt::Debug for KafkaEventProducer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaEventProducer").finish()
    }
}

impl KafkaEventProducer {
    /// Creates a producer against the given bootstrap servers.
    ///
    /// A small linger window batches bursts without adding visible latency.
    pub fn new(brokers: &str) -> Result<Self, rdkafka::error::KafkaError> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("linger.ms", "5")
            .create()?;

        Ok(Self { producer })
    }
}

#[async_trait]
impl EventPublisher for KafkaEventProducer {
    async fn publish(&self, topic: &str, event: &SagaEnvelope) -> Result<(), PublishError> {
        let key = event.saga_id.to_string();
        let payload = serde_json::to_string(event)?;
        let record = FutureRecord::to(topic).key(&key).payload(&payload);

        match self.producer.send(record, Duration::from_secs(5)).await {
            Ok(_) => {
                tracing::debug!(topic, saga_id = %event.saga_id, step = %event.step, "event published");
                Ok(())
            }
            Err((e, _)) => {
                tracing::error!(topic, saga_id = %event.saga_id, error = %e, "failed to publish event");
                Err(PublishError::Kafka(e))
            }
        }
    }
}

/// One event captured by the in-memory publisher.
#[derive(Debug, Clone)]
pub struct PublishedEvent {
    pub topic: String,
    pub key: String,
    pub event: SagaEnvelope,
}

#[derive(Default)]
struct InMemoryPublisherState {
    published: Vec<PublishedEvent>,
    fail_publish: bool,
}

/// In-memory publisher for testing.
///
/// Records every published event and can be told to reject publishes to
/// exercise dispatch-failure paths.
#[derive(Clone, Default)]
pub struct InMemoryPublisher {
    state: Arc<Mutex<InMemoryPublisherState>>,
}

impl InMemoryPublisher {
    /// Creates a new empty in-memory publisher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the publisher to reject all publishes.
    pub fn set_fail_publish(&self, fail: bool) {
        self.state.lock().unwrap().fail_publish = fail;
    }

    /// Returns the number of events published on a topic.
    pub fn count_for_topic(&self, topic: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .published
            .iter()
            .filter(|p| p.topic == topic)
            .count()
    }

    /// Removes and returns all events published on a topic, oldest first.
    pub fn take_topic(&self, topic: &str) -> Vec<PublishedEvent> {
        let mut state = self.state.lock().unwrap();
        let (matching, rest): (Vec<_>, Vec<_>) = state
            .published
            .drain(..)
            .partition(|p| p.topic == topic);
        state.published = rest;
        matching
    }
}

#[async_trait]
impl EventPublisher for InMemoryPublisher {
    async fn publish(&self, topic: &str, event: &SagaEnvelope) -> Result<(), PublishError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_publish {
            return Err(PublishError::Rejected);
        }
        state.published.push(PublishedEvent {
            topic: topic.to_string(),
            key: event.saga_id.to_string(),
            event: event.clone(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderId, SagaId};
    use domain::{SagaStep, topics};

    fn sample_event() -> SagaEnvelope {
        SagaEnvelope::response(
            SagaId::new(),
            OrderId::new(),
            SagaStep::InventoryReserved,
            true,
            "ok",
        )
    }

    #[tokio::test]
    async fn test_in_memory_publish_records_key_and_topic() {
        let publisher = InMemoryPublisher::new();
        let event = sample_event();

        publisher
            .publish(topics::SAGA_RESPONSE, &event)
            .await
            .unwrap();

        assert_eq!(publisher.count_for_topic(topics::SAGA_RESPONSE), 1);
        let published = publisher.take_topic(topics::SAGA_RESPONSE);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key, event.saga_id.to_string());
        assert_eq!(publisher.count_for_topic(topics::SAGA_RESPONSE), 0);
    }

    #[tokio::test]
    async fn test_take_topic_leaves_other_topics() {
        let publisher = InMemoryPublisher::new();
        publisher
            .publish(topics::SAGA_RESPONSE, &sample_event())
            .await
            .unwrap();
        publisher
            .publish(topics::PAYMENT_PROCESS, &sample_event())
            .await
            .unwrap();

        let responses = publisher.take_topic(topics::SAGA_RESPONSE);
        assert_eq!(responses.len(), 1);
        assert_eq!(publisher.count_for_topic(topics::PAYMENT_PROCESS), 1);
    }

    #[tokio::test]
    async fn test_fail_injection() {
        let publisher = InMemoryPublisher::new();
        publisher.set_fail_publish(true);

        let result = publisher.publish(topics::SAGA_RESPONSE, &sample_event()).await;
        assert!(matches!(result, Err(PublishError::Rejected)));
        assert_eq!(publisher.count_for_topic(topics::SAGA_RESPONSE), 0);

        publisher.set_fail_publish(false);
        publisher
            .publish(topics::SAGA_RESPONSE, &sample_event())
            .await
            .unwrap();
        assert_eq!(publisher.count_for_topic(topics::SAGA_RESPONSE), 1);
    }
}
