//! Fetch-process-commit consumer loop.
//!
//! The offset is committed only after the handler returns success, so a
//! failed handler leaves the message to be redelivered. Unparseable
//! messages are logged and committed to avoid head-of-line blocking.

use domain::SagaEnvelope;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use tokio::sync::watch;

use std::future::Future;

/// Kafka consumer bound to one topic and consumer group.
pub struct KafkaEventConsumer {
    consumer: StreamConsumer,
    topic: String,
}

impl KafkaEventConsumer {
    /// Creates a consumer with manual offset commits.
    pub fn new(
        brokers: &str,
        group_id: &str,
        topic: &str,
    ) -> Result<Self, rdkafka::error::KafkaError> {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()?;

        Ok(Self {
            consumer,
            topic: topic.to_string(),
        })
    }

    /// Consumes messages until the shutdown signal flips, invoking `handler`
    /// for each parsed envelope.
    ///
    /// The in-flight handler always runs to completion; cancellation is
    /// observed between messages.
    pub async fn run<H, Fut, E>(&self, mut shutdown: watch::Receiver<bool>, handler: H)
    where
        H: Fn(SagaEnvelope) -> Fut,
        Fut: Future<Output = Result<(), E>>,
        E: std::fmt::Display,
    {
        if let Err(e) = self.consumer.subscribe(&[&self.topic]) {
            tracing::error!(topic = %self.topic, error = %e, "failed to subscribe");
            return;
        }
        tracing::info!(topic = %self.topic, "consumer started");

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = self.consumer.recv() => {
                    let msg = match received {
                        Ok(msg) => msg,
                        Err(e) => {
                            tracing::error!(topic = %self.topic, error = %e, "failed to fetch message");
                            continue;
                        }
                    };

                    let payload = msg.payload().unwrap_or_default();
                    let envelope: SagaEnvelope = match serde_json::from_slice(payload) {
                        Ok(envelope) => envelope,
                        Err(e) => {
                            // Poison message: drop it rather than block the partition.
                            tracing::warn!(topic = %self.topic, error = %e, "unparseable message, dropping");
                            metrics::counter!("consumer_poison_messages_total", "topic" => self.topic.clone())
                                .increment(1);
                            self.commit(&msg);
                            continue;
                        }
                    };

                    match handler(envelope).await {
                        Ok(()) => self.commit(&msg),
                        Err(e) => {
                            // Leave the offset uncommitted so the message is redelivered.
                            tracing::error!(topic = %self.topic, error = %e, "handler failed, message will be retried");
                            metrics::counter!("consumer_handler_failures_total", "topic" => self.topic.clone())
                                .increment(1);
                        }
                    }
                }
            }
        }

        tracing::info!(topic = %self.topic, "consumer stopped");
    }

    fn commit(&self, msg: &rdkafka::message::BorrowedMessage<'_>) {
        if let Err(e) = self.consumer.commit_message(msg, CommitMode::Async) {
            tracing::error!(topic = %self.topic, error = %e, "failed to commit offset");
        }
    }
}
