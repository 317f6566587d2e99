//! Message producer: typed publishing with pluggable submission.
//!
//! Fan-out delivers one published message to every registered consumer id,
//! each delivery independent. Single-mode skips the registry read entirely
//! and targets the queue's default consumer id; behaviorally a strict
//! subset of fan-out, kept for submission throughput.

use std::sync::Arc;

use crate::codec::PayloadCodec;
use crate::config::{Settings, SubmissionKind};
use crate::error::QueueError;
use crate::message::MessageRecord;
use crate::queue::MessageQueue;

/// How a published message is mapped to consumer ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubmissionStrategy {
    /// Deliver to every registered consumer id
    #[default]
    Fanout,
    /// Deliver only to the queue's default consumer id
    Single,
}

impl From<SubmissionKind> for SubmissionStrategy {
    fn from(kind: SubmissionKind) -> Self {
        match kind {
            SubmissionKind::Fanout => Self::Fanout,
            SubmissionKind::Single => Self::Single,
        }
    }
}

/// Per-id outcome of a submission.
///
/// Partial failure is not an error at this layer: the producer decides
/// whether missing deliveries are fatal.
#[derive(Debug, Default)]
pub struct SubmitReport {
    /// Consumer ids whose backlog accepted the message
    pub delivered: Vec<String>,
    /// Consumer ids whose delivery failed, with the cause
    pub failed: Vec<(String, QueueError)>,
}

impl SubmitReport {
    pub fn all_delivered(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Publishes typed payloads to a queue.
pub struct MessageProducer<T> {
    queue: Arc<MessageQueue>,
    codec: Arc<dyn PayloadCodec<T>>,
    strategy: SubmissionStrategy,
}

impl<T: Send + Sync> MessageProducer<T> {
    /// Create a fan-out producer.
    pub fn new(queue: Arc<MessageQueue>, codec: Arc<dyn PayloadCodec<T>>) -> Self {
        Self::with_strategy(queue, codec, SubmissionStrategy::default())
    }

    pub fn with_strategy(
        queue: Arc<MessageQueue>,
        codec: Arc<dyn PayloadCodec<T>>,
        strategy: SubmissionStrategy,
    ) -> Self {
        Self {
            queue,
            codec,
            strategy,
        }
    }

    /// Build a producer from layered settings.
    pub fn from_settings(
        settings: &Settings,
        queue: Arc<MessageQueue>,
        codec: Arc<dyn PayloadCodec<T>>,
    ) -> Self {
        Self::with_strategy(queue, codec, settings.consumer.submission.into())
    }

    pub fn strategy(&self) -> SubmissionStrategy {
        self.strategy
    }

    /// Publish a payload per the configured submission strategy.
    ///
    /// Errors only when the message cannot be encoded or, under fan-out,
    /// when the registry itself cannot be read; individual delivery
    /// failures land in the report.
    #[tracing::instrument(name = "producer.submit", skip(self, payload), fields(queue = %self.queue.name()))]
    pub async fn submit(&self, payload: &T) -> Result<SubmitReport, QueueError> {
        match self.strategy {
            SubmissionStrategy::Single => {
                let consumer_id = self.queue.default_consumer_id().to_string();
                self.submit_to(payload, &consumer_id).await
            }
            SubmissionStrategy::Fanout => {
                let record = self.build_record(payload)?;
                let consumers = self.queue.registered_consumers().await?;

                let mut report = SubmitReport::default();
                for consumer_id in consumers {
                    // Each delivery is independent; a failed id never stops
                    // the remaining ones.
                    match self.queue.enqueue(record.clone(), &consumer_id).await {
                        Ok(()) => report.delivered.push(consumer_id),
                        Err(e) => {
                            tracing::warn!(
                                queue = %self.queue.name(),
                                consumer_id = %consumer_id,
                                error = %e,
                                "fan-out delivery failed"
                            );
                            report.failed.push((consumer_id, e));
                        }
                    }
                }

                tracing::debug!(
                    queue = %self.queue.name(),
                    delivered = report.delivered.len(),
                    failed = report.failed.len(),
                    "message fanned out"
                );
                Ok(report)
            }
        }
    }

    /// Publish to one explicit consumer id, bypassing registry lookup and
    /// default-id resolution. Available under both strategies for
    /// point-to-point delivery.
    pub async fn submit_to(
        &self,
        payload: &T,
        consumer_id: &str,
    ) -> Result<SubmitReport, QueueError> {
        let record = self.build_record(payload)?;

        let mut report = SubmitReport::default();
        match self.queue.enqueue(record, consumer_id).await {
            Ok(()) => report.delivered.push(consumer_id.to_string()),
            Err(e) => report.failed.push((consumer_id.to_string(), e)),
        }
        Ok(report)
    }

    fn build_record(&self, payload: &T) -> Result<MessageRecord, QueueError> {
        Ok(MessageRecord::envelope(self.codec.encode(payload)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::codec::JsonCodec;
    use crate::queue::FifoStrategy;
    use crate::store::MemoryStore;

    fn producer(strategy: SubmissionStrategy) -> (Arc<MessageQueue>, MessageProducer<String>) {
        let queue = Arc::new(MessageQueue::new(
            "orders",
            Arc::new(MemoryStore::new()),
            Arc::new(FifoStrategy),
        ));
        let producer =
            MessageProducer::with_strategy(queue.clone(), Arc::new(JsonCodec::new()), strategy);
        (queue, producer)
    }

    #[tokio::test]
    async fn test_fanout_delivers_to_all_registered() {
        let (queue, producer) = producer(SubmissionStrategy::Fanout);

        // Register two consumers by touching their backlogs
        queue.dequeue("a", Duration::ZERO).await.unwrap();
        queue.dequeue("b", Duration::ZERO).await.unwrap();

        let report = producer.submit(&"hello".to_string()).await.unwrap();
        assert!(report.all_delivered());
        assert_eq!(report.delivered.len(), 2);

        // One independently removable copy per backlog
        assert!(queue.dequeue("a", Duration::ZERO).await.unwrap().is_some());
        assert!(queue.dequeue("b", Duration::ZERO).await.unwrap().is_some());
        assert!(queue.dequeue("a", Duration::ZERO).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fanout_copies_share_one_message_id() {
        let (queue, producer) = producer(SubmissionStrategy::Fanout);

        queue.dequeue("a", Duration::ZERO).await.unwrap();
        queue.dequeue("b", Duration::ZERO).await.unwrap();

        producer.submit(&"hello".to_string()).await.unwrap();

        let first = queue.dequeue("a", Duration::ZERO).await.unwrap().unwrap();
        let second = queue.dequeue("b", Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first.id().unwrap(), second.id().unwrap());
    }

    #[tokio::test]
    async fn test_single_targets_default_consumer_only() {
        let (queue, producer) = producer(SubmissionStrategy::Single);

        // Another consumer is registered, but single-mode must ignore it
        queue.dequeue("other", Duration::ZERO).await.unwrap();

        let report = producer.submit(&"hello".to_string()).await.unwrap();
        assert_eq!(report.delivered, vec!["default".to_string()]);

        assert!(queue
            .dequeue("default", Duration::ZERO)
            .await
            .unwrap()
            .is_some());
        assert!(queue
            .dequeue("other", Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_from_settings_maps_submission_kind() {
        let mut settings = crate::config::Settings::default();
        settings.consumer.submission = crate::config::SubmissionKind::Single;

        let queue = Arc::new(MessageQueue::new(
            "orders",
            Arc::new(MemoryStore::new()),
            Arc::new(FifoStrategy),
        ));
        let producer: MessageProducer<String> =
            MessageProducer::from_settings(&settings, queue, Arc::new(JsonCodec::new()));
        assert_eq!(producer.strategy(), SubmissionStrategy::Single);
    }

    #[tokio::test]
    async fn test_submit_to_explicit_consumer() {
        let (queue, producer) = producer(SubmissionStrategy::Fanout);

        let report = producer
            .submit_to(&"hello".to_string(), "billing")
            .await
            .unwrap();
        assert_eq!(report.delivered, vec!["billing".to_string()]);
        assert!(queue
            .dequeue("billing", Duration::ZERO)
            .await
            .unwrap()
            .is_some());
    }
}
