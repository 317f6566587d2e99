//! Message queue: per-consumer enqueue/dequeue with implicit consumer
//! registration, composed from a store adapter and a dequeue strategy.
//!
//! A queue never blocks one consumer's operations on another consumer's
//! backlog; each (queue, consumer) pair owns its own backend keys.

pub mod registry;
pub mod strategy;

pub use registry::ConsumerRegistry;
pub use strategy::{
    create_dequeue_strategy, BacklogKeys, DequeueStrategy, FifoStrategy, RandomStrategy,
};

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Settings;
use crate::error::QueueError;
use crate::message::MessageRecord;
use crate::metrics::{MESSAGES_DEQUEUED_TOTAL, MESSAGES_ENQUEUED_TOTAL};
use crate::store::StoreAdapter;

/// Consumer id used when none is configured.
pub const DEFAULT_CONSUMER_ID: &str = "default";

/// Default key prefix for all backend keys.
pub const DEFAULT_KEY_PREFIX: &str = "relayq";

/// A named queue over the shared store.
///
/// The dequeue strategy instance is shared across all consumers of the
/// queue and holds no per-consumer state.
pub struct MessageQueue {
    name: String,
    default_consumer_id: String,
    key_prefix: String,
    store: Arc<dyn StoreAdapter>,
    strategy: Arc<dyn DequeueStrategy>,
    registry: ConsumerRegistry,
}

impl MessageQueue {
    /// Create a queue with the default key prefix and consumer id.
    pub fn new(
        name: impl Into<String>,
        store: Arc<dyn StoreAdapter>,
        strategy: Arc<dyn DequeueStrategy>,
    ) -> Self {
        Self::with_options(
            name,
            store,
            strategy,
            DEFAULT_KEY_PREFIX.to_string(),
            DEFAULT_CONSUMER_ID.to_string(),
        )
    }

    /// Create a queue with an explicit key prefix and default consumer id.
    pub fn with_options(
        name: impl Into<String>,
        store: Arc<dyn StoreAdapter>,
        strategy: Arc<dyn DequeueStrategy>,
        key_prefix: String,
        default_consumer_id: String,
    ) -> Self {
        let name = name.into();
        let registry = ConsumerRegistry::new(
            store.clone(),
            format!("{}:{}:consumers", key_prefix, name),
        );
        Self {
            name,
            default_consumer_id,
            key_prefix,
            store,
            strategy,
            registry,
        }
    }

    /// Build a queue from layered settings.
    pub fn from_settings(settings: &Settings, store: Arc<dyn StoreAdapter>) -> Arc<Self> {
        Arc::new(Self::with_options(
            settings.queue.name.clone(),
            store,
            create_dequeue_strategy(settings.queue.dequeue),
            settings.store.key_prefix.clone(),
            settings.queue.default_consumer_id.clone(),
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn default_consumer_id(&self) -> &str {
        &self.default_consumer_id
    }

    pub(crate) fn store(&self) -> Arc<dyn StoreAdapter> {
        self.store.clone()
    }

    fn backlog_keys(&self, consumer_id: &str) -> BacklogKeys {
        let backlog = format!("{}:{}:{}", self.key_prefix, self.name, consumer_id);
        BacklogKeys {
            doorbell: format!("{}:ready", backlog),
            backlog,
        }
    }

    /// Backend key of the sequential lock for `consumer_id`.
    pub(crate) fn lock_key(&self, consumer_id: &str) -> String {
        format!("{}:{}:{}:lock", self.key_prefix, self.name, consumer_id)
    }

    /// Insert a message into `consumer_id`'s backlog.
    ///
    /// Registers the consumer id as a side effect. No retry happens at this
    /// layer: a store failure surfaces to the caller unchanged.
    pub async fn enqueue(
        &self,
        mut record: MessageRecord,
        consumer_id: &str,
    ) -> Result<(), QueueError> {
        self.registry.ensure_registered(consumer_id).await?;
        record.set_consumer_id(consumer_id);

        let keys = self.backlog_keys(consumer_id);
        self.strategy
            .enqueue(self.store.as_ref(), &keys, record.into_fields())
            .await?;

        MESSAGES_ENQUEUED_TOTAL.inc();
        tracing::debug!(
            queue = %self.name,
            consumer_id = %consumer_id,
            "message enqueued"
        );
        Ok(())
    }

    /// Remove and return the next message for `consumer_id`, or `None` when
    /// the backlog stayed empty for the whole `wait` window. Emptiness is
    /// not an error.
    pub async fn dequeue(
        &self,
        consumer_id: &str,
        wait: Duration,
    ) -> Result<Option<MessageRecord>, QueueError> {
        self.registry.ensure_registered(consumer_id).await?;

        let keys = self.backlog_keys(consumer_id);
        let record = self
            .strategy
            .dequeue(self.store.as_ref(), &keys, wait)
            .await?;

        if record.is_some() {
            MESSAGES_DEQUEUED_TOTAL.inc();
        }
        Ok(record.map(MessageRecord::from_fields))
    }

    /// Current set of registered consumer ids; used by fan-out submission.
    pub async fn registered_consumers(&self) -> Result<BTreeSet<String>, QueueError> {
        Ok(self.registry.registered_consumers().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::FieldMap;
    use crate::store::MemoryStore;

    fn queue() -> MessageQueue {
        MessageQueue::new(
            "orders",
            Arc::new(MemoryStore::new()),
            Arc::new(FifoStrategy),
        )
    }

    fn record() -> MessageRecord {
        MessageRecord::envelope(FieldMap::new())
    }

    #[tokio::test]
    async fn test_enqueue_registers_consumer() {
        let queue = queue();

        queue.enqueue(record(), "billing").await.unwrap();

        let ids = queue.registered_consumers().await.unwrap();
        assert!(ids.contains("billing"));
    }

    #[tokio::test]
    async fn test_dequeue_registers_consumer() {
        let queue = queue();

        let out = queue.dequeue("shipping", Duration::ZERO).await.unwrap();
        assert!(out.is_none());

        let ids = queue.registered_consumers().await.unwrap();
        assert!(ids.contains("shipping"));
    }

    #[tokio::test]
    async fn test_enqueue_stamps_consumer_id() {
        let queue = queue();

        queue.enqueue(record(), "billing").await.unwrap();
        let out = queue
            .dequeue("billing", Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(out.consumer_id(), Some("billing"));
    }

    #[tokio::test]
    async fn test_backlogs_are_independent() {
        let queue = queue();

        queue.enqueue(record(), "a").await.unwrap();

        assert!(queue.dequeue("b", Duration::ZERO).await.unwrap().is_none());
        assert!(queue.dequeue("a", Duration::ZERO).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_empty_dequeue_is_not_an_error() {
        let queue = queue();
        assert!(queue
            .dequeue("billing", Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }
}
