//! Dequeue strategies: the pluggable mapping of enqueue/dequeue onto the
//! store adapter's primitives.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::codec::FieldMap;
use crate::config::DequeueKind;
use crate::store::{StoreAdapter, StoreError};

/// Field carried by doorbell sentinels under the random strategy.
const WAKE_FIELD: &str = "wake";

/// Backend keys for one (queue, consumer) backlog.
#[derive(Debug, Clone)]
pub struct BacklogKeys {
    /// The pending-message collection (list under FIFO, set under random)
    pub backlog: String,
    /// Companion ordered collection used only to wake waiting dequeuers
    pub doorbell: String,
}

/// Maps enqueue/dequeue onto store primitives. Stateless with respect to
/// which consumer; one instance is shared by every consumer of a queue.
#[async_trait]
pub trait DequeueStrategy: Send + Sync {
    async fn enqueue(
        &self,
        store: &dyn StoreAdapter,
        keys: &BacklogKeys,
        record: FieldMap,
    ) -> Result<(), StoreError>;

    /// Return the next pending record, or `None` when the backlog stayed
    /// empty for the whole `wait` window. Removal and return are one atomic
    /// step; a record is never visible to two concurrent dequeuers.
    async fn dequeue(
        &self,
        store: &dyn StoreAdapter,
        keys: &BacklogKeys,
        wait: Duration,
    ) -> Result<Option<FieldMap>, StoreError>;
}

/// Strict arrival-order delivery over a single ordered collection.
///
/// Enqueue appends at the tail; dequeue is one atomic blocking pop from the
/// head, so emptiness and removal are decided in the same step and any
/// number of concurrent dequeuers is safe.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoStrategy;

#[async_trait]
impl DequeueStrategy for FifoStrategy {
    async fn enqueue(
        &self,
        store: &dyn StoreAdapter,
        keys: &BacklogKeys,
        record: FieldMap,
    ) -> Result<(), StoreError> {
        store.push_tail(&keys.backlog, record).await
    }

    async fn dequeue(
        &self,
        store: &dyn StoreAdapter,
        keys: &BacklogKeys,
        wait: Duration,
    ) -> Result<Option<FieldMap>, StoreError> {
        store.pop_head_blocking(&keys.backlog, wait).await
    }
}

/// Arbitrary-order delivery over an unordered collection, with an ordered
/// doorbell collection so dequeuers can suspend instead of busy-polling.
///
/// The two-step enqueue (set add, then doorbell push) is not atomic as a
/// whole: a crash between the steps leaves a message in the set with no
/// doorbell entry. The dequeue path therefore always falls through to a
/// direct set check when the doorbell wait times out, so an orphaned
/// message is still found within one wait window.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomStrategy;

impl RandomStrategy {
    fn sentinel() -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert(WAKE_FIELD.to_string(), "1".to_string());
        fields
    }
}

#[async_trait]
impl DequeueStrategy for RandomStrategy {
    async fn enqueue(
        &self,
        store: &dyn StoreAdapter,
        keys: &BacklogKeys,
        record: FieldMap,
    ) -> Result<(), StoreError> {
        store.add_to_set(&keys.backlog, record).await?;
        store.push_tail(&keys.doorbell, Self::sentinel()).await
    }

    async fn dequeue(
        &self,
        store: &dyn StoreAdapter,
        keys: &BacklogKeys,
        wait: Duration,
    ) -> Result<Option<FieldMap>, StoreError> {
        // The set pop runs whether or not the doorbell fired: a timeout may
        // mean an orphaned message, a doorbell hit may still lose the race
        // to another worker. The set itself is the source of truth.
        let _ = store.pop_head_blocking(&keys.doorbell, wait).await?;
        store.remove_arbitrary_from_set(&keys.backlog).await
    }
}

/// Select the strategy instance for a configured kind.
pub fn create_dequeue_strategy(kind: DequeueKind) -> Arc<dyn DequeueStrategy> {
    match kind {
        DequeueKind::Fifo => Arc::new(FifoStrategy),
        DequeueKind::Random => Arc::new(RandomStrategy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn keys() -> BacklogKeys {
        BacklogKeys {
            backlog: "relayq:q:default".to_string(),
            doorbell: "relayq:q:default:ready".to_string(),
        }
    }

    fn record(tag: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("tag".to_string(), tag.to_string());
        fields
    }

    #[tokio::test]
    async fn test_fifo_preserves_order() {
        let store = MemoryStore::new();
        let strategy = FifoStrategy;
        let keys = keys();

        for tag in ["m1", "m2", "m3"] {
            strategy.enqueue(&store, &keys, record(tag)).await.unwrap();
        }

        for tag in ["m1", "m2", "m3"] {
            let popped = strategy
                .dequeue(&store, &keys, Duration::ZERO)
                .await
                .unwrap()
                .unwrap();
            assert_eq!(popped["tag"], tag);
        }
        assert!(strategy
            .dequeue(&store, &keys, Duration::ZERO)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_random_delivers_all_messages() {
        let store = MemoryStore::new();
        let strategy = RandomStrategy;
        let keys = keys();

        let mut sent: Vec<String> = (0..5).map(|i| format!("m{i}")).collect();
        for tag in &sent {
            strategy.enqueue(&store, &keys, record(tag)).await.unwrap();
        }

        let mut seen = Vec::new();
        for _ in 0..5 {
            let popped = strategy
                .dequeue(&store, &keys, Duration::from_millis(50))
                .await
                .unwrap()
                .unwrap();
            seen.push(popped["tag"].clone());
        }
        sent.sort();
        seen.sort();
        assert_eq!(seen, sent);

        assert!(strategy
            .dequeue(&store, &keys, Duration::from_millis(20))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_random_finds_orphan_without_doorbell() {
        let store = MemoryStore::new();
        let strategy = RandomStrategy;
        let keys = keys();

        // Simulate a crash between the two enqueue steps: the message made
        // it into the set but no doorbell entry was written.
        store.add_to_set(&keys.backlog, record("orphan")).await.unwrap();

        let popped = strategy
            .dequeue(&store, &keys, Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(popped["tag"], "orphan");
    }
}
