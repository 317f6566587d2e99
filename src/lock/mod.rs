//! Sequential lock: a lease-based distributed mutex, one per
//! (queue, consumer id).
//!
//! The lock does not protect message content; it serializes the
//! dequeue-then-handle-then-finalize critical section for a consumer id
//! across every worker in the distributed system, which is what yields
//! strict ordering. At most one unexpired lease exists per key at any
//! instant; expiry is judged by the backend's clock, so worker clocks need
//! not be synchronized.

mod backoff;

pub use backoff::{BackoffConfig, ExponentialBackoff};

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use uuid::Uuid;

use crate::error::QueueError;
use crate::metrics::LOCK_TIMEOUTS_TOTAL;
use crate::store::StoreAdapter;

/// Handle to a held lease. Dropping it does NOT release the lock; callers
/// must release explicitly or let the lease expire.
#[derive(Debug, Clone)]
pub struct Lease {
    key: String,
    token: String,
    ttl: Duration,
}

impl Lease {
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

/// Lease-based distributed mutex over the store adapter.
pub struct SequentialLock {
    store: Arc<dyn StoreAdapter>,
    key: String,
    lease_ttl: Duration,
    backoff: BackoffConfig,
}

impl SequentialLock {
    pub fn new(store: Arc<dyn StoreAdapter>, key: String, lease_ttl: Duration) -> Self {
        Self {
            store,
            key,
            lease_ttl,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Cadence at which holders must renew: strictly shorter than the lease
    /// duration, so a renewal always lands before expiry.
    pub fn renew_cadence(&self) -> Duration {
        (self.lease_ttl / 3).max(Duration::from_millis(1))
    }

    /// Try to take the lease, retrying with jittered exponential backoff
    /// until `timeout` elapses.
    ///
    /// A `LockTimeout` is not fatal: callers back off and retry acquisition
    /// on their own loop iteration.
    pub async fn acquire(&self, timeout: Duration) -> Result<Lease, QueueError> {
        let token = Uuid::new_v4().to_string();
        let started = Instant::now();
        let mut backoff = ExponentialBackoff::with_config(self.backoff.clone());

        loop {
            if self
                .store
                .set_if_absent_or_expired(&self.key, &token, self.lease_ttl)
                .await?
            {
                tracing::trace!(key = %self.key, "lease acquired");
                return Ok(Lease {
                    key: self.key.clone(),
                    token,
                    ttl: self.lease_ttl,
                });
            }

            let waited = started.elapsed();
            if waited >= timeout {
                LOCK_TIMEOUTS_TOTAL.inc();
                tracing::debug!(
                    key = %self.key,
                    waited_ms = waited.as_millis() as u64,
                    "lock acquisition timed out"
                );
                return Err(QueueError::LockTimeout {
                    key: self.key.clone(),
                    waited,
                });
            }

            let remaining = timeout - waited;
            tokio::time::sleep(backoff.next_delay().min(remaining)).await;
        }
    }

    /// Extend the lease. Returns false when the lease already expired, in
    /// which case another worker may hold the lock and the caller is no
    /// longer inside an exclusive critical section.
    pub async fn renew(&self, lease: &Lease) -> Result<bool, QueueError> {
        Ok(self.store.renew_ttl(&lease.key, lease.ttl).await?)
    }

    /// Release the lease iff it still belongs to this holder. A lease that
    /// expired and was reassigned to another holder is left untouched.
    pub async fn release(&self, lease: Lease) -> Result<bool, QueueError> {
        Ok(self
            .store
            .delete_if_matches(&lease.key, &lease.token)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn lock_with_ttl(store: Arc<dyn StoreAdapter>, ttl: Duration) -> SequentialLock {
        SequentialLock::new(store, "relayq:orders:default:lock".to_string(), ttl)
    }

    #[tokio::test]
    async fn test_acquire_and_release() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let lock = lock_with_ttl(store, Duration::from_secs(10));

        let lease = lock.acquire(Duration::from_millis(100)).await.unwrap();
        assert!(lock.release(lease).await.unwrap());
    }

    #[tokio::test]
    async fn test_contended_acquire_times_out() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let lock = lock_with_ttl(store.clone(), Duration::from_secs(10));
        let other = lock_with_ttl(store, Duration::from_secs(10));

        let _held = lock.acquire(Duration::from_millis(100)).await.unwrap();

        let result = other.acquire(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(QueueError::LockTimeout { .. })));
    }

    #[tokio::test]
    async fn test_acquire_succeeds_after_release() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let lock = lock_with_ttl(store, Duration::from_secs(10));

        let lease = lock.acquire(Duration::from_millis(100)).await.unwrap();
        lock.release(lease).await.unwrap();

        assert!(lock.acquire(Duration::from_millis(100)).await.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_succeeds_after_expiry() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let lock = lock_with_ttl(store, Duration::from_millis(30));

        let stale = lock.acquire(Duration::from_millis(100)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Lease expired; a new holder can take it
        let lease = lock.acquire(Duration::from_millis(100)).await.unwrap();
        assert_ne!(lease.token(), stale.token());

        // The stale holder's release leaves the new lease untouched
        assert!(!lock.release(stale).await.unwrap());
    }

    #[tokio::test]
    async fn test_renew_extends_lease() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let lock = lock_with_ttl(store, Duration::from_millis(80));

        let lease = lock.acquire(Duration::from_millis(100)).await.unwrap();

        for _ in 0..3 {
            tokio::time::sleep(Duration::from_millis(40)).await;
            assert!(lock.renew(&lease).await.unwrap());
        }

        // Still held well past the original ttl
        let contender = lock.acquire(Duration::from_millis(50)).await;
        assert!(matches!(contender, Err(QueueError::LockTimeout { .. })));
    }

    #[test]
    fn test_renew_cadence_is_shorter_than_ttl() {
        let store: Arc<dyn StoreAdapter> = Arc::new(MemoryStore::new());
        let lock = lock_with_ttl(store, Duration::from_secs(30));
        assert!(lock.renew_cadence() < Duration::from_secs(30));
    }
}
