//! Store adapters: the primitive atomic operations the queue core is built
//! on, over a shared persistent key-value backend.
//!
//! The backend is treated as a black box offering atomic push/pop on ordered
//! collections, atomic set add/remove, and a lease-based compare-and-set
//! primitive. Two adapters ship: [`RedisStore`] for production and
//! [`MemoryStore`] for tests and local development.

mod factory;
mod memory;
mod redis_store;

pub use factory::create_store;
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::codec::FieldMap;

/// Error type for store operations. All variants surface to callers as
/// `QueueError::StoreUnavailable`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Redis operation failed
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// A record could not be mapped to or from its wire form
    #[error("record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    /// Backend not reachable
    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Atomic primitives over the shared backend.
///
/// Every method is a single atomic step from the caller's perspective;
/// the adapters never compose multiple backend round trips into one call
/// except where the contract says so (`pop_head_blocking` is one blocking
/// command). No cross-process synchronization exists outside these calls.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Append a record at the tail of the ordered collection at `key`.
    async fn push_tail(&self, key: &str, record: FieldMap) -> Result<(), StoreError>;

    /// Atomically remove and return the head of the ordered collection,
    /// or `None` when it is empty.
    async fn pop_head(&self, key: &str) -> Result<Option<FieldMap>, StoreError>;

    /// Like [`pop_head`](Self::pop_head), but suspends the caller for up to
    /// `timeout` waiting for an element to arrive. A zero timeout degrades
    /// to a non-blocking pop.
    async fn pop_head_blocking(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<FieldMap>, StoreError>;

    /// Add a record to the unordered collection at `key`. Idempotent for an
    /// identical record.
    async fn add_to_set(&self, key: &str, record: FieldMap) -> Result<(), StoreError>;

    /// Atomically remove and return one arbitrary record from the unordered
    /// collection, or `None` when it is empty.
    async fn remove_arbitrary_from_set(&self, key: &str)
        -> Result<Option<FieldMap>, StoreError>;

    /// Create the lease record at `key` holding `value` for `ttl`, but only
    /// if no unexpired record exists. Returns whether the lease was taken.
    /// Expiry is judged by the backend's clock.
    async fn set_if_absent_or_expired(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError>;

    /// Extend the lease at `key` by `ttl`. Returns false when the lease no
    /// longer exists (expired or released).
    async fn renew_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError>;

    /// Delete the lease at `key` iff it still holds `expected`. Returns
    /// whether a deletion happened.
    async fn delete_if_matches(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Enumerate keys matching a glob pattern (`*` wildcard).
    async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError>;
}
