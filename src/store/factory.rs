//! Store adapter factory

use std::sync::Arc;

use crate::config::StoreSettings;

use super::{MemoryStore, RedisStore, StoreAdapter, StoreError};

/// Create a store adapter based on configuration.
///
/// `backend = "redis"` returns a [`RedisStore`] against the configured URL;
/// anything else returns a [`MemoryStore`].
pub fn create_store(settings: &StoreSettings) -> Result<Arc<dyn StoreAdapter>, StoreError> {
    match settings.backend.as_str() {
        "redis" => {
            tracing::info!(
                backend = "redis",
                url = %settings.redis_url,
                "creating redis store adapter"
            );
            Ok(Arc::new(RedisStore::new(&settings.redis_url)?))
        }
        other => {
            if other != "memory" {
                tracing::warn!(
                    backend = %other,
                    "unknown store backend, falling back to memory"
                );
            } else {
                tracing::info!(backend = "memory", "creating in-memory store adapter");
            }
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
