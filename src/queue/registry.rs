//! Consumer registry: which logical consumer ids exist on a queue.
//!
//! "Registered" is defined operationally: a durable marker key is written
//! the first time a consumer id enqueues or dequeues, and enumeration lists
//! those markers. A process-local index suppresses repeated marker writes;
//! the backend stays the single source of truth. Ids are added, never
//! removed by this crate.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashSet;

use crate::codec::FieldMap;
use crate::store::{StoreAdapter, StoreError};

pub struct ConsumerRegistry {
    store: Arc<dyn StoreAdapter>,
    /// Key prefix for markers, `{prefix}:{queue}:consumers`
    marker_prefix: String,
    /// Ids this process has already registered
    known: DashSet<String>,
}

impl ConsumerRegistry {
    pub fn new(store: Arc<dyn StoreAdapter>, marker_prefix: String) -> Self {
        Self {
            store,
            marker_prefix,
            known: DashSet::new(),
        }
    }

    fn marker_key(&self, consumer_id: &str) -> String {
        format!("{}:{}", self.marker_prefix, consumer_id)
    }

    fn marker_record() -> FieldMap {
        // Constant member keeps the set add idempotent across processes
        let mut fields = FieldMap::new();
        fields.insert("registered".to_string(), "1".to_string());
        fields
    }

    /// Write the durable marker for `consumer_id` unless this process has
    /// already done so.
    pub async fn ensure_registered(&self, consumer_id: &str) -> Result<(), StoreError> {
        if self.known.contains(consumer_id) {
            return Ok(());
        }

        self.store
            .add_to_set(&self.marker_key(consumer_id), Self::marker_record())
            .await?;
        if self.known.insert(consumer_id.to_string()) {
            tracing::debug!(consumer_id = %consumer_id, "consumer registered");
        }
        Ok(())
    }

    /// Enumerate every consumer id with a durable marker.
    ///
    /// Reflects all registrations committed at call time; a registration
    /// racing this read may be missed, which is acceptable because such a
    /// consumer has no message to miss yet.
    pub async fn registered_consumers(&self) -> Result<BTreeSet<String>, StoreError> {
        let pattern = format!("{}:*", self.marker_prefix);
        let prefix = format!("{}:", self.marker_prefix);

        let keys = self.store.list_keys_matching(&pattern).await?;
        Ok(keys
            .iter()
            .filter_map(|key| key.strip_prefix(prefix.as_str()))
            .map(str::to_string)
            .collect())
    }
}
