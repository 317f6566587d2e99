//! In-process store adapter.
//!
//! Backs the same primitives as the Redis adapter with `DashMap`
//! collections, so the whole queue stack runs in tests and local
//! development without a backend. Blocking pops suspend cooperatively on a
//! per-key `Notify` doorbell instead of polling.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::codec::FieldMap;

use super::{StoreAdapter, StoreError};

/// Memory-backed store adapter.
///
/// Lease expiry uses the store's own monotonic clock, mirroring the
/// backend-owned-clock rule of the Redis adapter.
#[derive(Default)]
pub struct MemoryStore {
    lists: DashMap<String, VecDeque<FieldMap>>,
    sets: DashMap<String, Vec<FieldMap>>,
    leases: DashMap<String, (String, Instant)>,
    wakeups: DashMap<String, Arc<Notify>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn wakeup(&self, key: &str) -> Arc<Notify> {
        self.wakeups
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Notify::new()))
            .clone()
    }

    fn try_pop(&self, key: &str) -> Option<FieldMap> {
        self.lists.get_mut(key).and_then(|mut list| list.pop_front())
    }

    /// Drop a lease entry whose expiry has passed.
    fn purge_expired(&self, key: &str) {
        if let Some(entry) = self.leases.get(key) {
            let expired = entry.1 <= Instant::now();
            drop(entry);
            if expired {
                self.leases.remove_if(key, |_, (_, expiry)| *expiry <= Instant::now());
            }
        }
    }
}

#[async_trait]
impl StoreAdapter for MemoryStore {
    async fn push_tail(&self, key: &str, record: FieldMap) -> Result<(), StoreError> {
        self.lists
            .entry(key.to_string())
            .or_default()
            .push_back(record);
        self.wakeup(key).notify_one();
        Ok(())
    }

    async fn pop_head(&self, key: &str) -> Result<Option<FieldMap>, StoreError> {
        Ok(self.try_pop(key))
    }

    async fn pop_head_blocking(
        &self,
        key: &str,
        timeout: Duration,
    ) -> Result<Option<FieldMap>, StoreError> {
        if timeout.is_zero() {
            return Ok(self.try_pop(key));
        }

        let deadline = Instant::now() + timeout;
        loop {
            if let Some(record) = self.try_pop(key) {
                return Ok(Some(record));
            }

            let notify = self.wakeup(key);
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notify.notified())
                .await
                .is_err()
            {
                // Wait window elapsed; one last non-blocking check in case a
                // push raced the timeout.
                return Ok(self.try_pop(key));
            }
        }
    }

    async fn add_to_set(&self, key: &str, record: FieldMap) -> Result<(), StoreError> {
        let mut members = self.sets.entry(key.to_string()).or_default();
        if !members.contains(&record) {
            members.push(record);
        }
        Ok(())
    }

    async fn remove_arbitrary_from_set(
        &self,
        key: &str,
    ) -> Result<Option<FieldMap>, StoreError> {
        Ok(self.sets.get_mut(key).and_then(|mut members| {
            if members.is_empty() {
                None
            } else {
                Some(members.swap_remove(0))
            }
        }))
    }

    async fn set_if_absent_or_expired(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        // The entry guard holds the shard lock, making check-and-set atomic
        match self.leases.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let (holder, expiry) = occupied.get_mut();
                if *expiry <= Instant::now() {
                    *holder = value.to_string();
                    *expiry = Instant::now() + ttl;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert((value.to_string(), Instant::now() + ttl));
                Ok(true)
            }
        }
    }

    async fn renew_ttl(&self, key: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.purge_expired(key);

        match self.leases.get_mut(key) {
            Some(mut entry) => {
                entry.1 = Instant::now() + ttl;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_if_matches(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        self.purge_expired(key);

        Ok(self
            .leases
            .remove_if(key, |_, (holder, expiry)| {
                holder.as_str() == expected && *expiry > Instant::now()
            })
            .is_some())
    }

    async fn list_keys_matching(&self, pattern: &str) -> Result<Vec<String>, StoreError> {
        let mut keys: Vec<String> = self
            .lists
            .iter()
            .map(|e| e.key().clone())
            .chain(self.sets.iter().map(|e| e.key().clone()))
            .chain(self.leases.iter().map(|e| e.key().clone()))
            .filter(|key| glob_match(pattern, key))
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys)
    }
}

/// Glob matching with `*` wildcards, the subset the registry uses.
fn glob_match(pattern: &str, key: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == key;
    }

    let mut rest = key;
    for (i, part) in parts.iter().enumerate() {
        if i == 0 {
            rest = match rest.strip_prefix(part) {
                Some(r) => r,
                None => return false,
            };
        } else if i == parts.len() - 1 {
            return part.is_empty() || rest.ends_with(part);
        } else if !part.is_empty() {
            match rest.find(part) {
                Some(idx) => rest = &rest[idx + part.len()..],
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: &str) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("tag".to_string(), tag.to_string());
        fields
    }

    #[tokio::test]
    async fn test_push_pop_preserves_order() {
        let store = MemoryStore::new();

        for tag in ["a", "b", "c"] {
            store.push_tail("q", record(tag)).await.unwrap();
        }

        for tag in ["a", "b", "c"] {
            let popped = store.pop_head("q").await.unwrap().unwrap();
            assert_eq!(popped["tag"], tag);
        }
        assert!(store.pop_head("q").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_blocking_pop_wakes_on_push() {
        let store = Arc::new(MemoryStore::new());

        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                store
                    .pop_head_blocking("q", Duration::from_secs(5))
                    .await
                    .unwrap()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push_tail("q", record("x")).await.unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped["tag"], "x");
    }

    #[tokio::test]
    async fn test_blocking_pop_times_out_empty() {
        let store = MemoryStore::new();
        let popped = store
            .pop_head_blocking("q", Duration::from_millis(30))
            .await
            .unwrap();
        assert!(popped.is_none());
    }

    #[tokio::test]
    async fn test_set_add_is_idempotent() {
        let store = MemoryStore::new();

        store.add_to_set("s", record("a")).await.unwrap();
        store.add_to_set("s", record("a")).await.unwrap();

        assert!(store.remove_arbitrary_from_set("s").await.unwrap().is_some());
        assert!(store.remove_arbitrary_from_set("s").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lease_mutual_exclusion() {
        let store = MemoryStore::new();
        let ttl = Duration::from_secs(10);

        assert!(store.set_if_absent_or_expired("l", "w1", ttl).await.unwrap());
        assert!(!store.set_if_absent_or_expired("l", "w2", ttl).await.unwrap());

        // Wrong holder cannot release
        assert!(!store.delete_if_matches("l", "w2").await.unwrap());
        assert!(store.delete_if_matches("l", "w1").await.unwrap());

        // Released lease is immediately acquirable
        assert!(store.set_if_absent_or_expired("l", "w2", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_acquirable() {
        let store = MemoryStore::new();

        assert!(store
            .set_if_absent_or_expired("l", "w1", Duration::from_millis(10))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(!store.renew_ttl("l", Duration::from_secs(1)).await.unwrap());
        assert!(store
            .set_if_absent_or_expired("l", "w2", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_list_keys_matching() {
        let store = MemoryStore::new();
        store.push_tail("relayq:orders:a", record("1")).await.unwrap();
        store.add_to_set("relayq:orders:consumers:a", record("1")).await.unwrap();
        store.add_to_set("relayq:orders:consumers:b", record("1")).await.unwrap();
        store.push_tail("relayq:other:c", record("1")).await.unwrap();

        let keys = store
            .list_keys_matching("relayq:orders:consumers:*")
            .await
            .unwrap();
        assert_eq!(
            keys,
            vec![
                "relayq:orders:consumers:a".to_string(),
                "relayq:orders:consumers:b".to_string()
            ]
        );
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("a:*", "a:b"));
        assert!(glob_match("a:*:c", "a:b:c"));
        assert!(glob_match("exact", "exact"));
        assert!(!glob_match("a:*", "b:c"));
        assert!(!glob_match("exact", "exactly"));
    }
}
