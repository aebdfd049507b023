//! In-process expiring store.
//!
//! Suitable for single-instance deployments and tests. Limits enforced
//! through this store are per-process, not shared across instances.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

use super::{ExpiringStore, StoreError};
use crate::ratelimit::RateLimitRecord;

/// An in-memory store with lazy expiry.
///
/// Expired entries are treated as absent and evicted the next time they are
/// read; there is no background sweeper.
#[derive(Default)]
pub struct MemoryStore {
    entries: DashMap<String, StoredEntry>,
}

struct StoredEntry {
    record: RateLimitRecord,
    expires_at: Instant,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries currently held, including not-yet-evicted expired
    /// ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no entries at all.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.entries.clear();
    }
}

#[async_trait]
impl ExpiringStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        // The read guard must be released before removing, so the expired
        // entry is evicted in a second step.
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > Instant::now() {
                return Ok(Some(entry.record.clone()));
            }
        } else {
            return Ok(None);
        }

        self.entries.remove(key);
        Ok(None)
    }

    async fn set(
        &self,
        key: &str,
        record: &RateLimitRecord,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_string(),
            StoredEntry {
                record: record.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(count: u32) -> RateLimitRecord {
        RateLimitRecord {
            window_started_at: 100,
            count,
            cooldown_started_at: None,
        }
    }

    #[tokio::test]
    async fn test_set_then_get() {
        let store = MemoryStore::new();
        store
            .set("k", &record(1), Duration::from_secs(60))
            .await
            .unwrap();

        let got = store.get("k").await.unwrap();
        assert_eq!(got, Some(record(1)));
    }

    #[tokio::test]
    async fn test_get_missing_key() {
        let store = MemoryStore::new();
        assert_eq!(store.get("nope").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let store = MemoryStore::new();
        store
            .set("k", &record(1), Duration::from_secs(60))
            .await
            .unwrap();

        store.delete("k").await.unwrap();
        assert_eq!(store.get("k").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", &record(1), Duration::from_millis(20))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), None);
        // The expired entry was evicted by the read.
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_overwrite_rearms_ttl() {
        let store = MemoryStore::new();
        store
            .set("k", &record(1), Duration::from_millis(20))
            .await
            .unwrap();
        store
            .set("k", &record(2), Duration::from_secs(60))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert_eq!(store.get("k").await.unwrap(), Some(record(2)));
    }
}
