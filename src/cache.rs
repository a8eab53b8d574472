// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Last-known-good payload per category.
//!
//! Entries live in a [`DashMap`] and are mirrored to local storage under
//! `cache:{category}` so a cold start can still serve something. There is no
//! capacity eviction: one entry per category, overwritten on every put.
//! Expiry only matters to callers asking for fresh data; an expired entry is
//! still the last resort of the fallback chain.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::events::now_millis;
use crate::record::{Category, Payload};
use crate::source::traits::SourceKind;
use crate::storage::traits::{KeyValueStore, StorageError};
use crate::storage::{load_json, save_json, KeyedLocks};

/// Storage key prefix for persisted cache entries.
pub const CACHE_KEY_PREFIX: &str = "cache:";

fn cache_key(category: &Category) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, category)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub category: Category,
    pub payload: Payload,
    /// Epoch millis
    pub stored_at: i64,
    /// Who produced the payload; `Local` for an optimistic local write
    pub origin: SourceKind,
}

impl CacheEntry {
    /// Age in millis, never negative.
    #[must_use]
    pub fn age_ms(&self) -> i64 {
        (now_millis() - self.stored_at).max(0)
    }
}

pub struct CacheLayer {
    entries: DashMap<Category, CacheEntry>,
    store: Arc<dyn KeyValueStore>,
    persist_locks: KeyedLocks<Category>,
    ttl: Duration,
}

impl CacheLayer {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            persist_locks: KeyedLocks::new(),
            ttl,
        }
    }

    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Load persisted entries into memory. Entries already in memory win.
    /// Returns the number of entries loaded.
    pub async fn warm(&self) -> Result<usize, StorageError> {
        let keys = self.store.keys_with_prefix(CACHE_KEY_PREFIX).await?;
        let mut loaded = 0;

        for key in keys {
            let entry: CacheEntry = match load_json(self.store.as_ref(), &key).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable cache entry");
                    continue;
                }
            };
            if key != cache_key(&entry.category) {
                warn!(key = %key, category = %entry.category, "Cache entry stored under wrong key, skipping");
                continue;
            }
            if !self.entries.contains_key(&entry.category) {
                self.entries.insert(entry.category.clone(), entry);
                loaded += 1;
            }
        }

        crate::metrics::set_cache_entries(self.entries.len());
        debug!(loaded, "Cache warmed from local storage");
        Ok(loaded)
    }

    /// Entry for `category`, expired or not.
    #[must_use]
    pub fn get(&self, category: &Category) -> Option<CacheEntry> {
        let entry = self.entries.get(category).map(|e| e.value().clone());
        crate::metrics::record_cache(entry.is_some());
        entry
    }

    /// Entry for `category` only if it has not expired.
    #[must_use]
    pub fn get_fresh(&self, category: &Category) -> Option<CacheEntry> {
        self.get(category).filter(|e| !self.is_expired(e))
    }

    #[must_use]
    pub fn is_expired(&self, entry: &CacheEntry) -> bool {
        entry.age_ms() as u128 >= self.ttl.as_millis()
    }

    /// Store `payload` for `category`. Persistence failures are logged and
    /// counted but never fail the put.
    pub async fn put(&self, category: &Category, payload: Payload, origin: SourceKind) -> CacheEntry {
        let entry = CacheEntry {
            category: category.clone(),
            payload,
            stored_at: now_millis(),
            origin,
        };
        self.entries.insert(category.clone(), entry.clone());
        crate::metrics::set_cache_entries(self.entries.len());

        self.persist(category).await;
        entry
    }

    /// Every entry, sorted by category.
    #[must_use]
    pub fn entries(&self) -> Vec<CacheEntry> {
        let mut entries: Vec<CacheEntry> = self.entries.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.category.cmp(&b.category));
        entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, in memory and in storage.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.entries.clear();
        crate::metrics::set_cache_entries(0);
        let removed = self.store.remove_prefix(CACHE_KEY_PREFIX).await?;
        info!(removed, "Cache cleared");
        Ok(())
    }

    async fn persist(&self, category: &Category) {
        let lock = self.persist_locks.lock_for(category);
        let _guard = lock.lock().await;

        let Some(entry) = self.entries.get(category).map(|e| e.value().clone()) else {
            return;
        };
        if let Err(e) = save_json(self.store.as_ref(), &cache_key(category), &entry).await {
            crate::metrics::record_storage_error("cache", e.label());
            warn!(category = %category, error = %e, "Failed to persist cache entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use serde_json::json;

    fn coop() -> Category {
        Category::new("coop").unwrap()
    }

    fn payload() -> Payload {
        Payload::from_value(json!([{"id": 1, "name": "hen"}])).unwrap()
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = CacheLayer::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        cache.put(&coop(), payload(), SourceKind::Primary).await;

        let entry = cache.get(&coop()).unwrap();
        assert_eq!(entry.payload, payload());
        assert_eq!(entry.origin, SourceKind::Primary);
        assert!(!cache.is_expired(&entry));
        assert!(cache.get_fresh(&coop()).is_some());
    }

    #[tokio::test]
    async fn test_zero_ttl_is_always_expired() {
        let cache = CacheLayer::new(Arc::new(MemoryStore::new()), Duration::ZERO);
        cache.put(&coop(), payload(), SourceKind::Static).await;

        assert!(cache.get(&coop()).is_some());
        assert!(cache.get_fresh(&coop()).is_none());
    }

    #[tokio::test]
    async fn test_old_entry_is_expired() {
        let cache = CacheLayer::new(Arc::new(MemoryStore::new()), Duration::from_secs(60));
        let entry = CacheEntry {
            category: coop(),
            payload: payload(),
            stored_at: now_millis() - 61_000,
            origin: SourceKind::Primary,
        };
        assert!(cache.is_expired(&entry));
    }

    #[tokio::test]
    async fn test_warm_restores_persisted_entries() {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        {
            let cache = CacheLayer::new(store.clone(), Duration::from_secs(60));
            cache.put(&coop(), payload(), SourceKind::Secondary).await;
        }

        let cache = CacheLayer::new(store, Duration::from_secs(60));
        assert!(cache.is_empty());
        assert_eq!(cache.warm().await.unwrap(), 1);
        assert_eq!(cache.get(&coop()).unwrap().origin, SourceKind::Secondary);
    }

    #[tokio::test]
    async fn test_put_survives_storage_failure() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let cache = CacheLayer::new(store, Duration::from_secs(60));

        cache.put(&coop(), payload(), SourceKind::Local).await;
        assert_eq!(cache.get(&coop()).unwrap().origin, SourceKind::Local);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = Arc::new(MemoryStore::new());
        let cache = CacheLayer::new(store.clone(), Duration::from_secs(60));
        cache.put(&coop(), payload(), SourceKind::Primary).await;

        cache.clear().await.unwrap();
        assert!(cache.get(&coop()).is_none());
        assert!(store.get("cache:coop").await.unwrap().is_none());
    }
}
