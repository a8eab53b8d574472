// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local durable storage.
//!
//! - [`traits::KeyValueStore`]: the string key-value contract
//! - [`memory::MemoryStore`]: ephemeral, quota-aware, for tests and kiosks
//! - [`file::FileStore`]: one file per key under a directory

pub mod traits;
pub mod memory;
pub mod file;

use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;

use traits::{KeyValueStore, StorageError};

/// Read and decode a JSON value stored under `key`.
pub async fn load_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StorageError> {
    let Some(raw) = store.get(key).await? else {
        return Ok(None);
    };
    serde_json::from_str(&raw)
        .map(Some)
        .map_err(|e| StorageError::Serialization {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Encode `value` as JSON and store it under `key`.
pub async fn save_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StorageError> {
    let raw = serde_json::to_string(value).map_err(|e| StorageError::Serialization {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    store.set(key, &raw).await
}

/// Per-key async locks serialising persistence of one key.
///
/// Holders snapshot the in-memory state *after* acquiring the lock, so the
/// last writer to get the lock always persists the newest state.
pub(crate) struct KeyedLocks<K> {
    locks: DashMap<K, Arc<tokio::sync::Mutex<()>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub(crate) fn new() -> Self {
        Self { locks: DashMap::new() }
    }

    pub(crate) fn lock_for(&self, key: &K) -> Arc<tokio::sync::Mutex<()>> {
        self.locks.entry(key.clone()).or_default().clone()
    }
}
