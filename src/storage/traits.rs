// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("Local storage unavailable: {0}")]
    Unavailable(String),
    #[error("Local storage quota exceeded writing '{key}' ({bytes} bytes)")]
    QuotaExceeded { key: String, bytes: usize },
    #[error("Stored value for '{key}' could not be (de)serialized: {reason}")]
    Serialization { key: String, reason: String },
}

impl StorageError {
    /// Short label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "unavailable",
            Self::QuotaExceeded { .. } => "quota",
            Self::Serialization { .. } => "serialization",
        }
    }
}

/// Durable string-valued key-value storage.
///
/// The local persistence the cache and the write queue sit on. Values are
/// opaque strings (JSON documents in practice); keys are flat
/// (`cache:{category}`, `queue:{category}`).
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// All keys starting with `prefix`, in no particular order.
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Remove every key starting with `prefix`.
    /// Default implementation removes keys one by one.
    async fn remove_prefix(&self, prefix: &str) -> Result<usize, StorageError> {
        let keys = self.keys_with_prefix(prefix).await?;
        for key in &keys {
            self.remove(key).await?;
        }
        Ok(keys.len())
    }
}
