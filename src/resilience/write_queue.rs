// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local write queue for saves made while the primary backend is unreachable.
//!
//! This is NOT a tier - it's a durability buffer. Writes in the queue are
//! "in flight" to the backend, waiting for the synchronizer to merge and
//! flush them.
//!
//! Every category has an in-memory mirror that is mutated synchronously and
//! persisted to local storage under `queue:{category}`. A flush uses the
//! drain/swap protocol:
//!
//! ```text
//! begin_drain:  pending ──swap──► draining      (pending is now empty)
//! enqueue:      new write ──────► pending       (never touches draining)
//! commit_drain: draining ──drop                 (newer writes stay queued)
//! abort_drain:  draining ++ pending ──► pending (original order restored)
//! ```
//!
//! Writes left by a previous run are restored once, before the first time
//! this session writes `queue:{category}` back, so a persist never replaces
//! writes it has not read.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::events::now_millis;
use crate::record::{Category, Payload};
use crate::storage::traits::{KeyValueStore, StorageError};
use crate::storage::{load_json, save_json, KeyedLocks};

/// Storage key prefix for persisted queues.
pub const QUEUE_KEY_PREFIX: &str = "queue:";

fn queue_key(category: &Category) -> String {
    format!("{}{}", QUEUE_KEY_PREFIX, category)
}

/// A save that could not reach the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedWrite {
    pub write_id: Uuid,
    pub category: Category,
    pub payload: Payload,
    /// Epoch millis when the write was made
    pub timestamp: i64,
}

/// Result of [`LocalWriteQueue::enqueue`].
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub write: QueuedWrite,
    /// `false` if local storage rejected the write; it then only lives in
    /// memory for this session.
    pub persisted: bool,
}

/// Writes handed to the synchronizer by [`LocalWriteQueue::begin_drain`].
/// Must be given back through `commit_drain` or `abort_drain`.
#[derive(Debug)]
#[must_use = "a drain must be committed or aborted"]
pub struct DrainTicket {
    category: Category,
    writes: Vec<QueuedWrite>,
}

impl DrainTicket {
    #[must_use]
    pub fn category(&self) -> &Category {
        &self.category
    }

    #[must_use]
    pub fn writes(&self) -> &[QueuedWrite] {
        &self.writes
    }
}

/// Queue state for observability
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    /// Writes currently queued (including any being drained)
    pub pending: u64,
    /// Total writes enqueued since startup
    pub total_enqueued: u64,
    /// Total writes flushed to the backend since startup
    pub total_flushed: u64,
    /// Total writes taken out with `dequeue_all` since startup
    pub total_dequeued: u64,
    /// Persistence failures since startup
    pub storage_failures: u64,
}

#[derive(Debug, Default)]
struct CategoryQueue {
    draining: Vec<QueuedWrite>,
    pending: Vec<QueuedWrite>,
    drain_open: bool,
}

impl CategoryQueue {
    fn all(&self) -> Vec<QueuedWrite> {
        self.draining.iter().chain(self.pending.iter()).cloned().collect()
    }

    fn len(&self) -> usize {
        self.draining.len() + self.pending.len()
    }
}

pub struct LocalWriteQueue {
    queues: Mutex<HashMap<Category, CategoryQueue>>,
    store: Arc<dyn KeyValueStore>,
    persist_locks: KeyedLocks<Category>,
    /// Set by the first successful restore; holds the number restored
    restored: OnceCell<usize>,
    total_enqueued: AtomicU64,
    total_flushed: AtomicU64,
    total_dequeued: AtomicU64,
    storage_failures: AtomicU64,
}

impl LocalWriteQueue {
    /// Empty queue over `store`. Writes left over from a previous run are
    /// loaded by [`restore`](Self::restore), at the latest on the first
    /// persist.
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            queues: Mutex::new(HashMap::new()),
            store,
            persist_locks: KeyedLocks::new(),
            restored: OnceCell::new(),
            total_enqueued: AtomicU64::new(0),
            total_flushed: AtomicU64::new(0),
            total_dequeued: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
        }
    }

    /// Queue over `store` with every persisted write restored.
    pub async fn open(store: Arc<dyn KeyValueStore>) -> Result<Self, StorageError> {
        let queue = Self::new(store);
        queue.restore().await?;
        Ok(queue)
    }

    /// Load persisted queues ahead of anything enqueued this session.
    ///
    /// Runs once: later calls return the count of the first successful run.
    /// A failed run is retried on the next call. Unreadable entries are
    /// skipped with a warning.
    pub async fn restore(&self) -> Result<usize, StorageError> {
        self.restored.get_or_try_init(|| self.load_persisted()).await.copied()
    }

    async fn load_persisted(&self) -> Result<usize, StorageError> {
        let keys = self.store.keys_with_prefix(QUEUE_KEY_PREFIX).await?;
        let mut restored = 0;

        for key in keys {
            let Some(name) = key.strip_prefix(QUEUE_KEY_PREFIX) else { continue };
            let Ok(category) = Category::new(name) else {
                warn!(key = %key, "Ignoring queue entry with invalid category name");
                continue;
            };
            let writes: Vec<QueuedWrite> = match load_json(self.store.as_ref(), &key).await {
                Ok(Some(writes)) => writes,
                Ok(None) => continue,
                Err(e) => {
                    warn!(key = %key, error = %e, "Skipping unreadable queue entry");
                    continue;
                }
            };

            let mut queues = self.queues.lock();
            let queue = queues.entry(category.clone()).or_default();
            let known: Vec<Uuid> = queue.draining.iter().chain(&queue.pending).map(|w| w.write_id).collect();
            let fresh: Vec<QueuedWrite> = writes
                .into_iter()
                .filter(|w| w.category == category && !known.contains(&w.write_id))
                .collect();
            restored += fresh.len();
            // Persisted writes are older than anything enqueued this session
            queue.pending.splice(0..0, fresh);
        }

        if restored > 0 {
            warn!(restored, "Write queue has items from previous run, will sync");
        }
        crate::metrics::set_queue_depth(self.total_pending());
        Ok(restored)
    }

    /// Append a write for `category`.
    pub async fn enqueue(&self, category: &Category, payload: Payload) -> Enqueued {
        let write = QueuedWrite {
            write_id: Uuid::new_v4(),
            category: category.clone(),
            payload,
            timestamp: now_millis(),
        };

        let depth = {
            let mut queues = self.queues.lock();
            let queue = queues.entry(category.clone()).or_default();
            queue.pending.push(write.clone());
            queue.len()
        };
        self.total_enqueued.fetch_add(1, Ordering::Relaxed);
        crate::metrics::set_queue_depth(self.total_pending());

        debug!(category = %category, write_id = %write.write_id, depth, "Write queued locally");

        let persisted = self.persist(category).await.is_ok();
        Enqueued { write, persisted }
    }

    /// Everything queued for `category`, oldest first, without removing it.
    #[must_use]
    pub fn peek(&self, category: &Category) -> Vec<QueuedWrite> {
        self.queues
            .lock()
            .get(category)
            .map(CategoryQueue::all)
            .unwrap_or_default()
    }

    #[must_use]
    pub fn has_pending(&self, category: &Category) -> bool {
        self.pending_count(category) > 0
    }

    #[must_use]
    pub fn pending_count(&self, category: &Category) -> usize {
        self.queues.lock().get(category).map_or(0, CategoryQueue::len)
    }

    /// Categories with queued writes, sorted.
    #[must_use]
    pub fn categories(&self) -> Vec<Category> {
        let mut categories: Vec<Category> = self
            .queues
            .lock()
            .iter()
            .filter(|(_, q)| q.len() > 0)
            .map(|(c, _)| c.clone())
            .collect();
        categories.sort();
        categories
    }

    #[must_use]
    pub fn total_pending(&self) -> usize {
        self.queues.lock().values().map(CategoryQueue::len).sum()
    }

    /// Remove and return every pending write for `category`.
    ///
    /// Writes that belong to an open drain stay with that drain.
    pub async fn dequeue_all(&self, category: &Category) -> Vec<QueuedWrite> {
        let taken = {
            let mut queues = self.queues.lock();
            match queues.get_mut(category) {
                Some(queue) => std::mem::take(&mut queue.pending),
                None => Vec::new(),
            }
        };
        if !taken.is_empty() {
            self.total_dequeued.fetch_add(taken.len() as u64, Ordering::Relaxed);
            crate::metrics::set_queue_depth(self.total_pending());
            let _ = self.persist(category).await;
        }
        taken
    }

    /// Swap the pending writes of `category` out for flushing.
    ///
    /// Returns `None` if nothing is pending or a drain is already open.
    pub fn begin_drain(&self, category: &Category) -> Option<DrainTicket> {
        let mut queues = self.queues.lock();
        let queue = queues.get_mut(category)?;
        if queue.drain_open || queue.pending.is_empty() {
            return None;
        }
        queue.draining = std::mem::take(&mut queue.pending);
        queue.drain_open = true;
        Some(DrainTicket {
            category: category.clone(),
            writes: queue.draining.clone(),
        })
    }

    /// The drained writes reached the backend: forget them.
    pub async fn commit_drain(&self, ticket: DrainTicket) {
        let flushed = {
            let mut queues = self.queues.lock();
            match queues.get_mut(&ticket.category) {
                Some(queue) => {
                    let n = queue.draining.len();
                    queue.draining.clear();
                    queue.drain_open = false;
                    n
                }
                None => 0,
            }
        };
        self.total_flushed.fetch_add(flushed as u64, Ordering::Relaxed);
        crate::metrics::set_queue_depth(self.total_pending());
        info!(category = %ticket.category, flushed, "Queued writes flushed");

        let _ = self.persist(&ticket.category).await;
    }

    /// The flush failed: put the drained writes back, ahead of newer ones.
    pub fn abort_drain(&self, ticket: DrainTicket) {
        let mut queues = self.queues.lock();
        if let Some(queue) = queues.get_mut(&ticket.category) {
            let mut restored = std::mem::take(&mut queue.draining);
            restored.append(&mut queue.pending);
            queue.pending = restored;
            queue.drain_open = false;
        }
        debug!(category = %ticket.category, writes = ticket.writes.len(), "Drain aborted, writes kept");
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            pending: self.total_pending() as u64,
            total_enqueued: self.total_enqueued.load(Ordering::Relaxed),
            total_flushed: self.total_flushed.load(Ordering::Relaxed),
            total_dequeued: self.total_dequeued.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
        }
    }

    /// Drop every queued write, in memory and in storage.
    pub async fn clear(&self) -> Result<(), StorageError> {
        self.queues.lock().clear();
        crate::metrics::set_queue_depth(0);
        let removed = self.store.remove_prefix(QUEUE_KEY_PREFIX).await?;
        info!(removed, "Local write queue cleared");
        Ok(())
    }

    /// Write the current state of `category` to storage.
    ///
    /// Refuses to write until persisted writes have been restored, so a
    /// queue that could not be read is never overwritten.
    async fn persist(&self, category: &Category) -> Result<(), StorageError> {
        let result = match self.restore().await {
            Ok(_) => self.write_snapshot(category).await,
            Err(e) => Err(e),
        };

        if let Err(ref e) = result {
            self.storage_failures.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_storage_error("queue", e.label());
            warn!(
                category = %category,
                error = %e,
                "Failed to persist write queue; queued writes will not survive a restart"
            );
        }
        result
    }

    async fn write_snapshot(&self, category: &Category) -> Result<(), StorageError> {
        let lock = self.persist_locks.lock_for(category);
        let _guard = lock.lock().await;

        // Snapshot under the lock so the latest state always wins
        let snapshot = self.peek(category);
        let key = queue_key(category);
        if snapshot.is_empty() {
            self.store.remove(&key).await
        } else {
            save_json(self.store.as_ref(), &key, &snapshot).await
        }
    }
}
