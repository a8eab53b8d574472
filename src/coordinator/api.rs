// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Data API: load, save, status, sync.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::events::{now_millis, LoaderEvent};
use crate::fetcher::LoadResult;
use crate::record::{Category, Payload};
use crate::source::traits::SourceKind;
use crate::sync::{SyncOutcome, SyncSummary};

use super::{CacheStatus, DataLoader, LoaderError, LoaderStatus, SaveOutcome};

impl DataLoader {
    /// Load a category through the fallback chain.
    ///
    /// Only an invalid category name (or a stopped loader) is an error. When
    /// every source is down the result is the cached copy marked stale, or
    /// an empty payload with no origin.
    #[tracing::instrument(skip(self))]
    pub async fn load_data(&self, category: &str) -> Result<LoadResult, LoaderError> {
        let category = Category::new(category)?;
        self.ensure_accepting()?;

        if self.config.cache_first {
            if let Some(entry) = self.cache.get_fresh(&category) {
                debug!("Serving fresh cache entry");
                let age_ms = entry.age_ms();
                return Ok(LoadResult {
                    category,
                    payload: entry.payload,
                    origin: Some(SourceKind::Cache),
                    stale: false,
                    age_ms: Some(age_ms),
                    attempts: 0,
                });
            }
        }

        Ok(self.fetcher.fetch(&category).await)
    }

    /// Save a category payload.
    ///
    /// Tries the primary backend first. If it cannot be reached the write is
    /// queued locally and synced once the backend is back. If the category
    /// already has queued writes the new one goes behind them so the backend
    /// sees them in order.
    #[tracing::instrument(skip(self, payload), fields(records = payload.len()))]
    pub async fn save_data(&self, category: &str, payload: Payload) -> Result<SaveOutcome, LoaderError> {
        let category = Category::new(category)?;
        self.ensure_accepting()?;

        // Writes from a previous run count as queued even before `start`
        if let Err(e) = self.queue.restore().await {
            debug!(error = %e, "Queued writes from a previous run not readable yet");
        }

        if self.queue.has_pending(&category) {
            let persisted = self.save_locally(&category, payload).await;
            return Ok(match self.synchronizer.sync(&category).await {
                SyncOutcome::Merged { .. } if !self.queue.has_pending(&category) => SaveOutcome {
                    success: true,
                    used_fallback: false,
                },
                _ => SaveOutcome {
                    success: persisted,
                    used_fallback: true,
                },
            });
        }

        match self.fetcher.push_primary(&category, &payload).await {
            Ok(()) => {
                self.cache.put(&category, payload, SourceKind::Primary).await;
                crate::metrics::record_save("remote");
                Ok(SaveOutcome {
                    success: true,
                    used_fallback: false,
                })
            }
            Err(e) => {
                warn!(error = %e, "Save could not reach the backend, queueing locally");
                let persisted = self.save_locally(&category, payload).await;
                Ok(SaveOutcome {
                    success: persisted,
                    used_fallback: true,
                })
            }
        }
    }

    /// Validate a raw JSON document and save it.
    pub async fn save_value(&self, category: &str, value: Value) -> Result<SaveOutcome, LoaderError> {
        let payload = Payload::from_value(value)?;
        self.save_data(category, payload).await
    }

    /// Queue the write and show it optimistically. Returns whether the queue
    /// reached durable storage.
    async fn save_locally(&self, category: &Category, payload: Payload) -> bool {
        let enqueued = self.queue.enqueue(category, payload.clone()).await;
        self.cache.put(category, payload, SourceKind::Local).await;
        crate::metrics::record_save("queued");

        if !enqueued.persisted {
            warn!(
                category = %category,
                write_id = %enqueued.write.write_id,
                "Write is only held in memory and will be lost if the app closes"
            );
        }
        self.events.publish(LoaderEvent::SavedLocally {
            category: category.clone(),
            write_id: enqueued.write.write_id,
            persisted: enqueued.persisted,
            timestamp: now_millis(),
        });
        enqueued.persisted
    }

    /// Status snapshot. No I/O.
    #[must_use]
    pub fn get_status(&self) -> LoaderStatus {
        let cache = self
            .cache
            .entries()
            .into_iter()
            .map(|entry| CacheStatus {
                expired: self.cache.is_expired(&entry),
                age_ms: entry.age_ms(),
                records: entry.payload.len(),
                origin: entry.origin,
                category: entry.category,
            })
            .collect();

        let pending: BTreeMap<Category, usize> = self
            .queue
            .categories()
            .into_iter()
            .map(|c| {
                let n = self.queue.pending_count(&c);
                (c, n)
            })
            .collect();

        LoaderStatus {
            state: self.state(),
            health: self.health.snapshot(),
            cache,
            pending,
            queue: self.queue.stats(),
        }
    }

    /// Sync every category with queued writes now.
    pub async fn force_sync(&self) -> Result<SyncSummary, LoaderError> {
        self.ensure_accepting()?;
        let summary = self.synchronizer.sync_all().await;
        info!(
            categories = summary.outcomes.len(),
            merged = summary.merged_total(),
            failed = summary.failed().len(),
            "Forced sync finished"
        );
        Ok(summary)
    }

    /// Drop the cache and every queued write, in memory and on disk.
    ///
    /// Queued writes that never reached the backend are lost.
    pub async fn clear_local_data(&self) -> Result<(), LoaderError> {
        let pending = self.queue.total_pending();
        if pending > 0 {
            warn!(pending, "Clearing local data discards unsynced writes");
        }
        self.cache.clear().await?;
        self.queue.clear().await?;
        Ok(())
    }
}
