// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Synchronizer: flushes queued writes back to the primary backend.
//!
//! # Sync of one category
//!
//! ```text
//! begin_drain ──► fetch_primary ──► merge ──► push_primary ──► commit_drain
//!                      │                           │              + cache put
//!                      └────────── failure ────────┘              + SyncCompleted
//!                                     │
//!                                abort_drain + SyncFailed
//! ```
//!
//! Syncs of one category never overlap; different categories run in
//! parallel and fail independently. Writes enqueued while a sync is running
//! are flushed by a further pass before that sync returns.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::cache::CacheLayer;
use crate::events::{now_millis, EventBus, LoaderEvent};
use crate::fetcher::FallbackFetcher;
use crate::merge::merge;
use crate::record::{Category, Payload};
use crate::resilience::health::ConnectionStatus;
use crate::resilience::write_queue::{DrainTicket, LocalWriteQueue};
use crate::source::traits::{SourceError, SourceKind};

/// Result of syncing one category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SyncOutcome {
    NothingQueued,
    #[serde(rename_all = "camelCase")]
    Merged { merged_count: usize },
    /// Another sync of the same category is running
    InProgress,
    Failed { reason: String },
}

impl SyncOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::NothingQueued | Self::Merged { .. })
    }

    #[must_use]
    pub fn merged_count(&self) -> usize {
        match self {
            Self::Merged { merged_count } => *merged_count,
            _ => 0,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::NothingQueued => "nothing_queued",
            Self::Merged { .. } => "merged",
            Self::InProgress => "in_progress",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Outcome per category of a [`Synchronizer::sync_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub outcomes: BTreeMap<Category, SyncOutcome>,
}

impl SyncSummary {
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.values().all(SyncOutcome::is_success)
    }

    #[must_use]
    pub fn merged_total(&self) -> usize {
        self.outcomes.values().map(SyncOutcome::merged_count).sum()
    }

    /// Categories whose sync failed.
    #[must_use]
    pub fn failed(&self) -> Vec<&Category> {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, SyncOutcome::Failed { .. }))
            .map(|(c, _)| c)
            .collect()
    }
}

/// Marks a category as syncing; unmarks on drop, whatever path returns.
struct SyncGuard<'a> {
    syncing: &'a Mutex<HashSet<Category>>,
    category: Category,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.syncing.lock().remove(&self.category);
    }
}

pub struct Synchronizer {
    fetcher: Arc<FallbackFetcher>,
    queue: Arc<LocalWriteQueue>,
    cache: Arc<CacheLayer>,
    events: EventBus,
    syncing: Mutex<HashSet<Category>>,
}

impl Synchronizer {
    pub fn new(
        fetcher: Arc<FallbackFetcher>,
        queue: Arc<LocalWriteQueue>,
        cache: Arc<CacheLayer>,
        events: EventBus,
    ) -> Self {
        Self {
            fetcher,
            queue,
            cache,
            events,
            syncing: Mutex::new(HashSet::new()),
        }
    }

    #[must_use]
    pub fn is_syncing(&self, category: &Category) -> bool {
        self.syncing.lock().contains(category)
    }

    fn try_mark(&self, category: &Category) -> Option<SyncGuard<'_>> {
        if !self.syncing.lock().insert(category.clone()) {
            return None;
        }
        Some(SyncGuard {
            syncing: &self.syncing,
            category: category.clone(),
        })
    }

    /// Merge the queued writes of `category` into the primary's state and
    /// flush the result.
    #[tracing::instrument(skip_all, fields(category = %category))]
    pub async fn sync(&self, category: &Category) -> SyncOutcome {
        if !self.queue.has_pending(category) {
            return SyncOutcome::NothingQueued;
        }
        let Some(_guard) = self.try_mark(category) else {
            debug!("Sync already running");
            return SyncOutcome::InProgress;
        };

        let start = Instant::now();
        let mut passes = 0;
        let mut merged_total = 0;
        let outcome = loop {
            let Some(ticket) = self.queue.begin_drain(category) else {
                break if passes == 0 {
                    SyncOutcome::NothingQueued
                } else {
                    SyncOutcome::Merged {
                        merged_count: merged_total,
                    }
                };
            };
            if passes > 0 {
                debug!(writes = ticket.writes().len(), "Writes arrived during sync, flushing again");
            }
            match self.flush(ticket).await {
                SyncOutcome::Merged { merged_count } => merged_total += merged_count,
                other => break other,
            }
            passes += 1;
        };
        crate::metrics::record_sync(outcome.label(), outcome.merged_count(), start.elapsed());
        outcome
    }

    async fn flush(&self, ticket: DrainTicket) -> SyncOutcome {
        let category = ticket.category().clone();

        let remote = match self.fetcher.fetch_primary(&category).await {
            Ok(remote) => remote,
            // Nothing stored remotely yet
            Err(SourceError::Status(404)) => Payload::empty(),
            Err(e) => return self.fail(ticket, format!("reading remote state: {}", e)),
        };

        let merged = match merge(&category, &remote, ticket.writes()) {
            Ok(merged) => merged,
            Err(e) => return self.fail(ticket, e.to_string()),
        };

        if let Err(e) = self.fetcher.push_primary(&category, &merged.payload).await {
            return self.fail(ticket, format!("writing merged state: {}", e));
        }

        let writes = ticket.writes().len();
        self.queue.commit_drain(ticket).await;
        self.cache_merged(&category, &merged.payload).await;

        info!(writes, merged_count = merged.merged_count, "Queued writes merged and flushed");
        self.events.publish(LoaderEvent::SyncCompleted {
            category,
            merged_count: merged.merged_count,
            timestamp: now_millis(),
        });
        SyncOutcome::Merged {
            merged_count: merged.merged_count,
        }
    }

    /// Cache what the primary now holds, with any writes still queued laid
    /// on top so an optimistic local save stays visible.
    async fn cache_merged(&self, category: &Category, merged: &Payload) {
        let pending = self.queue.peek(category);
        if pending.is_empty() {
            self.cache.put(category, merged.clone(), SourceKind::Primary).await;
            return;
        }
        match merge(category, merged, &pending) {
            Ok(view) => {
                self.cache.put(category, view.payload, SourceKind::Local).await;
            }
            Err(e) => debug!(error = %e, "Keeping cached local view, queued writes do not merge"),
        }
    }

    fn fail(&self, ticket: DrainTicket, reason: String) -> SyncOutcome {
        let category = ticket.category().clone();
        self.queue.abort_drain(ticket);
        warn!(category = %category, reason = %reason, "Sync failed, queued writes kept");
        self.events.publish(LoaderEvent::SyncFailed {
            category,
            reason: reason.clone(),
            timestamp: now_millis(),
        });
        SyncOutcome::Failed { reason }
    }

    /// Sync every category with queued writes, concurrently.
    pub async fn sync_all(self: &Arc<Self>) -> SyncSummary {
        let categories = self.queue.categories();
        if categories.is_empty() {
            return SyncSummary::default();
        }
        info!(categories = categories.len(), "Syncing queued writes");

        let mut tasks = JoinSet::new();
        for category in categories {
            let this = Arc::clone(self);
            tasks.spawn(async move {
                let outcome = this.sync(&category).await;
                (category, outcome)
            });
        }

        let mut summary = SyncSummary::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((category, outcome)) => {
                    summary.outcomes.insert(category, outcome);
                }
                Err(e) => error!(error = %e, "Sync task panicked"),
            }
        }
        summary
    }

    /// Run [`sync_all`](Self::sync_all) whenever the primary becomes
    /// connected after being anything else.
    pub fn spawn_recovery_listener(
        self: Arc<Self>,
        mut events: broadcast::Receiver<LoaderEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = events.recv() => match received {
                        Ok(LoaderEvent::ConnectionStatus {
                            source: SourceKind::Primary,
                            old_status,
                            new_status: ConnectionStatus::Connected,
                            ..
                        }) if old_status != ConnectionStatus::Connected => {
                            info!(from = %old_status, "Primary recovered, syncing queued writes");
                            let summary = self.sync_all().await;
                            debug!(merged = summary.merged_total(), "Recovery sync done");
                        }
                        Ok(_) => {}
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "Recovery listener lagged behind events");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Recovery listener stopped");
        })
    }

    /// Periodically sync whatever is queued, for backends without a usable
    /// health endpoint.
    pub fn spawn_poller(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if self.queue.total_pending() > 0 {
                            self.sync_all().await;
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Sync poller stopped");
        })
    }
}
