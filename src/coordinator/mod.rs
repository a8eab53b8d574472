// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Data loader facade.
//!
//! The [`DataLoader`] is the only entry point UI code needs. It ties
//! together:
//! - the fallback fetcher (primary, secondary, static snapshot, cache)
//! - the local write queue for saves made while offline
//! - the health monitor and the synchronizer it triggers on recovery
//!
//! # Lifecycle
//!
//! ```text
//! Created → Starting → Running → ShuttingDown → Stopped
//! ```
//!
//! Loads and saves work from `Created` on; `start()` only adds the
//! background tasks (health timer, recovery listener, optional poller).
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use catalog_sync::{DataLoader, LoaderConfig, LoaderState, Payload, Sources};
//! use catalog_sync::source::memory::MemorySource;
//! use catalog_sync::source::traits::SourceKind;
//! use catalog_sync::storage::memory::MemoryStore;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), catalog_sync::LoaderError> {
//! let primary = Arc::new(MemorySource::new(SourceKind::Primary));
//! let loader = DataLoader::new(
//!     LoaderConfig::default(),
//!     Sources::new(primary),
//!     Arc::new(MemoryStore::new()),
//! );
//! assert_eq!(loader.state(), LoaderState::Created);
//!
//! loader.start().await?;
//! let saved = loader
//!     .save_data("coop", Payload::from_value(json!([{"id": 1, "name": "hen"}]))?)
//!     .await?;
//! assert!(saved.success);
//!
//! let loaded = loader.load_data("coop").await?;
//! assert_eq!(loaded.payload.len(), 1);
//! loader.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod types;
mod api;
mod lifecycle;

pub use types::{CacheStatus, LoaderError, LoaderState, LoaderStatus, SaveOutcome};

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::CacheLayer;
use crate::config::LoaderConfig;
use crate::events::{EventBus, LoaderEvent};
use crate::fetcher::FallbackFetcher;
use crate::resilience::health::HealthMonitor;
use crate::resilience::write_queue::LocalWriteQueue;
use crate::source::http::{HttpBackend, StaticSnapshotSource};
use crate::source::traits::SourceKind;
use crate::source::Sources;
use crate::storage::file::FileStore;
use crate::storage::memory::MemoryStore;
use crate::storage::traits::KeyValueStore;
use crate::sync::Synchronizer;

/// Resilient loader for category datasets.
///
/// # Thread Safety
///
/// The loader is `Send + Sync`; share it behind an `Arc`. Every component
/// guards its own state.
pub struct DataLoader {
    pub(super) config: LoaderConfig,

    /// Loader state (broadcast to watchers)
    pub(super) state: watch::Sender<LoaderState>,

    /// Loader state receiver (for internal use)
    pub(super) state_rx: watch::Receiver<LoaderState>,

    pub(super) events: EventBus,
    pub(super) health: Arc<HealthMonitor>,
    pub(super) cache: Arc<CacheLayer>,
    pub(super) queue: Arc<LocalWriteQueue>,
    pub(super) fetcher: Arc<FallbackFetcher>,
    pub(super) synchronizer: Arc<Synchronizer>,

    /// Stops background tasks
    pub(super) shutdown_tx: watch::Sender<bool>,

    /// Background task handles, joined on shutdown
    pub(super) tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DataLoader {
    /// Create a loader over explicit sources and local storage.
    ///
    /// The loader starts in `Created` state. Call [`start()`](Self::start)
    /// to restore persisted state and run background tasks.
    pub fn new(config: LoaderConfig, sources: Sources, store: Arc<dyn KeyValueStore>) -> Self {
        let (state_tx, state_rx) = watch::channel(LoaderState::Created);
        let (shutdown_tx, _) = watch::channel(false);

        let events = EventBus::new(config.event_capacity);
        let cache = Arc::new(CacheLayer::new(store.clone(), config.cache_ttl()));
        let queue = Arc::new(LocalWriteQueue::new(store));
        let health = Arc::new(HealthMonitor::new(
            sources.clone(),
            events.clone(),
            config.health_probe_timeout(),
            config.failure_threshold,
        ));
        let fetcher = Arc::new(FallbackFetcher::new(
            sources,
            cache.clone(),
            health.clone(),
            events.clone(),
            config.fetch_policy(),
        ));
        let synchronizer = Arc::new(Synchronizer::new(
            fetcher.clone(),
            queue.clone(),
            cache.clone(),
            events.clone(),
        ));

        Self {
            config,
            state: state_tx,
            state_rx,
            events,
            health,
            cache,
            queue,
            fetcher,
            synchronizer,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Build HTTP sources and local storage from `config`.
    ///
    /// Storage is a [`FileStore`] under `storage_dir`, or in-memory when no
    /// directory is configured.
    pub async fn from_config(config: LoaderConfig) -> Result<Self, LoaderError> {
        config.validate()?;

        // validate() guarantees a primary URL
        let primary_url = config.primary_url.clone().unwrap_or_default();
        let mut sources = Sources::new(Arc::new(HttpBackend::new(SourceKind::Primary, primary_url)?));
        if let Some(ref url) = config.secondary_url {
            sources = sources.with_secondary(Arc::new(HttpBackend::new(SourceKind::Secondary, url.clone())?));
        }
        if !config.static_bases.is_empty() {
            sources = sources.with_static_files(Arc::new(StaticSnapshotSource::new(config.static_bases.clone())?));
        }

        let store: Arc<dyn KeyValueStore> = match config.storage_dir {
            Some(ref dir) => Arc::new(FileStore::open(dir).await?),
            None => Arc::new(MemoryStore::new()),
        };

        info!(
            sources = %sources.chain().map(|s| s.describe()).collect::<Vec<_>>().join(" -> "),
            "Data loader configured"
        );
        Ok(Self::new(config, sources, store))
    }

    /// Get current loader state.
    #[must_use]
    pub fn state(&self) -> LoaderState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<LoaderState> {
        self.state_rx.clone()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state() == LoaderState::Running
    }

    #[must_use]
    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Subscribe to status events (connection changes, fallbacks, sync).
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.events.subscribe()
    }

    /// The health monitor, for on-demand checks.
    #[must_use]
    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// The local write queue, for inspecting unsynced writes.
    #[must_use]
    pub fn queue(&self) -> &Arc<LocalWriteQueue> {
        &self.queue
    }

    pub(super) fn set_state(&self, state: LoaderState) {
        crate::metrics::set_loader_state(&state.to_string());
        let _ = self.state.send(state);
    }

    pub(super) fn ensure_accepting(&self) -> Result<(), LoaderError> {
        let state = self.state();
        if state.accepts_requests() {
            Ok(())
        } else {
            Err(LoaderError::NotRunning(state))
        }
    }
}
