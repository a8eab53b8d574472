// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Loader lifecycle: start and shutdown.

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::resilience::health::ConnectionStatus;
use crate::source::traits::SourceKind;

use super::{DataLoader, LoaderError, LoaderState};

impl DataLoader {
    /// Start the loader.
    ///
    /// Startup flow:
    /// 1. Warm the cache from local storage
    /// 2. Restore writes queued by a previous run
    /// 3. Subscribe the recovery listener (before any probe, so the first
    ///    `checking → connected` transition syncs restored writes)
    /// 4. Initial health check of every source
    /// 5. Spawn the health timer and, if configured, the sync poller
    ///
    /// Local storage failures degrade to an empty cache or queue; they never
    /// fail startup. Calling `start` on a running loader is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), LoaderError> {
        // Created -> Starting as one step, so only one caller runs startup
        let mut seen = LoaderState::Created;
        let claimed = self.state.send_if_modified(|state| {
            seen = *state;
            if *state == LoaderState::Created {
                *state = LoaderState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return match seen {
                LoaderState::Starting | LoaderState::Running => Ok(()),
                state => Err(LoaderError::NotRunning(state)),
            };
        }

        let startup_start = Instant::now();
        info!("Starting data loader...");
        crate::metrics::set_loader_state(&LoaderState::Starting.to_string());

        // ========== PHASE 1: Warm cache ==========
        let phase_start = Instant::now();
        match self.cache.warm().await {
            Ok(loaded) => info!(loaded, "Cache warmed"),
            Err(e) => warn!(error = %e, "Could not read cached data, starting cold"),
        }
        crate::metrics::record_startup_phase("warm_cache", phase_start.elapsed());

        // ========== PHASE 2: Restore write queue ==========
        let phase_start = Instant::now();
        match self.queue.restore().await {
            Ok(restored) => debug!(restored, "Write queue restored"),
            Err(e) => warn!(error = %e, "Could not read queued writes, starting with an empty queue"),
        }
        crate::metrics::record_startup_phase("restore_queue", phase_start.elapsed());

        // ========== PHASE 3: Recovery listener ==========
        let shutdown_rx = self.shutdown_tx.subscribe();
        let listener = self
            .synchronizer
            .clone()
            .spawn_recovery_listener(self.events.subscribe(), shutdown_rx.clone());

        // ========== PHASE 4: Initial health check ==========
        let phase_start = Instant::now();
        let report = self.health.check_health().await;
        info!(
            primary = %report.primary,
            secondary = ?report.secondary,
            static_files = ?report.static_files,
            "Initial health check"
        );
        crate::metrics::record_startup_phase("health_check", phase_start.elapsed());

        // ========== PHASE 5: Background tasks ==========
        let mut tasks = vec![listener];
        tasks.push(
            self.health
                .clone()
                .spawn(self.config.health_interval(), shutdown_rx.clone()),
        );
        if let Some(every) = self.config.sync_poll_interval() {
            info!(every = ?every, "Periodic sync enabled");
            tasks.push(self.synchronizer.clone().spawn_poller(every, shutdown_rx));
        }
        self.tasks.lock().extend(tasks);

        self.set_state(LoaderState::Running);
        crate::metrics::record_startup_phase("total", startup_start.elapsed());
        info!(
            pending = self.queue.total_pending(),
            cached = self.cache.len(),
            "Data loader running"
        );
        Ok(())
    }

    /// Stop background tasks and make a last attempt to flush queued
    /// writes. Anything that cannot be flushed stays in local storage for
    /// the next start.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) {
        if matches!(self.state(), LoaderState::ShuttingDown | LoaderState::Stopped) {
            return;
        }

        let shutdown_start = Instant::now();
        info!("Initiating data loader shutdown...");
        self.set_state(LoaderState::ShuttingDown);
        self.shutdown_tx.send_replace(true);

        let handles: Vec<_> = std::mem::take(&mut *self.tasks.lock());
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        // Best effort only: a disconnected primary would just burn the
        // retry budget for every category
        let pending = self.queue.total_pending();
        if pending > 0 {
            if self.health.status(SourceKind::Primary) == Some(ConnectionStatus::Disconnected) {
                warn!(pending, "Primary unreachable, queued writes kept for next start");
            } else {
                let summary = self.synchronizer.sync_all().await;
                info!(
                    merged = summary.merged_total(),
                    left = self.queue.total_pending(),
                    "Final sync on shutdown"
                );
            }
        }

        self.set_state(LoaderState::Stopped);
        crate::metrics::record_startup_phase("shutdown", shutdown_start.elapsed());
        info!("Data loader shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::LoaderConfig;
    use crate::coordinator::{DataLoader, LoaderError, LoaderState};
    use crate::resilience::health::ConnectionStatus;
    use crate::source::memory::{MemorySource, SourceMode};
    use crate::source::traits::SourceKind;
    use crate::source::Sources;
    use crate::storage::memory::MemoryStore;

    fn loader() -> (Arc<MemorySource>, DataLoader) {
        let primary = Arc::new(MemorySource::new(SourceKind::Primary));
        let config = LoaderConfig {
            network_timeout_ms: 200,
            health_probe_timeout_ms: 200,
            retry_initial_delay_ms: 1,
            retry_max_delay_ms: 5,
            ..Default::default()
        };
        let loader = DataLoader::new(config, Sources::new(primary.clone()), Arc::new(MemoryStore::new()));
        (primary, loader)
    }

    #[tokio::test]
    async fn test_start_and_shutdown_states() {
        let (_, loader) = loader();
        let mut states = loader.state_receiver();
        assert_eq!(loader.state(), LoaderState::Created);

        loader.start().await.unwrap();
        assert!(loader.is_running());
        assert_eq!(
            loader.health().status(SourceKind::Primary),
            Some(ConnectionStatus::Connected)
        );
        assert!(states.has_changed().unwrap());

        loader.shutdown().await;
        assert_eq!(*states.borrow_and_update(), LoaderState::Stopped);
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let (primary, loader) = loader();
        loader.start().await.unwrap();
        loader.start().await.unwrap();
        assert_eq!(primary.probe_calls(), 1);
        loader.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_starts_run_startup_once() {
        let (primary, loader) = loader();
        let loader = Arc::new(loader);

        let starts: Vec<_> = (0..8)
            .map(|_| {
                let loader = Arc::clone(&loader);
                tokio::spawn(async move { loader.start().await })
            })
            .collect();
        for start in starts {
            start.await.unwrap().unwrap();
        }

        // Health timer plus recovery listener, spawned by one caller only
        assert_eq!(loader.tasks.lock().len(), 2);
        assert_eq!(primary.probe_calls(), 1);
        loader.shutdown().await;
    }

    #[tokio::test]
    async fn test_stopped_loader_refuses_requests() {
        let (_, loader) = loader();
        loader.start().await.unwrap();
        loader.shutdown().await;

        assert!(matches!(
            loader.load_data("coop").await,
            Err(LoaderError::NotRunning(LoaderState::Stopped))
        ));
        assert!(matches!(
            loader.start().await,
            Err(LoaderError::NotRunning(LoaderState::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_start_with_primary_down_still_runs() {
        let (primary, loader) = loader();
        primary.set_mode(SourceMode::Down);

        loader.start().await.unwrap();
        assert!(loader.is_running());
        assert_eq!(
            loader.health().status(SourceKind::Primary),
            Some(ConnectionStatus::Disconnected)
        );
        loader.shutdown().await;
    }
}
