// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Source health monitoring.
//!
//! The [`HealthMonitor`] owns the per-source [`ConnectionStatus`]. It probes
//! every configured source on a timer (and on demand), and also takes
//! opportunistic hints from the fetcher via [`HealthMonitor::observe`].
//! Status is a hint for everybody else: callers still attempt live calls.
//!
//! Transitions are published as [`LoaderEvent::ConnectionStatus`]; probing
//! the same status again publishes nothing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::{join_all, FutureExt};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::coalesce::InFlight;
use crate::events::{now_millis, EventBus, LoaderEvent};
use crate::source::traits::{ProbeOutcome, SourceKind};
use crate::source::Sources;

/// Connection status of one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Connected,
    /// Reachable but unhealthy, or failing below the disconnect threshold
    Degraded,
    Disconnected,
    /// Not probed yet
    Checking,
}

impl ConnectionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Degraded => "degraded",
            Self::Disconnected => "disconnected",
            Self::Checking => "checking",
        }
    }

    /// Gauge value for metrics (1 = connected ... 0 = disconnected).
    fn gauge(&self) -> f64 {
        match self {
            Self::Connected => 1.0,
            Self::Degraded => 0.5,
            Self::Disconnected | Self::Checking => 0.0,
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of every configured source. Unconfigured sources are `None`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub primary: ConnectionStatus,
    pub secondary: Option<ConnectionStatus>,
    pub static_files: Option<ConnectionStatus>,
    pub checked_at: i64,
}

/// Per-source bookkeeping, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceHealth {
    pub status: ConnectionStatus,
    pub consecutive_failures: u32,
    pub last_change: i64,
    pub last_probe: Option<i64>,
    pub last_latency_ms: Option<u64>,
}

impl SourceHealth {
    fn new() -> Self {
        Self {
            status: ConnectionStatus::Checking,
            consecutive_failures: 0,
            last_change: now_millis(),
            last_probe: None,
            last_latency_ms: None,
        }
    }
}

pub struct HealthMonitor {
    sources: Sources,
    state: RwLock<HashMap<SourceKind, SourceHealth>>,
    probes: InFlight<SourceKind, ConnectionStatus>,
    events: EventBus,
    probe_timeout: Duration,
    failure_threshold: u32,
}

impl HealthMonitor {
    pub fn new(
        sources: Sources,
        events: EventBus,
        probe_timeout: Duration,
        failure_threshold: u32,
    ) -> Self {
        let state = sources
            .chain()
            .map(|s| (s.kind(), SourceHealth::new()))
            .collect();
        Self {
            sources,
            state: RwLock::new(state),
            probes: InFlight::new(),
            events,
            probe_timeout,
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// Last known status, `None` for an unconfigured source.
    #[must_use]
    pub fn status(&self, kind: SourceKind) -> Option<ConnectionStatus> {
        self.state.read().get(&kind).map(|h| h.status)
    }

    #[must_use]
    pub fn source_health(&self, kind: SourceKind) -> Option<SourceHealth> {
        self.state.read().get(&kind).cloned()
    }

    /// Cached report, no I/O.
    #[must_use]
    pub fn snapshot(&self) -> HealthReport {
        HealthReport {
            primary: self
                .status(SourceKind::Primary)
                .unwrap_or(ConnectionStatus::Checking),
            secondary: self.status(SourceKind::Secondary),
            static_files: self.status(SourceKind::Static),
            checked_at: now_millis(),
        }
    }

    /// Probe every configured source concurrently.
    pub async fn check_health(self: &Arc<Self>) -> HealthReport {
        let kinds: Vec<SourceKind> = self.sources.chain().map(|s| s.kind()).collect();
        join_all(kinds.into_iter().map(|kind| self.probe(kind))).await;
        self.snapshot()
    }

    /// Probe one source. Overlapping probes of the same source share one
    /// request. Returns `None` for an unconfigured source.
    pub async fn probe(self: &Arc<Self>, kind: SourceKind) -> Option<ConnectionStatus> {
        self.sources.get(kind)?;
        let this = Arc::clone(self);
        let status = self
            .probes
            .run(kind, move || async move { this.run_probe(kind).await }.boxed())
            .await;
        Some(status)
    }

    async fn run_probe(&self, kind: SourceKind) -> ConnectionStatus {
        let Some(source) = self.sources.get(kind) else {
            return ConnectionStatus::Disconnected;
        };

        let start = Instant::now();
        let outcome = tokio::time::timeout(self.probe_timeout, source.probe()).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (status, failed) = match outcome {
            Ok(Ok(ProbeOutcome::Healthy)) => (ConnectionStatus::Connected, false),
            Ok(Ok(ProbeOutcome::Degraded)) => (ConnectionStatus::Degraded, false),
            Ok(Err(e)) => {
                debug!(source = %kind, error = %e, "Health probe failed");
                (ConnectionStatus::Disconnected, true)
            }
            Err(_) => {
                debug!(source = %kind, timeout = ?self.probe_timeout, "Health probe timed out");
                crate::metrics::record_timeout(kind.as_str(), "probe");
                (ConnectionStatus::Disconnected, true)
            }
        };

        crate::metrics::record_probe(kind.as_str(), status.as_str(), Duration::from_millis(latency_ms));
        self.apply(kind, |health| {
            health.last_probe = Some(now_millis());
            health.last_latency_ms = (!failed).then_some(latency_ms);
            if failed {
                health.consecutive_failures = health.consecutive_failures.saturating_add(1);
            } else {
                health.consecutive_failures = 0;
            }
            status
        });
        status
    }

    /// Opportunistic signal from a live call. Success marks the source
    /// connected; failures degrade it, and `failure_threshold` consecutive
    /// failures disconnect it.
    pub fn observe(&self, kind: SourceKind, ok: bool) {
        let threshold = self.failure_threshold;
        self.apply(kind, |h| {
            if ok {
                h.consecutive_failures = 0;
                return ConnectionStatus::Connected;
            }
            h.consecutive_failures = h.consecutive_failures.saturating_add(1);
            if h.consecutive_failures >= threshold || h.status == ConnectionStatus::Disconnected {
                ConnectionStatus::Disconnected
            } else {
                ConnectionStatus::Degraded
            }
        });
    }

    /// Update a source's record under the write lock and publish the
    /// transition, if any. `update` returns the new status.
    fn apply(&self, kind: SourceKind, update: impl FnOnce(&mut SourceHealth) -> ConnectionStatus) {
        let (old, status) = {
            let mut state = self.state.write();
            let Some(health) = state.get_mut(&kind) else {
                return;
            };
            let status = update(health);
            let old = health.status;
            if old != status {
                health.status = status;
                health.last_change = now_millis();
            }
            (old, status)
        };

        if old == status {
            return;
        }

        crate::metrics::set_source_status(kind.as_str(), status.gauge());
        match status {
            ConnectionStatus::Connected => info!(source = %kind, from = %old, "Source connected"),
            ConnectionStatus::Disconnected => warn!(source = %kind, from = %old, "Source disconnected"),
            _ => info!(source = %kind, from = %old, to = %status, "Source status changed"),
        }
        self.events.publish(LoaderEvent::connection_status(kind, old, status));
    }

    /// Spawn the periodic probe loop. The first tick is skipped; callers run
    /// an initial [`check_health`](Self::check_health) themselves.
    pub fn spawn(self: Arc<Self>, every: Duration, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.check_health().await;
                        debug!(primary = %report.primary, "Periodic health check");
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!("Health monitor stopped");
        })
    }
}
