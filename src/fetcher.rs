// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Fallback data fetcher.
//!
//! Walks the source chain for one category until something answers:
//!
//! ```text
//! primary ──► secondary ──► static snapshot ──► cache (any age)
//!   │            │               │                  │
//!   └─ timeout + bounded retry per source ──────────┘
//! ```
//!
//! A load never fails because data is missing. When every live source is
//! down the last cached copy is served as stale, and when there is no cached
//! copy either the result is an empty payload with no origin. The caller
//! learns what happened from [`LoadResult`] and from the published events.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::FutureExt;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::CacheLayer;
use crate::events::{now_millis, EventBus, LoaderEvent};
use crate::metrics::LatencyTimer;
use crate::record::{Category, Payload};
use crate::resilience::coalesce::InFlight;
use crate::resilience::health::HealthMonitor;
use crate::resilience::retry::{retry, RetryConfig, Transient};
use crate::source::traits::{DataSource, SourceError, SourceKind};
use crate::source::Sources;

/// What a load produced and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadResult {
    pub category: Category,
    pub payload: Payload,
    /// `None` when nothing could be loaded at all
    pub origin: Option<SourceKind>,
    /// Served from an old cache entry, or nothing to serve
    pub stale: bool,
    /// Age of the cached payload, when served from cache
    pub age_ms: Option<i64>,
    /// Live calls made, retries included
    pub attempts: u32,
}

impl LoadResult {
    /// Data came from somewhere other than the primary backend.
    #[must_use]
    pub fn used_fallback(&self) -> bool {
        self.origin != Some(SourceKind::Primary)
    }

    #[must_use]
    pub fn is_empty_fallback(&self) -> bool {
        self.origin.is_none()
    }
}

/// Timeouts and retry budgets per kind of source.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchPolicy {
    pub network_timeout: Duration,
    pub static_timeout: Duration,
    pub network_retry: RetryConfig,
    pub static_retry: RetryConfig,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            network_timeout: Duration::from_secs(9),
            static_timeout: Duration::from_secs(4),
            network_retry: RetryConfig::network(),
            static_retry: RetryConfig::static_files(),
        }
    }
}

impl FetchPolicy {
    fn for_kind(&self, kind: SourceKind) -> (Duration, &RetryConfig) {
        match kind {
            SourceKind::Static => (self.static_timeout, &self.static_retry),
            _ => (self.network_timeout, &self.network_retry),
        }
    }
}

/// Bound `fut` by `limit`, turning an elapsed timer into `SourceError::Timeout`.
pub(crate) async fn timed<T, F>(
    limit: Duration,
    kind: SourceKind,
    operation: &'static str,
    fut: F,
) -> Result<T, SourceError>
where
    F: Future<Output = Result<T, SourceError>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => {
            crate::metrics::record_timeout(kind.as_str(), operation);
            Err(SourceError::Timeout(limit))
        }
    }
}

pub struct FallbackFetcher {
    sources: Sources,
    cache: Arc<CacheLayer>,
    health: Arc<HealthMonitor>,
    events: EventBus,
    policy: FetchPolicy,
    in_flight: InFlight<Category, LoadResult>,
}

impl FallbackFetcher {
    pub fn new(
        sources: Sources,
        cache: Arc<CacheLayer>,
        health: Arc<HealthMonitor>,
        events: EventBus,
        policy: FetchPolicy,
    ) -> Self {
        Self {
            sources,
            cache,
            health,
            events,
            policy,
            in_flight: InFlight::new(),
        }
    }

    #[must_use]
    pub fn policy(&self) -> &FetchPolicy {
        &self.policy
    }

    /// Load `category` through the chain. Concurrent loads of the same
    /// category share one walk and get the same result.
    pub async fn fetch(self: &Arc<Self>, category: &Category) -> LoadResult {
        let this = Arc::clone(self);
        let key = category.clone();
        self.in_flight
            .run(category.clone(), move || async move { this.walk_chain(&key).await }.boxed())
            .await
    }

    async fn walk_chain(&self, category: &Category) -> LoadResult {
        let mut attempts = 0;

        for source in self.sources.chain() {
            let kind = source.kind();
            match self.attempt(source, category, &mut attempts).await {
                Ok(payload) => {
                    self.cache.put(category, payload.clone(), kind).await;
                    crate::metrics::record_load(kind.as_str(), false);

                    if kind != SourceKind::Primary {
                        info!(category = %category, source = %kind, "Using backup data");
                        crate::metrics::record_fallback(kind.as_str());
                        self.events.publish(LoaderEvent::UsingFallback {
                            category: category.clone(),
                            source: kind,
                            timestamp: now_millis(),
                        });
                    }

                    return LoadResult {
                        category: category.clone(),
                        payload,
                        origin: Some(kind),
                        stale: false,
                        age_ms: None,
                        attempts,
                    };
                }
                Err(e) => {
                    warn!(category = %category, source = %kind, error = %e, "Source failed, falling back");
                }
            }
        }

        if let Some(entry) = self.cache.get(category) {
            let age_ms = entry.age_ms();
            warn!(category = %category, age_ms, cached_from = %entry.origin, "All sources failed, serving cached copy");
            crate::metrics::record_load(SourceKind::Cache.as_str(), true);
            self.events.publish(LoaderEvent::ServingStale {
                category: category.clone(),
                age_ms,
                timestamp: now_millis(),
            });
            return LoadResult {
                category: category.clone(),
                payload: entry.payload,
                origin: Some(SourceKind::Cache),
                stale: true,
                age_ms: Some(age_ms),
                attempts,
            };
        }

        warn!(category = %category, attempts, "All sources failed and nothing cached");
        crate::metrics::record_all_sources_failed();
        self.events.publish(LoaderEvent::AllSourcesFailed {
            category: category.clone(),
            timestamp: now_millis(),
        });
        LoadResult {
            category: category.clone(),
            payload: Payload::empty(),
            origin: None,
            stale: true,
            age_ms: None,
            attempts,
        }
    }

    /// Read `category` from the primary only, bypassing the cache.
    pub async fn fetch_primary(&self, category: &Category) -> Result<Payload, SourceError> {
        let mut attempts = 0;
        self.attempt(&self.sources.primary, category, &mut attempts).await
    }

    /// Write `payload` to the primary as one request, with timeout and retry.
    pub async fn push_primary(&self, category: &Category, payload: &Payload) -> Result<(), SourceError> {
        let source = &self.sources.primary;
        let kind = source.kind();
        let (limit, retry_config) = self.policy.for_kind(kind);
        let _timer = LatencyTimer::new(kind.as_str(), "push");

        let result = retry(&format!("push {}", category), retry_config, || async move {
            let result = timed(limit, kind, "push", source.push(category, payload)).await;
            self.report(kind, "push", &result);
            result
        })
        .await;

        if result.is_ok() {
            debug!(category = %category, records = payload.len(), "Pushed to primary");
        }
        result
    }

    /// One source, with timeout and retries. Counts every live call.
    async fn attempt(
        &self,
        source: &Arc<dyn DataSource>,
        category: &Category,
        attempts: &mut u32,
    ) -> Result<Payload, SourceError> {
        let kind = source.kind();
        let (limit, retry_config) = self.policy.for_kind(kind);
        let _timer = LatencyTimer::new(kind.as_str(), "fetch");

        let result = retry(&format!("fetch {} from {}", category, kind), retry_config, || {
            *attempts += 1;
            async move {
                let result = timed(limit, kind, "fetch", source.fetch(category)).await;
                self.report(kind, "fetch", &result);
                result
            }
        })
        .await;

        if let Ok(ref payload) = result {
            crate::metrics::record_payload_records(kind.as_str(), payload.len());
        }
        result
    }

    /// Metrics plus the opportunistic health signal for one live call.
    /// Non-transient errors say nothing about reachability.
    fn report<T>(&self, kind: SourceKind, operation: &str, result: &Result<T, SourceError>) {
        match result {
            Ok(_) => {
                crate::metrics::record_operation(kind.as_str(), operation, "success");
                self.health.observe(kind, true);
            }
            Err(e) => {
                crate::metrics::record_operation(kind.as_str(), operation, "error");
                crate::metrics::record_error(kind.as_str(), operation, e.label());
                if e.is_transient() {
                    self.health.observe(kind, false);
                }
            }
        }
    }
}
