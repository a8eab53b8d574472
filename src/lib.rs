// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Catalog Sync
//!
//! A resilient loader for category datasets that keeps working while its
//! backends come and go.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    DataLoader (facade)                      │
//! │  • load_data / save_data / get_status                       │
//! │  • start / shutdown / force_sync / clear_local_data         │
//! └─────────────────────────────────────────────────────────────┘
//!          │ loads                               │ saves
//!          ▼                                     ▼
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │     Fallback Fetcher     │      │   Primary backend, or    │
//! │  primary → secondary →   │      │   Local Write Queue      │
//! │  static → cache (stale)  │      │   when unreachable       │
//! └──────────────────────────┘      └──────────────────────────┘
//!          │                                     │
//!          ▼                                     ▼
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │       Cache Layer        │      │      Synchronizer        │
//! │  TTL, mirrored to local  │◄─────│  merge (per-record LWW)  │
//! │  storage                 │      │  + flush on recovery     │
//! └──────────────────────────┘      └──────────────────────────┘
//!                                                ▲
//!                                  primary reconnected
//!                                                │
//!                                   ┌──────────────────────────┐
//!                                   │      Health Monitor      │
//!                                   │  timed probes + events   │
//!                                   └──────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use catalog_sync::{DataLoader, LoaderConfig, LoaderEvent};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), catalog_sync::LoaderError> {
//!     let config = LoaderConfig {
//!         primary_url: Some("http://localhost:3000".into()),
//!         static_bases: vec!["http://localhost:8080/data".into()],
//!         storage_dir: Some("./catalog-data".into()),
//!         ..Default::default()
//!     };
//!
//!     let loader = DataLoader::from_config(config).await?;
//!     let mut events = loader.subscribe();
//!     loader.start().await?;
//!
//!     // Never fails for missing data: falls back, then serves stale
//!     let coop = loader.load_data("coop").await?;
//!     println!("{} records from {:?}", coop.payload.len(), coop.origin);
//!
//!     // Queued locally if the backend is down, synced on recovery
//!     let saved = loader.save_value("coop", json!([{"id": 1, "name": "hen"}])).await?;
//!     if saved.used_fallback {
//!         println!("saved locally");
//!     }
//!
//!     while let Ok(event) = events.try_recv() {
//!         if let LoaderEvent::ConnectionStatus { source, status, .. } = event {
//!             println!("{source} is {status}");
//!         }
//!     }
//!
//!     loader.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - **Fallback Chain**: primary → secondary → static snapshot → cache
//! - **Bounded Retries**: capped exponential backoff, transient errors only
//! - **Offline Writes**: durable local queue with drain/swap flushing
//! - **Per-record Merge**: last-write-wins by record timestamp
//! - **Health Events**: connection status broadcast to any subscriber
//! - **Request Coalescing**: concurrent loads and probes share one call
//!
//! ## Configuration
//!
//! See [`LoaderConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`DataLoader`] facade
//! - [`fetcher`]: Fallback chain and load results
//! - [`sync`] / [`merge`]: Flushing queued writes
//! - [`cache`]: Last-known-good payloads
//! - [`resilience`]: Retry, coalescing, health, write queue
//! - [`source`]: Data sources (HTTP backends, static files, in-memory)
//! - [`storage`]: Local durable key-value storage

pub mod config;
pub mod record;
pub mod events;
pub mod storage;
pub mod source;
pub mod resilience;
pub mod cache;
pub mod merge;
pub mod fetcher;
pub mod sync;
pub mod coordinator;
pub mod metrics;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use config::{ConfigError, LoaderConfig};
pub use coordinator::{CacheStatus, DataLoader, LoaderError, LoaderState, LoaderStatus, SaveOutcome};
pub use record::{Category, InvalidCategory, Payload, Record, RecordId, ShapeError};
pub use events::{EventBus, LoaderEvent};
pub use source::Sources;
pub use source::traits::{DataSource, ProbeOutcome, SourceError, SourceKind};
pub use storage::traits::{KeyValueStore, StorageError};
pub use cache::{CacheEntry, CacheLayer};
pub use merge::{merge, ConflictError, MergeOutcome};
pub use fetcher::{FallbackFetcher, FetchPolicy, LoadResult};
pub use sync::{Synchronizer, SyncOutcome, SyncSummary};
pub use resilience::health::{ConnectionStatus, HealthMonitor, HealthReport};
pub use resilience::write_queue::{LocalWriteQueue, QueueStats, QueuedWrite};
pub use resilience::retry::RetryConfig;
pub use metrics::LatencyTimer;
