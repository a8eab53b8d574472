// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Configuration for the data loader.
//!
//! # Example
//!
//! ```
//! use catalog_sync::LoaderConfig;
//!
//! // Minimal config (uses defaults)
//! let config = LoaderConfig::default();
//! assert_eq!(config.network_timeout_ms, 9_000);
//! assert_eq!(config.cache_ttl_secs, 30 * 60);
//!
//! // From a JSON document, unspecified fields fall back to defaults
//! let config = LoaderConfig::from_json_str(r#"{
//!     "primary_url": "http://localhost:3000",
//!     "static_bases": ["http://localhost:8080/data"],
//!     "max_retries": 1
//! }"#).unwrap();
//! assert_eq!(config.max_retries, 1);
//! assert_eq!(config.failure_threshold, 3);
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::fetcher::FetchPolicy;
use crate::resilience::retry::RetryConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("config is not valid JSON: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Configuration for the data loader.
///
/// All fields have sensible defaults. At minimum, set `primary_url` when
/// building HTTP sources from config.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoaderConfig {
    /// Primary data API base URL (e.g., "http://localhost:3000")
    #[serde(default)]
    pub primary_url: Option<String>,

    /// Secondary data API base URL, same protocol as the primary
    #[serde(default)]
    pub secondary_url: Option<String>,

    /// Candidate base URLs for static `{category}.json` snapshots, tried in order
    #[serde(default)]
    pub static_bases: Vec<String>,

    /// Per-attempt timeouts
    #[serde(default = "default_network_timeout_ms")]
    pub network_timeout_ms: u64,
    #[serde(default = "default_static_timeout_ms")]
    pub static_timeout_ms: u64,
    #[serde(default = "default_health_probe_timeout_ms")]
    pub health_probe_timeout_ms: u64,

    /// Health probe timer period
    #[serde(default = "default_health_interval_secs")]
    pub health_interval_secs: u64,

    /// Retry budget per backend source
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    /// Consecutive observed failures before a source counts as disconnected
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Cache freshness
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Serve a fresh cache entry without touching the network
    #[serde(default)]
    pub cache_first: bool,

    /// Periodic sync of queued writes in seconds (0 = disabled)
    #[serde(default)]
    pub sync_poll_interval_secs: u64,

    /// Directory for durable local storage (None = in-memory only)
    #[serde(default)]
    pub storage_dir: Option<PathBuf>,

    /// Event broadcast buffer per subscriber
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_network_timeout_ms() -> u64 { 9_000 }
fn default_static_timeout_ms() -> u64 { 4_000 }
fn default_health_probe_timeout_ms() -> u64 { 4_000 }
fn default_health_interval_secs() -> u64 { 45 }
fn default_max_retries() -> usize { 2 }
fn default_retry_initial_delay_ms() -> u64 { 250 }
fn default_retry_max_delay_ms() -> u64 { 2_000 }
fn default_failure_threshold() -> u32 { 3 }
fn default_cache_ttl_secs() -> u64 { 30 * 60 } // 30 min
fn default_event_capacity() -> usize { 256 }

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            primary_url: None,
            secondary_url: None,
            static_bases: Vec::new(),
            network_timeout_ms: default_network_timeout_ms(),
            static_timeout_ms: default_static_timeout_ms(),
            health_probe_timeout_ms: default_health_probe_timeout_ms(),
            health_interval_secs: default_health_interval_secs(),
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            failure_threshold: default_failure_threshold(),
            cache_ttl_secs: default_cache_ttl_secs(),
            cache_first: false,
            sync_poll_interval_secs: 0,
            storage_dir: None,
            event_capacity: default_event_capacity(),
        }
    }
}

impl LoaderConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Check the config is usable for building HTTP sources.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(primary) = &self.primary_url else {
            return Err(ConfigError::Invalid("primary_url is required".into()));
        };
        check_url("primary_url", primary)?;
        if let Some(secondary) = &self.secondary_url {
            check_url("secondary_url", secondary)?;
        }
        for base in &self.static_bases {
            check_url("static_bases", base)?;
        }
        if self.network_timeout_ms == 0 || self.static_timeout_ms == 0 || self.health_probe_timeout_ms == 0 {
            return Err(ConfigError::Invalid("timeouts must be non-zero".into()));
        }
        if self.health_interval_secs == 0 {
            return Err(ConfigError::Invalid("health_interval_secs must be non-zero".into()));
        }
        if self.retry_initial_delay_ms > self.retry_max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry_initial_delay_ms must not exceed retry_max_delay_ms".into(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid("failure_threshold must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be at least 1".into()));
        }
        Ok(())
    }

    #[must_use]
    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health_probe_timeout_ms)
    }

    #[must_use]
    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    #[must_use]
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// `None` when polling is disabled.
    #[must_use]
    pub fn sync_poll_interval(&self) -> Option<Duration> {
        (self.sync_poll_interval_secs > 0).then(|| Duration::from_secs(self.sync_poll_interval_secs))
    }

    /// Retry budget for backend calls.
    #[must_use]
    pub fn network_retry(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.max_retries,
            initial_delay: Duration::from_millis(self.retry_initial_delay_ms),
            max_delay: Duration::from_millis(self.retry_max_delay_ms),
            factor: 2.0,
        }
    }

    #[must_use]
    pub fn fetch_policy(&self) -> FetchPolicy {
        FetchPolicy {
            network_timeout: Duration::from_millis(self.network_timeout_ms),
            static_timeout: Duration::from_millis(self.static_timeout_ms),
            network_retry: self.network_retry(),
            static_retry: RetryConfig::static_files(),
        }
    }
}

fn check_url(field: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{} must be an http(s) URL, got '{}'", field, url)))
    }
}
