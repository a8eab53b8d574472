// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::record::{Category, Payload, ShapeError};
use crate::resilience::retry::Transient;

/// Where a payload came from, in fallback priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Database-backed API, the ground truth
    Primary,
    /// Backup API, read-only
    Secondary,
    /// Static snapshot files
    Static,
    /// Local cache (last resort)
    Cache,
    /// Optimistic local write not yet on the backend
    Local,
}

impl SourceKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Static => "static",
            Self::Cache => "cache",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of a single attempt against a single source.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// Connection refused, DNS, reset...
    #[error("network error: {0}")]
    Network(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected HTTP status {0}")]
    Status(u16),
    #[error("malformed response: {0}")]
    Malformed(#[from] ShapeError),
    #[error("source does not accept writes")]
    ReadOnly,
}

impl SourceError {
    /// Short label for metrics.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Timeout(_) => "timeout",
            Self::Status(_) => "status",
            Self::Malformed(_) => "malformed",
            Self::ReadOnly => "read_only",
        }
    }

    /// Network-level failure, as opposed to a protocol-level one where the
    /// source answered but the answer was unusable.
    #[must_use]
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout(_))
    }
}

impl Transient for SourceError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) | Self::Timeout(_) => true,
            Self::Status(code) => *code >= 500 || *code == 408 || *code == 429,
            Self::Malformed(_) | Self::ReadOnly => false,
        }
    }
}

/// Result of a successful health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Healthy,
    /// Reachable but reporting a problem (e.g. database down behind the API)
    Degraded,
}

/// A place category payloads can be read from (and maybe written to).
#[async_trait]
pub trait DataSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Human-readable location for logs (base URL, "memory", ...).
    fn describe(&self) -> String;

    /// Read one category. Implementations validate the payload shape and
    /// report anything else as [`SourceError::Malformed`].
    async fn fetch(&self, category: &Category) -> Result<Payload, SourceError>;

    /// Replace one category. Read-only sources keep the default.
    async fn push(&self, category: &Category, payload: &Payload) -> Result<(), SourceError> {
        let _ = (category, payload);
        Err(SourceError::ReadOnly)
    }

    /// Lightweight liveness check.
    async fn probe(&self) -> Result<ProbeOutcome, SourceError>;
}
