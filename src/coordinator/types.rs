// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the data loader facade.

use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::merge::ConflictError;
use crate::record::{Category, InvalidCategory, ShapeError};
use crate::resilience::health::HealthReport;
use crate::resilience::write_queue::QueueStats;
use crate::source::traits::{SourceError, SourceKind};
use crate::storage::traits::StorageError;

/// Loader lifecycle state.
///
/// Use [`super::DataLoader::state()`] to check the current state or
/// [`super::DataLoader::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LoaderState {
    /// Just created, background tasks not running
    Created,
    /// Warming cache, restoring queue, first health check
    Starting,
    /// Background tasks running
    Running,
    /// Final sync and task teardown in progress
    ShuttingDown,
    /// Shut down; loads and saves are refused
    Stopped,
}

impl LoaderState {
    /// Loads and saves are served in this state.
    #[must_use]
    pub fn accepts_requests(&self) -> bool {
        matches!(self, Self::Created | Self::Starting | Self::Running)
    }
}

impl std::fmt::Display for LoaderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Starting => write!(f, "Starting"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Result of [`super::DataLoader::save_data`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveOutcome {
    /// The write reached the backend or durable local storage
    pub success: bool,
    /// The write is waiting in the local queue
    pub used_fallback: bool,
}

/// Cache entry summary for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub category: Category,
    pub origin: SourceKind,
    pub records: usize,
    pub age_ms: i64,
    pub expired: bool,
}

/// Snapshot returned by [`super::DataLoader::get_status`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoaderStatus {
    pub state: LoaderState,
    pub health: HealthReport,
    pub cache: Vec<CacheStatus>,
    /// Queued writes per category
    pub pending: BTreeMap<Category, usize>,
    pub queue: QueueStats,
}

impl LoaderStatus {
    #[must_use]
    pub fn total_pending(&self) -> usize {
        self.pending.values().sum()
    }
}

/// Errors returned by the public loader API.
///
/// Missing data is never an error: loads fall back and report through
/// [`crate::LoadResult`] and events instead.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LoaderError {
    #[error(transparent)]
    InvalidCategory(#[from] InvalidCategory),

    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ShapeError),

    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("local storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Conflict(#[from] ConflictError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("loader is {0}")]
    NotRunning(LoaderState),
}
