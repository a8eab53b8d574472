// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote data sources.
//!
//! - [`traits::DataSource`]: fetch / push / probe contract
//! - [`http::HttpBackend`]: primary and secondary data APIs
//! - [`http::StaticSnapshotSource`]: read-only `{category}.json` snapshots
//! - [`memory::MemorySource`]: scriptable in-process source

pub mod traits;
pub mod http;
pub mod memory;

use std::sync::Arc;

use traits::{DataSource, SourceKind};

/// The configured live sources, in fallback order.
#[derive(Clone)]
pub struct Sources {
    pub primary: Arc<dyn DataSource>,
    pub secondary: Option<Arc<dyn DataSource>>,
    pub static_files: Option<Arc<dyn DataSource>>,
}

impl Sources {
    #[must_use]
    pub fn new(primary: Arc<dyn DataSource>) -> Self {
        Self {
            primary,
            secondary: None,
            static_files: None,
        }
    }

    #[must_use]
    pub fn with_secondary(mut self, source: Arc<dyn DataSource>) -> Self {
        self.secondary = Some(source);
        self
    }

    #[must_use]
    pub fn with_static_files(mut self, source: Arc<dyn DataSource>) -> Self {
        self.static_files = Some(source);
        self
    }

    /// Live sources in priority order: primary, secondary, static.
    pub fn chain(&self) -> impl Iterator<Item = &Arc<dyn DataSource>> {
        std::iter::once(&self.primary)
            .chain(self.secondary.iter())
            .chain(self.static_files.iter())
    }

    #[must_use]
    pub fn get(&self, kind: SourceKind) -> Option<&Arc<dyn DataSource>> {
        match kind {
            SourceKind::Primary => Some(&self.primary),
            SourceKind::Secondary => self.secondary.as_ref(),
            SourceKind::Static => self.static_files.as_ref(),
            SourceKind::Cache | SourceKind::Local => None,
        }
    }
}
