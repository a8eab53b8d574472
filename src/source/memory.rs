// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-process scriptable source.
//!
//! Serves payloads from memory and can be told to misbehave: go down, answer
//! garbage, return an HTTP status, hang, or fail the next N calls. Counts
//! every call so tests can assert how many requests actually went out.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use super::traits::{DataSource, ProbeOutcome, SourceError, SourceKind};
use crate::record::{Category, Payload, ShapeError};

/// How a [`MemorySource`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceMode {
    /// Serve stored payloads (404 for unknown categories)
    Healthy,
    /// Serve stored payloads but report degraded health
    Degraded,
    /// Connection refused
    Down,
    /// Answer with a non-array document
    Malformed,
    /// Answer with this HTTP status
    Status(u16),
    /// Never answer
    Hang,
}

pub struct MemorySource {
    kind: SourceKind,
    data: DashMap<Category, Payload>,
    mode: RwLock<SourceMode>,
    push_mode: RwLock<Option<SourceMode>>,
    delay: RwLock<Duration>,
    fail_next: AtomicU32,
    fetch_calls: AtomicU64,
    push_calls: AtomicU64,
    probe_calls: AtomicU64,
}

impl MemorySource {
    #[must_use]
    pub fn new(kind: SourceKind) -> Self {
        Self {
            kind,
            data: DashMap::new(),
            mode: RwLock::new(SourceMode::Healthy),
            push_mode: RwLock::new(None),
            delay: RwLock::new(Duration::ZERO),
            fail_next: AtomicU32::new(0),
            fetch_calls: AtomicU64::new(0),
            push_calls: AtomicU64::new(0),
            probe_calls: AtomicU64::new(0),
        }
    }

    /// Builder-style seed.
    #[must_use]
    pub fn with_payload(self, category: &Category, payload: Payload) -> Self {
        self.data.insert(category.clone(), payload);
        self
    }

    pub fn set_payload(&self, category: &Category, payload: Payload) {
        self.data.insert(category.clone(), payload);
    }

    #[must_use]
    pub fn payload(&self, category: &Category) -> Option<Payload> {
        self.data.get(category).map(|p| p.value().clone())
    }

    /// Mode for reads, probes and (unless overridden) writes.
    pub fn set_mode(&self, mode: SourceMode) {
        *self.mode.write() = mode;
    }

    #[must_use]
    pub fn mode(&self) -> SourceMode {
        *self.mode.read()
    }

    /// Override the mode for writes only; `None` follows [`Self::set_mode`].
    pub fn set_push_mode(&self, mode: Option<SourceMode>) {
        *self.push_mode.write() = mode;
    }

    /// Latency added to every call.
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.write() = delay;
    }

    /// Fail the next `n` fetch/push calls with a network error.
    pub fn fail_next(&self, n: u32) {
        self.fail_next.store(n, Ordering::SeqCst);
    }

    #[must_use]
    pub fn fetch_calls(&self) -> u64 {
        self.fetch_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn push_calls(&self) -> u64 {
        self.push_calls.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn probe_calls(&self) -> u64 {
        self.probe_calls.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let delay = *self.delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_injected_failure(&self) -> bool {
        self.fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn misbehave(&self, mode: SourceMode) -> Result<(), SourceError> {
        match mode {
            SourceMode::Healthy | SourceMode::Degraded => Ok(()),
            SourceMode::Down => Err(SourceError::Network("connection refused".into())),
            SourceMode::Malformed => Err(SourceError::Malformed(ShapeError::NotAnArray("object"))),
            SourceMode::Status(code) => Err(SourceError::Status(code)),
            SourceMode::Hang => {
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl DataSource for MemorySource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn describe(&self) -> String {
        format!("memory:{}", self.kind)
    }

    async fn fetch(&self, category: &Category) -> Result<Payload, SourceError> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.take_injected_failure() {
            return Err(SourceError::Network("injected failure".into()));
        }
        self.misbehave(self.mode()).await?;
        self.payload(category).ok_or(SourceError::Status(404))
    }

    async fn push(&self, category: &Category, payload: &Payload) -> Result<(), SourceError> {
        self.push_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        if self.take_injected_failure() {
            return Err(SourceError::Network("injected failure".into()));
        }
        let mode = (*self.push_mode.read()).unwrap_or_else(|| self.mode());
        self.misbehave(mode).await?;
        self.data.insert(category.clone(), payload.clone());
        Ok(())
    }

    async fn probe(&self) -> Result<ProbeOutcome, SourceError> {
        self.probe_calls.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let mode = self.mode();
        self.misbehave(mode).await?;
        if mode == SourceMode::Degraded {
            Ok(ProbeOutcome::Degraded)
        } else {
            Ok(ProbeOutcome::Healthy)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn coop() -> Category {
        Category::new("coop").unwrap()
    }

    #[tokio::test]
    async fn test_serves_seeded_payload() {
        let payload = Payload::from_value(json!([{"id": 7}])).unwrap();
        let source = MemorySource::new(SourceKind::Primary).with_payload(&coop(), payload.clone());

        assert_eq!(source.fetch(&coop()).await.unwrap(), payload);
        assert_eq!(source.fetch_calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_category_is_404() {
        let source = MemorySource::new(SourceKind::Primary);
        assert_eq!(source.fetch(&coop()).await, Err(SourceError::Status(404)));
    }

    #[tokio::test]
    async fn test_fail_next_counts_down() {
        let source = MemorySource::new(SourceKind::Primary)
            .with_payload(&coop(), Payload::empty());
        source.fail_next(2);

        assert!(source.fetch(&coop()).await.is_err());
        assert!(source.fetch(&coop()).await.is_err());
        assert!(source.fetch(&coop()).await.is_ok());
        assert_eq!(source.fetch_calls(), 3);
    }

    #[tokio::test]
    async fn test_push_mode_override() {
        let source = MemorySource::new(SourceKind::Primary);
        source.set_push_mode(Some(SourceMode::Down));

        let payload = Payload::from_value(json!([{"id": 1}])).unwrap();
        assert!(source.push(&coop(), &payload).await.is_err());
        assert!(source.payload(&coop()).is_none());

        source.set_push_mode(None);
        source.push(&coop(), &payload).await.unwrap();
        assert_eq!(source.payload(&coop()), Some(payload));
        assert_eq!(source.push_calls(), 2);
    }

    #[tokio::test]
    async fn test_probe_follows_mode() {
        let source = MemorySource::new(SourceKind::Secondary);
        assert_eq!(source.probe().await, Ok(ProbeOutcome::Healthy));

        source.set_mode(SourceMode::Degraded);
        assert_eq!(source.probe().await, Ok(ProbeOutcome::Degraded));

        source.set_mode(SourceMode::Down);
        assert!(source.probe().await.is_err());
        assert_eq!(source.probe_calls(), 3);
    }
}
