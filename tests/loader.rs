// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Loader behaviour against scriptable in-memory sources.
//!
//! Every source is a `MemorySource` whose failure mode, latency and call
//! counters are controlled by the test, so each fallback path is hit
//! deterministically.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use catalog_sync::source::memory::{MemorySource, SourceMode};
use catalog_sync::storage::memory::MemoryStore;
use catalog_sync::{
    Category, ConnectionStatus, DataLoader, LoaderConfig, LoaderEvent, Payload, SourceKind, Sources,
};

// =============================================================================
// Fixture
// =============================================================================

struct Harness {
    primary: Arc<MemorySource>,
    secondary: Arc<MemorySource>,
    static_files: Arc<MemorySource>,
    loader: DataLoader,
}

fn fast_config() -> LoaderConfig {
    LoaderConfig {
        network_timeout_ms: 200,
        static_timeout_ms: 200,
        health_probe_timeout_ms: 200,
        retry_initial_delay_ms: 1,
        retry_max_delay_ms: 5,
        ..Default::default()
    }
}

fn harness() -> Harness {
    let primary = Arc::new(MemorySource::new(SourceKind::Primary));
    let secondary = Arc::new(MemorySource::new(SourceKind::Secondary));
    let static_files = Arc::new(MemorySource::new(SourceKind::Static));
    let sources = Sources::new(primary.clone())
        .with_secondary(secondary.clone())
        .with_static_files(static_files.clone());
    let loader = DataLoader::new(fast_config(), sources, Arc::new(MemoryStore::new()));
    Harness { primary, secondary, static_files, loader }
}

fn category(name: &str) -> Category {
    Category::new(name).unwrap()
}

fn payload(value: Value) -> Payload {
    Payload::from_value(value).unwrap()
}

fn drain(rx: &mut broadcast::Receiver<LoaderEvent>) -> Vec<LoaderEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

// =============================================================================
// Fallback chain
// =============================================================================

#[tokio::test]
async fn test_primary_down_serves_secondary() {
    let h = harness();
    h.primary.set_mode(SourceMode::Down);
    h.secondary.set_payload(&category("coop"), payload(json!([{"id": 1, "from": "secondary"}])));
    let mut rx = h.loader.subscribe();

    let result = h.loader.load_data("coop").await.unwrap();
    assert_eq!(result.origin, Some(SourceKind::Secondary));
    assert_eq!(result.payload, payload(json!([{"id": 1, "from": "secondary"}])));
    assert!(!result.stale);
    assert!(result.used_fallback());

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        LoaderEvent::UsingFallback { source: SourceKind::Secondary, .. }
    )));
}

#[tokio::test]
async fn test_backends_down_serves_static_snapshot() {
    let h = harness();
    h.primary.set_mode(SourceMode::Status(503));
    h.secondary.set_mode(SourceMode::Down);
    h.static_files.set_payload(&category("solo"), payload(json!([{"id": "s1"}])));

    let result = h.loader.load_data("solo").await.unwrap();
    assert_eq!(result.origin, Some(SourceKind::Static));
    assert_eq!(result.payload.len(), 1);
    // 503 is transient: first attempt plus two retries
    assert_eq!(h.primary.fetch_calls(), 3);
}

#[tokio::test]
async fn test_cache_is_last_resort() {
    let h = harness();
    h.primary.set_payload(&category("coop"), payload(json!([{"id": 1, "name": "hen"}])));
    let first = h.loader.load_data("coop").await.unwrap();
    assert_eq!(first.origin, Some(SourceKind::Primary));

    h.primary.set_mode(SourceMode::Down);
    h.secondary.set_mode(SourceMode::Down);
    h.static_files.set_mode(SourceMode::Down);
    let mut rx = h.loader.subscribe();

    let second = h.loader.load_data("coop").await.unwrap();
    assert_eq!(second.payload, first.payload);
    assert_eq!(second.origin, Some(SourceKind::Cache));
    assert!(second.stale);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, LoaderEvent::ServingStale { .. })));
}

#[tokio::test]
async fn test_nothing_anywhere_is_empty_not_error() {
    let h = harness();
    h.primary.set_mode(SourceMode::Down);
    h.secondary.set_mode(SourceMode::Down);
    h.static_files.set_mode(SourceMode::Down);

    let result = h.loader.load_data("coop").await.unwrap();
    assert!(result.payload.is_empty());
    assert!(result.stale);
    assert!(result.is_empty_fallback());
}

#[tokio::test]
async fn test_empty_array_stops_the_chain() {
    let h = harness();
    h.primary.set_payload(&category("coop"), Payload::empty());
    h.secondary.set_payload(&category("coop"), payload(json!([{"id": 1}])));

    let result = h.loader.load_data("coop").await.unwrap();
    assert_eq!(result.origin, Some(SourceKind::Primary));
    assert!(result.payload.is_empty());
    assert_eq!(h.secondary.fetch_calls(), 0);
}

#[tokio::test]
async fn test_malformed_response_falls_through() {
    let h = harness();
    h.primary.set_mode(SourceMode::Malformed);
    h.secondary.set_payload(&category("coop"), payload(json!([{"id": 2}])));

    let result = h.loader.load_data("coop").await.unwrap();
    assert_eq!(result.origin, Some(SourceKind::Secondary));
    // Malformed is permanent for this call: no retries
    assert_eq!(h.primary.fetch_calls(), 1);
}

#[tokio::test]
async fn test_hanging_primary_is_bounded_by_timeout() {
    let h = harness();
    h.primary.set_mode(SourceMode::Hang);
    h.secondary.set_payload(&category("coop"), payload(json!([{"id": 1}])));

    let result = tokio::time::timeout(Duration::from_secs(5), h.loader.load_data("coop"))
        .await
        .expect("load must not hang")
        .unwrap();
    assert_eq!(result.origin, Some(SourceKind::Secondary));
}

// =============================================================================
// Coalescing
// =============================================================================

#[tokio::test]
async fn test_concurrent_loads_make_one_request() {
    let h = harness();
    h.primary.set_payload(&category("x"), payload(json!([{"id": 1}])));
    h.primary.set_delay(Duration::from_millis(50));

    let (a, b) = tokio::join!(h.loader.load_data("x"), h.loader.load_data("x"));
    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(h.primary.fetch_calls(), 1);
}

#[tokio::test]
async fn test_different_categories_are_not_coalesced() {
    let h = harness();
    h.primary.set_payload(&category("a"), payload(json!([{"id": 1}])));
    h.primary.set_payload(&category("b"), payload(json!([{"id": 2}])));
    h.primary.set_delay(Duration::from_millis(20));

    let (a, b) = tokio::join!(h.loader.load_data("a"), h.loader.load_data("b"));
    assert_ne!(a.unwrap().payload, b.unwrap().payload);
    assert_eq!(h.primary.fetch_calls(), 2);
}

// =============================================================================
// Health events
// =============================================================================

#[tokio::test]
async fn test_connection_events_on_transition_only() {
    let h = harness();
    let mut rx = h.loader.subscribe();

    h.loader.health().check_health().await;
    h.loader.health().check_health().await;

    let primary_events: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter(|e| matches!(e, LoaderEvent::ConnectionStatus { source: SourceKind::Primary, .. }))
        .collect();
    assert_eq!(primary_events.len(), 1);

    h.primary.set_mode(SourceMode::Down);
    h.loader.health().check_health().await;
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        LoaderEvent::ConnectionStatus {
            source: SourceKind::Primary,
            old_status: ConnectionStatus::Connected,
            new_status: ConnectionStatus::Disconnected,
            ..
        }
    )));
}

#[tokio::test]
async fn test_status_reports_sources_cache_and_queue() {
    let h = harness();
    h.primary.set_mode(SourceMode::Down);
    h.loader.start().await.unwrap();

    h.loader
        .save_value("coop", json!([{"id": 1, "name": "hen"}]))
        .await
        .unwrap();

    let status = h.loader.get_status();
    assert_eq!(status.health.primary, ConnectionStatus::Disconnected);
    assert_eq!(status.health.secondary, Some(ConnectionStatus::Connected));
    assert_eq!(status.pending.get(&category("coop")), Some(&1));
    assert_eq!(status.cache.len(), 1);
    assert_eq!(status.queue.total_enqueued, 1);

    h.loader.shutdown().await;
}

// =============================================================================
// End-to-end
// =============================================================================

#[tokio::test]
async fn test_coop_static_snapshot_then_stale() {
    let h = harness();
    h.primary.set_mode(SourceMode::Down);
    h.secondary.set_mode(SourceMode::Down);
    let raid_night = payload(json!([{"id": 7, "title": "Raid Night"}]));
    h.static_files.set_payload(&category("coop"), raid_night.clone());

    let first = h.loader.load_data("coop").await.unwrap();
    assert_eq!(first.payload, raid_night);
    assert_eq!(first.origin, Some(SourceKind::Static));

    let status = h.loader.get_status();
    assert_eq!(status.cache[0].category, category("coop"));
    assert_eq!(status.cache[0].origin, SourceKind::Static);

    h.static_files.set_mode(SourceMode::Down);
    let second = h.loader.load_data("coop").await.unwrap();
    assert_eq!(second.payload, raid_night);
    assert!(second.stale);
}

#[tokio::test]
async fn test_offline_save_synced_on_reconnect() {
    let h = harness();
    h.primary.set_mode(SourceMode::Down);
    h.loader.start().await.unwrap();
    let mut rx = h.loader.subscribe();

    let saved = h
        .loader
        .save_value("coop", json!([{"id": 1, "name": "hen"}]))
        .await
        .unwrap();
    assert!(saved.success);
    assert!(saved.used_fallback);

    // Local write is visible right away
    let local = h.loader.load_data("coop").await.unwrap();
    assert_eq!(local.payload.len(), 1);

    h.primary.set_mode(SourceMode::Healthy);
    h.loader.health().check_health().await;

    let merged = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(LoaderEvent::SyncCompleted { merged_count, .. }) = rx.recv().await {
                return merged_count;
            }
        }
    })
    .await
    .expect("sync after reconnect");
    assert_eq!(merged, 1);
    assert_eq!(
        h.primary.payload(&category("coop")),
        Some(payload(json!([{"id": 1, "name": "hen"}])))
    );
    assert_eq!(h.loader.get_status().total_pending(), 0);

    h.loader.shutdown().await;
}

#[tokio::test]
async fn test_save_during_recovery_sync_reaches_primary() {
    let h = harness();
    h.primary.set_mode(SourceMode::Down);
    h.loader.start().await.unwrap();
    h.loader
        .save_value("coop", json!([{"id": 1, "name": "hen"}]))
        .await
        .unwrap();

    // Slow primary so the recovery sync is still running for the second save
    h.primary.set_mode(SourceMode::Healthy);
    h.primary.set_delay(Duration::from_millis(100));
    h.loader.health().check_health().await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    let saved = h
        .loader
        .save_value("coop", json!([{"id": 2, "name": "rooster"}]))
        .await
        .unwrap();
    assert!(saved.success);
    assert!(saved.used_fallback);
    assert_eq!(h.loader.health().status(SourceKind::Primary), Some(ConnectionStatus::Connected));

    tokio::time::timeout(Duration::from_secs(3), async {
        while h.loader.get_status().total_pending() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("late save flushed without another reconnect");

    let remote = h.primary.payload(&category("coop")).unwrap();
    assert_eq!(
        remote,
        payload(json!([{"id": 1, "name": "hen"}, {"id": 2, "name": "rooster"}]))
    );
    let loaded = h.loader.load_data("coop").await.unwrap();
    assert_eq!(loaded.payload, remote);

    h.loader.shutdown().await;
}

#[tokio::test]
async fn test_save_behind_queued_writes_keeps_order() {
    let h = harness();
    h.primary.set_mode(SourceMode::Down);
    h.loader
        .save_value("coop", json!([{"id": 1, "v": "first"}]))
        .await
        .unwrap();

    // Backend back, but the queue still holds the first write
    h.primary.set_mode(SourceMode::Healthy);
    let saved = h
        .loader
        .save_value("coop", json!([{"id": 1, "v": "second"}, {"id": 2}]))
        .await
        .unwrap();
    assert!(saved.success);
    assert!(!saved.used_fallback);

    let stored = h.primary.payload(&category("coop")).unwrap();
    assert_eq!(stored.records()[0].get("v"), Some(&json!("second")));
    assert_eq!(stored.len(), 2);
    assert_eq!(h.loader.get_status().total_pending(), 0);
}
