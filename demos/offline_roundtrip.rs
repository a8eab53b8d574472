// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Offline round trip with in-memory sources.
//!
//! Demonstrates:
//! 1. Loading through the fallback chain while the primary is down
//! 2. Saving offline (queued locally, shown optimistically)
//! 3. The primary coming back and the queue syncing on its own
//! 4. Status events and captured metrics
//!
//! No servers needed.
//!
//! # Run
//!
//! ```bash
//! RUST_LOG=catalog_sync=debug cargo run --example offline_roundtrip
//! ```

use std::sync::Arc;
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
use serde_json::json;
use tracing_subscriber::EnvFilter;

use catalog_sync::source::memory::{MemorySource, SourceMode};
use catalog_sync::storage::memory::MemoryStore;
use catalog_sync::{Category, DataLoader, LoaderConfig, LoaderEvent, Payload, SourceKind, Sources};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder.install().expect("failed to install metrics recorder");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("catalog_sync=info")))
        .with_target(false)
        .compact()
        .init();

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║           catalog-sync: Offline Round Trip                    ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    // ─────────────────────────────────────────────────────────────────────────
    // 1. Sources: primary down, static snapshot available
    // ─────────────────────────────────────────────────────────────────────────
    let coop = Category::new("coop")?;
    let primary = Arc::new(MemorySource::new(SourceKind::Primary));
    let snapshots = Arc::new(
        MemorySource::new(SourceKind::Static)
            .with_payload(&coop, Payload::from_value(json!([{"id": 7, "title": "Raid Night"}]))?),
    );
    primary.set_mode(SourceMode::Down);

    let config = LoaderConfig {
        network_timeout_ms: 500,
        retry_initial_delay_ms: 10,
        retry_max_delay_ms: 50,
        health_interval_secs: 1,
        ..Default::default()
    };
    let loader = DataLoader::new(
        config,
        Sources::new(primary.clone()).with_static_files(snapshots),
        Arc::new(MemoryStore::new()),
    );
    let mut events = loader.subscribe();

    println!("🚀 Starting loader with the primary down...");
    loader.start().await?;
    println!("   └─ Primary: {}", loader.get_status().health.primary);

    // ─────────────────────────────────────────────────────────────────────────
    // 2. Load: served from the static snapshot
    // ─────────────────────────────────────────────────────────────────────────
    let loaded = loader.load_data("coop").await?;
    println!("\n📥 Loaded {} record(s) from {:?}", loaded.payload.len(), loaded.origin);

    // ─────────────────────────────────────────────────────────────────────────
    // 3. Save offline
    // ─────────────────────────────────────────────────────────────────────────
    let saved = loader
        .save_value("coop", json!([{"id": 7, "title": "Raid Night (moved)", "ts": 2_000}, {"id": 8, "title": "Egg Hunt"}]))
        .await?;
    println!("\n💾 Saved: success={} used_fallback={}", saved.success, saved.used_fallback);
    println!("   └─ Pending writes: {}", loader.get_status().total_pending());

    // ─────────────────────────────────────────────────────────────────────────
    // 4. Primary comes back; the health timer notices and the queue syncs
    // ─────────────────────────────────────────────────────────────────────────
    println!("\n🔌 Bringing the primary back...");
    primary.set_mode(SourceMode::Healthy);

    let synced = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(LoaderEvent::ConnectionStatus { source, old_status, new_status, .. }) => {
                    println!("   ├─ {}: {} → {}", source, old_status, new_status);
                }
                Ok(LoaderEvent::SyncCompleted { category, merged_count, .. }) => {
                    println!("   └─ Synced {} ({} record(s) merged)", category, merged_count);
                    return true;
                }
                Ok(_) => {}
                Err(_) => return false,
            }
        }
    })
    .await
    .unwrap_or(false);

    if synced {
        let remote = primary.payload(&coop).unwrap_or_default();
        println!("\n📤 Primary now holds {} record(s)", remote.len());
    } else {
        println!("\n⚠️  Sync did not complete in time");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // 5. Status and metrics
    // ─────────────────────────────────────────────────────────────────────────
    let status = loader.get_status();
    println!("\n📊 Status:");
    println!("   ├─ State: {}", status.state);
    println!("   ├─ Pending: {}", status.total_pending());
    for entry in &status.cache {
        println!(
            "   ├─ Cache {}: {} record(s) from {} ({} ms old)",
            entry.category, entry.records, entry.origin, entry.age_ms
        );
    }
    println!("   └─ Queue: {:?}", status.queue);

    println!("\n📈 Metrics:");
    dump_metrics(&snapshotter);

    println!("\n🛑 Shutting down...");
    loader.shutdown().await;
    println!("   ✅ State: {}", loader.state());

    Ok(())
}

/// Print captured metrics, sorted by name.
fn dump_metrics(snapshotter: &Snapshotter) {
    let mut lines: Vec<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, value)| {
            let (_, key) = composite_key.into_parts();
            let labels: Vec<_> = key.labels().map(|l| format!("{}={}", l.key(), l.value())).collect();
            let labels = if labels.is_empty() { String::new() } else { format!("{{{}}}", labels.join(",")) };
            let value = match value {
                DebugValue::Counter(v) => v.to_string(),
                DebugValue::Gauge(v) => format!("{:.2}", v.into_inner()),
                DebugValue::Histogram(samples) => format!("{} sample(s)", samples.len()),
            };
            format!("{}{} = {}", key.name(), labels, value)
        })
        .collect();
    lines.sort();
    for line in lines {
        println!("   └─ {}", line);
    }
}
