// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Status events for UI indicators.
//!
//! The loader never renders anything. It publishes [`LoaderEvent`]s on a
//! broadcast channel and any number of subscribers (status badge, toast
//! layer, sync trigger) react to them.
//!
//! Events serialize with a `type` tag, e.g.
//! `{"type":"connection-status","source":"primary","status":"connected",...}`.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::record::Category;
use crate::resilience::health::ConnectionStatus;
use crate::source::traits::SourceKind;

/// Current wall-clock time in epoch millis.
#[must_use]
pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LoaderEvent {
    /// A source changed connection status.
    #[serde(rename_all = "camelCase")]
    ConnectionStatus {
        source: SourceKind,
        old_status: ConnectionStatus,
        new_status: ConnectionStatus,
        /// Same as `new_status`, for consumers that only read `status`
        status: ConnectionStatus,
        timestamp: i64,
    },
    /// Data came from a backup source ("using backup data").
    UsingFallback {
        category: Category,
        source: SourceKind,
        timestamp: i64,
    },
    /// Every live source failed; the cached copy is being served.
    #[serde(rename_all = "camelCase")]
    ServingStale {
        category: Category,
        age_ms: i64,
        timestamp: i64,
    },
    /// Every source failed and nothing was cached.
    AllSourcesFailed { category: Category, timestamp: i64 },
    /// A save could not reach the backend and was queued locally.
    #[serde(rename_all = "camelCase")]
    SavedLocally {
        category: Category,
        write_id: Uuid,
        persisted: bool,
        timestamp: i64,
    },
    /// Queued writes were merged and flushed.
    #[serde(rename_all = "camelCase")]
    SyncCompleted {
        category: Category,
        merged_count: usize,
        timestamp: i64,
    },
    /// A sync attempt failed; the queue is unchanged.
    SyncFailed {
        category: Category,
        reason: String,
        timestamp: i64,
    },
}

impl LoaderEvent {
    pub(crate) fn connection_status(
        source: SourceKind,
        old_status: ConnectionStatus,
        new_status: ConnectionStatus,
    ) -> Self {
        Self::ConnectionStatus {
            source,
            old_status,
            new_status,
            status: new_status,
            timestamp: now_millis(),
        }
    }
}

/// Broadcast channel for [`LoaderEvent`]s.
///
/// Publishing never blocks and never fails; with no subscribers the event is
/// dropped, and slow subscribers see `RecvError::Lagged`.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<LoaderEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<LoaderEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: LoaderEvent) {
        let _ = self.tx.send(event);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_status_serializes_with_type_tag() {
        let event = LoaderEvent::ConnectionStatus {
            source: SourceKind::Primary,
            old_status: ConnectionStatus::Disconnected,
            new_status: ConnectionStatus::Connected,
            status: ConnectionStatus::Connected,
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "connection-status");
        assert_eq!(json["source"], "primary");
        assert_eq!(json["oldStatus"], "disconnected");
        assert_eq!(json["newStatus"], "connected");
        assert_eq!(json["status"], "connected");
        assert_eq!(json["timestamp"], 1_700_000_000_000_i64);
    }

    #[test]
    fn test_sync_completed_tag() {
        let event = LoaderEvent::SyncCompleted {
            category: Category::new("coop").unwrap(),
            merged_count: 2,
            timestamp: 0,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "sync-completed");
        assert_eq!(json["category"], "coop");
        assert_eq!(json["mergedCount"], 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let bus = EventBus::new(4);
        bus.publish(LoaderEvent::AllSourcesFailed {
            category: Category::new("coop").unwrap(),
            timestamp: 0,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(LoaderEvent::connection_status(
            SourceKind::Static,
            ConnectionStatus::Checking,
            ConnectionStatus::Connected,
        ));

        match rx.recv().await.unwrap() {
            LoaderEvent::ConnectionStatus { source, new_status, .. } => {
                assert_eq!(source, SourceKind::Static);
                assert_eq!(new_status, ConnectionStatus::Connected);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }
}
