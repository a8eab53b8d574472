// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-record last-write-wins merge of queued writes into remote state.
//!
//! Pure function, no I/O. Rules:
//!
//! - ids only in remote are kept unchanged, in remote order
//! - ids only in local writes are appended in first-seen order
//! - ids in both: the local record replaces the remote one only if its
//!   timestamp is strictly newer (ties keep remote); against an earlier
//!   local write it also wins ties, so queue order decides
//!
//! A record's timestamp is its own `ts` / `updatedAt` / `updated_at` field.
//! Without one, a local record takes its queued write's timestamp and a
//! remote record counts as 0.

use std::collections::HashMap;

use thiserror::Error;
use uuid::Uuid;

use crate::record::{Category, Payload, Record, RecordId};
use crate::resilience::write_queue::QueuedWrite;

/// A queued write that belongs to another category.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("queued write {write_id} is for category '{found}', not '{expected}'")]
pub struct ConflictError {
    pub expected: Category,
    pub found: Category,
    pub write_id: Uuid,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutcome {
    pub payload: Payload,
    /// Local records applied (replaced or appended)
    pub merged_count: usize,
}

/// Merge `writes` (oldest first) into `remote`.
pub fn merge(
    category: &Category,
    remote: &Payload,
    writes: &[QueuedWrite],
) -> Result<MergeOutcome, ConflictError> {
    if let Some(stray) = writes.iter().find(|w| &w.category != category) {
        return Err(ConflictError {
            expected: category.clone(),
            found: stray.category.clone(),
            write_id: stray.write_id,
        });
    }

    let mut order: Vec<RecordId> = Vec::with_capacity(remote.len());
    // id -> (record, timestamp, came from a local write)
    let mut current: HashMap<RecordId, (Record, i64, bool)> = HashMap::with_capacity(remote.len());

    for record in remote.records() {
        let ts = record.timestamp().unwrap_or(0);
        order.push(record.id().clone());
        current.insert(record.id().clone(), (record.clone(), ts, false));
    }

    let mut merged_count = 0;
    for write in writes {
        for record in write.payload.records() {
            let ts = record.timestamp().unwrap_or(write.timestamp);
            match current.get_mut(record.id()) {
                Some(existing) => {
                    if ts > existing.1 || (existing.2 && ts == existing.1) {
                        *existing = (record.clone(), ts, true);
                        merged_count += 1;
                    }
                }
                None => {
                    order.push(record.id().clone());
                    current.insert(record.id().clone(), (record.clone(), ts, true));
                    merged_count += 1;
                }
            }
        }
    }

    let records = order
        .into_iter()
        .filter_map(|id| current.remove(&id).map(|(record, _, _)| record))
        .collect();

    Ok(MergeOutcome {
        payload: Payload::from_unique(records),
        merged_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn coop() -> Category {
        Category::new("coop").unwrap()
    }

    fn payload(value: Value) -> Payload {
        Payload::from_value(value).unwrap()
    }

    fn write(records: Value, timestamp: i64) -> QueuedWrite {
        QueuedWrite {
            write_id: Uuid::new_v4(),
            category: coop(),
            payload: payload(records),
            timestamp,
        }
    }

    #[test]
    fn test_no_writes_is_remote() {
        let remote = payload(json!([{"id": 1, "ts": 5}]));
        let outcome = merge(&coop(), &remote, &[]).unwrap();
        assert_eq!(outcome.payload, remote);
        assert_eq!(outcome.merged_count, 0);
    }

    #[test]
    fn test_local_only_ids_appended_in_order() {
        let remote = payload(json!([{"id": 1}]));
        let writes = [
            write(json!([{"id": 3}, {"id": 2}]), 10),
            write(json!([{"id": 4}]), 20),
        ];

        let outcome = merge(&coop(), &remote, &writes).unwrap();
        let ids: Vec<_> = outcome.payload.ids().cloned().collect();
        assert_eq!(ids, [1, 3, 2, 4].map(RecordId::Int).to_vec());
        assert_eq!(outcome.merged_count, 3);
    }

    #[test]
    fn test_newer_local_wins() {
        let remote = payload(json!([{"id": 1, "ts": 100, "v": "remote"}]));
        let writes = [write(json!([{"id": 1, "ts": 200, "v": "local"}]), 0)];

        let outcome = merge(&coop(), &remote, &writes).unwrap();
        assert_eq!(outcome.payload.records()[0].get("v"), Some(&json!("local")));
        assert_eq!(outcome.merged_count, 1);
    }

    #[test]
    fn test_older_local_loses() {
        let remote = payload(json!([{"id": 1, "updatedAt": 300, "v": "remote"}]));
        let writes = [write(json!([{"id": 1, "updatedAt": 200, "v": "local"}]), 0)];

        let outcome = merge(&coop(), &remote, &writes).unwrap();
        assert_eq!(outcome.payload.records()[0].get("v"), Some(&json!("remote")));
        assert_eq!(outcome.merged_count, 0);
    }

    #[test]
    fn test_tie_keeps_remote() {
        let remote = payload(json!([{"id": 1, "ts": 100, "v": "remote"}]));
        let writes = [write(json!([{"id": 1, "ts": 100, "v": "local"}]), 0)];

        let outcome = merge(&coop(), &remote, &writes).unwrap();
        assert_eq!(outcome.payload.records()[0].get("v"), Some(&json!("remote")));
    }

    #[test]
    fn test_untimestamped_local_uses_write_time() {
        // Remote without timestamp counts as 0, so any queued write is newer
        let remote = payload(json!([{"id": 1, "v": "remote"}]));
        let writes = [write(json!([{"id": 1, "v": "local"}]), 1_700_000_000_000)];

        let outcome = merge(&coop(), &remote, &writes).unwrap();
        assert_eq!(outcome.payload.records()[0].get("v"), Some(&json!("local")));
    }

    #[test]
    fn test_later_write_overrides_earlier() {
        let remote = Payload::empty();
        let writes = [
            write(json!([{"id": 1, "v": "first"}]), 10),
            write(json!([{"id": 1, "v": "second"}]), 20),
        ];

        let outcome = merge(&coop(), &remote, &writes).unwrap();
        assert_eq!(outcome.payload.len(), 1);
        assert_eq!(outcome.payload.records()[0].get("v"), Some(&json!("second")));
        assert_eq!(outcome.merged_count, 2);
    }

    #[test]
    fn test_same_millisecond_writes_follow_queue_order() {
        let writes = [
            write(json!([{"id": 1, "v": "first"}]), 10),
            write(json!([{"id": 1, "v": "second"}]), 10),
        ];

        let outcome = merge(&coop(), &Payload::empty(), &writes).unwrap();
        assert_eq!(outcome.payload.records()[0].get("v"), Some(&json!("second")));
    }

    #[test]
    fn test_remote_only_records_preserved() {
        let remote = payload(json!([{"id": "a", "v": 1}, {"id": "b", "v": 2}]));
        let writes = [write(json!([{"id": "c"}]), 10)];

        let outcome = merge(&coop(), &remote, &writes).unwrap();
        assert_eq!(outcome.payload.get(&"a".into()), remote.get(&"a".into()));
        assert_eq!(outcome.payload.get(&"b".into()), remote.get(&"b".into()));
    }

    #[test]
    fn test_foreign_category_is_conflict() {
        let mut stray = write(json!([{"id": 1}]), 10);
        stray.category = Category::new("solo").unwrap();

        let err = merge(&coop(), &Payload::empty(), &[stray.clone()]).unwrap_err();
        assert_eq!(err.found, stray.category);
        assert_eq!(err.write_id, stray.write_id);
    }
}
