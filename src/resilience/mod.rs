// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Resilience building blocks.
//!
//! - [`retry`]: bounded retry with capped exponential backoff
//! - [`coalesce`]: share one in-flight operation between concurrent callers
//! - [`health`]: per-source connection status
//! - [`write_queue`]: durable buffer for saves made while offline

pub mod retry;
pub mod coalesce;
pub mod health;
pub mod write_queue;
