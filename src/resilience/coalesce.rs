// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Request coalescing.
//!
//! While an operation for a key is in flight, further callers for the same
//! key await the same shared future instead of starting a new one. Every
//! caller gets a clone of the one result.

use std::collections::HashMap;
use std::hash::Hash;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

pub struct InFlight<K, V>
where
    V: Clone,
{
    pending: Mutex<HashMap<K, Shared<BoxFuture<'static, V>>>>,
}

impl<K, V> InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Join the in-flight operation for `key`, or start one with `start`.
    ///
    /// `start` is only called when nothing is in flight for `key`.
    pub async fn run<F>(&self, key: K, start: F) -> V
    where
        F: FnOnce() -> BoxFuture<'static, V>,
    {
        let shared = {
            let mut pending = self.pending.lock();
            match pending.get(&key) {
                Some(existing) => existing.clone(),
                None => {
                    let fut = start().shared();
                    pending.insert(key.clone(), fut.clone());
                    fut
                }
            }
        };

        let value = shared.clone().await;

        // Only remove our own entry; a newer operation may have replaced it
        let mut pending = self.pending.lock();
        if pending.get(&key).is_some_and(|current| current.ptr_eq(&shared)) {
            pending.remove(&key);
        }
        value
    }

    /// Number of keys with an operation in flight.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl<K, V> Default for InFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_concurrent_callers_share_one_run() {
        let in_flight: InFlight<&'static str, usize> = InFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let make = |runs: Arc<AtomicUsize>| {
            move || {
                async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    runs.fetch_add(1, Ordering::SeqCst) + 1
                }
                .boxed()
            }
        };

        let (a, b) = tokio::join!(
            in_flight.run("coop", make(runs.clone())),
            in_flight.run("coop", make(runs.clone())),
        );

        assert_eq!(a, 1);
        assert_eq!(b, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(in_flight.is_empty());
    }

    #[tokio::test]
    async fn test_different_keys_run_independently() {
        let in_flight: InFlight<&'static str, usize> = InFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let r1 = runs.clone();
        let r2 = runs.clone();
        let (a, b) = tokio::join!(
            in_flight.run("a", move || async move { r1.fetch_add(1, Ordering::SeqCst) }.boxed()),
            in_flight.run("b", move || async move { r2.fetch_add(1, Ordering::SeqCst) }.boxed()),
        );

        assert_ne!(a, b);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_calls_start_fresh() {
        let in_flight: InFlight<u8, usize> = InFlight::new();
        let runs = Arc::new(AtomicUsize::new(0));

        for expected in 1..=3 {
            let r = runs.clone();
            let got = in_flight
                .run(1, move || async move { r.fetch_add(1, Ordering::SeqCst) + 1 }.boxed())
                .await;
            assert_eq!(got, expected);
        }
    }
}
