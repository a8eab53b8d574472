// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with capped exponential backoff.
//!
//! Bounded retries only: a source that keeps failing is abandoned so the
//! fallback chain can move on. Errors that will not get better by asking
//! again (malformed body, 4xx) are returned immediately.
//!
//! # Example
//!
//! ```
//! use catalog_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Backends: two retries after the first attempt
//! let network = RetryConfig::network();
//! assert_eq!(network.max_retries, 2);
//!
//! // Delays double and cap out
//! assert_eq!(network.delay_for(0), Duration::from_millis(250));
//! assert_eq!(network.delay_for(1), Duration::from_millis(500));
//! assert_eq!(network.delay_for(10), network.max_delay);
//! ```

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{info, warn};

/// Errors that may succeed if the operation is simply tried again.
pub trait Transient {
    fn is_transient(&self) -> bool;
}

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// Retries after the first attempt (total attempts = `max_retries + 1`)
    pub max_retries: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::network()
    }
}

impl RetryConfig {
    /// Data API reads and writes: 2 retries, 250ms doubling to 2s.
    #[must_use]
    pub fn network() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Static files are cheap to give up on: one quick retry.
    #[must_use]
    pub fn static_files() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            factor: 2.0,
        }
    }

    /// Single attempt.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            factor: 1.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: 2,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    /// Backoff before retry number `retry` (0-based).
    #[must_use]
    pub fn delay_for(&self, retry: usize) -> Duration {
        let mut delay = self.initial_delay;
        for _ in 0..retry {
            // Out of range products (overflow, bad factor) saturate at the cap
            delay = Duration::try_from_secs_f64(delay.as_secs_f64() * self.factor)
                .unwrap_or(self.max_delay)
                .min(self.max_delay);
            if delay == self.max_delay {
                break;
            }
        }
        delay.min(self.max_delay.max(self.initial_delay))
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// the retry budget is spent. Returns the last error.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display + Transient,
{
    let mut retries = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if retries > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, retries);
                }
                return Ok(val);
            }
            Err(err) => {
                if !err.is_transient() || retries >= config.max_retries {
                    return Err(err);
                }

                let delay = config.delay_for(retries);
                retries += 1;
                warn!(
                    "Operation '{}' failed (retry {}/{}): {}. Retrying in {:?}...",
                    operation_name, retries, config.max_retries, err, delay
                );
                sleep(delay).await;
            }
        }
    }
}
