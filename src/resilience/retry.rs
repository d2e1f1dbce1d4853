// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff and jitter.
//!
//! The sync processor uses [`RetryConfig::delay_for`] between re-dispatches of
//! a failed operation; store constructors use [`retry`] to ride out a backend
//! that is still starting up.
//!
//! # Example
//!
//! ```
//! use offline_sync::RetryConfig;
//! use std::time::Duration;
//!
//! // Startup: fail fast on bad config
//! let startup = RetryConfig::startup();
//! assert_eq!(startup.max_retries, Some(5));
//!
//! // Without jitter the delay doubles per attempt, capped at max_delay
//! let config = RetryConfig { jitter: 0.0, ..RetryConfig::sync() };
//! assert_eq!(config.delay_for(0), Duration::from_millis(500));
//! assert_eq!(config.delay_for(1), Duration::from_secs(1));
//! assert_eq!(config.delay_for(20), config.max_delay);
//! ```

use std::time::Duration;
use std::future::Future;
use rand::Rng;
use tokio::time::sleep;
use tracing::{warn, info};

/// Configuration for operation retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    pub max_retries: Option<usize>,
    /// Random spread applied to each delay, as a fraction of it (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::sync()
    }
}

impl RetryConfig {
    /// Fast-fail retry for initial startup connection.
    /// Retries 5 times with exponential backoff, failing after ~5 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: 0.0,
        }
    }

    /// Default policy for sync operations: 3 retries, 500ms doubling to 30s.
    #[must_use]
    pub fn sync() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            factor: 2.0,
            jitter: 0.2,
        }
    }

    /// Short retry for individual store queries once connected.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
            jitter: 0.1,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[cfg(test)]
    pub fn test() -> Self {
        Self {
            max_retries: Some(3),
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
            jitter: 0.0,
        }
    }

    /// Un-jittered delay before retry number `attempt + 1` (0-based).
    #[must_use]
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exp = self.factor.max(1.0).powi(attempt.min(64) as i32);
        let max = self.max_delay.as_secs_f64();
        Duration::from_secs_f64((self.initial_delay.as_secs_f64() * exp).min(max))
    }

    /// Delay before retry number `attempt + 1`, with jitter applied.
    /// Never exceeds `max_delay`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = self.jitter.min(1.0);
        let factor = rand::thread_rng().gen_range((1.0 - spread)..=(1.0 + spread));
        base.mul_f64(factor).min(self.max_delay)
    }
}

/// Run `operation` until it succeeds or `max_retries` retries have failed,
/// sleeping [`RetryConfig::delay_for`] between attempts.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempts: u32 = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;

                if let Some(max) = config.max_retries {
                    if attempts as usize > max {
                        return Err(err);
                    }
                }

                let delay = config.delay_for(attempts - 1);
                warn!(
                    "Operation '{}' failed (attempt {}): {}. Retrying in {:?}...",
                    operation_name, attempts, err, delay
                );
                sleep(delay).await;
            }
        }
    }
}
