//! Exponential backoff shared by receipt retries and poller failure backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the retry policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (not counting the first try).
    pub max_retries: u32,
    /// Initial backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Maximum backoff delay in milliseconds (caps exponential growth).
    pub max_backoff_ms: u64,
    /// Multiplier applied to backoff on each retry.
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

/// Stateless retry policy. Computes the next delay from the attempt number.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    pub config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Returns the delay before the `attempt`-th retry (1-based).
    /// Returns `None` if `attempt` exceeds `max_retries`.
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.config.max_retries {
            return None;
        }
        Some(self.backoff(attempt))
    }

    /// Capped exponential delay after `failures` consecutive failures,
    /// regardless of `max_retries`. Zero failures means zero delay.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exp = (failures - 1).min(63) as i32;
        let base_ms = self.config.initial_backoff_ms as f64 * self.config.multiplier.powi(exp);
        let cap_ms = self.config.max_backoff_ms as f64;
        Duration::from_millis(base_ms.min(cap_ms).max(0.0) as u64)
    }

    /// Returns `true` if any retries remain after `attempt` failures.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.config.max_retries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32, initial: u64, max: u64, multiplier: f64) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_retries,
            initial_backoff_ms: initial,
            max_backoff_ms: max,
            multiplier,
        })
    }

    #[test]
    fn delays_double() {
        let p = policy(3, 100, 30_000, 2.0);
        assert_eq!(p.next_delay(1), Some(Duration::from_millis(100)));
        assert_eq!(p.next_delay(2), Some(Duration::from_millis(200)));
        assert_eq!(p.next_delay(3), Some(Duration::from_millis(400)));
        assert!(p.next_delay(4).is_none());
        assert!(p.next_delay(0).is_none());
    }

    #[test]
    fn backoff_is_capped_and_unbounded_in_attempts() {
        let p = policy(1, 100, 500, 10.0);
        assert_eq!(p.backoff(0), Duration::ZERO);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(500));
        assert_eq!(p.backoff(1_000), Duration::from_millis(500));
    }

    #[test]
    fn should_retry_boundary() {
        let p = policy(2, 100, 1_000, 2.0);
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let cfg: RetryConfig = serde_json::from_str(r#"{"max_retries": 7}"#).unwrap();
        assert_eq!(cfg.max_retries, 7);
        assert_eq!(cfg.initial_backoff_ms, 500);
    }
}
