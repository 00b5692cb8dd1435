//! Retry decisions and backoff.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error_code::CallError;
use crate::utils::duration_ms;

/// Backoff shape shared by all requests.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "duration_ms")]
    pub base_delay: Duration,
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Symmetric jitter as a fraction of the delay, in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_base_delay(mut self, d: Duration) -> Self {
        self.base_delay = d;
        self
    }

    pub fn with_max_delay(mut self, d: Duration) -> Self {
        self.max_delay = d;
        self
    }

    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }
}

/// Retry policy for one request.
///
/// `attempt` is 0-based: attempt 0 is the initial try, so a request with `max_retries = 3`
/// may run attempts 0 through 3.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    config: RetryConfig,
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig, max_retries: u32) -> Self {
        Self {
            config,
            max_retries,
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Whether the attempt that just failed with `error` should be followed by another.
    pub fn should_retry(&self, attempt: u32, error: &CallError) -> bool {
        attempt < self.max_retries && error.is_retryable()
    }

    /// `min(base * 2^attempt, max)` before jitter.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let base = self.config.base_delay.as_millis() as u64;
        let cap = self.config.max_delay.as_millis() as u64;
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        Duration::from_millis(base.saturating_mul(factor).min(cap))
    }

    /// Jittered delay before the attempt following `attempt`.
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let base = self.base_backoff(attempt);
        let jitter = self.config.jitter.clamp(0.0, 0.99);
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = rand::thread_rng().gen_range((1.0 - jitter)..=(1.0 + jitter));
        base.mul_f64(factor)
    }

    /// Delay honoring a server `Retry-After` hint, never above `max_delay`.
    pub fn delay_for(&self, attempt: u32, error: &CallError) -> Duration {
        let delay = self.next_delay(attempt);
        match error.retry_after_ms() {
            Some(ms) => delay
                .max(Duration::from_millis(ms))
                .min(self.config.max_delay),
            None => delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server_error() -> CallError {
        CallError::from_status(503, None, None)
    }

    #[test]
    fn test_should_retry_respects_budget() {
        let policy = RetryPolicy::new(RetryConfig::default(), 3);
        assert!(policy.should_retry(0, &server_error()));
        assert!(policy.should_retry(2, &server_error()));
        assert!(!policy.should_retry(3, &server_error()));
    }

    #[test]
    fn test_client_errors_are_not_retried() {
        let policy = RetryPolicy::new(RetryConfig::default(), 5);
        assert!(!policy.should_retry(0, &CallError::from_status(400, None, None)));
        assert!(!policy.should_retry(0, &CallError::from_status(404, None, None)));
        assert!(policy.should_retry(0, &CallError::from_status(429, None, None)));
        assert!(policy.should_retry(0, &CallError::Timeout { after_ms: 100 }));
    }

    #[test]
    fn test_zero_budget_never_retries() {
        let policy = RetryPolicy::new(RetryConfig::default(), 0);
        assert!(!policy.should_retry(0, &server_error()));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let policy = RetryPolicy::new(RetryConfig::default(), 10);
        assert_eq!(policy.base_backoff(0), Duration::from_secs(1));
        assert_eq!(policy.base_backoff(1), Duration::from_secs(2));
        assert_eq!(policy.base_backoff(4), Duration::from_secs(16));
        assert_eq!(policy.base_backoff(5), Duration::from_secs(30));
        assert_eq!(policy.base_backoff(63), Duration::from_secs(30));
        assert_eq!(policy.base_backoff(200), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_within_quarter() {
        let policy = RetryPolicy::new(RetryConfig::default(), 10);
        for attempt in 0..6 {
            let base = policy.base_backoff(attempt).as_secs_f64();
            for _ in 0..50 {
                let d = policy.next_delay(attempt).as_secs_f64();
                assert!(d >= base * 0.75 - 1e-9, "{} below jitter floor of {}", d, base);
                assert!(d <= base * 1.25 + 1e-9, "{} above jitter ceiling of {}", d, base);
            }
        }
    }

    #[test]
    fn test_no_jitter_is_exact() {
        let policy = RetryPolicy::new(RetryConfig::default().with_jitter(0.0), 3);
        assert_eq!(policy.next_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_retry_after_extends_but_is_capped() {
        let policy = RetryPolicy::new(RetryConfig::default().with_jitter(0.0), 3);
        let hinted = CallError::RateLimited {
            retry_after_ms: Some(5_000),
        };
        assert_eq!(policy.delay_for(0, &hinted), Duration::from_secs(5));
        let huge = CallError::RateLimited {
            retry_after_ms: Some(600_000),
        };
        assert_eq!(policy.delay_for(0, &huge), Duration::from_secs(30));
        assert_eq!(policy.delay_for(1, &server_error()), Duration::from_secs(2));
    }
}
