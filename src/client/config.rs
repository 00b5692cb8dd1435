//! Executor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::cache::CacheConfig;
use crate::resilience::{CircuitBreakerConfig, RetryConfig};
use crate::utils::{duration_ms, env_parse};
use crate::{Error, Result};

/// Global defaults for every call made through one [`HttpExecutor`](super::HttpExecutor).
///
/// Durations are milliseconds in YAML/JSON form:
///
/// ```rust
/// use callguard::client::ExecutorConfig;
///
/// let cfg = ExecutorConfig::from_yaml_str(
///     "default_timeout: 5000\nmax_retries: 2\nbreaker:\n  failure_threshold: 3\n",
/// ).unwrap();
/// assert_eq!(cfg.max_retries, 2);
/// assert_eq!(cfg.breaker.failure_threshold, 3);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Wall-clock limit for one attempt.
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
    pub cache: CacheConfig,
    pub dedup_enabled: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            max_retries: 3,
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            dedup_enabled: true,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_breaker(mut self, breaker: CircuitBreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_dedup(mut self, enabled: bool) -> Self {
        self.dedup_enabled = enabled;
        self
    }

    /// Parse and validate a YAML document. Missing keys take their defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let cfg: Self = serde_yaml::from_str(yaml)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Defaults overlaid with `CALLGUARD_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().overlay_env()
    }

    /// Overlay `CALLGUARD_*` variables. Unset or malformed values are ignored.
    ///
    /// - `CALLGUARD_TIMEOUT_MS`
    /// - `CALLGUARD_MAX_RETRIES`
    /// - `CALLGUARD_BREAKER_FAILURE_THRESHOLD`
    /// - `CALLGUARD_BREAKER_OPEN_TIMEOUT_MS`
    /// - `CALLGUARD_CACHE_MAX_ITEMS`
    /// - `CALLGUARD_CACHE_MAX_BYTES`
    /// - `CALLGUARD_CACHE_SWEEP_INTERVAL_SECS`
    pub fn overlay_env(mut self) -> Self {
        if let Some(ms) = env_parse::<u64>("CALLGUARD_TIMEOUT_MS") {
            self.default_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<u32>("CALLGUARD_MAX_RETRIES") {
            self.max_retries = n;
        }
        if let Some(n) = env_parse::<u32>("CALLGUARD_BREAKER_FAILURE_THRESHOLD") {
            self.breaker.failure_threshold = n;
        }
        if let Some(ms) = env_parse::<u64>("CALLGUARD_BREAKER_OPEN_TIMEOUT_MS") {
            self.breaker.open_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = env_parse::<usize>("CALLGUARD_CACHE_MAX_ITEMS") {
            self.cache.max_items = n;
        }
        if let Some(n) = env_parse::<usize>("CALLGUARD_CACHE_MAX_BYTES") {
            self.cache.max_bytes = n;
        }
        if let Some(secs) = env_parse::<u64>("CALLGUARD_CACHE_SWEEP_INTERVAL_SECS") {
            self.cache.sweep_interval = Duration::from_secs(secs);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_timeout.is_zero() {
            return Err(Error::invalid_config(
                "default_timeout",
                "must be greater than zero",
            ));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(Error::invalid_config(
                "breaker.failure_threshold",
                "must be greater than zero",
            ));
        }
        if self.breaker.failure_ceiling < self.breaker.failure_threshold {
            return Err(Error::invalid_config(
                "breaker.failure_ceiling",
                format!(
                    "ceiling {} is below failure threshold {}",
                    self.breaker.failure_ceiling, self.breaker.failure_threshold
                ),
            ));
        }
        if self.breaker.success_threshold == 0 {
            return Err(Error::invalid_config(
                "breaker.success_threshold",
                "must be greater than zero",
            ));
        }
        if self.breaker.open_timeout.is_zero() {
            return Err(Error::invalid_config(
                "breaker.open_timeout",
                "must be greater than zero",
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(Error::invalid_config(
                "retry.base_delay",
                format!(
                    "base delay {}ms exceeds max delay {}ms",
                    self.retry.base_delay.as_millis(),
                    self.retry.max_delay.as_millis()
                ),
            ));
        }
        if !(0.0..1.0).contains(&self.retry.jitter) {
            return Err(Error::invalid_config(
                "retry.jitter",
                format!("must be in [0, 1), got {}", self.retry.jitter),
            ));
        }
        if self.cache.max_items == 0 {
            return Err(Error::invalid_config(
                "cache.max_items",
                "must be greater than zero",
            ));
        }
        if self.cache.max_bytes == 0 {
            return Err(Error::invalid_config(
                "cache.max_bytes",
                "must be greater than zero",
            ));
        }
        if self.cache.sweep_interval.is_zero() {
            return Err(Error::invalid_config(
                "cache.sweep_interval",
                "must be greater than zero",
            ));
        }
        Ok(())
    }
}
