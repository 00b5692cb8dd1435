use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::utils::duration_ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures (net of decay) that trip a closed breaker.
    pub failure_threshold: u32,
    /// How long an open breaker rejects calls before probing.
    #[serde(with = "duration_ms")]
    pub open_timeout: Duration,
    /// Consecutive half-open successes needed to close again.
    pub success_threshold: u32,
    /// Display ceiling for the failure counter.
    pub failure_ceiling: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_timeout: Duration::from_secs(60),
            success_threshold: 3,
            failure_ceiling: 999,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    pub fn with_open_timeout(mut self, timeout: Duration) -> Self {
        self.open_timeout = timeout;
        self
    }

    pub fn with_success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold;
        self
    }

    /// Must not be below `failure_threshold`, or the breaker can never trip.
    pub fn with_failure_ceiling(mut self, ceiling: u32) -> Self {
        self.failure_ceiling = ceiling;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitBreakerSnapshot {
    pub endpoint: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    /// Remaining open time in ms, if currently open.
    pub open_remaining_ms: Option<u64>,
}

#[derive(Debug, Clone)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_at: Option<Instant>,
    next_attempt_at: Option<Instant>,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            next_attempt_at: None,
        }
    }
}

/// Per-endpoint circuit breakers.
///
/// - Closed: calls proceed; failures accumulate, successes decay the count by one
/// - Open: calls are rejected until `open_timeout` has elapsed
/// - Half-open: calls proceed; `success_threshold` successes close, any failure reopens
///
/// State is in-memory only. A poisoned lock degrades to "closed".
pub struct CircuitBreakerRegistry {
    cfg: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, BreakerState>>,
}

impl CircuitBreakerRegistry {
    pub fn new(cfg: CircuitBreakerConfig) -> Self {
        Self {
            cfg,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.cfg
    }

    // Never below the trip point, even for an unvalidated config.
    fn ceiling(&self) -> u32 {
        self.cfg.failure_ceiling.max(self.cfg.failure_threshold)
    }

    fn lock(&self) -> Option<MutexGuard<'_, HashMap<String, BreakerState>>> {
        self.breakers.lock().ok()
    }

    /// Whether a real call to `endpoint` may go out now.
    ///
    /// An open breaker whose timeout has elapsed moves to half-open here and lets this call
    /// through as the probe.
    pub fn can_proceed(&self, endpoint: &str) -> bool {
        let Some(mut breakers) = self.lock() else {
            return true;
        };
        let Some(st) = breakers.get_mut(endpoint) else {
            return true;
        };
        match st.state {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let now = Instant::now();
                match st.next_attempt_at {
                    Some(at) if now < at => false,
                    _ => {
                        st.state = CircuitState::HalfOpen;
                        st.success_count = 0;
                        info!(endpoint, "circuit half-open; probing recovery");
                        true
                    }
                }
            }
        }
    }

    /// Record the settled outcome of one call to `endpoint`.
    pub fn record_outcome(&self, endpoint: &str, success: bool) {
        let Some(mut breakers) = self.lock() else {
            return;
        };
        let now = Instant::now();
        let st = breakers
            .entry(endpoint.to_string())
            .or_insert_with(BreakerState::closed);

        match (st.state, success) {
            (CircuitState::Closed, true) => {
                st.failure_count = st.failure_count.saturating_sub(1);
            }
            (CircuitState::Closed, false) => {
                st.failure_count = (st.failure_count + 1).min(self.ceiling());
                st.last_failure_at = Some(now);
                if st.failure_count >= self.cfg.failure_threshold {
                    st.state = CircuitState::Open;
                    st.next_attempt_at = Some(now + self.cfg.open_timeout);
                    warn!(
                        endpoint,
                        failure_count = st.failure_count,
                        open_ms = self.cfg.open_timeout.as_millis() as u64,
                        "circuit opened"
                    );
                }
            }
            (CircuitState::HalfOpen, true) => {
                st.success_count += 1;
                if st.success_count >= self.cfg.success_threshold {
                    *st = BreakerState::closed();
                    info!(endpoint, "circuit closed");
                }
            }
            (CircuitState::HalfOpen, false) => {
                st.state = CircuitState::Open;
                st.success_count = 0;
                st.failure_count = (st.failure_count + 1).min(self.ceiling());
                st.last_failure_at = Some(now);
                st.next_attempt_at = Some(now + self.cfg.open_timeout);
                warn!(endpoint, "half-open probe failed; circuit reopened");
            }
            // Stragglers that were already in flight when the breaker opened.
            (CircuitState::Open, true) => {}
            (CircuitState::Open, false) => {
                st.last_failure_at = Some(now);
            }
        }
    }

    pub fn state(&self, endpoint: &str) -> CircuitState {
        self.lock()
            .and_then(|b| b.get(endpoint).map(|s| s.state))
            .unwrap_or(CircuitState::Closed)
    }

    pub fn snapshot(&self, endpoint: &str) -> Option<CircuitBreakerSnapshot> {
        let breakers = self.lock()?;
        breakers
            .get(endpoint)
            .map(|st| Self::snapshot_of(endpoint, st, Instant::now()))
    }

    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let now = Instant::now();
        let mut out: Vec<CircuitBreakerSnapshot> = self
            .lock()
            .map(|b| {
                b.iter()
                    .map(|(endpoint, st)| Self::snapshot_of(endpoint, st, now))
                    .collect()
            })
            .unwrap_or_default();
        out.sort_by(|a, b| a.endpoint.cmp(&b.endpoint));
        out
    }

    fn snapshot_of(endpoint: &str, st: &BreakerState, now: Instant) -> CircuitBreakerSnapshot {
        let open_remaining_ms = match (st.state, st.next_attempt_at) {
            (CircuitState::Open, Some(at)) if at > now => Some((at - now).as_millis() as u64),
            _ => None,
        };
        CircuitBreakerSnapshot {
            endpoint: endpoint.to_string(),
            state: st.state,
            failure_count: st.failure_count,
            success_count: st.success_count,
            open_remaining_ms,
        }
    }

    /// Forget one endpoint's history.
    pub fn reset(&self, endpoint: &str) {
        if let Some(mut b) = self.lock() {
            b.remove(endpoint);
        }
    }

    pub fn clear(&self) {
        if let Some(mut b) = self.lock() {
            b.clear();
        }
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
