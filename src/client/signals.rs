use serde::Serialize;

use crate::cache::CacheStats;
use crate::resilience::CircuitBreakerSnapshot;

/// A snapshot of executor runtime "signals" for diagnostics.
///
/// This is *facts only* (no policy). Applications can build health views or adaptive
/// behavior on top of these signals.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutorSignals {
    pub cache: CacheStats,
    /// Breakers that have been touched at least once.
    pub breakers: Vec<CircuitBreakerSnapshot>,
    /// Distinct request signatures currently being coalesced.
    pub in_flight: usize,
}

impl ExecutorSignals {
    /// Endpoints whose breaker is not closed.
    pub fn degraded_endpoints(&self) -> Vec<&str> {
        self.breakers
            .iter()
            .filter(|b| b.state != crate::resilience::CircuitState::Closed)
            .map(|b| b.endpoint.as_str())
            .collect()
    }
}
