//! Per-attempt call metrics.
//!
//! The executor reports one [`CallMetric`] for every network attempt, successful or not, to
//! an injected [`MetricsSink`]. Sinks are fire-and-forget: they return nothing and must not
//! block.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`MetricsSink`] | Trait for metric destinations |
//! | [`NoopMetricsSink`] | Default sink (drops everything) |
//! | [`InMemoryMetricsSink`] | Bounded in-memory sink for tests and diagnostics |
//! | [`TracingMetricsSink`] | Emits each metric as a `tracing` event |
//! | [`CompositeMetricsSink`] | Fans out to several sinks |

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};

use crate::transport::Method;

/// One network attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallMetric {
    pub endpoint: String,
    pub method: Method,
    pub duration_ms: u64,
    /// `None` when no HTTP response arrived (timeout or connection failure).
    pub status: Option<u16>,
    /// 0-based attempt index within the call.
    pub attempt: u32,
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, metric: &CallMetric);
}

/// No-op sink (always available).
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn record(&self, _: &CallMetric) {}
}

pub fn noop_sink() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetricsSink)
}

/// In-memory sink for testing; keeps the most recent `max` metrics.
pub struct InMemoryMetricsSink {
    metrics: RwLock<VecDeque<CallMetric>>,
    max: usize,
}

impl InMemoryMetricsSink {
    pub fn new(max: usize) -> Self {
        Self {
            metrics: RwLock::new(VecDeque::new()),
            max: max.max(1),
        }
    }

    pub fn metrics(&self) -> Vec<CallMetric> {
        self.metrics
            .read()
            .map(|m| m.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn for_endpoint(&self, endpoint: &str) -> Vec<CallMetric> {
        self.metrics()
            .into_iter()
            .filter(|m| m.endpoint == endpoint)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut m) = self.metrics.write() {
            m.clear();
        }
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, metric: &CallMetric) {
        if let Ok(mut m) = self.metrics.write() {
            m.push_back(metric.clone());
            while m.len() > self.max {
                m.pop_front();
            }
        }
    }
}

/// Logs every metric at `debug` under the `callguard::metrics` target.
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, metric: &CallMetric) {
        tracing::debug!(
            target: "callguard::metrics",
            endpoint = metric.endpoint.as_str(),
            method = metric.method.as_str(),
            duration_ms = metric.duration_ms,
            status = metric.status,
            attempt = metric.attempt,
            "http attempt"
        );
    }
}

/// Composite sink for multiple destinations.
#[derive(Default)]
pub struct CompositeMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}

impl CompositeMetricsSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn add_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl MetricsSink for CompositeMetricsSink {
    fn record(&self, metric: &CallMetric) {
        for s in &self.sinks {
            s.record(metric);
        }
    }
}
