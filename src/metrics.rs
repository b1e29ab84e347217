//! Injected metrics sink for consumer runners.
//!
//! Runners report accept/commit latencies and counts through this trait so
//! tests and embedders choose the backend; correctness never depends on it.

use std::sync::Arc;
use std::time::Duration;

/// Sink for pipeline metrics (counters and timers)
pub trait MetricsSink: Send + Sync {
    /// Increment a named counter
    fn increment(&self, name: &str, value: u64);

    /// Record a named duration (accept latency, commit latency, ...)
    fn record_duration(&self, name: &str, duration: Duration);
}

/// Sink that discards everything; the default for tests
#[derive(Debug, Default, Clone)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _name: &str, _value: u64) {}

    fn record_duration(&self, _name: &str, _duration: Duration) {}
}

/// Sink that emits metrics as tracing events at debug level
#[derive(Debug, Default, Clone)]
pub struct TracingMetrics;

impl MetricsSink for TracingMetrics {
    fn increment(&self, name: &str, value: u64) {
        tracing::debug!(metric = %name, value = value, "📈 METRIC_COUNTER");
    }

    fn record_duration(&self, name: &str, duration: Duration) {
        tracing::debug!(
            metric = %name,
            duration_us = duration.as_micros() as u64,
            "⏱️ METRIC_TIMER"
        );
    }
}

/// Shared handle to a metrics sink
pub type SharedMetrics = Arc<dyn MetricsSink>;

/// Default shared no-op sink
pub fn noop_metrics() -> SharedMetrics {
    Arc::new(NoopMetrics)
}
