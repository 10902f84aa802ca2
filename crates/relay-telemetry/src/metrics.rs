//! Metric name constants and instrument handles for the dispatch pipeline

use std::time::Instant;

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Histogram};

/// Completed `complete` calls, tagged with `outcome` and `backend`
pub const PIPELINE_REQUEST_COUNT: &str = "pipeline.request.count";
/// End-to-end `complete` call duration in seconds
pub const PIPELINE_REQUEST_DURATION: &str = "pipeline.request.duration";
/// Hedge attempts launched beyond the first
pub const PIPELINE_HEDGE_COUNT: &str = "pipeline.hedge.count";
/// Circuit breaker open transitions, tagged with `backend`
pub const PIPELINE_BREAKER_OPEN_COUNT: &str = "pipeline.breaker.open.count";

/// Instrument handles used by the backend pipeline
///
/// Built from the global meter; a no-op meter when no provider is installed,
/// so recording is always safe.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    /// Completed requests by outcome
    pub requests: Counter<u64>,
    /// Request duration histogram (seconds)
    pub request_duration: Histogram<f64>,
    /// Extra hedge attempts launched
    pub hedges: Counter<u64>,
    /// Breaker open transitions
    pub breaker_opens: Counter<u64>,
}

impl PipelineMetrics {
    /// Create instruments from the global meter
    #[must_use]
    pub fn new() -> Self {
        let meter = global::meter("relay");
        Self {
            requests: meter.u64_counter(PIPELINE_REQUEST_COUNT).build(),
            request_duration: meter.f64_histogram(PIPELINE_REQUEST_DURATION).build(),
            hedges: meter.u64_counter(PIPELINE_HEDGE_COUNT).build(),
            breaker_opens: meter.u64_counter(PIPELINE_BREAKER_OPEN_COUNT).build(),
        }
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Record a duration measurement on a histogram
pub fn record_duration(histogram: &Histogram<f64>, start: Instant, attributes: &[opentelemetry::KeyValue]) {
    let duration = start.elapsed().as_secs_f64();
    histogram.record(duration, attributes);
}
