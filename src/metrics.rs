//! Metrics instrumentation for the chain store.
//!
//! Uses the `metrics` crate for backend-agnostic collection. The host
//! process is responsible for choosing the exporter (Prometheus, OTEL, etc.)
//!
//! # Metric Naming Convention
//! - `tierkv_` prefix for all metrics
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Labels
//! - `operation`: contains, get, get_batch, put, put_batch
//! - `tier`: name of the tier that satisfied a read, or `none`
//! - `status`: hit, miss, cached_miss, success, error

use std::time::Instant;

use metrics::{counter, histogram};

/// Record a read outcome and the tier that answered it.
pub fn record_read(operation: &'static str, tier: &str, status: &'static str) {
    counter!(
        "tierkv_reads_total",
        "operation" => operation,
        "tier" => tier.to_string(),
        "status" => status
    )
    .increment(1);
}

/// Record a write outcome.
pub fn record_write(operation: &'static str, status: &'static str) {
    counter!(
        "tierkv_writes_total",
        "operation" => operation,
        "status" => status
    )
    .increment(1);
}

/// Record the number of keys in a batch operation.
pub fn record_batch_size(operation: &'static str, count: usize) {
    histogram!(
        "tierkv_batch_size",
        "operation" => operation
    )
    .record(count as f64);
}

/// A timing guard that records operation latency on drop.
pub struct LatencyTimer {
    operation: &'static str,
    start: Instant,
}

impl LatencyTimer {
    #[must_use]
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }
}

impl Drop for LatencyTimer {
    fn drop(&mut self) {
        histogram!(
            "tierkv_operation_seconds",
            "operation" => self.operation
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}
