//! Metrics and telemetry for the querier
//!
//! Prometheus metrics for cache effectiveness, query execution latency and
//! post-processing failures. All metrics live in the default registry and
//! are rendered with [`gather_metrics`].

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_histogram_vec,
    CounterVec, Encoder, Gauge, Histogram, HistogramVec, TextEncoder,
};
use std::sync::atomic::{AtomicBool, Ordering};

static ENABLED: AtomicBool = AtomicBool::new(true);

/// Turn the recorders below on or off process-wide
pub fn set_enabled(enabled: bool) {
    ENABLED.store(enabled, Ordering::Relaxed);
}

#[inline]
fn enabled() -> bool {
    ENABLED.load(Ordering::Relaxed)
}

lazy_static! {
    // === Cache ===

    /// Bucket cache lookups by outcome (hit, partial, miss, error)
    pub static ref CACHE_LOOKUPS_TOTAL: CounterVec = register_counter_vec!(
        "querier_cache_lookups_total",
        "Bucket cache lookups by outcome",
        &["outcome"]
    ).unwrap();

    /// Bucket cache writes by outcome
    pub static ref CACHE_PUTS_TOTAL: CounterVec = register_counter_vec!(
        "querier_cache_puts_total",
        "Bucket cache writes by outcome",
        &["outcome"]
    ).unwrap();

    /// Missing ranges returned per lookup
    pub static ref CACHE_MISSING_RANGES: Histogram = register_histogram!(
        "querier_cache_missing_ranges",
        "Number of missing ranges per cache lookup",
        vec![0.0, 1.0, 2.0, 3.0, 5.0, 10.0]
    ).unwrap();

    // === Execution ===

    /// Backend execution latency by request type
    pub static ref QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "querier_query_duration_seconds",
        "Sub-query execution latency in seconds",
        &["kind"],
        vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0]
    ).unwrap();

    /// Composite requests by status
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "querier_requests_total",
        "Composite range requests by status",
        &["status"]
    ).unwrap();

    /// Sub-queries currently executing
    pub static ref INFLIGHT_QUERIES: Gauge = register_gauge!(
        "querier_inflight_queries",
        "Sub-queries currently executing"
    ).unwrap();

    // === Post-processing ===

    /// Formulas skipped because they failed to compile or evaluate
    pub static ref FORMULA_FAILURES_TOTAL: CounterVec = register_counter_vec!(
        "querier_formula_failures_total",
        "Formulas skipped after a compile or evaluation error",
        &["stage"]
    ).unwrap();
}

/// Get metrics in Prometheus text format
///
/// # Returns
///
/// Result containing the formatted metrics string, or an error if encoding fails
pub fn gather_metrics() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| format!("Failed to encode metrics: {}", e))?;

    String::from_utf8(buffer).map_err(|e| format!("Metrics contain invalid UTF-8: {}", e))
}

/// Record a bucket cache lookup
#[inline]
pub fn record_cache_lookup(outcome: &str) {
    if !enabled() {
        return;
    }
    CACHE_LOOKUPS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record a bucket cache write
#[inline]
pub fn record_cache_put(outcome: &str) {
    if !enabled() {
        return;
    }
    CACHE_PUTS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Record the number of missing ranges of one lookup
#[inline]
pub fn observe_missing_ranges(count: usize) {
    if !enabled() {
        return;
    }
    CACHE_MISSING_RANGES.observe(count as f64);
}

/// Record one backend execution
#[inline]
pub fn record_query_execution(kind: &str, duration_secs: f64) {
    if !enabled() {
        return;
    }
    QUERY_DURATION.with_label_values(&[kind]).observe(duration_secs);
}

/// Record the outcome of a composite request
#[inline]
pub fn record_request(success: bool) {
    if !enabled() {
        return;
    }
    let status = if success { "success" } else { "error" };
    REQUESTS_TOTAL.with_label_values(&[status]).inc();
}

/// Record a skipped formula
#[inline]
pub fn record_formula_failure(stage: &str) {
    if !enabled() {
        return;
    }
    FORMULA_FAILURES_TOTAL.with_label_values(&[stage]).inc();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_cache_lookup() {
        record_cache_lookup("hit");
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("querier_cache_lookups_total"));
    }

    #[test]
    fn test_record_query_execution() {
        record_query_execution("time_series", 0.02);
        let metrics = gather_metrics().expect("Failed to gather metrics");
        assert!(metrics.contains("querier_query_duration_seconds"));
    }

    #[test]
    fn test_inflight_gauge() {
        INFLIGHT_QUERIES.inc();
        INFLIGHT_QUERIES.dec();
        assert!(INFLIGHT_QUERIES.get() >= 0.0);
    }
}
