//! Metrics and observability utilities
//!
//! Provides metric names and descriptions for the retrieval pipeline and
//! the research orchestrator. The consuming application installs the
//! recorder/exporter; this library only emits.

use metrics::{describe_counter, describe_histogram, Unit};

/// Metrics prefix for all Deepquill metrics
pub const METRICS_PREFIX: &str = "deepquill";

/// Histogram buckets for retrieval latency (in seconds)
pub const RETRIEVAL_BUCKETS: &[f64] = &[
    0.001, // 1ms
    0.005, // 5ms
    0.010, // 10ms
    0.050, // 50ms
    0.100, // 100ms
    0.250, // 250ms
    0.500, // 500ms
    1.000, // 1s
    2.500, // 2.5s
];

/// Histogram buckets for research sessions (LLM-bound, much slower)
pub const SESSION_BUCKETS: &[f64] = &[
    1.0,   // 1s
    5.0,   // 5s
    15.0,  // 15s
    30.0,  // 30s
    60.0,  // 1min
    120.0, // 2min
    300.0, // 5min
];

/// Register all metric descriptions
pub fn register_metrics() {
    // Retrieval metrics
    describe_counter!(
        format!("{}_retrieval_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of retrieval pipeline queries"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "Retrieval pipeline latency in seconds"
    );

    describe_counter!(
        format!("{}_rerank_passthrough_total", METRICS_PREFIX),
        Unit::Count,
        "Rerank calls that degraded to passthrough"
    );

    describe_counter!(
        format!("{}_keyword_fallback_total", METRICS_PREFIX),
        Unit::Count,
        "Retrievals that fell back to vector-only search"
    );

    // Orchestration metrics
    describe_counter!(
        format!("{}_research_sessions_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of research sessions"
    );

    describe_histogram!(
        format!("{}_research_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end research session latency in seconds"
    );

    describe_counter!(
        format!("{}_worker_failures_total", METRICS_PREFIX),
        Unit::Count,
        "Subtasks that produced an error-flagged result"
    );

    describe_counter!(
        format!("{}_plan_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Research plans replaced by the deterministic fallback"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_metrics_is_idempotent() {
        register_metrics();
        register_metrics();
    }

    #[test]
    fn test_bucket_ordering() {
        for pair in RETRIEVAL_BUCKETS.windows(2) {
            assert!(pair[0] < pair[1]);
        }
        for pair in SESSION_BUCKETS.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}
