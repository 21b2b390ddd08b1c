//! Prometheus metrics for observability.
//!
//! This module provides metrics for monitoring the ferry server:
//! - HTTP request metrics (latency, counts, auth failures)
//! - Job pool occupancy (collected dynamically)
//! - Core job, credential and external-service metrics

use once_cell::sync::Lazy;
use prometheus::{
    self, Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use regex_lite::Regex;

/// Global metrics registry.
pub static REGISTRY: Lazy<Registry> = Lazy::new(|| {
    let registry = Registry::new();
    register_metrics(&registry);
    registry
});

// =============================================================================
// HTTP Request Metrics
// =============================================================================

/// HTTP request duration in seconds.
pub static HTTP_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ferry_http_request_duration_seconds",
            "HTTP request duration in seconds",
        )
        .buckets(vec![
            0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
        ]),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests total count.
pub static HTTP_REQUESTS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ferry_http_requests_total", "Total HTTP requests"),
        &["method", "path", "status"],
    )
    .unwrap()
});

/// HTTP requests currently in flight.
pub static HTTP_REQUESTS_IN_FLIGHT: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ferry_http_requests_in_flight",
        "Number of HTTP requests currently being processed",
    )
    .unwrap()
});

/// Caller authentication failures.
pub static AUTH_FAILURES_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ferry_auth_failures_total", "Total authentication failures"),
        &["reason"], // "missing_key", "invalid_key", "catalog_error"
    )
    .unwrap()
});

// =============================================================================
// Pool Metrics (collected dynamically)
// =============================================================================

/// Workers currently running.
pub static POOL_ACTIVE: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("ferry_pool_active_jobs", "Number of jobs with a running worker").unwrap()
});

/// Jobs admitted and waiting for a worker slot.
pub static POOL_QUEUED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ferry_pool_queued_jobs",
        "Number of admitted jobs waiting for a worker slot",
    )
    .unwrap()
});

/// Configured worker slots.
pub static POOL_MAX_CONCURRENCY: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "ferry_pool_max_concurrency",
        "Maximum number of concurrently tracked transfers",
    )
    .unwrap()
});

// =============================================================================
// Registration
// =============================================================================

fn register_metrics(registry: &Registry) {
    // HTTP
    registry
        .register(Box::new(HTTP_REQUEST_DURATION.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
        .unwrap();
    registry
        .register(Box::new(HTTP_REQUESTS_IN_FLIGHT.clone()))
        .unwrap();
    registry
        .register(Box::new(AUTH_FAILURES_TOTAL.clone()))
        .unwrap();

    // Pool
    registry.register(Box::new(POOL_ACTIVE.clone())).unwrap();
    registry.register(Box::new(POOL_QUEUED.clone())).unwrap();
    registry
        .register(Box::new(POOL_MAX_CONCURRENCY.clone()))
        .unwrap();

    // Core metrics (jobs, credential, external services)
    for metric in ferry_core::metrics::all_metrics() {
        registry.register(metric).unwrap();
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Update gauges from current application state before encoding.
pub fn collect_dynamic_metrics(state: &crate::state::AppState) {
    let status = state.pool().status();
    POOL_ACTIVE.set(status.active as i64);
    POOL_QUEUED.set(status.queued as i64);
    POOL_MAX_CONCURRENCY.set(status.max_concurrency as i64);
}

static UUID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}")
        .unwrap()
});
static OBJECT_ID: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b[0-9a-fA-F]{24}\b").unwrap());
static NUMERIC: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+(/|$)").unwrap());

/// Normalize a path for metric labels (replace job ids with placeholders).
pub fn normalize_path(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("/api/v1/transfer/") {
        if !rest.is_empty() {
            return "/api/v1/transfer/{id}".to_string();
        }
    }
    let result = UUID.replace_all(path, "{id}");
    let result = OBJECT_ID.replace_all(&result, "{id}");
    let result = NUMERIC.replace_all(&result, "/{id}$1");
    result.to_string()
}
