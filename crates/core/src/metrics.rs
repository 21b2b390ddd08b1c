//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Job pool (submissions, rejections, terminal outcomes)
//! - Workers (polls, poll errors)
//! - Service credential (token refreshes)
//! - External services (catalog, transfer service)

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Job Pool Metrics
// =============================================================================

/// Jobs accepted by the pool, by origin.
pub static JOBS_SUBMITTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ferry_jobs_submitted_total", "Total jobs accepted by the pool"),
        &["origin"], // "request", "recovery"
    )
    .unwrap()
});

/// Jobs refused by the pool, by reason.
pub static JOBS_REJECTED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("ferry_jobs_rejected_total", "Total jobs refused by the pool"),
        &["reason"], // "queue_full", "already_tracked", "shut_down"
    )
    .unwrap()
});

/// Jobs that reached a terminal state, by final status.
pub static JOBS_COMPLETED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ferry_jobs_completed_total",
            "Total jobs that reached a terminal state",
        ),
        &["status"], // "finished", "failed", "cancelled"
    )
    .unwrap()
});

/// Jobs resumed from the catalog at start-up.
pub static JOBS_RECOVERED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ferry_jobs_recovered_total",
        "Total unfinished jobs re-adopted from the catalog",
    )
    .unwrap()
});

// =============================================================================
// Worker Metrics
// =============================================================================

/// Transfer status polls total.
pub static TRANSFER_POLLS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("ferry_transfer_polls_total", "Total transfer status polls").unwrap()
});

/// Transfer status polls that failed.
pub static POLL_ERRORS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "ferry_transfer_poll_errors_total",
        "Total transfer status polls that failed",
    )
    .unwrap()
});

/// Catalog updates that failed, by reason.
pub static CATALOG_UPDATE_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ferry_catalog_update_failures_total",
            "Total catalog job updates that failed",
        ),
        &["reason"], // "credential", "rejected", "transient"
    )
    .unwrap()
});

// =============================================================================
// Credential Metrics
// =============================================================================

/// Service token refreshes by result.
pub static TOKEN_REFRESHES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ferry_token_refreshes_total",
            "Total service credential refreshes",
        ),
        &["result"], // "success", "error"
    )
    .unwrap()
});

// =============================================================================
// External Service Metrics
// =============================================================================

/// External service request duration.
pub static EXTERNAL_SERVICE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "ferry_external_service_duration_seconds",
            "Duration of external service calls",
        )
        .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["service", "operation"],
    )
    .unwrap()
});

/// External service requests total.
pub static EXTERNAL_SERVICE_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "ferry_external_service_requests_total",
            "Total external service requests",
        ),
        &["service", "operation", "status"], // status: "success", "error"
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Record one finished external call.
pub(crate) fn observe_external<T, E>(
    service: &str,
    operation: &str,
    started: std::time::Instant,
    result: &Result<T, E>,
) {
    EXTERNAL_SERVICE_DURATION
        .with_label_values(&[service, operation])
        .observe(started.elapsed().as_secs_f64());
    let status = if result.is_ok() { "success" } else { "error" };
    EXTERNAL_SERVICE_REQUESTS
        .with_label_values(&[service, operation, status])
        .inc();
}

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Pool
        Box::new(JOBS_SUBMITTED.clone()),
        Box::new(JOBS_REJECTED.clone()),
        Box::new(JOBS_COMPLETED.clone()),
        Box::new(JOBS_RECOVERED.clone()),
        // Workers
        Box::new(TRANSFER_POLLS.clone()),
        Box::new(POLL_ERRORS.clone()),
        Box::new(CATALOG_UPDATE_FAILURES.clone()),
        // Credential
        Box::new(TOKEN_REFRESHES.clone()),
        // External services
        Box::new(EXTERNAL_SERVICE_DURATION.clone()),
        Box::new(EXTERNAL_SERVICE_REQUESTS.clone()),
    ]
}
