//! Prometheus metrics for core components.
//!
//! This module provides metrics for:
//! - Provisioning (registry path, private CA path, teardown)
//! - Task lifecycle (launches, stops, waits)
//! - Retries against external services

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Provisioning Metrics
// =============================================================================

/// Vehicles provisioned by path and result.
pub static VEHICLES_PROVISIONED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fleetsim_vehicles_provisioned_total",
            "Vehicles provisioned",
        ),
        &["path", "result"], // path: "registry", "private_ca"; result: "success", "failed"
    )
    .unwrap()
});

/// Vehicles torn down by result.
pub static VEHICLES_TORN_DOWN: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fleetsim_vehicles_torn_down_total", "Vehicles torn down"),
        &["result"],
    )
    .unwrap()
});

/// Certificates whose deletion still failed after retries.
pub static CERTIFICATES_ORPHANED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "fleetsim_certificates_orphaned_total",
        "Certificates left behind by teardown",
    )
    .unwrap()
});

/// Time from CSR submission to issued certificate.
pub static CERTIFICATE_ISSUE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "fleetsim_certificate_issue_duration_seconds",
            "Duration of private CA issuance per vehicle",
        )
        .buckets(vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0]),
        &["result"],
    )
    .unwrap()
});

// =============================================================================
// Task Metrics
// =============================================================================

/// Tasks launched by result.
pub static TASKS_LAUNCHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fleetsim_tasks_launched_total", "Tasks launched"),
        &["result"], // "running", "not_running"
    )
    .unwrap()
});

/// Tasks stopped by result.
pub static TASKS_STOPPED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fleetsim_tasks_stopped_total", "Tasks stopped"),
        &["result"], // "stopped", "pending"
    )
    .unwrap()
});

/// Waits that ended without every task reaching the target state.
pub static WAIT_TIMEOUTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "fleetsim_task_wait_timeouts_total",
            "Task waits that gave up before all tasks settled",
        ),
        &["target"],
    )
    .unwrap()
});

// =============================================================================
// Retry Metrics
// =============================================================================

/// Retry attempts by operation.
pub static RETRY_ATTEMPTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("fleetsim_retry_attempts_total", "Retries of transient failures"),
        &["operation"],
    )
    .unwrap()
});

/// Get all core metrics for registration.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Provisioning
        Box::new(VEHICLES_PROVISIONED.clone()),
        Box::new(VEHICLES_TORN_DOWN.clone()),
        Box::new(CERTIFICATES_ORPHANED.clone()),
        Box::new(CERTIFICATE_ISSUE_DURATION.clone()),
        // Tasks
        Box::new(TASKS_LAUNCHED.clone()),
        Box::new(TASKS_STOPPED.clone()),
        Box::new(WAIT_TIMEOUTS.clone()),
        // Retries
        Box::new(RETRY_ATTEMPTS.clone()),
    ]
}
