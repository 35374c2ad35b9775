//! Prometheus metrics for reconciliation-service.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

/// Counter for task executions by outcome (completed, failed, rejected).
pub static TASK_EXECUTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_task_executions_total",
        "Total number of reconciliation task executions",
        &["channel", "outcome"]
    )
    .expect("Failed to register TASK_EXECUTIONS")
});

/// Histogram for end-to-end task execution time.
pub static TASK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reconciliation_task_duration_seconds",
        "Reconciliation task execution duration in seconds",
        &["channel"],
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0]
    )
    .expect("Failed to register TASK_DURATION")
});

/// Counter for diff records produced, by diff type.
pub static DIFF_RECORDS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_diff_records_total",
        "Total number of reconciliation records produced",
        &["channel", "diff_type"]
    )
    .expect("Failed to register DIFF_RECORDS")
});

/// Histogram for database query duration.
pub static DB_QUERY_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reconciliation_db_query_duration_seconds",
        "Database query duration in seconds",
        &["operation"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("Failed to register DB_QUERY_DURATION")
});

/// Histogram for calls to the channel source, platform source and report generator.
pub static COLLABORATOR_CALL_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "reconciliation_collaborator_call_duration_seconds",
        "External collaborator call duration in seconds",
        &["operation"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]
    )
    .expect("Failed to register COLLABORATOR_CALL_DURATION")
});

/// Counter for record resolutions.
pub static RECORD_RESOLUTIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_record_resolutions_total",
        "Total number of diff record resolutions",
        &["diff_type"]
    )
    .expect("Failed to register RECORD_RESOLUTIONS")
});

/// Counter for errors.
pub static ERRORS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "reconciliation_errors_total",
        "Total number of errors",
        &["error_type"]
    )
    .expect("Failed to register ERRORS")
});

/// Initialize all metrics (forces lazy initialization).
pub fn init_metrics() {
    Lazy::force(&TASK_EXECUTIONS);
    Lazy::force(&TASK_DURATION);
    Lazy::force(&DIFF_RECORDS);
    Lazy::force(&DB_QUERY_DURATION);
    Lazy::force(&COLLABORATOR_CALL_DURATION);
    Lazy::force(&RECORD_RESOLUTIONS);
    Lazy::force(&ERRORS);
}

/// Get all metrics as Prometheus text format.
pub fn get_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record the outcome of a task execution.
pub fn record_task_execution(channel: &str, outcome: &str) {
    TASK_EXECUTIONS.with_label_values(&[channel, outcome]).inc();
}

pub fn record_task_duration(channel: &str, duration_secs: f64) {
    TASK_DURATION
        .with_label_values(&[channel])
        .observe(duration_secs);
}

pub fn record_diff_records(channel: &str, diff_type: &str, count: u64) {
    DIFF_RECORDS
        .with_label_values(&[channel, diff_type])
        .inc_by(count as f64);
}

pub fn record_resolution(diff_type: &str) {
    RECORD_RESOLUTIONS.with_label_values(&[diff_type]).inc();
}

/// Record an error.
pub fn record_error(error_type: &str) {
    ERRORS.with_label_values(&[error_type]).inc();
}
