//! Metrics definitions for the Convo Controller.
//!
//! All metrics follow Prometheus naming conventions:
//! - `convo_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels never carry identifiers. Every label value comes from a fixed set
//! defined in code:
//! - `result`: ok, full, not_allowed, or a `ConvoError` label
//! - `outcome`: applied, stale, invalid_token, absent
//! - `kind`: connected, disconnected
//! - `status`: success, error, timeout

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Initialize Prometheus metrics recorder and return the handle
/// for serving metrics via HTTP.
///
/// Must be called before any metrics are recorded.
///
/// # Errors
///
/// Returns error if Prometheus recorder fails to install (e.g., already installed).
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        // Media-server reservation is an internal call bounded by a few seconds
        .set_buckets_for_metric(
            Matcher::Prefix("convo_media_reserve".to_string()),
            &[
                0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000,
            ],
        )
        .map_err(|e| format!("Failed to set media reserve buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Set the number of conference records held in memory.
///
/// Metric: `convo_conferences_active`
pub fn set_conferences_active(count: usize) {
    // usize to f64 conversion is safe for realistic conference counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("convo_conferences_active").set(count as f64);
}

/// Record evicted idle conferences.
///
/// Metric: `convo_conferences_evicted_total`
pub fn record_conferences_evicted(count: usize) {
    counter!("convo_conferences_evicted_total").increment(count as u64);
}

/// Record a join attempt by result.
///
/// Metric: `convo_join_total`
/// Labels: `result`
pub fn record_join(result: &'static str) {
    counter!("convo_join_total", "result" => result).increment(1);
}

/// Record a leave request by outcome.
///
/// Metric: `convo_leave_total`
/// Labels: `outcome`
pub fn record_leave(outcome: &'static str) {
    counter!("convo_leave_total", "outcome" => outcome).increment(1);
}

/// Record a media-server event by kind and outcome.
///
/// Metric: `convo_media_event_total`
/// Labels: `kind`, `outcome`
pub fn record_media_event(kind: &'static str, outcome: &'static str) {
    counter!("convo_media_event_total", "kind" => kind, "outcome" => outcome).increment(1);
}

/// Record a batched state read.
///
/// Metric: `convo_batch_get_total`
pub fn record_batch_get() {
    counter!("convo_batch_get_total").increment(1);
}

/// Record media-server reservation latency.
///
/// Metric: `convo_media_reserve_duration_seconds`
/// Labels: `status` (success, error, timeout)
pub fn record_media_reserve(status: &'static str, duration: Duration) {
    histogram!("convo_media_reserve_duration_seconds", "status" => status)
        .record(duration.as_secs_f64());
}

/// Record a notification that could not be delivered.
///
/// Metric: `convo_notifications_failed_total`
pub fn record_notification_failed() {
    counter!("convo_notifications_failed_total").increment(1);
}

/// Record a background task panic.
///
/// Metric: `convo_task_panics_total`
/// Labels: `task`
pub fn record_task_panic(task: &'static str) {
    counter!("convo_task_panics_total", "task" => task).increment(1);
}
