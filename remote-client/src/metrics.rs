//! Metrics for remote calls made through the retry wrapper
//!
//! Recorded through the `metrics` facade; installing an exporter is up to the
//! host process.

use metrics::counter;

/// Metric names
pub mod names {
    /// Counter: Remote calls by operation and final status
    pub const REMOTE_CALLS_TOTAL: &str = "remote_client_calls_total";
    /// Counter: Attempts retried after a connection failure
    pub const REMOTE_RETRIES_TOTAL: &str = "remote_client_retries_total";
    /// Counter: Underlying clients created, by endpoint and outcome
    pub const REMOTE_CONNECTS_TOTAL: &str = "remote_client_connects_total";
}

/// Record the final outcome of a wrapped call
pub fn record_call(operation: &str, status: &str) {
    counter!(names::REMOTE_CALLS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Record a retry attempt
pub fn record_retry(operation: &str) {
    counter!(names::REMOTE_RETRIES_TOTAL, "operation" => operation.to_string()).increment(1);
}

/// Record creation of an underlying client
pub fn record_connect(endpoint: &str, success: bool) {
    counter!(names::REMOTE_CONNECTS_TOTAL, "endpoint" => endpoint.to_string(), "success" => success.to_string())
        .increment(1);
}
