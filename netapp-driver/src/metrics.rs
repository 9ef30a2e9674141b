//! Metrics for driver operations
//!
//! Recorded through the `metrics` facade; installing an exporter is up to
//! the host process.

use std::time::Instant;

use metrics::{counter, gauge, histogram};

use crate::error::Result;

/// Metric names
pub mod names {
    /// Counter: Total number of driver operations by type and status
    pub const NETAPP_OPERATIONS_TOTAL: &str = "netapp_operations_total";
    /// Histogram: Duration of driver operations in seconds
    pub const NETAPP_OPERATION_DURATION_SECONDS: &str = "netapp_operation_duration_seconds";
    /// Gauge: LUNs held by the discovery cache
    pub const NETAPP_DISCOVERED_LUNS: &str = "netapp_discovered_luns";
    /// Gauge: Datasets held by the discovery cache
    pub const NETAPP_DISCOVERED_DATASETS: &str = "netapp_discovered_datasets";
    /// Counter: Status checks issued by poll loops, by kind
    pub const NETAPP_POLLS_TOTAL: &str = "netapp_polls_total";
    /// Counter: Edit transactions rolled back
    pub const NETAPP_ROLLBACKS_TOTAL: &str = "netapp_rollbacks_total";
}

/// Record a driver operation with its result
pub fn record_operation(operation: &str, status: &str, duration_secs: f64) {
    counter!(names::NETAPP_OPERATIONS_TOTAL, "operation" => operation.to_string(), "status" => status.to_string())
        .increment(1);
    histogram!(names::NETAPP_OPERATION_DURATION_SECONDS, "operation" => operation.to_string())
        .record(duration_secs);
}

/// Record the size of the discovery cache
pub fn set_discovered(datasets: usize, luns: usize) {
    gauge!(names::NETAPP_DISCOVERED_DATASETS).set(datasets as f64);
    gauge!(names::NETAPP_DISCOVERED_LUNS).set(luns as f64);
}

/// Record one status check of a poll loop
pub fn record_poll(kind: &'static str) {
    counter!(names::NETAPP_POLLS_TOTAL, "kind" => kind).increment(1);
}

/// Record a rolled back edit transaction
pub fn record_rollback(dataset: &str) {
    counter!(names::NETAPP_ROLLBACKS_TOTAL, "dataset" => dataset.to_string()).increment(1);
}

/// Helper for timing operations
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    /// Start timing an operation
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    /// Complete the operation with success
    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(self.operation, "success", duration);
    }

    /// Complete the operation with failure
    pub fn failure(self, error_code: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_operation(self.operation, error_code, duration);
    }

    /// Complete the operation from its result, passing the result through
    pub fn finish<T>(self, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => self.success(),
            Err(e) => self.failure(e.code()),
        }
        result
    }
}
