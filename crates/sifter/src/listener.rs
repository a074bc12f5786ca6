//! Progress notifications during a run.

use sifter_core::{ComponentKey, ProgressConfig};
use tracing::{error, info, warn};

use crate::component::PartitionInfo;
use crate::error::ComponentError;
use crate::report::ComponentFailure;

/// Callbacks from a running partition.
///
/// Called on the partition's own task; implementations must return quickly
/// or they throttle row processing.
pub trait ProgressListener: Send + Sync {
    fn on_job_begin(&self, _job: &str, _partition: PartitionInfo) {}

    /// Called after every source row with the partition-local row count.
    fn on_rows_processed(&self, _job: &str, _partition: PartitionInfo, _rows: u64) {}

    /// A component finished initializing and is about to receive rows.
    fn on_component_begin(&self, _job: &str, _component: &ComponentKey) {}

    /// A component's result was collected.
    fn on_component_success(&self, _job: &str, _component: &ComponentKey) {}

    /// A component failed, on a row or in a lifecycle hook.
    fn on_component_error(
        &self,
        _job: &str,
        _component: &ComponentKey,
        _row: Option<u64>,
        _error: &ComponentError,
    ) {
    }

    fn on_job_success(&self, _job: &str, _partition: PartitionInfo, _rows: u64) {}

    fn on_job_failure(
        &self,
        _job: &str,
        _partition: PartitionInfo,
        _failures: &[ComponentFailure],
    ) {
    }
}

/// Listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopProgressListener;

impl ProgressListener for NoopProgressListener {}

/// Listener that reports progress through `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingProgressListener {
    log_interval_rows: u64,
}

impl LoggingProgressListener {
    /// Log a progress line every `log_interval_rows` rows; 0 disables them.
    pub fn new(log_interval_rows: u64) -> Self {
        Self { log_interval_rows }
    }

    pub fn from_config(config: &ProgressConfig) -> Self {
        Self::new(config.log_interval_rows)
    }
}

impl Default for LoggingProgressListener {
    fn default() -> Self {
        Self::from_config(&ProgressConfig::default())
    }
}

impl ProgressListener for LoggingProgressListener {
    fn on_job_begin(&self, job: &str, partition: PartitionInfo) {
        info!(job, %partition, "Job started");
    }

    fn on_rows_processed(&self, job: &str, partition: PartitionInfo, rows: u64) {
        if self.log_interval_rows > 0 && rows % self.log_interval_rows == 0 {
            info!(job, %partition, rows, "Rows processed");
        }
    }

    fn on_component_error(
        &self,
        job: &str,
        component: &ComponentKey,
        row: Option<u64>,
        error: &ComponentError,
    ) {
        match row {
            Some(row) => warn!(
                job,
                component = %component,
                row,
                error = %error,
                "Component failed on row"
            ),
            None => error!(job, component = %component, error = %error, "Component failed"),
        }
    }

    fn on_job_success(&self, job: &str, partition: PartitionInfo, rows: u64) {
        info!(job, %partition, rows, "Job finished");
    }

    fn on_job_failure(&self, job: &str, partition: PartitionInfo, failures: &[ComponentFailure]) {
        error!(job, %partition, failures = failures.len(), "Job failed");
        for failure in failures {
            error!(job, %partition, failure = %failure, "Failure");
        }
    }
}
