//! Internal events for engine metrics emission.
//!
//! Each event struct represents a measurable occurrence in a job run and
//! records the corresponding metric when emitted. Job-scoped events carry a
//! `job` label so several jobs in one process stay distinguishable.

use metrics::{counter, histogram};
use std::time::Duration;
use tracing::trace;

/// Trait for internal events that can be emitted as metrics.
pub trait InternalEvent {
    /// Emit this event as a metric.
    fn emit(self);
}

/// Event emitted when source rows have been dispatched.
pub struct RowsProcessed {
    pub count: u64,
    pub job: String,
}

impl InternalEvent for RowsProcessed {
    fn emit(self) {
        trace!(count = self.count, job = %self.job, "Rows processed");
        counter!("sifter_rows_processed_total", "job" => self.job).increment(self.count);
    }
}

/// Event emitted when a component fails on a row.
pub struct ComponentErrored {
    pub component: String,
    pub job: String,
}

impl InternalEvent for ComponentErrored {
    fn emit(self) {
        trace!(component = %self.component, job = %self.job, "Component errored");
        counter!(
            "sifter_component_errors_total",
            "component" => self.component,
            "job" => self.job
        )
        .increment(1);
    }
}

/// What caused a batch buffer flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    /// The periodic flush task fired.
    Scheduled,
    /// A caller found the buffer full.
    BufferFull,
    /// A waiting caller's backoff step elapsed.
    AwaitTimeout,
}

impl FlushTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlushTrigger::Scheduled => "scheduled",
            FlushTrigger::BufferFull => "buffer_full",
            FlushTrigger::AwaitTimeout => "await_timeout",
        }
    }
}

/// Event emitted when a batch buffer hands a batch to its operation.
pub struct BatchFlushed {
    pub size: usize,
    pub trigger: FlushTrigger,
}

impl InternalEvent for BatchFlushed {
    fn emit(self) {
        trace!(size = self.size, trigger = self.trigger.as_str(), "Batch flushed");
        counter!("sifter_batch_flushes_total", "trigger" => self.trigger.as_str()).increment(1);
        histogram!("sifter_batch_size").record(self.size as f64);
    }
}

/// Event emitted for every lookup that consults a lookup cache.
pub struct LookupCacheRequest {
    pub hit: bool,
}

impl InternalEvent for LookupCacheRequest {
    fn emit(self) {
        let outcome = if self.hit { "hit" } else { "miss" };
        trace!(outcome, "Lookup cache request");
        counter!("sifter_lookup_cache_requests_total", "outcome" => outcome).increment(1);
    }
}

/// Final status of a task or partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Success,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Event emitted when a task submitted to the runner finishes.
pub struct TaskFinished {
    pub status: RunStatus,
    pub typetag: &'static str,
}

impl InternalEvent for TaskFinished {
    fn emit(self) {
        trace!(status = self.status.as_str(), typetag = self.typetag, "Task finished");
        counter!(
            "sifter_tasks_total",
            "status" => self.status.as_str(),
            "typetag" => self.typetag
        )
        .increment(1);
    }
}

/// Event emitted when one partition of a job reaches a terminal state.
pub struct PartitionCompleted {
    pub duration: Duration,
    pub status: RunStatus,
    pub job: String,
}

impl InternalEvent for PartitionCompleted {
    fn emit(self) {
        trace!(
            duration_ms = self.duration.as_millis(),
            status = self.status.as_str(),
            job = %self.job,
            "Partition completed"
        );
        histogram!(
            "sifter_partition_duration_seconds",
            "status" => self.status.as_str(),
            "job" => self.job
        )
        .record(self.duration.as_secs_f64());
    }
}
