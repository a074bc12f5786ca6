//! Outcome of a run: status, results, failures and side output.

use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;
use sifter_core::ComponentKey;
use sifter_core::metrics::events::RunStatus;

use crate::error::{ComponentError, ReductionError, SourceError};
use crate::result::AnalyzerResult;
use crate::side_output::SideOutputRows;

/// Final status of a job or partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    Failed,
    /// The run was aborted before the source was exhausted.
    Cancelled,
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }

    /// Status of several partitions together: any failure wins over a
    /// cancellation, which wins over success.
    pub fn combine(self, other: JobStatus) -> JobStatus {
        match (self, other) {
            (JobStatus::Failed, _) | (_, JobStatus::Failed) => JobStatus::Failed,
            (JobStatus::Cancelled, _) | (_, JobStatus::Cancelled) => JobStatus::Cancelled,
            _ => JobStatus::Succeeded,
        }
    }

    pub(crate) fn run_status(&self) -> RunStatus {
        match self {
            JobStatus::Succeeded => RunStatus::Success,
            JobStatus::Failed => RunStatus::Failed,
            JobStatus::Cancelled => RunStatus::Cancelled,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        })
    }
}

/// Stage or taxonomy class a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Processing,
    Resource,
    Source,
    Close,
    Reduction,
}

impl FailureKind {
    fn of(error: &ComponentError) -> Self {
        match error {
            ComponentError::Configuration { .. } => FailureKind::Configuration,
            ComponentError::Processing { .. } => FailureKind::Processing,
            ComponentError::Resource { .. } => FailureKind::Resource,
        }
    }
}

/// One failure of a run, attributed to a component where possible.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentFailure {
    /// `None` for failures of the record source.
    pub component: Option<ComponentKey>,
    pub partition: usize,
    /// Row id the failure happened on, for row-level failures.
    pub row: Option<u64>,
    pub kind: FailureKind,
    pub message: String,
}

impl ComponentFailure {
    pub fn component(
        component: &ComponentKey,
        partition: usize,
        row: Option<u64>,
        error: &ComponentError,
    ) -> Self {
        Self {
            component: Some(component.clone()),
            partition,
            row,
            kind: FailureKind::of(error),
            message: error.message().to_string(),
        }
    }

    /// A processing error raised for one row.
    pub fn is_row_level(&self) -> bool {
        self.row.is_some() && self.kind == FailureKind::Processing
    }

    pub fn close(component: &ComponentKey, partition: usize, error: &ComponentError) -> Self {
        Self {
            kind: FailureKind::Close,
            ..Self::component(component, partition, None, error)
        }
    }

    pub fn source(partition: usize, error: &SourceError) -> Self {
        Self {
            component: None,
            partition,
            row: None,
            kind: FailureKind::Source,
            message: error.to_string(),
        }
    }

    pub fn reduction(component: &ComponentKey, error: &ReductionError) -> Self {
        Self {
            component: Some(component.clone()),
            partition: 0,
            row: None,
            kind: FailureKind::Reduction,
            message: error.to_string(),
        }
    }

    /// Failure of a partition that never produced a report.
    pub fn partition(partition: usize, message: impl Into<String>) -> Self {
        Self {
            component: None,
            partition,
            row: None,
            kind: FailureKind::Resource,
            message: message.into(),
        }
    }
}

impl fmt::Display for ComponentFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.component {
            Some(component) => write!(f, "{component}")?,
            None => write!(f, "<source>")?,
        }
        write!(f, " [{:?}", self.kind)?;
        if let Some(row) = self.row {
            write!(f, ", row {row}")?;
        }
        write!(f, "]: {}", self.message)
    }
}

/// Result of one partition.
#[derive(Debug, Clone, Default)]
pub struct PartitionReport {
    pub index: usize,
    pub status: Option<JobStatus>,
    pub results: IndexMap<ComponentKey, AnalyzerResult>,
    pub failures: Vec<ComponentFailure>,
    pub side_rows: IndexMap<ComponentKey, SideOutputRows>,
    pub rows_processed: u64,
}

impl PartitionReport {
    pub fn status(&self) -> JobStatus {
        self.status.unwrap_or(JobStatus::Failed)
    }
}

/// Result of a whole job run.
#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub job: String,
    pub status: JobStatus,
    /// Collected or reduced results, in job order. Failed runs still carry
    /// the results of unaffected components.
    pub results: IndexMap<ComponentKey, AnalyzerResult>,
    pub failures: Vec<ComponentFailure>,
    pub side_rows: IndexMap<ComponentKey, SideOutputRows>,
    /// Source rows pulled over all partitions.
    pub rows_processed: u64,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn result(&self, component: &str) -> Option<&AnalyzerResult> {
        self.results.get(&ComponentKey::new(component))
    }

    /// Failures attributed to one component.
    pub fn failures_of(&self, component: &str) -> Vec<&ComponentFailure> {
        self.failures
            .iter()
            .filter(|f| f.component.as_ref().is_some_and(|c| c.id() == component))
            .collect()
    }
}

impl From<PartitionReport> for JobResult {
    fn from(report: PartitionReport) -> Self {
        Self {
            job: String::new(),
            status: report.status(),
            results: report.results,
            failures: report.failures,
            side_rows: report.side_rows,
            rows_processed: report.rows_processed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_combination() {
        use JobStatus::*;
        assert_eq!(Succeeded.combine(Succeeded), Succeeded);
        assert_eq!(Succeeded.combine(Cancelled), Cancelled);
        assert_eq!(Cancelled.combine(Failed), Failed);
        assert_eq!(Failed.combine(Succeeded), Failed);
    }

    #[test]
    fn test_failure_display() {
        let failure = ComponentFailure::component(
            &ComponentKey::new("numbers"),
            0,
            Some(12),
            &ComponentError::processing("not a number: 'x'"),
        );
        assert_eq!(failure.kind, FailureKind::Processing);
        assert_eq!(failure.to_string(), "numbers [Processing, row 12]: not a number: 'x'");

        let source = ComponentFailure::source(
            1,
            &SourceError::Read {
                message: "eof".to_string(),
            },
        );
        assert_eq!(source.to_string(), "<source> [Source]: Failed to read record: eof");
    }

    #[test]
    fn test_report_without_status_is_failed() {
        assert_eq!(PartitionReport::default().status(), JobStatus::Failed);
    }
}
