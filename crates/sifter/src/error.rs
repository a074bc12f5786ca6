//! Error types for the row-processing engine.

use sifter_core::TaskError;
use snafu::prelude::*;

pub use sifter_core::error::ConfigError;

/// Errors raised by component hooks.
///
/// Components do not know how the engine attributes failures, so the
/// variants only carry a message; the engine records which component and
/// which row the error belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ComponentError {
    /// The component is misconfigured and cannot run.
    #[snafu(display("Configuration error: {message}"))]
    Configuration { message: String },

    /// The component failed on a single row.
    #[snafu(display("Processing error: {message}"))]
    Processing { message: String },

    /// An external collaborator of the component failed.
    #[snafu(display("Resource error: {message}"))]
    Resource { message: String },
}

impl ComponentError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
        }
    }

    pub fn resource(message: impl Into<String>) -> Self {
        Self::Resource {
            message: message.into(),
        }
    }

    /// Whether the error ends the whole partition rather than one row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Resource { .. })
    }

    /// The component error behind a failed task. Cancelled tasks never ran
    /// and give `None`; panics become processing errors.
    pub fn from_task(error: TaskError) -> Option<Self> {
        match error.downcast::<ComponentError>() {
            Ok(error) => Some(error),
            Err(TaskError::Cancelled) => None,
            Err(TaskError::Panicked(message)) => {
                Some(Self::processing(format!("panicked: {message}")))
            }
            Err(other) => Some(Self::processing(other.to_string())),
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::Configuration { message }
            | Self::Processing { message }
            | Self::Resource { message } => message,
        }
    }
}

/// Errors detected while building or validating a job graph.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum JobError {
    /// No descriptor is registered under the requested name.
    #[snafu(display("No component descriptor registered as '{name}'"))]
    UnknownDescriptor { name: String },

    /// Two components share a key.
    #[snafu(display("Duplicate component key '{key}'"))]
    DuplicateComponentKey { key: String },

    /// A component reads a column nobody produces.
    #[snafu(display("Component '{component}' reads unknown column '{column}'"))]
    UnknownColumn { component: String, column: String },

    /// A column name is produced twice.
    #[snafu(display("Column '{column}' is defined more than once"))]
    DuplicateColumn { column: String },

    /// A requirement references a component that does not exist.
    #[snafu(display("Component '{component}' requires an outcome of unknown filter '{filter}'"))]
    UnknownFilter { component: String, filter: String },

    /// A requirement references a component that is not a filter.
    #[snafu(display(
        "Component '{component}' requires an outcome of '{filter}', which is not a filter"
    ))]
    NotAFilter { component: String, filter: String },

    /// A requirement references a category the filter never produces.
    #[snafu(display(
        "Component '{component}' requires category '{category}', undeclared by filter '{filter}'"
    ))]
    UnknownCategory {
        component: String,
        filter: String,
        category: String,
    },

    /// A compound requirement lists no outcomes.
    #[snafu(display("Component '{component}' has an empty compound requirement"))]
    EmptyRequirement { component: String },

    /// The number of bound input columns is outside what the descriptor accepts.
    #[snafu(display("Component '{component}' accepts {expected} input columns, got {found}"))]
    InputArity {
        component: String,
        expected: String,
        found: usize,
    },

    /// A transformer declares no output columns, or a non-transformer declares some.
    #[snafu(display("Component '{component}': {message}"))]
    InvalidOutputs { component: String, message: String },

    /// Outcome or column dependencies form a cycle.
    #[snafu(display("Cyclic dependency between components: {components}"))]
    CyclicDependency { components: String },

    /// A partitioned run was requested for a job with a non-distributable component.
    #[snafu(display(
        "Component '{component}' ({descriptor}) is not distributable and cannot run partitioned"
    ))]
    NotDistributable {
        component: String,
        descriptor: String,
    },
}

/// Errors raised when merging partial results.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum ReductionError {
    /// Results of different kinds were presented together.
    #[snafu(display("Cannot reduce a {found} result into a {expected} result"))]
    MismatchedKinds {
        expected: &'static str,
        found: &'static str,
    },

    /// Crosstabs with different dimensions were presented together.
    #[snafu(display("Crosstab dimensions differ: expected [{expected}], found [{found}]"))]
    MismatchedDimensions { expected: String, found: String },

    /// Timelines with different bucket widths were presented together.
    #[snafu(display("Timeline bucket widths differ: expected {expected}, found {found}"))]
    MismatchedBucketWidth {
        expected: &'static str,
        found: &'static str,
    },
}

/// Errors delivered to callers of a batch buffer.
///
/// Every entry of a failed batch receives its own copy of the error.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum BatchError {
    /// The underlying batch operation failed.
    #[snafu(display("Batch operation failed: {message}"))]
    Operation { message: String },

    /// The batch operation returned the wrong number of outputs.
    #[snafu(display("Batch operation returned {found} outputs for {expected} inputs"))]
    SizeMismatch { expected: usize, found: usize },

    /// No output arrived before the caller gave up.
    #[snafu(display("Batch entry abandoned after waiting {waited_ms} ms"))]
    Abandoned { waited_ms: u128 },

    /// The buffer was shut down before the entry could be queued.
    #[snafu(display("Batch buffer is shut down"))]
    ShutDown,
}

/// Errors raised by record sources.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum SourceError {
    /// The source failed to produce the next record.
    #[snafu(display("Failed to read record: {message}"))]
    Read { message: String },

    /// A record does not match the job's source columns.
    #[snafu(display("Record has {found} values, expected {expected}"))]
    Arity { expected: usize, found: usize },
}
