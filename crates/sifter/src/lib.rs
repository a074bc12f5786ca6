//! Sifter: Row-processing execution engine for data profiling jobs.
//!
//! This crate handles:
//! - Building a job graph of filters, transformers and analyzers gated by filter outcomes
//! - Driving one sequential pass over a record source per partition
//! - Component lifecycle with exactly-once close for every started component
//! - Batching rows for latency-sensitive external calls
//! - Caching idempotent table lookups
//! - Reducing partial results of partitioned runs into one job result

pub mod batch;
pub mod component;
pub mod components;
pub mod dispatch;
pub mod error;
pub mod job;
pub mod lifecycle;
pub mod listener;
pub mod lookup;
pub mod publisher;
pub mod report;
pub mod result;
pub mod row;
pub mod runner;
pub mod side_output;
pub mod sink;
pub mod source;
pub mod value;

// Re-export commonly used items
pub use component::{
    Analyzer, ComponentConfig, ComponentContext, ComponentDescriptor, ComponentInstance,
    ComponentKind, ComponentRegistry, Filter, Lifecycle, PartitionInfo, Provided, TransformOutput,
    Transformer,
};
pub use components::builtin_registry;
pub use error::{BatchError, ComponentError, JobError, ReductionError, SourceError};
pub use job::{Category, ComponentSpec, Job, JobDefinition, Requirement};
pub use listener::{LoggingProgressListener, NoopProgressListener, ProgressListener};
pub use publisher::{PublisherState, RowProcessingPublisher};
pub use report::{ComponentFailure, FailureKind, JobResult, JobStatus, PartitionReport};
pub use result::{AnalyzerResult, ResultKind};
pub use row::{Record, Row};
pub use runner::JobRunner;
pub use sink::{CollectingSink, NoopSink, ResultSink};
pub use source::{RecordSource, VecSource};
pub use value::Value;

// Re-export from sifter-core
pub use sifter_core::{ComponentKey, EngineConfig, TaskRunner, init_tracing};
