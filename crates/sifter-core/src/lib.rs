//! sifter-core: Shared runtime primitives for the sifter engine.
//!
//! This crate holds the pieces of the engine that do not know anything about
//! rows, components or results:
//!
//! - `config/` - Engine configuration, component keys and environment variable interpolation
//! - `metrics/` - Internal metric events and the `emit!` macro
//! - `topology/` - Tasks, the bounded task runner and timer-driven scheduled tasks
//! - `tracing` - Subscriber initialization for hosts and tests
//! - `error` - Configuration errors

pub mod config;
pub mod error;
pub mod metrics;
pub mod topology;
pub mod tracing;

// Re-export commonly used items
pub use config::{
    BatchConfig, ComponentKey, EngineConfig, ErrorHandlingConfig, LookupCacheConfig,
    ProgressConfig, RunnerConfig,
};
pub use error::ConfigError;
pub use topology::{
    BatchOutcome, NoopTaskListener, ScheduledTask, Task, TaskError, TaskListener, TaskResult,
    TaskRunner,
};
pub use tracing::init_tracing;
