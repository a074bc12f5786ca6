//! Task execution primitives shared by the engine.

mod runner;
mod task;

pub use runner::{BatchOutcome, NoopTaskListener, ScheduledTask, TaskListener, TaskRunner};
pub use task::{BoxFuture, Task, TaskError, TaskResult};
