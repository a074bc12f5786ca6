//! Units of work executed by the [`TaskRunner`](super::TaskRunner).
//!
//! A task is a boxed future tagged with the key of whatever owns it (a
//! component, a partition) so failures can be attributed. A task has no
//! suspended or partial state visible to the runner: it either completes
//! with a value or fails with a [`TaskError`].

use std::fmt;
use std::future::Future;
use std::pin::Pin;

/// A boxed future that produces a [`TaskResult`].
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = TaskResult<T>> + Send + 'a>>;

/// Result type for task execution.
pub type TaskResult<T = ()> = Result<T, TaskError>;

/// Error type for task execution.
#[derive(Debug)]
pub enum TaskError {
    /// The task never ran because the runner was aborted first.
    Cancelled,
    /// Task panicked during execution.
    Panicked(String),
    /// Task failed with an error.
    Failed(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cancelled => write!(f, "task cancelled"),
            Self::Panicked(msg) => write!(f, "task panicked: {msg}"),
            Self::Failed(err) => write!(f, "task failed: {err}"),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl TaskError {
    /// Create a Failed error from any error type.
    pub fn failed<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Failed(Box::new(err))
    }

    /// Check if this is a cancellation error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Check if this is a panic error.
    pub fn is_panicked(&self) -> bool {
        matches!(self, Self::Panicked(_))
    }

    /// Borrow the wrapped error as `E`, if this is a failure of that type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            Self::Failed(err) => err.downcast_ref::<E>(),
            _ => None,
        }
    }

    /// Take the wrapped error back as `E`, returning `self` unchanged otherwise.
    pub fn downcast<E: std::error::Error + 'static>(self) -> Result<E, Self> {
        match self {
            Self::Failed(err) => err.downcast::<E>().map(|e| *e).map_err(Self::Failed),
            other => Err(other),
        }
    }
}

/// A keyed unit of work.
///
/// # Type Parameters
///
/// - `K`: identifies the owner of the task (e.g. a `ComponentKey`)
/// - `T`: the value produced on success
pub struct Task<K, T = ()> {
    /// The key of the owner of this task.
    pub key: K,
    /// The work to execute.
    pub future: BoxFuture<'static, T>,
    /// A type tag for logging/metrics (e.g. "initialize", "partition").
    pub typetag: &'static str,
}

impl<K, T> Task<K, T> {
    /// Create a new task.
    pub fn new<F>(key: K, typetag: &'static str, future: F) -> Self
    where
        F: Future<Output = TaskResult<T>> + Send + 'static,
    {
        Self {
            key,
            future: Box::pin(future),
            typetag,
        }
    }
}

impl<K: fmt::Debug, T> fmt::Debug for Task<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("key", &self.key)
            .field("typetag", &self.typetag)
            .finish_non_exhaustive()
    }
}
