//! Bounded task execution.
//!
//! The runner executes [`Task`]s on the tokio runtime with at most
//! `max_concurrency` of them running at once, notifies a [`TaskListener`]
//! around each one, and turns panics into [`TaskError::Panicked`] instead of
//! losing them. Scheduled tasks run outside the bound so housekeeping can
//! never be starved by the work it is supposed to unblock.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::task::{Task, TaskError, TaskResult};
use crate::config::RunnerConfig;
use crate::emit;
use crate::metrics::events::{RunStatus, TaskFinished};

/// Callbacks around task execution.
///
/// Invoked from whichever worker runs the task, so implementations must be
/// cheap and must not block.
pub trait TaskListener<K>: Send + Sync {
    /// Called right before the task starts executing.
    fn on_begin(&self, _key: &K) {}
    /// Called after the task completed successfully.
    fn on_complete(&self, _key: &K) {}
    /// Called after the task failed.
    fn on_error(&self, _key: &K, _error: &TaskError) {}
}

/// Listener that ignores every notification.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTaskListener;

impl<K> TaskListener<K> for NoopTaskListener {}

/// Outcome of [`TaskRunner::run_all`], in submission order.
#[derive(Debug)]
pub struct BatchOutcome<K, T> {
    pub completed: Vec<(K, T)>,
    pub failed: Vec<(K, TaskError)>,
}

/// Bounded worker pool over the tokio runtime.
///
/// Cloning is cheap; clones share the same bound and abort state.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    semaphore: Arc<Semaphore>,
    max_concurrency: usize,
    abort: CancellationToken,
}

impl TaskRunner {
    /// Create a runner executing at most `max_concurrency` tasks at once.
    pub fn new(max_concurrency: usize) -> Self {
        let max_concurrency = max_concurrency.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            max_concurrency,
            abort: CancellationToken::new(),
        }
    }

    /// Create a runner from the `runner` config section.
    pub fn from_config(config: &RunnerConfig) -> Self {
        Self::new(config.max_concurrency)
    }

    /// A runner with its own worker bound that is aborted together with `self`.
    ///
    /// Work submitted from inside a task must go to a child runner, otherwise
    /// a parent task holding a permit can wait forever on its own children.
    pub fn child(&self) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(self.max_concurrency)),
            max_concurrency: self.max_concurrency,
            abort: self.abort.child_token(),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Request a job-wide abort.
    ///
    /// Tasks that already started run to completion; tasks still waiting for
    /// a worker fail with [`TaskError::Cancelled`].
    pub fn abort(&self) {
        self.abort.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// Token that fires when [`abort`](Self::abort) is called.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// Submit a task, returning a handle that resolves to its key and result.
    pub fn spawn<K, T>(
        &self,
        task: Task<K, T>,
        listener: Arc<dyn TaskListener<K>>,
    ) -> JoinHandle<(K, TaskResult<T>)>
    where
        K: Send + 'static,
        T: Send + 'static,
    {
        let semaphore = self.semaphore.clone();
        let abort = self.abort.clone();
        let Task {
            key,
            future,
            typetag,
        } = task;

        tokio::spawn(async move {
            let permit = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                permit = semaphore.acquire_owned() => permit.ok(),
            };
            let Some(_permit) = permit else {
                let error = TaskError::Cancelled;
                listener.on_error(&key, &error);
                emit!(TaskFinished {
                    status: RunStatus::Cancelled,
                    typetag,
                });
                return (key, Err(error));
            };

            listener.on_begin(&key);
            let result = match AssertUnwindSafe(future).catch_unwind().await {
                Ok(result) => result,
                Err(payload) => Err(TaskError::Panicked(panic_message(payload.as_ref()))),
            };

            match &result {
                Ok(_) => {
                    listener.on_complete(&key);
                    emit!(TaskFinished {
                        status: RunStatus::Success,
                        typetag,
                    });
                }
                Err(error) => {
                    listener.on_error(&key, error);
                    emit!(TaskFinished {
                        status: if error.is_cancelled() {
                            RunStatus::Cancelled
                        } else {
                            RunStatus::Failed
                        },
                        typetag,
                    });
                }
            }
            (key, result)
        })
    }

    /// Run every task to completion and collect all outputs and all errors.
    ///
    /// A failing task never cancels its siblings.
    pub async fn run_all<K, T>(
        &self,
        tasks: Vec<Task<K, T>>,
        listener: Arc<dyn TaskListener<K>>,
    ) -> BatchOutcome<K, T>
    where
        K: Clone + Send + 'static,
        T: Send + 'static,
    {
        let handles: Vec<(K, JoinHandle<(K, TaskResult<T>)>)> = tasks
            .into_iter()
            .map(|task| (task.key.clone(), self.spawn(task, listener.clone())))
            .collect();

        let mut outcome = BatchOutcome {
            completed: Vec::with_capacity(handles.len()),
            failed: Vec::new(),
        };

        for (key, handle) in handles {
            match handle.await {
                Ok((key, Ok(value))) => outcome.completed.push((key, value)),
                Ok((key, Err(error))) => outcome.failed.push((key, error)),
                Err(join_error) => {
                    let error = if join_error.is_panic() {
                        TaskError::Panicked(panic_message(join_error.into_panic().as_ref()))
                    } else {
                        TaskError::Cancelled
                    };
                    outcome.failed.push((key, error));
                }
            }
        }

        outcome
    }

    /// Run `tick` every `period` until the returned handle is stopped or dropped.
    ///
    /// The first run happens one full period after scheduling. A tick that
    /// overruns delays the next one instead of bunching them up.
    pub fn schedule<F, Fut>(
        &self,
        name: &'static str,
        period: Duration,
        mut tick: F,
    ) -> ScheduledTask
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        let handle = tokio::spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            debug!(task = name, period_ms = period.as_millis(), "Scheduled task started");

            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if AssertUnwindSafe(tick()).catch_unwind().await.is_err() {
                            warn!(task = name, "Scheduled task tick panicked");
                        }
                    }
                }
            }

            debug!(task = name, "Scheduled task stopped");
        });

        ScheduledTask {
            name,
            cancel,
            handle: Some(handle),
        }
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::from_config(&RunnerConfig::default())
    }
}

/// Handle to a recurring task created by [`TaskRunner::schedule`].
///
/// Dropping the handle stops the task.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledTask {
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Stop the task and wait for an in-progress tick to finish.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
            && e.is_panic()
        {
            warn!(task = self.name, "Scheduled task panicked while stopping");
        }
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct RecordingListener {
        events: Mutex<Vec<String>>,
    }

    impl TaskListener<String> for RecordingListener {
        fn on_begin(&self, key: &String) {
            self.events.lock().unwrap().push(format!("begin:{key}"));
        }

        fn on_complete(&self, key: &String) {
            self.events.lock().unwrap().push(format!("complete:{key}"));
        }

        fn on_error(&self, key: &String, _error: &TaskError) {
            self.events.lock().unwrap().push(format!("error:{key}"));
        }
    }

    #[derive(Debug)]
    struct Failure;

    impl std::fmt::Display for Failure {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "failure")
        }
    }

    impl std::error::Error for Failure {}

    #[tokio::test]
    async fn test_run_all_collects_outputs_and_errors() {
        let runner = TaskRunner::new(2);
        let listener = Arc::new(RecordingListener::default());

        let tasks = vec![
            Task::new("a".to_string(), "test", async { Ok(1) }),
            Task::new("b".to_string(), "test", async {
                Err(TaskError::failed(Failure))
            }),
            Task::new("c".to_string(), "test", async { Ok(3) }),
        ];

        let outcome = runner.run_all(tasks, listener.clone()).await;
        assert!(!outcome.failed.is_empty());
        assert_eq!(
            outcome.completed,
            vec![("a".to_string(), 1), ("c".to_string(), 3)]
        );
        assert_eq!(outcome.failed.len(), 1);
        assert_eq!(outcome.failed[0].0, "b");

        let events = listener.events.lock().unwrap();
        assert!(events.contains(&"begin:b".to_string()));
        assert!(events.contains(&"error:b".to_string()));
        assert!(events.contains(&"complete:a".to_string()));
        assert_eq!(events.len(), 6);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let runner = TaskRunner::new(2);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<Task<String>> = (0..8)
            .map(|i| {
                let running = running.clone();
                let peak = peak.clone();
                Task::new(format!("t{i}"), "test", async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
            })
            .collect();

        let outcome = runner.run_all(tasks, Arc::new(NoopTaskListener)).await;
        assert!(outcome.failed.is_empty());
        assert_eq!(outcome.completed.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_panic_becomes_error() {
        let runner = TaskRunner::new(1);
        let task: Task<String, ()> = Task::new("p".to_string(), "test", async {
            if true {
                panic!("kaboom");
            }
            Ok(())
        });

        let (key, result) = runner
            .spawn(task, Arc::new(NoopTaskListener))
            .await
            .unwrap();
        assert_eq!(key, "p");
        match result {
            Err(TaskError::Panicked(msg)) => assert_eq!(msg, "kaboom"),
            other => panic!("Expected panic error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_abort_cancels_waiting_tasks() {
        let runner = TaskRunner::new(1);
        let gate = Arc::new(tokio::sync::Notify::new());

        let blocker = {
            let gate = gate.clone();
            runner.spawn(
                Task::new("first".to_string(), "test", async move {
                    gate.notified().await;
                    Ok(())
                }),
                Arc::new(NoopTaskListener),
            )
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        let waiting = runner.spawn(
            Task::new("second".to_string(), "test", async {
                Ok(())
            }),
            Arc::new(NoopTaskListener),
        );
        tokio::time::sleep(Duration::from_millis(10)).await;

        runner.abort();
        assert!(runner.is_aborted());

        let (_, result) = waiting.await.unwrap();
        assert!(result.unwrap_err().is_cancelled());

        // The task that already started is allowed to finish.
        gate.notify_one();
        let (_, result) = blocker.await.unwrap();
        assert!(result.is_ok());
    }

    #[test]
    fn test_child_runner_follows_parent_abort() {
        let parent = TaskRunner::new(3);
        let child = parent.child();
        assert_eq!(child.max_concurrency(), 3);

        child.abort();
        assert!(child.is_aborted());
        assert!(!parent.is_aborted());

        let second = parent.child();
        parent.abort();
        assert!(second.is_aborted());
    }

    #[tokio::test]
    async fn test_schedule_ticks_until_stopped() {
        let runner = TaskRunner::new(1);
        let ticks = Arc::new(AtomicUsize::new(0));

        let scheduled = {
            let ticks = ticks.clone();
            runner.schedule("counter", Duration::from_millis(10), move || {
                let ticks = ticks.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            })
        };

        tokio::time::sleep(Duration::from_millis(55)).await;
        scheduled.stop().await;
        let seen = ticks.load(Ordering::SeqCst);
        assert!(seen >= 2, "expected several ticks, saw {seen}");

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[tokio::test]
    async fn test_dropping_schedule_handle_stops_it() {
        let runner = TaskRunner::new(1);
        let ticks = Arc::new(AtomicUsize::new(0));

        {
            let ticks = ticks.clone();
            let _scheduled = runner.schedule("dropped", Duration::from_millis(5), move || {
                let ticks = ticks.clone();
                async move {
                    ticks.fetch_add(1, Ordering::SeqCst);
                }
            });
        }

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 0);
    }
}
