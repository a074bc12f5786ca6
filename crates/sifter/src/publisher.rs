//! Row processing publisher.
//!
//! One publisher drives one pass over a record source for a job, or for one
//! partition of it:
//!
//! ```text
//! Created -> Initializing -> Running -> Closing -> Done
//!                 \______________\__________\_____-> Failed
//! ```
//!
//! Initialization runs level by level on the task runner; a level only starts
//! when every component of the previous one initialized. Every component
//! whose initialization was started is closed exactly once, in reverse
//! order, whatever happened in between.

use std::collections::HashSet;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use sifter_core::metrics::events::{ComponentErrored, PartitionCompleted, RowsProcessed};
use sifter_core::{EngineConfig, NoopTaskListener, Task, TaskError, TaskRunner, emit};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::component::{ComponentContext, PartitionInfo, Provided};
use crate::dispatch::{RowDispatcher, SharedInstance};
use crate::error::{ComponentError, SourceError};
use crate::job::Job;
use crate::lifecycle::LifecycleHelper;
use crate::listener::ProgressListener;
use crate::report::{ComponentFailure, JobStatus, PartitionReport};
use crate::row::{Row, RowIdGenerator};
use crate::side_output::{DEFAULT_SIDE_OUTPUT_LIMIT, SideOutputCollector};
use crate::source::RecordSource;
use crate::value::Value;

/// Lifecycle state of a publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublisherState {
    Created,
    Initializing,
    Running,
    Closing,
    Done,
    Failed,
}

/// Drives one pass over a record source.
pub struct RowProcessingPublisher {
    job: Arc<Job>,
    config: Arc<EngineConfig>,
    runner: TaskRunner,
    listener: Arc<dyn ProgressListener>,
    helper: LifecycleHelper,
    partition: PartitionInfo,
    side_output_limit: usize,
    state: PublisherState,
}

impl RowProcessingPublisher {
    /// `runner` executes lifecycle hooks and parallel analyzers; aborting it
    /// stops the pull loop.
    pub fn new(
        job: Arc<Job>,
        config: Arc<EngineConfig>,
        runner: TaskRunner,
        listener: Arc<dyn ProgressListener>,
    ) -> Self {
        Self {
            job,
            config,
            runner,
            listener,
            helper: LifecycleHelper::default(),
            partition: PartitionInfo::single(),
            side_output_limit: DEFAULT_SIDE_OUTPUT_LIMIT,
            state: PublisherState::Created,
        }
    }

    pub fn partition(mut self, partition: PartitionInfo) -> Self {
        self.partition = partition;
        self
    }

    pub fn lifecycle(mut self, helper: LifecycleHelper) -> Self {
        self.helper = helper;
        self
    }

    pub fn side_output_limit(mut self, limit: usize) -> Self {
        self.side_output_limit = limit;
        self
    }

    pub fn state(&self) -> PublisherState {
        self.state
    }

    fn transition(&mut self, state: PublisherState) {
        debug!(
            job = self.job.name(),
            partition = %self.partition,
            from = ?self.state,
            to = ?state,
            "Publisher state changed"
        );
        self.state = state;
    }

    /// Run the whole pass. A publisher runs once; later calls return an
    /// empty failed report.
    pub async fn run(&mut self, source: &mut dyn RecordSource) -> PartitionReport {
        let mut report = PartitionReport {
            index: self.partition.index,
            ..PartitionReport::default()
        };
        if self.state != PublisherState::Created {
            report.failures.push(ComponentFailure::partition(
                self.partition.index,
                "publisher already ran",
            ));
            return report;
        }

        let started = Instant::now();
        let job = self.job.clone();
        self.listener.on_job_begin(job.name(), self.partition);

        let instances: Vec<SharedInstance> = job
            .instantiate()
            .into_iter()
            .map(|instance| Arc::new(Mutex::new(instance)))
            .collect();
        let mut side = SideOutputCollector::new(self.side_output_limit);

        self.transition(PublisherState::Initializing);
        let initialized = self.initialize(&instances, &mut side, &mut report).await;

        let status = match initialized {
            Initialized::All(order) => {
                self.transition(PublisherState::Running);
                let status = self.process(source, &instances, &mut report).await;
                self.collect_results(&instances, &mut report).await;
                self.transition(PublisherState::Closing);
                self.close(&instances, &order, status, &mut report).await
            }
            Initialized::Stopped(order, status) => {
                self.transition(PublisherState::Closing);
                self.close(&instances, &order, status, &mut report).await
            }
        };

        report.status = Some(status);
        report.side_rows = side.drain();

        if status.is_success() {
            self.transition(PublisherState::Done);
            self.listener
                .on_job_success(job.name(), self.partition, report.rows_processed);
        } else {
            self.transition(PublisherState::Failed);
            self.listener
                .on_job_failure(job.name(), self.partition, &report.failures);
        }
        emit!(PartitionCompleted {
            duration: started.elapsed(),
            status: status.run_status(),
            job: job.name().to_string(),
        });

        report
    }

    async fn initialize(
        &self,
        instances: &[SharedInstance],
        side: &mut SideOutputCollector,
        report: &mut PartitionReport,
    ) -> Initialized {
        let job = &self.job;
        let mut started: Vec<usize> = Vec::with_capacity(instances.len());

        for level in job.levels() {
            let tasks: Vec<Task<usize, ()>> = level
                .iter()
                .map(|index| {
                    let index = *index;
                    let component = &job.components()[index];
                    let context = ComponentContext {
                        key: component.key.clone(),
                        partition: self.partition,
                        config: self.config.clone(),
                        side_output: component
                            .descriptor
                            .is_provided(Provided::SideOutput)
                            .then(|| side.handle(&component.key)),
                        runner: component
                            .descriptor
                            .is_provided(Provided::TaskRunner)
                            .then(|| self.runner.clone()),
                    };
                    let instance = instances[index].clone();
                    let job = job.clone();
                    let helper = self.helper;
                    Task::new(index, "initialize", async move {
                        let mut instance = instance.lock().await;
                        let component = &job.components()[index];
                        helper
                            .initialize(&mut instance, component, job.columns(), &context)
                            .await
                            .map_err(TaskError::failed)
                    })
                })
                .collect();

            let outcome = self.runner.run_all(tasks, Arc::new(NoopTaskListener)).await;
            started.extend(outcome.completed.iter().map(|(index, ())| *index));

            let mut stopped = None;
            for (index, task_error) in outcome.failed {
                let key = &job.components()[index].key;
                let Some(error) = ComponentError::from_task(task_error) else {
                    debug!(component = %key, "Initialization cancelled before it started");
                    stopped.get_or_insert(JobStatus::Cancelled);
                    continue;
                };
                started.push(index);
                error!(
                    job = job.name(),
                    partition = %self.partition,
                    component = %key,
                    error = %error,
                    "Component failed to initialize"
                );
                self.listener
                    .on_component_error(job.name(), key, None, &error);
                report.failures.push(ComponentFailure::component(
                    key,
                    self.partition.index,
                    None,
                    &error,
                ));
                stopped = Some(JobStatus::Failed);
            }

            if let Some(status) = stopped {
                return Initialized::Stopped(started, status);
            }
        }

        for index in &started {
            self.listener
                .on_component_begin(job.name(), &job.components()[*index].key);
        }
        Initialized::All(started)
    }

    /// The pull loop. Returns the status the rows alone lead to.
    async fn process(
        &self,
        source: &mut dyn RecordSource,
        instances: &[SharedInstance],
        report: &mut PartitionReport,
    ) -> JobStatus {
        let job = &self.job;
        let dispatcher = RowDispatcher::new(
            job.clone(),
            instances.iter().cloned().map(Some).collect(),
            self.runner.clone(),
            self.config.runner.parallel_analyzers,
        );
        let error_handling = &self.config.error_handling;
        let abort = self.runner.abort_token();
        let mut ids = RowIdGenerator::new();
        let mut row_errors = 0usize;

        info!(job = job.name(), partition = %self.partition, "Processing rows");

        let status = loop {
            let next = tokio::select! {
                biased;
                _ = abort.cancelled() => None,
                next = source.next_record() => Some(next),
            };
            let Some(next) = next else {
                info!(
                    job = job.name(),
                    partition = %self.partition,
                    rows = ids.physical_count(),
                    "Run aborted, no more rows are pulled"
                );
                break JobStatus::Cancelled;
            };

            let record = match next {
                Ok(Some(record)) => record,
                Ok(None) => break JobStatus::Succeeded,
                Err(e) => {
                    error!(
                        job = job.name(),
                        partition = %self.partition,
                        error = %e,
                        "Record source failed"
                    );
                    report
                        .failures
                        .push(ComponentFailure::source(self.partition.index, &e));
                    break JobStatus::Failed;
                }
            };
            if record.values.len() != job.source_column_count() {
                let e = SourceError::Arity {
                    expected: job.source_column_count(),
                    found: record.values.len(),
                };
                error!(
                    job = job.name(),
                    partition = %self.partition,
                    error = %e,
                    "Malformed record"
                );
                report
                    .failures
                    .push(ComponentFailure::source(self.partition.index, &e));
                break JobStatus::Failed;
            }

            let mut values = record.values;
            values.resize(job.columns().len(), Value::Null);
            let row = Row::new(ids.next_physical(), values)
                .with_distinct_count(record.distinct_count);

            let errors = dispatcher.dispatch(row, &mut ids).await;
            let rows = ids.physical_count();
            report.rows_processed = rows;
            self.listener
                .on_rows_processed(job.name(), self.partition, rows);
            emit!(RowsProcessed {
                count: 1,
                job: job.name().to_string(),
            });

            let mut fatal = false;
            for row_error in errors {
                let key = &job.components()[row_error.component].key;
                self.listener
                    .on_component_error(job.name(), key, Some(row_error.row), &row_error.error);
                emit!(ComponentErrored {
                    component: key.to_string(),
                    job: job.name().to_string(),
                });
                report.failures.push(ComponentFailure::component(
                    key,
                    self.partition.index,
                    Some(row_error.row),
                    &row_error.error,
                ));
                fatal |= row_error.error.is_fatal();
                row_errors += 1;
            }

            if fatal {
                break JobStatus::Failed;
            }
            if error_handling.max_row_errors > 0 && row_errors >= error_handling.max_row_errors {
                warn!(
                    job = job.name(),
                    partition = %self.partition,
                    row_errors,
                    "Too many row errors, stopping"
                );
                break JobStatus::Failed;
            }
        };

        if status == JobStatus::Succeeded && row_errors > 0 && !error_handling.tolerate_row_errors {
            JobStatus::Failed
        } else {
            status
        }
    }

    /// Take one result from every result-producing component that has not
    /// failed. Tolerated row errors keep the component's partial result.
    async fn collect_results(&self, instances: &[SharedInstance], report: &mut PartitionReport) {
        let job = &self.job;
        let tolerate = self.config.error_handling.tolerate_row_errors;
        let failed: HashSet<&str> = report
            .failures
            .iter()
            .filter(|f| !(tolerate && f.is_row_level()))
            .filter_map(|f| f.component.as_ref().map(|c| c.id()))
            .collect();

        for component in job.components() {
            if component.descriptor.result.is_none() || failed.contains(component.key.id()) {
                continue;
            }
            let mut instance = instances[component.index].lock().await;
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| instance.result()));
            match result {
                Ok(Some(result)) => {
                    self.listener.on_component_success(job.name(), &component.key);
                    report.results.insert(component.key.clone(), result);
                }
                Ok(None) => {
                    warn!(
                        job = job.name(),
                        component = %component.key,
                        "Component produced no result"
                    );
                }
                Err(_) => {
                    warn!(
                        job = job.name(),
                        component = %component.key,
                        "Component panicked producing its result"
                    );
                }
            }
        }
    }

    /// Close every started component in reverse order. Returns the final
    /// status.
    async fn close(
        &self,
        instances: &[SharedInstance],
        started: &[usize],
        status: JobStatus,
        report: &mut PartitionReport,
    ) -> JobStatus {
        let job = &self.job;
        let success = status.is_success();
        let mut first_error = true;

        for index in started.iter().rev() {
            let component = &job.components()[*index];
            let mut instance = instances[*index].lock().await;
            let closed = AssertUnwindSafe(self.helper.close(&mut instance, component, success))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(ComponentError::processing("panicked while closing")));

            if let Err(e) = closed {
                if first_error {
                    first_error = false;
                    warn!(
                        job = job.name(),
                        component = %component.key,
                        error = %e,
                        "Component failed to close"
                    );
                    self.listener.on_component_error(job.name(), &component.key, None, &e);
                    report
                        .failures
                        .push(ComponentFailure::close(&component.key, self.partition.index, &e));
                } else {
                    error!(
                        job = job.name(),
                        component = %component.key,
                        error = %e,
                        "Component failed to close"
                    );
                }
            }
        }

        if !first_error && status == JobStatus::Succeeded {
            JobStatus::Failed
        } else {
            status
        }
    }
}

enum Initialized {
    /// Every component initialized, in this order.
    All(Vec<usize>),
    /// Initialization failed or was cancelled; these components were started.
    Stopped(Vec<usize>, JobStatus),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components;
    use crate::job::{Category, ComponentSpec, Requirement};
    use crate::listener::NoopProgressListener;
    use crate::source::VecSource;

    fn job() -> Arc<Job> {
        Arc::new(
            Job::builder("publisher")
                .source_columns(["name"])
                .component(ComponentSpec::new("not-null").key("present").inputs(["name"]))
                .component(
                    ComponentSpec::new("value-distribution")
                        .key("names")
                        .inputs(["name"])
                        .requires(Requirement::outcome("present", Category::VALID)),
                )
                .build(&components::builtin_registry())
                .unwrap(),
        )
    }

    fn publisher(job: Arc<Job>) -> RowProcessingPublisher {
        RowProcessingPublisher::new(
            job,
            Arc::new(EngineConfig::default()),
            TaskRunner::new(2),
            Arc::new(NoopProgressListener),
        )
    }

    #[tokio::test]
    async fn test_run_reaches_done() {
        let mut publisher = publisher(job());
        let mut source = VecSource::from_rows([
            vec![Value::from("ann")],
            vec![Value::Null],
            vec![Value::from("bob")],
            vec![Value::from("ann")],
        ]);

        let report = publisher.run(&mut source).await;
        assert_eq!(publisher.state(), PublisherState::Done);
        assert_eq!(report.status(), JobStatus::Succeeded);
        assert_eq!(report.rows_processed, 4);

        let names = report.results[&sifter_core::ComponentKey::new("names")]
            .as_value_distribution()
            .unwrap();
        assert_eq!(names.count("ann"), 2);
        assert_eq!(names.count("bob"), 1);
        assert_eq!(names.null_count, 0);
    }

    #[tokio::test]
    async fn test_malformed_record_fails_partition() {
        let mut publisher = publisher(job());
        let mut source = VecSource::from_rows([vec![Value::from("a"), Value::from("b")]]);

        let report = publisher.run(&mut source).await;
        assert_eq!(publisher.state(), PublisherState::Failed);
        assert_eq!(report.status(), JobStatus::Failed);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].component.is_none());
    }

    #[tokio::test]
    async fn test_source_error_fails_partition() {
        let mut publisher = publisher(job());
        let mut source = VecSource::from_rows([vec![Value::from("a")], vec![Value::from("b")]])
            .failing_after(
                1,
                SourceError::Read {
                    message: "connection reset".to_string(),
                },
            );

        let report = publisher.run(&mut source).await;
        assert_eq!(report.status(), JobStatus::Failed);
        assert_eq!(report.rows_processed, 1);
        assert!(report.failures[0].message.contains("connection reset"));
    }

    #[tokio::test]
    async fn test_publisher_runs_once() {
        let mut publisher = publisher(job());
        let mut source = VecSource::default();
        assert!(publisher.run(&mut source).await.status().is_success());

        let again = publisher.run(&mut source).await;
        assert_eq!(again.status(), JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_aborted_runner_cancels_run() {
        let runner = TaskRunner::new(2);
        let mut publisher = RowProcessingPublisher::new(
            job(),
            Arc::new(EngineConfig::default()),
            runner.clone(),
            Arc::new(NoopProgressListener),
        );
        runner.abort();

        let report = publisher.run(&mut VecSource::from_rows([vec![Value::from("a")]])).await;
        assert_eq!(report.status(), JobStatus::Cancelled);
        assert_eq!(report.rows_processed, 0);
        assert_eq!(publisher.state(), PublisherState::Failed);
    }
}
