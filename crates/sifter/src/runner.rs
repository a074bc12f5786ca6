//! Job runner.
//!
//! Runs a job over one record source, or over several partitions whose
//! partial results are reduced into one [`JobResult`]. Partitions never share
//! mutable state; their results only meet in the reducer once every
//! partition has completed.

use std::sync::Arc;
use std::time::Instant;

use indexmap::IndexMap;
use sifter_core::{EngineConfig, NoopTaskListener, Task, TaskError, TaskRunner};
use tracing::{error, info};

use crate::component::PartitionInfo;
use crate::error::JobError;
use crate::job::Job;
use crate::lifecycle::LifecycleHelper;
use crate::listener::{LoggingProgressListener, ProgressListener};
use crate::publisher::RowProcessingPublisher;
use crate::report::{ComponentFailure, JobResult, JobStatus, PartitionReport};
use crate::result::{self, AnalyzerResult};
use crate::side_output::DEFAULT_SIDE_OUTPUT_LIMIT;
use crate::sink::ResultSink;
use crate::source::RecordSource;

/// Entry point for running jobs.
pub struct JobRunner {
    config: Arc<EngineConfig>,
    runner: TaskRunner,
    listener: Arc<dyn ProgressListener>,
    side_output_limit: usize,
}

impl JobRunner {
    pub fn new(config: EngineConfig) -> Self {
        let runner = TaskRunner::from_config(&config.runner);
        let listener = Arc::new(LoggingProgressListener::from_config(&config.progress));
        Self {
            config: Arc::new(config),
            runner,
            listener,
            side_output_limit: DEFAULT_SIDE_OUTPUT_LIMIT,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ProgressListener>) -> Self {
        self.listener = listener;
        self
    }

    pub fn with_side_output_limit(mut self, limit: usize) -> Self {
        self.side_output_limit = limit;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn runner(&self) -> &TaskRunner {
        &self.runner
    }

    /// Stop pulling rows in every running partition. Started components are
    /// still closed.
    pub fn abort(&self) {
        info!("Aborting job runner");
        self.runner.abort();
    }

    fn publisher(&self, job: Arc<Job>) -> RowProcessingPublisher {
        RowProcessingPublisher::new(
            job,
            self.config.clone(),
            self.runner.child(),
            self.listener.clone(),
        )
        .side_output_limit(self.side_output_limit)
    }

    /// Run `job` over a single source. Results reach `sink` only when the run
    /// succeeded.
    pub async fn run(
        &self,
        job: Arc<Job>,
        source: &mut dyn RecordSource,
        sink: &dyn ResultSink,
    ) -> JobResult {
        let started = Instant::now();
        let report = self.publisher(job.clone()).run(source).await;
        let result = JobResult {
            job: job.name().to_string(),
            ..JobResult::from(report)
        };
        self.finish(result, sink, started).await
    }

    /// Run `job` over several partitions concurrently and reduce their
    /// partial results.
    ///
    /// Jobs with a non-distributable component are refused before any
    /// partition starts. A result is only reduced when every partition
    /// produced a partial for it.
    pub async fn run_partitioned(
        &self,
        job: Arc<Job>,
        sources: Vec<Box<dyn RecordSource>>,
        sink: &dyn ResultSink,
    ) -> Result<JobResult, JobError> {
        job.ensure_distributable()?;

        let started = Instant::now();
        let count = sources.len();
        info!(job = job.name(), partitions = count, "Starting partitioned job");

        let tasks: Vec<Task<usize, PartitionReport>> = sources
            .into_iter()
            .enumerate()
            .map(|(index, mut source)| {
                let mut publisher = self
                    .publisher(job.clone())
                    .partition(PartitionInfo { index, count })
                    .lifecycle(LifecycleHelper::new(false));
                Task::new(index, "partition", async move {
                    Ok(publisher.run(source.as_mut()).await)
                })
            })
            .collect();

        let outcome = self.runner.run_all(tasks, Arc::new(NoopTaskListener)).await;

        let mut reports: Vec<PartitionReport> =
            outcome.completed.into_iter().map(|(_, report)| report).collect();
        for (index, task_error) in outcome.failed {
            reports.push(lost_partition(index, task_error));
        }
        reports.sort_by_key(|r| r.index);

        Ok(self.finish(self.reduce(&job, reports), sink, started).await)
    }

    fn reduce(&self, job: &Job, reports: Vec<PartitionReport>) -> JobResult {
        let mut result = JobResult {
            job: job.name().to_string(),
            status: JobStatus::Succeeded,
            results: IndexMap::new(),
            failures: Vec::new(),
            side_rows: IndexMap::new(),
            rows_processed: 0,
        };

        for component in job.components() {
            let partials: Vec<AnalyzerResult> = reports
                .iter()
                .filter_map(|r| r.results.get(&component.key).cloned())
                .collect();
            if partials.len() < reports.len() {
                // Some partition lost this component; its failure is reported there.
                continue;
            }
            let Some(kind) = component
                .descriptor
                .result
                .or_else(|| partials.first().map(AnalyzerResult::kind))
            else {
                continue;
            };

            match result::reduce(kind, &partials) {
                Ok(reduced) => {
                    result.results.insert(component.key.clone(), reduced);
                }
                Err(e) => {
                    error!(
                        component = %component.key,
                        error = %e,
                        "Failed to reduce partial results"
                    );
                    result
                        .failures
                        .push(ComponentFailure::reduction(&component.key, &e));
                    result.status = JobStatus::Failed;
                }
            }
        }

        for report in reports {
            result.status = result.status.combine(report.status());
            result.rows_processed += report.rows_processed;
            result.failures.extend(report.failures);
            for (key, rows) in report.side_rows {
                result
                    .side_rows
                    .entry(key)
                    .or_default()
                    .extend(rows, self.side_output_limit);
            }
        }

        result
    }

    async fn finish(
        &self,
        result: JobResult,
        sink: &dyn ResultSink,
        started: Instant,
    ) -> JobResult {
        if result.is_success() {
            for (key, analyzer_result) in &result.results {
                sink.accept(key, analyzer_result).await;
            }
        }

        info!(
            job = %result.job,
            status = %result.status,
            rows = result.rows_processed,
            results = result.results.len(),
            failures = result.failures.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Job completed"
        );
        result
    }
}

/// Report for a partition whose task never produced one.
fn lost_partition(index: usize, error: TaskError) -> PartitionReport {
    let status = if error.is_cancelled() {
        JobStatus::Cancelled
    } else {
        JobStatus::Failed
    };
    PartitionReport {
        index,
        status: Some(status),
        failures: vec![ComponentFailure::partition(index, error.to_string())],
        ..PartitionReport::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{ComponentDescriptor, ComponentInstance, ComponentRegistry};
    use crate::components::{self, RowCountAnalyzer};
    use crate::job::ComponentSpec;
    use crate::listener::NoopProgressListener;
    use crate::lookup::{MemoryDatastore, MemoryTable};
    use crate::sink::CollectingSink;
    use crate::source::VecSource;
    use crate::value::Value;
    use sifter_core::ComponentKey;

    fn job_runner() -> JobRunner {
        JobRunner::new(EngineConfig::default()).with_listener(Arc::new(NoopProgressListener))
    }

    fn counting_job() -> Arc<Job> {
        Arc::new(
            Job::builder("count")
                .source_columns(["name"])
                .component(ComponentSpec::new("row-count").key("rows"))
                .component(ComponentSpec::new("value-distribution").key("names").inputs(["name"]))
                .build(&components::builtin_registry())
                .unwrap(),
        )
    }

    fn source(values: &[&str]) -> Box<dyn RecordSource> {
        Box::new(VecSource::from_rows(
            values.iter().map(|v| vec![Value::from(*v)]),
        ))
    }

    #[tokio::test]
    async fn test_run_delivers_results_to_sink() {
        let sink = CollectingSink::new();
        let mut source = VecSource::from_rows([vec![Value::from("a")], vec![Value::from("b")]]);

        let result = job_runner().run(counting_job(), &mut source, &sink).await;
        assert!(result.is_success());
        assert_eq!(result.job, "count");
        assert_eq!(result.rows_processed, 2);
        assert_eq!(sink.get("rows").unwrap().as_row_count().unwrap().count, 2);
    }

    #[tokio::test]
    async fn test_partitions_are_reduced() {
        let sink = CollectingSink::new();
        let result = job_runner()
            .run_partitioned(
                counting_job(),
                vec![source(&["a", "b"]), source(&["a"]), source(&[])],
                &sink,
            )
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.rows_processed, 3);
        assert_eq!(result.result("rows").unwrap().as_row_count().unwrap().count, 3);
        let names = result.result("names").unwrap().as_value_distribution().unwrap();
        assert_eq!(names.count("a"), 2);
        assert_eq!(names.count("b"), 1);
        assert_eq!(sink.results().len(), 2);
    }

    #[tokio::test]
    async fn test_zero_partitions_give_empty_results() {
        let result = job_runner()
            .run_partitioned(counting_job(), Vec::new(), &CollectingSink::new())
            .await
            .unwrap();
        assert!(result.is_success());
        assert_eq!(result.result("rows").unwrap().as_row_count().unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_not_distributable_job_is_refused() {
        let mut registry = ComponentRegistry::new();
        registry.register(
            ComponentDescriptor::analyzer("local-count", crate::result::ResultKind::RowCount)
                .inputs(0, None)
                .not_distributable(),
            || ComponentInstance::analyzer(RowCountAnalyzer::default()),
        );
        let job = Arc::new(
            Job::builder("local")
                .source_columns(["a"])
                .component(ComponentSpec::new("local-count"))
                .build(&registry)
                .unwrap(),
        );

        let err = job_runner()
            .run_partitioned(job, vec![source(&["x"])], &CollectingSink::new())
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::NotDistributable { .. }));
    }

    #[tokio::test]
    async fn test_side_output_limit_applies_to_reduced_rows() {
        let mut registry = components::builtin_registry();
        let datastore = MemoryDatastore::new([(
            "countries".to_string(),
            MemoryTable::new(["code"]).row([Value::from("DK")]),
        )]);
        components::register_table_lookup(&mut registry, Arc::new(datastore));
        let job = Arc::new(
            Job::builder("lookups")
                .source_columns(["name"])
                .component(
                    ComponentSpec::new("table-lookup")
                        .key("lookup")
                        .inputs(["name"])
                        .outputs(["code"])
                        .property("table", "countries")
                        .property("condition_columns", vec!["code"])
                        .property("output_columns", vec!["code"]),
                )
                .build(&registry)
                .unwrap(),
        );

        let result = job_runner()
            .with_side_output_limit(1)
            .run_partitioned(
                job,
                vec![source(&["XX", "YY"]), source(&["ZZ"])],
                &CollectingSink::new(),
            )
            .await
            .unwrap();
        assert!(result.is_success());
        let misses = &result.side_rows[&ComponentKey::new("lookup")];
        assert_eq!(misses.rows, vec![vec![Value::from("XX")]]);
        assert_eq!(misses.dropped, 2);
    }

    #[tokio::test]
    async fn test_failed_run_skips_sink() {
        let sink = CollectingSink::new();
        let mut source = VecSource::from_rows([vec![Value::from("a"), Value::from("extra")]]);

        let result = job_runner().run(counting_job(), &mut source, &sink).await;
        assert_eq!(result.status, JobStatus::Failed);
        assert!(sink.results().is_empty());
    }
}
