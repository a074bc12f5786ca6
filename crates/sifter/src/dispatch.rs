//! Requirement-gated row dispatch.
//!
//! For every row the dispatcher walks the job's components in execution
//! order. Filters add their outcome for the row, transformers derive the row
//! the following components see, and analyzers consume it. A component only
//! receives the row when its requirement holds for the outcomes produced so
//! far. A transformer that emits several rows continues the walk once per
//! derived row, each with its own copy of the outcomes.
//!
//! A component that fails on a row blocks everything depending on it for
//! that row only; later rows reach it again.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use sifter_core::{NoopTaskListener, Task, TaskError, TaskRunner};
use tokio::sync::Mutex;
use tracing::{debug, trace};

use crate::component::{ComponentInstance, ComponentKind, Filter, TransformOutput};
use crate::error::ComponentError;
use crate::job::{Job, JobComponent, Outcome, OutcomeSet};
use crate::row::{Row, RowIdGenerator};
use crate::value::Value;

/// A shared, lockable component instance.
pub type SharedInstance = Arc<Mutex<ComponentInstance>>;

/// A component failure on one row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    /// Index of the component in the job.
    pub component: usize,
    pub row: u64,
    pub error: ComponentError,
}

struct Frame {
    row: Row,
    outcomes: OutcomeSet,
    /// Components that failed or were skipped because a dependency failed.
    blocked: Vec<bool>,
    /// Next position in the execution order.
    next: usize,
}

impl Frame {
    /// A frame for a row derived from this frame's row, resuming at the same
    /// position.
    fn fork(&self, row: Row) -> Frame {
        Frame {
            row,
            outcomes: self.outcomes.clone(),
            blocked: self.blocked.clone(),
            next: self.next,
        }
    }
}

/// Pushes rows through the initialized components of one partition.
pub struct RowDispatcher {
    job: Arc<Job>,
    instances: Vec<Option<SharedInstance>>,
    runner: TaskRunner,
    parallel_analyzers: bool,
}

impl RowDispatcher {
    /// `instances` is indexed like the job's components; `None` marks a
    /// component that must not receive rows.
    pub fn new(
        job: Arc<Job>,
        instances: Vec<Option<SharedInstance>>,
        runner: TaskRunner,
        parallel_analyzers: bool,
    ) -> Self {
        Self {
            job,
            instances,
            runner,
            parallel_analyzers,
        }
    }

    /// Dispatch one source row.
    ///
    /// Returns the failures of this row. Processing stops at the first fatal
    /// failure, which is then the last element.
    pub async fn dispatch(&self, row: Row, ids: &mut RowIdGenerator) -> Vec<RowError> {
        let order = self.job.order();
        let mut errors = Vec::new();
        let mut stack = vec![Frame {
            row,
            outcomes: OutcomeSet::new(),
            blocked: vec![false; self.job.components().len()],
            next: 0,
        }];

        'frames: while let Some(mut frame) = stack.pop() {
            while frame.next < order.len() {
                let index = order[frame.next];
                frame.next += 1;

                let component = &self.job.components()[index];
                let Some(instance) = self.eligible(component, &mut frame) else {
                    continue;
                };

                if self.parallel_analyzers && component.kind() == ComponentKind::Analyzer {
                    let mut batch = vec![(index, instance)];
                    while let Some(next) = order.get(frame.next).copied() {
                        let next_component = &self.job.components()[next];
                        if next_component.kind() != ComponentKind::Analyzer {
                            break;
                        }
                        frame.next += 1;
                        if let Some(instance) = self.eligible(next_component, &mut frame) {
                            batch.push((next, instance));
                        }
                    }
                    if self.run_analyzers(batch, &frame, &mut errors).await {
                        return errors;
                    }
                    continue;
                }

                let mut guard = instance.lock().await;
                let result = match &mut *guard {
                    ComponentInstance::Filter(filter) => {
                        categorize(component, filter.as_mut(), &frame.row).map(|outcome| {
                            if let Some(outcome) = outcome {
                                frame.outcomes.insert(outcome);
                            }
                        })
                    }
                    ComponentInstance::Transformer(transformer) => {
                        let output = AssertUnwindSafe(transformer.transform(&frame.row))
                            .catch_unwind()
                            .await
                            .unwrap_or_else(|payload| Err(panicked(payload.as_ref())));
                        match output.and_then(|output| check_outputs(component, output)) {
                            Ok(TransformOutput::Values(values)) => {
                                let id = frame.row.id();
                                frame.row = frame.row.derive(id, &component.outputs, values);
                                Ok(())
                            }
                            Ok(TransformOutput::Rows(rows)) => {
                                trace!(
                                    component = %component.key,
                                    row = frame.row.id(),
                                    derived = rows.len(),
                                    "Row replaced by derived rows"
                                );
                                let derived = derive_rows(component, &frame.row, rows, ids);
                                for row in derived.into_iter().rev() {
                                    stack.push(frame.fork(row));
                                }
                                continue 'frames;
                            }
                            Err(e) => Err(e),
                        }
                    }
                    ComponentInstance::Analyzer(analyzer) => {
                        let distinct_count = frame.row.distinct_count();
                        catch(|| analyzer.run(&frame.row, distinct_count))
                    }
                };

                if let Err(error) = result
                    && record(&mut errors, &mut frame, index, error)
                {
                    return errors;
                }
            }
        }

        errors
    }

    /// The instance of `component` when it should consume the frame's row.
    fn eligible(&self, component: &JobComponent, frame: &mut Frame) -> Option<SharedInstance> {
        let Some(instance) = self.instances.get(component.index).cloned().flatten() else {
            frame.blocked[component.index] = true;
            return None;
        };
        if component.dependencies.iter().any(|d| frame.blocked[*d]) {
            frame.blocked[component.index] = true;
            return None;
        }
        if !self.job.is_satisfied(component, &frame.outcomes) {
            return None;
        }
        Some(instance)
    }

    /// Run consecutive analyzers concurrently. Returns true on a fatal failure.
    async fn run_analyzers(
        &self,
        batch: Vec<(usize, SharedInstance)>,
        frame: &Frame,
        errors: &mut Vec<RowError>,
    ) -> bool {
        let tasks: Vec<Task<usize, ()>> = batch
            .into_iter()
            .map(|(index, instance)| {
                let row = frame.row.clone();
                Task::new(index, "analyze", async move {
                    let mut guard = instance.lock().await;
                    match &mut *guard {
                        ComponentInstance::Analyzer(analyzer) => analyzer
                            .run(&row, row.distinct_count())
                            .map_err(TaskError::failed),
                        other => Err(TaskError::failed(ComponentError::configuration(format!(
                            "expected an analyzer instance, found a {}",
                            other.kind()
                        )))),
                    }
                })
            })
            .collect();

        let outcome = self.runner.run_all(tasks, Arc::new(NoopTaskListener)).await;
        let row = frame.row.id();
        for (index, error) in outcome.failed {
            let Some(error) = ComponentError::from_task(error) else {
                let component = &self.job.components()[index].key;
                debug!(component = %component, row, "Analyzer task cancelled");
                continue;
            };
            let fatal = error.is_fatal();
            errors.push(RowError {
                component: index,
                row,
                error,
            });
            if fatal {
                return true;
            }
        }
        false
    }
}

/// Record a failure and block the component for this row. Returns true when
/// the failure is fatal.
fn record(
    errors: &mut Vec<RowError>,
    frame: &mut Frame,
    component: usize,
    error: ComponentError,
) -> bool {
    frame.blocked[component] = true;
    let fatal = error.is_fatal();
    errors.push(RowError {
        component,
        row: frame.row.id(),
        error,
    });
    fatal
}

fn categorize(
    component: &JobComponent,
    filter: &mut dyn Filter,
    row: &Row,
) -> Result<Option<Outcome>, ComponentError> {
    match catch(|| filter.categorize(row))? {
        Some(category) if component.descriptor.categories.contains(&category) => {
            Ok(Some(Outcome::new(component.key.clone(), category)))
        }
        Some(category) => Err(ComponentError::processing(format!(
            "filter produced undeclared category '{category}'"
        ))),
        None => Ok(None),
    }
}

/// Every value list of `output` must fill the component's output columns.
fn check_outputs(
    component: &JobComponent,
    output: TransformOutput,
) -> Result<TransformOutput, ComponentError> {
    let expected = component.outputs.len();
    let found = match &output {
        TransformOutput::Values(values) => Some(values.len()),
        TransformOutput::Rows(rows) => rows.iter().map(Vec::len).find(|len| *len != expected),
    };
    match found {
        Some(found) if found != expected => Err(ComponentError::processing(format!(
            "transformer produced {found} values for {expected} output columns"
        ))),
        _ => Ok(output),
    }
}

fn derive_rows(
    component: &JobComponent,
    parent: &Row,
    rows: Vec<Vec<Value>>,
    ids: &mut RowIdGenerator,
) -> Vec<Row> {
    rows.into_iter()
        .map(|values| parent.derive(ids.next_virtual(), &component.outputs, values))
        .collect()
}

fn catch<T>(f: impl FnOnce() -> Result<T, ComponentError>) -> Result<T, ComponentError> {
    std::panic::catch_unwind(AssertUnwindSafe(f))
        .unwrap_or_else(|payload| Err(panicked(payload.as_ref())))
}

fn panicked(payload: &(dyn Any + Send)) -> ComponentError {
    let message = payload
        .downcast_ref::<&str>()
        .map(|m| (*m).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    ComponentError::processing(format!("panicked: {message}"))
}
