//! Transformer adapter over a [`BatchBuffer`].

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sifter_core::{BatchConfig, ComponentKey, TaskRunner};
use snafu::prelude::*;

use super::{BatchBuffer, BatchOperation};
use crate::component::{
    ComponentConfig, ComponentContext, ComponentDescriptor, Lifecycle, Provided, TransformOutput,
    Transformer,
};
use crate::error::{BatchError, ComponentError, ConfigurationSnafu, ProcessingSnafu};
use crate::row::{ColumnId, Row};
use crate::value::Value;

type RowBatchOperation = Arc<dyn BatchOperation<Vec<Value>, Vec<Value>>>;

/// Per-component overrides of the engine's batch defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchTransformerConfig {
    #[serde(default)]
    pub max_batch_size: Option<usize>,
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
}

/// Transformer that sends its input values through a batch operation.
///
/// The operation receives the input column values of many rows and must
/// return one list of output values per row, one value per output column.
///
/// A partition dispatches its rows one at a time, so a batch only fills up
/// with rows of concurrent callers such as other partitions. A lone
/// partition flushes one row per `flush_interval_ms`; keep the interval
/// short for single-source jobs.
pub struct BatchTransformer {
    operation: RowBatchOperation,
    key: ComponentKey,
    inputs: Vec<ColumnId>,
    outputs: usize,
    overrides: BatchTransformerConfig,
    batch: BatchConfig,
    runner: Option<TaskRunner>,
    buffer: Option<BatchBuffer<Vec<Value>, Vec<Value>>>,
}

impl BatchTransformer {
    pub fn new(operation: RowBatchOperation) -> Self {
        Self {
            operation,
            key: ComponentKey::new("batch"),
            inputs: Vec::new(),
            outputs: 0,
            overrides: BatchTransformerConfig::default(),
            batch: BatchConfig::default(),
            runner: None,
            buffer: None,
        }
    }

    pub fn descriptor(name: &str) -> ComponentDescriptor {
        ComponentDescriptor::transformer(name)
            .property("max_batch_size", false)
            .property("flush_interval_ms", false)
            .provides(Provided::TaskRunner)
            .with_validate()
    }
}

#[async_trait]
impl Lifecycle for BatchTransformer {
    fn configure(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        self.inputs = config.inputs.iter().map(|c| c.id).collect();
        self.outputs = config.outputs.len();
        self.overrides = config.properties()?;
        Ok(())
    }

    fn inject(&mut self, context: &ComponentContext) {
        self.key = context.key.clone();
        self.batch = context.config.batch.clone();
        if let Some(size) = self.overrides.max_batch_size {
            self.batch.max_batch_size = size;
        }
        if let Some(interval) = self.overrides.flush_interval_ms {
            self.batch.flush_interval_ms = interval;
        }
        self.runner = context.runner.clone();
    }

    fn validate(&self) -> Result<(), ComponentError> {
        ensure!(
            self.batch.max_batch_size > 0,
            ConfigurationSnafu {
                message: "max_batch_size must be greater than 0",
            }
        );
        ensure!(
            self.batch.flush_interval_ms > 0,
            ConfigurationSnafu {
                message: "flush_interval_ms must be greater than 0",
            }
        );
        Ok(())
    }

    async fn initialize(&mut self) -> Result<(), ComponentError> {
        let buffer = BatchBuffer::new(self.key.id(), self.operation.clone(), &self.batch);
        if let Some(runner) = &self.runner {
            buffer.start(runner);
        }
        self.buffer = Some(buffer);
        Ok(())
    }

    async fn close(&mut self, _success: bool) -> Result<(), ComponentError> {
        if let Some(buffer) = self.buffer.take() {
            buffer.shutdown().await;
        }
        Ok(())
    }
}

#[async_trait]
impl Transformer for BatchTransformer {
    async fn transform(&mut self, row: &Row) -> Result<TransformOutput, ComponentError> {
        let buffer = self
            .buffer
            .as_ref()
            .context(ConfigurationSnafu {
                message: "batch transformer used before initialize",
            })?;

        let values = buffer
            .enqueue(row.get_all(&self.inputs))
            .await
            .map_err(|e| match e {
                BatchError::Operation { .. } | BatchError::SizeMismatch { .. } => {
                    ComponentError::processing(e.to_string())
                }
                BatchError::Abandoned { .. } | BatchError::ShutDown => {
                    ComponentError::resource(e.to_string())
                }
            })?;
        ensure!(
            values.len() == self.outputs,
            ProcessingSnafu {
                message: format!(
                    "batch operation returned {} values for {} output columns",
                    values.len(),
                    self.outputs
                ),
            }
        );
        Ok(TransformOutput::Values(values))
    }
}
