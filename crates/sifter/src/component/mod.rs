//! Component contracts.
//!
//! A job is made of three kinds of components:
//!
//! - [`Filter`] - puts each row into at most one category
//! - [`Transformer`] - derives new column values, or replaces a row with 0..N rows
//! - [`Analyzer`] - accumulates statistics and exposes one result at the end
//!
//! All of them share the [`Lifecycle`] hooks driven by the
//! [`LifecycleHelper`](crate::lifecycle::LifecycleHelper).

pub mod descriptor;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use sifter_core::{ComponentKey, EngineConfig, TaskRunner};

pub use descriptor::{
    CloseHook, ComponentDescriptor, ComponentFactory, ComponentKind, ComponentRegistry,
    DescriptorProvider, InitializeHook, InputArity, PropertyDescriptor, Provided,
};

use crate::error::ComponentError;
use crate::job::Category;
use crate::result::AnalyzerResult;
use crate::row::{Column, Row};
use crate::side_output::SideOutput;
use crate::value::Value;

/// Raw property values of a configured component.
pub type Properties = BTreeMap<String, serde_yaml::Value>;

/// Everything a component is configured with.
#[derive(Debug, Clone)]
pub struct ComponentConfig {
    pub key: ComponentKey,
    pub inputs: Vec<Column>,
    pub outputs: Vec<Column>,
    pub properties: Properties,
}

impl ComponentConfig {
    /// Deserialize the raw properties into a typed configuration struct.
    pub fn properties<T: DeserializeOwned>(&self) -> Result<T, ComponentError> {
        let mapping: serde_yaml::Mapping = self
            .properties
            .iter()
            .map(|(name, value)| (serde_yaml::Value::String(name.clone()), value.clone()))
            .collect();
        serde_yaml::from_value(serde_yaml::Value::Mapping(mapping))
            .map_err(|e| ComponentError::configuration(format!("invalid properties: {e}")))
    }
}

/// Position of a partition among its siblings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionInfo {
    pub index: usize,
    pub count: usize,
}

impl PartitionInfo {
    pub fn single() -> Self {
        Self { index: 0, count: 1 }
    }
}

impl fmt::Display for PartitionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.index + 1, self.count)
    }
}

/// Collaborators provided to a component before it initializes.
///
/// Optional collaborators are only present when the descriptor asks for them.
#[derive(Debug, Clone)]
pub struct ComponentContext {
    pub key: ComponentKey,
    pub partition: PartitionInfo,
    pub config: Arc<EngineConfig>,
    pub side_output: Option<SideOutput>,
    pub runner: Option<TaskRunner>,
}

/// Hooks every component type shares.
///
/// Hooks run in the order `configure`, `inject`, `validate`, `initialize`,
/// and `close` runs exactly once afterwards, whatever happened before.
#[async_trait]
pub trait Lifecycle: Send {
    /// Copy configuration into the component.
    fn configure(&mut self, _config: &ComponentConfig) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Receive provided collaborators.
    fn inject(&mut self, _context: &ComponentContext) {}

    /// Reject configurations the component cannot run with.
    fn validate(&self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Acquire runtime resources.
    async fn initialize(&mut self) -> Result<(), ComponentError> {
        Ok(())
    }

    /// Release runtime resources. `success` is false when the run was aborted
    /// or failed.
    async fn close(&mut self, _success: bool) -> Result<(), ComponentError> {
        Ok(())
    }
}

/// Classifies rows.
pub trait Filter: Lifecycle {
    /// Category of the row, or `None` to abstain.
    fn categorize(&mut self, row: &Row) -> Result<Option<Category>, ComponentError>;
}

/// What a transformer made of one row.
#[derive(Debug, Clone, PartialEq)]
pub enum TransformOutput {
    /// Values for the transformer's output columns of the current row.
    Values(Vec<Value>),
    /// Replace the current row with these rows (each holding values for the
    /// output columns). An empty list drops the row for downstream components.
    Rows(Vec<Vec<Value>>),
}

/// Derives column values.
#[async_trait]
pub trait Transformer: Lifecycle {
    async fn transform(&mut self, row: &Row) -> Result<TransformOutput, ComponentError>;

    /// Result exposed after the run, for transformers that keep statistics.
    fn result(&mut self) -> Option<AnalyzerResult> {
        None
    }
}

/// Accumulates statistics over rows.
pub trait Analyzer: Lifecycle {
    fn run(&mut self, row: &Row, distinct_count: u64) -> Result<(), ComponentError>;

    fn result(&mut self) -> Option<AnalyzerResult>;
}

/// A component instance of any kind.
pub enum ComponentInstance {
    Filter(Box<dyn Filter>),
    Transformer(Box<dyn Transformer>),
    Analyzer(Box<dyn Analyzer>),
}

impl ComponentInstance {
    pub fn filter(filter: impl Filter + 'static) -> Self {
        Self::Filter(Box::new(filter))
    }

    pub fn transformer(transformer: impl Transformer + 'static) -> Self {
        Self::Transformer(Box::new(transformer))
    }

    pub fn analyzer(analyzer: impl Analyzer + 'static) -> Self {
        Self::Analyzer(Box::new(analyzer))
    }

    pub fn kind(&self) -> ComponentKind {
        match self {
            Self::Filter(_) => ComponentKind::Filter,
            Self::Transformer(_) => ComponentKind::Transformer,
            Self::Analyzer(_) => ComponentKind::Analyzer,
        }
    }

    pub fn lifecycle(&mut self) -> &mut dyn Lifecycle {
        match self {
            Self::Filter(f) => f.as_mut(),
            Self::Transformer(t) => t.as_mut(),
            Self::Analyzer(a) => a.as_mut(),
        }
    }

    /// The component's result, for kinds that expose one.
    pub fn result(&mut self) -> Option<AnalyzerResult> {
        match self {
            Self::Filter(_) => None,
            Self::Transformer(t) => t.result(),
            Self::Analyzer(a) => a.result(),
        }
    }
}

impl fmt::Debug for ComponentInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentInstance")
            .field(&self.kind())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct ConcatProperties {
        separator: String,
        #[serde(default)]
        trim: bool,
    }

    fn config(properties: &str) -> ComponentConfig {
        ComponentConfig {
            key: ComponentKey::new("concat"),
            inputs: Vec::new(),
            outputs: Vec::new(),
            properties: serde_yaml::from_str(properties).unwrap(),
        }
    }

    #[test]
    fn test_typed_properties() {
        let props: ConcatProperties = config("separator: '-'\n").properties().unwrap();
        assert_eq!(props.separator, "-");
        assert!(!props.trim);
    }

    #[test]
    fn test_invalid_properties_are_configuration_errors() {
        let err = config("separater: '-'\n")
            .properties::<ConcatProperties>()
            .unwrap_err();
        assert!(matches!(err, ComponentError::Configuration { .. }));
        assert!(err.message().contains("invalid properties"));
    }

    #[test]
    fn test_partition_display() {
        assert_eq!(PartitionInfo { index: 1, count: 3 }.to_string(), "2/3");
        assert_eq!(PartitionInfo::single().to_string(), "1/1");
    }
}
