//! Static metadata about component types.
//!
//! A descriptor states what a component type needs (properties, input
//! columns, provided collaborators), which lifecycle hooks it has and how
//! they behave. The engine only reads descriptors.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use super::ComponentInstance;
use crate::job::Category;
use crate::result::ResultKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    Filter,
    Transformer,
    Analyzer,
}

impl ComponentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentKind::Filter => "filter",
            ComponentKind::Transformer => "transformer",
            ComponentKind::Analyzer => "analyzer",
        }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configurable property of a component type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PropertyDescriptor {
    pub name: String,
    pub required: bool,
}

/// Collaborators the engine can hand to a component before it initializes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provided {
    /// Handle for writing side output rows.
    SideOutput,
    /// The partition's task runner, for scheduling background work.
    TaskRunner,
}

/// Declaration of an initialize hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitializeHook {
    /// Whether partition workers run the hook. Non-distributed hooks only
    /// run when the whole job executes in one place.
    pub distributed: bool,
}

/// Declaration of a close hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CloseHook {
    pub distributed: bool,
    pub on_success: bool,
    pub on_failure: bool,
}

impl CloseHook {
    pub fn runs_for(&self, success: bool) -> bool {
        if success {
            self.on_success
        } else {
            self.on_failure
        }
    }
}

/// Accepted number of input columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InputArity {
    pub min: usize,
    pub max: Option<usize>,
}

impl InputArity {
    pub fn accepts(&self, count: usize) -> bool {
        count >= self.min && self.max.is_none_or(|max| count <= max)
    }
}

impl fmt::Display for InputArity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "exactly {max}"),
            Some(max) => write!(f, "{}..={max}", self.min),
            None => write!(f, "at least {}", self.min),
        }
    }
}

/// Metadata about one component type.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentDescriptor {
    pub name: String,
    pub kind: ComponentKind,
    pub properties: Vec<PropertyDescriptor>,
    pub inputs: InputArity,
    pub provided: Vec<Provided>,
    /// Closed set of categories a filter may produce.
    pub categories: Vec<Category>,
    /// Kind of result the component exposes after a run, if any.
    pub result: Option<ResultKind>,
    pub validate: bool,
    pub initialize: Option<InitializeHook>,
    pub close: Option<CloseHook>,
    /// Whether the component may run on several partitions whose results
    /// are reduced afterwards.
    pub distributable: bool,
}

impl ComponentDescriptor {
    fn new(name: impl Into<String>, kind: ComponentKind) -> Self {
        Self {
            name: name.into(),
            kind,
            properties: Vec::new(),
            inputs: InputArity { min: 1, max: None },
            provided: Vec::new(),
            categories: Vec::new(),
            result: None,
            validate: false,
            initialize: Some(InitializeHook { distributed: true }),
            close: Some(CloseHook {
                distributed: true,
                on_success: true,
                on_failure: true,
            }),
            distributable: true,
        }
    }

    pub fn filter(name: impl Into<String>, categories: Vec<Category>) -> Self {
        Self {
            categories,
            ..Self::new(name, ComponentKind::Filter)
        }
    }

    pub fn transformer(name: impl Into<String>) -> Self {
        Self::new(name, ComponentKind::Transformer)
    }

    pub fn analyzer(name: impl Into<String>, result: ResultKind) -> Self {
        Self {
            result: Some(result),
            ..Self::new(name, ComponentKind::Analyzer)
        }
    }

    pub fn property(mut self, name: impl Into<String>, required: bool) -> Self {
        self.properties.push(PropertyDescriptor {
            name: name.into(),
            required,
        });
        self
    }

    pub fn inputs(mut self, min: usize, max: Option<usize>) -> Self {
        self.inputs = InputArity { min, max };
        self
    }

    pub fn provides(mut self, provided: Provided) -> Self {
        if !self.provided.contains(&provided) {
            self.provided.push(provided);
        }
        self
    }

    pub fn with_result(mut self, result: ResultKind) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_validate(mut self) -> Self {
        self.validate = true;
        self
    }

    pub fn with_initialize(mut self, hook: Option<InitializeHook>) -> Self {
        self.initialize = hook;
        self
    }

    pub fn with_close(mut self, hook: Option<CloseHook>) -> Self {
        self.close = hook;
        self
    }

    pub fn not_distributable(mut self) -> Self {
        self.distributable = false;
        self
    }

    pub fn required_properties(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
    }

    pub fn declares_property(&self, name: &str) -> bool {
        self.properties.iter().any(|p| p.name == name)
    }

    pub fn is_provided(&self, provided: Provided) -> bool {
        self.provided.contains(&provided)
    }
}

/// Source of component descriptors.
pub trait DescriptorProvider: Send + Sync {
    fn descriptor(&self, name: &str) -> Option<&ComponentDescriptor>;

    fn descriptors(&self) -> Vec<&ComponentDescriptor>;
}

/// Creates a fresh, unconfigured component instance.
pub type ComponentFactory = Arc<dyn Fn() -> ComponentInstance + Send + Sync>;

/// Descriptors plus the factories that build their instances.
#[derive(Clone, Default)]
pub struct ComponentRegistry {
    entries: HashMap<String, (ComponentDescriptor, ComponentFactory)>,
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.entries.keys().collect();
        names.sort();
        f.debug_struct("ComponentRegistry")
            .field("components", &names)
            .finish()
    }
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component type, replacing any previous one of the same name.
    pub fn register<F>(&mut self, descriptor: ComponentDescriptor, factory: F) -> &mut Self
    where
        F: Fn() -> ComponentInstance + Send + Sync + 'static,
    {
        self.entries
            .insert(descriptor.name.clone(), (descriptor, Arc::new(factory)));
        self
    }

    pub fn factory(&self, name: &str) -> Option<ComponentFactory> {
        self.entries.get(name).map(|(_, factory)| factory.clone())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl DescriptorProvider for ComponentRegistry {
    fn descriptor(&self, name: &str) -> Option<&ComponentDescriptor> {
        self.entries.get(name).map(|(descriptor, _)| descriptor)
    }

    fn descriptors(&self) -> Vec<&ComponentDescriptor> {
        let mut all: Vec<&ComponentDescriptor> =
            self.entries.values().map(|(descriptor, _)| descriptor).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        all
    }
}
