//! Job graphs.
//!
//! A [`Job`] is built once from component specs and a component registry and
//! never changes afterwards; concurrent runs and partitions share it. Building
//! resolves column references, checks requirements against the filters'
//! declared categories and orders components so every component runs after
//! the filters and transformers it depends on.

mod requirement;
mod sort;

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::Deserialize;
use sifter_core::ComponentKey;
use snafu::prelude::*;
use tracing::debug;

pub use requirement::{Category, Outcome, OutcomeSet, Requirement, ValidationCategory};

use crate::component::{
    ComponentConfig, ComponentDescriptor, ComponentFactory, ComponentInstance, ComponentKind,
    ComponentRegistry, DescriptorProvider, Properties,
};
use crate::error::{
    CyclicDependencySnafu, DuplicateColumnSnafu, DuplicateComponentKeySnafu, EmptyRequirementSnafu,
    InputAritySnafu, InvalidOutputsSnafu, JobError, NotAFilterSnafu, NotDistributableSnafu,
    UnknownCategorySnafu, UnknownColumnSnafu, UnknownDescriptorSnafu, UnknownFilterSnafu,
};
use crate::row::{Column, ColumnId, ColumnOrigin};

/// How one component of a job is configured.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentSpec {
    /// Name of the component type in the registry.
    pub descriptor: String,
    /// Job-unique key; derived from the descriptor name when absent.
    #[serde(default)]
    pub key: Option<ComponentKey>,
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Names of the columns a transformer produces.
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub requirement: Option<Requirement>,
    #[serde(default)]
    pub properties: Properties,
}

impl ComponentSpec {
    pub fn new(descriptor: impl Into<String>) -> Self {
        Self {
            descriptor: descriptor.into(),
            key: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            requirement: None,
            properties: Properties::new(),
        }
    }

    pub fn key(mut self, key: impl Into<ComponentKey>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn inputs<S: Into<String>>(mut self, inputs: impl IntoIterator<Item = S>) -> Self {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn outputs<S: Into<String>>(mut self, outputs: impl IntoIterator<Item = S>) -> Self {
        self.outputs = outputs.into_iter().map(Into::into).collect();
        self
    }

    pub fn requires(mut self, requirement: Requirement) -> Self {
        self.requirement = Some(requirement);
        self
    }

    pub fn property(
        mut self,
        name: impl Into<String>,
        value: impl Into<serde_yaml::Value>,
    ) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }
}

/// Declarative form of a job, as read from YAML.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobDefinition {
    pub name: String,
    pub source_columns: Vec<String>,
    #[serde(default)]
    pub components: Vec<ComponentSpec>,
}

/// A component placed in a job.
#[derive(Clone)]
pub struct JobComponent {
    /// Position in configuration order.
    pub index: usize,
    pub key: ComponentKey,
    pub descriptor: ComponentDescriptor,
    pub inputs: Vec<ColumnId>,
    pub outputs: Vec<ColumnId>,
    pub requirement: Option<Requirement>,
    pub properties: Properties,
    /// Components that must run first for the same row.
    pub dependencies: Vec<usize>,
    /// Gated transformers upstream of this component's inputs. A component
    /// without a requirement only receives a row when one of these ran for it.
    pub gated_producers: Vec<usize>,
    /// Dependency depth; components of the same level are independent.
    pub level: usize,
    factory: ComponentFactory,
}

impl JobComponent {
    pub fn kind(&self) -> ComponentKind {
        self.descriptor.kind
    }

    /// A fresh, unconfigured instance.
    pub fn instantiate(&self) -> ComponentInstance {
        (self.factory)()
    }

    pub(crate) fn config(&self, columns: &[Column]) -> ComponentConfig {
        let pick = |ids: &[ColumnId]| -> Vec<Column> {
            ids.iter().map(|id| columns[*id].clone()).collect()
        };
        ComponentConfig {
            key: self.key.clone(),
            inputs: pick(&self.inputs),
            outputs: pick(&self.outputs),
            properties: self.properties.clone(),
        }
    }
}

impl fmt::Debug for JobComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobComponent")
            .field("key", &self.key)
            .field("descriptor", &self.descriptor.name)
            .field("inputs", &self.inputs)
            .field("outputs", &self.outputs)
            .field("requirement", &self.requirement)
            .field("level", &self.level)
            .finish_non_exhaustive()
    }
}

/// An immutable, validated job graph.
#[derive(Debug, Clone)]
pub struct Job {
    name: String,
    columns: Vec<Column>,
    source_columns: usize,
    components: Vec<JobComponent>,
    order: Vec<usize>,
}

impl Job {
    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn source_column_count(&self) -> usize {
        self.source_columns
    }

    /// Components in configuration order.
    pub fn components(&self) -> &[JobComponent] {
        &self.components
    }

    /// Component indices in execution order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn component(&self, key: &ComponentKey) -> Option<&JobComponent> {
        self.components.iter().find(|c| &c.key == key)
    }

    /// Component indices grouped by level, each group in execution order.
    pub fn levels(&self) -> Vec<Vec<usize>> {
        let depth = self
            .components
            .iter()
            .map(|c| c.level + 1)
            .max()
            .unwrap_or(0);
        let mut levels = vec![Vec::new(); depth];
        for index in &self.order {
            levels[self.components[*index].level].push(*index);
        }
        levels
    }

    /// Fresh instances of every component, in configuration order.
    pub fn instantiate(&self) -> Vec<ComponentInstance> {
        self.components.iter().map(JobComponent::instantiate).collect()
    }

    /// Whether a component should receive a row with the given outcomes.
    pub fn is_satisfied(&self, component: &JobComponent, outcomes: &OutcomeSet) -> bool {
        match &component.requirement {
            Some(requirement) => requirement.is_satisfied(outcomes),
            None => {
                component.gated_producers.is_empty()
                    || component.gated_producers.iter().any(|producer| {
                        self.components[*producer]
                            .requirement
                            .as_ref()
                            .is_some_and(|r| r.is_satisfied(outcomes))
                    })
            }
        }
    }

    /// Refuse jobs that cannot run partitioned.
    pub fn ensure_distributable(&self) -> Result<(), JobError> {
        for component in &self.components {
            ensure!(
                component.descriptor.distributable,
                NotDistributableSnafu {
                    component: component.key.to_string(),
                    descriptor: component.descriptor.name.clone(),
                }
            );
        }
        Ok(())
    }
}

/// Builds a [`Job`] from component specs.
#[derive(Debug, Clone)]
pub struct JobBuilder {
    name: String,
    source_columns: Vec<String>,
    specs: Vec<ComponentSpec>,
}

impl From<JobDefinition> for JobBuilder {
    fn from(definition: JobDefinition) -> Self {
        Self {
            name: definition.name,
            source_columns: definition.source_columns,
            specs: definition.components,
        }
    }
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_columns: Vec::new(),
            specs: Vec::new(),
        }
    }

    pub fn source_columns<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.source_columns = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn component(mut self, spec: ComponentSpec) -> Self {
        self.specs.push(spec);
        self
    }

    pub fn build(self, registry: &ComponentRegistry) -> Result<Job, JobError> {
        let mut columns: Vec<Column> = Vec::new();
        let mut column_ids: HashMap<String, ColumnId> = HashMap::new();

        let mut add_column = |name: &str, origin: ColumnOrigin| -> Result<ColumnId, JobError> {
            ensure!(
                !column_ids.contains_key(name),
                DuplicateColumnSnafu { column: name }
            );
            let id = columns.len();
            columns.push(Column {
                id,
                name: name.to_string(),
                origin,
            });
            column_ids.insert(name.to_string(), id);
            Ok(id)
        };

        for name in &self.source_columns {
            add_column(name, ColumnOrigin::Source)?;
        }
        let source_columns = self.source_columns.len();

        // Keys, descriptors and output columns first: inputs may reference
        // columns of transformers configured later.
        let mut keys: HashMap<ComponentKey, usize> = HashMap::new();
        let mut partial = Vec::with_capacity(self.specs.len());
        for (index, spec) in self.specs.into_iter().enumerate() {
            let descriptor = registry
                .descriptor(&spec.descriptor)
                .cloned()
                .context(UnknownDescriptorSnafu {
                    name: spec.descriptor.clone(),
                })?;
            let factory = registry.factory(&spec.descriptor).context(UnknownDescriptorSnafu {
                name: spec.descriptor.clone(),
            })?;

            let key = spec
                .key
                .clone()
                .unwrap_or_else(|| ComponentKey::derive(&descriptor.name, index));
            ensure!(
                !keys.contains_key(&key),
                DuplicateComponentKeySnafu {
                    key: key.to_string()
                }
            );
            keys.insert(key.clone(), index);

            let is_transformer = descriptor.kind == ComponentKind::Transformer;
            ensure!(
                is_transformer || spec.outputs.is_empty(),
                InvalidOutputsSnafu {
                    component: key.to_string(),
                    message: format!("a {} cannot produce columns", descriptor.kind),
                }
            );
            ensure!(
                !is_transformer || !spec.outputs.is_empty(),
                InvalidOutputsSnafu {
                    component: key.to_string(),
                    message: "a transformer must declare at least one output column",
                }
            );

            let mut outputs = Vec::with_capacity(spec.outputs.len());
            for name in &spec.outputs {
                outputs.push(add_column(name, ColumnOrigin::Transformer(key.clone()))?);
            }

            partial.push((key, descriptor, factory, spec, outputs));
        }

        let producers: HashMap<ColumnId, usize> = partial
            .iter()
            .enumerate()
            .flat_map(|(index, (_, _, _, _, outputs))| outputs.iter().map(move |c| (*c, index)))
            .collect();

        let mut components = Vec::with_capacity(partial.len());
        for (index, (key, descriptor, factory, spec, outputs)) in partial.iter().enumerate() {
            let mut inputs = Vec::with_capacity(spec.inputs.len());
            for name in &spec.inputs {
                let id = column_ids.get(name).copied().context(UnknownColumnSnafu {
                    component: key.to_string(),
                    column: name.clone(),
                })?;
                inputs.push(id);
            }
            ensure!(
                descriptor.inputs.accepts(inputs.len()),
                InputAritySnafu {
                    component: key.to_string(),
                    expected: descriptor.inputs.to_string(),
                    found: inputs.len(),
                }
            );

            let mut dependencies: Vec<usize> = Vec::new();
            if let Some(requirement) = &spec.requirement {
                ensure!(
                    !requirement.outcomes().is_empty(),
                    EmptyRequirementSnafu {
                        component: key.to_string()
                    }
                );
                for outcome in requirement.outcomes() {
                    let filter = keys.get(&outcome.filter).copied().context(UnknownFilterSnafu {
                        component: key.to_string(),
                        filter: outcome.filter.to_string(),
                    })?;
                    let filter_descriptor = &partial[filter].1;
                    ensure!(
                        filter_descriptor.kind == ComponentKind::Filter,
                        NotAFilterSnafu {
                            component: key.to_string(),
                            filter: outcome.filter.to_string(),
                        }
                    );
                    ensure!(
                        filter_descriptor.categories.contains(&outcome.category),
                        UnknownCategorySnafu {
                            component: key.to_string(),
                            filter: outcome.filter.to_string(),
                            category: outcome.category.to_string(),
                        }
                    );
                    dependencies.push(filter);
                }
            }
            dependencies.extend(inputs.iter().filter_map(|c| producers.get(c).copied()));
            let mut seen = HashSet::new();
            dependencies.retain(|d| seen.insert(*d));

            components.push(JobComponent {
                index,
                key: key.clone(),
                descriptor: descriptor.clone(),
                inputs,
                outputs: outputs.clone(),
                requirement: spec.requirement.clone(),
                properties: spec.properties.clone(),
                dependencies,
                gated_producers: Vec::new(),
                level: 0,
                factory: factory.clone(),
            });
        }

        let nodes: Vec<sort::SortNode> = components
            .iter()
            .map(|c| sort::SortNode {
                has_requirement: c.requirement.is_some(),
                dependencies: c.dependencies.clone(),
            })
            .collect();
        let sorted = sort::sort(&nodes).map_err(|remaining| {
            let names: Vec<String> = remaining
                .iter()
                .map(|i| components[*i].key.to_string())
                .collect();
            CyclicDependencySnafu {
                components: names.join(", "),
            }
            .build()
        })?;

        for (index, level) in sorted.levels.iter().enumerate() {
            components[index].level = *level;
        }
        let gated: Vec<Vec<usize>> = (0..components.len())
            .map(|index| gated_producers(&components, &producers, index))
            .collect();
        for (component, gated) in components.iter_mut().zip(gated) {
            component.gated_producers = gated;
        }

        debug!(
            job = %self.name,
            components = components.len(),
            columns = columns.len(),
            "Job built"
        );

        Ok(Job {
            name: self.name,
            columns,
            source_columns,
            components,
            order: sorted.order,
        })
    }
}

/// Gated transformers reachable upstream through input columns.
fn gated_producers(
    components: &[JobComponent],
    producers: &HashMap<ColumnId, usize>,
    index: usize,
) -> Vec<usize> {
    let mut gated = Vec::new();
    let mut visited = HashSet::new();
    let mut pending: Vec<usize> = components[index].inputs.clone();

    while let Some(column) = pending.pop() {
        let Some(producer) = producers.get(&column).copied() else {
            continue;
        };
        if !visited.insert(producer) {
            continue;
        }
        if components[producer].requirement.is_some() {
            gated.push(producer);
        }
        pending.extend(components[producer].inputs.iter().copied());
    }

    gated.sort_unstable();
    gated
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components;

    fn registry() -> ComponentRegistry {
        components::builtin_registry()
    }

    #[test]
    fn test_build_orders_filter_before_gated_analyzer() {
        let job = Job::builder("customers")
            .source_columns(["name", "email"])
            .component(
                ComponentSpec::new("value-distribution")
                    .key("names")
                    .inputs(["name"])
                    .requires(Requirement::outcome("email-present", Category::VALID)),
            )
            .component(ComponentSpec::new("not-null").key("email-present").inputs(["email"]))
            .component(ComponentSpec::new("row-count").key("rows"))
            .build(&registry())
            .unwrap();

        let order: Vec<&str> = job
            .order()
            .iter()
            .map(|i| job.components()[*i].key.id())
            .collect();
        assert_eq!(order, vec!["email-present", "rows", "names"]);
        assert_eq!(job.levels(), vec![vec![1, 2], vec![0]]);
    }

    #[test]
    fn test_transformer_outputs_become_columns() {
        let job = Job::builder("people")
            .source_columns(["first", "last"])
            .component(
                ComponentSpec::new("value-distribution")
                    .inputs(["full_name"]),
            )
            .component(
                ComponentSpec::new("concat")
                    .inputs(["first", "last"])
                    .outputs(["full_name"])
                    .property("separator", " "),
            )
            .build(&registry())
            .unwrap();

        assert_eq!(job.columns().len(), 3);
        assert_eq!(job.source_column_count(), 2);
        let full_name = &job.columns()[2];
        assert_eq!(full_name.name, "full_name");
        assert_eq!(
            full_name.origin,
            ColumnOrigin::Transformer(ComponentKey::new("concat-1"))
        );
        // The distribution reads the transformer's output, so it runs second.
        assert_eq!(job.order(), &[1, 0]);
        assert_eq!(job.components()[0].dependencies, vec![1]);
    }

    #[test]
    fn test_unknown_column() {
        let err = Job::builder("j")
            .source_columns(["a"])
            .component(ComponentSpec::new("row-count").inputs(["b"]))
            .build(&registry())
            .unwrap_err();
        assert!(matches!(err, JobError::UnknownColumn { .. }));
    }

    #[test]
    fn test_requirement_validation() {
        let build = |requirement: Requirement| {
            Job::builder("j")
                .source_columns(["a"])
                .component(ComponentSpec::new("not-null").key("f").inputs(["a"]))
                .component(ComponentSpec::new("row-count").key("rows"))
                .component(ComponentSpec::new("row-count").requires(requirement))
                .build(&registry())
        };

        assert!(build(Requirement::outcome("f", Category::INVALID)).is_ok());
        assert!(matches!(
            build(Requirement::outcome("nope", Category::VALID)),
            Err(JobError::UnknownFilter { .. })
        ));
        assert!(matches!(
            build(Requirement::outcome("rows", Category::VALID)),
            Err(JobError::NotAFilter { .. })
        ));
        assert!(matches!(
            build(Requirement::outcome("f", Category::new("MAYBE"))),
            Err(JobError::UnknownCategory { .. })
        ));
        assert!(matches!(
            build(Requirement::AnyOf(Vec::new())),
            Err(JobError::EmptyRequirement { .. })
        ));
    }

    #[test]
    fn test_cycle_between_transformers() {
        let err = Job::builder("j")
            .source_columns(["a"])
            .component(ComponentSpec::new("concat").key("x").inputs(["y_out"]).outputs(["x_out"]))
            .component(ComponentSpec::new("concat").key("y").inputs(["x_out"]).outputs(["y_out"]))
            .build(&registry())
            .unwrap_err();
        match err {
            JobError::CyclicDependency { components } => assert_eq!(components, "x, y"),
            other => panic!("Expected cycle, got {other}"),
        }
    }

    #[test]
    fn test_duplicate_keys_and_columns() {
        let dup_key = Job::builder("j")
            .source_columns(["a"])
            .component(ComponentSpec::new("row-count").key("k"))
            .component(ComponentSpec::new("row-count").key("k"))
            .build(&registry());
        assert!(matches!(dup_key, Err(JobError::DuplicateComponentKey { .. })));

        let dup_column = Job::builder("j")
            .source_columns(["a"])
            .component(ComponentSpec::new("concat").inputs(["a"]).outputs(["a"]))
            .build(&registry());
        assert!(matches!(dup_column, Err(JobError::DuplicateColumn { .. })));
    }

    #[test]
    fn test_outputs_only_for_transformers() {
        let err = Job::builder("j")
            .source_columns(["a"])
            .component(ComponentSpec::new("row-count").outputs(["n"]))
            .build(&registry())
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidOutputs { .. }));

        let err = Job::builder("j")
            .source_columns(["a"])
            .component(ComponentSpec::new("concat").inputs(["a"]))
            .build(&registry())
            .unwrap_err();
        assert!(matches!(err, JobError::InvalidOutputs { .. }));
    }

    #[test]
    fn test_input_arity() {
        let err = Job::builder("j")
            .source_columns(["a", "b"])
            .component(ComponentSpec::new("value-distribution").inputs(["a", "b"]))
            .build(&registry())
            .unwrap_err();
        assert!(matches!(err, JobError::InputArity { found: 2, .. }));
    }

    #[test]
    fn test_gated_producers_are_inherited_transitively() {
        let job = Job::builder("j")
            .source_columns(["a"])
            .component(ComponentSpec::new("not-null").key("f").inputs(["a"]))
            .component(
                ComponentSpec::new("concat")
                    .key("gated")
                    .inputs(["a"])
                    .outputs(["g"])
                    .requires(Requirement::outcome("f", Category::VALID)),
            )
            .component(ComponentSpec::new("concat").key("plain").inputs(["g"]).outputs(["p"]))
            .component(ComponentSpec::new("value-distribution").key("dist").inputs(["p"]))
            .build(&registry())
            .unwrap();

        let dist = job.component(&ComponentKey::new("dist")).unwrap();
        assert_eq!(dist.gated_producers, vec![1]);

        let mut valid = OutcomeSet::new();
        valid.insert(Outcome::new("f", Category::VALID));
        let mut invalid = OutcomeSet::new();
        invalid.insert(Outcome::new("f", Category::INVALID));
        assert!(job.is_satisfied(dist, &valid));
        assert!(!job.is_satisfied(dist, &invalid));
    }

    #[test]
    fn test_from_yaml_definition() {
        let yaml = r#"
name: customers
source_columns: [country]
components:
  - descriptor: not-null
    key: has-country
    inputs: [country]
  - descriptor: value-distribution
    inputs: [country]
    requirement:
      kind: outcome
      value: { filter: has-country, category: VALID }
  - descriptor: row-count
    key: either
    requirement:
      kind: any_of
      value:
        - { filter: has-country, category: VALID }
        - { filter: has-country, category: INVALID }
"#;
        let definition: JobDefinition = serde_yaml::from_str(yaml).unwrap();
        let job = JobBuilder::from(definition).build(&registry()).unwrap();
        assert_eq!(job.name(), "customers");
        assert_eq!(job.components()[1].key.id(), "value-distribution-1");
        assert_eq!(
            job.components()[1].requirement,
            Some(Requirement::outcome("has-country", Category::VALID))
        );
        assert!(matches!(
            job.components()[2].requirement,
            Some(Requirement::AnyOf(ref list)) if list.len() == 2
        ));
        assert!(job.ensure_distributable().is_ok());
    }
}
