//! Table lookup transformer.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sifter_core::{ComponentKey, LookupCacheConfig};
use snafu::prelude::*;
use tracing::debug;

use super::{LookupCache, LookupConnection, LookupDatastore, LookupQuery};
use crate::component::{
    ComponentConfig, ComponentContext, ComponentDescriptor, Lifecycle, Provided, TransformOutput,
    Transformer,
};
use crate::error::{ComponentError, ConfigurationSnafu};
use crate::result::{AnalyzerResult, Categorization, ResultKind};
use crate::row::{ColumnId, Row};
use crate::side_output::SideOutput;
use crate::value::Value;

/// How lookup matches are joined with the row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinSemantic {
    /// At most one match; the row keeps going with nulls when nothing matches.
    #[default]
    LeftJoinMaxOne,
    /// One row per match; rows without a match are dropped.
    InnerJoin,
    /// One row per match, or a single row of nulls when nothing matches.
    LeftJoin,
}

impl JoinSemantic {
    /// Only single-match lookups are cached: the other semantics return an
    /// unbounded number of rows per key.
    pub fn is_cacheable(&self) -> bool {
        matches!(self, JoinSemantic::LeftJoinMaxOne)
    }
}

/// Categories of the transformer's categorization result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupCategory {
    Match,
    Miss,
    Cached,
}

impl LookupCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            LookupCategory::Match => "Match",
            LookupCategory::Miss => "Miss",
            LookupCategory::Cached => "Cached",
        }
    }

    fn all() -> [&'static str; 3] {
        ["Match", "Miss", "Cached"]
    }
}

fn default_cache_lookups() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TableLookupConfig {
    pub table: String,
    /// Table columns compared with the input columns, in input order.
    pub condition_columns: Vec<String>,
    /// Table columns copied into the output columns, in output order.
    pub output_columns: Vec<String>,
    #[serde(default)]
    pub join_semantic: JoinSemantic,
    #[serde(default = "default_cache_lookups")]
    pub cache_lookups: bool,
}

/// Joins rows against a datastore table.
///
/// Input columns hold the condition values. Lookups with the
/// [`JoinSemantic::LeftJoinMaxOne`] semantic are cached per condition tuple.
/// Condition tuples without a match are written to the side output.
pub struct TableLookupTransformer {
    datastore: Arc<dyn LookupDatastore>,
    key: ComponentKey,
    config: Option<TableLookupConfig>,
    inputs: Vec<ColumnId>,
    outputs: usize,
    cache: LookupCache<Vec<Value>, Vec<Value>>,
    cache_config: LookupCacheConfig,
    /// Built from the configuration on initialize.
    query: Option<LookupQuery>,
    connection: Option<Box<dyn LookupConnection>>,
    side_output: Option<SideOutput>,
    categories: Categorization,
}

impl TableLookupTransformer {
    pub const NAME: &'static str = "table-lookup";

    pub fn new(datastore: Arc<dyn LookupDatastore>) -> Self {
        let cache_config = LookupCacheConfig::default();
        Self {
            datastore,
            key: ComponentKey::new(Self::NAME),
            config: None,
            inputs: Vec::new(),
            outputs: 0,
            cache: LookupCache::from_config(&cache_config),
            cache_config,
            query: None,
            connection: None,
            side_output: None,
            categories: Categorization::new(LookupCategory::all()),
        }
    }

    pub fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::transformer(Self::NAME)
            .property("table", true)
            .property("condition_columns", true)
            .property("output_columns", true)
            .property("join_semantic", false)
            .property("cache_lookups", false)
            .provides(Provided::SideOutput)
            .with_result(ResultKind::Categorization)
            .with_validate()
    }

    fn caches(&self, config: &TableLookupConfig) -> bool {
        config.cache_lookups && config.join_semantic.is_cacheable()
    }

    fn count(&mut self, category: LookupCategory) {
        self.categories.increment(category.as_str(), 1);
    }

    fn build_query(config: &TableLookupConfig) -> LookupQuery {
        LookupQuery {
            table: config.table.clone(),
            condition_columns: config.condition_columns.clone(),
            output_columns: config.output_columns.clone(),
            max_rows: match config.join_semantic {
                JoinSemantic::LeftJoinMaxOne => Some(1),
                JoinSemantic::InnerJoin | JoinSemantic::LeftJoin => None,
            },
        }
    }
}

#[async_trait]
impl Lifecycle for TableLookupTransformer {
    fn configure(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        self.inputs = config.inputs.iter().map(|c| c.id).collect();
        self.outputs = config.outputs.len();
        self.config = Some(config.properties()?);
        Ok(())
    }

    fn inject(&mut self, context: &ComponentContext) {
        self.key = context.key.clone();
        self.cache_config = context.config.lookup_cache.clone();
        self.side_output = context.side_output.clone();
    }

    fn validate(&self) -> Result<(), ComponentError> {
        let config = self.config.as_ref().context(ConfigurationSnafu {
            message: "table lookup is not configured",
        })?;
        ensure!(
            !config.condition_columns.is_empty(),
            ConfigurationSnafu {
                message: "at least one condition column is required",
            }
        );
        ensure!(
            config.condition_columns.len() == self.inputs.len(),
            ConfigurationSnafu {
                message: format!(
                    "{} condition columns but {} input columns",
                    config.condition_columns.len(),
                    self.inputs.len()
                ),
            }
        );
        ensure!(
            config.output_columns.len() == self.outputs,
            ConfigurationSnafu {
                message: format!(
                    "{} lookup output columns but {} output columns",
                    config.output_columns.len(),
                    self.outputs
                ),
            }
        );
        Ok(())
    }

    async fn initialize(&mut self) -> Result<(), ComponentError> {
        let config = self.config.as_ref().context(ConfigurationSnafu {
            message: "table lookup is not configured",
        })?;
        self.query = Some(Self::build_query(config));
        self.cache = LookupCache::from_config(&self.cache_config);
        self.categories = Categorization::new(LookupCategory::all());
        self.connection = Some(self.datastore.connect().await?);
        debug!(component = %self.key, "Lookup connection opened");
        Ok(())
    }

    async fn close(&mut self, _success: bool) -> Result<(), ComponentError> {
        let stats = self.cache.stats();
        self.cache.clear();
        if self.connection.take().is_some() {
            debug!(
                component = %self.key,
                hits = stats.hits,
                misses = stats.misses,
                "Lookup connection released"
            );
        }
        Ok(())
    }
}

#[async_trait]
impl Transformer for TableLookupTransformer {
    async fn transform(&mut self, row: &Row) -> Result<TransformOutput, ComponentError> {
        let config = self.config.as_ref().context(ConfigurationSnafu {
            message: "table lookup is not configured",
        })?;
        let join_semantic = config.join_semantic;
        let caches = self.caches(config);
        let conditions = row.get_all(&self.inputs);

        if caches && let Some(values) = self.cache.get(&conditions) {
            self.count(LookupCategory::Cached);
            return Ok(TransformOutput::Values(values));
        }

        let (Some(query), Some(connection)) = (self.query.as_ref(), self.connection.as_mut()) else {
            return ConfigurationSnafu {
                message: "table lookup used before initialize",
            }
            .fail();
        };
        let matches = connection.query(query, &conditions).await?;

        if matches.is_empty() {
            self.count(LookupCategory::Miss);
            if let Some(side_output) = &self.side_output {
                side_output.write(conditions.clone());
            }
        } else {
            self.count(LookupCategory::Match);
        }

        let nulls = vec![Value::Null; self.outputs];
        Ok(match join_semantic {
            JoinSemantic::LeftJoinMaxOne => {
                let values = matches.into_iter().next().unwrap_or(nulls);
                if caches {
                    self.cache.insert(conditions, values.clone());
                }
                TransformOutput::Values(values)
            }
            JoinSemantic::InnerJoin => TransformOutput::Rows(matches),
            JoinSemantic::LeftJoin if matches.is_empty() => TransformOutput::Rows(vec![nulls]),
            JoinSemantic::LeftJoin => TransformOutput::Rows(matches),
        })
    }

    fn result(&mut self) -> Option<AnalyzerResult> {
        Some(AnalyzerResult::Categorization(self.categories.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::{PartitionInfo, Properties};
    use crate::lookup::{MemoryDatastore, MemoryTable};
    use crate::row::{Column, ColumnOrigin};
    use crate::side_output::SideOutputCollector;
    use sifter_core::EngineConfig;

    fn datastore() -> MemoryDatastore {
        MemoryDatastore::new([(
            "countries".to_string(),
            MemoryTable::new(["code", "name"])
                .row([Value::from("DK"), Value::from("Denmark")])
                .row([Value::from("NL"), Value::from("Netherlands")])
                .row([Value::from("NL"), Value::from("Holland")]),
        )])
    }

    fn column(id: usize, name: &str) -> Column {
        Column {
            id,
            name: name.to_string(),
            origin: ColumnOrigin::Source,
        }
    }

    async fn lookup(
        store: &MemoryDatastore,
        join_semantic: &str,
        collector: &mut SideOutputCollector,
    ) -> TableLookupTransformer {
        let yaml = format!(
            "table: countries\n\
             condition_columns: [code]\n\
             output_columns: [name]\n\
             join_semantic: {join_semantic}\n"
        );
        let properties: Properties = serde_yaml::from_str(&yaml).unwrap();
        let key = ComponentKey::new("lookup");

        let mut transformer = TableLookupTransformer::new(Arc::new(store.clone()));
        transformer
            .configure(&ComponentConfig {
                key: key.clone(),
                inputs: vec![column(0, "code")],
                outputs: vec![column(1, "country")],
                properties,
            })
            .unwrap();
        transformer.inject(&ComponentContext {
            key: key.clone(),
            partition: PartitionInfo::single(),
            config: Arc::new(EngineConfig::default()),
            side_output: Some(collector.handle(&key)),
            runner: None,
        });
        transformer.validate().unwrap();
        transformer.initialize().await.unwrap();
        transformer
    }

    fn row(code: &str) -> Row {
        Row::new(1, vec![Value::from(code)])
    }

    #[tokio::test]
    async fn test_repeated_keys_hit_the_cache() {
        let store = datastore();
        let mut collector = SideOutputCollector::default();
        let mut transformer = lookup(&store, "left_join_max_one", &mut collector).await;

        let first = transformer.transform(&row("DK")).await.unwrap();
        let second = transformer.transform(&row("DK")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first, TransformOutput::Values(vec![Value::from("Denmark")]));
        assert_eq!(store.query_count(), 1);

        // Misses are cached too.
        transformer.transform(&row("SE")).await.unwrap();
        let miss = transformer.transform(&row("SE")).await.unwrap();
        assert_eq!(miss, TransformOutput::Values(vec![Value::Null]));
        assert_eq!(store.query_count(), 2);

        let result = transformer.result().unwrap();
        let categories = result.as_categorization().unwrap();
        assert_eq!(categories.count("Match"), 1);
        assert_eq!(categories.count("Miss"), 1);
        assert_eq!(categories.count("Cached"), 2);

        let side = collector.drain();
        assert_eq!(side[&ComponentKey::new("lookup")].rows, vec![vec![Value::from("SE")]]);
    }

    #[tokio::test]
    async fn test_multi_match_semantics_are_not_cached() {
        let store = datastore();
        let mut collector = SideOutputCollector::default();
        let mut transformer = lookup(&store, "inner_join", &mut collector).await;

        let output = transformer.transform(&row("NL")).await.unwrap();
        assert_eq!(
            output,
            TransformOutput::Rows(vec![
                vec![Value::from("Netherlands")],
                vec![Value::from("Holland")],
            ])
        );
        transformer.transform(&row("NL")).await.unwrap();
        assert_eq!(store.query_count(), 2);

        assert_eq!(
            transformer.transform(&row("SE")).await.unwrap(),
            TransformOutput::Rows(Vec::new())
        );
    }

    #[tokio::test]
    async fn test_left_join_keeps_unmatched_rows() {
        let store = datastore();
        let mut collector = SideOutputCollector::default();
        let mut transformer = lookup(&store, "left_join", &mut collector).await;

        assert_eq!(
            transformer.transform(&row("SE")).await.unwrap(),
            TransformOutput::Rows(vec![vec![Value::Null]])
        );
    }

    #[tokio::test]
    async fn test_close_releases_connection_and_cache() {
        let store = datastore();
        let mut collector = SideOutputCollector::default();
        let mut transformer = lookup(&store, "left_join_max_one", &mut collector).await;
        transformer.transform(&row("DK")).await.unwrap();
        assert_eq!(store.open_connections(), 1);

        transformer.close(true).await.unwrap();
        assert_eq!(store.open_connections(), 0);
        assert!(transformer.cache.is_empty());

        // Re-initializing starts from an empty cache.
        transformer.initialize().await.unwrap();
        transformer.transform(&row("DK")).await.unwrap();
        assert_eq!(store.query_count(), 2);
    }

    #[test]
    fn test_cacheability() {
        assert!(JoinSemantic::LeftJoinMaxOne.is_cacheable());
        assert!(!JoinSemantic::InnerJoin.is_cacheable());
        assert!(!JoinSemantic::LeftJoin.is_cacheable());
    }
}
