//! Built-in component types.
//!
//! [`builtin_registry`] holds every built-in type that needs no external
//! collaborator. Table lookups and batch transformers wrap a datastore or a
//! batch operation supplied by the embedder and are registered with
//! [`register_table_lookup`] and [`register_batch_transformer`].

mod analyzers;
mod filters;
mod transformers;

use std::sync::Arc;

pub use analyzers::{
    BooleanAnalyzer, DateTimelineAnalyzer, NumberAnalyzer, RowCountAnalyzer,
    ValueDistributionAnalyzer,
};
pub use filters::{EqualsFilter, NotNullFilter};
pub use transformers::{ConcatTransformer, TokenizerTransformer};

use crate::batch::{BatchOperation, BatchTransformer};
use crate::component::{ComponentInstance, ComponentRegistry};
use crate::lookup::{LookupDatastore, TableLookupTransformer};
use crate::value::Value;

pub fn builtin_registry() -> ComponentRegistry {
    let mut registry = ComponentRegistry::new();
    registry
        .register(NotNullFilter::descriptor(), || {
            ComponentInstance::filter(NotNullFilter::default())
        })
        .register(EqualsFilter::descriptor(), || {
            ComponentInstance::filter(EqualsFilter::default())
        })
        .register(ConcatTransformer::descriptor(), || {
            ComponentInstance::transformer(ConcatTransformer::default())
        })
        .register(TokenizerTransformer::descriptor(), || {
            ComponentInstance::transformer(TokenizerTransformer::default())
        })
        .register(RowCountAnalyzer::descriptor(), || {
            ComponentInstance::analyzer(RowCountAnalyzer::default())
        })
        .register(ValueDistributionAnalyzer::descriptor(), || {
            ComponentInstance::analyzer(ValueDistributionAnalyzer::default())
        })
        .register(BooleanAnalyzer::descriptor(), || {
            ComponentInstance::analyzer(BooleanAnalyzer::default())
        })
        .register(NumberAnalyzer::descriptor(), || {
            ComponentInstance::analyzer(NumberAnalyzer::default())
        })
        .register(DateTimelineAnalyzer::descriptor(), || {
            ComponentInstance::analyzer(DateTimelineAnalyzer::default())
        });
    registry
}

/// Register the `table-lookup` transformer over `datastore`.
pub fn register_table_lookup(
    registry: &mut ComponentRegistry,
    datastore: Arc<dyn LookupDatastore>,
) -> &mut ComponentRegistry {
    registry.register(TableLookupTransformer::descriptor(), move || {
        ComponentInstance::transformer(TableLookupTransformer::new(datastore.clone()))
    })
}

/// Register a batch transformer named `name` that runs `operation`.
pub fn register_batch_transformer<'a>(
    registry: &'a mut ComponentRegistry,
    name: &str,
    operation: Arc<dyn BatchOperation<Vec<Value>, Vec<Value>>>,
) -> &'a mut ComponentRegistry {
    registry.register(BatchTransformer::descriptor(name), move || {
        ComponentInstance::transformer(BatchTransformer::new(operation.clone()))
    })
}
