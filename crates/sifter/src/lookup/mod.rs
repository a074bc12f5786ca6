//! Table lookups and their cache.
//!
//! A [`TableLookupTransformer`] joins each row against an external table
//! through a [`LookupDatastore`]. The datastore is an external collaborator:
//! the engine only opens one [`LookupConnection`] per component instance
//! while it is initialized. [`MemoryDatastore`] is an in-memory datastore
//! for tests and embedding.

mod cache;
mod transformer;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use snafu::prelude::*;

pub use cache::{CacheStats, LookupCache};
pub use transformer::{JoinSemantic, LookupCategory, TableLookupConfig, TableLookupTransformer};

use crate::error::{ComponentError, ResourceSnafu};
use crate::value::Value;

/// What a lookup asks the datastore for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupQuery {
    pub table: String,
    pub condition_columns: Vec<String>,
    pub output_columns: Vec<String>,
    /// Cap on returned rows; `None` returns every match.
    pub max_rows: Option<usize>,
}

/// Opens connections to a lookup datastore.
#[async_trait]
pub trait LookupDatastore: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn LookupConnection>, ComponentError>;
}

/// An open datastore connection, owned by one component instance and
/// released when dropped.
#[async_trait]
pub trait LookupConnection: Send {
    /// Output column values of every row matching `conditions`, in table order.
    async fn query(
        &mut self,
        query: &LookupQuery,
        conditions: &[Value],
    ) -> Result<Vec<Vec<Value>>, ComponentError>;
}

/// A table held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

impl MemoryTable {
    pub fn new<S: Into<String>>(columns: impl IntoIterator<Item = S>) -> Self {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn row(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.rows.push(values.into_iter().collect());
        self
    }

    fn position(&self, column: &str) -> Result<usize, ComponentError> {
        self.columns
            .iter()
            .position(|c| c == column)
            .context(ResourceSnafu {
                message: format!("unknown lookup column '{column}'"),
            })
    }
}

/// Datastore over in-memory tables that counts the queries it serves.
#[derive(Debug, Clone, Default)]
pub struct MemoryDatastore {
    tables: Arc<HashMap<String, MemoryTable>>,
    queries: Arc<AtomicUsize>,
    connections: Arc<AtomicUsize>,
}

impl MemoryDatastore {
    pub fn new(tables: impl IntoIterator<Item = (String, MemoryTable)>) -> Self {
        Self {
            tables: Arc::new(tables.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Queries served over all connections.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    /// Connections currently open.
    pub fn open_connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LookupDatastore for MemoryDatastore {
    async fn connect(&self) -> Result<Box<dyn LookupConnection>, ComponentError> {
        self.connections.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryConnection {
            store: self.clone(),
        }))
    }
}

struct MemoryConnection {
    store: MemoryDatastore,
}

#[async_trait]
impl LookupConnection for MemoryConnection {
    async fn query(
        &mut self,
        query: &LookupQuery,
        conditions: &[Value],
    ) -> Result<Vec<Vec<Value>>, ComponentError> {
        self.store.queries.fetch_add(1, Ordering::SeqCst);

        let table = self
            .store
            .tables
            .get(&query.table)
            .context(ResourceSnafu {
                message: format!("unknown lookup table '{}'", query.table),
            })?;
        let condition_positions = query
            .condition_columns
            .iter()
            .map(|c| table.position(c))
            .collect::<Result<Vec<_>, _>>()?;
        let output_positions = query
            .output_columns
            .iter()
            .map(|c| table.position(c))
            .collect::<Result<Vec<_>, _>>()?;

        let matches = table
            .rows
            .iter()
            .filter(|row| {
                condition_positions
                    .iter()
                    .zip(conditions)
                    .all(|(position, expected)| row.get(*position) == Some(expected))
            })
            .map(|row| {
                output_positions
                    .iter()
                    .map(|p| row.get(*p).cloned().unwrap_or_default())
                    .collect()
            });

        Ok(match query.max_rows {
            Some(max) => matches.take(max).collect(),
            None => matches.collect(),
        })
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.store.connections.fetch_sub(1, Ordering::SeqCst);
    }
}
