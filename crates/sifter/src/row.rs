//! Rows, columns and row identity.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use sifter_core::ComponentKey;

use crate::value::Value;

/// Position of a column in every row of a job.
pub type ColumnId = usize;

/// Where the values of a column come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ColumnOrigin {
    /// Read from the record source.
    Source,
    /// Derived by a transformer.
    Transformer(ComponentKey),
}

/// A named column of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Column {
    pub id: ColumnId,
    pub name: String,
    pub origin: ColumnOrigin,
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// One record as produced by a record source.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub values: Vec<Value>,
    /// How many identical source records this record stands for.
    pub distinct_count: u64,
}

impl Record {
    pub fn new(values: Vec<Value>) -> Self {
        Self {
            values,
            distinct_count: 1,
        }
    }

    pub fn with_distinct_count(mut self, distinct_count: u64) -> Self {
        self.distinct_count = distinct_count;
        self
    }
}

static NULL: Value = Value::Null;

/// An immutable row flowing through a job.
///
/// A row holds one slot per job column. Transformers never modify a row;
/// they derive a new one that shares nothing mutable with its parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    id: u64,
    distinct_count: u64,
    values: Arc<Vec<Value>>,
}

impl Row {
    pub fn new(id: u64, values: Vec<Value>) -> Self {
        Self {
            id,
            distinct_count: 1,
            values: Arc::new(values),
        }
    }

    pub fn with_distinct_count(mut self, distinct_count: u64) -> Self {
        self.distinct_count = distinct_count;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn distinct_count(&self) -> u64 {
        self.distinct_count
    }

    /// Value of a column, `Null` when the column has no value in this row.
    pub fn get(&self, column: ColumnId) -> &Value {
        self.values.get(column).unwrap_or(&NULL)
    }

    /// Values of several columns, in the given order.
    pub fn get_all(&self, columns: &[ColumnId]) -> Vec<Value> {
        columns.iter().map(|c| self.get(*c).clone()).collect()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// A copy of this row with `values` written into `columns`.
    pub fn derive(&self, id: u64, columns: &[ColumnId], values: Vec<Value>) -> Row {
        let mut next = self.values.as_ref().clone();
        if let Some(max) = columns.iter().max()
            && *max >= next.len()
        {
            next.resize(max + 1, Value::Null);
        }
        for (column, value) in columns.iter().zip(values) {
            next[*column] = value;
        }
        Row {
            id,
            distinct_count: self.distinct_count,
            values: Arc::new(next),
        }
    }
}

/// Base of the id range handed out to derived rows.
pub const VIRTUAL_ROW_ID_BASE: u64 = 1 << 62;

/// Partition-local row id allocation.
///
/// Source rows and derived rows draw from separate, strictly increasing
/// ranges, so an id tells which kind of row it belongs to.
#[derive(Debug, Clone)]
pub struct RowIdGenerator {
    next_physical: u64,
    next_virtual: u64,
}

impl RowIdGenerator {
    pub fn new() -> Self {
        Self {
            next_physical: 1,
            next_virtual: VIRTUAL_ROW_ID_BASE,
        }
    }

    pub fn next_physical(&mut self) -> u64 {
        let id = self.next_physical;
        self.next_physical += 1;
        id
    }

    pub fn next_virtual(&mut self) -> u64 {
        let id = self.next_virtual;
        self.next_virtual += 1;
        id
    }

    /// Number of physical ids handed out so far.
    pub fn physical_count(&self) -> u64 {
        self.next_physical - 1
    }
}

impl Default for RowIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
