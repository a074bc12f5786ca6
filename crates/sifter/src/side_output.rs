//! Side output rows written by components.
//!
//! Components that declare [`Provided::SideOutput`](crate::component::Provided)
//! get a handle they can write rows to, for example lookups that found no
//! match. Rows are collected per component and reported with the job result.
//! Collection is bounded; rows past the limit are counted but not kept.

use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use sifter_core::ComponentKey;

use crate::value::Value;

/// Default number of side rows kept per component and partition.
pub const DEFAULT_SIDE_OUTPUT_LIMIT: usize = 1000;

#[derive(Debug, Default)]
struct SideRows {
    rows: Vec<Vec<Value>>,
    dropped: u64,
}

/// Collected side rows of one component.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct SideOutputRows {
    pub rows: Vec<Vec<Value>>,
    /// Rows written after the limit was reached.
    pub dropped: u64,
}

impl SideOutputRows {
    pub fn extend(&mut self, other: SideOutputRows, limit: usize) {
        let room = limit.saturating_sub(self.rows.len());
        let overflow = other.rows.len().saturating_sub(room) as u64;
        self.rows.extend(other.rows.into_iter().take(room));
        self.dropped += other.dropped + overflow;
    }
}

/// Write handle given to one component.
#[derive(Debug, Clone)]
pub struct SideOutput {
    rows: Arc<Mutex<SideRows>>,
    limit: usize,
}

impl SideOutput {
    pub fn write(&self, values: Vec<Value>) {
        let mut rows = self.rows.lock().unwrap_or_else(PoisonError::into_inner);
        if rows.rows.len() < self.limit {
            rows.rows.push(values);
        } else {
            rows.dropped += 1;
        }
    }
}

/// Owner of every side output handle of one partition.
#[derive(Debug)]
pub struct SideOutputCollector {
    outputs: IndexMap<ComponentKey, Arc<Mutex<SideRows>>>,
    limit: usize,
}

impl SideOutputCollector {
    pub fn new(limit: usize) -> Self {
        Self {
            outputs: IndexMap::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Handle for a component, created on first request.
    pub fn handle(&mut self, key: &ComponentKey) -> SideOutput {
        let rows = self.outputs.entry(key.clone()).or_default().clone();
        SideOutput {
            rows,
            limit: self.limit,
        }
    }

    /// Take everything written so far, skipping components that wrote nothing.
    pub fn drain(&mut self) -> IndexMap<ComponentKey, SideOutputRows> {
        self.outputs
            .iter()
            .filter_map(|(key, rows)| {
                let mut rows = rows.lock().unwrap_or_else(PoisonError::into_inner);
                let taken = std::mem::take(&mut *rows);
                (!taken.rows.is_empty() || taken.dropped > 0).then(|| {
                    (
                        key.clone(),
                        SideOutputRows {
                            rows: taken.rows,
                            dropped: taken.dropped,
                        },
                    )
                })
            })
            .collect()
    }
}

impl Default for SideOutputCollector {
    fn default() -> Self {
        Self::new(DEFAULT_SIDE_OUTPUT_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rows_collected_per_component() {
        let mut collector = SideOutputCollector::new(10);
        let lookup = collector.handle(&ComponentKey::new("lookup"));
        let _quiet = collector.handle(&ComponentKey::new("quiet"));

        lookup.write(vec![Value::from("missing-1")]);
        lookup.clone().write(vec![Value::from("missing-2")]);

        let drained = collector.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[&ComponentKey::new("lookup")].rows.len(), 2);
        assert!(collector.drain().is_empty());
    }

    #[test]
    fn test_limit_counts_dropped_rows() {
        let mut collector = SideOutputCollector::new(2);
        let handle = collector.handle(&ComponentKey::new("lookup"));
        for i in 0..5 {
            handle.write(vec![Value::Int(i)]);
        }

        let drained = collector.drain();
        let rows = &drained[&ComponentKey::new("lookup")];
        assert_eq!(rows.rows.len(), 2);
        assert_eq!(rows.dropped, 3);
    }

    #[test]
    fn test_extend_respects_limit() {
        let mut merged = SideOutputRows {
            rows: vec![vec![Value::Int(1)]],
            dropped: 0,
        };
        merged.extend(
            SideOutputRows {
                rows: vec![vec![Value::Int(2)], vec![Value::Int(3)]],
                dropped: 4,
            },
            2,
        );
        assert_eq!(merged.rows.len(), 2);
        assert_eq!(merged.dropped, 5);
    }
}
