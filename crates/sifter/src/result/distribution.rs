use std::collections::BTreeMap;

use serde::Serialize;

use super::Reducible;
use crate::error::ReductionError;

/// Occurrence counts of distinct values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValueDistribution {
    pub counts: BTreeMap<String, u64>,
    pub null_count: u64,
    pub total: u64,
}

impl ValueDistribution {
    pub fn record(&mut self, value: Option<&str>, count: u64) {
        if count == 0 {
            return;
        }
        match value {
            Some(value) => *self.counts.entry(value.to_string()).or_insert(0) += count,
            None => self.null_count += count,
        }
        self.total += count;
    }

    pub fn count(&self, value: &str) -> u64 {
        self.counts.get(value).copied().unwrap_or(0)
    }

    pub fn distinct_count(&self) -> usize {
        self.counts.len()
    }

    /// Values seen exactly once.
    pub fn unique_values(&self) -> Vec<&str> {
        self.counts
            .iter()
            .filter(|(_, count)| **count == 1)
            .map(|(value, _)| value.as_str())
            .collect()
    }
}

impl Reducible for ValueDistribution {
    fn empty() -> Self {
        Self::default()
    }

    fn merge(&mut self, other: &Self) -> Result<(), ReductionError> {
        for (value, count) in &other.counts {
            *self.counts.entry(value.clone()).or_insert(0) += count;
        }
        self.null_count += other.null_count;
        self.total += other.total;
        Ok(())
    }
}

/// Row counts per named category.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Categorization {
    pub categories: BTreeMap<String, u64>,
}

impl Categorization {
    pub fn new<S: Into<String>>(categories: impl IntoIterator<Item = S>) -> Self {
        Self {
            categories: categories.into_iter().map(|c| (c.into(), 0)).collect(),
        }
    }

    pub fn increment(&mut self, category: &str, count: u64) {
        *self.categories.entry(category.to_string()).or_insert(0) += count;
    }

    pub fn count(&self, category: &str) -> u64 {
        self.categories.get(category).copied().unwrap_or(0)
    }
}

impl Reducible for Categorization {
    fn empty() -> Self {
        Self::default()
    }

    fn merge(&mut self, other: &Self) -> Result<(), ReductionError> {
        for (category, count) in &other.categories {
            *self.categories.entry(category.clone()).or_insert(0) += count;
        }
        Ok(())
    }
}
