//! Multi-dimensional cross tabulation.

use std::collections::BTreeMap;

use serde::Serialize;

use super::Reducible;
use crate::error::ReductionError;

/// One axis of a crosstab. Categories keep their first-seen order.
#[derive(Debug, Clone, Serialize)]
pub struct Dimension {
    pub name: String,
    pub categories: Vec<String>,
}

impl Dimension {
    fn register(&mut self, category: &str) {
        if !self.categories.iter().any(|c| c == category) {
            self.categories.push(category.to_string());
        }
    }

    fn sorted_categories(&self) -> Vec<&str> {
        let mut sorted: Vec<&str> = self.categories.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted
    }
}

/// Counts addressed by one category per dimension.
///
/// Two crosstabs are equal when they have the same dimensions, the same
/// category sets and the same cells; category order is display-only.
#[derive(Debug, Clone, Serialize)]
pub struct Crosstab {
    dimensions: Vec<Dimension>,
    cells: BTreeMap<Vec<String>, i64>,
}

impl Crosstab {
    pub fn new<S: Into<String>>(dimensions: impl IntoIterator<Item = S>) -> Self {
        Self {
            dimensions: dimensions
                .into_iter()
                .map(|name| Dimension {
                    name: name.into(),
                    categories: Vec::new(),
                })
                .collect(),
            cells: BTreeMap::new(),
        }
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn dimension_names(&self) -> Vec<&str> {
        self.dimensions.iter().map(|d| d.name.as_str()).collect()
    }

    /// Add `amount` to the cell at `coordinates`, one category per dimension.
    ///
    /// Unknown categories are registered. Extra coordinates are ignored and
    /// missing ones leave the crosstab untouched.
    pub fn add(&mut self, coordinates: &[&str], amount: i64) {
        if coordinates.len() < self.dimensions.len() {
            return;
        }
        for (dimension, category) in self.dimensions.iter_mut().zip(coordinates) {
            dimension.register(category);
        }
        let key: Vec<String> = coordinates[..self.dimensions.len()]
            .iter()
            .map(|c| c.to_string())
            .collect();
        self.bump(key, amount);
    }

    pub fn get(&self, coordinates: &[&str]) -> i64 {
        let key: Vec<String> = coordinates.iter().map(|c| c.to_string()).collect();
        self.cells.get(&key).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn bump(&mut self, key: Vec<String>, amount: i64) {
        let cell = self.cells.entry(key.clone()).or_insert(0);
        *cell += amount;
        // Zero cells are never stored.
        if *cell == 0 {
            self.cells.remove(&key);
        }
    }
}

impl PartialEq for Crosstab {
    fn eq(&self, other: &Self) -> bool {
        self.dimensions.len() == other.dimensions.len()
            && self
                .dimensions
                .iter()
                .zip(&other.dimensions)
                .all(|(a, b)| a.name == b.name && a.sorted_categories() == b.sorted_categories())
            && self.cells == other.cells
    }
}

impl Reducible for Crosstab {
    fn empty() -> Self {
        Crosstab::new(Vec::<String>::new())
    }

    /// A side without cells is an identity, whatever its dimensions.
    fn merge(&mut self, other: &Self) -> Result<(), ReductionError> {
        if other.cells.is_empty() {
            if self.dimensions.is_empty() {
                self.dimensions = other.dimensions.clone();
            }
            return Ok(());
        }
        if self.cells.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if self.dimension_names() != other.dimension_names() {
            return Err(ReductionError::MismatchedDimensions {
                expected: self.dimension_names().join(", "),
                found: other.dimension_names().join(", "),
            });
        }
        for (mine, theirs) in self.dimensions.iter_mut().zip(&other.dimensions) {
            for category in &theirs.categories {
                mine.register(category);
            }
        }
        for (key, amount) in &other.cells {
            self.bump(key.clone(), *amount);
        }
        Ok(())
    }
}
