use serde::Serialize;

use super::Reducible;
use crate::error::ReductionError;

/// Number of rows seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RowCount {
    pub count: u64,
}

impl Reducible for RowCount {
    fn empty() -> Self {
        Self::default()
    }

    fn merge(&mut self, other: &Self) -> Result<(), ReductionError> {
        self.count += other.count;
        Ok(())
    }
}

/// Summary statistics of a numeric column.
///
/// Sums are floating point, so reductions are only exactly
/// order-independent for values that add up exactly.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NumberSummary {
    pub count: u64,
    pub null_count: u64,
    pub sum: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumberSummary {
    pub fn record(&mut self, value: Option<f64>, count: u64) {
        let Some(value) = value else {
            self.null_count += count;
            return;
        };
        self.count += count;
        self.sum += value * count as f64;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

fn pick(a: Option<f64>, b: Option<f64>, f: fn(f64, f64) -> f64) -> Option<f64> {
    match (a, b) {
        (Some(a), Some(b)) => Some(f(a, b)),
        (a, b) => a.or(b),
    }
}

impl Reducible for NumberSummary {
    fn empty() -> Self {
        Self::default()
    }

    fn merge(&mut self, other: &Self) -> Result<(), ReductionError> {
        self.count += other.count;
        self.null_count += other.null_count;
        self.sum += other.sum;
        self.min = pick(self.min, other.min, f64::min);
        self.max = pick(self.max, other.max, f64::max);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_weighted() {
        let mut summary = NumberSummary::default();
        summary.record(Some(4.0), 2);
        summary.record(Some(-1.0), 1);
        summary.record(None, 5);

        assert_eq!(summary.count, 3);
        assert_eq!(summary.null_count, 5);
        assert_eq!(summary.sum, 7.0);
        assert_eq!(summary.min, Some(-1.0));
        assert_eq!(summary.max, Some(4.0));
    }

    #[test]
    fn test_merge_with_empty_side() {
        let mut a = NumberSummary::default();
        a.record(None, 1);
        let mut b = NumberSummary::default();
        b.record(Some(10.0), 1);

        a.merge(&b).unwrap();
        assert_eq!(a.min, Some(10.0));
        assert_eq!(a.max, Some(10.0));
        assert_eq!(a.mean(), Some(10.0));
        assert_eq!(NumberSummary::default().mean(), None);
    }

    #[test]
    fn test_row_count_merge() {
        let mut total = RowCount { count: 6 };
        total.merge(&RowCount { count: 4 }).unwrap();
        assert_eq!(total.count, 10);
    }
}
