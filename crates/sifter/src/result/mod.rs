//! Analyzer results and their reduction.
//!
//! Partitioned runs produce one partial result per partition and component.
//! [`reduce`] merges partials of the same kind into one result. Every
//! reduction is associative and commutative: counters are summed, categories
//! unioned with summed counts, crosstab cells merged by category and time
//! buckets merged by bucket identity.

mod crosstab;
mod distribution;
mod number;
mod timeline;

use std::fmt;

use serde::Serialize;

pub use crosstab::{Crosstab, Dimension};
pub use distribution::{Categorization, ValueDistribution};
pub use number::{NumberSummary, RowCount};
pub use timeline::{BucketWidth, Timeline};

use crate::error::ReductionError;

/// A result type that can be merged with partial results of the same type.
pub trait Reducible: Clone {
    /// The result of reducing zero partials.
    fn empty() -> Self;

    /// Merge `other` into `self`.
    fn merge(&mut self, other: &Self) -> Result<(), ReductionError>;
}

/// Merge same-type partial results.
///
/// The first partial seeds the result, so properties such as a timeline's
/// bucket width come from the data. Zero partials give [`Reducible::empty`].
pub fn reduce_all<R: Reducible>(partials: &[R]) -> Result<R, ReductionError> {
    let Some((first, rest)) = partials.split_first() else {
        return Ok(R::empty());
    };
    let mut reduced = first.clone();
    for partial in rest {
        reduced.merge(partial)?;
    }
    Ok(reduced)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    RowCount,
    ValueDistribution,
    Crosstab,
    NumberSummary,
    Timeline,
    Categorization,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::RowCount => "row count",
            ResultKind::ValueDistribution => "value distribution",
            ResultKind::Crosstab => "crosstab",
            ResultKind::NumberSummary => "number summary",
            ResultKind::Timeline => "timeline",
            ResultKind::Categorization => "categorization",
        }
    }
}

impl fmt::Display for ResultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The result of one component.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AnalyzerResult {
    RowCount(RowCount),
    ValueDistribution(ValueDistribution),
    Crosstab(Crosstab),
    NumberSummary(NumberSummary),
    Timeline(Timeline),
    Categorization(Categorization),
}

impl AnalyzerResult {
    pub fn kind(&self) -> ResultKind {
        match self {
            AnalyzerResult::RowCount(_) => ResultKind::RowCount,
            AnalyzerResult::ValueDistribution(_) => ResultKind::ValueDistribution,
            AnalyzerResult::Crosstab(_) => ResultKind::Crosstab,
            AnalyzerResult::NumberSummary(_) => ResultKind::NumberSummary,
            AnalyzerResult::Timeline(_) => ResultKind::Timeline,
            AnalyzerResult::Categorization(_) => ResultKind::Categorization,
        }
    }

    /// An empty result of the given kind.
    pub fn empty(kind: ResultKind) -> Self {
        match kind {
            ResultKind::RowCount => AnalyzerResult::RowCount(RowCount::empty()),
            ResultKind::ValueDistribution => {
                AnalyzerResult::ValueDistribution(ValueDistribution::empty())
            }
            ResultKind::Crosstab => AnalyzerResult::Crosstab(Crosstab::empty()),
            ResultKind::NumberSummary => AnalyzerResult::NumberSummary(NumberSummary::empty()),
            ResultKind::Timeline => AnalyzerResult::Timeline(Timeline::empty()),
            ResultKind::Categorization => AnalyzerResult::Categorization(Categorization::empty()),
        }
    }

    pub fn as_row_count(&self) -> Option<&RowCount> {
        match self {
            AnalyzerResult::RowCount(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_value_distribution(&self) -> Option<&ValueDistribution> {
        match self {
            AnalyzerResult::ValueDistribution(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_crosstab(&self) -> Option<&Crosstab> {
        match self {
            AnalyzerResult::Crosstab(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_number_summary(&self) -> Option<&NumberSummary> {
        match self {
            AnalyzerResult::NumberSummary(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_timeline(&self) -> Option<&Timeline> {
        match self {
            AnalyzerResult::Timeline(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_categorization(&self) -> Option<&Categorization> {
        match self {
            AnalyzerResult::Categorization(r) => Some(r),
            _ => None,
        }
    }
}

/// Unwrap every partial as one variant, or fail on the first other kind.
fn collect_as<'a, R>(
    expected: ResultKind,
    partials: &'a [AnalyzerResult],
    unwrap: impl Fn(&'a AnalyzerResult) -> Option<&'a R>,
) -> Result<Vec<R>, ReductionError>
where
    R: Clone + 'a,
{
    partials
        .iter()
        .map(|partial| {
            unwrap(partial)
                .cloned()
                .ok_or(ReductionError::MismatchedKinds {
                    expected: expected.as_str(),
                    found: partial.kind().as_str(),
                })
        })
        .collect()
}

/// Reduce partial results that must all be of `kind`.
pub fn reduce(
    kind: ResultKind,
    partials: &[AnalyzerResult],
) -> Result<AnalyzerResult, ReductionError> {
    Ok(match kind {
        ResultKind::RowCount => AnalyzerResult::RowCount(reduce_all(&collect_as(
            kind,
            partials,
            AnalyzerResult::as_row_count,
        )?)?),
        ResultKind::ValueDistribution => AnalyzerResult::ValueDistribution(reduce_all(
            &collect_as(kind, partials, AnalyzerResult::as_value_distribution)?,
        )?),
        ResultKind::Crosstab => AnalyzerResult::Crosstab(reduce_all(&collect_as(
            kind,
            partials,
            AnalyzerResult::as_crosstab,
        )?)?),
        ResultKind::NumberSummary => AnalyzerResult::NumberSummary(reduce_all(&collect_as(
            kind,
            partials,
            AnalyzerResult::as_number_summary,
        )?)?),
        ResultKind::Timeline => AnalyzerResult::Timeline(reduce_all(&collect_as(
            kind,
            partials,
            AnalyzerResult::as_timeline,
        )?)?),
        ResultKind::Categorization => AnalyzerResult::Categorization(reduce_all(&collect_as(
            kind,
            partials,
            AnalyzerResult::as_categorization,
        )?)?),
    })
}
