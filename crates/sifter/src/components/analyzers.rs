//! Reference analyzers.

use serde::Deserialize;

use crate::component::{Analyzer, ComponentConfig, ComponentDescriptor, Lifecycle};
use crate::error::ComponentError;
use crate::result::{
    AnalyzerResult, BucketWidth, Crosstab, NumberSummary, ResultKind, RowCount, Timeline,
    ValueDistribution,
};
use crate::row::{ColumnId, Row};
use crate::value::Value;

fn single_input(config: &ComponentConfig) -> ColumnId {
    config.inputs.first().map(|c| c.id).unwrap_or_default()
}

fn count_as_i64(count: u64) -> i64 {
    i64::try_from(count).unwrap_or(i64::MAX)
}

/// Counts rows, weighted by their distinct count.
#[derive(Debug, Default)]
pub struct RowCountAnalyzer {
    count: u64,
}

impl RowCountAnalyzer {
    pub const NAME: &'static str = "row-count";

    pub fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::analyzer(Self::NAME, ResultKind::RowCount).inputs(0, None)
    }
}

impl Lifecycle for RowCountAnalyzer {}

impl Analyzer for RowCountAnalyzer {
    fn run(&mut self, _row: &Row, distinct_count: u64) -> Result<(), ComponentError> {
        self.count += distinct_count;
        Ok(())
    }

    fn result(&mut self) -> Option<AnalyzerResult> {
        Some(AnalyzerResult::RowCount(RowCount { count: self.count }))
    }
}

/// Occurrences of each distinct value of one column.
#[derive(Debug, Default)]
pub struct ValueDistributionAnalyzer {
    input: ColumnId,
    distribution: ValueDistribution,
}

impl ValueDistributionAnalyzer {
    pub const NAME: &'static str = "value-distribution";

    pub fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::analyzer(Self::NAME, ResultKind::ValueDistribution)
            .inputs(1, Some(1))
    }
}

impl Lifecycle for ValueDistributionAnalyzer {
    fn configure(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        self.input = single_input(config);
        Ok(())
    }
}

impl Analyzer for ValueDistributionAnalyzer {
    fn run(&mut self, row: &Row, distinct_count: u64) -> Result<(), ComponentError> {
        match row.get(self.input) {
            Value::Null => self.distribution.record(None, distinct_count),
            Value::Str(s) => self.distribution.record(Some(s.as_str()), distinct_count),
            other => self
                .distribution
                .record(Some(other.to_string().as_str()), distinct_count),
        }
        Ok(())
    }

    fn result(&mut self) -> Option<AnalyzerResult> {
        Some(AnalyzerResult::ValueDistribution(self.distribution.clone()))
    }
}

const ROW_COUNT: &str = "Row count";
const NULL_COUNT: &str = "Null count";
const TRUE_COUNT: &str = "True count";
const FALSE_COUNT: &str = "False count";

/// True, false and null counts per boolean column, as a
/// `Column x Measure` crosstab.
#[derive(Debug)]
pub struct BooleanAnalyzer {
    inputs: Vec<(ColumnId, String)>,
    crosstab: Crosstab,
}

impl Default for BooleanAnalyzer {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            crosstab: Crosstab::new(["Column", "Measure"]),
        }
    }
}

impl BooleanAnalyzer {
    pub const NAME: &'static str = "boolean";

    pub fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::analyzer(Self::NAME, ResultKind::Crosstab)
    }
}

impl Lifecycle for BooleanAnalyzer {
    fn configure(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        self.inputs = config
            .inputs
            .iter()
            .map(|c| (c.id, c.name.clone()))
            .collect();
        Ok(())
    }
}

impl Analyzer for BooleanAnalyzer {
    fn run(&mut self, row: &Row, distinct_count: u64) -> Result<(), ComponentError> {
        // Check every column first so a bad value leaves no partial counts.
        let mut measures = Vec::with_capacity(self.inputs.len());
        for (id, name) in &self.inputs {
            let measure = match row.get(*id) {
                Value::Null => NULL_COUNT,
                Value::Bool(true) => TRUE_COUNT,
                Value::Bool(false) => FALSE_COUNT,
                other => {
                    return Err(ComponentError::processing(format!(
                        "column '{name}' holds a {} value, expected a boolean",
                        other.type_name()
                    )));
                }
            };
            measures.push((name.as_str(), measure));
        }

        let amount = count_as_i64(distinct_count);
        for (name, measure) in measures {
            self.crosstab.add(&[name, ROW_COUNT], amount);
            self.crosstab.add(&[name, measure], amount);
        }
        Ok(())
    }

    fn result(&mut self) -> Option<AnalyzerResult> {
        Some(AnalyzerResult::Crosstab(self.crosstab.clone()))
    }
}

/// Count, nulls, extremes and sum of one numeric column.
#[derive(Debug, Default)]
pub struct NumberAnalyzer {
    input: ColumnId,
    summary: NumberSummary,
}

impl NumberAnalyzer {
    pub const NAME: &'static str = "number";

    pub fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::analyzer(Self::NAME, ResultKind::NumberSummary).inputs(1, Some(1))
    }
}

impl Lifecycle for NumberAnalyzer {
    fn configure(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        self.input = single_input(config);
        Ok(())
    }
}

impl Analyzer for NumberAnalyzer {
    fn run(&mut self, row: &Row, distinct_count: u64) -> Result<(), ComponentError> {
        let value = row.get(self.input);
        if value.is_null() {
            self.summary.record(None, distinct_count);
            return Ok(());
        }
        let number = value.as_f64().ok_or_else(|| {
            ComponentError::processing(format!("expected a number, got a {}", value.type_name()))
        })?;
        self.summary.record(Some(number), distinct_count);
        Ok(())
    }

    fn result(&mut self) -> Option<AnalyzerResult> {
        Some(AnalyzerResult::NumberSummary(self.summary.clone()))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DateTimelineProperties {
    #[serde(default)]
    bucket: BucketWidth,
}

/// Row counts per day or hour of one timestamp column.
#[derive(Debug)]
pub struct DateTimelineAnalyzer {
    input: ColumnId,
    timeline: Timeline,
}

impl Default for DateTimelineAnalyzer {
    fn default() -> Self {
        Self {
            input: 0,
            timeline: Timeline::new(BucketWidth::default()),
        }
    }
}

impl DateTimelineAnalyzer {
    pub const NAME: &'static str = "date-timeline";

    pub fn descriptor() -> ComponentDescriptor {
        ComponentDescriptor::analyzer(Self::NAME, ResultKind::Timeline)
            .inputs(1, Some(1))
            .property("bucket", false)
    }
}

impl Lifecycle for DateTimelineAnalyzer {
    fn configure(&mut self, config: &ComponentConfig) -> Result<(), ComponentError> {
        let properties: DateTimelineProperties = config.properties()?;
        self.input = single_input(config);
        self.timeline = Timeline::new(properties.bucket);
        Ok(())
    }
}

impl Analyzer for DateTimelineAnalyzer {
    fn run(&mut self, row: &Row, distinct_count: u64) -> Result<(), ComponentError> {
        let value = row.get(self.input);
        if value.is_null() {
            self.timeline.record(None, distinct_count);
            return Ok(());
        }
        let ts = value.as_timestamp().ok_or_else(|| {
            ComponentError::processing(format!(
                "expected a timestamp, got a {}",
                value.type_name()
            ))
        })?;
        self.timeline.record(Some(ts), distinct_count);
        Ok(())
    }

    fn result(&mut self) -> Option<AnalyzerResult> {
        Some(AnalyzerResult::Timeline(self.timeline.clone()))
    }
}
