//! Row counts over time buckets.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{NaiveDateTime, NaiveTime, Timelike};
use serde::{Deserialize, Serialize};

use super::Reducible;
use crate::error::ReductionError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketWidth {
    #[default]
    Day,
    Hour,
}

impl BucketWidth {
    pub fn as_str(&self) -> &'static str {
        match self {
            BucketWidth::Day => "day",
            BucketWidth::Hour => "hour",
        }
    }

    /// Start of the bucket containing `ts`.
    pub fn truncate(&self, ts: NaiveDateTime) -> NaiveDateTime {
        match self {
            BucketWidth::Day => ts.date().and_time(NaiveTime::MIN),
            BucketWidth::Hour => ts
                .date()
                .and_time(NaiveTime::from_hms_opt(ts.hour(), 0, 0).unwrap_or(NaiveTime::MIN)),
        }
    }
}

impl fmt::Display for BucketWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counts keyed by bucket start.
///
/// Buckets are merged by identity, so partitions may cover any time range.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Timeline {
    pub width: BucketWidth,
    pub buckets: BTreeMap<NaiveDateTime, u64>,
    pub null_count: u64,
}

impl Timeline {
    pub fn new(width: BucketWidth) -> Self {
        Self {
            width,
            ..Self::default()
        }
    }

    pub fn record(&mut self, ts: Option<NaiveDateTime>, count: u64) {
        match ts {
            Some(ts) => *self.buckets.entry(self.width.truncate(ts)).or_insert(0) += count,
            None => self.null_count += count,
        }
    }

    pub fn count_at(&self, bucket: NaiveDateTime) -> u64 {
        self.buckets.get(&bucket).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty() && self.null_count == 0
    }

    pub fn first(&self) -> Option<NaiveDateTime> {
        self.buckets.keys().next().copied()
    }

    pub fn last(&self) -> Option<NaiveDateTime> {
        self.buckets.keys().next_back().copied()
    }
}

impl Reducible for Timeline {
    fn empty() -> Self {
        Self::default()
    }

    /// A side without counts is an identity, whatever its width.
    fn merge(&mut self, other: &Self) -> Result<(), ReductionError> {
        if other.is_empty() {
            return Ok(());
        }
        if self.is_empty() {
            *self = other.clone();
            return Ok(());
        }
        if self.width != other.width {
            return Err(ReductionError::MismatchedBucketWidth {
                expected: self.width.as_str(),
                found: other.width.as_str(),
            });
        }
        for (bucket, count) in &other.buckets {
            *self.buckets.entry(*bucket).or_insert(0) += count;
        }
        self.null_count += other.null_count;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts(day: u32, hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    #[test]
    fn test_truncate() {
        assert_eq!(BucketWidth::Day.truncate(ts(3, 14, 25)), ts(3, 0, 0));
        assert_eq!(BucketWidth::Hour.truncate(ts(3, 14, 25)), ts(3, 14, 0));
    }

    #[test]
    fn test_record_and_range() {
        let mut timeline = Timeline::new(BucketWidth::Day);
        timeline.record(Some(ts(2, 10, 0)), 1);
        timeline.record(Some(ts(2, 23, 59)), 2);
        timeline.record(Some(ts(1, 0, 1)), 1);
        timeline.record(None, 4);

        assert_eq!(timeline.count_at(ts(2, 0, 0)), 3);
        assert_eq!(timeline.first(), Some(ts(1, 0, 0)));
        assert_eq!(timeline.last(), Some(ts(2, 0, 0)));
        assert_eq!(timeline.null_count, 4);
    }

    #[test]
    fn test_merge_by_bucket_identity() {
        let mut a = Timeline::new(BucketWidth::Hour);
        a.record(Some(ts(1, 9, 5)), 1);
        let mut b = Timeline::new(BucketWidth::Hour);
        b.record(Some(ts(1, 9, 50)), 2);
        b.record(Some(ts(1, 11, 0)), 1);

        a.merge(&b).unwrap();
        assert_eq!(a.count_at(ts(1, 9, 0)), 3);
        assert_eq!(a.count_at(ts(1, 11, 0)), 1);
    }

    #[test]
    fn test_empty_is_identity_on_either_side() {
        let mut hourly = Timeline::new(BucketWidth::Hour);
        hourly.record(Some(ts(4, 8, 30)), 2);

        let mut left = Timeline::empty();
        left.merge(&hourly).unwrap();
        assert_eq!(left, hourly);

        let mut right = hourly.clone();
        right.merge(&Timeline::empty()).unwrap();
        assert_eq!(right, hourly);
    }

    #[test]
    fn test_merge_rejects_other_width() {
        let mut a = Timeline::new(BucketWidth::Hour);
        a.record(Some(ts(1, 9, 0)), 1);
        let mut b = Timeline::new(BucketWidth::Day);
        b.record(Some(ts(1, 9, 0)), 1);
        assert_eq!(
            a.merge(&b).unwrap_err(),
            ReductionError::MismatchedBucketWidth {
                expected: "hour",
                found: "day"
            }
        );
    }
}
