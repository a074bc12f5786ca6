//! Record sources.

use std::collections::VecDeque;

use async_trait::async_trait;

use crate::error::SourceError;
use crate::row::Record;
use crate::value::Value;

/// A finite, forward-only sequence of records.
///
/// End of data is signalled with `Ok(None)`, never with an error. The engine
/// pulls from a source sequentially and never concurrently.
#[async_trait]
pub trait RecordSource: Send {
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError>;
}

/// A record source over records held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecSource {
    records: VecDeque<Record>,
    fail_after: Option<(usize, SourceError)>,
    served: usize,
}

impl VecSource {
    pub fn new(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            records: records.into_iter().collect(),
            fail_after: None,
            served: 0,
        }
    }

    /// One record per value list.
    pub fn from_rows<I, R>(rows: I) -> Self
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = Value>,
    {
        Self::new(
            rows.into_iter()
                .map(|values| Record::new(values.into_iter().collect())),
        )
    }

    /// Fail with `error` once `count` records were served.
    pub fn failing_after(mut self, count: usize, error: SourceError) -> Self {
        self.fail_after = Some((count, error));
        self
    }

    pub fn remaining(&self) -> usize {
        self.records.len()
    }
}

#[async_trait]
impl RecordSource for VecSource {
    async fn next_record(&mut self) -> Result<Option<Record>, SourceError> {
        if let Some((count, error)) = &self.fail_after
            && self.served >= *count
        {
            return Err(error.clone());
        }
        let record = self.records.pop_front();
        if record.is_some() {
            self.served += 1;
        }
        Ok(record)
    }
}
