//! Result sinks.

use std::sync::Mutex;

use async_trait::async_trait;
use indexmap::IndexMap;
use sifter_core::ComponentKey;

use crate::result::AnalyzerResult;

/// Receives the final result of every result-producing component once a run
/// has completed successfully.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn accept(&self, component: &ComponentKey, result: &AnalyzerResult);
}

/// Sink that discards results.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

#[async_trait]
impl ResultSink for NoopSink {
    async fn accept(&self, _component: &ComponentKey, _result: &AnalyzerResult) {}
}

/// Sink that keeps results in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    results: Mutex<IndexMap<ComponentKey, AnalyzerResult>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> IndexMap<ComponentKey, AnalyzerResult> {
        self.results
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, component: &str) -> Option<AnalyzerResult> {
        self.results
            .lock()
            .ok()
            .and_then(|r| r.get(&ComponentKey::new(component)).cloned())
    }
}

#[async_trait]
impl ResultSink for CollectingSink {
    async fn accept(&self, component: &ComponentKey, result: &AnalyzerResult) {
        if let Ok(mut results) = self.results.lock() {
            results.insert(component.clone(), result.clone());
        }
    }
}
