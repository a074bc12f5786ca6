//! Engine configuration.
//!
//! Every section is optional in YAML; missing sections and fields fall back
//! to the defaults documented on each field.

mod component_key;
mod loader;
mod vars;

pub use component_key::ComponentKey;
pub use loader::is_yaml_file;
pub use vars::{Interpolated, interpolate};

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub error_handling: ErrorHandlingConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub lookup_cache: LookupCacheConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

impl EngineConfig {
    /// Check every section, collecting all problems before failing.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            ("runner.max_concurrency", self.runner.max_concurrency == 0),
            ("batch.max_batch_size", self.batch.max_batch_size == 0),
            ("batch.flush_interval_ms", self.batch.flush_interval_ms == 0),
            ("lookup_cache.max_entries", self.lookup_cache.max_entries == 0),
        ];
        let mut invalid: Vec<&str> = checks
            .into_iter()
            .filter_map(|(field, is_zero)| is_zero.then_some(field))
            .collect();

        match invalid.len() {
            0 => Ok(()),
            1 => Err(ConfigError::InvalidValue {
                field: invalid.remove(0).to_string(),
                message: "must be at least 1".to_string(),
            }),
            _ => Err(ConfigError::MultipleErrors {
                errors: invalid
                    .into_iter()
                    .map(|field| format!("{field}: must be at least 1"))
                    .collect(),
            }),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerConfig {
    /// Maximum number of tasks executing at once (default: 4).
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Run the analyzers that consume the same row concurrently (default: false).
    #[serde(default)]
    pub parallel_analyzers: bool,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            parallel_analyzers: false,
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}

/// How row-level component errors affect a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ErrorHandlingConfig {
    /// Abort a partition once this many row errors happened (0 = unlimited, default: 0).
    #[serde(default)]
    pub max_row_errors: usize,
    /// Keep the job successful when only row-level errors occurred (default: false).
    #[serde(default)]
    pub tolerate_row_errors: bool,
}

/// Batch transformation buffer defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BatchConfig {
    /// Largest batch handed to the underlying operation (default: 20).
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,
    /// Period of the scheduled flush in milliseconds (default: 1000).
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    /// How long a caller waits for its output before giving up (default: 30000).
    #[serde(default = "default_await_timeout_ms")]
    pub await_timeout_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            await_timeout_ms: default_await_timeout_ms(),
        }
    }
}

impl BatchConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn await_timeout(&self) -> Duration {
        Duration::from_millis(self.await_timeout_ms)
    }
}

fn default_max_batch_size() -> usize {
    20
}

fn default_flush_interval_ms() -> u64 {
    1000
}

fn default_await_timeout_ms() -> u64 {
    30_000
}

/// Lookup cache bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LookupCacheConfig {
    /// Maximum number of cached lookups before LRU eviction (default: 10000).
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    /// Absolute time-to-live of a cached lookup in seconds (default: 300).
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for LookupCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            ttl_secs: default_ttl_secs(),
        }
    }
}

impl LookupCacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

fn default_max_entries() -> usize {
    10_000
}

fn default_ttl_secs() -> u64 {
    300
}

/// Progress reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProgressConfig {
    /// Log a progress line every N rows (default: 10000, 0 disables).
    #[serde(default = "default_log_interval_rows")]
    pub log_interval_rows: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            log_interval_rows: default_log_interval_rows(),
        }
    }
}

fn default_log_interval_rows() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.runner.max_concurrency, 4);
        assert!(!config.runner.parallel_analyzers);
        assert_eq!(config.batch.max_batch_size, 20);
        assert_eq!(config.batch.flush_interval(), Duration::from_millis(1000));
        assert_eq!(config.lookup_cache.max_entries, 10_000);
        assert_eq!(config.lookup_cache.ttl(), Duration::from_secs(300));
        assert_eq!(config.error_handling.max_row_errors, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_yaml_empty() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_yaml_partial_sections() {
        let yaml = r#"
runner:
  max_concurrency: 8
batch:
  max_batch_size: 3
  flush_interval_ms: 50
"#;
        let config: EngineConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.runner.max_concurrency, 8);
        assert_eq!(config.batch.max_batch_size, 3);
        assert_eq!(config.batch.flush_interval_ms, 50);
        assert_eq!(config.batch.await_timeout_ms, 30_000);
        assert_eq!(config.lookup_cache, LookupCacheConfig::default());
    }

    #[test]
    fn test_yaml_rejects_unknown_fields() {
        let yaml = "runner:\n  threads: 2\n";
        assert!(serde_yaml::from_str::<EngineConfig>(yaml).is_err());
    }

    #[test]
    fn test_validate_single_error() {
        let mut config = EngineConfig::default();
        config.runner.max_concurrency = 0;

        let err = config.validate().unwrap_err();
        match err {
            ConfigError::InvalidValue { field, .. } => {
                assert_eq!(field, "runner.max_concurrency");
            }
            other => panic!("Expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_collects_all_errors() {
        let mut config = EngineConfig::default();
        config.batch.max_batch_size = 0;
        config.lookup_cache.max_entries = 0;

        match config.validate().unwrap_err() {
            ConfigError::MultipleErrors { errors } => assert_eq!(errors.len(), 2),
            other => panic!("Expected MultipleErrors, got {other:?}"),
        }
    }

    #[test]
    fn test_serde_roundtrip() {
        let mut config = EngineConfig::default();
        config.error_handling.tolerate_row_errors = true;
        let json = serde_json::to_string(&config).unwrap();
        let parsed: EngineConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
