//! Reading engine configuration from YAML.

use std::path::Path;

use snafu::prelude::*;
use tracing::debug;

use super::{EngineConfig, interpolate};
use crate::error::{ConfigError, ReadFileSnafu, UnsupportedFormatSnafu, YamlParseSnafu};

/// Check if a path has a YAML extension.
pub fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

impl EngineConfig {
    /// Parse, interpolate and validate a YAML document.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let interpolated = interpolate(contents);
        if !interpolated.is_ok() {
            return Err(ConfigError::EnvInterpolation {
                message: interpolated.problems.join("\n"),
            });
        }

        let config: EngineConfig =
            serde_yaml::from_str(&interpolated.text).context(YamlParseSnafu)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a `.yaml`/`.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        ensure!(
            is_yaml_file(path),
            UnsupportedFormatSnafu {
                path: path.to_path_buf()
            }
        );

        let contents = std::fs::read_to_string(path).context(ReadFileSnafu {
            path: path.to_path_buf(),
        })?;
        debug!(path = %path.display(), "Loaded engine configuration");
        Self::from_yaml(&contents)
    }
}
