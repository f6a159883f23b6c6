//! Typed run configuration.
//!
//! Configurations are read from JSON, may be partially overridden from a loosely
//! typed JSON object, and are handed from the root rank to all other ranks.
//! Unknown keys are rejected everywhere.

use std::path::{Path, PathBuf};

use log::LevelFilter;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DistributionError, Result};
use crate::mpi::{broadcast_serializing, ProcessGroup};

/// How a rank sets up its logger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    /// Maximum level that is logged.
    pub level: LevelFilter,
    /// Directory for per-rank log files. Logs go to stdout if unset.
    pub directory: Option<PathBuf>,
    /// Writes one JSON object per log record instead of plain text.
    pub json: bool,
    /// Mirrors records of level info and above to stdout when logging to files.
    pub duplicate_to_stdout: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LevelFilter::Info,
            directory: None,
            json: false,
            duplicate_to_stdout: true,
        }
    }
}

impl LoggingConfig {
    fn merge(&mut self, overrides: &Value) -> Result<()> {
        for (key, value) in as_object("logging", overrides)? {
            match key.as_str() {
                "level" => self.level = field("logging.level", value)?,
                "directory" => self.directory = field("logging.directory", value)?,
                "json" => self.json = field("logging.json", value)?,
                "duplicate_to_stdout" => {
                    self.duplicate_to_stdout = field("logging.duplicate_to_stdout", value)?;
                }
                _ => return Err(unknown_key("logging", key)),
            }
        }
        Ok(())
    }
}

/// Options of the result gather.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatherConfig {
    /// Compares trailing shapes and element sizes across ranks before each
    /// gather, at the cost of two extra collective calls.
    pub validate_shapes: bool,
}

impl GatherConfig {
    fn merge(&mut self, overrides: &Value) -> Result<()> {
        for (key, value) in as_object("gather", overrides)? {
            match key.as_str() {
                "validate_shapes" => self.validate_shapes = field("gather.validate_shapes", value)?,
                _ => return Err(unknown_key("gather", key)),
            }
        }
        Ok(())
    }
}

/// The complete configuration of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    pub logging: LoggingConfig,
    pub gather: GatherConfig,
}

impl RunConfig {
    /// Parses a configuration from JSON. Missing sections take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Reads a JSON configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    /// Applies the keys present in `overrides` field by field, leaving all other
    /// fields untouched.
    ///
    /// # Errors
    /// Fails on the first unknown key or mistyped value, naming its full path.
    /// Fields merged before the failing key keep their new value.
    pub fn merge_json(&mut self, overrides: &Value) -> Result<()> {
        for (key, value) in as_object("config", overrides)? {
            match key.as_str() {
                "logging" => self.logging.merge(value)?,
                "gather" => self.gather.merge(value)?,
                _ => return Err(unknown_key("config", key)),
            }
        }
        Ok(())
    }

    /// Hands the configuration of `root` to all ranks of `group`. The value
    /// passed on other ranks is ignored.
    pub fn broadcast<G>(self, group: &G, root: usize) -> Result<Self>
    where
        G: ProcessGroup,
    {
        broadcast_serializing(self, group, root)
    }
}

fn as_object<'a>(section: &str, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| DistributionError::invalid(section, "must be a JSON object"))
}

fn field<T>(path: &str, value: &Value) -> Result<T>
where
    T: DeserializeOwned,
{
    T::deserialize(value).map_err(|e| DistributionError::invalid(path, e.to_string()))
}

fn unknown_key(section: &str, key: &str) -> DistributionError {
    DistributionError::invalid(format!("{section}.{key}"), "is not a known key")
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::mpi::ThreadGroup;

    #[test]
    fn test_defaults_for_missing_sections() {
        let config = RunConfig::from_json_str(r#"{"gather": {"validate_shapes": true}}"#).unwrap();
        assert!(config.gather.validate_shapes);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_parse_rejects_unknown_keys() {
        let result = RunConfig::from_json_str(r#"{"gather": {"check": true}}"#);
        assert!(matches!(result, Err(DistributionError::Config(_))));
    }

    #[test]
    fn test_merge_overrides_fields() {
        let mut config = RunConfig::default();
        config
            .merge_json(&json!({
                "logging": {"level": "Debug", "directory": "/tmp/logs"},
                "gather": {"validate_shapes": true}
            }))
            .unwrap();

        assert_eq!(config.logging.level, LevelFilter::Debug);
        assert_eq!(config.logging.directory, Some(PathBuf::from("/tmp/logs")));
        assert!(config.logging.duplicate_to_stdout);
        assert!(config.gather.validate_shapes);
    }

    #[test]
    fn test_merge_rejects_unknown_key() {
        let mut config = RunConfig::default();
        let error = config
            .merge_json(&json!({"logging": {"colour": true}}))
            .unwrap_err();
        assert!(matches!(
            error,
            DistributionError::InvalidConfiguration { ref parameter, .. } if parameter == "logging.colour"
        ));
    }

    #[test]
    fn test_merge_rejects_mistyped_value() {
        let mut config = RunConfig::default();
        let error = config
            .merge_json(&json!({"gather": {"validate_shapes": "yes"}}))
            .unwrap_err();
        assert!(matches!(
            error,
            DistributionError::InvalidConfiguration { ref parameter, .. } if parameter == "gather.validate_shapes"
        ));
        assert!(!config.gather.validate_shapes);
    }

    #[test]
    fn test_merge_rejects_non_object() {
        let mut config = RunConfig::default();
        assert!(config.merge_json(&json!([1, 2])).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(&path, r#"{"logging": {"json": true}}"#).unwrap();

        let config = RunConfig::from_file(&path).unwrap();
        assert!(config.logging.json);
    }

    #[test]
    fn test_broadcast_config() {
        let mut reference = RunConfig::default();
        reference.gather.validate_shapes = true;
        reference.logging.level = LevelFilter::Trace;

        let results = ThreadGroup::run(3, |group| {
            let config = if group.rank() == 0 {
                reference.clone()
            } else {
                RunConfig::default()
            };
            config.broadcast(&group, 0).unwrap()
        })
        .unwrap();
        assert!(results.iter().all(|config| *config == reference));
    }
}
