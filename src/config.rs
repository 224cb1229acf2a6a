//! Runtime configuration types.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default config file name looked up next to the program.
pub const CONFIG_FILE: &str = "kiln.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
}

/// Runtime configuration for the VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum eval stack depth per executor
    pub eval_stack_capacity: usize,
    /// Maximum call depth per executor
    pub call_stack_capacity: usize,
    /// Maximum local slots live across all frames of one executor
    pub local_slot_capacity: usize,
    /// Emit a trace event per executed instruction
    pub trace: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            eval_stack_capacity: 1024,
            call_stack_capacity: 1024,
            local_slot_capacity: 65536,
            trace: false,
        }
    }
}

/// Layout of `kiln.toml`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    runtime: RuntimeConfig,
}

impl RuntimeConfig {
    pub fn from_toml(content: &str, path: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_string(),
            source,
        })?;
        Ok(file.runtime)
    }

    /// Load the `[runtime]` table of a config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml(&content, &display)
    }

    /// Load `kiln.toml` from `dir` if present, else the defaults.
    pub fn discover(dir: &Path) -> Result<Self, ConfigError> {
        let path = dir.join(CONFIG_FILE);
        if path.is_file() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(&ConfigFile {
            runtime: self.clone(),
        })?;
        fs::write(path, content).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_table_keeps_defaults() {
        let config = RuntimeConfig::from_toml("[runtime]\ncall_stack_capacity = 8\n", "t").unwrap();
        assert_eq!(config.call_stack_capacity, 8);
        assert_eq!(config.eval_stack_capacity, 1024);
        assert!(!config.trace);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = RuntimeConfig::from_toml("", "t").unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_parse_error_names_file() {
        let err = RuntimeConfig::from_toml("[runtime]\ntrace = 3\n", "kiln.toml").unwrap_err();
        assert!(err.to_string().contains("kiln.toml"));
    }

    #[test]
    fn test_save_and_discover() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(RuntimeConfig::discover(dir.path()).unwrap(), RuntimeConfig::default());

        let config = RuntimeConfig {
            eval_stack_capacity: 64,
            trace: true,
            ..RuntimeConfig::default()
        };
        config.save(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(RuntimeConfig::discover(dir.path()).unwrap(), config);
    }
}
