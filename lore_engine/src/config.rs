//! Configuration loading and validation.
//!
//! Loads TOML configuration files. Every field has a default, so an empty
//! file (or no file at all) yields a working [`LoreConfig`].

use std::path::{Path, PathBuf};

use lorebook::{DEFAULT_SCAN_DEPTH, DEFAULT_TOKEN_BUDGET};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::context_assembler::AssemblyConfig;
use crate::tokens::DEFAULT_CONTEXT_LIMIT;

/// Log levels accepted in `[logging] level`.
pub const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level configuration.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoreConfig {
    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where lorebooks are persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one JSON file per storage key.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".lorekeeper")
}

/// Budgets and limits for context assembly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Lore budget used when the caller gives none.
    #[serde(default = "default_token_budget")]
    pub default_token_budget: usize,

    /// Model context window used for token statistics.
    #[serde(default = "default_context_limit")]
    pub context_limit: usize,

    /// Scan depth given to newly created lorebooks.
    #[serde(default = "default_scan_depth")]
    pub default_scan_depth: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            default_token_budget: default_token_budget(),
            context_limit: default_context_limit(),
            default_scan_depth: default_scan_depth(),
        }
    }
}

impl ContextConfig {
    pub fn assembly(&self) -> AssemblyConfig {
        AssemblyConfig {
            max_tokens: self.default_token_budget,
        }
    }
}

fn default_token_budget() -> usize {
    DEFAULT_TOKEN_BUDGET
}

fn default_context_limit() -> usize {
    DEFAULT_CONTEXT_LIMIT
}

fn default_scan_depth() -> usize {
    DEFAULT_SCAN_DEPTH
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter level; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LoreConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content)?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Load from `path` if it exists, otherwise fall back to defaults.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Parse and validate configuration from a TOML string.
    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        let config: LoreConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.context.context_limit == 0 {
            return Err(ConfigError::Validation(
                "context.context_limit must be greater than 0".to_string(),
            ));
        }

        let level = self.logging.level.to_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {}, got '{}'",
                LOG_LEVELS.join(", "),
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = LoreConfig::parse("").unwrap();
        assert_eq!(config, LoreConfig::default());
        assert_eq!(config.context.default_token_budget, 2000);
        assert_eq!(config.context.context_limit, 8000);
        assert_eq!(config.context.default_scan_depth, 10);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_config() {
        let config = LoreConfig::parse(
            r#"
            [storage]
            data_dir = "/var/lib/lore"

            [context]
            default_token_budget = 512
            "#,
        )
        .unwrap();

        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/lore"));
        assert_eq!(config.context.default_token_budget, 512);
        assert_eq!(config.context.context_limit, 8000);
        assert_eq!(config.context.assembly().max_tokens, 512);
    }

    #[test]
    fn test_rejects_zero_context_limit() {
        let result = LoreConfig::parse("[context]\ncontext_limit = 0\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_rejects_unknown_log_level() {
        let result = LoreConfig::parse("[logging]\nlevel = \"chatty\"\n");
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let result = LoreConfig::parse("[context\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[logging]\nlevel = \"debug\"").unwrap();

        let config = LoreConfig::load(file.path()).unwrap();
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoreConfig::load_or_default(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LoreConfig::default());
    }
}
