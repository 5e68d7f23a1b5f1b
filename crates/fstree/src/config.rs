//! TOML configuration for an engine.
//!
//! Every field has a default, so an empty file is a valid configuration:
//!
//! ```toml
//! [store]
//! max_resident_trees = 10000
//! history_depth = 256
//! idle_timeout_secs = 300
//!
//! [diff]
//! max_ops = 10000
//!
//! [sync]
//! message_timeout_ms = 30000
//! verify_integrity = false
//!
//! [source]
//! sqlite_path = "entries.db"
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use fstree_store::StoreConfig;
use fstree_sync::{DiffConfig, SyncConfig};

/// Errors loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Where trees are hydrated from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// SQLite entry store. Without one, trees live only in memory and are
    /// never evicted.
    pub sqlite_path: Option<PathBuf>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// An `EnvFilter` directive such as `info` or `fstree_sync=debug`.
    /// `RUST_LOG` takes precedence.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

/// Complete engine configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub store: StoreConfig,
    pub diff: DiffConfig,
    pub sync: SyncConfig,
    pub source: SourceConfig,
    pub logging: LoggingConfig,
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.diff.max_ops, 10_000);
        assert!(config.source.sqlite_path.is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = EngineConfig::from_toml_str(
            r#"
            [store]
            history_depth = 8

            [sync]
            verify_integrity = true

            [source]
            sqlite_path = "/var/lib/fstree/entries.db"

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.store.history_depth, 8);
        assert_eq!(
            config.store.max_resident_trees,
            StoreConfig::default().max_resident_trees
        );
        assert!(config.sync.verify_integrity);
        assert_eq!(config.sync.message_timeout_ms, 30_000);
        assert_eq!(
            config.source.sqlite_path.as_deref(),
            Some(Path::new("/var/lib/fstree/entries.db"))
        );
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            EngineConfig::from_toml_str("[diff]\nmax_ops = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            EngineConfig::from_toml_str("[logging]\nformat = \"xml\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fstree.toml");
        std::fs::write(&path, "[diff]\nmax_ops = 5\n").unwrap();
        assert_eq!(EngineConfig::from_file(&path).unwrap().diff.max_ops, 5);

        let missing = EngineConfig::from_file(dir.path().join("missing.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }
}
