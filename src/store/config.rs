//! Store configuration
//!
//! Loaded from a JSON document; every field has a default.
//!
//! ```json
//! {
//!   "lock_timeout_ms": 5000,
//!   "lock_retry_interval_ms": 50,
//!   "max_store_size_bytes": 1073741824,
//!   "sync_on_commit": true,
//!   "profiling": { "identifier": "case-17", "path": "/tmp/profiles" }
//! }
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::{BackendOptions, LockPolicy};
use crate::errors::StoreError;

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid config document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl From<ConfigError> for StoreError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Read { path, source } => {
                StoreError::io(format!("failed to read config file {}", path.display()), source)
            }
            other => StoreError::invalid_config(other.to_string()),
        }
    }
}

/// Storage profiler settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProfilingConfig {
    /// Suffix of the sample file name
    pub identifier: String,

    /// Directory the sample file is written to
    pub path: PathBuf,
}

/// Store configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    /// Maximum wait for the writer lock (default: 5000)
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Pause between lock attempts (default: 50)
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,

    /// Cap on the store size; unlimited when absent
    #[serde(default)]
    pub max_store_size_bytes: Option<u64>,

    /// fsync data and index on commit (default: true)
    #[serde(default = "default_sync_on_commit")]
    pub sync_on_commit: bool,

    /// Enables the storage profiler
    #[serde(default)]
    pub profiling: Option<ProfilingConfig>,
}

fn default_lock_timeout_ms() -> u64 {
    5000
}

fn default_lock_retry_interval_ms() -> u64 {
    50
}

fn default_sync_on_commit() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
            max_store_size_bytes: None,
            sync_on_commit: default_sync_on_commit(),
            profiling: None,
        }
    }
}

impl StoreConfig {
    /// Parses and validates a JSON config document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: StoreConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a JSON config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "lock_timeout_ms",
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.lock_retry_interval_ms == 0 || self.lock_retry_interval_ms > self.lock_timeout_ms {
            return Err(ConfigError::InvalidValue {
                field: "lock_retry_interval_ms",
                reason: format!(
                    "must be greater than 0 and at most lock_timeout_ms ({})",
                    self.lock_timeout_ms
                ),
            });
        }
        if self.max_store_size_bytes == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "max_store_size_bytes",
                reason: "must be greater than 0".to_string(),
            });
        }
        if let Some(profiling) = &self.profiling {
            if profiling.identifier.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "profiling.identifier",
                    reason: "must not be empty".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn lock_policy(&self) -> LockPolicy {
        LockPolicy {
            timeout: Duration::from_millis(self.lock_timeout_ms),
            retry_interval: Duration::from_millis(self.lock_retry_interval_ms),
        }
    }

    pub fn backend_options(&self) -> BackendOptions {
        BackendOptions {
            max_store_size_bytes: self.max_store_size_bytes,
            sync_on_commit: self.sync_on_commit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OpenMode;
    use crate::errors::StoreErrorCode;
    use crate::schema::Schema;
    use crate::store::Store;

    #[test]
    fn test_default_config() {
        let config = StoreConfig::default();
        assert_eq!(config.lock_timeout_ms, 5000);
        assert_eq!(config.lock_retry_interval_ms, 50);
        assert!(config.sync_on_commit);
        assert!(config.max_store_size_bytes.is_none());
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_policy(), LockPolicy::default());
        assert_eq!(config.backend_options(), BackendOptions::default());
    }

    #[test]
    fn test_empty_document_uses_defaults() {
        assert_eq!(StoreConfig::from_json_str("{}").unwrap(), StoreConfig::default());
    }

    #[test]
    fn test_full_document() {
        let config = StoreConfig::from_json_str(
            r#"{
                "lock_timeout_ms": 200,
                "lock_retry_interval_ms": 20,
                "max_store_size_bytes": 4096,
                "sync_on_commit": false,
                "profiling": { "identifier": "case", "path": "/tmp" }
            }"#,
        )
        .unwrap();
        assert_eq!(config.lock_policy().timeout, Duration::from_millis(200));
        assert_eq!(config.backend_options().max_store_size_bytes, Some(4096));
        assert!(!config.backend_options().sync_on_commit);
        assert_eq!(config.profiling.unwrap().identifier, "case");
    }

    #[test]
    fn test_invalid_values() {
        for json in [
            r#"{"lock_timeout_ms": 0}"#,
            r#"{"lock_retry_interval_ms": 0}"#,
            r#"{"lock_timeout_ms": 10, "lock_retry_interval_ms": 20}"#,
            r#"{"max_store_size_bytes": 0}"#,
            r#"{"profiling": {"identifier": "", "path": "/tmp"}}"#,
        ] {
            let err = StoreConfig::from_json_str(json).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue { .. }), "{}", json);
        }
    }

    #[test]
    fn test_unknown_field_rejected() {
        let err = StoreConfig::from_json_str(r#"{"lock_timeout": 10}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_conversion_to_store_error() {
        let missing = StoreConfig::load(Path::new("/nonexistent/acstore.json")).unwrap_err();
        assert_eq!(StoreError::from(missing).code(), StoreErrorCode::Io);

        let invalid = StoreConfig::from_json_str(r#"{"lock_timeout_ms": 0}"#).unwrap_err();
        let err = StoreError::from(invalid);
        assert_eq!(err.code(), StoreErrorCode::InvalidConfig);
        assert!(err.is_validation());

        let unparsable = StoreConfig::from_json_str("{").unwrap_err();
        assert_eq!(StoreError::from(unparsable).code(), StoreErrorCode::InvalidConfig);
    }

    #[test]
    fn test_open_with_invalid_config() {
        let config = StoreConfig {
            lock_retry_interval_ms: 0,
            ..StoreConfig::default()
        };
        let err = Store::open_with_config("memory:", OpenMode::Create, Schema::new(1), config)
            .err()
            .unwrap();
        assert_eq!(err.code(), StoreErrorCode::InvalidConfig);
    }
}
