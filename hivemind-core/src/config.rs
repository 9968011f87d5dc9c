//! Configuration for hivemind clients.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{HivemindError, Result};

/// Default storage directory for the file-backed CAS.
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hivemind")
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HivemindConfig {
    #[serde(default)]
    pub cas: CasConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl HivemindConfig {
    /// Parse from TOML.
    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| HivemindError::Config(e.to_string()))
    }

    /// Serialize to TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| HivemindError::Config(e.to_string()))
    }
}

/// Which store backs the CAS handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CasBackend {
    Memory,
    File,
}

/// CAS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CasConfig {
    #[serde(default = "default_backend")]
    pub backend: CasBackend,

    /// Root directory for the file backend
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Timeout for a single put/get (milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_backend() -> CasBackend {
    CasBackend::File
}

fn default_timeout_ms() -> u64 {
    30_000
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            storage_dir: default_storage_dir(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HivemindConfig::default();
        assert_eq!(config.cas.backend, CasBackend::File);
        assert_eq!(config.cas.timeout_ms, 30_000);
        assert!(config.cas.storage_dir.ends_with("hivemind"));
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = HivemindConfig::from_toml(
            r#"
[cas]
backend = "memory"
timeout_ms = 500
"#,
        )
        .unwrap();

        assert_eq!(config.cas.backend, CasBackend::Memory);
        assert_eq!(config.cas.timeout_ms, 500);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = HivemindConfig::default();
        config.cas.storage_dir = PathBuf::from("/tmp/hivemind-test");
        config.logging.level = "debug".to_string();

        let parsed = HivemindConfig::from_toml(&config.to_toml().unwrap()).unwrap();
        assert_eq!(parsed.cas.storage_dir, PathBuf::from("/tmp/hivemind-test"));
        assert_eq!(parsed.logging.level, "debug");
    }

    #[test]
    fn test_invalid_backend() {
        let err = HivemindConfig::from_toml("[cas]\nbackend = \"s3\"\n").unwrap_err();
        assert!(matches!(err, HivemindError::Config(_)));
    }
}
