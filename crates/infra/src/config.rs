//! Runtime configuration.
//!
//! Sources, later overriding earlier:
//! 1. `stratum.yaml` in the current directory (if it exists)
//! 2. File named by `STRATUM_CONFIG` (if set; must exist)
//! 3. `STRATUM__*` environment variables, `__` separating nested keys
//!    (e.g. `STRATUM__EMAIL_BREAKER__TIMEOUT_MS=2000`)

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::repository::DEFAULT_SNAPSHOT_INTERVAL;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "stratum.yaml";
/// Environment variable for an explicit configuration file path.
pub const CONFIG_ENV_VAR: &str = "STRATUM_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "STRATUM";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Snapshot every N events; 0 disables snapshots.
    pub snapshot_interval: u64,
    pub storage: StorageConfig,
    pub email_breaker: BreakerSettings,
    pub log: LogConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            storage: StorageConfig::default(),
            email_breaker: BreakerSettings::default(),
            log: LogConfig::default(),
        }
    }
}

/// File locations for the stores. Absent paths keep the store in memory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub event_store_path: Option<PathBuf>,
    pub snapshot_store_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub timeout_ms: u64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        let defaults = CircuitBreakerConfig::default();
        Self {
            failure_threshold: defaults.failure_threshold,
            success_threshold: defaults.success_threshold,
            timeout_ms: u64::try_from(defaults.timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl From<BreakerSettings> for CircuitBreakerConfig {
    fn from(value: BreakerSettings) -> Self {
        CircuitBreakerConfig::new(
            value.failure_threshold,
            value.success_threshold,
            Duration::from_millis(value.timeout_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` overrides it.
    pub filter: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
            json: true,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from the default file, `STRATUM_CONFIG` and the
    /// process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let explicit = std::env::var(CONFIG_ENV_VAR).ok();
        Self::load_from(explicit.as_deref(), None)
    }

    /// Parse a YAML document, layered over the defaults.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, File, FileFormat};

        let config = ConfigLib::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// `env` replaces the process environment when given.
    fn load_from(
        explicit_file: Option<&str>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(path) = explicit_file {
            builder = builder.add_source(File::new(path, FileFormat::Yaml).required(true));
        }

        let config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()?;
        Ok(config.try_deserialize()?)
    }
}
