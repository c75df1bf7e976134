//! # Configuration
//!
//! `capstone.toml` plus environment overrides. Precedence, lowest first:
//! built-in defaults, the config file, `CAPSTONE_*` variables, CLI flags.
//!
//! ```toml
//! [storage]
//! backend = "redb"          # or "memory"
//! path = "capstone.redb"
//!
//! [access]
//! code_length = 12
//! session_minutes = 240
//!
//! [log]
//! format = "text"           # or "json"
//! ```

use capstone_core::{AccessPolicy, CapstoneError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Config file looked up in the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "capstone.toml";

/// Overrides `storage.path`.
pub const ENV_DATABASE: &str = "CAPSTONE_DB";

/// Overrides `log.format`.
pub const ENV_LOG_FORMAT: &str = "CAPSTONE_LOG_FORMAT";

/// Storage backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// ACID database file.
    #[default]
    Redb,
    /// Volatile; state is lost when the process exits.
    Memory,
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = CapstoneError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(CapstoneError::Validation(format!(
                "unknown log format '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    pub backend: Backend,
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Redb,
            path: PathBuf::from("capstone.redb"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AccessConfig {
    pub code_length: usize,
    pub session_minutes: i64,
}

impl Default for AccessConfig {
    fn default() -> Self {
        let policy = AccessPolicy::default();
        Self {
            code_length: policy.code_length,
            session_minutes: policy.grant_minutes,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogConfig {
    pub format: LogFormat,
}

/// Complete application configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub storage: StorageConfig,
    pub access: AccessConfig,
    pub log: LogConfig,
}

impl Config {
    /// Parse a config document.
    pub fn from_toml_str(text: &str) -> Result<Self, CapstoneError> {
        toml::from_str(text)
            .map_err(|e| CapstoneError::Serialization(format!("Invalid config: {}", e)))
    }

    /// Load the config file.
    ///
    /// An explicit path must exist. Without one, `capstone.toml` in the
    /// working directory is used if present, otherwise the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, CapstoneError> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let fallback = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !fallback.is_file() {
                    return Ok(Self::default());
                }
                fallback
            }
        };
        let text = std::fs::read_to_string(&path).map_err(|e| {
            CapstoneError::Io(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `CAPSTONE_*` overrides. `lookup` is `std::env::var` in production.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), CapstoneError> {
        if let Some(path) = lookup(ENV_DATABASE).filter(|p| !p.trim().is_empty()) {
            self.storage.path = PathBuf::from(path);
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            self.log.format = format.parse()?;
        }
        Ok(())
    }

    /// The access policy for the session, validated.
    pub fn access_policy(&self) -> Result<AccessPolicy, CapstoneError> {
        let policy = AccessPolicy {
            code_length: self.access.code_length,
            grant_minutes: self.access.session_minutes,
        };
        policy.validate()?;
        Ok(policy)
    }
}
