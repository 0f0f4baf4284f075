//! Configuration
//!
//! Settings are layered: built-in defaults, then an optional YAML file,
//! then environment overrides.

pub mod duration_ms;

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::agents::fanin::OrchestratorConfig;
use crate::agents::pool::{PoolConfig, PoolError};
use crate::agents::types::AgentConfig;
use crate::logging::{LogFormat, LoggingConfig};

pub const ENV_DEFAULT_TIMEOUT_MS: &str = "VILLAGE_DEFAULT_TIMEOUT_MS";
pub const ENV_ABORT_ON_REQUIRED_FAILURE: &str = "VILLAGE_ABORT_ON_REQUIRED_FAILURE";
pub const ENV_POOL_MIN_SIZE: &str = "VILLAGE_POOL_MIN_SIZE";
pub const ENV_POOL_MAX_SIZE: &str = "VILLAGE_POOL_MAX_SIZE";
pub const ENV_POOL_IDLE_TIMEOUT_MS: &str = "VILLAGE_POOL_IDLE_TIMEOUT_MS";
pub const ENV_LOG_LEVEL: &str = "VILLAGE_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "VILLAGE_LOG_FORMAT";
pub const ENV_DEFAULT_MODEL: &str = "DEFAULT_MODEL";
pub const ENV_MAX_BUDGET_USD: &str = "MAX_BUDGET_USD";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid value for {key}: '{value}'")]
    InvalidValue { key: String, value: String },
    #[error(transparent)]
    Pool(#[from] PoolError),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Everything the runtime needs, in one place
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
    /// Defaults for newly constructed agents
    pub agent: AgentConfig,
}

impl Settings {
    /// `~/.village/settings.yaml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".village")
            .join("settings.yaml")
    }

    /// Load settings from `path` (or [`default_path`](Self::default_path))
    /// and apply environment overrides.
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let path = path.map_or_else(Self::default_path, Path::to_path_buf);
        let mut settings = Self::from_file(&path)?;
        settings.apply_env()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read a YAML file; a missing file yields the defaults.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        match std::fs::read_to_string(path) {
            Ok(content) => {
                debug!(path = %path.display(), "loading settings");
                Self::from_yaml(&content)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no settings file, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    pub fn from_yaml(content: &str) -> ConfigResult<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> ConfigResult<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from any key lookup.
    pub fn apply_overrides<L>(&mut self, lookup: L) -> ConfigResult<()>
    where
        L: Fn(&str) -> Option<String>,
    {
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_DEFAULT_TIMEOUT_MS)? {
            self.orchestrator.default_timeout = Duration::from_millis(ms);
        }
        if let Some(raw) = lookup(ENV_ABORT_ON_REQUIRED_FAILURE) {
            self.orchestrator.abort_on_required_failure =
                parse_bool(&raw).ok_or_else(|| invalid(ENV_ABORT_ON_REQUIRED_FAILURE, &raw))?;
        }
        if let Some(size) = parse_var(&lookup, ENV_POOL_MIN_SIZE)? {
            self.pool.min_size = size;
        }
        if let Some(size) = parse_var(&lookup, ENV_POOL_MAX_SIZE)? {
            self.pool.max_size = size;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, ENV_POOL_IDLE_TIMEOUT_MS)? {
            self.pool.idle_timeout = Duration::from_millis(ms);
        }
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.logging.level = level;
        }
        if let Some(format) = parse_var::<LogFormat, _>(&lookup, ENV_LOG_FORMAT)? {
            self.logging.format = format;
        }
        if let Some(model) = lookup(ENV_DEFAULT_MODEL) {
            self.agent.model = Some(model);
        }
        if let Some(budget) = parse_var::<f64, _>(&lookup, ENV_MAX_BUDGET_USD)? {
            self.agent.max_budget_usd = Some(budget);
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.pool.validate()?;
        Ok(())
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    }
}

fn parse_var<T, L>(lookup: &L, key: &str) -> ConfigResult<Option<T>>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| raw.trim().parse().map_err(|_| invalid(key, &raw)))
        .transpose()
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
