//! Logging
//!
//! Installs the global `tracing` subscriber, writing to stderr. `RUST_LOG`,
//! when set to a valid filter, takes precedence over the configured level.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::Subscriber;
use tracing_subscriber::{fmt as fmt_layer, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoggingError {
    #[error("Invalid log level: {0}")]
    InvalidLevel(String),
    #[error("Invalid log format: {0} (expected: text|json)")]
    InvalidFormat(String),
    #[error("Logger has been already initialized")]
    AlreadyInitialized,
    #[error("Failed to initialize logger: {0}")]
    InitializationFailed(String),
}

pub type LoggingResult<T> = Result<T, LoggingError>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            _ => Err(LoggingError::InvalidFormat(s.to_string())),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => write!(f, "text"),
            LogFormat::Json => write!(f, "json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, e.g. `info` or `village=debug,warn`
    pub level: String,
    pub format: LogFormat,
    pub with_targets: bool,
    /// ANSI colors; ignored for JSON output
    pub use_color: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            with_targets: true,
            use_color: true,
        }
    }
}

/// Install the global subscriber described by `config`.
pub fn init(config: &LoggingConfig) -> LoggingResult<()> {
    let filter = mk_filter(&config.level)?;
    if tracing::dispatcher::has_been_set() {
        return Err(LoggingError::AlreadyInitialized);
    }

    match config.format {
        LogFormat::Text => {
            let layer = fmt_layer::layer()
                .with_writer(std::io::stderr)
                .with_ansi(config.use_color)
                .with_target(config.with_targets);
            init_with(tracing_subscriber::registry().with(filter).with(layer))
        }
        LogFormat::Json => {
            let layer = fmt_layer::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .with_target(config.with_targets);
            init_with(tracing_subscriber::registry().with(filter).with(layer))
        }
    }
}

fn mk_filter(level: &str) -> LoggingResult<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|_| LoggingError::InvalidLevel(level.to_string()))
}

fn init_with<S>(subscriber: S) -> LoggingResult<()>
where
    S: Subscriber + Send + Sync + 'static,
{
    subscriber.try_init().map_err(|e| {
        if tracing::dispatcher::has_been_set() {
            LoggingError::AlreadyInitialized
        } else {
            LoggingError::InitializationFailed(e.to_string())
        }
    })
}
