//! Logging and tracing utilities

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::ConfigError;

/// Selects the output format; `text` when unset
pub const ENV_LOG_FORMAT: &str = "SENTINEL_LOG_FORMAT";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl LogFormat {
    /// Format named by `SENTINEL_LOG_FORMAT`, falling back to text
    pub fn from_env() -> Self {
        std::env::var(ENV_LOG_FORMAT)
            .ok()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or_default()
    }
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "pretty" | "" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::InvalidValue {
                name: ENV_LOG_FORMAT,
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

/// Initialize tracing with `RUST_LOG`, defaulting to `info`, in the format
/// named by `SENTINEL_LOG_FORMAT`
pub fn init_tracing() {
    init_tracing_with(LogFormat::from_env(), "info");
}

/// Initialize tracing in `format` with `RUST_LOG`, defaulting to
/// `default_filter`.
///
/// Does nothing if a global subscriber is already installed. Returns whether
/// this call installed it.
pub fn init_tracing_with(format: LogFormat, default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let json = format == LogFormat::Json;

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .try_init()
        .is_ok();
    if installed {
        tracing::debug!("Logging initialized ({} output)", format);
    }
    installed
}
