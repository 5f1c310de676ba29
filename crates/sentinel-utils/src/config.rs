//! Application-level configuration

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::{ENV_LOG_FORMAT, LogFormat};

/// Deployment environment, e.g. `development` or `production`
pub const ENV_ENVIRONMENT: &str = "SENTINEL_ENV";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {name}")]
    InvalidValue { name: &'static str, value: String },
}

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Application name
    pub app_name: String,
    /// Environment (development, production, etc.)
    pub environment: String,
    pub log_format: LogFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "stock-sentinel".to_string(),
            environment: "development".to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(environment) = lookup(ENV_ENVIRONMENT).filter(|e| !e.trim().is_empty()) {
            config.environment = environment.trim().to_string();
        }
        if let Some(format) = lookup(ENV_LOG_FORMAT) {
            config.log_format = format.parse()?;
        }
        Ok(config)
    }

    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}
