//! Configuration for the cache and sentinel stores

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SentinelError};
use crate::freshness::{CostEstimates, DEFAULT_TTL_HOURS, FreshnessPolicy, parse_rule};
use crate::retry::RetryPolicy;

pub const ENV_DATA_DIR: &str = "SENTINEL_DATA_DIR";
/// Comma separated `kind=hours` rules
pub const ENV_FRESHNESS_RULES: &str = "SENTINEL_FRESHNESS_RULES";
pub const ENV_DEFAULT_TTL_HOURS: &str = "SENTINEL_DEFAULT_TTL_HOURS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelConfig {
    /// Directory holding both database files
    pub data_dir: PathBuf,

    pub cache_db_file: String,

    pub sentinel_db_file: String,

    /// How long a connection waits on a locked database
    pub busy_timeout: Duration,

    /// TTL for data kinds without a rule
    pub default_ttl_hours: u32,

    /// Per-kind TTL overrides applied on top of the built-in table
    pub freshness_overrides: BTreeMap<String, u32>,

    /// Per-kind overrides of the cost a hit is assumed to save
    pub cost_overrides: BTreeMap<String, f64>,

    pub trend_window_days: u32,

    pub change_window_days: u32,

    /// Most change events returned in a report
    pub change_limit: usize,

    /// Attempts per external fetch, including the first
    pub max_retries: u32,

    pub retry_backoff_base: Duration,

    pub retry_backoff_max: Duration,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            cache_db_file: "cache.db".to_string(),
            sentinel_db_file: "sentinel.db".to_string(),
            busy_timeout: Duration::from_secs(5),
            default_ttl_hours: DEFAULT_TTL_HOURS,
            freshness_overrides: BTreeMap::new(),
            cost_overrides: BTreeMap::new(),
            trend_window_days: 90,
            change_window_days: 30,
            change_limit: 20,
            max_retries: 3,
            retry_backoff_base: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(30),
        }
    }
}

impl SentinelConfig {
    pub fn builder() -> SentinelConfigBuilder {
        SentinelConfigBuilder::default()
    }

    /// Defaults overridden by `SENTINEL_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    ///
    /// Malformed freshness rules are logged and skipped. A malformed default
    /// TTL is an error.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut builder = Self::builder();

        if let Some(dir) = lookup(ENV_DATA_DIR).filter(|d| !d.trim().is_empty()) {
            builder = builder.data_dir(dir);
        }

        if let Some(raw) = lookup(ENV_DEFAULT_TTL_HOURS) {
            let hours = raw.trim().parse::<u32>().map_err(|e| {
                SentinelError::ConfigError(format!("{ENV_DEFAULT_TTL_HOURS}='{raw}': {e}"))
            })?;
            builder = builder.default_ttl_hours(hours);
        }

        if let Some(rules) = lookup(ENV_FRESHNESS_RULES) {
            for entry in rules.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                match parse_rule(entry) {
                    Ok((kind, hours)) => builder = builder.freshness_rule(kind, hours),
                    Err(err) => warn!("Ignoring {} entry '{}': {}", ENV_FRESHNESS_RULES, entry, err),
                }
            }
        }

        builder.build()
    }

    pub fn validate(&self) -> Result<()> {
        if self.cache_db_file.trim().is_empty() || self.sentinel_db_file.trim().is_empty() {
            return Err(SentinelError::ConfigError(
                "database file names must not be empty".to_string(),
            ));
        }

        if self.cache_db_file == self.sentinel_db_file {
            return Err(SentinelError::ConfigError(
                "cache and sentinel databases must be different files".to_string(),
            ));
        }

        if let Some((kind, cost)) = self
            .cost_overrides
            .iter()
            .find(|(_, cost)| !cost.is_finite() || **cost < 0.0)
        {
            return Err(SentinelError::ConfigError(format!(
                "cost estimate for {kind} must be a non-negative number, got {cost}"
            )));
        }

        if self.trend_window_days == 0 || self.change_window_days == 0 {
            return Err(SentinelError::ConfigError(
                "trend and change windows must be at least one day".to_string(),
            ));
        }

        if self.max_retries == 0 {
            return Err(SentinelError::ConfigError(
                "max_retries must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn cache_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.cache_db_file)
    }

    pub fn sentinel_db_path(&self) -> PathBuf {
        self.data_dir.join(&self.sentinel_db_file)
    }

    /// Built-in freshness table with this config's default and overrides
    pub fn freshness_policy(&self) -> FreshnessPolicy {
        self.freshness_overrides.iter().fold(
            FreshnessPolicy::default().with_default_ttl(self.default_ttl_hours),
            |policy, (kind, hours)| policy.with_rule(kind.clone(), *hours),
        )
    }

    pub fn cost_estimates(&self) -> CostEstimates {
        self.cost_overrides
            .iter()
            .fold(CostEstimates::default(), |estimates, (kind, cost)| {
                estimates.with_estimate(kind.clone(), *cost)
            })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_retries,
            self.retry_backoff_base,
            self.retry_backoff_max,
            2.0,
        )
    }

    pub fn trend_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.trend_window_days))
    }

    pub fn change_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.change_window_days))
    }
}

/// Builder for SentinelConfig
#[derive(Debug, Default)]
pub struct SentinelConfigBuilder {
    data_dir: Option<PathBuf>,
    cache_db_file: Option<String>,
    sentinel_db_file: Option<String>,
    busy_timeout: Option<Duration>,
    default_ttl_hours: Option<u32>,
    freshness_overrides: BTreeMap<String, u32>,
    cost_overrides: BTreeMap<String, f64>,
    trend_window_days: Option<u32>,
    change_window_days: Option<u32>,
    change_limit: Option<usize>,
    max_retries: Option<u32>,
    retry_backoff_base: Option<Duration>,
    retry_backoff_max: Option<Duration>,
}

impl SentinelConfigBuilder {
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn cache_db_file(mut self, name: impl Into<String>) -> Self {
        self.cache_db_file = Some(name.into());
        self
    }

    pub fn sentinel_db_file(mut self, name: impl Into<String>) -> Self {
        self.sentinel_db_file = Some(name.into());
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = Some(timeout);
        self
    }

    pub fn default_ttl_hours(mut self, hours: u32) -> Self {
        self.default_ttl_hours = Some(hours);
        self
    }

    /// Override the TTL of one data kind
    pub fn freshness_rule(mut self, data_kind: impl Into<String>, hours: u32) -> Self {
        self.freshness_overrides.insert(data_kind.into(), hours);
        self
    }

    /// Override the saving assumed for a hit on one data kind
    pub fn cost_estimate(mut self, data_kind: impl Into<String>, cost: f64) -> Self {
        self.cost_overrides.insert(data_kind.into(), cost);
        self
    }

    pub fn trend_window_days(mut self, days: u32) -> Self {
        self.trend_window_days = Some(days);
        self
    }

    pub fn change_window_days(mut self, days: u32) -> Self {
        self.change_window_days = Some(days);
        self
    }

    pub fn change_limit(mut self, limit: usize) -> Self {
        self.change_limit = Some(limit);
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    pub fn retry_backoff_base(mut self, duration: Duration) -> Self {
        self.retry_backoff_base = Some(duration);
        self
    }

    pub fn retry_backoff_max(mut self, duration: Duration) -> Self {
        self.retry_backoff_max = Some(duration);
        self
    }

    pub fn build(self) -> Result<SentinelConfig> {
        let defaults = SentinelConfig::default();

        let config = SentinelConfig {
            data_dir: self.data_dir.unwrap_or(defaults.data_dir),
            cache_db_file: self.cache_db_file.unwrap_or(defaults.cache_db_file),
            sentinel_db_file: self.sentinel_db_file.unwrap_or(defaults.sentinel_db_file),
            busy_timeout: self.busy_timeout.unwrap_or(defaults.busy_timeout),
            default_ttl_hours: self.default_ttl_hours.unwrap_or(defaults.default_ttl_hours),
            freshness_overrides: self.freshness_overrides,
            cost_overrides: self.cost_overrides,
            trend_window_days: self.trend_window_days.unwrap_or(defaults.trend_window_days),
            change_window_days: self.change_window_days.unwrap_or(defaults.change_window_days),
            change_limit: self.change_limit.unwrap_or(defaults.change_limit),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_backoff_base: self.retry_backoff_base.unwrap_or(defaults.retry_backoff_base),
            retry_backoff_max: self.retry_backoff_max.unwrap_or(defaults.retry_backoff_max),
        };

        config.validate()?;
        Ok(config)
    }
}
