//! Freshness rules: how long each kind of cached data stays usable
//!
//! The policy is a plain table from data kind to TTL in hours, with a default
//! for kinds it has never heard of. New kinds are added with
//! [`FreshnessPolicy::with_rule`] or through configuration overrides; the
//! cache facade only ever asks [`FreshnessPolicy::ttl_hours`].

use std::collections::HashMap;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, SentinelError};

/// TTL used for data kinds without an explicit rule
pub const DEFAULT_TTL_HOURS: u32 = 24;

/// Cost assumed saved by a cache hit when the estimate table has no entry
/// for the kind and the writer reported no fetch cost
pub const DEFAULT_HIT_SAVING: f64 = 0.01;

/// Data kinds known to the analysis modules
pub mod kinds {
    /// Latest traded price
    pub const STOCK_PRICE_CURRENT: &str = "stock_price_current";
    pub const BREAKING_NEWS: &str = "breaking_news";
    pub const EARNINGS_DAY: &str = "earnings_day";

    /// Federal funds rate (FRED)
    pub const FED_RATE: &str = "fed_rate";
    pub const INFLATION: &str = "inflation";
    pub const TREASURY_YIELD: &str = "treasury_yield";
    pub const STOCK_FUNDAMENTALS: &str = "stock_fundamentals";

    pub const MACRO_TRENDS: &str = "macro_trends";
    pub const REGULATORY_UPDATES: &str = "regulatory_updates";
    pub const INDUSTRY_DYNAMICS: &str = "industry_dynamics";
    pub const ESG_ANALYSIS: &str = "esg_analysis";

    /// 10-K / 10-Q derived statements
    pub const FINANCIAL_STATEMENTS: &str = "financial_statements";
    pub const SUPPLIER_RELATIONSHIPS: &str = "supplier_relationships";
    pub const CUSTOMER_RELATIONSHIPS: &str = "customer_relationships";
    pub const COMPETITIVE_LANDSCAPE: &str = "competitive_landscape";

    pub const COMPANY_PROFILE: &str = "company_profile";
    pub const BUSINESS_MODEL: &str = "business_model";
    pub const INDUSTRY_CLASSIFICATION: &str = "industry_classification";
}

/// Refresh cadence bands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreshnessBand {
    /// Always refetch
    RealTime,
    Daily,
    Weekly,
    Quarterly,
    /// Near-static (yearly)
    Static,
}

impl FreshnessBand {
    pub const fn hours(self) -> u32 {
        match self {
            Self::RealTime => 0,
            Self::Daily => 24,
            Self::Weekly => 168,
            Self::Quarterly => 2160,
            Self::Static => 8760,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::RealTime => "real_time",
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Quarterly => "quarterly",
            Self::Static => "static",
        }
    }
}

/// Per-data-kind TTL table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreshnessPolicy {
    rules: HashMap<String, u32>,
    default_ttl_hours: u32,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        use FreshnessBand::{Daily, Quarterly, RealTime, Static, Weekly};

        let table = [
            (kinds::STOCK_PRICE_CURRENT, RealTime),
            (kinds::BREAKING_NEWS, RealTime),
            (kinds::EARNINGS_DAY, RealTime),
            (kinds::FED_RATE, Daily),
            (kinds::INFLATION, Daily),
            (kinds::TREASURY_YIELD, Daily),
            (kinds::STOCK_FUNDAMENTALS, Daily),
            (kinds::MACRO_TRENDS, Weekly),
            (kinds::REGULATORY_UPDATES, Weekly),
            (kinds::INDUSTRY_DYNAMICS, Weekly),
            (kinds::ESG_ANALYSIS, Weekly),
            (kinds::FINANCIAL_STATEMENTS, Quarterly),
            (kinds::SUPPLIER_RELATIONSHIPS, Quarterly),
            (kinds::CUSTOMER_RELATIONSHIPS, Quarterly),
            (kinds::COMPETITIVE_LANDSCAPE, Quarterly),
            (kinds::COMPANY_PROFILE, Static),
            (kinds::BUSINESS_MODEL, Static),
            (kinds::INDUSTRY_CLASSIFICATION, Static),
        ];

        Self {
            rules: table
                .into_iter()
                .map(|(kind, band)| (kind.to_string(), band.hours()))
                .collect(),
            default_ttl_hours: DEFAULT_TTL_HOURS,
        }
    }
}

impl FreshnessPolicy {
    /// A policy with no rules at all
    pub fn empty(default_ttl_hours: u32) -> Self {
        Self {
            rules: HashMap::new(),
            default_ttl_hours,
        }
    }

    pub fn with_rule(mut self, data_kind: impl Into<String>, ttl_hours: u32) -> Self {
        self.set_rule(data_kind, ttl_hours);
        self
    }

    pub fn with_default_ttl(mut self, ttl_hours: u32) -> Self {
        self.default_ttl_hours = ttl_hours;
        self
    }

    pub fn set_rule(&mut self, data_kind: impl Into<String>, ttl_hours: u32) {
        self.rules.insert(data_kind.into(), ttl_hours);
    }

    /// Apply `kind=hours` overrides separated by commas.
    ///
    /// Malformed entries are logged and skipped; the affected kinds keep
    /// their previous (or default) TTL.
    pub fn with_overrides(mut self, rules: &str) -> Self {
        for entry in rules.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            match parse_rule(entry) {
                Ok((kind, hours)) => self.set_rule(kind, hours),
                Err(err) => warn!("Ignoring freshness rule '{}': {}", entry, err),
            }
        }
        self
    }

    /// TTL in hours for a data kind, falling back to the default
    pub fn ttl_hours(&self, data_kind: &str) -> u32 {
        self.rules
            .get(data_kind)
            .copied()
            .unwrap_or(self.default_ttl_hours)
    }

    pub fn ttl(&self, data_kind: &str) -> Duration {
        Duration::hours(i64::from(self.ttl_hours(data_kind)))
    }

    /// Real-time kinds are never served from cache
    pub fn is_realtime(&self, data_kind: &str) -> bool {
        self.ttl_hours(data_kind) == 0
    }

    pub fn default_ttl_hours(&self) -> u32 {
        self.default_ttl_hours
    }

    /// Data kinds whose TTL falls in `band`, sorted by name
    pub fn kinds_in_band(&self, band: FreshnessBand) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .rules
            .iter()
            .filter(|(_, hours)| **hours == band.hours())
            .map(|(kind, _)| kind.clone())
            .collect();
        kinds.sort();
        kinds
    }
}

/// Parse a single `kind=hours` rule
pub fn parse_rule(entry: &str) -> Result<(String, u32)> {
    let (kind, hours) = entry
        .split_once('=')
        .ok_or_else(|| SentinelError::ConfigError(format!("expected kind=hours, got '{entry}'")))?;

    let kind = kind.trim();
    if kind.is_empty() {
        return Err(SentinelError::ConfigError(format!(
            "missing data kind in '{entry}'"
        )));
    }

    let hours = hours.trim().parse::<u32>().map_err(|e| {
        SentinelError::ConfigError(format!("invalid TTL hours for '{kind}': {e}"))
    })?;

    Ok((kind.to_string(), hours))
}

/// Estimated external cost avoided by one cache hit, per data kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostEstimates {
    table: HashMap<String, f64>,
    default_saving: f64,
}

impl Default for CostEstimates {
    fn default() -> Self {
        let table = [
            // FRED is free, the saving is latency
            (kinds::FED_RATE, 0.001),
            (kinds::INFLATION, 0.001),
            (kinds::TREASURY_YIELD, 0.001),
            // LLM-backed analysis
            (kinds::SUPPLIER_RELATIONSHIPS, 0.17),
            (kinds::CUSTOMER_RELATIONSHIPS, 0.17),
            (kinds::MACRO_TRENDS, 0.06),
            (kinds::FINANCIAL_STATEMENTS, 0.02),
        ];

        Self {
            table: table
                .into_iter()
                .map(|(kind, cost)| (kind.to_string(), cost))
                .collect(),
            default_saving: DEFAULT_HIT_SAVING,
        }
    }
}

impl CostEstimates {
    pub fn with_estimate(mut self, data_kind: impl Into<String>, cost: f64) -> Self {
        self.table.insert(data_kind.into(), cost);
        self
    }

    /// Table entry for `data_kind`, if one is configured
    pub fn listed(&self, data_kind: &str) -> Option<f64> {
        self.table.get(data_kind).copied()
    }

    pub fn default_saving(&self) -> f64 {
        self.default_saving
    }

    pub fn estimate(&self, data_kind: &str) -> f64 {
        self.listed(data_kind).unwrap_or(self.default_saving)
    }
}
