//! Caching and change-detection layer for stock research agents
//!
//! Analysis pipelines spend real money on market data APIs and LLM calls.
//! This crate keeps those results around for as long as they stay valid and
//! remembers what each analysis concluded. It includes:
//!
//! - A durable, freshness-aware cache keyed by data kind, subject and
//!   parameters, with hit and cost-saved accounting
//! - A freshness policy mapping each data kind to a TTL band (real-time,
//!   daily, weekly, quarterly, static)
//! - An append-only history of analyses with trend classification
//! - Change detection between consecutive analyses of a subject
//! - Learned insights and supplier/customer relationships
//! - Refresh recommendations, an earnings calendar and a monitoring watchlist
//! - Alerts when a watched subject moves past its threshold
//!
//! # Architecture
//!
//! Two SQLite files live under the configured data directory:
//! - `cache.db`: cached payloads, the API cost log and the earnings calendar
//! - `sentinel.db`: analysis history, change log, insights, relationships,
//!   the watchlist and alerts
//!
//! [`Sentinel`] opens both and hands out the individual stores. Learning from
//! an analysis commits all of its `sentinel.db` writes in one transaction.
//!
//! # Example
//!
//! ```rust,ignore
//! use sentinel_core::{AnalysisOutcome, AnalysisRecord, CacheKey, Sentinel, SentinelConfig};
//! use sentinel_core::freshness::kinds;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let sentinel = Sentinel::open(&SentinelConfig::from_env()?)?;
//!
//!     let key = CacheKey::new(kinds::FINANCIAL_STATEMENTS).for_subject("ACME");
//!     let statements: serde_json::Value = sentinel
//!         .cache()
//!         .get_or_fetch(&key, 0.02, || fetch_statements("ACME"))
//!         .await?;
//!
//!     let record = AnalysisRecord::new("ACME", chrono::Utc::now()).with_combined_score(7.2);
//!     let summary = sentinel.learn_from_analysis(&AnalysisOutcome::new(record)).await?;
//!     println!("{} changes since last analysis", summary.changes.len());
//!     Ok(())
//! }
//! ```

pub mod advisor;
pub mod alerts;
pub mod boundary;
pub mod cache;
pub mod clock;
pub mod config;
pub mod costs;
pub mod db;
pub mod detector;
pub mod earnings;
pub mod error;
pub mod freshness;
pub mod ledger;
pub mod memory;
pub mod retry;
pub mod sentinel;
pub mod watchlist;

// Re-export main types for convenience
pub use advisor::{RefreshAdvisor, RefreshItem, RefreshPlan};
pub use alerts::{Alert, AlertLog};
pub use cache::{CacheEntry, CacheFacade, CacheKey, CacheStats, CacheStore};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::SentinelConfig;
pub use costs::{CostLedger, CostSummary};
pub use detector::{ChangeDetector, ChangeEvent, ChangeLog, Significance};
pub use earnings::{EarningsCalendar, EarningsSchedule};
pub use error::{Result, SentinelError};
pub use freshness::{CostEstimates, FreshnessBand, FreshnessPolicy};
pub use ledger::{AnalysisRecord, HistoryLedger, ModuleScores, ScoreField, Trend, TrendReport};
pub use memory::{Insight, InsightDraft, MemoryStore, Relationship};
pub use retry::RetryPolicy;
pub use sentinel::{AnalysisOutcome, LearningSummary, MonitoringTask, Sentinel, SentinelReport};
pub use watchlist::{Watchlist, WatchlistEntry};
