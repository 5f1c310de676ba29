//! The sentinel engine: one handle over both databases
//!
//! [`Sentinel`] owns the cache (with its cost log and earnings calendar) and
//! the long-lived memory (history, change log, insights, relationships,
//! watchlist, alerts). Analysis pipelines read through [`Sentinel::cache`]
//! and hand their finished results to [`Sentinel::learn_from_analysis`].

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::Transaction;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::advisor::{RefreshAdvisor, RefreshPlan};
use crate::alerts::{Alert, AlertLog, DEFAULT_ALERT_LIMIT, raise_for_changes};
use crate::cache::{CacheFacade, CacheStats, CacheStore};
use crate::clock::{SharedClock, SystemClock};
use crate::config::SentinelConfig;
use crate::costs::CostLedger;
use crate::db::Database;
use crate::db::schema::{CACHE_SCHEMA, SENTINEL_SCHEMA};
use crate::detector::{ChangeDetector, ChangeEvent, ChangeLog, diff, insert_events};
use crate::earnings::{EarningsCalendar, EarningsSchedule};
use crate::error::Result;
use crate::ledger::{AnalysisRecord, HistoryLedger, TrendReport, insert_record, preceding_in};
use crate::memory::{
    Insight, MemoryStore, Relationship, extract_insights, relationship_types, upsert_insight,
    upsert_relationship_in,
};
use crate::watchlist::{Watchlist, WatchlistEntry, alert_threshold_in};

/// A supplier or customer named by an analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedEntity {
    pub name: String,
    /// Signed impact score; stored as importance `|score|`
    pub score: f64,
}

impl RelatedEntity {
    pub fn new(name: impl Into<String>, score: f64) -> Self {
        Self {
            name: name.into(),
            score,
        }
    }
}

/// Everything one finished analysis contributes to memory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub record: AnalysisRecord,
    #[serde(default)]
    pub suppliers: Vec<RelatedEntity>,
    #[serde(default)]
    pub customers: Vec<RelatedEntity>,
}

impl AnalysisOutcome {
    pub fn new(record: AnalysisRecord) -> Self {
        Self {
            record,
            suppliers: Vec::new(),
            customers: Vec::new(),
        }
    }

    pub fn with_supplier(mut self, name: impl Into<String>, score: f64) -> Self {
        self.suppliers.push(RelatedEntity::new(name, score));
        self
    }

    pub fn with_customer(mut self, name: impl Into<String>, score: f64) -> Self {
        self.customers.push(RelatedEntity::new(name, score));
        self
    }
}

/// What [`Sentinel::learn_from_analysis`] stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningSummary {
    pub record_id: i64,
    pub changes: Vec<ChangeEvent>,
    pub insights: Vec<Insight>,
    pub relationships_updated: usize,
    /// Raised when the subject is watched and the changes crossed its threshold
    pub alert: Option<Alert>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipSummary {
    pub suppliers: Vec<Relationship>,
    pub customers: Vec<Relationship>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentinelReport {
    pub subject: String,
    pub historical_trend: TrendReport,
    pub recent_changes: Vec<ChangeEvent>,
    pub learned_insights: Vec<Insight>,
    pub relationships: RelationshipSummary,
    pub refresh_recommendations: RefreshPlan,
    pub earnings: Option<EarningsSchedule>,
    pub active_alerts: Vec<Alert>,
    pub cache_stats: CacheStats,
}

/// A watched subject that is due, with what to refresh
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringTask {
    pub entry: WatchlistEntry,
    pub plan: RefreshPlan,
    /// An earnings release is newer than the grace period, or unknown
    pub quarterly_refresh_due: bool,
    /// Unacknowledged alerts for the subject
    pub open_alerts: Vec<Alert>,
}

/// Counts from a maintenance pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub stale_entries_removed: usize,
}

#[derive(Clone)]
pub struct Sentinel {
    config: Arc<SentinelConfig>,
    clock: SharedClock,
    sentinel_db: Database,
    cache: CacheFacade,
    costs: CostLedger,
    earnings: EarningsCalendar,
    ledger: HistoryLedger,
    detector: ChangeDetector,
    change_log: ChangeLog,
    memory: MemoryStore,
    advisor: RefreshAdvisor,
    watchlist: Watchlist,
    alerts: AlertLog,
}

impl Sentinel {
    /// Open (creating if needed) both databases under the configured data
    /// directory, on the system clock.
    pub fn open(config: &SentinelConfig) -> Result<Self> {
        Self::open_with_clock(config, Arc::new(SystemClock))
    }

    pub fn open_with_clock(config: &SentinelConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;

        let cache_db = Database::open(config.cache_db_path(), config.busy_timeout, CACHE_SCHEMA)?;
        let sentinel_db = Database::open(
            config.sentinel_db_path(),
            config.busy_timeout,
            SENTINEL_SCHEMA,
        )?;

        let policy = config.freshness_policy();
        let cache = CacheFacade::new(
            CacheStore::new(cache_db.clone()),
            policy.clone(),
            config.cost_estimates(),
            clock.clone(),
        );
        let ledger = HistoryLedger::new(sentinel_db.clone(), clock.clone());

        info!(
            "Sentinel opened in {} ({} freshness overrides)",
            config.data_dir.display(),
            config.freshness_overrides.len()
        );

        Ok(Self {
            config: Arc::new(config.clone()),
            clock: clock.clone(),
            sentinel_db: sentinel_db.clone(),
            cache,
            costs: CostLedger::new(cache_db.clone(), clock.clone()),
            earnings: EarningsCalendar::new(cache_db, clock.clone()),
            detector: ChangeDetector::new(ledger.clone()),
            change_log: ChangeLog::new(sentinel_db.clone(), clock.clone()),
            memory: MemoryStore::new(sentinel_db.clone(), clock.clone()),
            advisor: RefreshAdvisor::new(ledger.clone(), Arc::new(policy), clock.clone()),
            watchlist: Watchlist::new(sentinel_db.clone(), clock.clone()),
            alerts: AlertLog::new(sentinel_db, clock),
            ledger,
        })
    }

    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheFacade {
        &self.cache
    }

    pub fn costs(&self) -> &CostLedger {
        &self.costs
    }

    pub fn earnings(&self) -> &EarningsCalendar {
        &self.earnings
    }

    pub fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    pub fn detector(&self) -> &ChangeDetector {
        &self.detector
    }

    pub fn change_log(&self) -> &ChangeLog {
        &self.change_log
    }

    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    pub fn watchlist(&self) -> &Watchlist {
        &self.watchlist
    }

    pub fn alerts(&self) -> &AlertLog {
        &self.alerts
    }

    /// Store a finished analysis and everything learned from it.
    ///
    /// Runs: validate, append to history, detect and log changes against the
    /// previous analysis, record rule-based insights, upsert suppliers and
    /// customers, and alert when a watched subject moved enough. All of it
    /// commits in one transaction; on any error nothing is stored.
    pub async fn learn_from_analysis(&self, outcome: &AnalysisOutcome) -> Result<LearningSummary> {
        outcome.record.validate()?;

        let now = self.clock.now();
        let subject = outcome.record.subject.clone();
        let outcome = outcome.clone();
        let summary = self
            .sentinel_db
            .write(move |tx| learn_in(tx, &outcome, now))
            .await?;

        info!(
            "Learned from analysis #{} of {}: {} changes, {} insights, {} relationships",
            summary.record_id,
            subject,
            summary.changes.len(),
            summary.insights.len(),
            summary.relationships_updated
        );
        Ok(summary)
    }

    pub async fn trend(&self, subject: &str) -> Result<TrendReport> {
        self.ledger.trend(subject, self.config.trend_window()).await
    }

    pub async fn recent_changes(&self, subject: &str) -> Result<Vec<ChangeEvent>> {
        self.change_log
            .recent_changes(subject, self.config.change_window(), self.config.change_limit)
            .await
    }

    pub async fn recommend_refresh(&self, subject: &str) -> Result<RefreshPlan> {
        self.advisor.recommend_refresh(subject).await
    }

    /// Everything the sentinel knows about a subject
    pub async fn report(&self, subject: &str) -> Result<SentinelReport> {
        let relationships = RelationshipSummary {
            suppliers: self
                .memory
                .list_relationships(subject, Some(relationship_types::SUPPLIER))
                .await?,
            customers: self
                .memory
                .list_relationships(subject, Some(relationship_types::CUSTOMER))
                .await?,
        };

        Ok(SentinelReport {
            subject: subject.to_string(),
            historical_trend: self.trend(subject).await?,
            recent_changes: self.recent_changes(subject).await?,
            learned_insights: self.memory.list_insights(subject, true).await?,
            relationships,
            refresh_recommendations: self.recommend_refresh(subject).await?,
            earnings: self.earnings.get(subject).await?,
            active_alerts: self.alerts.active(Some(subject), DEFAULT_ALERT_LIMIT).await?,
            cache_stats: self.cache.get_stats().await?,
        })
    }

    /// Refresh plans for every due watchlist subject, most important first.
    ///
    /// Nothing is fetched; the caller runs the plans and then calls
    /// [`complete_check`](Self::complete_check).
    pub async fn plan_monitoring_cycle(&self) -> Result<Vec<MonitoringTask>> {
        let due = self.watchlist.due().await?;
        debug!("{} watchlist subjects due", due.len());

        let mut tasks = Vec::with_capacity(due.len());
        for entry in due {
            let plan = self.advisor.recommend_refresh(&entry.subject).await?;
            let quarterly_refresh_due = self.earnings.needs_quarterly_refresh(&entry.subject).await?;
            let open_alerts = self
                .alerts
                .active(Some(&entry.subject), DEFAULT_ALERT_LIMIT)
                .await?;
            tasks.push(MonitoringTask {
                entry,
                plan,
                quarterly_refresh_due,
                open_alerts,
            });
        }
        Ok(tasks)
    }

    pub async fn complete_check(&self, subject: &str) -> Result<bool> {
        self.watchlist.mark_checked(subject).await
    }

    pub async fn maintenance(&self) -> Result<MaintenanceReport> {
        Ok(MaintenanceReport {
            stale_entries_removed: self.cache.clear_stale().await?,
        })
    }
}

/// Every write of one learning step, inside `tx`
fn learn_in(
    tx: &Transaction<'_>,
    outcome: &AnalysisOutcome,
    now: DateTime<Utc>,
) -> Result<LearningSummary> {
    let subject = outcome.record.subject.as_str();

    let stored = insert_record(tx, &outcome.record)?;
    let record_id = tx.last_insert_rowid();

    let changes = match preceding_in(tx, &stored)? {
        Some(prior) => diff(&prior, &stored),
        None => {
            debug!("No earlier analysis for {}, nothing to compare", subject);
            Vec::new()
        }
    };
    insert_events(tx, &changes)?;

    let insights = extract_insights(&stored)
        .iter()
        .map(|draft| upsert_insight(tx, draft, now))
        .collect::<Result<Vec<_>>>()?;

    let mut relationships_updated = 0;
    for (relationship_type, entities) in [
        (relationship_types::SUPPLIER, &outcome.suppliers),
        (relationship_types::CUSTOMER, &outcome.customers),
    ] {
        for entity in entities {
            if entity.name.trim().is_empty() {
                warn!("Skipping unnamed {} of {}", relationship_type, subject);
                continue;
            }
            upsert_relationship_in(tx, subject, &entity.name, relationship_type, entity.score, now)?;
            relationships_updated += 1;
        }
    }

    let alert = match alert_threshold_in(tx, subject)? {
        Some(threshold) => raise_for_changes(tx, subject, &changes, threshold, now)?,
        None => None,
    };

    Ok(LearningSummary {
        record_id,
        changes,
        insights,
        relationships_updated,
        alert,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::detector::Significance;
    use crate::error::SentinelError;
    use crate::ledger::ScoreField;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    fn setup() -> (TempDir, ManualClock, Sentinel) {
        let tmp = TempDir::new().unwrap();
        let config = SentinelConfig::builder()
            .data_dir(tmp.path().join("data"))
            .build()
            .unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 7, 1, 13, 0, 0).unwrap());
        let sentinel = Sentinel::open_with_clock(&config, Arc::new(clock.clone())).unwrap();
        (tmp, clock, sentinel)
    }

    #[tokio::test]
    async fn test_open_creates_both_databases() {
        let (tmp, _clock, _sentinel) = setup();
        assert!(tmp.path().join("data").join("cache.db").exists());
        assert!(tmp.path().join("data").join("sentinel.db").exists());
    }

    #[tokio::test]
    async fn test_learn_from_analysis() {
        let (_tmp, clock, sentinel) = setup();

        let first = AnalysisOutcome::new(
            AnalysisRecord::new("ACME", clock.now())
                .with_combined_score(7.0)
                .with_score(ScoreField::Supplier, 5.5),
        )
        .with_supplier("Foundry Co", -7.5)
        .with_customer("Big Retail", 8.0)
        .with_customer("  ", 1.0);

        let summary = sentinel.learn_from_analysis(&first).await.unwrap();
        assert!(summary.changes.is_empty());
        assert_eq!(summary.insights.len(), 1);
        assert_eq!(summary.insights[0].insight_type, "supply_chain_risk");
        assert_eq!(summary.relationships_updated, 2);

        clock.advance(Duration::days(1));
        let second = AnalysisOutcome::new(
            AnalysisRecord::new("ACME", clock.now())
                .with_combined_score(5.0)
                .with_score(ScoreField::Supplier, 5.0),
        );
        let summary = sentinel.learn_from_analysis(&second).await.unwrap();
        assert_eq!(summary.changes.len(), 2);
        let combined = summary
            .changes
            .iter()
            .find(|c| c.field == ScoreField::Combined)
            .unwrap();
        assert_eq!(combined.significance, Significance::High);
        assert_eq!(summary.insights[0].validation_count, 1);

        let recent = sentinel.recent_changes("ACME").await.unwrap();
        assert_eq!(recent.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_learning_stores_nothing() {
        let (_tmp, clock, sentinel) = setup();
        sentinel
            .learn_from_analysis(&AnalysisOutcome::new(
                AnalysisRecord::new("ACME", clock.now()).with_combined_score(7.0),
            ))
            .await
            .unwrap();

        sentinel
            .sentinel_db
            .write(|tx| {
                tx.execute_batch(
                    "CREATE TRIGGER reject_relationships BEFORE INSERT ON relationships
                     BEGIN SELECT RAISE(ABORT, 'relationships unavailable'); END;",
                )?;
                Ok(())
            })
            .await
            .unwrap();

        clock.advance(Duration::days(1));
        let second = AnalysisOutcome::new(
            AnalysisRecord::new("ACME", clock.now())
                .with_combined_score(5.0)
                .with_score(ScoreField::Supplier, 5.0),
        )
        .with_supplier("Foundry Co", 6.0);

        // The record, its change and its insight are written before the
        // relationship insert fails; none of them may survive.
        let err = sentinel.learn_from_analysis(&second).await.unwrap_err();
        assert!(err.is_storage());
        let since = clock.now() - Duration::days(30);
        assert_eq!(sentinel.ledger().history("ACME", since).await.unwrap().len(), 1);
        assert!(sentinel.recent_changes("ACME").await.unwrap().is_empty());
        assert!(sentinel.memory().list_insights("ACME", false).await.unwrap().is_empty());
        assert!(sentinel.memory().list_relationships("ACME", None).await.unwrap().is_empty());

        sentinel
            .sentinel_db
            .write(|tx| {
                tx.execute_batch("DROP TRIGGER reject_relationships;")?;
                Ok(())
            })
            .await
            .unwrap();

        // A retry still sees the 7.0 analysis as the previous one.
        let summary = sentinel.learn_from_analysis(&second).await.unwrap();
        assert_eq!(summary.changes.len(), 1);
        assert_eq!(summary.changes[0].old_value, 7.0);
        assert_eq!(summary.insights.len(), 1);
        assert_eq!(summary.relationships_updated, 1);
        assert_eq!(sentinel.ledger().history("ACME", since).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_watched_subject_alerts_on_large_moves() {
        let (_tmp, clock, sentinel) = setup();
        sentinel
            .watchlist()
            .add(&WatchlistEntry::new("ACME").with_alert_threshold(0.8))
            .await
            .unwrap();

        for (subject, score) in [("ACME", 7.0), ("INIT", 7.0)] {
            sentinel
                .learn_from_analysis(&AnalysisOutcome::new(
                    AnalysisRecord::new(subject, clock.now()).with_combined_score(score),
                ))
                .await
                .unwrap();
        }

        clock.advance(Duration::days(1));
        let summary = sentinel
            .learn_from_analysis(&AnalysisOutcome::new(
                AnalysisRecord::new("ACME", clock.now()).with_combined_score(6.0),
            ))
            .await
            .unwrap();
        let alert = summary.alert.unwrap();
        assert_eq!(alert.severity, Significance::Medium);

        // Not on the watchlist: changes are logged, no alert.
        let summary = sentinel
            .learn_from_analysis(&AnalysisOutcome::new(
                AnalysisRecord::new("INIT", clock.now()).with_combined_score(4.0),
            ))
            .await
            .unwrap();
        assert_eq!(summary.changes.len(), 1);
        assert!(summary.alert.is_none());

        let tasks = sentinel.plan_monitoring_cycle().await.unwrap();
        assert_eq!(tasks[0].open_alerts, vec![alert.clone()]);
        assert_eq!(sentinel.report("ACME").await.unwrap().active_alerts.len(), 1);

        assert!(sentinel.alerts().acknowledge(alert.id).await.unwrap());
        assert!(sentinel.report("ACME").await.unwrap().active_alerts.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_outcome_writes_nothing() {
        let (_tmp, clock, sentinel) = setup();
        let outcome = AnalysisOutcome::new(
            AnalysisRecord::new("ACME", clock.now()).with_combined_score(f64::INFINITY),
        )
        .with_supplier("Foundry Co", 5.0);

        let err = sentinel.learn_from_analysis(&outcome).await.unwrap_err();
        assert!(matches!(err, SentinelError::InvalidRecord(_)));
        assert!(sentinel.ledger().latest("ACME").await.unwrap().is_none());
        assert!(sentinel.memory().list_relationships("ACME", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_monitoring_cycle() {
        let (_tmp, clock, sentinel) = setup();
        sentinel
            .watchlist()
            .add(&WatchlistEntry::new("ACME").with_importance(5))
            .await
            .unwrap();
        sentinel.watchlist().add(&WatchlistEntry::new("INIT")).await.unwrap();

        let tasks = sentinel.plan_monitoring_cycle().await.unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].entry.subject, "ACME");
        assert_eq!(tasks[0].plan.urgent[0].module, "all");
        assert!(tasks[0].quarterly_refresh_due);

        assert!(sentinel.complete_check("ACME").await.unwrap());
        let tasks = sentinel.plan_monitoring_cycle().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].entry.subject, "INIT");

        clock.advance(Duration::hours(24));
        assert_eq!(sentinel.plan_monitoring_cycle().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_report_for_unknown_subject() {
        let (_tmp, _clock, sentinel) = setup();
        let report = sentinel.report("NOPE").await.unwrap();
        assert_eq!(report.historical_trend.trend, crate::ledger::Trend::NoData);
        assert!(report.recent_changes.is_empty());
        assert!(report.earnings.is_none());
        assert_eq!(report.refresh_recommendations.urgent.len(), 1);
        assert_eq!(report.cache_stats.total_items, 0);
    }
}
