//! Learned insights and discovered relationships per subject

use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::SharedClock;
use crate::db::{Database, timestamp_at, to_millis};
use crate::error::{Result, SentinelError};
use crate::ledger::AnalysisRecord;

/// Relationship types written by the engine
pub mod relationship_types {
    pub const SUPPLIER: &str = "supplier";
    pub const CUSTOMER: &str = "customer";
}

/// Insight types produced by [`extract_insights`]
pub mod insight_types {
    pub const SUPPLY_CHAIN_RISK: &str = "supply_chain_risk";
    pub const DEMAND_STRENGTH: &str = "demand_strength";
    pub const MONETARY_HEADWIND: &str = "monetary_headwind";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub subject: String,
    pub insight_type: String,
    pub insight: String,
    /// Always within `[0, 1]`
    pub confidence: f64,
    /// When the insight was first observed
    pub learned_date: DateTime<Utc>,
    pub last_validated: DateTime<Utc>,
    /// Times the insight was observed again after the first time
    pub validation_count: u32,
    pub still_valid: bool,
}

/// An insight about to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsightDraft {
    pub subject: String,
    pub insight_type: String,
    pub insight: String,
    pub confidence: f64,
}

impl InsightDraft {
    pub fn new(
        subject: impl Into<String>,
        insight_type: impl Into<String>,
        insight: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            subject: subject.into(),
            insight_type: insight_type.into(),
            insight: insight.into(),
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    pub subject: String,
    pub related_entity: String,
    pub relationship_type: String,
    pub importance_score: f64,
    pub discovered_date: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub still_active: bool,
}

/// Rule-based insights drawn from one analysis.
///
/// | rule                  | insight type        | confidence |
/// |-----------------------|---------------------|------------|
/// | supplier score < 6.0  | `supply_chain_risk` | 0.8        |
/// | customer score >= 8.0 | `demand_strength`   | 0.9        |
/// | monetary score < 5.0  | `monetary_headwind` | 0.7        |
pub fn extract_insights(record: &AnalysisRecord) -> Vec<InsightDraft> {
    let subject = record.subject.as_str();
    let mut drafts = Vec::new();

    if let Some(score) = record.scores.supplier.filter(|s| *s < 6.0) {
        drafts.push(InsightDraft::new(
            subject,
            insight_types::SUPPLY_CHAIN_RISK,
            format!("High supply chain risk detected (score: {score})"),
            0.8,
        ));
    }

    if let Some(score) = record.scores.customer.filter(|s| *s >= 8.0) {
        drafts.push(InsightDraft::new(
            subject,
            insight_types::DEMAND_STRENGTH,
            format!("Strong customer demand (score: {score})"),
            0.9,
        ));
    }

    if let Some(score) = record.scores.monetary.filter(|s| *s < 5.0) {
        drafts.push(InsightDraft::new(
            subject,
            insight_types::MONETARY_HEADWIND,
            format!("Monetary headwinds present (score: {score})"),
            0.7,
        ));
    }

    drafts
}

/// Upsert an insight inside `tx` and return the stored row.
pub(crate) fn upsert_insight(tx: &Transaction<'_>, draft: &InsightDraft, now: DateTime<Utc>) -> Result<Insight> {
    if draft.confidence.is_nan() {
        return Err(SentinelError::InvalidRecord(format!(
            "confidence for {} insight on {} is not a number",
            draft.insight_type, draft.subject
        )));
    }

    tx.execute(
        "INSERT INTO learned_insights
            (subject, insight_type, insight, confidence, learned_date, last_validated,
             validation_count, still_valid)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, 0, 1)
         ON CONFLICT(subject, insight_type) DO UPDATE SET
            insight = excluded.insight,
            confidence = excluded.confidence,
            last_validated = excluded.last_validated,
            validation_count = validation_count + 1,
            still_valid = 1",
        params![
            draft.subject,
            draft.insight_type,
            draft.insight,
            draft.confidence.clamp(0.0, 1.0),
            to_millis(now)
        ],
    )?;

    insight_in(tx, &draft.subject, &draft.insight_type)?.ok_or_else(|| {
        SentinelError::Storage(format!(
            "insight {} for {} vanished after write",
            draft.insight_type, draft.subject
        ))
    })
}

fn insight_in(conn: &Connection, subject: &str, insight_type: &str) -> Result<Option<Insight>> {
    Ok(conn
        .query_row(
            "SELECT subject, insight_type, insight, confidence, learned_date,
                    last_validated, validation_count, still_valid
             FROM learned_insights WHERE subject = ?1 AND insight_type = ?2",
            params![subject, insight_type],
            insight_from_row,
        )
        .optional()?)
}

/// Insert or refresh a relationship inside `tx`.
pub(crate) fn upsert_relationship_in(
    tx: &Transaction<'_>,
    subject: &str,
    related_entity: &str,
    relationship_type: &str,
    importance: f64,
    now: DateTime<Utc>,
) -> Result<()> {
    if !importance.is_finite() {
        return Err(SentinelError::InvalidRecord(format!(
            "importance of {related_entity} for {subject} is not a finite number"
        )));
    }

    tx.execute(
        "INSERT INTO relationships
            (subject, related_entity, relationship_type, importance_score,
             discovered_date, last_updated, still_active)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)
         ON CONFLICT(subject, related_entity, relationship_type) DO UPDATE SET
            importance_score = excluded.importance_score,
            last_updated = excluded.last_updated,
            still_active = 1",
        params![
            subject,
            related_entity,
            relationship_type,
            importance.abs(),
            to_millis(now)
        ],
    )?;
    Ok(())
}

/// Insight and relationship store
#[derive(Clone)]
pub struct MemoryStore {
    db: Database,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Record an observation.
    ///
    /// A repeat of an existing `(subject, insight_type)` refreshes its text,
    /// confidence and `last_validated`, bumps `validation_count` and marks it
    /// valid again. Confidence is clamped to `[0, 1]`.
    pub async fn record_insight(&self, draft: &InsightDraft) -> Result<Insight> {
        let now = self.clock.now();
        let draft = draft.clone();
        let insight = self.db.write(move |tx| upsert_insight(tx, &draft, now)).await?;

        debug!("Recorded {} insight for {}", insight.insight_type, insight.subject);
        Ok(insight)
    }

    /// Insights for a subject, most confident first, then most recently
    /// validated.
    pub async fn list_insights(&self, subject: &str, valid_only: bool) -> Result<Vec<Insight>> {
        let subject = subject.to_string();
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT subject, insight_type, insight, confidence, learned_date,
                            last_validated, validation_count, still_valid
                     FROM learned_insights
                     WHERE subject = ?1 AND (?2 = 0 OR still_valid = 1)
                     ORDER BY confidence DESC, last_validated DESC",
                )?;
                let rows = stmt.query_map(params![subject, valid_only], insight_from_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    /// Mark an insight as no longer holding. Returns whether it existed.
    pub async fn invalidate_insight(&self, subject: &str, insight_type: &str) -> Result<bool> {
        let subject = subject.to_string();
        let insight_type = insight_type.to_string();
        self.db
            .write(move |tx| {
                let n = tx.execute(
                    "UPDATE learned_insights SET still_valid = 0
                     WHERE subject = ?1 AND insight_type = ?2",
                    params![subject, insight_type],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Insert or refresh a relationship.
    ///
    /// Re-discovery keeps `discovered_date`, replaces the importance, bumps
    /// `last_updated` and reactivates it. Importance is stored as an
    /// absolute value.
    pub async fn upsert_relationship(
        &self,
        subject: &str,
        related_entity: &str,
        relationship_type: &str,
        importance: f64,
    ) -> Result<()> {
        let now = self.clock.now();
        let subject = subject.to_string();
        let related_entity = related_entity.to_string();
        let relationship_type = relationship_type.to_string();

        self.db
            .write(move |tx| {
                upsert_relationship_in(tx, &subject, &related_entity, &relationship_type, importance, now)
            })
            .await
    }

    /// Active relationships, most important first
    pub async fn list_relationships(
        &self,
        subject: &str,
        relationship_type: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        let subject = subject.to_string();
        let relationship_type = relationship_type.map(str::to_string);
        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT subject, related_entity, relationship_type, importance_score,
                            discovered_date, last_updated, still_active
                     FROM relationships
                     WHERE subject = ?1 AND still_active = 1
                       AND (?2 IS NULL OR relationship_type = ?2)
                     ORDER BY importance_score DESC, related_entity ASC",
                )?;
                let rows = stmt.query_map(params![subject, relationship_type], |row| {
                    Ok(Relationship {
                        subject: row.get(0)?,
                        related_entity: row.get(1)?,
                        relationship_type: row.get(2)?,
                        importance_score: row.get(3)?,
                        discovered_date: timestamp_at(row, 4)?,
                        last_updated: timestamp_at(row, 5)?,
                        still_active: row.get(6)?,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    /// Mark a relationship inactive. Returns whether it existed.
    pub async fn deactivate_relationship(
        &self,
        subject: &str,
        related_entity: &str,
        relationship_type: &str,
    ) -> Result<bool> {
        let now = to_millis(self.clock.now());
        let subject = subject.to_string();
        let related_entity = related_entity.to_string();
        let relationship_type = relationship_type.to_string();
        self.db
            .write(move |tx| {
                let n = tx.execute(
                    "UPDATE relationships SET still_active = 0, last_updated = ?4
                     WHERE subject = ?1 AND related_entity = ?2 AND relationship_type = ?3",
                    params![subject, related_entity, relationship_type, now],
                )?;
                Ok(n > 0)
            })
            .await
    }
}

fn insight_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Insight> {
    Ok(Insight {
        subject: row.get(0)?,
        insight_type: row.get(1)?,
        insight: row.get(2)?,
        confidence: row.get(3)?,
        learned_date: timestamp_at(row, 4)?,
        last_validated: timestamp_at(row, 5)?,
        validation_count: row.get(6)?,
        still_valid: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::db::schema::SENTINEL_SCHEMA;
    use crate::ledger::ScoreField;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ManualClock, MemoryStore) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(
            tmp.path().join("sentinel.db"),
            std::time::Duration::from_secs(5),
            SENTINEL_SCHEMA,
        )
        .unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 4, 10, 10, 0, 0).unwrap());
        let store = MemoryStore::new(db, Arc::new(clock.clone()));
        (tmp, clock, store)
    }

    #[test]
    fn test_extract_insights_rules() {
        let record = AnalysisRecord::new("ACME", Utc::now())
            .with_score(ScoreField::Supplier, 5.5)
            .with_score(ScoreField::Customer, 8.0)
            .with_score(ScoreField::Monetary, 5.0);
        let drafts = extract_insights(&record);
        let types: Vec<&str> = drafts.iter().map(|d| d.insight_type.as_str()).collect();
        assert_eq!(types, vec!["supply_chain_risk", "demand_strength"]);
        assert_eq!(drafts[0].insight, "High supply chain risk detected (score: 5.5)");
        assert_eq!(drafts[1].confidence, 0.9);

        // Missing scores never trigger a rule.
        assert!(extract_insights(&AnalysisRecord::new("ACME", Utc::now())).is_empty());
    }

    #[tokio::test]
    async fn test_insight_upsert_counts_validations() {
        let (_tmp, clock, store) = setup();
        let first = store
            .record_insight(&InsightDraft::new("ACME", "supply_chain_risk", "risk (5.5)", 0.8))
            .await
            .unwrap();
        assert_eq!(first.validation_count, 0);
        assert_eq!(first.learned_date, first.last_validated);

        clock.advance(Duration::days(7));
        store.invalidate_insight("ACME", "supply_chain_risk").await.unwrap();
        let second = store
            .record_insight(&InsightDraft::new("ACME", "supply_chain_risk", "risk (5.1)", 0.85))
            .await
            .unwrap();
        assert_eq!(second.validation_count, 1);
        assert_eq!(second.insight, "risk (5.1)");
        assert_eq!(second.learned_date, first.learned_date);
        assert_eq!(second.last_validated, clock.now());
        assert!(second.still_valid);

        assert_eq!(store.list_insights("ACME", false).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_observations_of_one_insight() {
        let (_tmp, _clock, store) = setup();
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .record_insight(&InsightDraft::new("ACME", "demand_strength", format!("obs {i}"), 0.9))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let insights = store.list_insights("ACME", true).await.unwrap();
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].validation_count, 7);
    }

    #[tokio::test]
    async fn test_confidence_clamped_and_nan_rejected() {
        let (_tmp, _clock, store) = setup();
        let high = store
            .record_insight(&InsightDraft::new("ACME", "a", "x", 1.7))
            .await
            .unwrap();
        assert_eq!(high.confidence, 1.0);
        let low = store
            .record_insight(&InsightDraft::new("ACME", "b", "x", -0.2))
            .await
            .unwrap();
        assert_eq!(low.confidence, 0.0);

        let err = store
            .record_insight(&InsightDraft::new("ACME", "c", "x", f64::NAN))
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::InvalidRecord(_)));
    }

    #[tokio::test]
    async fn test_list_insights_order_and_validity() {
        let (_tmp, clock, store) = setup();
        store
            .record_insight(&InsightDraft::new("ACME", "monetary_headwind", "x", 0.7))
            .await
            .unwrap();
        clock.advance(Duration::hours(1));
        store
            .record_insight(&InsightDraft::new("ACME", "demand_strength", "x", 0.9))
            .await
            .unwrap();
        store
            .record_insight(&InsightDraft::new("ACME", "supply_chain_risk", "x", 0.7))
            .await
            .unwrap();
        store
            .record_insight(&InsightDraft::new("INIT", "demand_strength", "x", 0.9))
            .await
            .unwrap();

        let listed: Vec<String> = store
            .list_insights("ACME", true)
            .await
            .unwrap()
            .into_iter()
            .map(|i| i.insight_type)
            .collect();
        assert_eq!(listed, vec!["demand_strength", "supply_chain_risk", "monetary_headwind"]);

        assert!(store.invalidate_insight("ACME", "demand_strength").await.unwrap());
        assert!(!store.invalidate_insight("ACME", "unknown").await.unwrap());
        assert_eq!(store.list_insights("ACME", true).await.unwrap().len(), 2);
        assert_eq!(store.list_insights("ACME", false).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_relationship_upsert_and_listing() {
        let (_tmp, clock, store) = setup();
        let discovered = clock.now();
        store
            .upsert_relationship("ACME", "Foundry Co", relationship_types::SUPPLIER, 8.0)
            .await
            .unwrap();
        store
            .upsert_relationship("ACME", "Big Retail", relationship_types::CUSTOMER, -9.0)
            .await
            .unwrap();

        clock.advance(Duration::days(30));
        store
            .upsert_relationship("ACME", "Foundry Co", relationship_types::SUPPLIER, 6.5)
            .await
            .unwrap();

        let all = store.list_relationships("ACME", None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].related_entity, "Big Retail");
        assert_eq!(all[0].importance_score, 9.0);

        let suppliers = store
            .list_relationships("ACME", Some(relationship_types::SUPPLIER))
            .await
            .unwrap();
        assert_eq!(suppliers.len(), 1);
        assert_eq!(suppliers[0].importance_score, 6.5);
        assert_eq!(suppliers[0].discovered_date, discovered);
        assert_eq!(suppliers[0].last_updated, clock.now());

        assert!(
            store
                .deactivate_relationship("ACME", "Big Retail", relationship_types::CUSTOMER)
                .await
                .unwrap()
        );
        assert_eq!(store.list_relationships("ACME", None).await.unwrap().len(), 1);

        // Rediscovery brings it back.
        store
            .upsert_relationship("ACME", "Big Retail", relationship_types::CUSTOMER, 9.5)
            .await
            .unwrap();
        assert_eq!(store.list_relationships("ACME", None).await.unwrap()[0].importance_score, 9.5);
    }
}
