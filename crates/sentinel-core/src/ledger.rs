//! Append-only history of completed analyses
//!
//! Records are totally ordered per subject by `(timestamp, id)`, so two
//! analyses stored in the same millisecond still have a well-defined
//! "previous" one.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, Row, Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::clock::SharedClock;
use crate::db::{Database, from_millis, timestamp_at, to_millis};
use crate::error::{Result, SentinelError};

/// Score difference between the first and last analysis in a window that
/// counts as a trend
pub const TREND_THRESHOLD: f64 = 1.0;

/// Scored fields of an analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScoreField {
    Combined,
    Monetary,
    Company,
    Supplier,
    Customer,
    Macro,
}

impl ScoreField {
    pub const ALL: [Self; 6] = [
        Self::Combined,
        Self::Monetary,
        Self::Company,
        Self::Supplier,
        Self::Customer,
        Self::Macro,
    ];

    /// Column name in `analysis_history`, also used as the change-log field
    pub fn column(self) -> &'static str {
        match self {
            Self::Combined => "combined_score",
            Self::Monetary => "monetary_score",
            Self::Company => "company_score",
            Self::Supplier => "supplier_score",
            Self::Customer => "customer_score",
            Self::Macro => "macro_score",
        }
    }

    /// Analysis module that produced the score
    pub fn module(self) -> &'static str {
        match self {
            Self::Combined => "combined",
            Self::Monetary => "monetary",
            Self::Company => "company",
            Self::Supplier => "supplier",
            Self::Customer => "customer",
            Self::Macro => "macro",
        }
    }

    pub fn from_column(column: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.column() == column)
    }
}

impl fmt::Display for ScoreField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column())
    }
}

/// Per-module scores; a module that did not run leaves its score empty
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleScores {
    pub monetary: Option<f64>,
    pub company: Option<f64>,
    pub supplier: Option<f64>,
    pub customer: Option<f64>,
    #[serde(rename = "macro")]
    pub macro_: Option<f64>,
}

/// One completed analysis of a subject
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// Insertion id, set once the record is stored
    pub id: Option<i64>,
    pub subject: String,
    pub timestamp: DateTime<Utc>,
    pub combined_score: Option<f64>,
    pub combined_signal: Option<String>,
    pub scores: ModuleScores,
    pub cost: f64,
    pub insights: Vec<String>,
}

impl AnalysisRecord {
    pub fn new(subject: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            id: None,
            subject: subject.into(),
            timestamp,
            combined_score: None,
            combined_signal: None,
            scores: ModuleScores::default(),
            cost: 0.0,
            insights: Vec::new(),
        }
    }

    pub fn with_combined_score(mut self, score: f64) -> Self {
        self.combined_score = Some(score);
        self
    }

    pub fn with_signal(mut self, signal: impl Into<String>) -> Self {
        self.combined_signal = Some(signal.into());
        self
    }

    /// Set one module score (or the combined score)
    pub fn with_score(mut self, field: ScoreField, score: f64) -> Self {
        let slot = match field {
            ScoreField::Combined => &mut self.combined_score,
            ScoreField::Monetary => &mut self.scores.monetary,
            ScoreField::Company => &mut self.scores.company,
            ScoreField::Supplier => &mut self.scores.supplier,
            ScoreField::Customer => &mut self.scores.customer,
            ScoreField::Macro => &mut self.scores.macro_,
        };
        *slot = Some(score);
        self
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = cost;
        self
    }

    pub fn with_insight(mut self, insight: impl Into<String>) -> Self {
        self.insights.push(insight.into());
        self
    }

    pub fn score(&self, field: ScoreField) -> Option<f64> {
        match field {
            ScoreField::Combined => self.combined_score,
            ScoreField::Monetary => self.scores.monetary,
            ScoreField::Company => self.scores.company,
            ScoreField::Supplier => self.scores.supplier,
            ScoreField::Customer => self.scores.customer,
            ScoreField::Macro => self.scores.macro_,
        }
    }

    /// Reject records that must never reach the ledger.
    pub fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(SentinelError::InvalidRecord(
                "subject must not be empty".to_string(),
            ));
        }

        for field in ScoreField::ALL {
            if let Some(score) = self.score(field) {
                if !score.is_finite() {
                    return Err(SentinelError::InvalidRecord(format!(
                        "{field} is not a finite number ({score})"
                    )));
                }
            }
        }

        if !self.cost.is_finite() || self.cost < 0.0 {
            return Err(SentinelError::InvalidRecord(format!(
                "cost must be a non-negative number, got {}",
                self.cost
            )));
        }

        Ok(())
    }
}

/// The two most recent records of a subject
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestPair {
    pub prior: Option<AnalysisRecord>,
    pub current: Option<AnalysisRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Improving,
    Declining,
    Stable,
    InsufficientData,
    NoData,
}

impl Trend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Improving => "improving",
            Self::Declining => "declining",
            Self::Stable => "stable",
            Self::InsufficientData => "insufficient_data",
            Self::NoData => "no_data",
        }
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One analysis as shown in a trend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    pub timestamp: DateTime<Utc>,
    pub score: Option<f64>,
    pub signal: Option<String>,
    pub modules: ModuleScores,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendReport {
    pub trend: Trend,
    pub history: Vec<TrendPoint>,
    pub analyses_count: usize,
}

const RECORD_COLUMNS: &str = "id, subject, analyzed_at, combined_score, combined_signal, \
     monetary_score, company_score, supplier_score, customer_score, macro_score, cost, key_insights";

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(AnalysisRecord, String)> {
    let record = AnalysisRecord {
        id: Some(row.get(0)?),
        subject: row.get(1)?,
        timestamp: timestamp_at(row, 2)?,
        combined_score: row.get(3)?,
        combined_signal: row.get(4)?,
        scores: ModuleScores {
            monetary: row.get(5)?,
            company: row.get(6)?,
            supplier: row.get(7)?,
            customer: row.get(8)?,
            macro_: row.get(9)?,
        },
        cost: row.get(10)?,
        insights: Vec::new(),
    };
    Ok((record, row.get(11)?))
}

fn finish_record((mut record, insights): (AnalysisRecord, String)) -> Result<AnalysisRecord> {
    record.insights = serde_json::from_str(&insights)?;
    Ok(record)
}

/// Validate and insert a record inside `tx`, returning it with its id set.
pub(crate) fn insert_record(tx: &Transaction<'_>, record: &AnalysisRecord) -> Result<AnalysisRecord> {
    record.validate()?;

    tx.execute(
        "INSERT INTO analysis_history
            (subject, analyzed_at, combined_score, combined_signal, monetary_score,
             company_score, supplier_score, customer_score, macro_score, cost, key_insights)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            record.subject,
            to_millis(record.timestamp),
            record.combined_score,
            record.combined_signal,
            record.scores.monetary,
            record.scores.company,
            record.scores.supplier,
            record.scores.customer,
            record.scores.macro_,
            record.cost,
            serde_json::to_string(&record.insights)?,
        ],
    )?;

    Ok(AnalysisRecord {
        id: Some(tx.last_insert_rowid()),
        ..record.clone()
    })
}

/// The record ordered immediately before `current`.
///
/// A stored record (id set) is placed by `(timestamp, id)`. An unsaved one
/// only follows records strictly older than its timestamp.
pub(crate) fn preceding_in(conn: &Connection, current: &AnalysisRecord) -> Result<Option<AnalysisRecord>> {
    let subject = current.subject.as_str();
    let at = to_millis(current.timestamp);
    let mut records = match current.id {
        Some(id) => query_records(
            conn,
            &format!(
                "SELECT {RECORD_COLUMNS} FROM analysis_history
                 WHERE subject = ?1 AND (analyzed_at < ?2 OR (analyzed_at = ?2 AND id < ?3))
                 ORDER BY analyzed_at DESC, id DESC LIMIT 1"
            ),
            params![subject, at, id],
        )?,
        None => query_records(
            conn,
            &format!(
                "SELECT {RECORD_COLUMNS} FROM analysis_history
                 WHERE subject = ?1 AND analyzed_at < ?2
                 ORDER BY analyzed_at DESC, id DESC LIMIT 1"
            ),
            params![subject, at],
        )?,
    };
    Ok(records.pop())
}

fn query_records(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<AnalysisRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params, record_from_row)?;
    rows.map(|row| finish_record(row?)).collect()
}

/// Durable analysis history
#[derive(Clone)]
pub struct HistoryLedger {
    db: Database,
    clock: SharedClock,
}

impl HistoryLedger {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Validate and store a record.
    ///
    /// Returns the stored copy with its insertion id set; pass that copy on
    /// to change detection.
    pub async fn append(&self, record: &AnalysisRecord) -> Result<AnalysisRecord> {
        record.validate()?;

        let record = record.clone();
        let stored = self.db.write(move |tx| insert_record(tx, &record)).await?;

        debug!("Appended analysis #{:?} to history", stored.id);
        Ok(stored)
    }

    /// The latest two records for a subject, newest as `current`
    pub async fn latest_two(&self, subject: &str) -> Result<LatestPair> {
        let subject = subject.to_string();
        let mut records = self
            .db
            .read(move |conn| {
                query_records(
                    conn,
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM analysis_history
                         WHERE subject = ?1 ORDER BY analyzed_at DESC, id DESC LIMIT 2"
                    ),
                    params![subject],
                )
            })
            .await?
            .into_iter();

        Ok(LatestPair {
            current: records.next(),
            prior: records.next(),
        })
    }

    pub async fn latest(&self, subject: &str) -> Result<Option<AnalysisRecord>> {
        Ok(self.latest_two(subject).await?.current)
    }

    /// The record stored immediately before `current` for the same subject.
    ///
    /// For a stored record (id set) this is the latest record ordered before
    /// it. For an unsaved one it is the latest record strictly older than
    /// its timestamp.
    pub async fn preceding(&self, current: &AnalysisRecord) -> Result<Option<AnalysisRecord>> {
        let current = current.clone();
        self.db.read(move |conn| preceding_in(conn, &current)).await
    }

    /// Timestamp of the most recent analysis
    pub async fn last_analysis_at(&self, subject: &str) -> Result<Option<DateTime<Utc>>> {
        let subject = subject.to_string();
        self.db
            .read(move |conn| {
                let at: Option<i64> = conn
                    .query_row(
                        "SELECT analyzed_at FROM analysis_history
                         WHERE subject = ?1 ORDER BY analyzed_at DESC, id DESC LIMIT 1",
                        params![subject],
                        |row| row.get(0),
                    )
                    .optional()?;
                at.map(from_millis).transpose()
            })
            .await
    }

    /// Records strictly after `since` and not later than now, oldest first
    pub async fn history(&self, subject: &str, since: DateTime<Utc>) -> Result<Vec<AnalysisRecord>> {
        let subject = subject.to_string();
        let until = self.clock.now();
        self.db
            .read(move |conn| {
                query_records(
                    conn,
                    &format!(
                        "SELECT {RECORD_COLUMNS} FROM analysis_history
                         WHERE subject = ?1 AND analyzed_at > ?2 AND analyzed_at <= ?3
                         ORDER BY analyzed_at ASC, id ASC"
                    ),
                    params![subject, to_millis(since), to_millis(until)],
                )
            })
            .await
    }

    /// Direction of the combined score over the last `window`.
    ///
    /// Compares the first and last analyses in the window that carry a
    /// combined score.
    pub async fn trend(&self, subject: &str, window: Duration) -> Result<TrendReport> {
        let since = self.clock.now() - window;
        let records = self.history(subject, since).await?;

        let history: Vec<TrendPoint> = records
            .into_iter()
            .map(|r| TrendPoint {
                timestamp: r.timestamp,
                score: r.combined_score,
                signal: r.combined_signal,
                modules: r.scores,
            })
            .collect();

        let scored: Vec<f64> = history.iter().filter_map(|p| p.score).collect();
        let trend = if history.is_empty() {
            Trend::NoData
        } else if scored.len() < 2 {
            Trend::InsufficientData
        } else {
            classify_trend(scored[0], scored[scored.len() - 1])
        };

        Ok(TrendReport {
            trend,
            analyses_count: history.len(),
            history,
        })
    }
}

fn classify_trend(first: f64, last: f64) -> Trend {
    if last > first + TREND_THRESHOLD {
        Trend::Improving
    } else if last < first - TREND_THRESHOLD {
        Trend::Declining
    } else {
        Trend::Stable
    }
}
