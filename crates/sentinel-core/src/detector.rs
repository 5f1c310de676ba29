//! Score change detection between consecutive analyses

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::SharedClock;
use crate::db::{Database, from_millis, to_millis};
use crate::error::{Result, SentinelError};
use crate::ledger::{AnalysisRecord, HistoryLedger, ScoreField};

/// Smallest move that is worth reporting
pub const MEDIUM_THRESHOLD: f64 = 0.5;
pub const HIGH_THRESHOLD: f64 = 1.5;

// 6.6 - 6.1 must count as a 0.5 move.
pub(crate) const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Significance {
    Low,
    Medium,
    High,
}

impl Significance {
    pub fn from_magnitude(magnitude: f64) -> Self {
        if magnitude + EPSILON >= HIGH_THRESHOLD {
            Self::High
        } else if magnitude + EPSILON >= MEDIUM_THRESHOLD {
            Self::Medium
        } else {
            Self::Low
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for Significance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Significance {
    type Err = SentinelError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(SentinelError::Storage(format!(
                "unknown significance '{other}' in change log"
            ))),
        }
    }
}

/// A significant move in one score between two consecutive analyses
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub subject: String,
    /// Timestamp of the analysis that produced the new value
    pub timestamp: DateTime<Utc>,
    pub module: String,
    pub field: ScoreField,
    pub old_value: f64,
    pub new_value: f64,
    pub magnitude: f64,
    pub significance: Significance,
}

/// Compare two records field by field.
///
/// Fields missing on either side are skipped. Moves below
/// [`MEDIUM_THRESHOLD`] are not reported.
pub fn diff(prior: &AnalysisRecord, current: &AnalysisRecord) -> Vec<ChangeEvent> {
    ScoreField::ALL
        .into_iter()
        .filter_map(|field| {
            let old_value = prior.score(field)?;
            let new_value = current.score(field)?;
            let magnitude = (new_value - old_value).abs();
            let significance = Significance::from_magnitude(magnitude);
            if significance == Significance::Low {
                return None;
            }

            Some(ChangeEvent {
                subject: current.subject.clone(),
                timestamp: current.timestamp,
                module: field.module().to_string(),
                field,
                old_value,
                new_value,
                magnitude,
                significance,
            })
        })
        .collect()
}

/// Append events to the change log inside `tx`.
pub(crate) fn insert_events(tx: &Transaction<'_>, events: &[ChangeEvent]) -> Result<usize> {
    let mut stmt = tx.prepare(
        "INSERT INTO change_log
            (subject, changed_at, module, field, old_value, new_value, magnitude, significance)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for event in events {
        stmt.execute(params![
            event.subject,
            to_millis(event.timestamp),
            event.module,
            event.field.column(),
            event.old_value,
            event.new_value,
            event.magnitude,
            event.significance.as_str(),
        ])?;
    }
    Ok(events.len())
}

/// Diffs new analyses against the ledger
#[derive(Clone)]
pub struct ChangeDetector {
    ledger: HistoryLedger,
}

impl ChangeDetector {
    pub fn new(ledger: HistoryLedger) -> Self {
        Self { ledger }
    }

    /// Events between `current` and the record that precedes it.
    ///
    /// Read-only: calling it twice yields the same events. Returns nothing
    /// for the first analysis of a subject.
    pub async fn detect(&self, subject: &str, current: &AnalysisRecord) -> Result<Vec<ChangeEvent>> {
        if current.subject != subject {
            return Err(SentinelError::InvalidRecord(format!(
                "record for '{}' passed to change detection for '{subject}'",
                current.subject
            )));
        }

        let Some(prior) = self.ledger.preceding(current).await? else {
            debug!("No earlier analysis for {}, nothing to compare", subject);
            return Ok(Vec::new());
        };

        let events = diff(&prior, current);
        debug!("Detected {} changes for {}", events.len(), subject);
        Ok(events)
    }
}

/// Persisted change events
#[derive(Clone)]
pub struct ChangeLog {
    db: Database,
    clock: SharedClock,
}

impl ChangeLog {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    pub async fn record(&self, events: &[ChangeEvent]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let events = events.to_vec();
        let count = self.db.write(move |tx| insert_events(tx, &events)).await?;

        info!("Recorded {} change events", count);
        Ok(count)
    }

    /// MEDIUM and HIGH events within `window`, newest first
    pub async fn recent_changes(&self, subject: &str, window: Duration, limit: usize) -> Result<Vec<ChangeEvent>> {
        let since = self.clock.now() - window;
        let subject = subject.to_string();
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT subject, changed_at, module, field, old_value, new_value, magnitude, significance
                     FROM change_log
                     WHERE subject = ?1 AND changed_at > ?2 AND significance IN ('MEDIUM', 'HIGH')
                     ORDER BY changed_at DESC, id DESC
                     LIMIT ?3",
                )?;
                let rows = stmt.query_map(params![subject, to_millis(since), limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, f64>(4)?,
                        row.get::<_, f64>(5)?,
                        row.get::<_, f64>(6)?,
                        row.get::<_, String>(7)?,
                    ))
                })?;

                let mut events = Vec::new();
                for row in rows {
                    let (subject, at, module, field, old_value, new_value, magnitude, significance) = row?;
                    let field = ScoreField::from_column(&field).ok_or_else(|| {
                        SentinelError::Storage(format!("unknown score field '{field}' in change log"))
                    })?;
                    events.push(ChangeEvent {
                        subject,
                        timestamp: from_millis(at)?,
                        module,
                        field,
                        old_value,
                        new_value,
                        magnitude,
                        significance: significance.parse()?,
                    });
                }
                Ok(events)
            })
            .await
    }
}
