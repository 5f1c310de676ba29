//! Subjects under continuous monitoring

use chrono::{DateTime, Duration, Utc};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::clock::SharedClock;
use crate::db::{Database, optional_timestamp_at, to_millis};
use crate::error::{Result, SentinelError};

pub const DEFAULT_IMPORTANCE: u8 = 3;
pub const DEFAULT_CHECK_FREQUENCY_HOURS: u32 = 24;
pub const DEFAULT_ALERT_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub subject: String,
    /// 1 (low) to 5 (critical)
    pub importance: u8,
    pub check_frequency_hours: u32,
    /// Combined-score move that should alert the user
    pub alert_threshold: f64,
    pub last_checked: Option<DateTime<Utc>>,
    pub active: bool,
}

impl WatchlistEntry {
    pub fn new(subject: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            importance: DEFAULT_IMPORTANCE,
            check_frequency_hours: DEFAULT_CHECK_FREQUENCY_HOURS,
            alert_threshold: DEFAULT_ALERT_THRESHOLD,
            last_checked: None,
            active: true,
        }
    }

    pub fn with_importance(mut self, importance: u8) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_check_frequency(mut self, hours: u32) -> Self {
        self.check_frequency_hours = hours;
        self
    }

    pub fn with_alert_threshold(mut self, threshold: f64) -> Self {
        self.alert_threshold = threshold;
        self
    }

    /// Never checked, or checked at least one period ago
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.last_checked.is_none_or(|at| {
                now - at >= Duration::hours(i64::from(self.check_frequency_hours))
            })
    }

    fn validate(&self) -> Result<()> {
        if self.subject.trim().is_empty() {
            return Err(SentinelError::InvalidRecord(
                "watchlist subject must not be empty".to_string(),
            ));
        }
        if !(1..=5).contains(&self.importance) {
            return Err(SentinelError::InvalidRecord(format!(
                "importance must be between 1 and 5, got {}",
                self.importance
            )));
        }
        if self.check_frequency_hours == 0 {
            return Err(SentinelError::InvalidRecord(
                "check frequency must be at least one hour".to_string(),
            ));
        }
        if !self.alert_threshold.is_finite() || self.alert_threshold < 0.0 {
            return Err(SentinelError::InvalidRecord(format!(
                "alert threshold must be a non-negative number, got {}",
                self.alert_threshold
            )));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Watchlist {
    db: Database,
    clock: SharedClock,
}

impl Watchlist {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Start (or resume) watching a subject. Settings of an existing entry
    /// are replaced; its `last_checked` is kept.
    pub async fn add(&self, entry: &WatchlistEntry) -> Result<()> {
        entry.validate()?;

        let entry = entry.clone();
        let subject = entry.subject.clone();
        self.db
            .write(move |tx| {
                tx.execute(
                    "INSERT INTO watchlist
                        (subject, importance, check_frequency_hours, alert_threshold, last_checked, active)
                     VALUES (?1, ?2, ?3, ?4, NULL, 1)
                     ON CONFLICT(subject) DO UPDATE SET
                        importance = excluded.importance,
                        check_frequency_hours = excluded.check_frequency_hours,
                        alert_threshold = excluded.alert_threshold,
                        active = 1",
                    params![
                        entry.subject,
                        entry.importance,
                        entry.check_frequency_hours,
                        entry.alert_threshold
                    ],
                )?;
                Ok(())
            })
            .await?;

        info!("Watching {}", subject);
        Ok(())
    }

    /// Stop watching. Returns whether the subject was on the list.
    pub async fn remove(&self, subject: &str) -> Result<bool> {
        let subject = subject.to_string();
        self.db
            .write(move |tx| {
                let n = tx.execute(
                    "UPDATE watchlist SET active = 0 WHERE subject = ?1 AND active = 1",
                    params![subject],
                )?;
                Ok(n > 0)
            })
            .await
    }

    /// Active entries, most important first
    pub async fn list_active(&self) -> Result<Vec<WatchlistEntry>> {
        self.db
            .read(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT subject, importance, check_frequency_hours, alert_threshold, last_checked, active
                     FROM watchlist WHERE active = 1
                     ORDER BY importance DESC, subject ASC",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(WatchlistEntry {
                        subject: row.get(0)?,
                        importance: row.get(1)?,
                        check_frequency_hours: row.get(2)?,
                        alert_threshold: row.get(3)?,
                        last_checked: optional_timestamp_at(row, 4)?,
                        active: row.get(5)?,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
    }

    /// Active entries due for a check now
    pub async fn due(&self) -> Result<Vec<WatchlistEntry>> {
        let now = self.clock.now();
        Ok(self
            .list_active()
            .await?
            .into_iter()
            .filter(|entry| entry.is_due(now))
            .collect())
    }

    /// Record a finished check. Unwatched subjects are left alone.
    pub async fn mark_checked(&self, subject: &str) -> Result<bool> {
        let now = to_millis(self.clock.now());
        let subject = subject.to_string();
        self.db
            .write(move |tx| {
                let n = tx.execute(
                    "UPDATE watchlist SET last_checked = ?2 WHERE subject = ?1 AND active = 1",
                    params![subject, now],
                )?;
                Ok(n > 0)
            })
            .await
    }
}

/// Alert threshold of an actively watched subject
pub(crate) fn alert_threshold_in(conn: &Connection, subject: &str) -> Result<Option<f64>> {
    Ok(conn
        .query_row(
            "SELECT alert_threshold FROM watchlist WHERE subject = ?1 AND active = 1",
            params![subject],
            |row| row.get(0),
        )
        .optional()?)
}
