//! Alerts for watched subjects
//!
//! An alert is raised when an analysis of a watched subject produces a HIGH
//! change, or moves the combined score by at least the subject's
//! `alert_threshold`. Alerts stay open until acknowledged.

use chrono::{DateTime, Utc};
use rusqlite::{Transaction, params};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::clock::SharedClock;
use crate::db::{Database, from_millis, to_millis};
use crate::detector::{ChangeEvent, EPSILON, Significance};
use crate::error::{Result, SentinelError};
use crate::ledger::ScoreField;

pub mod alert_types {
    pub const SIGNIFICANT_CHANGE: &str = "significant_change";
}

/// Open alerts returned when no limit is given
pub const DEFAULT_ALERT_LIMIT: usize = 20;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub subject: String,
    pub alert_type: String,
    pub severity: Significance,
    pub message: String,
    pub triggered_at: DateTime<Utc>,
    pub acknowledged: bool,
}

/// Changes that warrant an alert for a subject watched with `threshold`
pub fn alertable(changes: &[ChangeEvent], threshold: f64) -> Vec<&ChangeEvent> {
    changes
        .iter()
        .filter(|c| {
            c.significance == Significance::High
                || (c.field == ScoreField::Combined && c.magnitude + EPSILON >= threshold)
        })
        .collect()
}

fn insert_alert(
    tx: &Transaction<'_>,
    subject: &str,
    alert_type: &str,
    severity: Significance,
    message: &str,
    now: DateTime<Utc>,
) -> Result<Alert> {
    tx.execute(
        "INSERT INTO alerts (subject, alert_type, severity, message, triggered_at, acknowledged)
         VALUES (?1, ?2, ?3, ?4, ?5, 0)",
        params![subject, alert_type, severity.as_str(), message, to_millis(now)],
    )?;

    Ok(Alert {
        id: tx.last_insert_rowid(),
        subject: subject.to_string(),
        alert_type: alert_type.to_string(),
        severity,
        message: message.to_string(),
        triggered_at: now,
        acknowledged: false,
    })
}

/// Raise one alert summarizing the alertable `changes`, if any.
pub(crate) fn raise_for_changes(
    tx: &Transaction<'_>,
    subject: &str,
    changes: &[ChangeEvent],
    threshold: f64,
    now: DateTime<Utc>,
) -> Result<Option<Alert>> {
    let triggered = alertable(changes, threshold);
    let Some(largest) = triggered
        .iter()
        .copied()
        .max_by(|a, b| a.magnitude.total_cmp(&b.magnitude))
    else {
        return Ok(None);
    };
    let severity = triggered
        .iter()
        .map(|c| c.significance)
        .max()
        .unwrap_or(Significance::Medium);

    let message = format!(
        "Detected {} significant changes; largest {} {:.2} -> {:.2}",
        triggered.len(),
        largest.field,
        largest.old_value,
        largest.new_value
    );
    let alert = insert_alert(tx, subject, alert_types::SIGNIFICANT_CHANGE, severity, &message, now)?;
    warn!("Alert [{}] {}: {}", alert.severity, subject, alert.message);
    Ok(Some(alert))
}

/// Durable alert log
#[derive(Clone)]
pub struct AlertLog {
    db: Database,
    clock: SharedClock,
}

impl AlertLog {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Raise an alert directly
    pub async fn raise(
        &self,
        subject: &str,
        alert_type: &str,
        severity: Significance,
        message: &str,
    ) -> Result<Alert> {
        if subject.trim().is_empty() {
            return Err(SentinelError::InvalidRecord(
                "alert subject must not be empty".to_string(),
            ));
        }

        let now = self.clock.now();
        let subject = subject.to_string();
        let alert_type = alert_type.to_string();
        let message = message.to_string();
        let alert = self
            .db
            .write(move |tx| insert_alert(tx, &subject, &alert_type, severity, &message, now))
            .await?;

        info!("Raised {} alert #{} for {}", alert.alert_type, alert.id, alert.subject);
        Ok(alert)
    }

    /// Unacknowledged alerts, most severe first, then newest.
    ///
    /// `subject` narrows the list to one subject.
    pub async fn active(&self, subject: Option<&str>, limit: usize) -> Result<Vec<Alert>> {
        let subject = subject.map(str::to_string);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);

        self.db
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, subject, alert_type, severity, message, triggered_at, acknowledged
                     FROM alerts
                     WHERE acknowledged = 0 AND (?1 IS NULL OR subject = ?1)
                     ORDER BY CASE severity WHEN 'HIGH' THEN 2 WHEN 'MEDIUM' THEN 1 ELSE 0 END DESC,
                              triggered_at DESC, id DESC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![subject, limit], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, i64>(5)?,
                        row.get::<_, bool>(6)?,
                    ))
                })?;

                let mut alerts = Vec::new();
                for row in rows {
                    let (id, subject, alert_type, severity, message, at, acknowledged) = row?;
                    alerts.push(Alert {
                        id,
                        subject,
                        alert_type,
                        severity: severity.parse()?,
                        message,
                        triggered_at: from_millis(at)?,
                        acknowledged,
                    });
                }
                Ok(alerts)
            })
            .await
    }

    /// Close an open alert. Returns whether it was open.
    pub async fn acknowledge(&self, id: i64) -> Result<bool> {
        self.db
            .write(move |tx| {
                let n = tx.execute(
                    "UPDATE alerts SET acknowledged = 1 WHERE id = ?1 AND acknowledged = 0",
                    params![id],
                )?;
                Ok(n > 0)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::db::schema::SENTINEL_SCHEMA;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn setup() -> (TempDir, ManualClock, AlertLog) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(
            tmp.path().join("sentinel.db"),
            std::time::Duration::from_secs(1),
            SENTINEL_SCHEMA,
        )
        .unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 9, 3, 8, 0, 0).unwrap());
        let log = AlertLog::new(db, Arc::new(clock.clone()));
        (tmp, clock, log)
    }

    fn change(field: ScoreField, old_value: f64, new_value: f64) -> ChangeEvent {
        let magnitude = (new_value - old_value).abs();
        ChangeEvent {
            subject: "ACME".to_string(),
            timestamp: Utc.with_ymd_and_hms(2025, 9, 3, 8, 0, 0).unwrap(),
            module: field.module().to_string(),
            field,
            old_value,
            new_value,
            magnitude,
            significance: Significance::from_magnitude(magnitude),
        }
    }

    #[test]
    fn test_alertable_changes() {
        let changes = [
            change(ScoreField::Combined, 6.0, 6.8),
            change(ScoreField::Supplier, 7.0, 6.0),
            change(ScoreField::Customer, 8.0, 6.0),
        ];

        let picked = alertable(&changes, 1.0);
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].field, ScoreField::Customer);

        let picked = alertable(&changes, 0.8);
        assert_eq!(picked.len(), 2);
        assert!(alertable(&changes[..2], 1.0).is_empty());
    }

    #[tokio::test]
    async fn test_raise_for_changes() {
        let (_tmp, clock, log) = setup();
        let changes = [
            change(ScoreField::Combined, 7.0, 5.0),
            change(ScoreField::Supplier, 7.0, 6.4),
        ];

        let alert = log
            .db
            .write(move |tx| raise_for_changes(tx, "ACME", &changes, 1.0, clock.now()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alert.severity, Significance::High);
        assert_eq!(alert.alert_type, alert_types::SIGNIFICANT_CHANGE);
        assert_eq!(
            alert.message,
            "Detected 1 significant changes; largest combined_score 7.00 -> 5.00"
        );

        let quiet = [change(ScoreField::Monetary, 5.0, 5.6)];
        let none = log
            .db
            .write(move |tx| raise_for_changes(tx, "ACME", &quiet, 1.0, Utc::now()))
            .await
            .unwrap();
        assert!(none.is_none());

        assert_eq!(log.active(None, DEFAULT_ALERT_LIMIT).await.unwrap(), vec![alert]);
    }

    #[tokio::test]
    async fn test_active_order_and_acknowledge() {
        let (_tmp, clock, log) = setup();
        let medium = log
            .raise("ACME", "manual", Significance::Medium, "check guidance")
            .await
            .unwrap();
        clock.advance(Duration::hours(1));
        let high = log
            .raise("INIT", alert_types::SIGNIFICANT_CHANGE, Significance::High, "score collapsed")
            .await
            .unwrap();
        clock.advance(Duration::hours(1));
        let newer = log
            .raise("ACME", "manual", Significance::Medium, "follow up")
            .await
            .unwrap();

        let ids: Vec<i64> = log
            .active(None, DEFAULT_ALERT_LIMIT)
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.id)
            .collect();
        assert_eq!(ids, vec![high.id, newer.id, medium.id]);

        assert_eq!(log.active(Some("ACME"), 1).await.unwrap(), vec![newer.clone()]);

        assert!(log.acknowledge(high.id).await.unwrap());
        assert!(!log.acknowledge(high.id).await.unwrap());
        assert_eq!(log.active(None, DEFAULT_ALERT_LIMIT).await.unwrap().len(), 2);

        let err = log.raise(" ", "manual", Significance::Low, "x").await.unwrap_err();
        assert!(matches!(err, SentinelError::InvalidRecord(_)));
    }
}
