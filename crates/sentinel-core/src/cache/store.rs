//! Durable cache rows on SQLite

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::db::{Database, from_millis, timestamp_at, to_millis};
use crate::error::Result;

/// A cached payload with its accounting metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data_kind: String,
    pub subject: Option<String>,
    pub payload: serde_json::Value,
    /// What producing the payload cost, as reported by the writer
    pub fetch_cost: f64,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Number of cache hits served from this entry
    pub access_count: u64,
    /// Cumulative external cost avoided by those hits
    pub cost_saved: f64,
}

impl CacheEntry {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Aggregate metrics over the cache
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub total_items: u64,
    pub fresh_items: u64,
    pub stale_items: u64,
    /// Sum of `cost_saved` over all rows, rounded to cents
    pub cost_saved_total: f64,
    pub cache_hits_today: u64,
    /// Percentage of rows that can still be served, one decimal
    pub hit_rate: f64,
}

/// Row as written by the facade
#[derive(Debug, Clone)]
pub(crate) struct NewEntry {
    pub key: String,
    pub data_kind: String,
    pub subject: Option<String>,
    pub payload: String,
    pub fetch_cost: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Row as read back, payload still encoded
#[derive(Debug, Clone)]
pub(crate) struct StoredEntry {
    pub key: String,
    pub data_kind: String,
    pub subject: Option<String>,
    pub payload: String,
    pub fetch_cost: f64,
    pub created_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_count: u64,
    pub cost_saved: f64,
}

/// Which rows an invalidation removes
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Invalidation {
    KindAndSubject { data_kind: String, subject: String },
    Kind(String),
    Subject(String),
}

/// SQLite-backed cache table
#[derive(Debug, Clone)]
pub struct CacheStore {
    db: Database,
}

impl CacheStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert or wholesale replace a row
    pub(crate) async fn put(&self, entry: NewEntry) -> Result<()> {
        self.db
            .write(move |tx| {
                tx.execute(
                    "INSERT OR REPLACE INTO cache
                        (key, data_kind, subject, payload, fetch_cost, created_at,
                         accessed_at, expires_at, access_count, cost_saved)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6, ?7, 0, 0.0)",
                    params![
                        entry.key,
                        entry.data_kind,
                        entry.subject,
                        entry.payload,
                        entry.fetch_cost,
                        to_millis(entry.created_at),
                        to_millis(entry.expires_at),
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub(crate) async fn created_at(&self, key: &str) -> Result<Option<DateTime<Utc>>> {
        let key = key.to_string();
        self.db
            .read(move |conn| {
                let created: Option<i64> = conn
                    .query_row(
                        "SELECT created_at FROM cache WHERE key = ?1",
                        params![key],
                        |row| row.get(0),
                    )
                    .optional()?;
                created.map(from_millis).transpose()
            })
            .await
    }

    /// Encoded payload of a row that is still within `expires_at`
    pub(crate) async fn fresh_payload(&self, key: &str, now: DateTime<Utc>) -> Result<Option<String>> {
        let key = key.to_string();
        self.db
            .read(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT payload FROM cache WHERE key = ?1 AND expires_at > ?2",
                        params![key, to_millis(now)],
                        |row| row.get(0),
                    )
                    .optional()?)
            })
            .await
    }

    /// Count a hit against a fresh row and log the saving.
    ///
    /// The saving is the `listed` estimate for the row's kind when there is
    /// one, then the row's own fetch cost when the writer reported one, then
    /// `fallback`. Returns the amount saved, or `None` when the row vanished
    /// or expired since it was read.
    pub(crate) async fn record_hit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        listed: Option<f64>,
        fallback: f64,
    ) -> Result<Option<f64>> {
        let key = key.to_string();
        self.db
            .write(move |tx| {
                let row: Option<(String, Option<String>, f64)> = tx
                    .query_row(
                        "SELECT data_kind, subject, fetch_cost FROM cache
                         WHERE key = ?1 AND expires_at > ?2",
                        params![key, to_millis(now)],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?;

                let Some((data_kind, subject, fetch_cost)) = row else {
                    return Ok(None);
                };
                let saved = listed.unwrap_or(if fetch_cost > 0.0 { fetch_cost } else { fallback });

                tx.execute(
                    "UPDATE cache
                     SET accessed_at = ?2, access_count = access_count + 1,
                         cost_saved = cost_saved + ?3
                     WHERE key = ?1",
                    params![key, to_millis(now), saved],
                )?;
                tx.execute(
                    "INSERT INTO api_costs (timestamp, module, api_name, cost, cache_hit)
                     VALUES (?1, ?2, ?3, ?4, 1)",
                    params![
                        to_millis(now),
                        data_kind,
                        subject.unwrap_or_else(|| "N/A".to_string()),
                        saved
                    ],
                )?;
                Ok(Some(saved))
            })
            .await
    }

    pub(crate) async fn load(&self, key: &str) -> Result<Option<StoredEntry>> {
        let key = key.to_string();
        self.db
            .read(move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT key, data_kind, subject, payload, fetch_cost, created_at,
                                accessed_at, expires_at, access_count, cost_saved
                         FROM cache WHERE key = ?1",
                        params![key],
                        |row| {
                            Ok(StoredEntry {
                                key: row.get(0)?,
                                data_kind: row.get(1)?,
                                subject: row.get(2)?,
                                payload: row.get(3)?,
                                fetch_cost: row.get(4)?,
                                created_at: timestamp_at(row, 5)?,
                                accessed_at: timestamp_at(row, 6)?,
                                expires_at: timestamp_at(row, 7)?,
                                access_count: row.get::<_, i64>(8)?.max(0) as u64,
                                cost_saved: row.get(9)?,
                            })
                        },
                    )
                    .optional()?)
            })
            .await
    }

    pub(crate) async fn invalidate(&self, target: Invalidation) -> Result<usize> {
        self.db
            .write(move |tx| {
                let removed = match &target {
                    Invalidation::KindAndSubject { data_kind, subject } => tx.execute(
                        "DELETE FROM cache WHERE data_kind = ?1 AND subject = ?2",
                        params![data_kind, subject],
                    )?,
                    Invalidation::Kind(data_kind) => {
                        tx.execute("DELETE FROM cache WHERE data_kind = ?1", params![data_kind])?
                    }
                    Invalidation::Subject(subject) => {
                        tx.execute("DELETE FROM cache WHERE subject = ?1", params![subject])?
                    }
                };
                Ok(removed)
            })
            .await
    }

    /// Delete every row whose `expires_at` has passed
    pub(crate) async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.db
            .write(move |tx| {
                Ok(tx.execute(
                    "DELETE FROM cache WHERE expires_at <= ?1",
                    params![to_millis(now)],
                )?)
            })
            .await
    }

    pub(crate) async fn stats(&self, now: DateTime<Utc>, day_start: DateTime<Utc>) -> Result<CacheStats> {
        self.db
            .read(move |conn| {
                let (total, fresh, cost_saved): (i64, i64, f64) = conn.query_row(
                    "SELECT COUNT(*),
                            COALESCE(SUM(CASE WHEN expires_at > ?1 THEN 1 ELSE 0 END), 0),
                            COALESCE(SUM(cost_saved), 0.0)
                     FROM cache",
                    params![to_millis(now)],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;

                let hits_today: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM api_costs
                     WHERE cache_hit = 1 AND timestamp >= ?1 AND timestamp <= ?2",
                    params![to_millis(day_start), to_millis(now)],
                    |row| row.get(0),
                )?;

                let total = total.max(0) as u64;
                let fresh = fresh.max(0) as u64;
                let hit_rate = if total > 0 {
                    (fresh as f64 / total as f64 * 1000.0).round() / 10.0
                } else {
                    0.0
                };

                Ok(CacheStats {
                    total_items: total,
                    fresh_items: fresh,
                    stale_items: total - fresh,
                    cost_saved_total: (cost_saved * 100.0).round() / 100.0,
                    cache_hits_today: hits_today.max(0) as u64,
                    hit_rate,
                })
            })
            .await
    }
}
