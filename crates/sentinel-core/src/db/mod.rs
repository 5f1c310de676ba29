//! SQLite handle shared by the cache and sentinel stores.
//!
//! Every call opens its own connection on a blocking thread. Writes run in an
//! `IMMEDIATE` transaction so concurrent writers are serialized by SQLite;
//! readers use WAL snapshots and never block on a writer.

pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, Row, Transaction, TransactionBehavior};
use tracing::debug;

use crate::error::{Result, SentinelError};

/// Handle to one SQLite database file
#[derive(Debug, Clone)]
pub struct Database {
    path: Arc<PathBuf>,
    busy_timeout: Duration,
}

impl Database {
    /// Open (creating if needed) the database at `path` and apply `schema`.
    ///
    /// Parent directories are created when missing.
    pub fn open(path: impl Into<PathBuf>, busy_timeout: Duration, schema: &str) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let db = Self {
            path: Arc::new(path),
            busy_timeout,
        };

        let conn = db.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(schema)?;
        debug!("Opened database {} (journal_mode={})", db.path.display(), mode);

        Ok(db)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connect(&self) -> Result<Connection> {
        let conn = Connection::open(self.path.as_path())?;
        conn.busy_timeout(self.busy_timeout)?;
        Ok(conn)
    }

    /// Run a read-only closure on a fresh connection.
    pub async fn read<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let conn = db.connect()?;
            f(&conn)
        })
        .await?
    }

    /// Run a closure inside a single-writer transaction.
    ///
    /// The transaction commits only when the closure returns `Ok`.
    pub async fn write<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = db.connect()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
        .await?
    }
}

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

/// Decode a stored millisecond timestamp.
pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        SentinelError::InvalidRecord(format!("stored timestamp {ms} is out of range"))
    })
}

/// Millisecond timestamp column of a row
pub(crate) fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let ms: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(ms).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            idx,
            Type::Integer,
            format!("timestamp {ms} is out of range").into(),
        )
    })
}

pub(crate) fn optional_timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match row.get::<_, Option<i64>>(idx)? {
        Some(_) => timestamp_at(row, idx).map(Some),
        None => Ok(None),
    }
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| SentinelError::Storage(format!("stored date '{raw}' is malformed: {e}")))
}
