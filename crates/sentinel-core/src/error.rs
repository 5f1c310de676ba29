//! Error types for sentinel operations

use thiserror::Error;

/// Errors raised by the cache and sentinel stores.
///
/// A cache miss is never an error: lookups return `Ok(None)`.
#[derive(Debug, Error)]
pub enum SentinelError {
    /// The durable store failed outside of SQLite itself (join failure, bad path)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite rejected or failed a statement
    #[error("SQLite error: {0}")]
    Sqlite(#[source] rusqlite::Error),

    /// Filesystem error while preparing the data directory
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Payload could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Decoded payload failed its schema checks
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Unknown or malformed configuration value
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Record rejected before it was stored, or a stored row that no longer
    /// decodes
    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

impl SentinelError {
    /// Whether the error came from the durable store.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Sqlite(_) | Self::Io(_))
    }
}

impl From<rusqlite::Error> for SentinelError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::FromSqlConversionFailure(column, _, cause) => {
                Self::InvalidRecord(format!("column {column} holds an undecodable value: {cause}"))
            }
            other => Self::Sqlite(other),
        }
    }
}

impl From<tokio::task::JoinError> for SentinelError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Storage(format!("blocking database task failed: {err}"))
    }
}

/// Result type alias for sentinel operations
pub type Result<T> = std::result::Result<T, SentinelError>;
