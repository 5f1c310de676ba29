//! SQLite schema for the cache and sentinel databases.
//!
//! Timestamps are stored as UTC milliseconds since the epoch so range checks
//! stay plain integer comparisons. Calendar dates are ISO-8601 text.

/// Cache database: cached payloads, API cost log and earnings calendar.
pub const CACHE_SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS cache (
    key           TEXT PRIMARY KEY,
    data_kind     TEXT NOT NULL,
    subject       TEXT,
    payload       TEXT NOT NULL,
    fetch_cost    REAL NOT NULL DEFAULT 0.0,
    created_at    INTEGER NOT NULL,
    accessed_at   INTEGER NOT NULL,
    expires_at    INTEGER NOT NULL,
    access_count  INTEGER NOT NULL DEFAULT 0,
    cost_saved    REAL NOT NULL DEFAULT 0.0
);
CREATE INDEX IF NOT EXISTS idx_cache_kind ON cache(data_kind);
CREATE INDEX IF NOT EXISTS idx_cache_subject ON cache(subject);
CREATE INDEX IF NOT EXISTS idx_cache_expires ON cache(expires_at);

CREATE TABLE IF NOT EXISTS api_costs (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp    INTEGER NOT NULL,
    module       TEXT NOT NULL,
    api_name     TEXT NOT NULL,
    tokens_used  INTEGER,
    cost         REAL NOT NULL DEFAULT 0.0,
    cache_hit    INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_api_costs_timestamp ON api_costs(timestamp);

CREATE TABLE IF NOT EXISTS earnings_calendar (
    subject             TEXT PRIMARY KEY,
    last_earnings_date  TEXT NOT NULL,
    next_earnings_date  TEXT,
    fiscal_quarter      TEXT NOT NULL,
    fiscal_year         INTEGER NOT NULL
);
";

/// Sentinel database: analysis history, change log, insights, relationships,
/// the monitoring watchlist and its alerts.
pub const SENTINEL_SCHEMA: &str = "\
CREATE TABLE IF NOT EXISTS analysis_history (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    subject          TEXT NOT NULL,
    analyzed_at      INTEGER NOT NULL,
    combined_score   REAL,
    combined_signal  TEXT,
    monetary_score   REAL,
    company_score    REAL,
    supplier_score   REAL,
    customer_score   REAL,
    macro_score      REAL,
    cost             REAL NOT NULL DEFAULT 0.0,
    key_insights     TEXT NOT NULL DEFAULT '[]'
);
CREATE INDEX IF NOT EXISTS idx_history_subject_time ON analysis_history(subject, analyzed_at, id);

CREATE TABLE IF NOT EXISTS change_log (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    subject       TEXT NOT NULL,
    changed_at    INTEGER NOT NULL,
    module        TEXT NOT NULL,
    field         TEXT NOT NULL,
    old_value     REAL NOT NULL,
    new_value     REAL NOT NULL,
    magnitude     REAL NOT NULL,
    significance  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_change_log_subject_time ON change_log(subject, changed_at);

CREATE TABLE IF NOT EXISTS learned_insights (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    subject           TEXT NOT NULL,
    insight_type      TEXT NOT NULL,
    insight           TEXT NOT NULL,
    confidence        REAL NOT NULL,
    learned_date      INTEGER NOT NULL,
    last_validated    INTEGER NOT NULL,
    validation_count  INTEGER NOT NULL DEFAULT 0,
    still_valid       INTEGER NOT NULL DEFAULT 1,
    UNIQUE (subject, insight_type)
);

CREATE TABLE IF NOT EXISTS relationships (
    subject            TEXT NOT NULL,
    related_entity     TEXT NOT NULL,
    relationship_type  TEXT NOT NULL,
    importance_score   REAL NOT NULL,
    discovered_date    INTEGER NOT NULL,
    last_updated       INTEGER NOT NULL,
    still_active       INTEGER NOT NULL DEFAULT 1,
    PRIMARY KEY (subject, related_entity, relationship_type)
);

CREATE TABLE IF NOT EXISTS watchlist (
    subject                TEXT PRIMARY KEY,
    importance             INTEGER NOT NULL DEFAULT 3,
    check_frequency_hours  INTEGER NOT NULL DEFAULT 24,
    alert_threshold        REAL NOT NULL DEFAULT 1.0,
    last_checked           INTEGER,
    active                 INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS alerts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    subject       TEXT NOT NULL,
    alert_type    TEXT NOT NULL,
    severity      TEXT NOT NULL,
    message       TEXT NOT NULL,
    triggered_at  INTEGER NOT NULL,
    acknowledged  INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_alerts_open ON alerts(acknowledged, subject, triggered_at);
";

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name")
            .unwrap();
        stmt.query_map([], |row| row.get(0))
            .unwrap()
            .map(|r| r.unwrap())
            .collect()
    }

    #[test]
    fn test_cache_schema_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(CACHE_SCHEMA).unwrap();
        assert_eq!(
            table_names(&conn),
            vec!["api_costs", "cache", "earnings_calendar"]
        );
    }

    #[test]
    fn test_sentinel_schema_tables() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SENTINEL_SCHEMA).unwrap();
        assert_eq!(
            table_names(&conn),
            vec![
                "alerts",
                "analysis_history",
                "change_log",
                "learned_insights",
                "relationships",
                "watchlist"
            ]
        );
    }

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(SENTINEL_SCHEMA).unwrap();
        conn.execute_batch(SENTINEL_SCHEMA).unwrap();
        conn.execute_batch(CACHE_SCHEMA).unwrap();
        conn.execute_batch(CACHE_SCHEMA).unwrap();
    }
}
