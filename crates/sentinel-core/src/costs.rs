//! API spend and cache savings log
//!
//! Analysis modules record each paid external call here. The cache facade
//! logs every hit into the same table with the cost it avoided.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::db::{Database, to_millis};
use crate::error::{Result, SentinelError};

/// Totals over a time range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    pub api_calls: u64,
    pub cache_hits: u64,
    pub tokens_used: u64,
    pub spent: f64,
    pub saved: f64,
}

/// Append-only cost log, stored next to the cache
#[derive(Clone)]
pub struct CostLedger {
    db: Database,
    clock: SharedClock,
}

impl CostLedger {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Record a paid external call.
    pub async fn record_api_call(
        &self,
        module: &str,
        api_name: &str,
        tokens_used: Option<u32>,
        cost: f64,
    ) -> Result<()> {
        if !cost.is_finite() || cost < 0.0 {
            return Err(SentinelError::InvalidPayload(format!(
                "API cost must be a non-negative number, got {cost}"
            )));
        }

        let now = self.clock.now();
        let module = module.to_string();
        let api_name = api_name.to_string();
        self.db
            .write(move |tx| {
                tx.execute(
                    "INSERT INTO api_costs (timestamp, module, api_name, tokens_used, cost, cache_hit)
                     VALUES (?1, ?2, ?3, ?4, ?5, 0)",
                    params![to_millis(now), module, api_name, tokens_used, cost],
                )?;
                Ok(())
            })
            .await
    }

    /// Totals for everything logged at or after `since`
    pub async fn summary(&self, since: DateTime<Utc>) -> Result<CostSummary> {
        self.db
            .read(move |conn| {
                let (calls, hits, tokens, spent, saved): (i64, i64, i64, f64, f64) = conn.query_row(
                    "SELECT
                        COALESCE(SUM(CASE WHEN cache_hit = 0 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN cache_hit = 1 THEN 1 ELSE 0 END), 0),
                        COALESCE(SUM(tokens_used), 0),
                        COALESCE(SUM(CASE WHEN cache_hit = 0 THEN cost ELSE 0.0 END), 0.0),
                        COALESCE(SUM(CASE WHEN cache_hit = 1 THEN cost ELSE 0.0 END), 0.0)
                     FROM api_costs WHERE timestamp >= ?1",
                    params![to_millis(since)],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                )?;

                Ok(CostSummary {
                    api_calls: calls.max(0) as u64,
                    cache_hits: hits.max(0) as u64,
                    tokens_used: tokens.max(0) as u64,
                    spent,
                    saved,
                })
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheFacade, CacheKey, CacheStore};
    use crate::clock::ManualClock;
    use crate::db::schema::CACHE_SCHEMA;
    use crate::freshness::{CostEstimates, FreshnessPolicy, kinds};
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_summary_splits_calls_and_hits() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(
            tmp.path().join("cache.db"),
            std::time::Duration::from_secs(1),
            CACHE_SCHEMA,
        )
        .unwrap();
        let start = Utc.with_ymd_and_hms(2025, 2, 1, 8, 0, 0).unwrap();
        let clock = ManualClock::new(start);
        let shared: SharedClock = Arc::new(clock.clone());

        let ledger = CostLedger::new(db.clone(), shared.clone());
        let cache = CacheFacade::new(
            CacheStore::new(db),
            FreshnessPolicy::default(),
            CostEstimates::default(),
            shared,
        );

        ledger
            .record_api_call("supplier", "anthropic", Some(1200), 0.17)
            .await
            .unwrap();
        ledger.record_api_call("macro", "fred", None, 0.0).await.unwrap();

        let key = CacheKey::new(kinds::MACRO_TRENDS);
        cache.set(&key, &serde_json::json!({"trend": "flat"}), 0.0).await.unwrap();
        clock.advance(Duration::minutes(1));
        cache.get::<serde_json::Value>(&key).await.unwrap();

        let summary = ledger.summary(start).await.unwrap();
        assert_eq!(summary.api_calls, 2);
        assert_eq!(summary.cache_hits, 1);
        assert_eq!(summary.tokens_used, 1200);
        assert!((summary.spent - 0.17).abs() < 1e-9);
        assert!((summary.saved - 0.06).abs() < 1e-9);

        let later = ledger.summary(start + Duration::hours(1)).await.unwrap();
        assert_eq!(later, CostSummary::default());
    }

    #[tokio::test]
    async fn test_rejects_negative_cost() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(
            tmp.path().join("cache.db"),
            std::time::Duration::from_secs(1),
            CACHE_SCHEMA,
        )
        .unwrap();
        let ledger = CostLedger::new(db, Arc::new(crate::clock::SystemClock));
        assert!(ledger.record_api_call("m", "a", None, -1.0).await.is_err());
    }
}
