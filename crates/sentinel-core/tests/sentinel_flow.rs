//! End-to-end: cache reads, two analyses of one subject, report

use std::sync::Arc;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use sentinel_core::freshness::kinds;
use sentinel_core::{
    AnalysisOutcome, AnalysisRecord, CacheKey, Clock, EarningsSchedule, ManualClock, ScoreField, Sentinel,
    SentinelConfig, Significance, Trend, WatchlistEntry,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tempfile::TempDir;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Statements {
    revenue: u64,
    net_income: u64,
}

fn open(tmp: &TempDir, clock: &ManualClock) -> Sentinel {
    let config = SentinelConfig::builder()
        .data_dir(tmp.path())
        .build()
        .unwrap();
    Sentinel::open_with_clock(&config, Arc::new(clock.clone())).unwrap()
}

#[tokio::test]
async fn acme_scenario() {
    let tmp = TempDir::new().unwrap();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 2, 3, 15, 30, 0).unwrap());
    let sentinel = open(&tmp, &clock);
    let cache = sentinel.cache();

    // Real-time price is never served from cache.
    let price = CacheKey::new(kinds::STOCK_PRICE_CURRENT).for_subject("ACME");
    cache.set(&price, &json!({"price": 101.25}), 0.0).await.unwrap();
    assert!(cache.get::<serde_json::Value>(&price).await.unwrap().is_none());

    // Quarterly statements stay for 2160 hours.
    let statements = CacheKey::new(kinds::FINANCIAL_STATEMENTS).for_subject("ACME");
    let fetched = Statements {
        revenue: 1_000,
        net_income: 120,
    };
    cache.set(&statements, &fetched, 0.02).await.unwrap();

    clock.advance(Duration::hours(1));
    assert_eq!(
        cache.get::<Statements>(&statements).await.unwrap(),
        Some(fetched.clone())
    );

    sentinel.watchlist().add(&WatchlistEntry::new("ACME")).await.unwrap();
    sentinel
        .learn_from_analysis(&AnalysisOutcome::new(
            AnalysisRecord::new("ACME", clock.now())
                .with_combined_score(7.0)
                .with_signal("BUY")
                .with_score(ScoreField::Customer, 8.5),
        ))
        .await
        .unwrap();

    clock.advance(Duration::days(2));
    let summary = sentinel
        .learn_from_analysis(
            &AnalysisOutcome::new(
                AnalysisRecord::new("ACME", clock.now())
                    .with_combined_score(5.0)
                    .with_signal("HOLD")
                    .with_score(ScoreField::Customer, 8.7),
            )
            .with_customer("Big Retail", 9.0),
        )
        .await
        .unwrap();

    assert_eq!(summary.changes.len(), 1);
    let change = &summary.changes[0];
    assert_eq!(change.field, ScoreField::Combined);
    assert_eq!(change.significance, Significance::High);
    assert!((change.magnitude - 2.0).abs() < 1e-9);

    let alert = summary.alert.unwrap();
    assert_eq!(alert.severity, Significance::High);
    let report = sentinel.report("ACME").await.unwrap();
    assert_eq!(report.active_alerts, vec![alert]);

    // Past 2160 hours the statements are stale.
    clock.advance(Duration::hours(2161));
    assert!(cache.get::<Statements>(&statements).await.unwrap().is_none());
    assert!(cache.should_refresh(&statements).await.unwrap());
}

#[tokio::test]
async fn state_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 2, 3, 15, 30, 0).unwrap());

    {
        let sentinel = open(&tmp, &clock);
        let key = CacheKey::new(kinds::MACRO_TRENDS);
        sentinel.cache().set(&key, &json!({"trend": "easing"}), 0.06).await.unwrap();
        sentinel
            .learn_from_analysis(&AnalysisOutcome::new(
                AnalysisRecord::new("ACME", clock.now()).with_combined_score(6.0),
            ))
            .await
            .unwrap();
        sentinel
            .earnings()
            .update_schedule(&EarningsSchedule {
                subject: "ACME".to_string(),
                last_earnings_date: NaiveDate::from_ymd_opt(2025, 1, 30).unwrap(),
                next_earnings_date: None,
                fiscal_quarter: "Q4".to_string(),
                fiscal_year: 2024,
            })
            .await
            .unwrap();
    }

    clock.advance(Duration::days(3));
    let sentinel = open(&tmp, &clock);
    let value: Option<serde_json::Value> = sentinel
        .cache()
        .get(&CacheKey::new(kinds::MACRO_TRENDS))
        .await
        .unwrap();
    assert_eq!(value, Some(json!({"trend": "easing"})));

    let report = sentinel.report("ACME").await.unwrap();
    assert_eq!(report.historical_trend.trend, Trend::InsufficientData);
    assert_eq!(report.refresh_recommendations.days_since_last, Some(3));
    assert!(report.refresh_recommendations.recommended.is_empty());
    assert_eq!(report.refresh_recommendations.optional.len(), 1);
    assert_eq!(report.earnings.unwrap().fiscal_quarter, "Q4");
    assert_eq!(report.cache_stats.total_items, 1);
    assert!((report.cache_stats.cost_saved_total - 0.06).abs() < 1e-9);

    let costs = sentinel
        .costs()
        .summary(clock.now() - Duration::days(30))
        .await
        .unwrap();
    assert_eq!(costs.cache_hits, 1);
}
