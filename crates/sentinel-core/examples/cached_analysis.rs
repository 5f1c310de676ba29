//! Cached analysis example
//!
//! Simulates two analysis runs of one subject against a throwaway data
//! directory: the first run fetches and caches, the second is served from
//! cache and the sentinel reports what changed.
//!
//! To run this example:
//! ```bash
//! cargo run -p sentinel-core --example cached_analysis ACME
//! ```

use std::env;
use std::sync::Arc;

use chrono::{Duration, Utc};
use sentinel_core::boundary::{Validate, decode_response};
use sentinel_core::freshness::kinds;
use sentinel_core::{
    AnalysisOutcome, AnalysisRecord, CacheKey, Clock, ManualClock, ScoreField, Sentinel, SentinelConfig,
    SentinelError,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SupplierAnalysis {
    score: f64,
    suppliers: Vec<String>,
}

impl Validate for SupplierAnalysis {
    fn validate(&self) -> sentinel_core::Result<()> {
        if (0.0..=10.0).contains(&self.score) {
            Ok(())
        } else {
            Err(SentinelError::InvalidPayload(format!(
                "supplier score {} outside 0-10",
                self.score
            )))
        }
    }
}

/// Stand-in for an LLM call returning fenced JSON
async fn ask_model(subject: &str) -> sentinel_core::Result<SupplierAnalysis> {
    println!("  (calling model for {subject} suppliers)");
    let response = format!(
        "Here is the analysis for {subject}:\n```json\n{{\"score\": 5.5, \"suppliers\": [\"Foundry Co\", \"Panel Works\"]}}\n```"
    );
    decode_response(&response)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let args: Vec<String> = env::args().collect();
    let subject = args.get(1).map_or("ACME", String::as_str);

    let data_dir = tempfile::tempdir()?;
    let config = SentinelConfig::builder().data_dir(data_dir.path()).build()?;
    let clock = ManualClock::new(Utc::now());
    let sentinel = Sentinel::open_with_clock(&config, Arc::new(clock.clone()))?;
    let retry = config.retry_policy();

    println!("=== Stock Sentinel ===\n");
    println!("Subject: {subject}");
    println!("Data dir: {}\n", data_dir.path().display());

    let key = CacheKey::new(kinds::SUPPLIER_RELATIONSHIPS).for_subject(subject);
    for (run, combined) in [(1, 7.0), (2, 5.0)] {
        println!("Run {run}:");
        let suppliers: SupplierAnalysis = sentinel
            .cache()
            .get_or_fetch(&key, 0.17, || {
                retry.execute("supplier_analysis", || ask_model(subject))
            })
            .await?;

        let mut outcome = AnalysisOutcome::new(
            AnalysisRecord::new(subject, clock.now())
                .with_combined_score(combined)
                .with_score(ScoreField::Supplier, suppliers.score),
        );
        for name in &suppliers.suppliers {
            outcome = outcome.with_supplier(name.clone(), suppliers.score);
        }

        let summary = sentinel.learn_from_analysis(&outcome).await?;
        println!("  changes: {}", summary.changes.len());
        for change in &summary.changes {
            println!(
                "    {} {} -> {} ({})",
                change.field, change.old_value, change.new_value, change.significance
            );
        }

        clock.advance(Duration::days(3));
    }

    let report = sentinel.report(subject).await?;
    println!("\n{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
