//! Refresh recommendations from the age of the last analysis

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::error::Result;
use crate::freshness::{FreshnessBand, FreshnessPolicy, kinds};
use crate::ledger::HistoryLedger;

/// Days after which quarterly data has probably changed
pub const QUARTERLY_AFTER_DAYS: i64 = 90;
pub const WEEKLY_AFTER_DAYS: i64 = 7;
pub const DAILY_AFTER_DAYS: i64 = 1;

/// One module the caller should rerun
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshItem {
    pub module: String,
    /// Data kinds behind the module, for targeted cache invalidation
    pub data_kinds: Vec<String>,
    pub reason: String,
}

impl RefreshItem {
    fn new(module: &str, data_kinds: Vec<String>, reason: impl Into<String>) -> Self {
        Self {
            module: module.to_string(),
            data_kinds,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshPlan {
    pub urgent: Vec<RefreshItem>,
    pub recommended: Vec<RefreshItem>,
    pub optional: Vec<RefreshItem>,
    /// Whole days since the last analysis, `None` if there never was one
    pub days_since_last: Option<i64>,
}

impl RefreshPlan {
    pub fn is_empty(&self) -> bool {
        self.urgent.is_empty() && self.recommended.is_empty() && self.optional.is_empty()
    }
}

#[derive(Clone)]
pub struct RefreshAdvisor {
    ledger: HistoryLedger,
    policy: Arc<FreshnessPolicy>,
    clock: SharedClock,
}

impl RefreshAdvisor {
    pub fn new(ledger: HistoryLedger, policy: Arc<FreshnessPolicy>, clock: SharedClock) -> Self {
        Self {
            ledger,
            policy,
            clock,
        }
    }

    /// Tiers are cumulative: a subject last analyzed 100 days ago gets
    /// urgent, recommended and optional items.
    pub async fn recommend_refresh(&self, subject: &str) -> Result<RefreshPlan> {
        let Some(last) = self.ledger.last_analysis_at(subject).await? else {
            return Ok(RefreshPlan {
                urgent: vec![RefreshItem::new(
                    "all",
                    vec!["all".to_string()],
                    "No previous analysis found",
                )],
                ..RefreshPlan::default()
            });
        };

        let days = (self.clock.now() - last).num_days();
        let mut plan = RefreshPlan {
            days_since_last: Some(days),
            ..RefreshPlan::default()
        };

        if days > QUARTERLY_AFTER_DAYS {
            let company_kinds = self
                .policy
                .kinds_in_band(FreshnessBand::Quarterly)
                .into_iter()
                .filter(|k| k != kinds::SUPPLIER_RELATIONSHIPS && k != kinds::CUSTOMER_RELATIONSHIPS)
                .collect();

            plan.urgent.push(RefreshItem::new(
                "company_financials",
                company_kinds,
                format!("Last analysis {days} days ago - likely new quarterly data"),
            ));
            plan.urgent.push(RefreshItem::new(
                "suppliers",
                vec![kinds::SUPPLIER_RELATIONSHIPS.to_string()],
                "Quarterly refresh needed",
            ));
            plan.urgent.push(RefreshItem::new(
                "customers",
                vec![kinds::CUSTOMER_RELATIONSHIPS.to_string()],
                "Quarterly refresh needed",
            ));
        }

        if days > WEEKLY_AFTER_DAYS {
            plan.recommended.push(RefreshItem::new(
                "macro_factors",
                self.policy.kinds_in_band(FreshnessBand::Weekly),
                "Weekly refresh recommended",
            ));
        }

        if days > DAILY_AFTER_DAYS {
            plan.optional.push(RefreshItem::new(
                "monetary",
                self.policy.kinds_in_band(FreshnessBand::Daily),
                "Daily data may have updated",
            ));
        }

        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::db::Database;
    use crate::db::schema::SENTINEL_SCHEMA;
    use crate::ledger::AnalysisRecord;
    use chrono::{Duration, TimeZone, Utc};
    use tempfile::TempDir;

    async fn advisor_after(days: Option<i64>) -> (TempDir, RefreshAdvisor) {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(
            tmp.path().join("sentinel.db"),
            std::time::Duration::from_secs(1),
            SENTINEL_SCHEMA,
        )
        .unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap());
        let ledger = HistoryLedger::new(db, Arc::new(clock.clone()));

        if let Some(days) = days {
            ledger
                .append(&AnalysisRecord::new("ACME", clock.now()).with_combined_score(6.0))
                .await
                .unwrap();
            clock.advance(Duration::days(days));
        }

        let advisor = RefreshAdvisor::new(ledger, Arc::new(FreshnessPolicy::default()), Arc::new(clock));
        (tmp, advisor)
    }

    fn modules(items: &[RefreshItem]) -> Vec<&str> {
        items.iter().map(|i| i.module.as_str()).collect()
    }

    #[tokio::test]
    async fn test_never_analyzed() {
        let (_tmp, advisor) = advisor_after(None).await;
        let plan = advisor.recommend_refresh("ACME").await.unwrap();
        assert_eq!(modules(&plan.urgent), vec!["all"]);
        assert_eq!(plan.urgent[0].reason, "No previous analysis found");
        assert!(plan.recommended.is_empty());
        assert_eq!(plan.days_since_last, None);
    }

    #[tokio::test]
    async fn test_fresh_analysis_needs_nothing() {
        let (_tmp, advisor) = advisor_after(Some(1)).await;
        let plan = advisor.recommend_refresh("ACME").await.unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.days_since_last, Some(1));
    }

    #[tokio::test]
    async fn test_week_old_analysis() {
        let (_tmp, advisor) = advisor_after(Some(8)).await;
        let plan = advisor.recommend_refresh("ACME").await.unwrap();
        assert!(plan.urgent.is_empty());
        assert_eq!(modules(&plan.recommended), vec!["macro_factors"]);
        assert_eq!(plan.recommended[0].data_kinds.len(), 4);
        assert_eq!(modules(&plan.optional), vec!["monetary"]);
        assert!(plan.optional[0].data_kinds.contains(&kinds::FED_RATE.to_string()));
    }

    #[tokio::test]
    async fn test_quarter_old_analysis() {
        let (_tmp, advisor) = advisor_after(Some(91)).await;
        let plan = advisor.recommend_refresh("ACME").await.unwrap();
        assert_eq!(
            modules(&plan.urgent),
            vec!["company_financials", "suppliers", "customers"]
        );
        assert_eq!(
            plan.urgent[0].data_kinds,
            vec!["competitive_landscape", "financial_statements"]
        );
        assert_eq!(plan.urgent[0].reason, "Last analysis 91 days ago - likely new quarterly data");
        assert_eq!(plan.recommended.len(), 1);
        assert_eq!(plan.optional.len(), 1);
    }
}
