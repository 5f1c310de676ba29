//! Table rendering for command output

use chrono::{DateTime, Utc};
use comfy_table::presets::UTF8_FULL;
use comfy_table::{ContentArrangement, Table};
use sentinel_core::{
    Alert, CacheStats, ChangeEvent, CostSummary, Insight, MonitoringTask, RefreshItem, RefreshPlan,
    Relationship, TrendReport, WatchlistEntry,
};

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

fn when(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M").to_string()
}

fn score(value: Option<f64>) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.2}"))
}

pub fn cache_stats(stats: &CacheStats, costs: &CostSummary) -> Table {
    let mut t = table(vec!["Metric", "Value"]);
    t.add_row(vec!["Total entries".to_string(), stats.total_items.to_string()]);
    t.add_row(vec!["Fresh".to_string(), stats.fresh_items.to_string()]);
    t.add_row(vec!["Stale".to_string(), stats.stale_items.to_string()]);
    t.add_row(vec!["Fresh ratio".to_string(), format!("{:.1}%", stats.hit_rate)]);
    t.add_row(vec!["Hits today".to_string(), stats.cache_hits_today.to_string()]);
    t.add_row(vec!["Saved (all time)".to_string(), format!("${:.2}", stats.cost_saved_total)]);
    t.add_row(vec!["API calls (window)".to_string(), costs.api_calls.to_string()]);
    t.add_row(vec!["Spent (window)".to_string(), format!("${:.2}", costs.spent)]);
    t.add_row(vec!["Saved (window)".to_string(), format!("${:.2}", costs.saved)]);
    t
}

pub fn trend(report: &TrendReport) -> Table {
    let mut t = table(vec!["Date", "Score", "Signal", "Monetary", "Company", "Supplier", "Customer", "Macro"]);
    for point in &report.history {
        t.add_row(vec![
            when(point.timestamp),
            score(point.score),
            point.signal.clone().unwrap_or_else(|| "-".to_string()),
            score(point.modules.monetary),
            score(point.modules.company),
            score(point.modules.supplier),
            score(point.modules.customer),
            score(point.modules.macro_),
        ]);
    }
    t
}

pub fn changes(events: &[ChangeEvent]) -> Table {
    let mut t = table(vec!["When", "Field", "Old", "New", "Magnitude", "Significance"]);
    for event in events {
        t.add_row(vec![
            when(event.timestamp),
            event.field.to_string(),
            format!("{:.2}", event.old_value),
            format!("{:.2}", event.new_value),
            format!("{:.2}", event.magnitude),
            event.significance.to_string(),
        ]);
    }
    t
}

pub fn insights(insights: &[Insight]) -> Table {
    let mut t = table(vec!["Type", "Insight", "Confidence", "Seen", "Validated", "Valid"]);
    for insight in insights {
        t.add_row(vec![
            insight.insight_type.clone(),
            insight.insight.clone(),
            format!("{:.2}", insight.confidence),
            insight.validation_count.to_string(),
            when(insight.last_validated),
            if insight.still_valid { "yes" } else { "no" }.to_string(),
        ]);
    }
    t
}

pub fn relationships(relationships: &[Relationship]) -> Table {
    let mut t = table(vec!["Entity", "Type", "Importance", "Discovered", "Updated"]);
    for rel in relationships {
        t.add_row(vec![
            rel.related_entity.clone(),
            rel.relationship_type.clone(),
            format!("{:.2}", rel.importance_score),
            when(rel.discovered_date),
            when(rel.last_updated),
        ]);
    }
    t
}

pub fn refresh_plan(plan: &RefreshPlan) -> Table {
    let mut t = table(vec!["Priority", "Module", "Data kinds", "Reason"]);
    let tiers = [
        ("urgent", &plan.urgent),
        ("recommended", &plan.recommended),
        ("optional", &plan.optional),
    ];
    for (priority, items) in tiers {
        for item in items {
            t.add_row(vec![
                priority.to_string(),
                item.module.clone(),
                item.data_kinds.join(", "),
                item.reason.clone(),
            ]);
        }
    }
    t
}

pub fn watchlist(entries: &[WatchlistEntry]) -> Table {
    let mut t = table(vec!["Subject", "Importance", "Every (h)", "Alert at", "Last checked"]);
    for entry in entries {
        t.add_row(vec![
            entry.subject.clone(),
            entry.importance.to_string(),
            entry.check_frequency_hours.to_string(),
            format!("{:.2}", entry.alert_threshold),
            entry.last_checked.map_or_else(|| "never".to_string(), when),
        ]);
    }
    t
}

pub fn monitoring_cycle(tasks: &[MonitoringTask]) -> Table {
    let mut t = table(vec![
        "Subject",
        "Importance",
        "Urgent",
        "Recommended",
        "Optional",
        "Earnings refresh",
        "Open alerts",
    ]);
    for task in tasks {
        let modules = |items: &[RefreshItem]| {
            items
                .iter()
                .map(|i| i.module.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        };
        t.add_row(vec![
            task.entry.subject.clone(),
            task.entry.importance.to_string(),
            modules(&task.plan.urgent),
            modules(&task.plan.recommended),
            modules(&task.plan.optional),
            if task.quarterly_refresh_due { "yes" } else { "no" }.to_string(),
            task.open_alerts.len().to_string(),
        ]);
    }
    t
}

pub fn alerts(alerts: &[Alert]) -> Table {
    let mut t = table(vec!["Id", "Subject", "Severity", "Type", "Message", "Triggered"]);
    for alert in alerts {
        t.add_row(vec![
            alert.id.to_string(),
            alert.subject.clone(),
            alert.severity.to_string(),
            alert.alert_type.clone(),
            alert.message.clone(),
            when(alert.triggered_at),
        ]);
    }
    t
}
