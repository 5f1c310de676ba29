//! Command-line interface for stock-sentinel
//!
//! Inspects and maintains the cache and sentinel databases: cache stats and
//! sweeps, per-subject history, changes, insights and relationships, refresh
//! advice, the monitoring watchlist and its alerts.

mod render;

use std::path::PathBuf;

use anyhow::Context;
use chrono::Duration;
use clap::{Parser, Subcommand};
use sentinel_core::alerts::DEFAULT_ALERT_LIMIT;
use sentinel_core::{Sentinel, SentinelConfig, WatchlistEntry};
use serde::Serialize;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sentinel")]
#[command(about = "Inspect and maintain stock-sentinel state", long_about = None)]
struct Args {
    /// Data directory holding cache.db and sentinel.db (overrides SENTINEL_DATA_DIR)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Cache statistics and recent spend
    Stats {
        /// Cost window in days
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
    /// Delete expired cache entries
    Sweep,
    /// Drop cache entries by data kind and/or subject
    Invalidate {
        #[arg(long)]
        kind: Option<String>,
        #[arg(long)]
        subject: Option<String>,
    },
    /// Score history and trend for a subject
    Trend { subject: String },
    /// Recent significant changes for a subject
    Changes {
        subject: String,
        #[arg(long)]
        days: Option<u32>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Learned insights for a subject
    Insights {
        subject: String,
        /// Include insights no longer marked valid
        #[arg(long)]
        all: bool,
    },
    /// Active supplier and customer relationships
    Relationships {
        subject: String,
        /// Only this relationship type (supplier, customer)
        #[arg(long = "type")]
        relationship_type: Option<String>,
    },
    /// What to refresh for a subject
    Refresh { subject: String },
    /// Full sentinel report (JSON)
    Report { subject: String },
    /// Add a subject to the watchlist
    Watch {
        subject: String,
        /// 1 (low) to 5 (critical)
        #[arg(long, default_value_t = 3)]
        importance: u8,
        /// Check frequency in hours
        #[arg(long, default_value_t = 24)]
        every: u32,
        /// Combined-score move worth an alert
        #[arg(long, default_value_t = 1.0)]
        alert_threshold: f64,
    },
    /// Remove a subject from the watchlist
    Unwatch { subject: String },
    /// Show the watchlist
    Watchlist,
    /// Plan the next monitoring cycle; with --mark-checked, record it as done
    Cycle {
        #[arg(long)]
        mark_checked: bool,
    },
    /// Open alerts, most severe first
    Alerts {
        #[arg(long)]
        subject: Option<String>,
        #[arg(long, default_value_t = DEFAULT_ALERT_LIMIT)]
        limit: usize,
    },
    /// Acknowledge an alert by id
    Ack { id: i64 },
}

fn emit<T: Serialize>(json: bool, value: &T, table: impl FnOnce() -> comfy_table::Table) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(value)?);
    } else {
        println!("{}", table());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app = sentinel_utils::Config::from_env()?;
    sentinel_utils::init_tracing_with(app.log_format, "info");

    let args = Args::parse();

    let mut config = SentinelConfig::from_env().context("invalid SENTINEL_* configuration")?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    info!(
        "Starting {} ({}, {} logs) with data dir {}",
        app.app_name,
        app.environment,
        app.log_format,
        config.data_dir.display()
    );

    let sentinel = Sentinel::open(&config)
        .with_context(|| format!("failed to open databases in {}", config.data_dir.display()))?;
    let json = args.json;

    match args.command {
        Command::Stats { days } => {
            let stats = sentinel.cache().get_stats().await?;
            let since = chrono::Utc::now() - Duration::days(i64::from(days));
            let costs = sentinel.costs().summary(since).await?;
            let value = serde_json::json!({ "cache": stats, "costs": costs });
            emit(json, &value, || render::cache_stats(&stats, &costs))?;
        }
        Command::Sweep => {
            let report = sentinel.maintenance().await?;
            println!("Removed {} stale cache entries", report.stale_entries_removed);
        }
        Command::Invalidate { kind, subject } => {
            if kind.is_none() && subject.is_none() {
                anyhow::bail!("give --kind, --subject or both");
            }
            let removed = sentinel
                .cache()
                .force_refresh(kind.as_deref(), subject.as_deref())
                .await?;
            println!("Invalidated {removed} cache entries");
        }
        Command::Trend { subject } => {
            let report = sentinel.trend(&subject).await?;
            if !json {
                println!("{}: {} ({} analyses)", subject, report.trend, report.analyses_count);
            }
            emit(json, &report, || render::trend(&report))?;
        }
        Command::Changes { subject, days, limit } => {
            let window = days.map_or_else(
                || sentinel.config().change_window(),
                |d| Duration::days(i64::from(d)),
            );
            let limit = limit.unwrap_or(sentinel.config().change_limit);
            let events = sentinel.change_log().recent_changes(&subject, window, limit).await?;
            emit(json, &events, || render::changes(&events))?;
        }
        Command::Insights { subject, all } => {
            let insights = sentinel.memory().list_insights(&subject, !all).await?;
            emit(json, &insights, || render::insights(&insights))?;
        }
        Command::Relationships {
            subject,
            relationship_type,
        } => {
            let relationships = sentinel
                .memory()
                .list_relationships(&subject, relationship_type.as_deref())
                .await?;
            emit(json, &relationships, || render::relationships(&relationships))?;
        }
        Command::Refresh { subject } => {
            let plan = sentinel.recommend_refresh(&subject).await?;
            if !json {
                match plan.days_since_last {
                    Some(days) => println!("{subject}: last analysis {days} days ago"),
                    None => println!("{subject}: never analyzed"),
                }
            }
            emit(json, &plan, || render::refresh_plan(&plan))?;
        }
        Command::Report { subject } => {
            let report = sentinel.report(&subject).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Watch {
            subject,
            importance,
            every,
            alert_threshold,
        } => {
            let entry = WatchlistEntry::new(subject.clone())
                .with_importance(importance)
                .with_check_frequency(every)
                .with_alert_threshold(alert_threshold);
            sentinel.watchlist().add(&entry).await?;
            println!("Watching {subject} every {every}h (importance {importance})");
        }
        Command::Unwatch { subject } => {
            if sentinel.watchlist().remove(&subject).await? {
                println!("Stopped watching {subject}");
            } else {
                println!("{subject} was not on the watchlist");
            }
        }
        Command::Watchlist => {
            let entries = sentinel.watchlist().list_active().await?;
            emit(json, &entries, || render::watchlist(&entries))?;
        }
        Command::Cycle { mark_checked } => {
            let tasks = sentinel.plan_monitoring_cycle().await?;
            emit(json, &tasks, || render::monitoring_cycle(&tasks))?;
            if mark_checked {
                for task in &tasks {
                    sentinel.complete_check(&task.entry.subject).await?;
                }
                info!("Marked {} subjects as checked", tasks.len());
            }
        }
        Command::Alerts { subject, limit } => {
            let alerts = sentinel.alerts().active(subject.as_deref(), limit).await?;
            emit(json, &alerts, || render::alerts(&alerts))?;
        }
        Command::Ack { id } => {
            if sentinel.alerts().acknowledge(id).await? {
                println!("Acknowledged alert #{id}");
            } else {
                println!("No open alert #{id}");
            }
        }
    }

    Ok(())
}
