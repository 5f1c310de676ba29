//! Earnings calendar driving quarterly refreshes

use chrono::NaiveDate;
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::db::{Database, parse_date};
use crate::error::Result;

/// Days after an earnings release during which quarterly data is still
/// considered current
pub const EARNINGS_GRACE_DAYS: i64 = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsSchedule {
    pub subject: String,
    pub last_earnings_date: NaiveDate,
    pub next_earnings_date: Option<NaiveDate>,
    /// Fiscal quarter label, e.g. "Q3"
    pub fiscal_quarter: String,
    pub fiscal_year: i32,
}

#[derive(Clone)]
pub struct EarningsCalendar {
    db: Database,
    clock: SharedClock,
}

impl EarningsCalendar {
    pub fn new(db: Database, clock: SharedClock) -> Self {
        Self { db, clock }
    }

    /// Insert or replace the schedule for a subject
    pub async fn update_schedule(&self, schedule: &EarningsSchedule) -> Result<()> {
        let schedule = schedule.clone();
        self.db
            .write(move |tx| {
                tx.execute(
                    "INSERT OR REPLACE INTO earnings_calendar
                        (subject, last_earnings_date, next_earnings_date, fiscal_quarter, fiscal_year)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        schedule.subject,
                        schedule.last_earnings_date.to_string(),
                        schedule.next_earnings_date.map(|d| d.to_string()),
                        schedule.fiscal_quarter,
                        schedule.fiscal_year,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, subject: &str) -> Result<Option<EarningsSchedule>> {
        let subject = subject.to_string();
        self.db
            .read(move |conn| {
                let row: Option<(String, String, Option<String>, String, i32)> = conn
                    .query_row(
                        "SELECT subject, last_earnings_date, next_earnings_date, fiscal_quarter, fiscal_year
                         FROM earnings_calendar WHERE subject = ?1",
                        params![subject],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?)),
                    )
                    .optional()?;

                let Some((subject, last, next, fiscal_quarter, fiscal_year)) = row else {
                    return Ok(None);
                };

                Ok(Some(EarningsSchedule {
                    subject,
                    last_earnings_date: parse_date(&last)?,
                    next_earnings_date: next.as_deref().map(parse_date).transpose()?,
                    fiscal_quarter,
                    fiscal_year,
                }))
            })
            .await
    }

    /// True when no schedule is known or the last release is more than
    /// [`EARNINGS_GRACE_DAYS`] old.
    pub async fn needs_quarterly_refresh(&self, subject: &str) -> Result<bool> {
        let today = self.clock.now().date_naive();
        Ok(match self.get(subject).await? {
            Some(schedule) => (today - schedule.last_earnings_date).num_days() > EARNINGS_GRACE_DAYS,
            None => true,
        })
    }
}
