//! Core domain model for the "on this day" harvester.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "otd-core";

/// Every target day is resolved against this year so that February 29 exists.
pub const REFERENCE_LEAP_YEAR: i32 = 2000;

/// Years outside this range are rejected as invalid dates.
pub const MIN_YEAR: i32 = 1;
pub const MAX_YEAR: i32 = 9999;

/// A (month, day) pair, stored as a date in [`REFERENCE_LEAP_YEAR`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TargetDay(NaiveDate);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid target day [{input}]; expected a %m-%d formatted string such as 07-20")]
pub struct TargetDayParseError {
    pub input: String,
}

impl TargetDay {
    pub fn new(month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(REFERENCE_LEAP_YEAR, month, day).map(Self)
    }

    /// The target day sharing month and day with `date`, whatever its year.
    pub fn from_date(date: NaiveDate) -> Self {
        // Every (month, day) pair exists in a leap year.
        Self::new(date.month(), date.day()).unwrap_or(Self(date))
    }

    pub fn today() -> Self {
        Self::from_date(Utc::now().date_naive())
    }

    /// All 366 days of the reference leap year, January 1 first.
    pub fn all() -> Vec<Self> {
        NaiveDate::from_ymd_opt(REFERENCE_LEAP_YEAR, 1, 1)
            .into_iter()
            .flat_map(|start| start.iter_days())
            .take_while(|d| d.year() == REFERENCE_LEAP_YEAR)
            .map(Self)
            .collect()
    }

    pub fn month(&self) -> u32 {
        self.0.month()
    }

    pub fn day(&self) -> u32 {
        self.0.day()
    }

    pub fn is_leap_day(&self) -> bool {
        self.month() == 2 && self.day() == 29
    }

    /// Calendar date for this day in `year`, if that date exists.
    pub fn in_year(&self, year: i32) -> Option<NaiveDate> {
        if !(MIN_YEAR..=MAX_YEAR).contains(&year) {
            return None;
        }
        NaiveDate::from_ymd_opt(year, self.month(), self.day())
    }

    /// Page name such as `July_20`; the day is never zero-padded.
    pub fn page_slug(&self) -> String {
        self.0.format("%B_%-d").to_string()
    }

    /// Human label such as `July 20`.
    pub fn label(&self) -> String {
        self.0.format("%B %-d").to_string()
    }

    pub fn matches(&self, date: NaiveDate) -> bool {
        date.month() == self.month() && date.day() == self.day()
    }
}

impl fmt::Display for TargetDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

impl FromStr for TargetDay {
    type Err = TargetDayParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let input = s.trim();
        NaiveDate::parse_from_str(&format!("{REFERENCE_LEAP_YEAR}-{input}"), "%Y-%m-%d")
            .map(Self)
            .map_err(|_| TargetDayParseError {
                input: input.to_string(),
            })
    }
}

/// One unparsed entry lifted from a day's event list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RawFragment {
    pub day: TargetDay,
    pub text: String,
}

impl RawFragment {
    pub fn new(day: TargetDay, text: impl Into<String>) -> Self {
        Self {
            day,
            text: text.into(),
        }
    }
}

/// A validated (year, description) pair. The date it implies always exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fact {
    pub year: i32,
    pub description: String,
    date: NaiveDate,
}

impl Fact {
    /// Builds a fact for `day` in `year`, or `None` when that date does not exist.
    pub fn on(day: TargetDay, year: i32, description: impl Into<String>) -> Option<Self> {
        let date = day.in_year(year)?;
        Some(Self {
            year,
            description: description.into(),
            date,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }
}

pub type EventId = i64;

/// Persisted historical event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: EventId,
    pub date: NaiveDate,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewEvent {
    pub date: NaiveDate,
    pub description: String,
}

/// Replacement description for an existing record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventUpdate {
    pub id: EventId,
    pub date: NaiveDate,
    pub previous: String,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DayFailureKind {
    Transport,
    Structure,
    Timeout,
    Task,
}

impl DayFailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Structure => "structure",
            Self::Timeout => "timeout",
            Self::Task => "task",
        }
    }
}

/// A day that contributed no facts because its page could not be harvested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DayFailure {
    pub day: TargetDay,
    pub kind: DayFailureKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Committed,
    RolledBack,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Committed => f.write_str("committed"),
            Self::RolledBack => f.write_str("rolled back"),
        }
    }
}

/// Counters for one harvest run. Owned and mutated by the apply loop only.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub commit_requested: bool,
    pub outcome: Option<RunOutcome>,
    pub days_targeted: usize,
    pub days_harvested: usize,
    pub failed_days: Vec<DayFailure>,
    /// Facts that parsed cleanly and went through reconciliation.
    pub fetched: usize,
    pub ignored: usize,
    pub kept: usize,
    pub new: usize,
    pub updated: usize,
    pub deleted: usize,
    pub elapsed_ms: u64,
}

impl RunReport {
    pub fn new(days_targeted: usize, commit_requested: bool) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            commit_requested,
            outcome: None,
            days_targeted,
            days_harvested: 0,
            failed_days: Vec::new(),
            fetched: 0,
            ignored: 0,
            kept: 0,
            new: 0,
            updated: 0,
            deleted: 0,
            elapsed_ms: 0,
        }
    }

    pub fn finish(&mut self, outcome: RunOutcome, elapsed: Duration) {
        self.outcome = Some(outcome);
        self.finished_at = Some(Utc::now());
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed_ms as f64 / 1000.0
    }

    pub fn failures_of(&self, kind: DayFailureKind) -> usize {
        self.failed_days.iter().filter(|f| f.kind == kind).count()
    }

    pub fn summary_line(&self) -> String {
        format!(
            "Loaded {} events in {:.2} seconds. Ignored {} others. {} events are new. \
             {} existing events will be updated. {} existing events will be deleted. \
             {} of {} days failed to harvest.",
            self.fetched,
            self.elapsed_secs(),
            self.ignored,
            self.new,
            self.updated,
            self.deleted,
            self.failed_days.len(),
            self.days_targeted,
        )
    }
}
