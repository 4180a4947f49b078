//! Trigger definitions and boundary arithmetic.
//!
//! Defines the [`Trigger`] and [`Schedule`] types and the pure
//! [`next_fire_time`] used by the runner. Nothing here sleeps or reads the
//! clock, so every boundary rule is unit-testable.

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::config::ScheduleConfig;
use crate::error::{ChoreError, Result};
use crate::ledger::format_date;

/// The four periodic triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    /// Materialize the day's chore instances.
    Rollover,
    /// Compose and send the per-day recap.
    DailySummary,
    /// Compose and send the 7-day recap.
    WeeklySummary,
    /// Zero every balance. Runs right after `WeeklySummary` in the same cycle.
    WeeklyReset,
}

impl Trigger {
    /// Stable identifier used in run keys and logs.
    pub fn id(self) -> &'static str {
        match self {
            Self::Rollover => "rollover",
            Self::DailySummary => "daily_summary",
            Self::WeeklySummary => "weekly_summary",
            Self::WeeklyReset => "weekly_reset",
        }
    }

    /// Dedupe key for the boundary falling on `date`.
    pub fn run_key(self, date: NaiveDate) -> String {
        format!("{}:{}", self.id(), format_date(date))
    }
}

impl std::fmt::Display for Trigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Day of the week for weekly schedules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    #[serde(alias = "mon")]
    Monday,
    #[serde(alias = "tue")]
    Tuesday,
    #[serde(alias = "wed")]
    Wednesday,
    #[serde(alias = "thu")]
    Thursday,
    #[serde(alias = "fri")]
    Friday,
    #[serde(alias = "sat")]
    Saturday,
    #[serde(alias = "sun")]
    Sunday,
}

impl Weekday {
    pub(crate) fn to_chrono(self) -> chrono::Weekday {
        match self {
            Self::Monday => chrono::Weekday::Mon,
            Self::Tuesday => chrono::Weekday::Tue,
            Self::Wednesday => chrono::Weekday::Wed,
            Self::Thursday => chrono::Weekday::Thu,
            Self::Friday => chrono::Weekday::Fri,
            Self::Saturday => chrono::Weekday::Sat,
            Self::Sunday => chrono::Weekday::Sun,
        }
    }
}

impl std::fmt::Display for Weekday {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Monday => "monday",
            Self::Tuesday => "tuesday",
            Self::Wednesday => "wednesday",
            Self::Thursday => "thursday",
            Self::Friday => "friday",
            Self::Saturday => "saturday",
            Self::Sunday => "sunday",
        };
        f.write_str(name)
    }
}

/// When a trigger fires, in local wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Once a day at `at`.
    Daily { at: NaiveTime },
    /// Once a week on `day` at `at`.
    Weekly { day: Weekday, at: NaiveTime },
}

impl Schedule {
    /// The first boundary strictly after `now`.
    ///
    /// Always computed from the absolute boundary rather than by adding a
    /// period to the previous fire time, so a late tick never skews later ones.
    pub fn next_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        match *self {
            Self::Daily { at } => {
                let candidate = now.date().and_time(at);
                if candidate > now {
                    candidate
                } else {
                    candidate + TimeDelta::days(1)
                }
            }
            Self::Weekly { day, at } => {
                let target = i64::from(day.to_chrono().num_days_from_monday());
                let current = i64::from(now.weekday().num_days_from_monday());
                let ahead = (target - current).rem_euclid(7);
                let candidate = (now.date() + TimeDelta::days(ahead)).and_time(at);
                if candidate > now {
                    candidate
                } else {
                    candidate + TimeDelta::days(7)
                }
            }
        }
    }
}

impl std::fmt::Display for Schedule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Daily { at } => write!(f, "daily at {}", at.format("%H:%M")),
            Self::Weekly { day, at } => write!(f, "weekly on {day} at {}", at.format("%H:%M")),
        }
    }
}

/// Parse a local `HH:MM` time of day.
pub fn parse_time_of_day(s: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(s.trim(), "%H:%M")
        .map_err(|e| ChoreError::Validation(format!("malformed time of day '{s}': {e}")))
}

/// The schedule configured for `trigger`. The weekly reset shares the
/// weekly summary's boundary.
pub fn schedule_for(trigger: Trigger, config: &ScheduleConfig) -> Result<Schedule> {
    Ok(match trigger {
        Trigger::Rollover => Schedule::Daily {
            at: parse_time_of_day(&config.rollover_at)?,
        },
        Trigger::DailySummary => Schedule::Daily {
            at: parse_time_of_day(&config.daily_summary_at)?,
        },
        Trigger::WeeklySummary | Trigger::WeeklyReset => Schedule::Weekly {
            day: config.weekly_summary_day,
            at: parse_time_of_day(&config.weekly_summary_at)?,
        },
    })
}

/// Next time `trigger` fires after `now`.
pub fn next_fire_time(
    trigger: Trigger,
    now: NaiveDateTime,
    config: &ScheduleConfig,
) -> Result<NaiveDateTime> {
    Ok(schedule_for(trigger, config)?.next_after(now))
}
