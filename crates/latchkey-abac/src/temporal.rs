//! Time-window constraints.
//!
//! Two window kinds are supported:
//! - **Absolute**: a single `[start_time, end_time]` interval (inclusive).
//! - **Recurring**: a weekly schedule of allowed days with an inclusive
//!   minute-of-day range, e.g. Mon-Fri 09:00-17:00.
//!
//! All arithmetic is done in UTC.

use std::collections::HashSet;

use chrono::{DateTime, Datelike, Timelike, Utc, Weekday};
use serde::{Deserialize, Serialize};

use crate::condition::Outcome;

/// Last valid minute of a day (23:59).
pub const LAST_MINUTE_OF_DAY: u16 = 23 * 60 + 59;

/// Converts an hour and minute into a minute-of-day value.
///
/// Out-of-range inputs saturate rather than wrap, so the result is rejected
/// by [`TimeConstraint::validate`] instead of aliasing a real minute.
pub const fn minute_of_day(hour: u16, minute: u16) -> u16 {
    hour.saturating_mul(60).saturating_add(minute)
}

/// Monday through Friday.
pub fn weekdays() -> HashSet<Weekday> {
    [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ]
    .into_iter()
    .collect()
}

/// All seven days.
pub fn every_day() -> HashSet<Weekday> {
    [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
        Weekday::Sat,
        Weekday::Sun,
    ]
    .into_iter()
    .collect()
}

/// A temporal restriction on when a policy applies.
///
/// An empty constraint (not recurring, no bounds) is vacuously satisfied.
/// A recurring window only opens on the days in `allowed_days`; with no
/// days it never opens, and [`TimeConstraint::validate`] rejects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConstraint {
    /// Inclusive lower bound of an absolute window.
    pub start_time: Option<DateTime<Utc>>,
    /// Inclusive upper bound of an absolute window.
    pub end_time: Option<DateTime<Utc>>,
    /// Days on which a recurring window is open.
    pub allowed_days: HashSet<Weekday>,
    /// First minute of day (0..=1439) a recurring window is open.
    pub start_minute: u16,
    /// Last minute of day (0..=1439) a recurring window is open, inclusive.
    pub end_minute: u16,
    /// Selects the recurring schedule instead of the absolute interval.
    pub recurring: bool,
}

impl Default for TimeConstraint {
    fn default() -> Self {
        Self {
            start_time: None,
            end_time: None,
            allowed_days: HashSet::new(),
            start_minute: 0,
            end_minute: LAST_MINUTE_OF_DAY,
            recurring: false,
        }
    }
}

impl TimeConstraint {
    /// An absolute window `[start, end]`.
    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start_time: Some(start),
            end_time: Some(end),
            ..Self::default()
        }
    }

    /// A weekly window open on `days` between two minutes of day, inclusive.
    pub fn recurring(
        days: impl IntoIterator<Item = Weekday>,
        start_minute: u16,
        end_minute: u16,
    ) -> Self {
        Self {
            allowed_days: days.into_iter().collect(),
            start_minute,
            end_minute,
            recurring: true,
            ..Self::default()
        }
    }

    /// Returns true if the constraint places no restriction at all.
    pub fn is_empty(&self) -> bool {
        !self.recurring && self.start_time.is_none() && self.end_time.is_none()
    }

    /// Checks structural validity.
    ///
    /// # Errors
    ///
    /// Returns a description of the first violated rule: minute-of-day values
    /// above 1439, a recurring window with no allowed days or whose start is
    /// after its end, or an absolute window whose start is after its end.
    pub fn validate(&self) -> Result<(), String> {
        if self.start_minute > LAST_MINUTE_OF_DAY || self.end_minute > LAST_MINUTE_OF_DAY {
            return Err(format!(
                "minute-of-day range {}-{} exceeds {LAST_MINUTE_OF_DAY}",
                self.start_minute, self.end_minute
            ));
        }
        if self.recurring && self.allowed_days.is_empty() {
            return Err("recurring window has no allowed days".to_string());
        }
        if self.recurring && self.start_minute > self.end_minute {
            return Err(format!(
                "recurring window starts after it ends ({} > {})",
                self.start_minute, self.end_minute
            ));
        }
        if let (Some(start), Some(end)) = (self.start_time, self.end_time) {
            if start > end {
                return Err(format!("time window starts after it ends ({start} > {end})"));
            }
        }
        Ok(())
    }

    /// Evaluates the constraint at `now`.
    pub fn evaluate(&self, now: DateTime<Utc>) -> Outcome {
        if self.is_empty() {
            return Outcome::matched("no time restriction");
        }
        if self.recurring {
            self.evaluate_recurring(now)
        } else {
            self.evaluate_absolute(now)
        }
    }

    fn evaluate_absolute(&self, now: DateTime<Utc>) -> Outcome {
        if let Some(start) = self.start_time {
            if now < start {
                return Outcome::rejected(format!("window opens at {start}"));
            }
        }
        if let Some(end) = self.end_time {
            if now > end {
                return Outcome::rejected(format!("window closed at {end}"));
            }
        }
        Outcome::matched("within absolute time window")
    }

    fn evaluate_recurring(&self, now: DateTime<Utc>) -> Outcome {
        let day = now.weekday();
        if !self.allowed_days.contains(&day) {
            return Outcome::rejected(format!("{day} is not an allowed day"));
        }

        // hour() < 24 and minute() < 60, so this cannot overflow u16
        let minute = minute_of_day(now.hour() as u16, now.minute() as u16);
        if minute < self.start_minute || minute > self.end_minute {
            return Outcome::rejected(format!(
                "{} is outside {}-{}",
                format_minute(minute),
                format_minute(self.start_minute),
                format_minute(self.end_minute)
            ));
        }
        Outcome::matched(format!("{day} {} within recurring window", format_minute(minute)))
    }
}

fn format_minute(minute: u16) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}
