//! Calendar/period helpers used by the settlement engine.
//!
//! All functions are pure: "today" is always passed in by the caller, never
//! read from a wall clock.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ValidationError;

/// A calendar month key, rendered as `YYYY-MM`.
///
/// Used as the guard value for monthly idempotent operations
/// (settlement, streak month rollover).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthKey {
    /// Calendar year.
    pub year: i32,
    /// Calendar month, 1..=12.
    pub month: u32,
}

impl MonthKey {
    /// The month key for a given date.
    pub fn of(date: NaiveDate) -> Self {
        Self {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Whole months elapsed since `earlier`. Negative when `earlier` is later.
    pub fn months_since(&self, earlier: MonthKey) -> i32 {
        (self.year - earlier.year) * 12 + self.month as i32 - earlier.month as i32
    }
}

impl fmt::Display for MonthKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for MonthKey {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ValidationError::InvalidMonthKey(s.to_string());
        let (y, m) = s.split_once('-').ok_or_else(bad)?;
        let year: i32 = y.parse().map_err(|_| bad())?;
        let month: u32 = m.parse().map_err(|_| bad())?;
        if !(1..=12).contains(&month) {
            return Err(bad());
        }
        Ok(Self { year, month })
    }
}

impl Serialize for MonthKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MonthKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// `YYYY-MM-DD` key for a date.
pub fn day_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `YYYY-MM` key for a date.
pub fn month_key(date: NaiveDate) -> MonthKey {
    MonthKey::of(date)
}

/// Floor of the calendar-day difference `b - a`.
pub fn days_between(a: NaiveDate, b: NaiveDate) -> i64 {
    (b - a).num_days()
}

/// Whole calendar months between `a` and `b` ((year, month) difference).
pub fn months_between(a: NaiveDate, b: NaiveDate) -> i32 {
    MonthKey::of(b).months_since(MonthKey::of(a))
}

/// True on the first day of any month.
pub fn is_first_of_month(date: NaiveDate) -> bool {
    date.day() == 1
}

/// True on or after day-of-month `n`.
pub fn is_on_or_after_day(date: NaiveDate, n: u32) -> bool {
    date.day() >= n
}
