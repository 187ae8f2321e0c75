//! Calendar-period arithmetic
//!
//! Month, quarter, and year buckets are uneven: their boundaries come from
//! the calendar, not from a fixed millisecond length. The four operations
//! here are mutually consistent:
//! `periods_between(s, plus_periods(s, n)) == n` for any period-aligned `s`
//! and `n >= 0`, and `start_of_period(t) <= t < end_of_period(t)` for any
//! `t`.

use chrono::{DateTime, Datelike, Months, TimeZone, Timelike};
use serde::Serialize;

/// A calendar period used by uneven time groupings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarPeriod {
    /// One calendar month
    Month,
    /// Three calendar months, aligned to Jan/Apr/Jul/Oct
    Quarter,
    /// One calendar year
    Year,
}

impl CalendarPeriod {
    /// Length of one period in whole months
    pub fn months(&self) -> u32 {
        match self {
            Self::Month => 1,
            Self::Quarter => 3,
            Self::Year => 12,
        }
    }

    /// First instant of the period containing `t`
    pub fn start_of_period<Tz: TimeZone>(&self, t: DateTime<Tz>) -> DateTime<Tz> {
        let month0 = match self {
            Self::Month => t.month0(),
            Self::Quarter => (t.month0() / 3) * 3,
            Self::Year => 0,
        };
        t.clone()
            .with_day(1)
            .and_then(|d| d.with_month0(month0))
            .and_then(|d| d.with_hour(0))
            .and_then(|d| d.with_minute(0))
            .and_then(|d| d.with_second(0))
            .and_then(|d| d.with_nanosecond(0))
            .unwrap_or(t)
    }

    /// First instant of the period after the one containing `t`
    pub fn end_of_period<Tz: TimeZone>(&self, t: DateTime<Tz>) -> DateTime<Tz> {
        self.plus_periods(self.start_of_period(t), 1)
    }

    /// Advance a period-aligned instant by `n` periods (negative moves back)
    pub fn plus_periods<Tz: TimeZone>(&self, start: DateTime<Tz>, n: i64) -> DateTime<Tz> {
        let months = self.months() as i64 * n;
        if months >= 0 {
            start + Months::new(months as u32)
        } else {
            start - Months::new((-months) as u32)
        }
    }

    /// Whole periods between two period-aligned instants
    pub fn periods_between<Tz: TimeZone>(
        &self,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
    ) -> i64 {
        let months = (end.year() as i64 - start.year() as i64) * 12
            + (end.month() as i64 - start.month() as i64);
        months / self.months() as i64
    }
}

impl std::fmt::Display for CalendarPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Month => write!(f, "month"),
            Self::Quarter => write!(f, "quarter"),
            Self::Year => write!(f, "year"),
        }
    }
}
