//! Time units and period parsing
//!
//! A time period like `"1d 6h"` is a list of (coefficient, unit) terms. The
//! sub-parser that produces such lists is a collaborator the rest of the
//! compiler only sees through the [`PeriodParser`] trait; the regex-backed
//! [`DefaultPeriodParser`] is the stock implementation.

use crate::error::{CompileError, CompileResult};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

pub(crate) const MILLIS_PER_SECOND: i64 = 1000;
pub(crate) const MILLIS_PER_MINUTE: i64 = 60 * MILLIS_PER_SECOND;
pub(crate) const MILLIS_PER_HOUR: i64 = 60 * MILLIS_PER_MINUTE;
pub(crate) const MILLIS_PER_DAY: i64 = 24 * MILLIS_PER_HOUR;
pub(crate) const MILLIS_PER_WEEK: i64 = 7 * MILLIS_PER_DAY;

/// A unit in a time-period expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    /// Seconds
    Second,
    /// Minutes
    Minute,
    /// Hours
    Hour,
    /// Days
    Day,
    /// Weeks
    Week,
    /// Calendar months (uneven; never summed as milliseconds)
    Month,
    /// Years (365 days when summed as milliseconds)
    Year,
    /// Not a duration: an explicit bucket count
    Buckets,
}

impl TimeUnit {
    /// Fixed length in milliseconds, or `None` for Month and Buckets
    pub fn millis(&self) -> Option<i64> {
        match self {
            Self::Second => Some(MILLIS_PER_SECOND),
            Self::Minute => Some(MILLIS_PER_MINUTE),
            Self::Hour => Some(MILLIS_PER_HOUR),
            Self::Day => Some(MILLIS_PER_DAY),
            Self::Week => Some(MILLIS_PER_WEEK),
            Self::Month => None,
            Self::Year => Some(365 * MILLIS_PER_DAY),
            Self::Buckets => None,
        }
    }

    /// Whether this unit is a whole day or coarser
    ///
    /// Periods made only of such units anchor at the start of today, so that
    /// "1w" lands on a day boundary the way users expect.
    pub fn is_day_or_coarser(&self) -> bool {
        matches!(self, Self::Day | Self::Week | Self::Month | Self::Year)
    }
}

impl std::fmt::Display for TimeUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Second => write!(f, "s"),
            Self::Minute => write!(f, "m"),
            Self::Hour => write!(f, "h"),
            Self::Day => write!(f, "d"),
            Self::Week => write!(f, "w"),
            Self::Month => write!(f, "mo"),
            Self::Year => write!(f, "y"),
            Self::Buckets => write!(f, "b"),
        }
    }
}

/// Parses a time-period expression into (coefficient, unit) terms
pub trait PeriodParser {
    /// Parse `text`, or signal a syntax error
    fn parse_period(&self, text: &str) -> CompileResult<Vec<(i64, TimeUnit)>>;
}

/// Stock period parser: whitespace-separated `<number><unit>` terms
///
/// Units: `s m h d w mo y b` (case-insensitive; `mo` is months, `m` minutes).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultPeriodParser;

fn term_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)([0-9]+)\s*(mo|y|w|d|h|m|s|b)\s*").expect("static period regex")
    })
}

impl PeriodParser for DefaultPeriodParser {
    fn parse_period(&self, text: &str) -> CompileResult<Vec<(i64, TimeUnit)>> {
        let mut rest = text.trim();
        let mut terms = Vec::new();

        while !rest.is_empty() {
            let caps = term_regex()
                .captures(rest)
                .ok_or_else(|| CompileError::InvalidTimePeriod(text.to_string()))?;
            let coeff: i64 = caps[1]
                .parse()
                .map_err(|_| CompileError::InvalidTimePeriod(text.to_string()))?;
            let unit = match caps[2].to_ascii_lowercase().as_str() {
                "s" => TimeUnit::Second,
                "m" => TimeUnit::Minute,
                "h" => TimeUnit::Hour,
                "d" => TimeUnit::Day,
                "w" => TimeUnit::Week,
                "mo" => TimeUnit::Month,
                "y" => TimeUnit::Year,
                "b" => TimeUnit::Buckets,
                _ => return Err(CompileError::InvalidTimePeriod(text.to_string())),
            };
            terms.push((coeff, unit));
            rest = &rest[caps.get(0).map(|m| m.end()).unwrap_or(rest.len())..];
        }

        if terms.is_empty() {
            return Err(CompileError::InvalidTimePeriod(text.to_string()));
        }
        Ok(terms)
    }
}

/// Bucket sizes tried for inferred time groupings, finest first
const BUCKET_LADDER: &[i64] = &[
    MILLIS_PER_SECOND,
    MILLIS_PER_MINUTE,
    5 * MILLIS_PER_MINUTE,
    15 * MILLIS_PER_MINUTE,
    MILLIS_PER_HOUR,
    6 * MILLIS_PER_HOUR,
    MILLIS_PER_DAY,
    MILLIS_PER_WEEK,
];

/// Maximum bucket count an inferred grouping may produce
const MAX_INFERRED_BUCKETS: i64 = 120;

/// Infer a bucket size (in milliseconds) for a time grouping with no
/// explicit period
///
/// `relative` groupings bucket each dataset against its own start, so the
/// longest single-dataset span governs; absolute groupings cover the whole
/// `[earliest, latest)` window. Picks the finest ladder size yielding at
/// most [`MAX_INFERRED_BUCKETS`] buckets, falling back to weeks.
pub fn infer_bucket_millis(
    earliest_start: i64,
    latest_end: i64,
    longest_span: i64,
    relative: bool,
) -> i64 {
    let span = if relative {
        longest_span
    } else {
        latest_end - earliest_start
    };
    let span = span.max(1);

    for &size in BUCKET_LADDER {
        if span <= size * MAX_INFERRED_BUCKETS {
            return size;
        }
    }
    MILLIS_PER_WEEK
}
