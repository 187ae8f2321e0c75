//! Time-point and time-range resolution
//!
//! Turns a parsed time expression into an absolute instant in the query time
//! zone. Resolution tries, in order: relative words ("yesterday"), date-time
//! literals, quoted strings (literal, then period, then word), period
//! expressions against the injected clock, and bare Unix timestamps.
//!
//! The word table matches by prefix with deliberately uneven rules:
//! "yesterday" accepts any non-empty prefix, "ago" must match exactly,
//! "today"/"tomorrow" need at least three characters unless legacy mode is
//! on. This asymmetry is a compatibility surface and is pinned by tests;
//! do not regularize it.

use crate::context::CompileContext;
use crate::error::{CompileError, CompileResult};
use crate::time::units::TimeUnit;
use chrono::{DateTime, Duration, FixedOffset, Months, NaiveDate, NaiveDateTime, TimeZone, Timelike};

/// A time-point expression, as produced by the surface parser
#[derive(Debug, Clone, PartialEq)]
pub enum TimeExpr {
    /// A bare word token ("yesterday", "ago", ...)
    Word(String),
    /// An unquoted date or date-time literal token
    DateTimeToken(String),
    /// A quoted string, interpretation decided here
    Quoted(String),
    /// A nested time-period expression ("3d", "1w 2d")
    Period(String),
    /// A bare integer: Unix seconds if it fits in i32, else milliseconds
    Unix(i64),
}

/// Resolve a time-point expression to an absolute instant
pub fn resolve_time(
    expr: &TimeExpr,
    ctx: &CompileContext<'_>,
) -> CompileResult<DateTime<FixedOffset>> {
    match expr {
        TimeExpr::Word(word) => word_date(word, ctx)
            .ok_or_else(|| CompileError::InvalidDateTime(word.clone())),
        TimeExpr::DateTimeToken(text) => parse_datetime_literal(text, ctx.tz),
        TimeExpr::Quoted(text) => resolve_quoted(text, ctx),
        TimeExpr::Period(text) => {
            let terms = ctx.period_parser.parse_period(text)?;
            period_before_now(&terms, ctx)
        }
        TimeExpr::Unix(n) => resolve_unix(*n, ctx.tz),
    }
}

/// Resolve a (start, end) pair and validate that end is strictly after start
pub fn resolve_range(
    start: &TimeExpr,
    end: &TimeExpr,
    ctx: &CompileContext<'_>,
) -> CompileResult<(DateTime<FixedOffset>, DateTime<FixedOffset>)> {
    let start = resolve_time(start, ctx)?;
    let end = resolve_time(end, ctx)?;
    if end <= start {
        return Err(CompileError::InvalidTimeRange(format!(
            "end {end} is not after start {start}"
        )));
    }
    Ok((start, end))
}

/// Truncate an instant to the start of its day
pub fn start_of_day(t: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    t.with_hour(0)
        .and_then(|d| d.with_minute(0))
        .and_then(|d| d.with_second(0))
        .and_then(|d| d.with_nanosecond(0))
        .unwrap_or(t)
}

/// The relative-word table
///
/// Matching is case-insensitive and by prefix, with the historical quirks
/// noted in the module docs preserved exactly.
fn word_date(word: &str, ctx: &CompileContext<'_>) -> Option<DateTime<FixedOffset>> {
    let w = word.to_ascii_lowercase();
    if w.is_empty() {
        return None;
    }
    let today = start_of_day(ctx.now());

    if "yesterday".starts_with(&w) {
        return Some(today - Duration::days(1));
    }
    if w == "ago" || ("today".starts_with(&w) && (ctx.legacy || w.len() >= 3)) {
        return Some(today);
    }
    if "tomorrow".starts_with(&w) && w.len() >= 3 {
        return Some(today + Duration::days(1));
    }
    None
}

/// Quoted strings: literal first, then period expression, then word table
fn resolve_quoted(
    text: &str,
    ctx: &CompileContext<'_>,
) -> CompileResult<DateTime<FixedOffset>> {
    if let Ok(dt) = parse_datetime_literal(text, ctx.tz) {
        return Ok(dt);
    }
    if let Ok(terms) = ctx.period_parser.parse_period(text) {
        return period_before_now(&terms, ctx);
    }
    word_date(text, ctx).ok_or_else(|| CompileError::InvalidDateTime(text.to_string()))
}

/// Parse an ISO-ish date or date-time literal
///
/// Accepts RFC 3339 (with offset), naive date-times with either 'T' or a
/// space as separator, and bare dates at midnight.
fn parse_datetime_literal(
    text: &str,
    tz: FixedOffset,
) -> CompileResult<DateTime<FixedOffset>> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(dt.with_timezone(&tz));
    }

    const NAIVE_FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ];
    for format in NAIVE_FORMATS {
        if let Ok(ndt) = NaiveDateTime::parse_from_str(text, format) {
            return in_zone(ndt, tz, text);
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        if let Some(ndt) = date.and_hms_opt(0, 0, 0) {
            return in_zone(ndt, tz, text);
        }
    }

    Err(CompileError::InvalidDateTime(text.to_string()))
}

fn in_zone(
    ndt: NaiveDateTime,
    tz: FixedOffset,
    literal: &str,
) -> CompileResult<DateTime<FixedOffset>> {
    tz.from_local_datetime(&ndt)
        .single()
        .ok_or_else(|| CompileError::InvalidDateTime(literal.to_string()))
}

/// Resolve a period expression as an instant that much before now
///
/// Anchored at the start of today when every unit is a day or coarser, so
/// that "1w" means a day boundary a week back rather than an arbitrary
/// intra-day instant.
fn period_before_now(
    terms: &[(i64, TimeUnit)],
    ctx: &CompileContext<'_>,
) -> CompileResult<DateTime<FixedOffset>> {
    let anchor = if terms.iter().all(|(_, unit)| unit.is_day_or_coarser()) {
        start_of_day(ctx.now())
    } else {
        ctx.now()
    };

    let mut t = anchor;
    for &(coeff, unit) in terms {
        t = match unit {
            TimeUnit::Month => {
                let months = u32::try_from(coeff)
                    .map_err(|_| period_out_of_range(coeff, unit))?;
                t.checked_sub_months(Months::new(months))
                    .ok_or_else(|| period_out_of_range(coeff, unit))?
            }
            TimeUnit::Year => {
                let months = u32::try_from(coeff)
                    .ok()
                    .and_then(|c| c.checked_mul(12))
                    .ok_or_else(|| period_out_of_range(coeff, unit))?;
                t.checked_sub_months(Months::new(months))
                    .ok_or_else(|| period_out_of_range(coeff, unit))?
            }
            TimeUnit::Buckets => {
                return Err(CompileError::InvalidTimePeriod(
                    "bucket counts are not valid in a time point".to_string(),
                ))
            }
            _ => {
                // Checked: every other unit has a fixed length
                let unit_millis = unit.millis().unwrap_or(0);
                let millis = coeff
                    .checked_mul(unit_millis)
                    .ok_or_else(|| period_out_of_range(coeff, unit))?;
                t.checked_sub_signed(Duration::milliseconds(millis))
                    .ok_or_else(|| period_out_of_range(coeff, unit))?
            }
        };
    }
    Ok(t)
}

fn period_out_of_range(coeff: i64, unit: TimeUnit) -> CompileError {
    CompileError::InvalidTimePeriod(format!("{coeff}{unit} is out of range"))
}

/// Bare integers: seconds when within the 32-bit signed range, else millis
fn resolve_unix(n: i64, tz: FixedOffset) -> CompileResult<DateTime<FixedOffset>> {
    let millis = if (i32::MIN as i64..=i32::MAX as i64).contains(&n) {
        n * 1000
    } else {
        n
    };
    DateTime::from_timestamp_millis(millis)
        .map(|dt| dt.with_timezone(&tz))
        .ok_or_else(|| CompileError::InvalidDateTime(n.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{FixedClock, TracingWarnings};
    use crate::time::units::DefaultPeriodParser;
    use chrono::Utc;

    // Clock fixed at 2024-03-15T10:00:00Z
    const NOW_MILLIS: i64 = 1_710_496_800_000;

    fn utc() -> FixedOffset {
        FixedOffset::east_opt(0).unwrap()
    }

    fn ctx(clock: &FixedClock) -> CompileContext<'_> {
        CompileContext::new(clock, &TracingWarnings, &DefaultPeriodParser, utc())
    }

    fn millis(dt: &DateTime<FixedOffset>) -> i64 {
        dt.timestamp_millis()
    }

    fn expect_utc(y: i32, mo: u32, d: u32, h: u32) -> i64 {
        Utc.with_ymd_and_hms(y, mo, d, h, 0, 0).unwrap().timestamp_millis()
    }

    #[test]
    fn test_yesterday_resolves_to_start_of_yesterday() {
        let clock = FixedClock(NOW_MILLIS);
        let t = resolve_time(&TimeExpr::Word("yesterday".to_string()), &ctx(&clock)).unwrap();
        assert_eq!(millis(&t), expect_utc(2024, 3, 14, 0));
    }

    #[test]
    fn test_yesterday_matches_any_prefix() {
        let clock = FixedClock(NOW_MILLIS);
        let c = ctx(&clock);
        for prefix in ["y", "ye", "yester", "YESTERDAY"] {
            let t = resolve_time(&TimeExpr::Word(prefix.to_string()), &c).unwrap();
            assert_eq!(millis(&t), expect_utc(2024, 3, 14, 0), "prefix {prefix}");
        }
    }

    #[test]
    fn test_today_needs_three_chars_outside_legacy() {
        let clock = FixedClock(NOW_MILLIS);
        let c = ctx(&clock);
        // "to" (length 2) must not match "today" outside legacy mode
        assert!(resolve_time(&TimeExpr::Word("to".to_string()), &c).is_err());
        let t = resolve_time(&TimeExpr::Word("tod".to_string()), &c).unwrap();
        assert_eq!(millis(&t), expect_utc(2024, 3, 15, 0));
    }

    #[test]
    fn test_today_legacy_matches_short_prefix() {
        let clock = FixedClock(NOW_MILLIS);
        let c = ctx(&clock).legacy(true);
        let t = resolve_time(&TimeExpr::Word("to".to_string()), &c).unwrap();
        assert_eq!(millis(&t), expect_utc(2024, 3, 15, 0));
    }

    #[test]
    fn test_ago_exact_only() {
        let clock = FixedClock(NOW_MILLIS);
        let c = ctx(&clock);
        let t = resolve_time(&TimeExpr::Word("ago".to_string()), &c).unwrap();
        assert_eq!(millis(&t), expect_utc(2024, 3, 15, 0));
        assert!(resolve_time(&TimeExpr::Word("ag".to_string()), &c).is_err());
    }

    #[test]
    fn test_tomorrow_prefix() {
        let clock = FixedClock(NOW_MILLIS);
        let c = ctx(&clock);
        let t = resolve_time(&TimeExpr::Word("tom".to_string()), &c).unwrap();
        assert_eq!(millis(&t), expect_utc(2024, 3, 16, 0));
    }

    #[test]
    fn test_datetime_token() {
        let clock = FixedClock(NOW_MILLIS);
        let t = resolve_time(
            &TimeExpr::DateTimeToken("2024-01-02T03:04:05".to_string()),
            &ctx(&clock),
        )
        .unwrap();
        assert_eq!(
            millis(&t),
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap().timestamp_millis()
        );
    }

    #[test]
    fn test_quoted_with_space_separator() {
        let clock = FixedClock(NOW_MILLIS);
        let t = resolve_time(
            &TimeExpr::Quoted("2024-01-02 03:04:05".to_string()),
            &ctx(&clock),
        )
        .unwrap();
        assert_eq!(
            millis(&t),
            Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap().timestamp_millis()
        );
    }

    #[test]
    fn test_quoted_date_only() {
        let clock = FixedClock(NOW_MILLIS);
        let t = resolve_time(&TimeExpr::Quoted("2024-01-02".to_string()), &ctx(&clock)).unwrap();
        assert_eq!(millis(&t), expect_utc(2024, 1, 2, 0));
    }

    #[test]
    fn test_quoted_falls_back_to_period() {
        let clock = FixedClock(NOW_MILLIS);
        let t = resolve_time(&TimeExpr::Quoted("1d".to_string()), &ctx(&clock)).unwrap();
        // Day-granular period anchors at start of today
        assert_eq!(millis(&t), expect_utc(2024, 3, 14, 0));
    }

    #[test]
    fn test_quoted_falls_back_to_word() {
        let clock = FixedClock(NOW_MILLIS);
        let t = resolve_time(&TimeExpr::Quoted("yesterday".to_string()), &ctx(&clock)).unwrap();
        assert_eq!(millis(&t), expect_utc(2024, 3, 14, 0));
    }

    #[test]
    fn test_quoted_garbage_is_error() {
        let clock = FixedClock(NOW_MILLIS);
        assert!(matches!(
            resolve_time(&TimeExpr::Quoted("not a time".to_string()), &ctx(&clock)),
            Err(CompileError::InvalidDateTime(_))
        ));
    }

    #[test]
    fn test_period_with_hours_anchors_at_now() {
        let clock = FixedClock(NOW_MILLIS);
        let t = resolve_time(&TimeExpr::Period("2h".to_string()), &ctx(&clock)).unwrap();
        assert_eq!(millis(&t), NOW_MILLIS - 2 * 3_600_000);
    }

    #[test]
    fn test_period_months_use_calendar() {
        let clock = FixedClock(NOW_MILLIS);
        let t = resolve_time(&TimeExpr::Period("1mo".to_string()), &ctx(&clock)).unwrap();
        assert_eq!(millis(&t), expect_utc(2024, 2, 15, 0));
    }

    #[test]
    fn test_unix_seconds_vs_millis() {
        let clock = FixedClock(NOW_MILLIS);
        let c = ctx(&clock);
        // Fits in i32: seconds
        let t = resolve_time(&TimeExpr::Unix(1_700_000_000), &c).unwrap();
        assert_eq!(millis(&t), 1_700_000_000_000);
        // Too big for i32: already milliseconds
        let t = resolve_time(&TimeExpr::Unix(1_700_000_000_000), &c).unwrap();
        assert_eq!(millis(&t), 1_700_000_000_000);
    }

    #[test]
    fn test_oversized_period_coefficients_are_rejected() {
        let clock = FixedClock(NOW_MILLIS);
        let c = ctx(&clock);
        // Each of these would overflow somewhere in the arithmetic
        for expr in ["400000000y", "4294967297mo", "9223372036854775807h"] {
            assert!(
                matches!(
                    resolve_time(&TimeExpr::Period(expr.to_string()), &c),
                    Err(CompileError::InvalidTimePeriod(_))
                ),
                "period {expr}"
            );
        }
    }

    #[test]
    fn test_range_end_must_follow_start() {
        let clock = FixedClock(NOW_MILLIS);
        let c = ctx(&clock);
        let a = TimeExpr::Quoted("2024-01-01".to_string());
        let b = TimeExpr::Quoted("2024-02-01".to_string());

        let (start, end) = resolve_range(&a, &b, &c).unwrap();
        assert!(start < end);

        assert!(matches!(
            resolve_range(&b, &a, &c),
            Err(CompileError::InvalidTimeRange(_))
        ));
        assert!(matches!(
            resolve_range(&a, &a, &c),
            Err(CompileError::InvalidTimeRange(_))
        ));
    }
}
