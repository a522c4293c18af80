//! 5-field cron expression evaluator.
//!
//! Fields are minute, hour, day-of-month, month, day-of-week (0 = Sunday).
//! Each field accepts `*`, `*/n`, `a-b`, and comma lists of singletons or
//! ranges. All five constraints must hold for an instant to match.

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use tracing::warn;

use crate::error::{Result, SchedulerError};

/// Search limit for [`CronExpr::next_after`]. An expression with no match
/// inside four years is treated as exhausted.
const HORIZON_DAYS: i64 = 4 * 365;

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: FieldSet,
    hour: FieldSet,
    day: FieldSet,
    month: FieldSet,
    weekday: FieldSet,
}

/// Allowed values for one field, stored as a bitmask (max value is 59).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FieldSet(u64);

impl FieldSet {
    fn contains(&self, value: u32) -> bool {
        value < 64 && self.0 & (1 << value) != 0
    }
}

impl CronExpr {
    /// Parse a 5-field expression like `*/15 9-17 * * 1-5`.
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(expr, "expected 5 fields"));
        }
        Ok(Self {
            minute: parse_field(expr, fields[0], 0, 59)?,
            hour: parse_field(expr, fields[1], 0, 23)?,
            day: parse_field(expr, fields[2], 1, 31)?,
            month: parse_field(expr, fields[3], 1, 12)?,
            weekday: parse_field(expr, fields[4], 0, 6)?,
        })
    }

    fn matches(&self, t: DateTime<Utc>) -> bool {
        self.matches_day(t)
            && self.hour.contains(t.hour())
            && self.minute.contains(t.minute())
    }

    fn matches_day(&self, t: DateTime<Utc>) -> bool {
        self.month.contains(t.month())
            && self.day.contains(t.day())
            && self.weekday.contains(t.weekday().num_days_from_sunday())
    }

    /// Smallest instant strictly after `after` whose fields all match,
    /// searching forward minute by minute with day-granular skips. Falls
    /// back to `after + 24h` past the horizon — a safety valve, not a
    /// state valid expressions reach.
    pub fn next_after(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        let horizon = after + Duration::days(HORIZON_DAYS);

        // Truncate to the minute, then step strictly forward.
        let mut t = Utc
            .with_ymd_and_hms(
                after.year(),
                after.month(),
                after.day(),
                after.hour(),
                after.minute(),
                0,
            )
            .single()
            .unwrap_or(after)
            + Duration::minutes(1);

        while t <= horizon {
            if !self.matches_day(t) {
                // Skip to midnight of the next day.
                t = Utc
                    .with_ymd_and_hms(t.year(), t.month(), t.day(), 0, 0, 0)
                    .single()
                    .unwrap_or(t)
                    + Duration::days(1);
                continue;
            }
            if !self.hour.contains(t.hour()) {
                t = Utc
                    .with_ymd_and_hms(t.year(), t.month(), t.day(), t.hour(), 0, 0)
                    .single()
                    .unwrap_or(t)
                    + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(t.minute()) {
                t += Duration::minutes(1);
                continue;
            }
            debug_assert!(self.matches(t));
            return t;
        }

        warn!("cron search exhausted its horizon, falling back to +24h");
        after + Duration::hours(24)
    }
}

fn parse_field(expr: &str, field: &str, min: u32, max: u32) -> Result<FieldSet> {
    let mut mask: u64 = 0;

    for part in field.split(',') {
        if part.is_empty() {
            return Err(invalid(expr, "empty list item"));
        }

        if part == "*" {
            for v in min..=max {
                mask |= 1 << v;
            }
        } else if let Some(step) = part.strip_prefix("*/") {
            let n: u32 = step
                .parse()
                .map_err(|_| invalid(expr, "step is not a number"))?;
            if n == 0 {
                return Err(invalid(expr, "step must be positive"));
            }
            let mut v = min;
            while v <= max {
                mask |= 1 << v;
                v += n;
            }
        } else if let Some((a, b)) = part.split_once('-') {
            let a: u32 = a.parse().map_err(|_| invalid(expr, "bad range start"))?;
            let b: u32 = b.parse().map_err(|_| invalid(expr, "bad range end"))?;
            if a < min || b > max || a > b {
                return Err(invalid(expr, "range out of bounds"));
            }
            for v in a..=b {
                mask |= 1 << v;
            }
        } else {
            let v: u32 = part.parse().map_err(|_| invalid(expr, "bad value"))?;
            if v < min || v > max {
                return Err(invalid(expr, "value out of bounds"));
            }
            mask |= 1 << v;
        }
    }

    Ok(FieldSet(mask))
}

fn invalid(expr: &str, reason: &str) -> SchedulerError {
    SchedulerError::InvalidCron {
        expr: expr.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).single().unwrap()
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert!(CronExpr::parse("* * * *").is_err());
        assert!(CronExpr::parse("* * * * * *").is_err());
    }

    #[test]
    fn rejects_out_of_range_values() {
        assert!(CronExpr::parse("60 * * * *").is_err());
        assert!(CronExpr::parse("* 24 * * *").is_err());
        assert!(CronExpr::parse("* * 0 * *").is_err());
        assert!(CronExpr::parse("* * * 13 *").is_err());
        assert!(CronExpr::parse("* * * * 7").is_err());
        assert!(CronExpr::parse("* * * * */0").is_err());
    }

    #[test]
    fn every_minute_advances_one_minute() {
        let expr = CronExpr::parse("* * * * *").unwrap();
        let next = expr.next_after(at(2026, 3, 1, 10, 30));
        assert_eq!(next, at(2026, 3, 1, 10, 31));
    }

    #[test]
    fn next_is_strictly_after_even_on_exact_match() {
        let expr = CronExpr::parse("30 10 * * *").unwrap();
        let next = expr.next_after(at(2026, 3, 1, 10, 30));
        assert_eq!(next, at(2026, 3, 2, 10, 30));
    }

    #[test]
    fn step_field() {
        let expr = CronExpr::parse("*/15 * * * *").unwrap();
        assert_eq!(expr.next_after(at(2026, 3, 1, 10, 0)), at(2026, 3, 1, 10, 15));
        assert_eq!(expr.next_after(at(2026, 3, 1, 10, 50)), at(2026, 3, 1, 11, 0));
    }

    #[test]
    fn range_and_list() {
        let expr = CronExpr::parse("0 9-17 * * 1-5").unwrap();
        // Friday 2026-03-06 18:00 → next is Monday 09:00.
        assert_eq!(expr.next_after(at(2026, 3, 6, 18, 0)), at(2026, 3, 9, 9, 0));

        let expr = CronExpr::parse("0,30 12 * * *").unwrap();
        assert_eq!(expr.next_after(at(2026, 3, 1, 12, 0)), at(2026, 3, 1, 12, 30));
        assert_eq!(expr.next_after(at(2026, 3, 1, 12, 30)), at(2026, 3, 2, 12, 0));
    }

    #[test]
    fn list_of_ranges() {
        let expr = CronExpr::parse("0 8-9,20-21 * * *").unwrap();
        assert_eq!(expr.next_after(at(2026, 3, 1, 10, 0)), at(2026, 3, 1, 20, 0));
    }

    #[test]
    fn month_rollover() {
        let expr = CronExpr::parse("0 0 1 * *").unwrap();
        assert_eq!(expr.next_after(at(2026, 3, 15, 10, 0)), at(2026, 4, 1, 0, 0));
    }

    #[test]
    fn specific_month_and_day() {
        let expr = CronExpr::parse("0 12 25 12 *").unwrap();
        assert_eq!(expr.next_after(at(2026, 1, 1, 0, 0)), at(2026, 12, 25, 12, 0));
    }

    #[test]
    fn weekday_constraint() {
        // Sundays only (0 = Sunday). 2026-03-01 is a Sunday.
        let expr = CronExpr::parse("0 6 * * 0").unwrap();
        assert_eq!(expr.next_after(at(2026, 3, 1, 7, 0)), at(2026, 3, 8, 6, 0));
    }

    #[test]
    fn impossible_expression_falls_back_to_24h() {
        // February 30th never exists.
        let expr = CronExpr::parse("0 0 30 2 *").unwrap();
        let after = at(2026, 3, 1, 0, 0);
        assert_eq!(expr.next_after(after), after + Duration::hours(24));
    }
}
