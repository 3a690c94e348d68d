//! Lightweight cron expression evaluator.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds), evaluated in UTC.
//! Field syntax: `*`, `N`, `A-B`, `*/S`, `A-B/S`, `N/S`, comma lists,
//! month names (`jan`..`dec`) and weekday names (`sun`..`sat`, `7` = Sunday).
//! Example: "0 8 * * *" = every day at 8:00
//!
//! Pure: no I/O, no clock reads. Callers pass the reference instant.

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use courier_core::error::{CourierError, Result};

/// Never-firing expressions (e.g. "0 0 30 2 *") give up after this many days.
/// Eight years covers Feb 29 across a skipped leap year.
const SEARCH_HORIZON_DAYS: i64 = 366 * 8;

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const WEEKDAY_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

/// A parsed 5-field cron expression. Each field is a bitmask of allowed values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronSchedule {
    minutes: u64,
    hours: u64,
    days_of_month: u64,
    months: u64,
    days_of_week: u64,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    /// Parse a 5-field expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(invalid(
                expression,
                "need 5 fields: MIN HOUR DOM MON DOW",
            ));
        }

        let minutes = parse_field(parts[0], 0, 59, &[], 0).map_err(|e| invalid(expression, &e))?;
        let hours = parse_field(parts[1], 0, 23, &[], 0).map_err(|e| invalid(expression, &e))?;
        let days_of_month =
            parse_field(parts[2], 1, 31, &[], 0).map_err(|e| invalid(expression, &e))?;
        let months =
            parse_field(parts[3], 1, 12, &MONTH_NAMES, 1).map_err(|e| invalid(expression, &e))?;
        let mut days_of_week =
            parse_field(parts[4], 0, 7, &WEEKDAY_NAMES, 0).map_err(|e| invalid(expression, &e))?;

        // 7 is an alias for Sunday
        if days_of_week & (1 << 7) != 0 {
            days_of_week = (days_of_week & !(1 << 7)) | 1;
        }

        Ok(Self {
            minutes,
            hours,
            days_of_month,
            months,
            days_of_week,
            dom_restricted: !parts[2].starts_with('*'),
            dow_restricted: !parts[4].starts_with('*'),
        })
    }

    /// Whether `t` (at minute resolution) matches the schedule.
    pub fn matches(&self, t: DateTime<Utc>) -> bool {
        has(self.minutes, t.minute())
            && has(self.hours, t.hour())
            && has(self.months, t.month())
            && self.day_matches(t.date_naive())
    }

    /// First minute-aligned instant strictly after `after` that matches.
    /// `None` when nothing matches within the search horizon.
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let truncated = after
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(after);
        let mut candidate = truncated + Duration::minutes(1);
        let horizon = candidate + Duration::days(SEARCH_HORIZON_DAYS);

        while candidate < horizon {
            let date = candidate.date_naive();

            if !has(self.months, candidate.month()) {
                candidate = start_of_day(first_of_next_month(date)?)?;
                continue;
            }
            if !self.day_matches(date) {
                candidate = start_of_day(date.succ_opt()?)?;
                continue;
            }
            if !has(self.hours, candidate.hour()) {
                let hour_start = candidate.with_minute(0)?;
                candidate = hour_start + Duration::hours(1);
                continue;
            }
            if !has(self.minutes, candidate.minute()) {
                candidate += Duration::minutes(1);
                continue;
            }
            return Some(candidate);
        }

        None
    }

    /// Vixie semantics: when both day fields are restricted, either may match.
    fn day_matches(&self, date: NaiveDate) -> bool {
        let dom = has(self.days_of_month, date.day());
        let dow = has(self.days_of_week, date.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom || dow,
            (true, false) => dom,
            (false, true) => dow,
            (false, false) => true,
        }
    }
}

/// Compute the next run strictly after `after` for a cron expression.
pub fn next_run(expression: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let schedule = CronSchedule::parse(expression)?;
    schedule
        .next_after(after)
        .ok_or_else(|| invalid(expression, "expression never fires"))
}

fn invalid(expression: &str, reason: &str) -> CourierError {
    CourierError::Validation(format!("invalid cron expression '{expression}': {reason}"))
}

fn has(mask: u64, value: u32) -> bool {
    mask & (1u64 << value) != 0
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|n| Utc.from_utc_datetime(&n))
}

fn first_of_next_month(date: NaiveDate) -> Option<NaiveDate> {
    if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
}

/// Parse a cron field into a bitmask of matching values.
/// `names[i]` stands for the value `i + name_offset`.
fn parse_field(
    field: &str,
    min: u32,
    max: u32,
    names: &[&str],
    name_offset: u32,
) -> std::result::Result<u64, String> {
    let mut mask = 0u64;

    for part in field.split(',') {
        if part.is_empty() {
            return Err(format!("empty list element in '{field}'"));
        }

        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| format!("invalid step '{step}'"))?;
                if step == 0 {
                    return Err("step must be positive".into());
                }
                (range, Some(step))
            }
            None => (part, None),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            (
                parse_value(a, names, name_offset)?,
                parse_value(b, names, name_offset)?,
            )
        } else {
            let v = parse_value(range, names, name_offset)?;
            // "N/S" means "from N to the end, every S"
            if step.is_some() { (v, max) } else { (v, v) }
        };

        if lo < min || hi > max {
            return Err(format!("value out of range {min}-{max} in '{part}'"));
        }
        if lo > hi {
            return Err(format!("descending range '{part}'"));
        }

        for v in (lo..=hi).step_by(step.unwrap_or(1) as usize) {
            mask |= 1u64 << v;
        }
    }

    Ok(mask)
}

fn parse_value(token: &str, names: &[&str], name_offset: u32) -> std::result::Result<u32, String> {
    if let Ok(n) = token.parse::<u32>() {
        return Ok(n);
    }
    let lower = token.to_ascii_lowercase();
    names
        .iter()
        .position(|name| *name == lower)
        .map(|i| i as u32 + name_offset)
        .ok_or_else(|| format!("invalid value '{token}'"))
}
