//! Cron expression parser and next-occurrence search.
//!
//! Grammar: "MIN HOUR DOM MON DOW", optionally "SEC MIN HOUR DOM MON DOW"
//! with a leading seconds field. Fields accept `*`, values, names
//! (JAN-DEC, SUN-SAT), ranges, lists, and steps (`*/N`, `A-B/N`, `A/N`).
//! Descriptors `@hourly`, `@daily`, `@midnight`, `@weekly`, `@monthly`,
//! `@yearly`, `@annually` expand to their 5-field forms.
//!
//! No cron crate dependency; the search steps minute by minute, bounded to
//! a little over a year, which is plenty for follow-up cadences.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc};

use salesloop_core::error::{Result, SalesloopError};

const MONTH_NAMES: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];
const DOW_NAMES: [&str; 7] = ["sun", "mon", "tue", "wed", "thu", "fri", "sat"];

// Minutes scanned before giving up: a leap year plus a day.
const SEARCH_LIMIT_MINUTES: i64 = 367 * 24 * 60;

/// A parsed cron expression, ready for next-occurrence queries.
#[derive(Debug, Clone)]
pub struct CronSchedule {
    seconds: Vec<u32>,
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
    dom_restricted: bool,
    dow_restricted: bool,
}

impl CronSchedule {
    pub fn parse(expression: &str) -> Result<Self> {
        let expression = expression.trim();
        let expanded = match expression.to_lowercase().as_str() {
            "@hourly" => "0 * * * *",
            "@daily" | "@midnight" => "0 0 * * *",
            "@weekly" => "0 0 * * 0",
            "@monthly" => "0 0 1 * *",
            "@yearly" | "@annually" => "0 0 1 1 *",
            _ => expression,
        };

        let parts: Vec<&str> = expanded.split_whitespace().collect();
        let (seconds, rest) = match parts.len() {
            5 => (vec![0], &parts[..]),
            6 => (parse_field(parts[0], 0, 59, &[])?, &parts[1..]),
            n => {
                return Err(SalesloopError::Validation(format!(
                    "cron expression '{expression}' has {n} fields, expected 5 or 6"
                )))
            }
        };

        let mut days_of_week = parse_field(rest[4], 0, 7, &DOW_NAMES)?;
        // Both 0 and 7 mean Sunday.
        for dow in days_of_week.iter_mut() {
            if *dow == 7 {
                *dow = 0;
            }
        }
        days_of_week.sort_unstable();
        days_of_week.dedup();

        Ok(Self {
            seconds,
            minutes: parse_field(rest[0], 0, 59, &[])?,
            hours: parse_field(rest[1], 0, 23, &[])?,
            days_of_month: parse_field(rest[2], 1, 31, &[])?,
            months: parse_field(rest[3], 1, 12, &MONTH_NAMES)?,
            days_of_week,
            dom_restricted: rest[2] != "*",
            dow_restricted: rest[4] != "*",
        })
    }

    /// Next matching instant strictly after `after`, or `None` when no
    /// occurrence exists within the search window (e.g. "0 0 30 2 *").
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut minute = after.with_second(0)?.with_nanosecond(0)?;
        for _ in 0..SEARCH_LIMIT_MINUTES {
            if self.months.contains(&minute.month())
                && self.day_matches(&minute)
                && self.hours.contains(&minute.hour())
                && self.minutes.contains(&minute.minute())
            {
                for &sec in &self.seconds {
                    let candidate = minute + Duration::seconds(i64::from(sec));
                    if candidate > after {
                        return Some(candidate);
                    }
                }
            }
            minute += Duration::minutes(1);
        }
        None
    }

    // Standard cron quirk: when both day fields are restricted, a day
    // matching either one counts.
    fn day_matches(&self, t: &DateTime<Utc>) -> bool {
        let dom_ok = self.days_of_month.contains(&t.day());
        let dow_ok = self
            .days_of_week
            .contains(&t.weekday().num_days_from_sunday());
        match (self.dom_restricted, self.dow_restricted) {
            (true, true) => dom_ok || dow_ok,
            (true, false) => dom_ok,
            (false, true) => dow_ok,
            (false, false) => true,
        }
    }
}

/// Parse one cron field into a sorted list of matching values.
fn parse_field(field: &str, min: u32, max: u32, names: &[&str]) -> Result<Vec<u32>> {
    let mut values = Vec::new();
    for term in field.split(',') {
        values.extend(parse_term(term.trim(), min, max, names)?);
    }
    if values.is_empty() {
        return Err(SalesloopError::Validation(format!(
            "cron field '{field}' matches nothing"
        )));
    }
    values.sort_unstable();
    values.dedup();
    Ok(values)
}

fn parse_term(term: &str, min: u32, max: u32, names: &[&str]) -> Result<Vec<u32>> {
    let invalid = || SalesloopError::Validation(format!("invalid cron term '{term}'"));

    let (base, step) = match term.split_once('/') {
        Some((base, step)) => {
            let step: u32 = step.parse().map_err(|_| invalid())?;
            if step == 0 {
                return Err(invalid());
            }
            (base, step)
        }
        None => (term, 1),
    };

    let (lo, hi) = if base == "*" {
        (min, max)
    } else if let Some((a, b)) = base.split_once('-') {
        (
            parse_value(a, min, max, names).ok_or_else(invalid)?,
            parse_value(b, min, max, names).ok_or_else(invalid)?,
        )
    } else {
        let v = parse_value(base, min, max, names).ok_or_else(invalid)?;
        // "N/step" runs from N to the top of the range.
        if term.contains('/') {
            (v, max)
        } else {
            (v, v)
        }
    };
    if lo > hi {
        return Err(invalid());
    }
    Ok((lo..=hi).step_by(step as usize).collect())
}

fn parse_value(s: &str, min: u32, max: u32, names: &[&str]) -> Option<u32> {
    let v = match s.parse::<u32>() {
        Ok(v) => v,
        Err(_) => {
            let lower = s.to_lowercase();
            let idx = names.iter().position(|n| *n == lower)?;
            min + idx as u32
        }
    };
    (v >= min && v <= max).then_some(v)
}
