//! Cron expression parsing and evaluation.
//!
//! Supports the classic five-field format `minute hour day month weekday` and a
//! six-field variant with a leading `second` field. All evaluation is in UTC.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use thiserror::Error;

/// How far ahead `next_after` searches before giving up.
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

const MONTH_NAMES: &[&str] = &[
    "JAN", "FEB", "MAR", "APR", "MAY", "JUN", "JUL", "AUG", "SEP", "OCT", "NOV", "DEC",
];
const WEEKDAY_NAMES: &[&str] = &["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

/// Errors produced while parsing a cron expression.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CronError {
    /// Wrong number of whitespace separated fields.
    #[error("cron expression must have 5 or 6 fields, got {count}: '{expression}'")]
    FieldCount {
        /// Number of fields found.
        count: usize,
        /// The offending expression.
        expression: String,
    },
    /// A single field could not be parsed.
    #[error("invalid {field} field '{value}': {reason}")]
    InvalidField {
        /// Field name (minute, hour, ...).
        field: &'static str,
        /// Raw field text.
        value: String,
        /// What is wrong with it.
        reason: String,
    },
}

/// Static description of one cron field.
struct FieldSpec {
    name: &'static str,
    min: u32,
    max: u32,
    names: &'static [&'static str],
    allow_question: bool,
}

const SECOND: FieldSpec = FieldSpec {
    name: "second",
    min: 0,
    max: 59,
    names: &[],
    allow_question: false,
};
const MINUTE: FieldSpec = FieldSpec {
    name: "minute",
    min: 0,
    max: 59,
    names: &[],
    allow_question: false,
};
const HOUR: FieldSpec = FieldSpec {
    name: "hour",
    min: 0,
    max: 23,
    names: &[],
    allow_question: false,
};
const DAY: FieldSpec = FieldSpec {
    name: "day",
    min: 1,
    max: 31,
    names: &[],
    allow_question: true,
};
const MONTH: FieldSpec = FieldSpec {
    name: "month",
    min: 1,
    max: 12,
    names: MONTH_NAMES,
    allow_question: false,
};
// 7 is accepted as an alias for Sunday and folded onto 0 after parsing.
const WEEKDAY: FieldSpec = FieldSpec {
    name: "weekday",
    min: 0,
    max: 7,
    names: WEEKDAY_NAMES,
    allow_question: true,
};

/// Set of allowed values for one field, stored as a bitmask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CronField {
    bits: u64,
    /// False for a bare `*` or `?`.
    restricted: bool,
}

impl CronField {
    const fn single(value: u32) -> Self {
        Self {
            bits: 1 << value,
            restricted: true,
        }
    }

    fn contains(self, value: u32) -> bool {
        value < 64 && self.bits & (1 << value) != 0
    }
}

/// A parsed cron expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpression {
    source: String,
    second: CronField,
    minute: CronField,
    hour: CronField,
    day: CronField,
    month: CronField,
    weekday: CronField,
}

/// Cron expression parser.
#[derive(Debug)]
pub struct CronParser;

impl CronParser {
    /// Parse a cron expression string.
    ///
    /// # Format
    ///
    /// `[second] minute hour day month weekday`
    ///
    /// Each field is a comma separated list of `*`, `n`, `n-m`, optionally
    /// followed by `/step`. Months and weekdays accept three letter names.
    ///
    /// # Examples
    ///
    /// - `0 0 * * *` - Daily at midnight
    /// - `*/5 * * * *` - Every 5 minutes
    /// - `0 9-17 * * MON-FRI` - Every hour 9am-5pm, Monday-Friday
    /// - `*/30 * * * * *` - Every 30 seconds
    pub fn parse(expr: &str) -> Result<CronExpression, CronError> {
        let parts: Vec<&str> = expr.split_whitespace().collect();
        let (second, rest) = match parts.len() {
            5 => (CronField::single(0), &parts[..]),
            6 => (parse_field(&SECOND, parts[0])?, &parts[1..]),
            count => {
                return Err(CronError::FieldCount {
                    count,
                    expression: expr.to_string(),
                });
            }
        };

        let mut weekday = parse_field(&WEEKDAY, rest[4])?;
        if weekday.contains(7) {
            weekday.bits = (weekday.bits & !(1 << 7)) | 1;
        }

        Ok(CronExpression {
            source: parts.join(" "),
            second,
            minute: parse_field(&MINUTE, rest[0])?,
            hour: parse_field(&HOUR, rest[1])?,
            day: parse_field(&DAY, rest[2])?,
            month: parse_field(&MONTH, rest[3])?,
            weekday,
        })
    }
}

fn parse_field(spec: &FieldSpec, text: &str) -> Result<CronField, CronError> {
    let invalid = |reason: String| CronError::InvalidField {
        field: spec.name,
        value: text.to_string(),
        reason,
    };

    let wildcard = text == "*" || (text == "?" && spec.allow_question);
    let mut bits = 0_u64;

    for item in text.split(',') {
        let (range, step) = match item.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|e| invalid(format!("bad step '{step}': {e}")))?;
                if step == 0 || step > spec.max {
                    return Err(invalid(format!("step must be 1-{}", spec.max)));
                }
                (range, Some(step))
            }
            None => (item, None),
        };

        let (start, end) = if range == "*" {
            (spec.min, spec.max)
        } else if range == "?" {
            if !spec.allow_question {
                return Err(invalid("'?' is only allowed in day fields".to_string()));
            }
            (spec.min, spec.max)
        } else if let Some((start, end)) = range.split_once('-') {
            let start = parse_value(spec, start).map_err(&invalid)?;
            let end = parse_value(spec, end).map_err(&invalid)?;
            if start > end {
                return Err(invalid(format!("range start {start} is after end {end}")));
            }
            (start, end)
        } else {
            let value = parse_value(spec, range).map_err(&invalid)?;
            // `n/step` runs from n to the end of the field.
            if step.is_some() {
                (value, spec.max)
            } else {
                (value, value)
            }
        };

        let step = step.unwrap_or(1);
        let mut value = start;
        while value <= end {
            bits |= 1 << value;
            value += step;
        }
    }

    Ok(CronField {
        bits,
        restricted: !wildcard,
    })
}

fn parse_value(spec: &FieldSpec, raw: &str) -> Result<u32, String> {
    let value = match raw.parse::<u32>() {
        Ok(value) => value,
        Err(_) => spec
            .names
            .iter()
            .position(|name| name.eq_ignore_ascii_case(raw))
            .and_then(|index| u32::try_from(index).ok())
            .map(|index| spec.min + index)
            .ok_or_else(|| format!("'{raw}' is not a number or known name"))?,
    };
    if value < spec.min || value > spec.max {
        return Err(format!("value {value} must be {}-{}", spec.min, spec.max));
    }
    Ok(value)
}

impl CronExpression {
    /// Check if the cron expression matches the given time (second resolution).
    pub fn matches(&self, time: &DateTime<Utc>) -> bool {
        self.second.contains(time.second())
            && self.minute.contains(time.minute())
            && self.hour.contains(time.hour())
            && self.month.contains(time.month())
            && self.day_matches(time)
    }

    /// Day-of-month and day-of-week are OR-ed when both are restricted.
    fn day_matches(&self, time: &DateTime<Utc>) -> bool {
        let by_day = self.day.contains(time.day());
        let by_weekday = self
            .weekday
            .contains(time.weekday().num_days_from_sunday());
        match (self.day.restricted, self.weekday.restricted) {
            (true, true) => by_day || by_weekday,
            (true, false) => by_day,
            (false, true) => by_weekday,
            (false, false) => true,
        }
    }

    /// Calculate the first fire time strictly after the given time.
    ///
    /// Returns `None` when nothing matches within five years (e.g. `0 0 30 2 *`).
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        let limit = *after + Duration::days(SEARCH_HORIZON_DAYS);
        let mut current = after.with_nanosecond(0)? + Duration::seconds(1);

        while current <= limit {
            if !self.month.contains(current.month()) {
                current = start_of_next_month(&current)?;
                continue;
            }
            if !self.day_matches(&current) {
                current = start_of_next_day(&current)?;
                continue;
            }
            if !self.hour.contains(current.hour()) {
                current = current.with_minute(0)?.with_second(0)? + Duration::hours(1);
                continue;
            }
            if !self.minute.contains(current.minute()) {
                current = current.with_second(0)? + Duration::minutes(1);
                continue;
            }
            if !self.second.contains(current.second()) {
                current += Duration::seconds(1);
                continue;
            }
            return Some(current);
        }
        None
    }

    /// The normalized source text.
    pub fn as_str(&self) -> &str {
        &self.source
    }
}

fn start_of_next_day(time: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    Some(time.date_naive().succ_opt()?.and_hms_opt(0, 0, 0)?.and_utc())
}

fn start_of_next_month(time: &DateTime<Utc>) -> Option<DateTime<Utc>> {
    let (year, month) = if time.month() == 12 {
        (time.year() + 1, 1)
    } else {
        (time.year(), time.month() + 1)
    };
    Some(
        NaiveDate::from_ymd_opt(year, month, 1)?
            .and_hms_opt(0, 0, 0)?
            .and_utc(),
    )
}

impl FromStr for CronExpression {
    type Err = CronError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CronParser::parse(s)
    }
}

impl fmt::Display for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}
