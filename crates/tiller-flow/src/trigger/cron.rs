//! Cron expression parsing and fire-time evaluation.
//!
//! Expressions use the standard 5-field Unix grammar (minute, hour,
//! day-of-month, month, day-of-week), or 6 fields with a leading seconds
//! field when `with_seconds` is set. Nicknames (`@hourly`, `@daily`, ...)
//! are accepted. Day-of-week takes both `0` and `7` as Sunday and `1` as
//! Monday; the field is renumbered for the underlying parser, which counts
//! Sunday as 1.
//!
//! Evaluation is timezone-aware: fire times are produced in the spec's zone,
//! wall-clock times erased by a DST spring-forward are skipped, and all
//! results are truncated to whole seconds.

use std::collections::BTreeSet;
use std::str::FromStr;

use chrono::{DateTime, Duration, DurationRound, Utc};
use chrono_tz::Tz;
use cron::Schedule as CompiledCron;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest distance `last_before` will look into the past.
const BACKWARD_HORIZON_DAYS: i64 = 3660;

/// A cron trigger specification.
///
/// Immutable after construction; `compile` turns it into an evaluator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronSpec {
    /// The cron expression or nickname.
    pub expression: String,
    /// Whether the expression carries a leading seconds field.
    #[serde(default)]
    pub with_seconds: bool,
    /// Zone the expression is evaluated in.
    #[serde(default = "default_timezone")]
    pub timezone: Tz,
}

fn default_timezone() -> Tz {
    Tz::UTC
}

impl CronSpec {
    /// Creates a 5-field spec evaluated in UTC.
    #[must_use]
    pub fn new(expression: impl Into<String>) -> Self {
        Self {
            expression: expression.into(),
            with_seconds: false,
            timezone: Tz::UTC,
        }
    }

    /// Switches to the 6-field grammar with seconds precision.
    #[must_use]
    pub const fn with_seconds(mut self) -> Self {
        self.with_seconds = true;
        self
    }

    /// Sets the evaluation zone.
    #[must_use]
    pub const fn with_timezone(mut self, timezone: Tz) -> Self {
        self.timezone = timezone;
        self
    }

    /// Compiles the spec into an evaluator.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCronExpression`] when the expression does not
    /// parse under the chosen field arity.
    pub fn compile(&self) -> Result<CronEvaluator> {
        CronEvaluator::new(self)
    }
}

/// Computes next and previous fire times for a compiled cron spec.
#[derive(Debug, Clone)]
pub struct CronEvaluator {
    schedule: CompiledCron,
    timezone: Tz,
}

impl CronEvaluator {
    /// Compiles a spec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCronExpression`] when the expression does not
    /// parse under the chosen field arity.
    pub fn new(spec: &CronSpec) -> Result<Self> {
        let normalized = normalize(&spec.expression, spec.with_seconds)?;
        let schedule =
            CompiledCron::from_str(&normalized).map_err(|e| Error::InvalidCronExpression {
                expression: spec.expression.clone(),
                message: e.to_string(),
            })?;
        Ok(Self {
            schedule,
            timezone: spec.timezone,
        })
    }

    /// The zone fire times are produced in.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Projects an instant into the evaluation zone.
    #[must_use]
    pub fn in_zone(&self, instant: DateTime<Utc>) -> DateTime<Tz> {
        instant.with_timezone(&self.timezone)
    }

    /// The smallest fire instant strictly greater than `after`.
    ///
    /// Returns `None` only when the schedule is exhausted (the underlying
    /// iterator stops past its supported year range).
    #[must_use]
    pub fn next_after(&self, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
        self.schedule.after(&after).next().map(truncate_seconds)
    }

    /// The greatest fire instant strictly less than `before`.
    ///
    /// The underlying iterator only moves forward, so this walks back in
    /// widening windows and forward-scans each one; sparse schedules cost a
    /// few extra scans, dense ones resolve in the first window. Gives up
    /// past a ten-year lookbehind.
    #[must_use]
    pub fn last_before(&self, before: DateTime<Tz>) -> Option<DateTime<Tz>> {
        let horizon = Duration::days(BACKWARD_HORIZON_DAYS);
        let mut window = Duration::hours(1);
        loop {
            let start = before - window;
            let mut found = None;
            for fire in self.schedule.after(&start) {
                if fire >= before {
                    break;
                }
                found = Some(fire);
            }
            if let Some(fire) = found {
                return Some(truncate_seconds(fire));
            }
            if window >= horizon {
                return None;
            }
            window = std::cmp::min(window * 32, horizon);
        }
    }
}

fn truncate_seconds(datetime: DateTime<Tz>) -> DateTime<Tz> {
    datetime
        .duration_trunc(Duration::seconds(1))
        .unwrap_or(datetime)
}

/// Rewrites an expression into the 6-field form the parser accepts.
fn normalize(expression: &str, with_seconds: bool) -> Result<String> {
    let trimmed = expression.trim();
    let (expanded, had_seconds) = match trimmed.strip_prefix('@') {
        Some(nickname) => (expand_nickname(expression, nickname)?, false),
        None => (trimmed.to_string(), with_seconds),
    };

    let mut fields: Vec<String> = expanded.split_whitespace().map(str::to_string).collect();
    let expected = if had_seconds { 6 } else { 5 };
    if fields.len() != expected {
        return Err(Error::InvalidCronExpression {
            expression: expression.to_string(),
            message: format!("expected {expected} fields, found {}", fields.len()),
        });
    }

    let last = fields.len() - 1;
    let day_of_week =
        normalize_day_of_week(&fields[last]).map_err(|message| Error::InvalidCronExpression {
            expression: expression.to_string(),
            message,
        })?;
    fields[last] = day_of_week;

    if !had_seconds {
        fields.insert(0, "0".to_string());
    }
    Ok(fields.join(" "))
}

fn expand_nickname(expression: &str, nickname: &str) -> Result<String> {
    let expanded = match nickname.to_ascii_lowercase().as_str() {
        "yearly" | "annually" => "0 0 1 1 *",
        "monthly" => "0 0 1 * *",
        "weekly" => "0 0 * * 0",
        "daily" | "midnight" => "0 0 * * *",
        "hourly" => "0 * * * *",
        _ => {
            return Err(Error::InvalidCronExpression {
                expression: expression.to_string(),
                message: format!("unknown nickname '@{nickname}'"),
            })
        }
    };
    Ok(expanded.to_string())
}

/// Renumbers a Unix day-of-week field (0/7 = Sunday) for the parser
/// (1 = Sunday). Named days pass through untouched.
fn normalize_day_of_week(field: &str) -> std::result::Result<String, String> {
    field
        .split(',')
        .map(normalize_day_of_week_part)
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(|parts| parts.join(","))
}

fn normalize_day_of_week_part(part: &str) -> std::result::Result<String, String> {
    let (base, step) = match part.split_once('/') {
        Some((base, step)) => {
            let step: u8 = step
                .parse()
                .map_err(|_| format!("invalid day-of-week step '{step}'"))?;
            if step == 0 {
                return Err("day-of-week step must be positive".to_string());
            }
            (base, Some(step))
        }
        None => (part, None),
    };

    // Named days and wildcards keep the parser's own semantics.
    if base == "*" || base.chars().any(|c| c.is_ascii_alphabetic()) {
        return Ok(part.to_string());
    }

    if let Some((lo, hi)) = base.split_once('-') {
        let lo = parse_day_of_week(lo)?;
        let hi = parse_day_of_week(hi)?;
        if lo > hi {
            return Err(format!("inverted day-of-week range '{base}'"));
        }
        let step = usize::from(step.unwrap_or(1));
        let mapped: BTreeSet<u8> = (lo..=hi).step_by(step).map(map_day_of_week).collect();
        return Ok(mapped
            .into_iter()
            .map(|d| d.to_string())
            .collect::<Vec<_>>()
            .join(","));
    }

    if step.is_some() {
        return Err(format!(
            "day-of-week step requires a range or wildcard, got '{part}'"
        ));
    }
    parse_day_of_week(base).map(|d| map_day_of_week(d).to_string())
}

fn parse_day_of_week(value: &str) -> std::result::Result<u8, String> {
    let parsed: u8 = value
        .parse()
        .map_err(|_| format!("invalid day-of-week value '{value}'"))?;
    if parsed > 7 {
        return Err(format!("day-of-week value out of range 0-7: '{value}'"));
    }
    Ok(parsed)
}

const fn map_day_of_week(unix: u8) -> u8 {
    (unix % 7) + 1
}
