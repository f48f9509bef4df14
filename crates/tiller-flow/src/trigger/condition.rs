//! Condition filtering of schedule fires.
//!
//! A schedule may carry an ordered list of conditions that each candidate
//! fire must satisfy (AND semantics). Conditions see the candidate's window
//! injected under both the `schedule` and `trigger` variable keys.
//!
//! A condition returning `false` is normal and silently skips the fire; a
//! condition *failing to evaluate* (e.g. a variable rendering error) is
//! surfaced as an error so the trigger can emit a failed execution instead
//! of retrying every tick.

use chrono::{DateTime, Datelike, Utc};
use chrono_tz::Tz;
use serde_json::{Map, Value};
use std::sync::Arc;

use crate::context::{ConditionContext, RenderError};
use crate::trigger::cron::CronEvaluator;
use crate::trigger::window::{ScheduleOutput, ScheduleWindow};

/// Error raised when a condition cannot be evaluated.
#[derive(Debug, Clone, thiserror::Error)]
#[error("condition evaluation failed: {message}")]
pub struct ConditionError {
    /// Description of the evaluation failure.
    pub message: String,
}

impl ConditionError {
    /// Creates a new condition error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<RenderError> for ConditionError {
    fn from(err: RenderError) -> Self {
        Self::new(err.message)
    }
}

/// A condition constraining schedule fires.
///
/// Implementations read the candidate window from the context variables
/// (`schedule` / `trigger` keys) and decide whether the fire is accepted.
pub trait ScheduleCondition: Send + Sync + std::fmt::Debug {
    /// Evaluates the condition against the enriched context.
    ///
    /// # Errors
    ///
    /// Returns a [`ConditionError`] when the condition cannot be evaluated
    /// at all, as opposed to evaluating to `false`.
    fn is_valid(&self, ctx: &ConditionContext) -> std::result::Result<bool, ConditionError>;
}

/// Direction of a condition-constrained fire search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    /// Search later fires.
    Forward,
    /// Search earlier fires.
    Backward,
}

/// Applies a condition list to schedule fires.
#[derive(Debug, Clone, Copy)]
pub struct ConditionFilter<'a> {
    evaluator: &'a CronEvaluator,
    conditions: &'a [Arc<dyn ScheduleCondition>],
}

impl<'a> ConditionFilter<'a> {
    /// Creates a filter over the given evaluator and conditions.
    #[must_use]
    pub const fn new(
        evaluator: &'a CronEvaluator,
        conditions: &'a [Arc<dyn ScheduleCondition>],
    ) -> Self {
        Self {
            evaluator,
            conditions,
        }
    }

    /// Returns true if no conditions are configured.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// Evaluates the condition list against one window.
    ///
    /// # Errors
    ///
    /// Propagates the first [`ConditionError`].
    pub fn is_accepted(
        &self,
        ctx: &ConditionContext,
        output: &ScheduleOutput,
    ) -> std::result::Result<bool, ConditionError> {
        let enriched = with_schedule_variables(ctx, output);
        for condition in self.conditions {
            if !condition.is_valid(&enriched)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Finds the nearest accepted fire from `from` in the given direction.
    ///
    /// Candidates are visited fire by fire; the search gives up once the
    /// candidate year drifts ten years away from `now`.
    ///
    /// # Errors
    ///
    /// Propagates the first [`ConditionError`].
    pub fn find_accepted(
        &self,
        ctx: &ConditionContext,
        from: DateTime<Tz>,
        direction: SearchDirection,
        now: DateTime<Utc>,
    ) -> std::result::Result<Option<DateTime<Tz>>, ConditionError> {
        let window = ScheduleWindow::new(self.evaluator);
        let mut cursor = from;
        loop {
            let in_bounds = match direction {
                SearchDirection::Forward => cursor.year() < now.year() + 10,
                SearchDirection::Backward => cursor.year() > now.year() - 10,
            };
            if !in_bounds {
                return Ok(None);
            }

            let candidate = match direction {
                SearchDirection::Forward => self.evaluator.next_after(cursor),
                SearchDirection::Backward => self.evaluator.last_before(cursor),
            };
            let Some(candidate) = candidate else {
                return Ok(None);
            };
            let Some(output) = window.schedule_dates(candidate) else {
                return Ok(None);
            };

            if self.is_accepted(ctx, &output)? {
                return Ok(Some(candidate));
            }
            cursor = candidate;
        }
    }

    /// Re-projects a window so `next` and `previous` are condition-true.
    ///
    /// # Errors
    ///
    /// Propagates the first [`ConditionError`].
    pub fn accepted_window(
        &self,
        ctx: &ConditionContext,
        output: &ScheduleOutput,
        now: DateTime<Utc>,
    ) -> std::result::Result<ScheduleOutput, ConditionError> {
        Ok(ScheduleOutput {
            date: output.date,
            next: self.find_accepted(ctx, output.date, SearchDirection::Forward, now)?,
            previous: self.find_accepted(ctx, output.date, SearchDirection::Backward, now)?,
        })
    }
}

/// Injects a window into the context under the `schedule` and `trigger` keys.
///
/// Both keys carry the same variables; the duplication is part of the
/// trigger's public variable contract.
#[must_use]
pub(crate) fn with_schedule_variables(
    ctx: &ConditionContext,
    output: &ScheduleOutput,
) -> ConditionContext {
    let variables = output.to_variables();
    let mut extra = Map::new();
    extra.insert("schedule".to_string(), Value::Object(variables.clone()));
    extra.insert("trigger".to_string(), Value::Object(variables));
    ctx.with_variables(extra)
}
