//! Schedule windows: the `(date, next, previous)` triple around a fire.

use chrono::{DateTime, Datelike, Duration, Utc};
use chrono_tz::Tz;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::trigger::cron::CronEvaluator;

/// The window computed for one schedule firing.
///
/// All values are timezone-aware, truncated to whole seconds, and satisfy
/// `previous < date <= next` whenever all three are present. Windows are
/// ephemeral: computed per evaluation and exposed to executions as trigger
/// variables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduleOutput {
    /// The fire this window was computed for.
    pub date: DateTime<Tz>,
    /// The fire after `date`, when the schedule is not exhausted.
    pub next: Option<DateTime<Tz>>,
    /// The fire before `date`'s cursor, when one exists.
    pub previous: Option<DateTime<Tz>>,
}

impl ScheduleOutput {
    /// Renders the window as trigger variables (RFC 3339 strings).
    #[must_use]
    pub fn to_variables(&self) -> Map<String, Value> {
        let mut variables = Map::new();
        variables.insert("date".to_string(), Value::String(self.date.to_rfc3339()));
        if let Some(next) = self.next {
            variables.insert("next".to_string(), Value::String(next.to_rfc3339()));
        }
        if let Some(previous) = self.previous {
            variables.insert(
                "previous".to_string(),
                Value::String(previous.to_rfc3339()),
            );
        }
        variables
    }
}

/// Computes schedule windows for a compiled cron evaluator.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleWindow<'a> {
    evaluator: &'a CronEvaluator,
}

impl<'a> ScheduleWindow<'a> {
    /// Creates a window calculator over the given evaluator.
    #[must_use]
    pub const fn new(evaluator: &'a CronEvaluator) -> Self {
        Self { evaluator }
    }

    /// Computes the window for the fire at-or-after `cursor`.
    ///
    /// The fire itself is found by evaluating one second before the cursor,
    /// so a cursor that sits exactly on a fire reproduces that fire.
    #[must_use]
    pub fn schedule_dates(&self, cursor: DateTime<Tz>) -> Option<ScheduleOutput> {
        let date = self.evaluator.next_after(cursor - Duration::seconds(1))?;
        let next = self.evaluator.next_after(date);
        let previous = self.evaluator.last_before(cursor);
        Some(ScheduleOutput {
            date,
            next,
            previous,
        })
    }

    /// Skips windows whose fire is older than `now - late_max`.
    ///
    /// Walks the schedule forward window by window; each step strictly
    /// advances, and the walk gives up once it drifts ten years past `now`.
    #[must_use]
    pub fn apply_late_delay(
        &self,
        output: ScheduleOutput,
        late_max: Duration,
        now: DateTime<Utc>,
    ) -> Option<ScheduleOutput> {
        let now = self.evaluator.in_zone(now);
        let mut output = output;
        while output.date.year() < now.year() + 10 {
            if output.date + late_max < now {
                output = self.schedule_dates(output.next?)?;
            } else {
                return Some(output);
            }
        }
        None
    }
}
