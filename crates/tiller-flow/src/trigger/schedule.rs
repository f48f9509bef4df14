//! The cron schedule trigger.
//!
//! `Schedule` combines the cron evaluator, the window calculator, and the
//! condition filter into the trigger the scheduler loop drives:
//!
//! 1. `next_evaluation_date` tells the loop when to consider firing,
//!    anchored on the last fire, an active backfill cursor, or the clock
//! 2. `evaluate` turns a due tick into an `Execution` seed, or skips it
//!
//! A single logical scheduler owns each `(tenant, flow, trigger)` and calls
//! `evaluate` with non-decreasing dates; leadership is assumed external.
//! Condition *failures* (as opposed to conditions returning false) emit a
//! FAILED execution seed so a broken trigger does not retry every tick.

use chrono::{DateTime, Duration, Utc};
use chrono_tz::Tz;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{error, trace, warn};

use tiller_core::{ExecutionId, Label};

use crate::context::{ConditionContext, RenderError};
use crate::error::{Error, Result};
use crate::execution::{Execution, ExecutionTrigger};
use crate::metrics::{labels as metric_labels, names as metric_names, TimingGuard};
use crate::state::{State, StateHistory};
use crate::trigger::backfill::Backfill;
use crate::trigger::condition::{ConditionFilter, ScheduleCondition, SearchDirection};
use crate::trigger::cron::{CronEvaluator, CronSpec};
use crate::trigger::window::ScheduleWindow;

/// Trigger type recorded on executions created by a schedule.
pub const SCHEDULE_TRIGGER_TYPE: &str = "schedule";

/// Catch-up policy applied when the scheduler recovers missed fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecoverMissedSchedules {
    /// Fire each missed occurrence, in order.
    #[default]
    All,
    /// Fire only the most recent missed occurrence.
    Last,
    /// Fire nothing; the cursor resets to now.
    None,
}

/// Read-only snapshot of a trigger's persisted state, passed to each
/// evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerContext {
    /// Owning tenant, if the deployment is multi-tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Namespace of the triggered flow.
    pub namespace: String,
    /// Identifier of the triggered flow.
    pub flow_id: String,
    /// Identifier of the trigger inside the flow.
    pub trigger_id: String,
    /// Date of the last fire, or the date the scheduler decided to fire at.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    /// Active backfill, if one is in progress.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backfill: Option<Backfill>,
}

impl TriggerContext {
    /// Creates a trigger context.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        flow_id: impl Into<String>,
        trigger_id: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: None,
            namespace: namespace.into(),
            flow_id: flow_id.into(),
            trigger_id: trigger_id.into(),
            date: None,
            backfill: None,
        }
    }

    /// Sets the owning tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the evaluation date.
    #[must_use]
    pub const fn with_date(mut self, date: DateTime<Utc>) -> Self {
        self.date = Some(date);
        self
    }

    /// Sets the active backfill.
    #[must_use]
    pub fn with_backfill(mut self, backfill: Backfill) -> Self {
        self.backfill = Some(backfill);
        self
    }
}

/// A rule that creates executions.
///
/// The capability set every trigger kind exposes to the scheduler loop;
/// [`Schedule`] is the cron implementation.
pub trait Trigger: Send + Sync + std::fmt::Debug {
    /// Identifier of the trigger inside its flow.
    fn id(&self) -> &str;

    /// Conditions constraining this trigger's fires.
    fn conditions(&self) -> &[Arc<dyn ScheduleCondition>];

    /// The next wall-clock at which the scheduler should consider firing.
    fn next_evaluation_date(
        &self,
        ctx: &ConditionContext,
        last: Option<&TriggerContext>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Tz>>;

    /// Turns a due tick into an execution seed, or skips it.
    fn evaluate(
        &self,
        ctx: &ConditionContext,
        trigger_ctx: &TriggerContext,
        now: DateTime<Utc>,
    ) -> Option<Execution>;
}

/// Serializable configuration surface of a schedule trigger.
///
/// Conditions are attached separately (they come from plugin discovery, not
/// from configuration files).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleConfig {
    /// The cron expression or nickname.
    pub cron: String,
    /// Whether the expression carries a leading seconds field.
    #[serde(default)]
    pub with_seconds: bool,
    /// Evaluation zone (IANA id); defaults to UTC.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    /// Inputs passed to the triggered flow (values renderable).
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// Labels stamped on triggered executions (values renderable).
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Fires older than `now - lateMaximumDelay` are skipped.
    #[serde(default, with = "humantime_serde", skip_serializing_if = "Option::is_none")]
    pub late_maximum_delay: Option<std::time::Duration>,
    /// Catch-up policy for missed fires.
    #[serde(default)]
    pub recover_missed_schedules: RecoverMissedSchedules,
    /// The surrounding scheduler disables the trigger after observing one of
    /// these terminal states; the core only carries the configuration.
    #[serde(default)]
    pub stop_after: Vec<State>,
}

impl ScheduleConfig {
    /// Creates a configuration with defaults around a cron expression.
    #[must_use]
    pub fn new(cron: impl Into<String>) -> Self {
        Self {
            cron: cron.into(),
            with_seconds: false,
            timezone: None,
            inputs: Map::new(),
            labels: Vec::new(),
            late_maximum_delay: None,
            recover_missed_schedules: RecoverMissedSchedules::default(),
            stop_after: Vec::new(),
        }
    }

    /// Builds the schedule trigger, compiling the cron expression.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTimezone`] or [`Error::InvalidCronExpression`]
    /// when the configuration is rejected.
    pub fn build(&self, id: impl Into<String>) -> Result<Schedule> {
        let timezone = match &self.timezone {
            Some(tz) => tz.parse().map_err(|_| Error::InvalidTimezone {
                timezone: tz.clone(),
            })?,
            None => Tz::UTC,
        };
        let mut spec = CronSpec::new(self.cron.clone()).with_timezone(timezone);
        if self.with_seconds {
            spec = spec.with_seconds();
        }

        let mut schedule = Schedule::new(id, spec)?
            .with_inputs(self.inputs.clone())
            .with_labels(self.labels.clone())
            .with_recover_missed_schedules(self.recover_missed_schedules)
            .with_stop_after(self.stop_after.clone());
        if let Some(delay) = self.late_maximum_delay {
            schedule = schedule
                .with_late_maximum_delay(Duration::from_std(delay).unwrap_or(Duration::MAX));
        }
        Ok(schedule)
    }
}

/// Cron schedule trigger.
#[derive(Debug)]
pub struct Schedule {
    id: String,
    spec: CronSpec,
    evaluator: CronEvaluator,
    conditions: Vec<Arc<dyn ScheduleCondition>>,
    inputs: Map<String, Value>,
    labels: Vec<Label>,
    late_maximum_delay: Option<Duration>,
    recover_missed_schedules: RecoverMissedSchedules,
    stop_after: Vec<State>,
}

impl Schedule {
    /// Creates a schedule trigger, compiling the cron spec.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidCronExpression`] when the spec does not
    /// compile.
    pub fn new(id: impl Into<String>, spec: CronSpec) -> Result<Self> {
        let evaluator = spec.compile()?;
        Ok(Self {
            id: id.into(),
            spec,
            evaluator,
            conditions: Vec::new(),
            inputs: Map::new(),
            labels: Vec::new(),
            late_maximum_delay: None,
            recover_missed_schedules: RecoverMissedSchedules::default(),
            stop_after: Vec::new(),
        })
    }

    /// Attaches the ordered condition list.
    #[must_use]
    pub fn with_conditions(mut self, conditions: Vec<Arc<dyn ScheduleCondition>>) -> Self {
        self.conditions = conditions;
        self
    }

    /// Sets the inputs passed to the triggered flow.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Sets the labels stamped on triggered executions.
    #[must_use]
    pub fn with_labels(mut self, labels: Vec<Label>) -> Self {
        self.labels = labels;
        self
    }

    /// Sets the maximum accepted lateness of a fire.
    #[must_use]
    pub const fn with_late_maximum_delay(mut self, delay: Duration) -> Self {
        self.late_maximum_delay = Some(delay);
        self
    }

    /// Sets the catch-up policy.
    #[must_use]
    pub const fn with_recover_missed_schedules(mut self, policy: RecoverMissedSchedules) -> Self {
        self.recover_missed_schedules = policy;
        self
    }

    /// Sets the stop-after states carried for the surrounding scheduler.
    #[must_use]
    pub fn with_stop_after(mut self, stop_after: Vec<State>) -> Self {
        self.stop_after = stop_after;
        self
    }

    /// The cron spec this trigger was built from.
    #[must_use]
    pub const fn spec(&self) -> &CronSpec {
        &self.spec
    }

    /// The zone fires are produced in.
    #[must_use]
    pub const fn timezone(&self) -> Tz {
        self.evaluator.timezone()
    }

    /// The configured catch-up policy.
    #[must_use]
    pub const fn recover_missed_schedules(&self) -> RecoverMissedSchedules {
        self.recover_missed_schedules
    }

    /// Terminal states after which the surrounding scheduler disables this
    /// trigger.
    #[must_use]
    pub fn stop_after(&self) -> &[State] {
        &self.stop_after
    }

    /// The next wall-clock at which the scheduler should consider firing.
    ///
    /// Anchors on the backfill cursor when one is active, else on the last
    /// fire date, else on `now`. Conditions are honored through a forward
    /// search; when they cannot be evaluated the raw cron fire is used and a
    /// warning logged. Outside backfills, the late-delay skip applies.
    #[must_use]
    pub fn next_evaluation_date(
        &self,
        ctx: &ConditionContext,
        last: Option<&TriggerContext>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Tz>> {
        let anchored = last.filter(|tc| tc.backfill.is_some() || tc.date.is_some());
        let backfill = anchored.and_then(|tc| tc.backfill.as_ref());

        let mut next = match anchored {
            Some(tc) => {
                let anchor = match backfill {
                    Some(bf) => self.evaluator.in_zone(bf.current_date),
                    None => self.evaluator.in_zone(tc.date?),
                };
                self.next_from_anchor(ctx, anchor, now)?
            }
            None => self.evaluator.next_after(self.evaluator.in_zone(now))?,
        };

        // A backfill whose next fire escapes its range re-anchors on live time.
        if let Some(bf) = backfill {
            if next > self.evaluator.in_zone(bf.end) {
                next = self.evaluator.next_after(self.evaluator.in_zone(now))?;
            }
        }

        if backfill.is_none() {
            if let Some(late_max) = self.late_maximum_delay {
                let window = ScheduleWindow::new(&self.evaluator);
                let output = window.schedule_dates(next)?;
                next = window.apply_late_delay(output, late_max, now)?.date;
            }
        }

        Some(next)
    }

    /// The most recent fire that would have been accepted before `now`.
    #[must_use]
    pub fn previous_evaluation_date(
        &self,
        ctx: &ConditionContext,
        now: DateTime<Utc>,
    ) -> DateTime<Tz> {
        let filter = self.filter();
        if !filter.is_empty() {
            match filter.find_accepted(
                ctx,
                self.evaluator.in_zone(now),
                SearchDirection::Backward,
                now,
            ) {
                Ok(Some(date)) => return date,
                Ok(None) => {}
                Err(err) => warn!(
                    trigger_id = %self.id,
                    error = %err,
                    "unable to evaluate conditions for the previous evaluation date, conditions will not be evaluated"
                ),
            }
        }
        self.evaluator
            .last_before(self.evaluator.in_zone(now))
            .unwrap_or_else(|| self.evaluator.in_zone(now))
    }

    /// Materializes the catch-up fires between `last` and `now` under the
    /// configured recovery policy.
    ///
    /// `All` yields each missed occurrence in order, `Last` only the most
    /// recent one, `None` nothing (the caller resets its cursor to now).
    #[must_use]
    pub fn recover_missed_fires(
        &self,
        last: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Vec<DateTime<Tz>> {
        let now = self.evaluator.in_zone(now);
        let mut fires = Vec::new();
        let mut cursor = self.evaluator.in_zone(last);
        while let Some(next) = self.evaluator.next_after(cursor) {
            if next > now {
                break;
            }
            fires.push(next);
            cursor = next;
        }

        match self.recover_missed_schedules {
            RecoverMissedSchedules::All => fires,
            RecoverMissedSchedules::Last => fires.last().map(|d| vec![*d]).unwrap_or_default(),
            RecoverMissedSchedules::None => Vec::new(),
        }
    }

    /// Turns a due tick into an execution seed.
    ///
    /// Returns `None` when there is nothing to run (paused backfill, fire in
    /// the future, conditions false, schedule exhausted). Returns a FAILED
    /// seed when conditions or variables cannot be evaluated, so the trigger
    /// is not retried every tick.
    #[must_use]
    pub fn evaluate(
        &self,
        ctx: &ConditionContext,
        trigger_ctx: &TriggerContext,
        now: DateTime<Utc>,
    ) -> Option<Execution> {
        let _timer = TimingGuard::new(|duration| {
            histogram!(metric_names::TRIGGER_EVALUATE_SECONDS).record(duration.as_secs_f64());
        });

        let backfill = trigger_ctx.backfill.as_ref();
        if backfill.is_some_and(|bf| bf.paused) {
            record_evaluation("skipped");
            return None;
        }

        let anchor = match backfill {
            Some(bf) => bf.current_date,
            None => match trigger_ctx.date {
                Some(date) => date,
                None => {
                    record_evaluation("skipped");
                    return None;
                }
            },
        };

        let window = ScheduleWindow::new(&self.evaluator);
        let Some(mut output) = window.schedule_dates(self.evaluator.in_zone(anchor)) else {
            record_evaluation("skipped");
            return None;
        };

        // Unreachable when the scheduler ticks with non-decreasing dates.
        if output.date > self.evaluator.in_zone(now) + Duration::seconds(1) {
            trace!(
                trigger_id = %self.id,
                date = %output.date,
                "schedule fire is in the future, skipping"
            );
            record_evaluation("skipped");
            return None;
        }

        let filter = self.filter();
        if !filter.is_empty() {
            match filter.is_accepted(ctx, &output) {
                Ok(true) => {}
                Ok(false) => {
                    record_evaluation("skipped");
                    return None;
                }
                Err(err) => return Some(self.failed_execution(ctx, trigger_ctx, &err)),
            }
            match filter.accepted_window(ctx, &output, now) {
                Ok(projected) => output = projected,
                Err(err) => return Some(self.failed_execution(ctx, trigger_ctx, &err)),
            }
        }

        let execution_id = ExecutionId::generate();
        let labels = match self.generate_labels(ctx, backfill, execution_id, false) {
            Ok(labels) => labels,
            Err(err) => return Some(self.failed_execution(ctx, trigger_ctx, &err)),
        };
        let inputs = match self.generate_inputs(ctx, backfill) {
            Ok(inputs) => inputs,
            Err(err) => return Some(self.failed_execution(ctx, trigger_ctx, &err)),
        };

        let execution =
            self.scheduled_execution(ctx, trigger_ctx, execution_id, labels, inputs, &output);
        record_evaluation("triggered");
        Some(execution)
    }

    fn filter(&self) -> ConditionFilter<'_> {
        ConditionFilter::new(&self.evaluator, &self.conditions)
    }

    fn next_from_anchor(
        &self,
        ctx: &ConditionContext,
        anchor: DateTime<Tz>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Tz>> {
        let filter = self.filter();
        if !filter.is_empty() {
            match filter.find_accepted(ctx, anchor, SearchDirection::Forward, now) {
                Ok(Some(date)) => return Some(date),
                Ok(None) => {}
                Err(err) => warn!(
                    trigger_id = %self.id,
                    error = %err,
                    "unable to evaluate conditions for the next evaluation date, conditions will not be evaluated"
                ),
            }
        }
        self.evaluator.next_after(anchor)
    }

    /// Builds the execution seed for an accepted fire.
    ///
    /// The window is exposed under both the `schedule` and `trigger`
    /// variable keys; the duplication is part of the public contract.
    fn scheduled_execution(
        &self,
        ctx: &ConditionContext,
        trigger_ctx: &TriggerContext,
        execution_id: ExecutionId,
        labels: Vec<Label>,
        inputs: Map<String, Value>,
        output: &crate::trigger::window::ScheduleOutput,
    ) -> Execution {
        let variables = output.to_variables();
        let mut trigger_variables = Map::new();
        trigger_variables.insert("schedule".to_string(), Value::Object(variables.clone()));
        trigger_variables.insert("trigger".to_string(), Value::Object(variables));

        Execution {
            id: execution_id,
            tenant_id: trigger_ctx.tenant_id.clone(),
            namespace: trigger_ctx.namespace.clone(),
            flow_id: trigger_ctx.flow_id.clone(),
            flow_revision: ctx.flow.revision,
            labels,
            inputs,
            trigger: Some(
                ExecutionTrigger::new(self.id.clone(), SCHEDULE_TRIGGER_TYPE)
                    .with_variables(trigger_variables),
            ),
            schedule_date: Some(output.date.with_timezone(&Utc)),
            state: StateHistory::new(),
            task_runs: Vec::new(),
        }
    }

    /// Builds the FAILED seed emitted when the trigger cannot be evaluated.
    fn failed_execution(
        &self,
        ctx: &ConditionContext,
        trigger_ctx: &TriggerContext,
        cause: &dyn std::fmt::Display,
    ) -> Execution {
        error!(
            trigger_id = %self.id,
            error = %cause,
            "unable to evaluate the schedule trigger"
        );
        record_evaluation("failed");

        let execution_id = ExecutionId::generate();
        let labels = self
            .generate_labels(ctx, trigger_ctx.backfill.as_ref(), execution_id, true)
            .unwrap_or_default();
        let state = StateHistory::new()
            .with_state(State::Failed)
            .unwrap_or_else(|_| StateHistory::starting_in(State::Failed));

        Execution {
            id: execution_id,
            tenant_id: trigger_ctx.tenant_id.clone(),
            namespace: trigger_ctx.namespace.clone(),
            flow_id: trigger_ctx.flow_id.clone(),
            flow_revision: ctx.flow.revision,
            labels,
            inputs: Map::new(),
            trigger: None,
            schedule_date: None,
            state,
            task_runs: Vec::new(),
        }
    }

    /// Assembles execution labels: system labels from the flow, the
    /// correlation id (inherited or minted from the execution id), rendered
    /// backfill labels, then trigger labels. Duplicates are kept; consumers
    /// resolve them last-wins.
    fn generate_labels(
        &self,
        ctx: &ConditionContext,
        backfill: Option<&Backfill>,
        execution_id: ExecutionId,
        lenient: bool,
    ) -> std::result::Result<Vec<Label>, RenderError> {
        let mut labels: Vec<Label> = ctx.flow.system_labels().cloned().collect();
        if !labels.iter().any(Label::is_correlation_id) {
            labels.push(Label::correlation_id(execution_id.to_string()));
        }

        let sources = backfill
            .map(|bf| bf.labels.as_slice())
            .unwrap_or_default()
            .iter()
            .chain(self.labels.iter());
        for label in sources {
            match ctx.run_context.render(&label.value) {
                Ok(value) => labels.push(Label::new(label.key.clone(), value)),
                Err(err) if lenient => warn!(
                    trigger_id = %self.id,
                    key = %label.key,
                    error = %err,
                    "skipping unrenderable label"
                ),
                Err(err) => return Err(err),
            }
        }
        Ok(labels)
    }

    /// Trigger inputs rendered, then backfill inputs rendered on top.
    fn generate_inputs(
        &self,
        ctx: &ConditionContext,
        backfill: Option<&Backfill>,
    ) -> std::result::Result<Map<String, Value>, RenderError> {
        let mut inputs = ctx.run_context.render_map(&self.inputs)?;
        if let Some(bf) = backfill {
            inputs.extend(ctx.run_context.render_map(&bf.inputs)?);
        }
        Ok(inputs)
    }
}

impl Trigger for Schedule {
    fn id(&self) -> &str {
        &self.id
    }

    fn conditions(&self) -> &[Arc<dyn ScheduleCondition>] {
        &self.conditions
    }

    fn next_evaluation_date(
        &self,
        ctx: &ConditionContext,
        last: Option<&TriggerContext>,
        now: DateTime<Utc>,
    ) -> Option<DateTime<Tz>> {
        Self::next_evaluation_date(self, ctx, last, now)
    }

    fn evaluate(
        &self,
        ctx: &ConditionContext,
        trigger_ctx: &TriggerContext,
        now: DateTime<Utc>,
    ) -> Option<Execution> {
        Self::evaluate(self, ctx, trigger_ctx, now)
    }
}

fn record_evaluation(status: &'static str) {
    counter!(
        metric_names::TRIGGER_EVALUATIONS_TOTAL,
        metric_labels::TRIGGER => "schedule".to_string(),
        metric_labels::STATUS => status.to_string(),
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::flow::Flow;
    use crate::trigger::condition::ConditionError;
    use chrono::{Datelike, TimeZone};
    use serde_json::json;

    fn ctx() -> ConditionContext {
        ConditionContext::new(
            RunContext::identity(),
            Flow::new("company.team", "scheduled", 7),
        )
    }

    fn trigger_ctx() -> TriggerContext {
        TriggerContext::new("company.team", "scheduled", "daily")
    }

    fn schedule(cron: &str) -> Schedule {
        Schedule::new("daily", CronSpec::new(cron)).unwrap()
    }

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn next_evaluation_without_last_anchors_on_now() {
        let schedule = schedule("*/15 * * * *");
        let now = utc(2024, 1, 1, 0, 7, 0);

        let next = schedule.next_evaluation_date(&ctx(), None, now).unwrap();
        assert_eq!(
            next,
            Tz::UTC.with_ymd_and_hms(2024, 1, 1, 0, 15, 0).unwrap()
        );
    }

    #[test]
    fn next_evaluation_anchors_on_last_date() {
        let schedule = schedule("0 * * * *");
        let last = trigger_ctx().with_date(utc(2024, 1, 1, 10, 0, 0));

        let next = schedule
            .next_evaluation_date(&ctx(), Some(&last), utc(2024, 1, 1, 10, 30, 0))
            .unwrap();
        assert_eq!(next, Tz::UTC.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn next_evaluation_skips_spring_forward_gap() {
        // 02:30 America/New_York does not exist on 2024-03-10.
        let tz: Tz = "America/New_York".parse().unwrap();
        let schedule = Schedule::new(
            "daily",
            CronSpec::new("30 2 * * *").with_timezone(tz),
        )
        .unwrap();

        // 2024-03-09T02:30-05:00
        let last = trigger_ctx().with_date(utc(2024, 3, 9, 7, 30, 0));
        let next = schedule
            .next_evaluation_date(&ctx(), Some(&last), utc(2024, 3, 9, 8, 0, 0))
            .unwrap();

        assert_eq!(next, tz.with_ymd_and_hms(2024, 3, 11, 2, 30, 0).unwrap());
        assert_eq!(
            next.with_timezone(&Utc),
            utc(2024, 3, 11, 6, 30, 0),
            "2024-03-11T02:30 is EDT (-04:00)"
        );
    }

    #[test]
    fn next_evaluation_applies_late_delay_skip() {
        let schedule =
            schedule("0 * * * *").with_late_maximum_delay(Duration::minutes(10));
        let last = trigger_ctx().with_date(utc(2024, 1, 1, 0, 0, 0));
        let now = utc(2024, 1, 1, 2, 5, 0);

        // 01:00 is 65 minutes late, above the accepted 10 minutes.
        let next = schedule
            .next_evaluation_date(&ctx(), Some(&last), now)
            .unwrap();
        assert_eq!(next, Tz::UTC.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap());
    }

    #[test]
    fn next_evaluation_honors_conditions() {
        #[derive(Debug)]
        struct FirstMonday;
        impl ScheduleCondition for FirstMonday {
            fn is_valid(&self, ctx: &ConditionContext) -> std::result::Result<bool, ConditionError> {
                let date = ctx
                    .variables
                    .get("trigger")
                    .and_then(|t| t.get("date"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| ConditionError::new("missing trigger.date"))?;
                let date = DateTime::parse_from_rfc3339(date)
                    .map_err(|e| ConditionError::new(e.to_string()))?;
                Ok(date.weekday() == chrono::Weekday::Mon && date.day() <= 7)
            }
        }

        let schedule = schedule("0 11 * * 1")
            .with_conditions(vec![Arc::new(FirstMonday)]);
        let last = trigger_ctx().with_date(utc(2024, 1, 1, 11, 0, 0));

        let next = schedule
            .next_evaluation_date(&ctx(), Some(&last), utc(2024, 1, 1, 11, 0, 0))
            .unwrap();
        assert_eq!(next, Tz::UTC.with_ymd_and_hms(2024, 2, 5, 11, 0, 0).unwrap());
    }

    #[test]
    fn next_evaluation_falls_back_when_conditions_error() {
        #[derive(Debug)]
        struct Broken;
        impl ScheduleCondition for Broken {
            fn is_valid(&self, _: &ConditionContext) -> std::result::Result<bool, ConditionError> {
                Err(ConditionError::new("boom"))
            }
        }

        let schedule = schedule("0 * * * *").with_conditions(vec![Arc::new(Broken)]);
        let last = trigger_ctx().with_date(utc(2024, 1, 1, 10, 0, 0));

        let next = schedule
            .next_evaluation_date(&ctx(), Some(&last), utc(2024, 1, 1, 10, 30, 0))
            .unwrap();
        assert_eq!(next, Tz::UTC.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap());
    }

    #[test]
    fn backfill_next_stays_in_range_then_reanchors() {
        let schedule = schedule("0 0 * * *");
        let mut backfill =
            Backfill::new(utc(2024, 1, 1, 0, 0, 0), utc(2024, 1, 3, 0, 0, 0)).unwrap();

        let last = trigger_ctx().with_backfill(backfill.clone());
        let now = utc(2024, 1, 5, 0, 30, 0);
        let next = schedule
            .next_evaluation_date(&ctx(), Some(&last), now)
            .unwrap();
        assert_eq!(next, Tz::UTC.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());

        // Cursor on the last day: the following fire escapes the range and
        // evaluation re-anchors on now.
        backfill.advance(utc(2024, 1, 3, 0, 0, 0)).unwrap();
        let last = trigger_ctx().with_backfill(backfill);
        let next = schedule
            .next_evaluation_date(&ctx(), Some(&last), now)
            .unwrap();
        assert_eq!(next, Tz::UTC.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap());
    }

    #[test]
    fn backfill_ignores_late_delay() {
        let schedule =
            schedule("0 0 * * *").with_late_maximum_delay(Duration::minutes(10));
        let backfill =
            Backfill::new(utc(2024, 1, 1, 0, 0, 0), utc(2024, 1, 3, 0, 0, 0)).unwrap();
        let last = trigger_ctx().with_backfill(backfill);

        // The 01-02 fire is days late against a 10m budget, but backfills
        // replay history on purpose.
        let next = schedule
            .next_evaluation_date(&ctx(), Some(&last), utc(2024, 1, 2, 12, 0, 0))
            .unwrap();
        assert_eq!(next, Tz::UTC.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap());
    }

    #[test]
    fn evaluate_emits_seed_with_dual_variable_exposure() {
        let schedule = schedule("0 0 * * *");
        let trigger_ctx = trigger_ctx()
            .with_tenant("tenant-abc")
            .with_date(utc(2024, 1, 1, 0, 0, 0));

        let execution = schedule
            .evaluate(&ctx(), &trigger_ctx, utc(2024, 1, 1, 0, 0, 30))
            .unwrap();

        assert_eq!(execution.namespace, "company.team");
        assert_eq!(execution.flow_id, "scheduled");
        assert_eq!(execution.flow_revision, 7);
        assert_eq!(execution.tenant_id.as_deref(), Some("tenant-abc"));
        assert_eq!(execution.state.current(), State::Created);
        assert_eq!(
            execution.schedule_date,
            Some(utc(2024, 1, 1, 0, 0, 0))
        );

        let trigger = execution.trigger.as_ref().unwrap();
        assert_eq!(trigger.id, "daily");
        assert_eq!(trigger.trigger_type, SCHEDULE_TRIGGER_TYPE);
        let schedule_vars = trigger.variables.get("schedule").unwrap();
        let trigger_vars = trigger.variables.get("trigger").unwrap();
        assert_eq!(schedule_vars, trigger_vars);
        assert_eq!(
            schedule_vars.get("date").and_then(Value::as_str),
            Some("2024-01-01T00:00:00+00:00")
        );
        assert!(schedule_vars.get("next").is_some());
        assert!(schedule_vars.get("previous").is_some());
    }

    #[test]
    fn evaluate_mints_correlation_id_when_absent() {
        let schedule = schedule("0 0 * * *");
        let trigger_ctx = trigger_ctx().with_date(utc(2024, 1, 1, 0, 0, 0));

        let execution = schedule
            .evaluate(&ctx(), &trigger_ctx, utc(2024, 1, 1, 0, 0, 30))
            .unwrap();
        assert_eq!(execution.correlation_id(), Some(execution.id.to_string().as_str()));
    }

    #[test]
    fn evaluate_inherits_correlation_id_from_flow() {
        let flow = Flow::new("company.team", "scheduled", 7)
            .with_labels(vec![Label::correlation_id("inherited")]);
        let ctx = ConditionContext::new(RunContext::identity(), flow);
        let schedule = schedule("0 0 * * *");
        let trigger_ctx = trigger_ctx().with_date(utc(2024, 1, 1, 0, 0, 0));

        let execution = schedule
            .evaluate(&ctx, &trigger_ctx, utc(2024, 1, 1, 0, 0, 30))
            .unwrap();
        assert_eq!(execution.correlation_id(), Some("inherited"));
    }

    #[test]
    fn evaluate_skips_paused_backfill() {
        let schedule = schedule("0 0 * * *");
        let mut backfill =
            Backfill::new(utc(2024, 1, 1, 0, 0, 0), utc(2024, 1, 3, 0, 0, 0)).unwrap();
        backfill.pause();
        let trigger_ctx = trigger_ctx().with_backfill(backfill);

        assert!(schedule
            .evaluate(&ctx(), &trigger_ctx, utc(2024, 1, 5, 0, 0, 0))
            .is_none());
    }

    #[test]
    fn evaluate_skips_future_fires() {
        let schedule = schedule("0 0 * * *");
        let trigger_ctx = trigger_ctx().with_date(utc(2024, 1, 2, 0, 0, 0));

        // The anchored fire is a day ahead of the clock.
        assert!(schedule
            .evaluate(&ctx(), &trigger_ctx, utc(2024, 1, 1, 0, 0, 0))
            .is_none());
    }

    #[test]
    fn evaluate_skips_when_conditions_false() {
        #[derive(Debug)]
        struct Never;
        impl ScheduleCondition for Never {
            fn is_valid(&self, _: &ConditionContext) -> std::result::Result<bool, ConditionError> {
                Ok(false)
            }
        }

        let schedule = schedule("0 0 * * *").with_conditions(vec![Arc::new(Never)]);
        let trigger_ctx = trigger_ctx().with_date(utc(2024, 1, 1, 0, 0, 0));

        assert!(schedule
            .evaluate(&ctx(), &trigger_ctx, utc(2024, 1, 1, 0, 0, 30))
            .is_none());
    }

    #[test]
    fn evaluate_emits_failed_seed_on_condition_error() {
        #[derive(Debug)]
        struct Broken;
        impl ScheduleCondition for Broken {
            fn is_valid(&self, _: &ConditionContext) -> std::result::Result<bool, ConditionError> {
                Err(ConditionError::new("unrenderable variable"))
            }
        }

        let schedule = schedule("0 0 * * *").with_conditions(vec![Arc::new(Broken)]);
        let trigger_ctx = trigger_ctx()
            .with_tenant("tenant-abc")
            .with_date(utc(2024, 1, 1, 0, 0, 0));

        let execution = schedule
            .evaluate(&ctx(), &trigger_ctx, utc(2024, 1, 1, 0, 0, 30))
            .unwrap();

        assert_eq!(execution.state.current(), State::Failed);
        assert_eq!(execution.flow_revision, 7);
        assert_eq!(execution.tenant_id.as_deref(), Some("tenant-abc"));
        assert!(execution.trigger.is_none());
        assert!(execution.correlation_id().is_some());
    }

    #[test]
    fn evaluate_merges_backfill_inputs_over_trigger_inputs() {
        let mut trigger_inputs = Map::new();
        trigger_inputs.insert("a".to_string(), json!("1"));
        trigger_inputs.insert("b".to_string(), json!("2"));
        let mut backfill_inputs = Map::new();
        backfill_inputs.insert("b".to_string(), json!("3"));

        let schedule = schedule("0 0 * * *").with_inputs(trigger_inputs);
        let backfill = Backfill::new(utc(2024, 1, 1, 0, 0, 0), utc(2024, 1, 3, 0, 0, 0))
            .unwrap()
            .with_inputs(backfill_inputs)
            .with_labels(vec![Label::new("replay", "true")]);
        let trigger_ctx = trigger_ctx().with_backfill(backfill);

        let execution = schedule
            .evaluate(&ctx(), &trigger_ctx, utc(2024, 1, 5, 0, 0, 0))
            .unwrap();

        assert_eq!(execution.inputs.get("a"), Some(&json!("1")));
        assert_eq!(execution.inputs.get("b"), Some(&json!("3")));
        assert!(execution
            .labels
            .iter()
            .any(|l| l.key == "replay" && l.value == "true"));
    }

    #[test]
    fn previous_evaluation_date_returns_last_accepted_fire() {
        let hourly = schedule("0 * * * *");
        let now = utc(2024, 1, 1, 10, 30, 0);
        assert_eq!(
            hourly.previous_evaluation_date(&ctx(), now),
            Tz::UTC.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap()
        );

        #[derive(Debug)]
        struct FirstMonday;
        impl ScheduleCondition for FirstMonday {
            fn is_valid(&self, ctx: &ConditionContext) -> std::result::Result<bool, ConditionError> {
                let date = ctx
                    .variables
                    .get("trigger")
                    .and_then(|t| t.get("date"))
                    .and_then(Value::as_str)
                    .ok_or_else(|| ConditionError::new("missing trigger.date"))?;
                let date = DateTime::parse_from_rfc3339(date)
                    .map_err(|e| ConditionError::new(e.to_string()))?;
                Ok(date.weekday() == chrono::Weekday::Mon && date.day() <= 7)
            }
        }

        // Mondays at 11:00 constrained to the first of the month: looking
        // back from mid-February lands on February's first Monday.
        let constrained = schedule("0 11 * * 1").with_conditions(vec![Arc::new(FirstMonday)]);
        assert_eq!(
            constrained.previous_evaluation_date(&ctx(), utc(2024, 2, 20, 0, 0, 0)),
            Tz::UTC.with_ymd_and_hms(2024, 2, 5, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn recover_missed_fires_policies() {
        let last = utc(2024, 1, 1, 0, 0, 0);
        let now = utc(2024, 1, 1, 3, 30, 0);
        let expected: Vec<_> = (1..=3)
            .map(|h| Tz::UTC.with_ymd_and_hms(2024, 1, 1, h, 0, 0).unwrap())
            .collect();

        let all = schedule("0 * * * *");
        assert_eq!(all.recover_missed_fires(last, now), expected);

        let last_only =
            schedule("0 * * * *").with_recover_missed_schedules(RecoverMissedSchedules::Last);
        assert_eq!(
            last_only.recover_missed_fires(last, now),
            vec![Tz::UTC.with_ymd_and_hms(2024, 1, 1, 3, 0, 0).unwrap()]
        );

        let none =
            schedule("0 * * * *").with_recover_missed_schedules(RecoverMissedSchedules::None);
        assert!(none.recover_missed_fires(last, now).is_empty());
    }

    #[test]
    fn config_builds_schedule() {
        let config: ScheduleConfig = serde_json::from_value(json!({
            "cron": "0 9 * * 1-5",
            "timezone": "Europe/Paris",
            "lateMaximumDelay": "10m",
            "recoverMissedSchedules": "LAST",
            "stopAfter": ["FAILED"]
        }))
        .unwrap();

        let schedule = config.build("workdays").unwrap();
        assert_eq!(Trigger::id(&schedule), "workdays");
        assert_eq!(schedule.timezone().name(), "Europe/Paris");
        assert_eq!(
            schedule.recover_missed_schedules(),
            RecoverMissedSchedules::Last
        );
        assert_eq!(schedule.stop_after(), &[State::Failed]);
    }

    #[test]
    fn config_rejects_bad_timezone_and_cron() {
        let bad_tz = ScheduleConfig {
            timezone: Some("Mars/Olympus".to_string()),
            ..ScheduleConfig::new("0 * * * *")
        };
        assert!(matches!(
            bad_tz.build("t"),
            Err(Error::InvalidTimezone { .. })
        ));

        let bad_cron = ScheduleConfig::new("not a cron");
        assert!(matches!(
            bad_cron.build("t"),
            Err(Error::InvalidCronExpression { .. })
        ));
    }
}
