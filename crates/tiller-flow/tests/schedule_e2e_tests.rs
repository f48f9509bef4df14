//! End-to-end schedule trigger tests: the scheduler-loop choreography of
//! `next_evaluation_date` and `evaluate` over live fires, backfills, and
//! missed-schedule recovery.

use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use tiller_flow::prelude::*;

fn ctx() -> ConditionContext {
    ConditionContext::new(
        RunContext::identity(),
        Flow::new("company.team", "scheduled", 3),
    )
}

fn trigger_ctx() -> TriggerContext {
    TriggerContext::new("company.team", "scheduled", "daily")
}

fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
}

#[test]
fn live_tick_fires_and_advances() {
    let schedule = Schedule::new("hourly", CronSpec::new("0 * * * *")).unwrap();
    let now = utc(2024, 1, 1, 9, 59, 50);

    // First tick: nothing persisted yet.
    let due = schedule.next_evaluation_date(&ctx(), None, now).unwrap();
    assert_eq!(due, Tz::UTC.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());

    // The fire comes due; the scheduler evaluates at that date.
    let fire_date = due.with_timezone(&Utc);
    let tick = trigger_ctx().with_date(fire_date);
    let execution = schedule
        .evaluate(&ctx(), &tick, fire_date + chrono::Duration::seconds(1))
        .expect("due fire must produce an execution");

    assert_eq!(execution.schedule_date, Some(fire_date));
    assert_eq!(execution.state.current(), State::Created);

    // The fire date becomes the persisted anchor for the next tick.
    let next = schedule
        .next_evaluation_date(&ctx(), Some(&tick), fire_date)
        .unwrap();
    assert_eq!(next, Tz::UTC.with_ymd_and_hms(2024, 1, 1, 11, 0, 0).unwrap());
}

#[test]
fn backfill_replays_range_then_returns_to_live() {
    let schedule = Schedule::new("daily", CronSpec::new("0 0 * * *")).unwrap();
    let evaluator = schedule.spec().compile().unwrap();
    let now = utc(2024, 1, 5, 0, 30, 0);

    let mut backfill =
        Backfill::new(utc(2024, 1, 1, 0, 0, 0), utc(2024, 1, 3, 0, 0, 0)).unwrap();
    let mut fired = Vec::new();

    // The scheduler loop: evaluate at the cursor, then advance it to the
    // next raw fire until it passes the end of the range.
    while !backfill.is_complete() {
        let tick = trigger_ctx().with_backfill(backfill.clone());
        let execution = schedule
            .evaluate(&ctx(), &tick, now)
            .expect("every backfill fire is due");
        fired.push(execution.schedule_date.unwrap());

        let next = evaluator
            .next_after(evaluator.in_zone(backfill.current_date))
            .unwrap();
        backfill.advance(next.with_timezone(&Utc)).unwrap();
    }

    assert_eq!(
        fired,
        vec![
            utc(2024, 1, 1, 0, 0, 0),
            utc(2024, 1, 2, 0, 0, 0),
            utc(2024, 1, 3, 0, 0, 0),
        ]
    );

    // Back in live mode, evaluation re-anchors on now: no catch-up fires
    // for the gap between the backfill end and the clock.
    let next = schedule.next_evaluation_date(&ctx(), None, now).unwrap();
    assert_eq!(next, Tz::UTC.with_ymd_and_hms(2024, 1, 6, 0, 0, 0).unwrap());
}

#[test]
fn backfill_executions_carry_backfill_labels_and_inputs() {
    let mut inputs = serde_json::Map::new();
    inputs.insert("day".to_string(), serde_json::json!("replayed"));
    let backfill = Backfill::new(utc(2024, 1, 1, 0, 0, 0), utc(2024, 1, 2, 0, 0, 0))
        .unwrap()
        .with_labels(vec![tiller_core::Label::new("backfill", "january")])
        .with_inputs(inputs);

    let schedule = Schedule::new("daily", CronSpec::new("0 0 * * *")).unwrap();
    let tick = trigger_ctx().with_backfill(backfill);
    let execution = schedule
        .evaluate(&ctx(), &tick, utc(2024, 1, 5, 0, 0, 0))
        .unwrap();

    assert!(execution
        .labels
        .iter()
        .any(|l| l.key == "backfill" && l.value == "january"));
    assert_eq!(
        execution.inputs.get("day"),
        Some(&serde_json::json!("replayed"))
    );
}

#[test]
fn missed_schedules_recover_in_order_then_resume() {
    let schedule = Schedule::new("hourly", CronSpec::new("0 * * * *")).unwrap();
    let last_fire = utc(2024, 1, 1, 6, 0, 0);
    let now = utc(2024, 1, 1, 9, 10, 0);

    let missed = schedule.recover_missed_fires(last_fire, now);
    assert_eq!(
        missed,
        vec![
            Tz::UTC.with_ymd_and_hms(2024, 1, 1, 7, 0, 0).unwrap(),
            Tz::UTC.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).unwrap(),
            Tz::UTC.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap(),
        ]
    );

    // Each recovered fire evaluates like a normal tick.
    let mut executions = Vec::new();
    for fire in &missed {
        let tick = trigger_ctx().with_date(fire.with_timezone(&Utc));
        executions.push(schedule.evaluate(&ctx(), &tick, now).unwrap());
    }
    assert_eq!(executions.len(), 3);
    assert_eq!(
        executions[2].schedule_date,
        Some(utc(2024, 1, 1, 9, 0, 0))
    );
}

#[test]
fn schedule_works_through_the_trigger_trait() {
    let schedule = Schedule::new("hourly", CronSpec::new("0 * * * *")).unwrap();
    let trigger: Box<dyn Trigger> = Box::new(schedule);

    assert_eq!(trigger.id(), "hourly");
    assert!(trigger.conditions().is_empty());

    let now = utc(2024, 1, 1, 9, 30, 0);
    let due = trigger.next_evaluation_date(&ctx(), None, now).unwrap();
    assert_eq!(due, Tz::UTC.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap());

    let tick = trigger_ctx().with_date(due.with_timezone(&Utc));
    let execution = trigger.evaluate(&ctx(), &tick, due.with_timezone(&Utc));
    assert!(execution.is_some());
}

#[test]
fn seconds_precision_schedule_fires_at_half_minute() {
    let schedule = Schedule::new(
        "fast",
        CronSpec::new("30 * * * * *").with_seconds(),
    )
    .unwrap();
    let now = utc(2024, 1, 1, 0, 0, 10);

    let due = schedule.next_evaluation_date(&ctx(), None, now).unwrap();
    assert_eq!(due, Tz::UTC.with_ymd_and_hms(2024, 1, 1, 0, 0, 30).unwrap());
}
