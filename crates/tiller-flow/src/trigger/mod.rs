//! Cron-based schedule triggering.
//!
//! A trigger decides *when* a flow should produce a new execution. The
//! pipeline, leaves first:
//!
//! ```text
//! CronEvaluator ──► ScheduleWindow ──► ConditionFilter ──► Schedule
//!  (next/last        (date, next,       (accept or          (trigger:
//!   fire times)       previous)          search on)          backfill,
//!                                                            recovery,
//!                                                            late delay)
//! ```
//!
//! Everything here is a pure function over immutable inputs: the current
//! time is always passed in explicitly, and the compiled cron evaluator is a
//! value computed at construction.

mod backfill;
mod condition;
mod cron;
mod schedule;
mod window;

pub use backfill::Backfill;
pub use condition::{ConditionError, ConditionFilter, ScheduleCondition, SearchDirection};
pub use cron::{CronEvaluator, CronSpec};
pub use schedule::{
    RecoverMissedSchedules, Schedule, ScheduleConfig, Trigger, TriggerContext,
    SCHEDULE_TRIGGER_TYPE,
};
pub use window::{ScheduleOutput, ScheduleWindow};
