//! # tiller-flow
//!
//! Execution-driving core for the tiller workflow orchestrator.
//!
//! This crate implements the two subsystems that decide *when* flows run and
//! *how* parent flows drive their subflows:
//!
//! - **Schedule Trigger**: cron evaluation with timezone rules, condition
//!   filtering, missed-schedule recovery, late-delay skipping, and
//!   user-driven backfills over historical date ranges
//! - **Subflow Orchestration**: launching child executions from a parent
//!   task, propagating system labels and the correlation identifier, and
//!   collapsing fan-out batch states back into a single parent state
//!
//! ## Core Concepts
//!
//! - **Flow**: a user-defined workflow definition
//! - **Execution**: one run of a flow; the core produces execution *seeds*
//!   and never persists them itself
//! - **Task run**: one run of one task inside an execution
//! - **Trigger**: a rule that creates executions (here, a cron schedule)
//!
//! ## Guarantees
//!
//! - **Pure**: every operation is a side-effect-free function over immutable
//!   inputs; clocks are passed in explicitly
//! - **Bounded**: condition searches and late-delay skipping terminate within
//!   a ten-year horizon
//! - **Monotonic**: backfill cursors and state histories only move forward
//!
//! ## Example
//!
//! ```rust
//! use chrono::TimeZone;
//! use chrono_tz::Tz;
//! use tiller_flow::trigger::{CronSpec, ScheduleWindow};
//!
//! # fn main() -> tiller_flow::error::Result<()> {
//! let evaluator = CronSpec::new("*/15 * * * *").compile()?;
//! let window = ScheduleWindow::new(&evaluator);
//!
//! let cursor = Tz::UTC.with_ymd_and_hms(2024, 1, 1, 0, 7, 0).unwrap();
//! let output = window.schedule_dates(cursor).expect("cron never exhausts");
//! assert_eq!(
//!     output.date,
//!     Tz::UTC.with_ymd_and_hms(2024, 1, 1, 0, 15, 0).unwrap()
//! );
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod context;
pub mod error;
pub mod execution;
pub mod flow;
pub mod iteration;
pub mod metrics;
pub mod state;
pub mod storage;
pub mod subflow;
pub mod trigger;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::context::{ConditionContext, IdentityRenderer, RunContext, VariableRenderer};
    pub use crate::error::{Error, Result};
    pub use crate::execution::{Execution, ExecutionTrigger, TaskRun, TaskRunAttempt};
    pub use crate::flow::{Flow, FlowLookup};
    pub use crate::iteration::{
        find_terminal_state, guess_state, manage_iterations, IterationCounters,
    };
    pub use crate::state::{State, StateHistory};
    pub use crate::storage::{MemoryStorage, Storage};
    pub use crate::subflow::{
        subflow_execution_result, InputReader, PassthroughInputReader, SubflowExecution,
        SubflowExecutionResult, SubflowId, SubflowLauncher, SubflowTask,
    };
    pub use crate::trigger::{
        Backfill, ConditionFilter, CronEvaluator, CronSpec, RecoverMissedSchedules, Schedule,
        ScheduleCondition, ScheduleConfig, ScheduleOutput, ScheduleWindow, SearchDirection,
        Trigger, TriggerContext,
    };
}
