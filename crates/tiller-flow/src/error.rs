//! Error types for the execution core.

use tiller_core::TaskRunId;

use crate::context::RenderError;
use crate::trigger::ConditionError;

/// The result type used throughout tiller-flow.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving executions.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cron expression was rejected at configuration time.
    #[error("invalid cron expression '{expression}': {message}")]
    InvalidCronExpression {
        /// The offending expression.
        expression: String,
        /// Why it was rejected.
        message: String,
    },

    /// A timezone identifier was rejected at configuration time.
    #[error("invalid timezone '{timezone}'")]
    InvalidTimezone {
        /// The offending timezone identifier.
        timezone: String,
    },

    /// A backfill request or cursor movement violated its range invariant.
    #[error("invalid backfill: {message}")]
    InvalidBackfill {
        /// Description of the violation.
        message: String,
    },

    /// The target flow of a subflow launch does not exist.
    #[error("unable to find flow '{namespace}'.'{flow_id}' with revision {revision:?}")]
    FlowNotFound {
        /// Namespace that was searched.
        namespace: String,
        /// Flow identifier that was searched.
        flow_id: String,
        /// Requested revision, if pinned.
        revision: Option<u32>,
    },

    /// The target flow of a subflow launch is disabled.
    #[error("cannot execute flow '{namespace}'.'{flow_id}': flow is disabled")]
    FlowDisabled {
        /// Namespace of the disabled flow.
        namespace: String,
        /// Identifier of the disabled flow.
        flow_id: String,
    },

    /// The target flow of a subflow launch failed validation when stored.
    #[error("cannot execute invalid flow '{namespace}'.'{flow_id}': {message}")]
    InvalidFlow {
        /// Namespace of the invalid flow.
        namespace: String,
        /// Identifier of the invalid flow.
        flow_id: String,
        /// The stored validation failure.
        message: String,
    },

    /// A child completion event referenced a parent task run that was never
    /// persisted. This is an invariant violation, not a retryable condition.
    #[error("parent task run {task_run_id} not found in execution")]
    MissingParentTaskRun {
        /// The missing task-run identifier.
        task_run_id: TaskRunId,
    },

    /// A parent task run's outputs are missing or corrupt.
    #[error("invalid outputs on task run {task_run_id}: {message}")]
    InvalidTaskRunOutputs {
        /// The task run with bad outputs.
        task_run_id: TaskRunId,
        /// What was missing or malformed.
        message: String,
    },

    /// An invalid state transition was attempted.
    #[error("invalid state transition: {from} -> {to}")]
    InvalidStateTransition {
        /// The current state.
        from: String,
        /// The attempted target state.
        to: String,
    },

    /// A variable template could not be rendered.
    #[error(transparent)]
    VariableRender(#[from] RenderError),

    /// A schedule condition could not be evaluated.
    #[error(transparent)]
    ConditionEvaluation(#[from] ConditionError),
}
