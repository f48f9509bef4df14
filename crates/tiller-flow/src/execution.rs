//! Execution and task-run models.
//!
//! The core produces execution *seeds*: fully-formed values describing a run
//! to create. Persisting them, queueing them, and advancing them is the
//! executor's job; nothing here is mutated in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tiller_core::{label, ExecutionId, Label, TaskRunId};

use crate::error::Result;
use crate::state::{State, StateHistory};

/// The trigger block recorded on an execution.
///
/// For scheduled executions this names the schedule trigger; for subflow
/// executions it names the parent task and carries the parent coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTrigger {
    /// Identifier of the trigger or parent task.
    pub id: String,
    /// Kind of trigger (e.g. `schedule`, or the parent task's type).
    #[serde(rename = "type")]
    pub trigger_type: String,
    /// Trigger-provided variables exposed to the execution.
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl ExecutionTrigger {
    /// Creates a trigger block.
    #[must_use]
    pub fn new(id: impl Into<String>, trigger_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            trigger_type: trigger_type.into(),
            variables: Map::new(),
        }
    }

    /// Sets the trigger variables.
    #[must_use]
    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }
}

/// One run of a flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    /// Unique identifier for this execution.
    pub id: ExecutionId,
    /// Owning tenant, if the deployment is multi-tenant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    /// Namespace of the flow being run.
    pub namespace: String,
    /// Identifier of the flow being run.
    pub flow_id: String,
    /// Revision of the flow definition this execution is pinned to.
    pub flow_revision: u32,
    /// Ordered labels; duplicate keys resolve last-wins.
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Resolved inputs.
    #[serde(default)]
    pub inputs: Map<String, Value>,
    /// How this execution came to be, if triggered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<ExecutionTrigger>,
    /// For scheduled executions, the fire date that produced this execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_date: Option<DateTime<Utc>>,
    /// State history of the execution.
    pub state: StateHistory,
    /// Task runs recorded so far.
    #[serde(default)]
    pub task_runs: Vec<TaskRun>,
}

impl Execution {
    /// Creates a new execution seed in `CREATED`.
    #[must_use]
    pub fn new(namespace: impl Into<String>, flow_id: impl Into<String>, flow_revision: u32) -> Self {
        Self {
            id: ExecutionId::generate(),
            tenant_id: None,
            namespace: namespace.into(),
            flow_id: flow_id.into(),
            flow_revision,
            labels: Vec::new(),
            inputs: Map::new(),
            trigger: None,
            schedule_date: None,
            state: StateHistory::new(),
            task_runs: Vec::new(),
        }
    }

    /// Sets the owning tenant.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the labels.
    #[must_use]
    pub fn with_labels(mut self, labels: Vec<Label>) -> Self {
        self.labels = labels;
        self
    }

    /// Sets the inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Sets the trigger block.
    #[must_use]
    pub fn with_trigger(mut self, trigger: ExecutionTrigger) -> Self {
        self.trigger = Some(trigger);
        self
    }

    /// Sets the schedule date.
    #[must_use]
    pub fn with_schedule_date(mut self, schedule_date: Option<DateTime<Utc>>) -> Self {
        self.schedule_date = schedule_date;
        self
    }

    /// Sets the task runs.
    #[must_use]
    pub fn with_task_runs(mut self, task_runs: Vec<TaskRun>) -> Self {
        self.task_runs = task_runs;
        self
    }

    /// Returns a copy with `state` appended to the history.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` when leaving a terminal state.
    pub fn with_state(mut self, state: State) -> Result<Self> {
        self.state = self.state.with_state(state)?;
        Ok(self)
    }

    /// Finds a task run by id.
    #[must_use]
    pub fn find_task_run(&self, id: TaskRunId) -> Option<&TaskRun> {
        self.task_runs.iter().find(|tr| tr.id == id)
    }

    /// The effective correlation id, if any label carries one.
    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        label::find(&self.labels, label::CORRELATION_ID)
    }
}

/// One attempt of a task run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskRunAttempt {
    /// State history of this attempt.
    pub state: StateHistory,
}

impl TaskRunAttempt {
    /// Creates an attempt that went straight to the given state.
    #[must_use]
    pub fn with_state(state: State) -> Self {
        Self {
            state: StateHistory::starting_in(state),
        }
    }
}

/// One run of one task inside an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    /// Unique identifier for this task run.
    pub id: TaskRunId,
    /// Identifier of the task being run.
    pub task_id: String,
    /// Batch index when the task fans out into iterations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration: Option<u32>,
    /// State history of the task run.
    pub state: StateHistory,
    /// Task outputs.
    #[serde(default)]
    pub outputs: Map<String, Value>,
    /// Attempts recorded for this task run.
    #[serde(default)]
    pub attempts: Vec<TaskRunAttempt>,
}

impl TaskRun {
    /// Creates a new task run in `CREATED`.
    #[must_use]
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            id: TaskRunId::generate(),
            task_id: task_id.into(),
            iteration: None,
            state: StateHistory::new(),
            outputs: Map::new(),
            attempts: Vec::new(),
        }
    }

    /// Sets the batch index.
    #[must_use]
    pub const fn with_iteration(mut self, iteration: u32) -> Self {
        self.iteration = Some(iteration);
        self
    }

    /// Sets the outputs.
    #[must_use]
    pub fn with_outputs(mut self, outputs: Map<String, Value>) -> Self {
        self.outputs = outputs;
        self
    }

    /// Returns a copy with `state` appended to the history.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` when leaving a terminal state.
    pub fn with_state(mut self, state: State) -> Result<Self> {
        self.state = self.state.with_state(state)?;
        Ok(self)
    }

    /// The current state of this task run.
    #[must_use]
    pub fn current_state(&self) -> State {
        self.state.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_task_run_by_id() {
        let task_run = TaskRun::new("fan-out");
        let id = task_run.id;
        let execution =
            Execution::new("company.team", "parent", 1).with_task_runs(vec![task_run]);

        assert!(execution.find_task_run(id).is_some());
        assert!(execution.find_task_run(TaskRunId::generate()).is_none());
    }

    #[test]
    fn correlation_id_reads_last_label() {
        let execution = Execution::new("company.team", "parent", 1).with_labels(vec![
            Label::correlation_id("first"),
            Label::correlation_id("second"),
        ]);
        assert_eq!(execution.correlation_id(), Some("second"));
    }

    #[test]
    fn execution_with_state_rejects_leaving_terminal() {
        let execution = Execution::new("company.team", "flow", 1)
            .with_state(State::Success)
            .expect("terminal entry");
        assert!(execution.with_state(State::Running).is_err());
    }

    #[test]
    fn attempt_starts_in_given_state() {
        let attempt = TaskRunAttempt::with_state(State::Failed);
        assert_eq!(attempt.state.current(), State::Failed);
        assert_eq!(attempt.state.entries().len(), 1);
    }
}
