//! Launching subflow executions from a parent task.
//!
//! A subflow-launching task resolves its target flow, builds the child
//! execution seed (labels, inputs, trigger block, optional schedule date),
//! and reports the parent task run as RUNNING. Resolution failures are
//! fatal: a missing, disabled, or invalid target flow is a configuration
//! error, not something to retry.
//!
//! Label propagation contract: only the parent's `system.`-prefixed labels
//! cross the boundary; a correlation id is minted from the parent execution
//! id when none is inherited, so parent and children form a traceable tree.

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

use tiller_core::{ExecutionId, Label};

use crate::context::RunContext;
use crate::error::{Error, Result};
use crate::execution::{Execution, ExecutionTrigger, TaskRun, TaskRunAttempt};
use crate::flow::{Flow, FlowLookup};
use crate::metrics::names as metric_names;
use crate::state::State;

/// Address of the flow a task launches, possibly templated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubflowId {
    /// Target namespace (renderable).
    pub namespace: String,
    /// Target flow identifier (renderable).
    pub flow_id: String,
    /// Pinned revision; latest when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u32>,
}

impl SubflowId {
    /// Creates a subflow address targeting the latest revision.
    #[must_use]
    pub fn new(namespace: impl Into<String>, flow_id: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            flow_id: flow_id.into(),
            revision: None,
        }
    }

    /// Pins the target revision.
    #[must_use]
    pub const fn with_revision(mut self, revision: u32) -> Self {
        self.revision = Some(revision);
        self
    }
}

/// The parent task that launches a subflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubflowTask {
    /// Task identifier inside the parent flow.
    pub id: String,
    /// Task type, recorded as the child's trigger type.
    #[serde(rename = "type")]
    pub task_type: String,
    /// Address of the flow to launch.
    pub subflow: SubflowId,
}

impl SubflowTask {
    /// Creates a subflow-launching task.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        task_type: impl Into<String>,
        subflow: SubflowId,
    ) -> Self {
        Self {
            id: id.into(),
            task_type: task_type.into(),
            subflow,
        }
    }
}

/// A child execution seed paired with its RUNNING parent task run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubflowExecution {
    /// Identifier of the launching task.
    pub parent_task_id: String,
    /// The parent task run, moved to RUNNING.
    pub parent_task_run: TaskRun,
    /// The child execution seed.
    pub execution: Execution,
}

/// A child terminal event projected back onto the parent task run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubflowExecutionResult {
    /// Identifier of the child execution.
    pub execution_id: ExecutionId,
    /// The parent task run's state after the projection.
    pub state: State,
    /// The parent task run with the attempt appended.
    pub parent_task_run: TaskRun,
}

/// Resolves a flow's declared inputs against a supplied input map.
pub trait InputReader: Send + Sync + std::fmt::Debug {
    /// Reads the target flow's declared inputs for the given execution.
    ///
    /// # Errors
    ///
    /// Returns an error when required inputs are missing or malformed.
    fn read_inputs(
        &self,
        flow: &Flow,
        execution: &Execution,
        inputs: &Map<String, Value>,
    ) -> Result<Map<String, Value>>;
}

/// An input reader that passes the supplied map through unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct PassthroughInputReader;

impl InputReader for PassthroughInputReader {
    fn read_inputs(
        &self,
        _flow: &Flow,
        _execution: &Execution,
        inputs: &Map<String, Value>,
    ) -> Result<Map<String, Value>> {
        Ok(inputs.clone())
    }
}

/// Launches subflow executions on behalf of parent tasks.
#[derive(Debug)]
pub struct SubflowLauncher {
    flow_lookup: Arc<dyn FlowLookup>,
    input_reader: Arc<dyn InputReader>,
}

impl SubflowLauncher {
    /// Creates a launcher over the given collaborators.
    #[must_use]
    pub fn new(flow_lookup: Arc<dyn FlowLookup>, input_reader: Arc<dyn InputReader>) -> Self {
        Self {
            flow_lookup,
            input_reader,
        }
    }

    /// Builds the child execution seed for one subflow launch.
    ///
    /// Nothing is persisted here: the caller owns both the returned child
    /// seed and the RUNNING parent task run.
    ///
    /// # Errors
    ///
    /// - [`Error::FlowNotFound`] when the target flow cannot be resolved
    /// - [`Error::FlowDisabled`] / [`Error::InvalidFlow`] when it cannot run
    /// - [`Error::VariableRender`] when the subflow address does not render
    #[allow(clippy::too_many_arguments)]
    pub fn launch(
        &self,
        run_ctx: &RunContext,
        parent_execution: &Execution,
        parent_flow: &Flow,
        task: &SubflowTask,
        parent_task_run: &TaskRun,
        inputs: Map<String, Value>,
        labels: Vec<Label>,
        schedule_date: Option<DateTime<Utc>>,
    ) -> Result<SubflowExecution> {
        let namespace = run_ctx.render(&task.subflow.namespace)?;
        let flow_id = run_ctx.render(&task.subflow.flow_id)?;

        let flow = self
            .flow_lookup
            .find_by_id(
                parent_execution.tenant_id.as_deref(),
                &namespace,
                &flow_id,
                task.subflow.revision,
                parent_execution.tenant_id.as_deref(),
                &parent_flow.namespace,
                &parent_flow.id,
            )
            .ok_or_else(|| Error::FlowNotFound {
                namespace: namespace.clone(),
                flow_id: flow_id.clone(),
                revision: task.subflow.revision,
            })?;

        if flow.disabled {
            return Err(Error::FlowDisabled {
                namespace: flow.namespace,
                flow_id: flow.id,
            });
        }
        if let Some(exception) = flow.exception.clone() {
            return Err(Error::InvalidFlow {
                namespace: flow.namespace,
                flow_id: flow.id,
                message: exception,
            });
        }

        // Only system labels cross the parent/child boundary; the caller's
        // labels land last so they win on duplicate keys.
        let mut child_labels: Vec<Label> = parent_execution
            .labels
            .iter()
            .filter(|l| l.is_system())
            .cloned()
            .collect();
        if !child_labels.iter().any(Label::is_correlation_id) {
            child_labels.push(Label::correlation_id(parent_execution.id.to_string()));
        }
        child_labels.extend(labels);

        let mut trigger_variables = Map::new();
        trigger_variables.insert(
            "executionId".to_string(),
            Value::String(parent_execution.id.to_string()),
        );
        trigger_variables.insert(
            "namespace".to_string(),
            Value::String(parent_flow.namespace.clone()),
        );
        trigger_variables.insert("flowId".to_string(), Value::String(parent_flow.id.clone()));
        trigger_variables.insert(
            "flowRevision".to_string(),
            Value::Number(parent_flow.revision.into()),
        );

        let mut execution = Execution::new(flow.namespace.clone(), flow.id.clone(), flow.revision)
            .with_labels(child_labels)
            .with_trigger(
                ExecutionTrigger::new(task.id.clone(), task.task_type.clone())
                    .with_variables(trigger_variables),
            )
            .with_schedule_date(schedule_date);
        if let Some(tenant_id) = flow.tenant_id.clone() {
            execution = execution.with_tenant(tenant_id);
        }
        execution.inputs = self.input_reader.read_inputs(&flow, &execution, &inputs)?;

        counter!(metric_names::SUBFLOW_LAUNCHES_TOTAL).increment(1);

        Ok(SubflowExecution {
            parent_task_id: task.id.clone(),
            parent_task_run: parent_task_run.clone().with_state(State::Running)?,
            execution,
        })
    }
}

/// Projects a parent task run into a child-completion result, recording the
/// current state as a new attempt.
#[must_use]
pub fn subflow_execution_result(
    parent_task_run: TaskRun,
    execution: &Execution,
) -> SubflowExecutionResult {
    let mut parent_task_run = parent_task_run;
    parent_task_run.attempts.push(TaskRunAttempt {
        state: parent_task_run.state.clone(),
    });
    SubflowExecutionResult {
        execution_id: execution.id,
        state: parent_task_run.state.current(),
        parent_task_run,
    }
}
