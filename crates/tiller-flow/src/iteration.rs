//! Fan-out batch accounting.
//!
//! A parent task that fans out launches `numberOfBatches` child executions
//! and stores the batch count once in its own outputs. Every child state
//! transition comes back as a task-run update carrying the child's state;
//! this module folds those updates into per-state counters and collapses
//! them into a single terminal parent state once every batch has finished.
//!
//! Each batch occupies exactly one counter slot at any time: entering a
//! state increments it, and the state it left is decremented. A state that
//! was never counted before decrements from `numberOfBatches`, which stands
//! in for the implicit initial occupancy of the starting state. The
//! transient sum can therefore exceed the batch count mid-flight; only the
//! terminal states are summed for convergence.
//!
//! Redelivery of the same `(child, state)` tuple without an intervening
//! transition must be filtered by the caller's event-dedup layer; the fold
//! itself assumes per-child ordered delivery.

use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::execution::{Execution, TaskRun, TaskRunAttempt};
use crate::metrics::{labels as metric_labels, names as metric_names};
use crate::state::State;
use crate::storage::Storage;

/// Output key holding the per-state batch counters.
pub const OUTPUT_ITERATIONS: &str = "iterations";
/// Output key holding the total number of batches.
pub const OUTPUT_NUMBER_OF_BATCHES: &str = "numberOfBatches";
/// Output key holding the base URI of the merged subflow outputs.
pub const OUTPUT_SUBFLOW_OUTPUTS_BASE_URI: &str = "subflowOutputsBaseUri";

/// Per-state batch counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IterationCounters(BTreeMap<State, i64>);

impl IterationCounters {
    /// The count for one state (zero when absent).
    #[must_use]
    pub fn get(&self, state: State) -> i64 {
        self.0.get(&state).copied().unwrap_or(0)
    }

    /// Counts one batch entering `state`.
    pub fn increment(&mut self, state: State) {
        *self.0.entry(state).or_insert(0) += 1;
    }

    /// Counts one batch leaving `state`.
    ///
    /// A state that was never counted starts from `default`, standing in
    /// for the implicit initial occupancy of the starting state.
    pub fn decrement_or(&mut self, state: State, default: i64) {
        let count = self.0.get(&state).copied().unwrap_or(default);
        self.0.insert(state, count - 1);
    }

    /// Sum of the terminal-state counters.
    #[must_use]
    pub fn terminated(&self) -> i64 {
        State::TERMINAL.iter().map(|s| self.get(*s)).sum()
    }

    /// The counters as a `state name -> count` map.
    #[must_use]
    pub fn counts(&self) -> &BTreeMap<State, i64> {
        &self.0
    }

    /// Renders the counters as a JSON output value.
    #[must_use]
    pub fn to_output(&self) -> Value {
        let mut map = Map::new();
        for (state, count) in &self.0 {
            map.insert(state.to_string(), Value::from(*count));
        }
        Value::Object(map)
    }

    /// Parses counters back from a task-run output value.
    fn from_output(value: &Value) -> Option<Self> {
        let object = value.as_object()?;
        let mut counters = BTreeMap::new();
        for (key, count) in object {
            counters.insert(key.parse().ok()?, count.as_i64()?);
        }
        Some(Self(counters))
    }
}

impl FromIterator<(State, i64)> for IterationCounters {
    fn from_iter<I: IntoIterator<Item = (State, i64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Folds one child state transition into the parent task run.
///
/// Loads the persisted parent task run from `execution`, applies the
/// incoming transition to the counters, and either returns the parent with
/// updated counters (still running) or, once every batch has terminated,
/// with the collapsed terminal state, a new attempt, and the merged-output
/// base URI recorded.
///
/// # Errors
///
/// - [`Error::MissingParentTaskRun`] when the parent was never persisted
/// - [`Error::InvalidTaskRunOutputs`] when the batch count or counters are
///   missing or malformed
pub fn manage_iterations(
    storage: &dyn Storage,
    task_run: &TaskRun,
    execution: &Execution,
    transmit_failed: bool,
    allow_failure: bool,
    allow_warning: bool,
) -> Result<TaskRun> {
    let persisted = execution
        .find_task_run(task_run.id)
        .ok_or(Error::MissingParentTaskRun {
            task_run_id: task_run.id,
        })?;
    let number_of_batches = persisted
        .outputs
        .get(OUTPUT_NUMBER_OF_BATCHES)
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::InvalidTaskRunOutputs {
            task_run_id: task_run.id,
            message: format!("missing '{OUTPUT_NUMBER_OF_BATCHES}' output"),
        })?;

    let mut iterations = match persisted.outputs.get(OUTPUT_ITERATIONS) {
        Some(value) => IterationCounters::from_output(value).ok_or_else(|| {
            Error::InvalidTaskRunOutputs {
                task_run_id: task_run.id,
                message: format!("malformed '{OUTPUT_ITERATIONS}' output"),
            }
        })?,
        None => IterationCounters::default(),
    };

    let current_state = task_run.state.current();
    iterations.increment(current_state);
    if let Some(previous_state) = task_run.state.previous() {
        if previous_state != current_state {
            iterations.decrement_or(previous_state, number_of_batches);
        }
    }

    if iterations.terminated() == number_of_batches {
        let state = if transmit_failed {
            find_terminal_state(&iterations, allow_failure, allow_warning)
        } else {
            State::Success
        };
        counter!(
            metric_names::ITERATION_CONVERGENCES_TOTAL,
            metric_labels::STATE => state.as_label().to_string(),
        )
        .increment(1);

        let mut outputs = Map::new();
        outputs.insert(OUTPUT_ITERATIONS.to_string(), iterations.to_output());
        outputs.insert(
            OUTPUT_NUMBER_OF_BATCHES.to_string(),
            Value::from(number_of_batches),
        );
        outputs.insert(
            OUTPUT_SUBFLOW_OUTPUTS_BASE_URI.to_string(),
            Value::String(storage.context_base_uri()),
        );

        let mut converged = persisted.clone();
        converged.iteration = task_run.iteration;
        converged.outputs = outputs;
        converged.attempts = vec![TaskRunAttempt::with_state(state)];
        converged.state = converged.state.with_state(state)?;
        return Ok(converged);
    }

    let mut outputs = Map::new();
    outputs.insert(OUTPUT_ITERATIONS.to_string(), iterations.to_output());
    outputs.insert(
        OUTPUT_NUMBER_OF_BATCHES.to_string(),
        Value::from(number_of_batches),
    );

    let mut in_progress = persisted.clone();
    in_progress.iteration = task_run.iteration;
    in_progress.outputs = outputs;
    Ok(in_progress)
}

/// Collapses per-state counters into the parent's terminal state.
///
/// Priority: FAILED over KILLED over WARNING over SUCCESS. `allow_failure`
/// downgrades failures to WARNING, and `allow_warning` further downgrades
/// warnings to SUCCESS.
#[must_use]
pub fn find_terminal_state(
    iterations: &IterationCounters,
    allow_failure: bool,
    allow_warning: bool,
) -> State {
    if iterations.get(State::Failed) > 0 {
        return if allow_failure {
            if allow_warning {
                State::Success
            } else {
                State::Warning
            }
        } else {
            State::Failed
        };
    }
    if iterations.get(State::Killed) > 0 {
        return State::Killed;
    }
    if iterations.get(State::Warning) > 0 {
        return if allow_warning {
            State::Success
        } else {
            State::Warning
        };
    }
    State::Success
}

/// Collapses a single child execution's state onto its parent task.
///
/// Used when a task launches exactly one subflow: with `transmit_failed`
/// the child's failed, paused, killed, or warning state is reported
/// (upgraded FAILED to WARNING under `allowed_failure`, and WARNING to
/// SUCCESS under `allow_warning`); otherwise the parent reports SUCCESS.
#[must_use]
pub fn guess_state(
    execution: &Execution,
    transmit_failed: bool,
    allowed_failure: bool,
    allow_warning: bool,
) -> State {
    let current = execution.state.current();
    if transmit_failed
        && (current.is_failed()
            || current.is_paused()
            || current == State::Killed
            || current == State::Warning)
    {
        let state = if allowed_failure && current.is_failed() {
            State::Warning
        } else {
            current
        };
        if state == State::Warning && allow_warning {
            State::Success
        } else {
            state
        }
    } else {
        State::Success
    }
}
