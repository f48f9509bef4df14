//! Execution and task-run states.
//!
//! This module provides:
//! - `State`: the shared state machine for executions and task runs
//! - `StateHistory`: the ordered `(state, at)` sequence whose last entry is
//!   the current state
//!
//! The only structural rule is that a terminal state can never be followed by
//! a non-terminal one; re-entering the same state is a no-op so that event
//! redelivery stays harmless.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Error returned when a state name cannot be parsed.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown state '{value}'")]
pub struct ParseStateError {
    /// The rejected value.
    pub value: String,
}

/// The state of an execution or task run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    /// Created but not yet started.
    Created,
    /// Currently executing.
    Running,
    /// Suspended, waiting to be resumed.
    Paused,
    /// Stopped by an explicit kill.
    Killed,
    /// Completed with warnings.
    Warning,
    /// Completed with an error.
    Failed,
    /// Completed successfully.
    Success,
    /// Cancelled before completion.
    Cancelled,
}

impl State {
    /// The terminal states, in collapse-priority order.
    pub const TERMINAL: [Self; 5] = [
        Self::Success,
        Self::Failed,
        Self::Killed,
        Self::Warning,
        Self::Cancelled,
    ];

    /// Returns true if this is a terminal state.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Success | Self::Failed | Self::Killed | Self::Warning | Self::Cancelled
        )
    }

    /// Returns true if this state reports a failure.
    #[must_use]
    pub const fn is_failed(&self) -> bool {
        matches!(self, Self::Failed)
    }

    /// Returns true if this state is suspended.
    #[must_use]
    pub const fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Returns true if this state is actively executing.
    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    /// Returns a lowercase label suitable for metrics and logs.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Killed => "killed",
            Self::Warning => "warning",
            Self::Failed => "failed",
            Self::Success => "success",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "CREATED"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Killed => write!(f, "KILLED"),
            Self::Warning => write!(f, "WARNING"),
            Self::Failed => write!(f, "FAILED"),
            Self::Success => write!(f, "SUCCESS"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl FromStr for State {
    type Err = ParseStateError;

    fn from_str(s: &str) -> std::result::Result<Self, ParseStateError> {
        match s {
            "CREATED" => Ok(Self::Created),
            "RUNNING" => Ok(Self::Running),
            "PAUSED" => Ok(Self::Paused),
            "KILLED" => Ok(Self::Killed),
            "WARNING" => Ok(Self::Warning),
            "FAILED" => Ok(Self::Failed),
            "SUCCESS" => Ok(Self::Success),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(ParseStateError {
                value: other.to_string(),
            }),
        }
    }
}

/// One entry in a state history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    /// The state entered.
    pub state: State,
    /// When it was entered.
    pub at: DateTime<Utc>,
}

/// Ordered sequence of states; the last entry is the current state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateHistory {
    histories: Vec<StateEntry>,
}

impl StateHistory {
    /// Creates a new history starting in `CREATED`.
    #[must_use]
    pub fn new() -> Self {
        Self::starting_in(State::Created)
    }

    /// Creates a new history starting in the given state.
    #[must_use]
    pub fn starting_in(state: State) -> Self {
        Self {
            histories: vec![StateEntry {
                state,
                at: Utc::now(),
            }],
        }
    }

    /// The current state.
    #[must_use]
    pub fn current(&self) -> State {
        // Construction guarantees at least one entry.
        self.histories.last().map_or(State::Created, |e| e.state)
    }

    /// The state immediately before the current one, if any.
    #[must_use]
    pub fn previous(&self) -> Option<State> {
        if self.histories.len() > 1 {
            self.histories
                .get(self.histories.len() - 2)
                .map(|e| e.state)
        } else {
            None
        }
    }

    /// All entries, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[StateEntry] {
        &self.histories
    }

    /// Returns true if the current state is terminal.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.current().is_terminal()
    }

    /// Appends a state.
    ///
    /// Re-entering the current state is a no-op. A terminal state cannot be
    /// followed by a non-terminal one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` when leaving a terminal state.
    pub fn push(&mut self, state: State) -> Result<()> {
        let current = self.current();
        if current == state {
            return Ok(());
        }
        if current.is_terminal() && !state.is_terminal() {
            return Err(Error::InvalidStateTransition {
                from: current.to_string(),
                to: state.to_string(),
            });
        }
        self.histories.push(StateEntry {
            state,
            at: Utc::now(),
        });
        Ok(())
    }

    /// Returns a copy of this history with `state` appended.
    ///
    /// # Errors
    ///
    /// Returns `InvalidStateTransition` when leaving a terminal state.
    pub fn with_state(mut self, state: State) -> Result<Self> {
        self.push(state)?;
        Ok(self)
    }
}

impl Default for StateHistory {
    fn default() -> Self {
        Self::new()
    }
}
