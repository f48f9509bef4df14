//! User-driven backfills over historical date ranges.
//!
//! A backfill replays a schedule between `start` and `end`. The cursor
//! (`current_date`) only moves forward; once it passes `end` the backfill is
//! complete and the trigger reverts to live evaluation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tiller_core::Label;

use crate::error::{Error, Result};

/// Replay of a schedule over a historical date range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Backfill {
    /// Start of the replayed range (inclusive).
    pub start: DateTime<Utc>,
    /// End of the replayed range (inclusive).
    pub end: DateTime<Utc>,
    /// Cursor of the next fire to replay; advances monotonically.
    pub current_date: DateTime<Utc>,
    /// Paused backfills are not evaluated.
    #[serde(default)]
    pub paused: bool,
    /// Labels stamped on every replayed execution (values renderable).
    #[serde(default)]
    pub labels: Vec<Label>,
    /// Inputs overriding the trigger's own inputs on replayed executions.
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

impl Backfill {
    /// Creates a backfill over `[start, end]` with the cursor on `start`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBackfill`] when `start > end`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start > end {
            return Err(Error::InvalidBackfill {
                message: format!("start {start} is after end {end}"),
            });
        }
        Ok(Self {
            start,
            end,
            current_date: start,
            paused: false,
            labels: Vec::new(),
            inputs: Map::new(),
        })
    }

    /// Sets the backfill labels.
    #[must_use]
    pub fn with_labels(mut self, labels: Vec<Label>) -> Self {
        self.labels = labels;
        self
    }

    /// Sets the backfill inputs.
    #[must_use]
    pub fn with_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Pauses the backfill.
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resumes a paused backfill.
    pub fn resume(&mut self) {
        self.paused = false;
    }

    /// Moves the cursor to `next`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidBackfill`] when the cursor would move
    /// backwards.
    pub fn advance(&mut self, next: DateTime<Utc>) -> Result<()> {
        if next < self.current_date {
            return Err(Error::InvalidBackfill {
                message: format!(
                    "cursor must advance monotonically: {next} is before {}",
                    self.current_date
                ),
            });
        }
        self.current_date = next;
        Ok(())
    }

    /// Returns true once the cursor has passed the end of the range.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.current_date > self.end
    }
}
