//! Observability metrics for the execution core.
//!
//! Metrics are exported through the `metrics` crate facade; the embedding
//! runtime decides how to install a recorder (e.g. a Prometheus exporter).
//!
//! ## Metrics Exported
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `tiller_flow_trigger_evaluations_total` | Counter | `trigger`, `status` | Trigger evaluations by outcome |
//! | `tiller_flow_trigger_evaluate_seconds` | Histogram | - | Trigger evaluation duration |
//! | `tiller_flow_subflow_launches_total` | Counter | - | Subflow executions launched |
//! | `tiller_flow_iteration_convergences_total` | Counter | `state` | Fan-out convergences by terminal state |

use std::time::{Duration, Instant};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Trigger evaluations by outcome.
    pub const TRIGGER_EVALUATIONS_TOTAL: &str = "tiller_flow_trigger_evaluations_total";
    /// Histogram: Trigger evaluation duration in seconds.
    pub const TRIGGER_EVALUATE_SECONDS: &str = "tiller_flow_trigger_evaluate_seconds";
    /// Counter: Subflow executions launched.
    pub const SUBFLOW_LAUNCHES_TOTAL: &str = "tiller_flow_subflow_launches_total";
    /// Counter: Fan-out convergences by terminal state.
    pub const ITERATION_CONVERGENCES_TOTAL: &str = "tiller_flow_iteration_convergences_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Trigger kind (currently always `schedule`).
    pub const TRIGGER: &str = "trigger";
    /// Outcome status (triggered, skipped, failed).
    pub const STATUS: &str = "status";
    /// Terminal state label.
    pub const STATE: &str = "state";
}

/// RAII guard for timing operations.
///
/// Automatically records duration when dropped.
pub struct TimingGuard<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> TimingGuard<F>
where
    F: FnOnce(Duration),
{
    /// Creates a new timing guard that will call `on_drop` with the elapsed duration.
    pub fn new(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    /// Returns the elapsed time since the guard was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl<F> Drop for TimingGuard<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}
