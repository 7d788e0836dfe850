//! Progress-callback trait for per-unit run events.
//!
//! Inject an [`Arc<dyn RunProgress>`] via
//! [`crate::config::RunConfigBuilder::progress_callback`] to receive
//! real-time events as the driver works through the unit queue.
//!
//! # Why callbacks instead of channels?
//!
//! The callback approach is the least-invasive integration point: callers can
//! forward events to a channel, a UI, a database record, or a terminal
//! progress bar - without the library knowing anything about how the host
//! application communicates. (The [`crate::stream`] module does exactly that
//! forwarding for callers who prefer a `Stream`.)
//!
//! Hooks are called from the driver's own task and must return promptly; a
//! blocking hook stalls the pipeline.

use crate::driver::RunReport;
use crate::error::ProcessFailure;
use std::sync::Arc;

/// Called by the driver as it works through the unit queue.
///
/// All methods have default no-op implementations so callers only override
/// what they care about. The driver is single-threaded, so hooks are never
/// called concurrently - but the trait is `Send + Sync` because the driver
/// task may itself be spawned.
pub trait RunProgress: Send + Sync {
    /// Called once before any unit is submitted.
    ///
    /// `pending_units` is the number of units this run will actually process
    /// (units already persisted by a previous run are excluded).
    fn on_run_start(&self, pending_units: usize) {
        let _ = pending_units;
    }

    /// Called just before a unit is submitted on a fresh session.
    fn on_unit_start(&self, ordinal: usize, total_units: usize) {
        let _ = (ordinal, total_units);
    }

    /// Called when a unit's transformed text has been durably appended.
    fn on_unit_complete(&self, ordinal: usize, total_units: usize) {
        let _ = (ordinal, total_units);
    }

    /// Called when a submission failed and the unit will be retried on a new
    /// session. `attempt` counts failures of this unit so far (1-based).
    fn on_unit_retry(&self, ordinal: usize, attempt: u32, failure: &ProcessFailure) {
        let _ = (ordinal, attempt, failure);
    }

    /// Called once after the run reaches a terminal state, with the final
    /// report. Not called when the run ends in a fatal error.
    fn on_run_complete(&self, report: &RunReport) {
        let _ = report;
    }
}

/// A no-op implementation for callers that don't need progress events.
pub struct NoopRunProgress;

impl RunProgress for NoopRunProgress {}

/// Convenience alias matching the type stored in [`crate::config::RunConfig`].
pub type ProgressCallback = Arc<dyn RunProgress>;
