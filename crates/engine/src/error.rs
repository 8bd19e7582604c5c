//! Engine error taxonomy.
//!
//! Submission, registration and completion failures fail the run they belong
//! to. [`EngineError::LookupFailed`] and [`EngineError::CleanupFailed`] are
//! only ever logged as warnings; they never become a run's result.

use std::fmt::Write as _;
use std::time::Duration;

use buildload_controlplane::ControlPlaneError;
use buildload_core::{CoreError, Diagnostics, SeriesResult, StageTiming};

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Creating the job or run was refused or did not reach the platform.
    #[error("Failed to submit {kind} {name}: {source}")]
    SubmissionFailed {
        kind: &'static str,
        name: String,
        #[source]
        source: ControlPlaneError,
    },

    /// A same-named resource from an earlier run could not be removed.
    #[error("Existing {kind} {name} was not removed within {timeout:?}")]
    StaleResource {
        kind: &'static str,
        name: String,
        timeout: Duration,
    },

    #[error("Build {name} was rejected: {reason}: {message}")]
    RegistrationRejected {
        name: String,
        reason: String,
        message: String,
    },

    #[error("Build {name} was not registered within {timeout:?}")]
    RegistrationTimeout { name: String, timeout: Duration },

    /// The run reached a failed condition. Diagnostics are rendered verbatim.
    #[error("BuildRun {name} failed: {reason}: {message}{}", render_diagnostics(.diagnostics))]
    RunFailed {
        name: String,
        reason: String,
        message: String,
        diagnostics: Diagnostics,
    },

    #[error("BuildRun {name} did not complete within {timeout:?}")]
    RunTimeout { name: String, timeout: Duration },

    /// Polling the status of a resource failed.
    #[error("Failed to observe {kind} {name}: {source}")]
    StatusUnavailable {
        kind: &'static str,
        name: String,
        #[source]
        source: ControlPlaneError,
    },

    /// A sub-resource lookup failed. Degrades the timing, never fatal.
    #[error("Failed to look up {kind} of {name}: {source}")]
    LookupFailed {
        kind: &'static str,
        name: String,
        #[source]
        source: ControlPlaneError,
    },

    /// Releasing a resource failed. Logged only.
    #[error("Failed to clean up {kind} {name}: {message}")]
    CleanupFailed {
        kind: &'static str,
        name: String,
        message: String,
    },

    #[error("Cannot aggregate results: {0}")]
    AggregationPrecondition(#[source] CoreError),

    #[error("Invalid job template: {0}")]
    JobTemplate(#[source] CoreError),

    /// A worker task ended without producing a result.
    #[error("Worker {index} aborted: {message}")]
    WorkerAborted { index: usize, message: String },

    /// One or more workers of a parallel run failed.
    #[error("{} of {total} parallel runs failed:{}", .failures.len(), render_failures(.failures))]
    ParallelRunFailed {
        total: usize,
        /// Timings of the workers that succeeded, in worker order.
        completed: Vec<StageTiming>,
        /// Every failure with the index of the worker it belongs to.
        failures: Vec<(usize, EngineError)>,
    },

    #[error("Series aborted at parallel level {level} after {} completed level(s): {source}", .completed.len())]
    SeriesAborted {
        level: usize,
        completed: SeriesResult,
        source: Box<EngineError>,
    },

    #[error("Invalid series range: start={start}, end={end}, increment={increment}")]
    InvalidSeriesRange {
        start: usize,
        end: usize,
        increment: usize,
    },

    #[error("Invalid test plan: {0}")]
    InvalidTestPlan(String),

    #[error("Test plan aborted at step {step} after {} completed step(s): {source}", .completed.len())]
    TestPlanAborted {
        step: String,
        completed: Vec<StageTiming>,
        source: Box<EngineError>,
    },

    #[error("Build strategy {name} not found, available strategies: {}", .available.join(", "))]
    StrategyNotFound {
        name: String,
        available: Vec<String>,
    },
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::InvalidTestPlan(err.to_string())
    }
}

fn render_diagnostics(diagnostics: &Diagnostics) -> String {
    if diagnostics.is_empty() {
        String::new()
    } else {
        format!("\n\n{diagnostics}")
    }
}

fn render_failures(failures: &[(usize, EngineError)]) -> String {
    let mut out = String::new();
    for (index, err) in failures {
        let _ = write!(out, "\n  [{index}] {err}");
    }
    out
}
