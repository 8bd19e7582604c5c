//! Per-run observation record.
//!
//! A [`RunRecord`] collects the absolute timestamps observed while one
//! build moves through the platform. It is owned by the lifecycle run that
//! fills it and discarded once its stage timing has been extracted.

use std::fmt;

use serde::Serialize;

use crate::types::Timestamp;

/// Terminal condition of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Succeeded,
    Failed,
    TimedOut,
}

/// Information captured from the platform when a run fails.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Diagnostics {
    /// Human-readable dump of the run status at the time of failure.
    pub status_snapshot: String,
    /// Container log lines, each prefixed with `[container]`.
    pub log_lines: Vec<String>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.status_snapshot.is_empty() && self.log_lines.is_empty()
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.status_snapshot.is_empty() {
            writeln!(f, "Run status")?;
            writeln!(f, "{}", self.status_snapshot.trim_end())?;
        }
        if !self.log_lines.is_empty() {
            if !self.status_snapshot.is_empty() {
                writeln!(f)?;
            }
            writeln!(f, "Execution unit container logs")?;
            for line in &self.log_lines {
                writeln!(f, "{line}")?;
            }
        }
        Ok(())
    }
}

/// Timestamps observed during one lifecycle run.
///
/// Every field is optional: sub-resources may not be locatable, in which
/// case the stages depending on them are omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunRecord {
    pub job_created: Option<Timestamp>,
    pub job_registered: Option<Timestamp>,
    pub run_created: Option<Timestamp>,
    pub run_started: Option<Timestamp>,
    pub run_completed: Option<Timestamp>,
    pub sub_run_created: Option<Timestamp>,
    pub sub_run_started: Option<Timestamp>,
    pub sub_run_completed: Option<Timestamp>,
    pub unit_created: Option<Timestamp>,
    /// When the first container of the execution unit started.
    pub unit_started: Option<Timestamp>,
    /// When the last container of the execution unit finished.
    pub unit_finished: Option<Timestamp>,
    pub outcome: Option<RunOutcome>,
    /// Only attached when the run failed.
    pub diagnostics: Option<Diagnostics>,
}
