//! Pure domain logic for the build load generator.
//!
//! Holds the build/run descriptions submitted to the control plane, the
//! per-run timestamp record, stage decomposition, and the statistics that
//! reduce many runs into a single [`ResultSet`]. Nothing in this crate
//! performs I/O.

pub mod error;
pub mod job;
pub mod record;
pub mod stages;
pub mod statistics;
pub mod types;

pub use error::CoreError;
pub use job::{
    BuildKind, IdentityRequest, JobSpec, JobTemplate, OutputTarget, RunOptions, RunRequest,
    SourceSpec,
};
pub use record::{Diagnostics, RunOutcome, RunRecord};
pub use stages::{decompose, Decomposition, SkewWarning, Stage, StageTiming};
pub use statistics::{aggregate, ResultSet, SeriesResult};
pub use types::Timestamp;
