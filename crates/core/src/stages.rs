//! Stage decomposition of a run's latency.
//!
//! [`decompose`] turns the absolute timestamps of a [`RunRecord`] into named
//! stage durations. A stage is omitted when either of its timestamps is
//! missing. Negative deltas (clock skew between components, or events that
//! were recorded out of order) are clamped to zero and reported as
//! [`SkewWarning`]s.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::record::RunRecord;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// A named segment of a run's end-to-end latency.
///
/// The declaration order is the canonical display order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Stage {
    /// Job creation until the platform registered the job.
    RegistrationTime,
    /// Run creation until run completion.
    RunCompletionTime,
    /// Run creation until sub-run creation.
    RunControlTime,
    /// Sub-run start until sub-run completion.
    SubRunCompletionTime,
    /// Sub-run start until execution unit start.
    SubRunControlTime,
    /// Execution unit start until its last container finished.
    UnitCompletionTime,
    /// Run start until execution unit start.
    UnitControlTime,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::RegistrationTime,
        Stage::RunCompletionTime,
        Stage::RunControlTime,
        Stage::SubRunCompletionTime,
        Stage::SubRunControlTime,
        Stage::UnitCompletionTime,
        Stage::UnitControlTime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::RegistrationTime => "RegistrationTime",
            Self::RunCompletionTime => "RunCompletionTime",
            Self::RunControlTime => "RunControlTime",
            Self::SubRunCompletionTime => "SubRunCompletionTime",
            Self::SubRunControlTime => "SubRunControlTime",
            Self::UnitCompletionTime => "UnitCompletionTime",
            Self::UnitControlTime => "UnitControlTime",
        }
    }

    /// Longer label for reports.
    pub fn description(self) -> &'static str {
        match self {
            Self::RegistrationTime => "job creation until registered",
            Self::RunCompletionTime => "run creation until completion",
            Self::RunControlTime => "run creation until sub-run creation",
            Self::SubRunCompletionTime => "sub-run start until completion",
            Self::SubRunControlTime => "sub-run start until unit start",
            Self::UnitCompletionTime => "unit start until last container finished",
            Self::UnitControlTime => "run start until unit start",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// StageTiming
// ---------------------------------------------------------------------------

/// Ordered mapping from stage to its (non-negative) duration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageTiming(BTreeMap<Stage, Duration>);

impl StageTiming {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: Stage, duration: Duration) {
        self.0.insert(stage, duration);
    }

    pub fn get(&self, stage: Stage) -> Option<Duration> {
        self.0.get(&stage).copied()
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.0.contains_key(&stage)
    }

    /// Stages in canonical order.
    pub fn iter(&self) -> impl Iterator<Item = (Stage, Duration)> + '_ {
        self.0.iter().map(|(stage, duration)| (*stage, *duration))
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        self.0.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(Stage, Duration)> for StageTiming {
    fn from_iter<I: IntoIterator<Item = (Stage, Duration)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl fmt::Display for StageTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (stage, duration)) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{stage}={duration:?}")?;
        }
        Ok(())
    }
}

/// Serialized as `{"<Stage>": <milliseconds>}`.
impl Serialize for StageTiming {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            self.iter()
                .map(|(stage, duration)| (stage.name(), duration.as_millis() as u64)),
        )
    }
}

// ---------------------------------------------------------------------------
// Decomposition
// ---------------------------------------------------------------------------

/// A stage whose end was observed before its start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkewWarning {
    pub stage: Stage,
    pub start: Timestamp,
    pub end: Timestamp,
}

impl fmt::Display for SkewWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: start {} is after end {}, using zero as the duration",
            self.stage,
            self.start.to_rfc3339(),
            self.end.to_rfc3339(),
        )
    }
}

/// Output of [`decompose`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decomposition {
    pub timing: StageTiming,
    pub warnings: Vec<SkewWarning>,
}

/// Compute all stage durations a record has both timestamps for.
pub fn decompose(record: &RunRecord) -> Decomposition {
    let spans = [
        (Stage::RegistrationTime, record.job_created, record.job_registered),
        (Stage::RunCompletionTime, record.run_created, record.run_completed),
        (Stage::RunControlTime, record.run_created, record.sub_run_created),
        (Stage::SubRunCompletionTime, record.sub_run_started, record.sub_run_completed),
        (Stage::SubRunControlTime, record.sub_run_started, record.unit_started),
        (Stage::UnitCompletionTime, record.unit_started, record.unit_finished),
        (Stage::UnitControlTime, record.run_started, record.unit_started),
    ];

    let mut decomposition = Decomposition::default();

    for (stage, start, end) in spans {
        let (Some(start), Some(end)) = (start, end) else {
            continue;
        };

        let duration = match (end - start).to_std() {
            Ok(duration) => duration,
            Err(_) => {
                let warning = SkewWarning { stage, start, end };
                tracing::warn!(stage = %stage, "{warning}");
                decomposition.warnings.push(warning);
                Duration::ZERO
            }
        };

        decomposition.timing.insert(stage, duration);
    }

    decomposition
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
