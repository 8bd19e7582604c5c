//! Parallelism sweeps.

use buildload_core::{aggregate, JobTemplate, SeriesResult};

use crate::error::EngineError;
use crate::events::LoadEvent;
use crate::orchestrator::Orchestrator;

/// Entity label of the result sets produced by build run series.
pub const BUILDRUN_ENTITY: &str = "buildrun";

/// Runs the orchestrator at increasing parallelism levels.
#[derive(Clone)]
pub struct SeriesDriver {
    orchestrator: Orchestrator,
}

impl SeriesDriver {
    pub fn new(orchestrator: Orchestrator) -> Self {
        Self { orchestrator }
    }

    /// Run every level `start, start + increment, ...` up to and including
    /// `end` (when reachable), strictly one after another.
    ///
    /// The first failing level aborts the series with
    /// [`EngineError::SeriesAborted`], which carries the result sets of the
    /// levels completed before it.
    pub async fn run_series(
        &self,
        template: &JobTemplate,
        start: usize,
        end: usize,
        increment: usize,
    ) -> Result<SeriesResult, EngineError> {
        validate_range(start, end, increment)?;

        let mut results = Vec::new();
        let mut level = start;

        while level <= end {
            tracing::info!(level, "Running parallel level");

            let outcome = match self.orchestrator.run_parallel(template, level).await {
                Ok(timings) => {
                    aggregate(&timings, BUILDRUN_ENTITY).map_err(EngineError::AggregationPrecondition)
                }
                Err(e) => Err(e),
            };

            match outcome {
                Ok(result) => {
                    tracing::info!(level, median = %result.median, "Parallel level completed");
                    self.orchestrator
                        .controller()
                        .events()
                        .publish(LoadEvent::LevelCompleted {
                            level,
                            result: result.clone(),
                        });
                    results.push(result);
                }
                Err(source) => {
                    return Err(EngineError::SeriesAborted {
                        level,
                        completed: results,
                        source: Box::new(source),
                    });
                }
            }

            level = match level.checked_add(increment) {
                Some(next) => next,
                None => break,
            };
        }

        Ok(results)
    }
}

fn validate_range(start: usize, end: usize, increment: usize) -> Result<(), EngineError> {
    if start == 0 || end == 0 || increment == 0 || start > end {
        return Err(EngineError::InvalidSeriesRange {
            start,
            end,
            increment,
        });
    }
    Ok(())
}

/// Levels a series with this range would run.
pub fn series_levels(start: usize, end: usize, increment: usize) -> Vec<usize> {
    if validate_range(start, end, increment).is_err() {
        return Vec::new();
    }
    (start..=end).step_by(increment).collect()
}
