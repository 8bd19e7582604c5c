//! Fan-out of many lifecycle runs.
//!
//! One tokio task per worker, no internal cap. Results are collected by
//! worker index, so the output order never depends on completion order.

use std::future::Future;

use buildload_core::{JobSpec, JobTemplate, RunOptions, RunRequest, StageTiming};
use tokio::task::JoinHandle;

use crate::error::EngineError;
use crate::lifecycle::LifecycleController;

/// Entity label of the result sets produced by registration-only runs.
pub const BUILD_ENTITY: &str = "build";

type Worker = JoinHandle<Result<StageTiming, EngineError>>;

/// Per-worker outcome of a parallel run, indexed by worker position.
#[derive(Debug)]
pub struct ParallelRun {
    slots: Vec<Result<StageTiming, EngineError>>,
}

impl ParallelRun {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slots(&self) -> &[Result<StageTiming, EngineError>] {
        &self.slots
    }

    pub fn failure_count(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_err()).count()
    }

    /// All timings, or [`EngineError::ParallelRunFailed`] carrying the
    /// successful timings and every indexed failure.
    pub fn into_result(self) -> Result<Vec<StageTiming>, EngineError> {
        let total = self.slots.len();
        let mut completed = Vec::with_capacity(total);
        let mut failures = Vec::new();

        for (index, slot) in self.slots.into_iter().enumerate() {
            match slot {
                Ok(timing) => completed.push(timing),
                Err(e) => failures.push((index, e)),
            }
        }

        if failures.is_empty() {
            Ok(completed)
        } else {
            Err(EngineError::ParallelRunFailed {
                total,
                completed,
                failures,
            })
        }
    }
}

/// Runs one [`LifecycleController`] invocation per worker concurrently.
#[derive(Clone)]
pub struct Orchestrator {
    controller: LifecycleController,
}

impl Orchestrator {
    pub fn new(controller: LifecycleController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &LifecycleController {
        &self.controller
    }

    /// Build and run `parallel` jobs derived from `template` at once.
    pub async fn run_parallel(
        &self,
        template: &JobTemplate,
        parallel: usize,
    ) -> Result<Vec<StageTiming>, EngineError> {
        self.run_slots(template, parallel).await.into_result()
    }

    /// Like [`Orchestrator::run_parallel`], keeping every worker's slot.
    pub async fn run_slots(&self, template: &JobTemplate, parallel: usize) -> ParallelRun {
        tracing::info!(parallel, strategy = %template.strategy, "Starting parallel build runs");
        self.fan_out(template, parallel, |controller, job, run, options| async move {
            controller.run_once(&job, &run, options).await
        })
        .await
    }

    /// Register `count` jobs derived from `template` at once, without running them.
    pub async fn register_parallel(
        &self,
        template: &JobTemplate,
        count: usize,
    ) -> Result<Vec<StageTiming>, EngineError> {
        tracing::info!(count, strategy = %template.strategy, "Starting parallel build registrations");
        self.fan_out(template, count, |controller, job, _run, options| async move {
            controller.register_once(&job, options).await
        })
        .await
        .into_result()
    }

    async fn fan_out<F, Fut>(&self, template: &JobTemplate, parallel: usize, work: F) -> ParallelRun
    where
        F: Fn(LifecycleController, JobSpec, RunRequest, RunOptions) -> Fut,
        Fut: Future<Output = Result<StageTiming, EngineError>> + Send + 'static,
    {
        let workers: Vec<Result<Worker, EngineError>> = (0..parallel)
            .map(|index| -> Result<Worker, EngineError> {
                let job = template
                    .job_spec(&template.worker_name(index))
                    .map_err(EngineError::JobTemplate)?;
                let run = template.run_request(&job);
                Ok(tokio::spawn(work(
                    self.controller.clone(),
                    job,
                    run,
                    template.options,
                )))
            })
            .collect();

        let mut slots = Vec::with_capacity(parallel);
        for (index, worker) in workers.into_iter().enumerate() {
            let slot = match worker {
                Ok(handle) => handle.await.unwrap_or_else(|e| {
                    Err(EngineError::WorkerAborted {
                        index,
                        message: e.to_string(),
                    })
                }),
                Err(e) => Err(e),
            };
            slots.push(slot);
        }

        ParallelRun { slots }
    }
}
