//! Drives one build through the platform and measures it.
//!
//! `run_once` walks a linear state machine:
//!
//! 1. submit the job (removing a same-named leftover first),
//! 2. wait for the platform to register it,
//! 3. submit the run,
//! 4. wait for the run to finish, collecting diagnostics on failure,
//! 5. look up the sub-run and execution unit for their timestamps,
//! 6. decompose the timestamps into stages.
//!
//! Whatever was acquired along the way is released on every exit path
//! unless [`RunOptions::skip_cleanup`] is set.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use buildload_controlplane::{
    ControlPlane, ControlPlaneError, ImageRegistry, JobStatus, Registration, RunCondition,
    RunStatus,
};
use buildload_core::{
    decompose, JobSpec, RunOptions, RunOutcome, RunRecord, RunRequest, StageTiming, Timestamp,
};

use crate::config::EngineConfig;
use crate::diagnostics;
use crate::error::EngineError;
use crate::events::{EventSink, LoadEvent};
use crate::lookup::{locate_sub_run, locate_unit};
use crate::polling::{poll_until, PollError};

// ---------------------------------------------------------------------------
// Resource scope
// ---------------------------------------------------------------------------

/// Platform resources the controller creates and deletes by name.
#[derive(Debug, Clone, Copy)]
enum Resource {
    Job,
    Run,
}

impl Resource {
    fn kind(self) -> &'static str {
        match self {
            Self::Job => "Build",
            Self::Run => "BuildRun",
        }
    }
}

/// Resources acquired by one lifecycle run, released in reverse order.
struct ResourceScope<'a> {
    job: &'a JobSpec,
    job_created: bool,
    run: Option<&'a str>,
    /// Whether the run could have pushed an output image.
    artifact: bool,
}

impl<'a> ResourceScope<'a> {
    fn new(job: &'a JobSpec) -> Self {
        Self {
            job,
            job_created: false,
            run: None,
            artifact: false,
        }
    }

    /// Release run, then job, then output image. Failures are logged only.
    async fn release(self, controller: &LifecycleController) {
        if let Some(run) = self.run {
            if let Err(e) = controller.release_run(run).await {
                tracing::warn!(error = %e, "Cleanup step failed");
            }
        }

        if self.job_created {
            if let Err(e) = controller.release_job(&self.job.name).await {
                tracing::warn!(error = %e, "Cleanup step failed");
            }
        }

        if self.artifact {
            if let Err(e) = controller.release_artifact(self.job).await {
                tracing::warn!(error = %e, "Cleanup step failed");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

/// Executes single builds against a [`ControlPlane`].
///
/// Cheap to clone; every clone shares the same client, registry and event
/// sink.
#[derive(Clone)]
pub struct LifecycleController {
    client: Arc<dyn ControlPlane>,
    registry: Arc<dyn ImageRegistry>,
    config: EngineConfig,
    events: EventSink,
}

impl LifecycleController {
    pub fn new(
        client: Arc<dyn ControlPlane>,
        registry: Arc<dyn ImageRegistry>,
        config: EngineConfig,
        events: EventSink,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            events,
        }
    }

    pub fn client(&self) -> &dyn ControlPlane {
        self.client.as_ref()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Execute `job` once through `run` and return its stage timing.
    pub async fn run_once(
        &self,
        job: &JobSpec,
        run: &RunRequest,
        options: RunOptions,
    ) -> Result<StageTiming, EngineError> {
        self.events.publish(LoadEvent::RunStarted {
            name: run.name.clone(),
        });
        tracing::debug!(job = %job.name, run = %run.name, "Starting build run");

        let mut scope = ResourceScope::new(job);
        let mut record = RunRecord::default();
        let result = self.drive(job, run, &mut scope, &mut record).await;

        self.finish(&run.name, scope, options).await;

        if let Ok(timing) = &result {
            tracing::info!(run = %run.name, %timing, "Build run completed");
        }
        self.publish_outcome(&run.name, &result, record.outcome);
        result
    }

    async fn drive<'a>(
        &self,
        job: &'a JobSpec,
        run: &'a RunRequest,
        scope: &mut ResourceScope<'a>,
        record: &mut RunRecord,
    ) -> Result<StageTiming, EngineError> {
        let (created_at, registered_at) = self.submit_and_register(job, scope).await?;
        record.job_created = created_at;
        record.job_registered = Some(registered_at);

        self.remove_stale(Resource::Run, &run.name).await?;

        let handle = self
            .client
            .create_run(run)
            .await
            .map_err(|source| EngineError::SubmissionFailed {
                kind: "BuildRun",
                name: run.name.clone(),
                source,
            })?;
        scope.run = Some(&run.name);
        scope.artifact = true;
        record.run_created = handle.created_at;
        tracing::debug!(run = %run.name, "BuildRun created");

        let timeout = run.effective_timeout(job, self.config.default_run_timeout);
        let status = self.await_completion(&run.name, timeout, record).await?;

        record.run_created = status.created_at.or(record.run_created);
        record.run_started = status.started_at;
        record.run_completed = status.completed_at;
        record.outcome = Some(RunOutcome::Succeeded);

        self.inspect_sub_resources(&status, record).await;

        let decomposition = decompose(record);
        for warning in &decomposition.warnings {
            self.events.publish(LoadEvent::clock_skew(&run.name, warning));
        }
        Ok(decomposition.timing)
    }

    /// Submit `job` and wait for its registration.
    ///
    /// Returns the creation and registration timestamps.
    async fn submit_and_register<'a>(
        &self,
        job: &'a JobSpec,
        scope: &mut ResourceScope<'a>,
    ) -> Result<(Option<Timestamp>, Timestamp), EngineError> {
        self.remove_stale(Resource::Job, &job.name).await?;

        let handle = self
            .client
            .create_job(job)
            .await
            .map_err(|source| EngineError::SubmissionFailed {
                kind: "Build",
                name: job.name.clone(),
                source,
            })?;
        scope.job_created = true;
        tracing::debug!(job = %job.name, "Build created");

        let status = self.await_registration(&job.name).await?;
        let registered_at = status.registered_at.unwrap_or_else(|| {
            tracing::warn!(
                job = %job.name,
                "Platform reported no registration time, using the observation time"
            );
            chrono::Utc::now()
        });

        Ok((handle.created_at.or(status.created_at), registered_at))
    }

    /// Register `job` without running it and return its registration timing.
    pub async fn register_once(
        &self,
        job: &JobSpec,
        options: RunOptions,
    ) -> Result<StageTiming, EngineError> {
        self.events.publish(LoadEvent::RunStarted {
            name: job.name.clone(),
        });

        let mut scope = ResourceScope::new(job);
        let result = self
            .submit_and_register(job, &mut scope)
            .await
            .map(|(created_at, registered_at)| {
                let record = RunRecord {
                    job_created: created_at,
                    job_registered: Some(registered_at),
                    ..RunRecord::default()
                };
                let decomposition = decompose(&record);
                for warning in &decomposition.warnings {
                    self.events.publish(LoadEvent::clock_skew(&job.name, warning));
                }
                decomposition.timing
            });

        self.finish(&job.name, scope, options).await;

        if let Ok(timing) = &result {
            tracing::info!(job = %job.name, %timing, "Build registered");
        }
        self.publish_outcome(&job.name, &result, None);
        result
    }

    async fn finish(&self, name: &str, scope: ResourceScope<'_>, options: RunOptions) {
        if options.skip_cleanup {
            tracing::info!(name, "Skipping cleanup, resources are kept");
        } else {
            scope.release(self).await;
        }
    }

    fn publish_outcome(
        &self,
        name: &str,
        result: &Result<StageTiming, EngineError>,
        outcome: Option<RunOutcome>,
    ) {
        match result {
            Ok(timing) => self.events.publish(LoadEvent::RunCompleted {
                name: name.to_string(),
                timing: timing.clone(),
            }),
            Err(e) => {
                tracing::warn!(name, ?outcome, error = %e, "Build run failed");
                self.events.publish(LoadEvent::RunFailed {
                    name: name.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }

    // ---- waiting ----

    async fn await_registration(&self, name: &str) -> Result<JobStatus, EngineError> {
        let client = self.client.as_ref();

        let outcome = poll_until(
            self.config.poll_interval,
            self.config.registration_timeout,
            || async move {
                let status = client.get_job(name).await.map_err(|source| {
                    EngineError::StatusUnavailable {
                        kind: "Build",
                        name: name.to_string(),
                        source,
                    }
                })?;

                match &status.registration {
                    Registration::Pending => {
                        tracing::debug!(job = %name, "Waiting for registration");
                        return Ok(None);
                    }
                    Registration::Rejected { reason, message } => {
                        return Err(EngineError::RegistrationRejected {
                            name: name.to_string(),
                            reason: reason.clone(),
                            message: message.clone(),
                        });
                    }
                    Registration::Registered => {}
                }
                Ok(Some(status))
            },
        )
        .await;

        match outcome {
            Ok(status) => Ok(status),
            Err(PollError::Failed(e)) => Err(e),
            Err(PollError::Timeout) => Err(EngineError::RegistrationTimeout {
                name: name.to_string(),
                timeout: self.config.registration_timeout,
            }),
        }
    }

    async fn await_completion(
        &self,
        name: &str,
        timeout: Duration,
        record: &mut RunRecord,
    ) -> Result<RunStatus, EngineError> {
        let client = self.client.as_ref();

        let outcome = poll_until(self.config.poll_interval, timeout, || async move {
            let status = client.get_run(name).await.map_err(|source| {
                EngineError::StatusUnavailable {
                    kind: "BuildRun",
                    name: name.to_string(),
                    source,
                }
            })?;

            let terminal = match &status.condition {
                RunCondition::Succeeded => status.completed_at.is_some(),
                RunCondition::Failed { .. } => true,
                RunCondition::Unknown => false,
            };
            if !terminal {
                tracing::debug!(run = %name, "Waiting for completion");
                return Ok(None);
            }
            Ok(Some(status))
        })
        .await;

        let status = match outcome {
            Ok(status) => status,
            Err(PollError::Failed(e)) => return Err(e),
            Err(PollError::Timeout) => {
                record.outcome = Some(RunOutcome::TimedOut);
                return Err(EngineError::RunTimeout {
                    name: name.to_string(),
                    timeout,
                });
            }
        };

        if let RunCondition::Failed { reason, message } = &status.condition {
            let diagnostics = diagnostics::collect(client, &self.config, &status).await;
            record.outcome = Some(RunOutcome::Failed);
            record.diagnostics = Some(diagnostics.clone());
            return Err(EngineError::RunFailed {
                name: name.to_string(),
                reason: reason.clone(),
                message: message.clone(),
                diagnostics,
            });
        }

        Ok(status)
    }

    /// Fill sub-run and execution unit timestamps. Missing resources only
    /// leave the dependent stages out.
    async fn inspect_sub_resources(&self, run: &RunStatus, record: &mut RunRecord) {
        let client = self.client.as_ref();

        let sub_run = match locate_sub_run(client, &self.config, run).await {
            Ok(sub_run) => sub_run,
            Err(source) => {
                let e = EngineError::LookupFailed {
                    kind: "TaskRun",
                    name: run.name.clone(),
                    source,
                };
                tracing::warn!(error = %e, "Sub-run stages omitted");
                None
            }
        };

        match &sub_run {
            Some(sub_run) => {
                record.sub_run_created = sub_run.created_at;
                record.sub_run_started = sub_run.started_at;
                record.sub_run_completed = sub_run.completed_at;
            }
            None => tracing::warn!(run = %run.name, "Sub-run not found, its stages are omitted"),
        }

        match locate_unit(client, &self.config, &run.name, sub_run.as_ref()).await {
            Ok(Some(unit)) => {
                record.unit_created = unit.created_at;
                record.unit_started = unit.started_at;
                record.unit_finished = unit.finished_at;
            }
            Ok(None) => {
                tracing::warn!(run = %run.name, "Execution unit not found, its stages are omitted");
            }
            Err(source) => {
                let e = EngineError::LookupFailed {
                    kind: "Pod",
                    name: run.name.clone(),
                    source,
                };
                tracing::warn!(error = %e, "Execution unit stages omitted");
            }
        }
    }

    // ---- removal ----

    async fn exists(&self, resource: Resource, name: &str) -> Result<(), ControlPlaneError> {
        match resource {
            Resource::Job => self.client.get_job(name).await.map(|_| ()),
            Resource::Run => self.client.get_run(name).await.map(|_| ()),
        }
    }

    async fn delete(&self, resource: Resource, name: &str) -> Result<(), ControlPlaneError> {
        match resource {
            Resource::Job => self.client.delete_job(name).await,
            Resource::Run => self.client.delete_run(name).await,
        }
    }

    /// Delete a same-named leftover and wait until it is gone.
    async fn remove_stale(&self, resource: Resource, name: &str) -> Result<(), EngineError> {
        let kind = resource.kind();
        let submission_failed = |source| EngineError::SubmissionFailed {
            kind,
            name: name.to_string(),
            source,
        };

        match self.exists(resource, name).await {
            Err(e) if e.is_not_found() => return Ok(()),
            Err(e) => return Err(submission_failed(e)),
            Ok(()) => {}
        }

        tracing::info!(kind, name, "Removing existing resource with the same name");
        self.delete(resource, name).await.map_err(submission_failed)?;

        match self.await_absence(move || self.exists(resource, name)).await {
            Ok(()) => Ok(()),
            Err(PollError::Failed(e)) => Err(submission_failed(e)),
            Err(PollError::Timeout) => Err(EngineError::StaleResource {
                kind,
                name: name.to_string(),
                timeout: self.config.delete_timeout,
            }),
        }
    }

    /// Poll `lookup` until it reports the resource as not found.
    async fn await_absence<F, Fut>(&self, lookup: F) -> Result<(), PollError<ControlPlaneError>>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<(), ControlPlaneError>>,
    {
        poll_until(
            self.config.delete_poll_interval,
            self.config.delete_timeout,
            || {
                let pending = lookup();
                async move {
                    match pending.await {
                        Ok(()) => Ok(None),
                        Err(e) if e.is_not_found() => Ok(Some(())),
                        Err(e) => Err(e),
                    }
                }
            },
        )
        .await
    }

    /// Delete `resource` and wait until it is gone.
    async fn release(&self, resource: Resource, name: &str) -> Result<(), EngineError> {
        let cleanup_failed = |message: String| EngineError::CleanupFailed {
            kind: resource.kind(),
            name: name.to_string(),
            message,
        };

        self.delete(resource, name)
            .await
            .map_err(|e| cleanup_failed(e.to_string()))?;

        self.await_absence(move || self.exists(resource, name))
            .await
            .map_err(|e| cleanup_failed(absence_message(e, self.config.delete_timeout)))?;

        tracing::debug!(kind = resource.kind(), name, "Resource deleted");
        Ok(())
    }

    async fn release_run(&self, name: &str) -> Result<(), EngineError> {
        let client = self.client.as_ref();

        // Remember the execution unit so its removal can be awaited as well.
        let unit = match client.get_run(name).await {
            Ok(status) => {
                let sub_run = locate_sub_run(client, &self.config, &status)
                    .await
                    .ok()
                    .flatten();
                locate_unit(client, &self.config, name, sub_run.as_ref())
                    .await
                    .ok()
                    .flatten()
                    .map(|unit| unit.name)
            }
            Err(_) => None,
        };

        self.release(Resource::Run, name).await?;

        if let Some(unit) = unit {
            let unit = unit.as_str();
            self.await_absence(move || async move {
                client.get_execution_unit(unit).await.map(|_| ())
            })
            .await
            .map_err(|e| EngineError::CleanupFailed {
                kind: "Pod",
                name: unit.to_string(),
                message: absence_message(e, self.config.delete_timeout),
            })?;
        }
        Ok(())
    }

    async fn release_job(&self, name: &str) -> Result<(), EngineError> {
        self.release(Resource::Job, name).await
    }

    async fn release_artifact(&self, job: &JobSpec) -> Result<(), EngineError> {
        let image = job.output.image.as_str();
        if !self.registry.manages(image) {
            tracing::debug!(image, "Output image registry not managed, image is kept");
            return Ok(());
        }

        let cleanup_failed = |message: String| EngineError::CleanupFailed {
            kind: "image",
            name: image.to_string(),
            message,
        };

        let credentials = match &job.output.credentials {
            Some(secret) => Some(
                self.client
                    .registry_credentials(secret)
                    .await
                    .map_err(|e| cleanup_failed(e.to_string()))?,
            ),
            None => None,
        };

        self.registry
            .delete_image(image, credentials.as_ref())
            .await
            .map_err(|e| cleanup_failed(e.to_string()))?;

        tracing::debug!(image, "Output image deleted");
        Ok(())
    }
}

fn absence_message(err: PollError<ControlPlaneError>, timeout: Duration) -> String {
    match err {
        PollError::Timeout => format!("still present after {timeout:?}"),
        PollError::Failed(e) => e.to_string(),
    }
}
