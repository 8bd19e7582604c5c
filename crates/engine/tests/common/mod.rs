//! Shared fixtures for the engine integration tests.
//!
//! [`FakeControlPlane`] keeps every resource in memory and answers with fixed
//! timestamp offsets, so the stage durations of a successful run are known in
//! advance:
//!
//! | stage                  | duration |
//! |------------------------|----------|
//! | `RegistrationTime`     | 2s       |
//! | `RunCompletionTime`    | 22s      |
//! | `RunControlTime`       | 2s       |
//! | `SubRunCompletionTime` | 18s      |
//! | `SubRunControlTime`    | 2s       |
//! | `UnitCompletionTime`   | 15s      |
//! | `UnitControlTime`      | 4s       |

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use buildload_controlplane::{
    ControlPlane, ControlPlaneError, ImageRegistry, JobHandle, JobStatus, LogStream,
    NodeCapacity, Registration, RegistryCredentials, RegistryError, RunCondition, RunHandle,
    RunStatus, StrategyDescriptor, SubRunStatus, UnitStatus,
};
use buildload_core::{BuildKind, JobSpec, JobTemplate, RunOptions, RunRequest, SourceSpec, Timestamp};
use buildload_engine::{EngineConfig, EventSink, LifecycleController, Orchestrator};
use bytes::Bytes;
use chrono::Utc;
use futures::StreamExt;

const SUB_RUN_SUFFIX: &str = "-taskrun";
const UNIT_SUFFIX: &str = "-pod";
pub const CONTAINERS: [&str; 2] = ["step-source", "step-build"];

// ---------------------------------------------------------------------------
// Control plane
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct JobEntry {
    created_at: Timestamp,
}

#[derive(Debug, Clone)]
struct RunEntry {
    created_at: Timestamp,
}

/// Scripted platform behaviour.
#[derive(Debug, Clone, Default)]
struct Script {
    /// `create_job` fails for names ending with one of these suffixes.
    fail_create_suffixes: Vec<String>,
    rejection: Option<(String, String)>,
    never_register: bool,
    never_complete: bool,
    run_failure: Option<(String, String)>,
    logs: HashMap<String, String>,
    missing_sub_run: bool,
    create_delay: Duration,
    /// Per-name overrides of `create_delay`, matched by suffix.
    create_delays: Vec<(String, Duration)>,
    /// Per-name registration offsets in seconds, matched by suffix.
    registration_secs: Vec<(String, i64)>,
    /// Run start offset in seconds when not the usual 1s.
    run_start_secs: Option<i64>,
    cluster_runs: Option<Vec<RunStatus>>,
    nodes: Option<Vec<NodeCapacity>>,
    strategies: Option<Vec<StrategyDescriptor>>,
}

#[derive(Debug, Default)]
struct State {
    jobs: HashMap<String, JobEntry>,
    runs: HashMap<String, RunEntry>,
    created_jobs: Vec<String>,
    created_runs: Vec<RunRequest>,
    deleted_jobs: Vec<String>,
    deleted_runs: Vec<String>,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-memory [`ControlPlane`] with scriptable failures.
#[derive(Debug, Default)]
pub struct FakeControlPlane {
    script: Script,
    state: Mutex<State>,
}

impl FakeControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_create_for(mut self, suffix: &str) -> Self {
        self.script.fail_create_suffixes.push(suffix.to_string());
        self
    }

    pub fn rejecting(mut self, reason: &str, message: &str) -> Self {
        self.script.rejection = Some((reason.to_string(), message.to_string()));
        self
    }

    pub fn never_registering(mut self) -> Self {
        self.script.never_register = true;
        self
    }

    pub fn never_completing(mut self) -> Self {
        self.script.never_complete = true;
        self
    }

    pub fn failing_runs(mut self, reason: &str, message: &str) -> Self {
        self.script.run_failure = Some((reason.to_string(), message.to_string()));
        self
    }

    pub fn with_logs(mut self, container: &str, text: &str) -> Self {
        self.script.logs.insert(container.to_string(), text.to_string());
        self
    }

    pub fn without_sub_runs(mut self) -> Self {
        self.script.missing_sub_run = true;
        self
    }

    pub fn with_create_delay(mut self, delay: Duration) -> Self {
        self.script.create_delay = delay;
        self
    }

    /// Delay job creation for names ending with `suffix`.
    pub fn with_create_delay_for(mut self, suffix: &str, delay: Duration) -> Self {
        self.script.create_delays.push((suffix.to_string(), delay));
        self
    }

    /// Register jobs ending with `suffix` `secs` seconds after creation.
    pub fn registering_after(mut self, suffix: &str, secs: i64) -> Self {
        self.script.registration_secs.push((suffix.to_string(), secs));
        self
    }

    /// Report run starts `secs` seconds after creation, e.g. after the unit
    /// has already started.
    pub fn starting_runs_after(mut self, secs: i64) -> Self {
        self.script.run_start_secs = Some(secs);
        self
    }

    /// Runs already present on the cluster, as returned by `list_runs`.
    pub fn with_cluster_runs(mut self, runs: Vec<RunStatus>) -> Self {
        self.script.cluster_runs = Some(runs);
        self
    }

    pub fn with_nodes(mut self, nodes: Vec<NodeCapacity>) -> Self {
        self.script.nodes = Some(nodes);
        self
    }

    pub fn with_strategies(mut self, strategies: Vec<StrategyDescriptor>) -> Self {
        self.script.strategies = Some(strategies);
        self
    }

    /// Pretend a job with this name is left over from an earlier run.
    pub fn with_existing_job(self, name: &str) -> Self {
        self.lock().jobs.insert(
            name.to_string(),
            JobEntry {
                created_at: Utc::now(),
            },
        );
        self
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().expect("fake state poisoned")
    }

    // ---- inspection ----

    pub fn live_jobs(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().jobs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn live_runs(&self) -> Vec<String> {
        let mut names: Vec<_> = self.lock().runs.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn created_jobs(&self) -> Vec<String> {
        self.lock().created_jobs.clone()
    }

    pub fn created_runs(&self) -> Vec<RunRequest> {
        self.lock().created_runs.clone()
    }

    pub fn deleted_jobs(&self) -> Vec<String> {
        self.lock().deleted_jobs.clone()
    }

    pub fn deleted_runs(&self) -> Vec<String> {
        self.lock().deleted_runs.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.lock().max_in_flight
    }

    // ---- derived resources ----

    fn run_created(&self, run: &str) -> Option<Timestamp> {
        self.lock().runs.get(run).map(|entry| entry.created_at)
    }

    fn sub_run(&self, run: &str) -> Option<SubRunStatus> {
        if self.script.missing_sub_run {
            return None;
        }
        let created = self.run_created(run)?;
        Some(SubRunStatus {
            name: format!("{run}{SUB_RUN_SUFFIX}"),
            created_at: Some(created + secs(2)),
            started_at: Some(created + secs(3)),
            completed_at: Some(created + secs(21)),
            unit_ref: Some(format!("{run}{UNIT_SUFFIX}")),
        })
    }

    fn unit(&self, run: &str) -> Option<UnitStatus> {
        let created = self.run_created(run)?;
        Some(UnitStatus {
            name: format!("{run}{UNIT_SUFFIX}"),
            created_at: Some(created + secs(4)),
            started_at: Some(created + secs(5)),
            finished_at: Some(created + secs(20)),
            containers: CONTAINERS.iter().map(|c| c.to_string()).collect(),
        })
    }
}

/// Scripted value for the first suffix `name` ends with.
fn by_suffix<T: Copy>(scripted: &[(String, T)], name: &str) -> Option<T> {
    scripted
        .iter()
        .find(|(suffix, _)| name.ends_with(suffix.as_str()))
        .map(|(_, value)| *value)
}

fn secs(n: i64) -> chrono::Duration {
    chrono::Duration::seconds(n)
}

/// Run name from a `label=<run>` selector.
fn selected_run(selector: &str) -> &str {
    selector.split_once('=').map(|(_, run)| run).unwrap_or(selector)
}

#[async_trait]
impl ControlPlane for FakeControlPlane {
    async fn create_job(&self, spec: &JobSpec) -> Result<JobHandle, ControlPlaneError> {
        {
            let mut state = self.lock();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        let delay =
            by_suffix(&self.script.create_delays, &spec.name).unwrap_or(self.script.create_delay);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        state.in_flight -= 1;

        if self
            .script
            .fail_create_suffixes
            .iter()
            .any(|suffix| spec.name.ends_with(suffix.as_str()))
        {
            return Err(ControlPlaneError::Api {
                status: 500,
                body: "admission webhook unavailable".into(),
            });
        }
        if state.jobs.contains_key(&spec.name) {
            return Err(ControlPlaneError::Api {
                status: 409,
                body: "already exists".into(),
            });
        }

        let created_at = Utc::now();
        state.jobs.insert(spec.name.clone(), JobEntry { created_at });
        state.created_jobs.push(spec.name.clone());
        Ok(JobHandle {
            name: spec.name.clone(),
            created_at: Some(created_at),
        })
    }

    async fn get_job(&self, name: &str) -> Result<JobStatus, ControlPlaneError> {
        let entry = self
            .lock()
            .jobs
            .get(name)
            .cloned()
            .ok_or_else(|| ControlPlaneError::not_found("Build", name))?;

        let (registration, registered_at) = match &self.script.rejection {
            Some((reason, message)) => (
                Registration::Rejected {
                    reason: reason.clone(),
                    message: message.clone(),
                },
                None,
            ),
            None if self.script.never_register => (Registration::Pending, None),
            None => {
                let offset = by_suffix(&self.script.registration_secs, name).unwrap_or(2);
                (Registration::Registered, Some(entry.created_at + secs(offset)))
            }
        };

        Ok(JobStatus {
            name: name.to_string(),
            created_at: Some(entry.created_at),
            registration,
            registered_at,
        })
    }

    async fn delete_job(&self, name: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.lock();
        if state.jobs.remove(name).is_some() {
            state.deleted_jobs.push(name.to_string());
        }
        Ok(())
    }

    async fn create_run(&self, request: &RunRequest) -> Result<RunHandle, ControlPlaneError> {
        let mut state = self.lock();
        if !state.jobs.contains_key(&request.job_name) {
            return Err(ControlPlaneError::Api {
                status: 422,
                body: format!("build {} does not exist", request.job_name),
            });
        }
        if state.runs.contains_key(&request.name) {
            return Err(ControlPlaneError::Api {
                status: 409,
                body: "already exists".into(),
            });
        }

        let created_at = Utc::now();
        state.runs.insert(request.name.clone(), RunEntry { created_at });
        state.created_runs.push(request.clone());
        Ok(RunHandle {
            name: request.name.clone(),
            created_at: Some(created_at),
        })
    }

    async fn get_run(&self, name: &str) -> Result<RunStatus, ControlPlaneError> {
        let created = self
            .run_created(name)
            .ok_or_else(|| ControlPlaneError::not_found("BuildRun", name))?;

        let (condition, completed_at) = match &self.script.run_failure {
            _ if self.script.never_complete => (RunCondition::Unknown, None),
            Some((reason, message)) => (
                RunCondition::Failed {
                    reason: reason.clone(),
                    message: message.clone(),
                },
                Some(created + secs(22)),
            ),
            None => (RunCondition::Succeeded, Some(created + secs(22))),
        };
        let sub_run_ref =
            (!self.script.missing_sub_run).then(|| format!("{name}{SUB_RUN_SUFFIX}"));

        Ok(RunStatus {
            name: name.to_string(),
            created_at: Some(created),
            started_at: Some(created + secs(self.script.run_start_secs.unwrap_or(1))),
            completed_at,
            condition,
            sub_run_ref,
            snapshot: serde_json::json!({
                "conditions": [{ "type": "Succeeded", "reason": "Fake" }],
            }),
        })
    }

    async fn delete_run(&self, name: &str) -> Result<(), ControlPlaneError> {
        let mut state = self.lock();
        if state.runs.remove(name).is_some() {
            state.deleted_runs.push(name.to_string());
        }
        Ok(())
    }

    async fn get_sub_run(&self, name: &str) -> Result<SubRunStatus, ControlPlaneError> {
        name.strip_suffix(SUB_RUN_SUFFIX)
            .and_then(|run| self.sub_run(run))
            .ok_or_else(|| ControlPlaneError::not_found("TaskRun", name))
    }

    async fn find_sub_runs(&self, selector: &str) -> Result<Vec<SubRunStatus>, ControlPlaneError> {
        Ok(self.sub_run(selected_run(selector)).into_iter().collect())
    }

    async fn get_execution_unit(&self, name: &str) -> Result<UnitStatus, ControlPlaneError> {
        name.strip_suffix(UNIT_SUFFIX)
            .and_then(|run| self.unit(run))
            .ok_or_else(|| ControlPlaneError::not_found("Pod", name))
    }

    async fn find_execution_units(
        &self,
        selector: &str,
    ) -> Result<Vec<UnitStatus>, ControlPlaneError> {
        Ok(self.unit(selected_run(selector)).into_iter().collect())
    }

    async fn stream_container_logs(
        &self,
        _unit: &str,
        container: &str,
    ) -> Result<LogStream, ControlPlaneError> {
        let text = self.script.logs.get(container).cloned().unwrap_or_default();
        Ok(futures::stream::iter(vec![Ok(Bytes::from(text))]).boxed())
    }

    async fn list_runs(&self) -> Result<Vec<RunStatus>, ControlPlaneError> {
        self.script.cluster_runs.clone().ok_or(ControlPlaneError::Api {
            status: 403,
            body: "buildruns is forbidden at the cluster scope".into(),
        })
    }

    async fn list_nodes(&self) -> Result<Vec<NodeCapacity>, ControlPlaneError> {
        self.script.nodes.clone().ok_or(ControlPlaneError::Api {
            status: 403,
            body: "nodes is forbidden".into(),
        })
    }

    async fn list_strategies(&self) -> Result<Vec<StrategyDescriptor>, ControlPlaneError> {
        self.script.strategies.clone().ok_or(ControlPlaneError::Api {
            status: 403,
            body: "clusterbuildstrategies is forbidden".into(),
        })
    }

    async fn registry_credentials(
        &self,
        secret: &str,
    ) -> Result<RegistryCredentials, ControlPlaneError> {
        Ok(RegistryCredentials {
            username: format!("{secret}-user"),
            password: "hunter2".into(),
        })
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Records image deletions for `docker.io` references.
#[derive(Debug, Default)]
pub struct FakeRegistry {
    deleted: Mutex<Vec<(String, Option<String>)>>,
}

impl FakeRegistry {
    /// Deleted images with the username they were deleted as.
    pub fn deleted(&self) -> Vec<(String, Option<String>)> {
        let mut deleted = self.deleted.lock().expect("registry state poisoned").clone();
        deleted.sort();
        deleted
    }
}

#[async_trait]
impl ImageRegistry for FakeRegistry {
    fn manages(&self, image: &str) -> bool {
        image.contains("docker.io")
    }

    async fn delete_image(
        &self,
        image: &str,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<(), RegistryError> {
        self.deleted
            .lock()
            .expect("registry state poisoned")
            .push((image.to_string(), credentials.map(|c| c.username.clone())));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

/// Engine timings scaled down to milliseconds.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(5),
        registration_timeout: Duration::from_millis(200),
        default_run_timeout: Duration::from_millis(200),
        delete_poll_interval: Duration::from_millis(2),
        delete_timeout: Duration::from_millis(100),
        ..EngineConfig::default()
    }
}

pub fn template() -> JobTemplate {
    JobTemplate {
        prefix: "test".into(),
        strategy: "kaniko".into(),
        kind: BuildKind::Kaniko {
            dockerfile: "Dockerfile".into(),
        },
        source: SourceSpec {
            url: "https://github.com/shipwright-io/sample-go".into(),
            context_dir: Some("docker-build".into()),
            ..SourceSpec::default()
        },
        output_image: "docker.io/loadtest".into(),
        output_credentials: Some("registry-credentials".into()),
        timeout: None,
        skip_verify_repository: true,
        options: RunOptions::default(),
    }
}

/// Control plane, registry and a controller wired to both.
pub struct Harness {
    pub platform: Arc<FakeControlPlane>,
    pub registry: Arc<FakeRegistry>,
    pub events: EventSink,
    pub controller: LifecycleController,
}

impl Harness {
    pub fn new(platform: FakeControlPlane) -> Self {
        Self::with_config(platform, fast_config())
    }

    pub fn with_config(platform: FakeControlPlane, config: EngineConfig) -> Self {
        let platform = Arc::new(platform);
        let registry = Arc::new(FakeRegistry::default());
        let events = EventSink::default();
        let controller =
            LifecycleController::new(platform.clone(), registry.clone(), config, events.clone());
        Self {
            platform,
            registry,
            events,
            controller,
        }
    }

    pub fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.controller.clone())
    }

    /// Job and run request of worker `index` of [`template`].
    pub fn job(&self, index: usize) -> (JobSpec, RunRequest) {
        let template = template();
        let job = template
            .job_spec(&template.worker_name(index))
            .expect("template should produce a job");
        let run = template.run_request(&job);
        (job, run)
    }
}

