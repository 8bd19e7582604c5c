//! Kubernetes / Shipwright / Tekton wire objects.
//!
//! Only the fields the load generator reads are modelled. Each object is
//! converted into its typed counterpart from [`crate::models`] right after
//! decoding.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use buildload_core::{IdentityRequest, JobSpec, RunRequest, Timestamp};
use serde::Deserialize;
use serde_json::{json, Value};

use super::quantity::{parse_cpu_millis, parse_memory_bytes};
use crate::api::ControlPlaneError;
use crate::models::{
    JobStatus, NodeCapacity, Registration, RegistryCredentials, RunCondition, RunStatus,
    StepResources, StrategyDescriptor, SubRunStatus, UnitStatus,
};

/// API group/version of Shipwright builds and build runs.
pub const SHIPWRIGHT_API_VERSION: &str = "shipwright.io/v1alpha1";

/// Field manager that writes the registration status of a build.
pub const BUILD_CONTROLLER_MANAGER: &str = "shipwright-build-controller";

/// Secret key holding a Docker config JSON document.
const DOCKER_CONFIG_KEY: &str = ".dockerconfigjson";

// ---------------------------------------------------------------------------
// Shared
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub creation_timestamp: Option<Timestamp>,
    #[serde(default)]
    pub managed_fields: Vec<ManagedField>,
}

#[derive(Debug, Deserialize)]
pub struct ManagedField {
    #[serde(default)]
    pub manager: Option<String>,
    #[serde(default)]
    pub operation: Option<String>,
    #[serde(default)]
    pub time: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
pub struct ObjectList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Deserialize)]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// ---------------------------------------------------------------------------
// Build
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Build {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: BuildStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct BuildStatus {
    #[serde(default)]
    pub registered: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Build {
    pub fn into_model(self) -> JobStatus {
        let registration = match self.status.registered.as_deref() {
            Some("True") => Registration::Registered,
            Some("False") => Registration::Rejected {
                reason: self.status.reason.unwrap_or_default(),
                message: self.status.message.unwrap_or_default(),
            },
            _ => Registration::Pending,
        };

        let registered_at = self
            .metadata
            .managed_fields
            .iter()
            .filter(|mf| {
                mf.operation.as_deref() == Some("Update")
                    && mf.manager.as_deref() == Some(BUILD_CONTROLLER_MANAGER)
            })
            .filter_map(|mf| mf.time)
            .last();

        JobStatus {
            name: self.metadata.name,
            created_at: self.metadata.creation_timestamp,
            registration,
            registered_at,
        }
    }
}

/// Manifest of a `Build` for `spec` in `namespace`.
pub fn build_manifest(spec: &JobSpec, namespace: &str) -> Value {
    let mut source = json!({ "url": spec.source.url });
    if let Some(revision) = &spec.source.revision {
        source["revision"] = json!(revision);
    }
    if let Some(context_dir) = &spec.source.context_dir {
        source["contextDir"] = json!(context_dir);
    }
    if let Some(secret) = &spec.source.credentials {
        source["credentials"] = json!({ "name": secret });
    }

    let mut output = json!({ "image": spec.output.image });
    if let Some(secret) = &spec.output.credentials {
        output["credentials"] = json!({ "name": secret });
    }

    let mut build_spec = json!({
        "strategy": { "name": spec.strategy, "kind": "ClusterBuildStrategy" },
        "source": source,
        "output": output,
    });
    if let Some(dockerfile) = spec.kind.dockerfile() {
        build_spec["dockerfile"] = json!(dockerfile);
    }
    if let Some(timeout) = spec.timeout {
        build_spec["timeout"] = json!(go_duration(timeout));
    }

    json!({
        "apiVersion": SHIPWRIGHT_API_VERSION,
        "kind": "Build",
        "metadata": {
            "name": spec.name,
            "namespace": namespace,
            "annotations": spec.annotations,
        },
        "spec": build_spec,
    })
}

// ---------------------------------------------------------------------------
// BuildRun
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BuildRun {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: Value,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildRunStatus {
    #[serde(default)]
    conditions: Vec<Condition>,
    #[serde(default)]
    start_time: Option<Timestamp>,
    #[serde(default)]
    completion_time: Option<Timestamp>,
    #[serde(default)]
    latest_task_run_ref: Option<String>,
}

impl BuildRun {
    pub fn into_model(self) -> Result<RunStatus, ControlPlaneError> {
        let status: BuildRunStatus = if self.status.is_null() {
            BuildRunStatus::default()
        } else {
            serde_json::from_value(self.status.clone()).map_err(|e| ControlPlaneError::Decode {
                kind: "BuildRun status",
                message: e.to_string(),
            })?
        };

        let condition = match status.conditions.iter().find(|c| c.kind == "Succeeded") {
            Some(c) if c.status == "True" => RunCondition::Succeeded,
            Some(c) if c.status == "False" => RunCondition::Failed {
                reason: c.reason.clone().unwrap_or_default(),
                message: c.message.clone().unwrap_or_default(),
            },
            _ => RunCondition::Unknown,
        };

        Ok(RunStatus {
            name: self.metadata.name,
            created_at: self.metadata.creation_timestamp,
            started_at: status.start_time,
            completed_at: status.completion_time,
            condition,
            sub_run_ref: status.latest_task_run_ref,
            snapshot: self.status,
        })
    }
}

/// Manifest of a `BuildRun` for `request` in `namespace`.
pub fn build_run_manifest(request: &RunRequest, namespace: &str) -> Value {
    let mut spec = json!({ "buildRef": { "name": request.job_name } });

    match &request.identity {
        IdentityRequest::Generate => spec["serviceAccount"] = json!({ "generate": true }),
        IdentityRequest::Existing(name) => spec["serviceAccount"] = json!({ "name": name }),
        IdentityRequest::PlatformDefault => {}
    }
    if let Some(timeout) = request.timeout {
        spec["timeout"] = json!(go_duration(timeout));
    }

    json!({
        "apiVersion": SHIPWRIGHT_API_VERSION,
        "kind": "BuildRun",
        "metadata": { "name": request.name, "namespace": namespace },
        "spec": spec,
    })
}

// ---------------------------------------------------------------------------
// TaskRun
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TaskRun {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: TaskRunStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunStatus {
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub completion_time: Option<Timestamp>,
    #[serde(default)]
    pub pod_name: Option<String>,
}

impl TaskRun {
    pub fn into_model(self) -> SubRunStatus {
        SubRunStatus {
            name: self.metadata.name,
            created_at: self.metadata.creation_timestamp,
            started_at: self.status.start_time,
            completed_at: self.status.completion_time,
            unit_ref: self.status.pod_name.filter(|name| !name.is_empty()),
        }
    }
}

// ---------------------------------------------------------------------------
// Pod
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: PodSpec,
    #[serde(default)]
    pub status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    #[serde(default)]
    pub init_containers: Vec<NamedContainer>,
    #[serde(default)]
    pub containers: Vec<NamedContainer>,
}

#[derive(Debug, Deserialize)]
pub struct NamedContainer {
    pub name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStatus {
    #[serde(default)]
    pub start_time: Option<Timestamp>,
    #[serde(default)]
    pub init_container_statuses: Vec<ContainerStatus>,
    #[serde(default)]
    pub container_statuses: Vec<ContainerStatus>,
}

#[derive(Debug, Deserialize)]
pub struct ContainerStatus {
    #[serde(default)]
    pub state: ContainerState,
}

#[derive(Debug, Default, Deserialize)]
pub struct ContainerState {
    #[serde(default)]
    pub running: Option<RunningState>,
    #[serde(default)]
    pub terminated: Option<TerminatedState>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningState {
    #[serde(default)]
    pub started_at: Option<Timestamp>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerminatedState {
    #[serde(default)]
    pub started_at: Option<Timestamp>,
    #[serde(default)]
    pub finished_at: Option<Timestamp>,
}

impl ContainerStatus {
    fn started_at(&self) -> Option<Timestamp> {
        self.state
            .terminated
            .as_ref()
            .and_then(|t| t.started_at)
            .or_else(|| self.state.running.as_ref().and_then(|r| r.started_at))
    }
}

impl Pod {
    pub fn into_model(self) -> UnitStatus {
        let started_at = self
            .status
            .init_container_statuses
            .iter()
            .chain(&self.status.container_statuses)
            .filter_map(ContainerStatus::started_at)
            .min()
            .or(self.status.start_time);

        // Only meaningful once every regular container has terminated.
        let finished_at = if self.status.container_statuses.is_empty() {
            None
        } else {
            self.status
                .container_statuses
                .iter()
                .map(|cs| cs.state.terminated.as_ref().and_then(|t| t.finished_at))
                .collect::<Option<Vec<_>>>()
                .and_then(|times| times.into_iter().max())
        };

        let containers = self
            .spec
            .init_containers
            .into_iter()
            .chain(self.spec.containers)
            .map(|c| c.name)
            .collect();

        UnitStatus {
            name: self.metadata.name,
            created_at: self.metadata.creation_timestamp,
            started_at,
            finished_at,
            containers,
        }
    }
}

// ---------------------------------------------------------------------------
// Node, ClusterBuildStrategy, Secret
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct Node {
    #[serde(default)]
    pub status: NodeStatus,
}

#[derive(Debug, Default, Deserialize)]
pub struct NodeStatus {
    #[serde(default)]
    pub capacity: BTreeMap<String, String>,
}

impl Node {
    pub fn into_model(self) -> NodeCapacity {
        let capacity = &self.status.capacity;
        NodeCapacity {
            cpu_millis: capacity.get("cpu").and_then(|q| parse_cpu_millis(q)).unwrap_or(0),
            memory_bytes: capacity
                .get("memory")
                .and_then(|q| parse_memory_bytes(q))
                .unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ClusterBuildStrategy {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: StrategySpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategySpec {
    #[serde(default)]
    pub build_steps: Vec<BuildStep>,
}

#[derive(Debug, Deserialize)]
pub struct BuildStep {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub resources: StepRequirements,
}

#[derive(Debug, Default, Deserialize)]
pub struct StepRequirements {
    #[serde(default)]
    pub requests: BTreeMap<String, String>,
}

impl ClusterBuildStrategy {
    pub fn into_model(self) -> StrategyDescriptor {
        let steps = self
            .spec
            .build_steps
            .into_iter()
            .map(|step| StepResources {
                cpu_millis: step
                    .resources
                    .requests
                    .get("cpu")
                    .and_then(|q| parse_cpu_millis(q))
                    .unwrap_or(0),
                memory_bytes: step
                    .resources
                    .requests
                    .get("memory")
                    .and_then(|q| parse_memory_bytes(q))
                    .unwrap_or(0),
                name: step.name,
            })
            .collect();

        StrategyDescriptor {
            name: self.metadata.name,
            steps,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Secret {
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct DockerConfig {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuth>,
}

#[derive(Debug, Deserialize)]
struct DockerAuth {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

impl Secret {
    /// Extract the first set of credentials from a docker-registry secret.
    pub fn registry_credentials(&self) -> Result<RegistryCredentials, ControlPlaneError> {
        let decode_err = |message: String| ControlPlaneError::Decode {
            kind: "registry secret",
            message,
        };

        let encoded = self.data.get(DOCKER_CONFIG_KEY).ok_or_else(|| {
            decode_err(format!(
                "secret {} has no {DOCKER_CONFIG_KEY} entry",
                self.metadata.name
            ))
        })?;
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| decode_err(e.to_string()))?;
        let config: DockerConfig =
            serde_json::from_slice(&raw).map_err(|e| decode_err(e.to_string()))?;

        let entry = config
            .auths
            .into_values()
            .next()
            .ok_or_else(|| decode_err("no authentication entries in secret data".into()))?;

        if let (Some(username), Some(password)) = (entry.username, entry.password) {
            return Ok(RegistryCredentials { username, password });
        }

        // Fall back to the combined `user:password` field.
        let auth = entry
            .auth
            .ok_or_else(|| decode_err("authentication entry has no credentials".into()))?;
        let decoded = STANDARD.decode(auth).map_err(|e| decode_err(e.to_string()))?;
        let decoded = String::from_utf8_lossy(&decoded);
        let (username, password) = decoded
            .split_once(':')
            .ok_or_else(|| decode_err("auth field is not user:password".into()))?;

        Ok(RegistryCredentials {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

/// Format a duration the way Kubernetes duration fields expect it.
pub fn go_duration(duration: std::time::Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1000 == 0 {
        format!("{}s", millis / 1000)
    } else {
        format!("{millis}ms")
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use buildload_core::{BuildKind, OutputTarget, SourceSpec};
    use chrono::{TimeZone, Utc};

    use super::*;

    fn spec() -> JobSpec {
        JobSpec {
            name: "test-kaniko-0".into(),
            strategy: "kaniko".into(),
            kind: BuildKind::default(),
            source: SourceSpec {
                url: "https://github.com/example/app".into(),
                revision: Some("main".into()),
                context_dir: Some("/".into()),
                credentials: None,
            },
            output: OutputTarget {
                image: "docker.io/example/test-kaniko-0:latest".into(),
                credentials: Some("registry-credentials".into()),
            },
            timeout: Some(Duration::from_secs(600)),
            annotations: BTreeMap::new(),
        }
    }

    #[test]
    fn build_manifest_carries_spec_fields() {
        let manifest = build_manifest(&spec(), "load");
        assert_eq!(manifest["kind"], "Build");
        assert_eq!(manifest["metadata"]["namespace"], "load");
        assert_eq!(manifest["spec"]["strategy"]["name"], "kaniko");
        assert_eq!(manifest["spec"]["source"]["revision"], "main");
        assert_eq!(manifest["spec"]["dockerfile"], "Dockerfile");
        assert_eq!(manifest["spec"]["output"]["credentials"]["name"], "registry-credentials");
        assert_eq!(manifest["spec"]["timeout"], "600s");
        assert!(manifest["spec"]["source"].get("credentials").is_none());
    }

    #[test]
    fn buildpacks_manifest_has_no_dockerfile() {
        let mut spec = spec();
        spec.kind = BuildKind::Buildpacks;
        let manifest = build_manifest(&spec, "load");
        assert!(manifest["spec"].get("dockerfile").is_none());
    }

    #[test]
    fn build_run_manifest_generates_service_account() {
        let request = RunRequest::for_job(&spec(), IdentityRequest::Generate);
        let manifest = build_run_manifest(&request, "load");
        assert_eq!(manifest["spec"]["buildRef"]["name"], "test-kaniko-0");
        assert_eq!(manifest["spec"]["serviceAccount"]["generate"], true);
    }

    #[test]
    fn build_registration_uses_controller_update_time() {
        let build: Build = serde_json::from_value(json!({
            "metadata": {
                "name": "b",
                "creationTimestamp": "2024-01-01T10:00:00Z",
                "managedFields": [
                    { "manager": "build-load", "operation": "Update", "time": "2024-01-01T10:00:00Z" },
                    { "manager": "shipwright-build-controller", "operation": "Update", "time": "2024-01-01T10:00:03Z" }
                ]
            },
            "status": { "registered": "True", "reason": "Succeeded" }
        }))
        .unwrap();

        let status = build.into_model();
        assert_eq!(status.registration, Registration::Registered);
        assert_eq!(
            status.registered_at,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 3).unwrap())
        );
    }

    #[test]
    fn build_rejection_keeps_reason() {
        let build: Build = serde_json::from_value(json!({
            "metadata": { "name": "b" },
            "status": { "registered": "False", "reason": "BuildStrategyNotFound", "message": "strategy kaniko not found" }
        }))
        .unwrap();

        assert_eq!(
            build.into_model().registration,
            Registration::Rejected {
                reason: "BuildStrategyNotFound".into(),
                message: "strategy kaniko not found".into(),
            }
        );
    }

    #[test]
    fn build_run_failed_condition() {
        let run: BuildRun = serde_json::from_value(json!({
            "metadata": { "name": "r", "creationTimestamp": "2024-01-01T10:00:05Z" },
            "status": {
                "conditions": [{ "type": "Succeeded", "status": "False", "reason": "Failed", "message": "step-build exited 1" }],
                "latestTaskRunRef": "r-xyz"
            }
        }))
        .unwrap();

        let status = run.into_model().unwrap();
        assert_eq!(status.sub_run_ref.as_deref(), Some("r-xyz"));
        assert_eq!(
            status.condition,
            RunCondition::Failed {
                reason: "Failed".into(),
                message: "step-build exited 1".into()
            }
        );
        assert_eq!(status.snapshot["latestTaskRunRef"], "r-xyz");
    }

    #[test]
    fn build_run_without_status_is_unknown() {
        let run: BuildRun = serde_json::from_value(json!({ "metadata": { "name": "r" } })).unwrap();
        let status = run.into_model().unwrap();
        assert_eq!(status.condition, RunCondition::Unknown);
        assert!(status.completed_at.is_none());
    }

    #[test]
    fn pod_timestamps_span_first_start_to_last_finish() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": { "name": "p", "creationTimestamp": "2024-01-01T10:00:06Z" },
            "spec": {
                "initContainers": [{ "name": "prepare" }],
                "containers": [{ "name": "step-build" }, { "name": "step-push" }]
            },
            "status": {
                "startTime": "2024-01-01T10:00:07Z",
                "initContainerStatuses": [
                    { "state": { "terminated": { "startedAt": "2024-01-01T10:00:08Z", "finishedAt": "2024-01-01T10:00:09Z" } } }
                ],
                "containerStatuses": [
                    { "state": { "terminated": { "startedAt": "2024-01-01T10:00:10Z", "finishedAt": "2024-01-01T10:00:30Z" } } },
                    { "state": { "terminated": { "startedAt": "2024-01-01T10:00:10Z", "finishedAt": "2024-01-01T10:00:40Z" } } }
                ]
            }
        }))
        .unwrap();

        let unit = pod.into_model();
        assert_eq!(unit.containers, vec!["prepare", "step-build", "step-push"]);
        assert_eq!(unit.started_at, Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 8).unwrap()));
        assert_eq!(unit.finished_at, Some(Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 40).unwrap()));
    }

    #[test]
    fn pod_with_running_container_has_no_finish() {
        let pod: Pod = serde_json::from_value(json!({
            "metadata": { "name": "p" },
            "status": {
                "containerStatuses": [
                    { "state": { "terminated": { "startedAt": "2024-01-01T10:00:10Z", "finishedAt": "2024-01-01T10:00:30Z" } } },
                    { "state": { "running": { "startedAt": "2024-01-01T10:00:31Z" } } }
                ]
            }
        }))
        .unwrap();

        assert!(pod.into_model().finished_at.is_none());
    }

    #[test]
    fn secret_credentials_from_username_and_password() {
        let config = r#"{"auths":{"https://index.docker.io/v1/":{"username":"alice","password":"s3cret"}}}"#;
        let secret = Secret {
            metadata: ObjectMeta {
                name: "registry-credentials".into(),
                creation_timestamp: None,
                managed_fields: vec![],
            },
            data: BTreeMap::from([(DOCKER_CONFIG_KEY.to_string(), STANDARD.encode(config))]),
        };

        let creds = secret.registry_credentials().unwrap();
        assert_eq!(creds.username, "alice");
        assert_eq!(creds.password, "s3cret");
    }

    #[test]
    fn secret_credentials_from_auth_field() {
        let auth = STANDARD.encode("bob:hunter2");
        let config = format!(r#"{{"auths":{{"docker.io":{{"auth":"{auth}"}}}}}}"#);
        let secret = Secret {
            metadata: ObjectMeta {
                name: "s".into(),
                creation_timestamp: None,
                managed_fields: vec![],
            },
            data: BTreeMap::from([(DOCKER_CONFIG_KEY.to_string(), STANDARD.encode(config))]),
        };

        let creds = secret.registry_credentials().unwrap();
        assert_eq!(creds.username, "bob");
        assert_eq!(creds.password, "hunter2");
    }

    #[test]
    fn strategy_steps_parse_requests() {
        let strategy: ClusterBuildStrategy = serde_json::from_value(json!({
            "metadata": { "name": "kaniko" },
            "spec": { "buildSteps": [
                { "name": "build", "resources": { "requests": { "cpu": "500m", "memory": "1Gi" } } }
            ] }
        }))
        .unwrap();

        let descriptor = strategy.into_model();
        assert_eq!(descriptor.steps[0].cpu_millis, 500);
        assert_eq!(descriptor.steps[0].memory_bytes, 1 << 30);
    }

    #[test]
    fn go_duration_formats() {
        assert_eq!(go_duration(Duration::from_secs(300)), "300s");
        assert_eq!(go_duration(Duration::from_millis(1500)), "1500ms");
    }
}
