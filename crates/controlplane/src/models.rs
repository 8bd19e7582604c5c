//! Typed views of the control-plane resources the engine observes.
//!
//! Every client implementation maps its wire format into these structs, so
//! the engine never touches untyped API objects.

use buildload_core::Timestamp;
use serde::Serialize;

/// Returned after a job was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub name: String,
    pub created_at: Option<Timestamp>,
}

/// Registration state reported by the platform for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Registration {
    /// The platform has not validated the job yet.
    Pending,
    Registered,
    /// The platform refused the job (unknown strategy, bad source, ...).
    Rejected { reason: String, message: String },
}

/// Observed state of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub name: String,
    pub created_at: Option<Timestamp>,
    pub registration: Registration,
    /// When the platform controller wrote the registered state.
    pub registered_at: Option<Timestamp>,
}

/// Returned after a run was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunHandle {
    pub name: String,
    pub created_at: Option<Timestamp>,
}

/// The `Succeeded` condition of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunCondition {
    /// No condition reported, or the run is still executing.
    Unknown,
    Succeeded,
    Failed { reason: String, message: String },
}

/// Observed state of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunStatus {
    pub name: String,
    pub created_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub condition: RunCondition,
    /// Name of the sub-run the platform created for this run.
    pub sub_run_ref: Option<String>,
    /// Raw status object as reported by the platform, for diagnostics.
    pub snapshot: serde_json::Value,
}

/// Observed state of the pipeline execution carrying out a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRunStatus {
    pub name: String,
    pub created_at: Option<Timestamp>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    /// Name of the execution unit running the sub-run's steps.
    pub unit_ref: Option<String>,
}

/// Observed state of the execution unit (pod) of a sub-run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitStatus {
    pub name: String,
    pub created_at: Option<Timestamp>,
    /// Start of the first container.
    pub started_at: Option<Timestamp>,
    /// Finish of the last container.
    pub finished_at: Option<Timestamp>,
    /// Container names in execution order (init containers first).
    pub containers: Vec<String>,
}

/// Allocatable capacity of one cluster node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NodeCapacity {
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

/// Resource requests of one strategy step.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct StepResources {
    pub name: String,
    pub cpu_millis: u64,
    pub memory_bytes: u64,
}

/// A build strategy installed on the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StrategyDescriptor {
    pub name: String,
    pub steps: Vec<StepResources>,
}

/// Username and password for an image registry.
#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}
