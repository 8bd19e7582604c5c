//! The control-plane client seam.
//!
//! [`ControlPlane`] is the only way the engine talks to the build platform.
//! Implementations own all wire-format concerns and hand back the typed
//! views from [`crate::models`].

use async_trait::async_trait;
use buildload_core::{JobSpec, RunRequest};
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::models::{
    JobHandle, JobStatus, NodeCapacity, RegistryCredentials, RunHandle, RunStatus,
    StrategyDescriptor, SubRunStatus, UnitStatus,
};

/// Raw log output of one container.
pub type LogStream = BoxStream<'static, Result<Bytes, ControlPlaneError>>;

/// Client for the remote build platform.
///
/// Lookups of absent resources return [`ControlPlaneError::NotFound`].
/// Deleting an absent resource succeeds.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn create_job(&self, spec: &JobSpec) -> Result<JobHandle, ControlPlaneError>;

    async fn get_job(&self, name: &str) -> Result<JobStatus, ControlPlaneError>;

    async fn delete_job(&self, name: &str) -> Result<(), ControlPlaneError>;

    async fn create_run(&self, request: &RunRequest) -> Result<RunHandle, ControlPlaneError>;

    async fn get_run(&self, name: &str) -> Result<RunStatus, ControlPlaneError>;

    async fn delete_run(&self, name: &str) -> Result<(), ControlPlaneError>;

    /// List the runs of every namespace.
    async fn list_runs(&self) -> Result<Vec<RunStatus>, ControlPlaneError>;

    async fn get_sub_run(&self, name: &str) -> Result<SubRunStatus, ControlPlaneError>;

    /// List sub-runs matching a `key=value` label selector.
    async fn find_sub_runs(&self, selector: &str) -> Result<Vec<SubRunStatus>, ControlPlaneError>;

    async fn get_execution_unit(&self, name: &str) -> Result<UnitStatus, ControlPlaneError>;

    /// List execution units matching a `key=value` label selector.
    async fn find_execution_units(
        &self,
        selector: &str,
    ) -> Result<Vec<UnitStatus>, ControlPlaneError>;

    async fn stream_container_logs(
        &self,
        unit: &str,
        container: &str,
    ) -> Result<LogStream, ControlPlaneError>;

    async fn list_nodes(&self) -> Result<Vec<NodeCapacity>, ControlPlaneError>;

    async fn list_strategies(&self) -> Result<Vec<StrategyDescriptor>, ControlPlaneError>;

    /// Read registry credentials from the named secret.
    async fn registry_credentials(
        &self,
        secret: &str,
    ) -> Result<RegistryCredentials, ControlPlaneError>;
}

/// Errors from the control-plane client layer.
#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    /// The requested resource does not exist.
    #[error("{kind} {name} not found")]
    NotFound { kind: &'static str, name: String },

    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The platform returned a non-2xx status code.
    #[error("Control plane API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A response could not be mapped into the typed model.
    #[error("Failed to decode {kind}: {message}")]
    Decode { kind: &'static str, message: String },

    /// The client configuration is incomplete or invalid.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl ControlPlaneError {
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
