//! Client side of the build platform: the [`ControlPlane`] seam, its
//! Kubernetes implementation and the image registries output images are
//! pushed to.

pub mod api;
pub mod kube;
pub mod models;
pub mod registry;

pub use api::{ControlPlane, ControlPlaneError, LogStream};
pub use kube::{KubeConfig, KubeControlPlane};
pub use models::{
    JobHandle, JobStatus, NodeCapacity, Registration, RegistryCredentials, RunCondition,
    RunHandle, RunStatus, StepResources, StrategyDescriptor, SubRunStatus, UnitStatus,
};
pub use registry::{
    DockerHubRegistry, ImageReference, ImageRegistry, RegistryError, RegistryRouter,
};
