//! Build and run descriptions submitted to the control plane.
//!
//! A [`JobSpec`] describes one build (source, strategy, output). A
//! [`RunRequest`] asks the platform to execute a job once. Load runs derive
//! many uniquely named jobs from a single [`JobTemplate`].

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Annotation that tells the platform to skip source repository verification.
pub const VERIFY_REPOSITORY_ANNOTATION: &str = "build.shipwright.io/verify.repository";

/// Dockerfile path used when a Dockerfile-based build does not name one.
pub const DEFAULT_DOCKERFILE: &str = "Dockerfile";

/// Tag appended to output images that do not carry one.
const DEFAULT_IMAGE_TAG: &str = "latest";

// ---------------------------------------------------------------------------
// Build kind
// ---------------------------------------------------------------------------

/// Build-tool specific shape of a job.
///
/// Dockerfile-driven strategies need the Dockerfile path, buildpack-style
/// strategies detect everything from the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BuildKind {
    Kaniko {
        #[serde(default = "default_dockerfile")]
        dockerfile: String,
    },
    Buildpacks,
}

fn default_dockerfile() -> String {
    DEFAULT_DOCKERFILE.to_string()
}

impl BuildKind {
    /// Dockerfile path for Dockerfile-driven builds, `None` otherwise.
    pub fn dockerfile(&self) -> Option<&str> {
        match self {
            Self::Kaniko { dockerfile } => Some(dockerfile),
            Self::Buildpacks => None,
        }
    }
}

impl Default for BuildKind {
    fn default() -> Self {
        Self::Kaniko {
            dockerfile: default_dockerfile(),
        }
    }
}

// ---------------------------------------------------------------------------
// Job and run descriptions
// ---------------------------------------------------------------------------

/// Where the build sources come from.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceSpec {
    pub url: String,
    #[serde(default)]
    pub revision: Option<String>,
    #[serde(default)]
    pub context_dir: Option<String>,
    /// Name of the secret granting access to the source repository.
    #[serde(default)]
    pub credentials: Option<String>,
}

/// Where the built image is pushed to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputTarget {
    /// Fully resolved image reference (`server/org/image:tag`).
    pub image: String,
    /// Name of the secret holding push credentials for the registry.
    #[serde(default)]
    pub credentials: Option<String>,
}

/// Immutable description of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: String,
    /// Name of the platform build strategy executing the job.
    pub strategy: String,
    pub kind: BuildKind,
    pub source: SourceSpec,
    pub output: OutputTarget,
    /// Wall-clock limit the platform applies to each run of this job.
    pub timeout: Option<Duration>,
    pub annotations: BTreeMap<String, String>,
}

/// Execution identity requested for a run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum IdentityRequest {
    /// Ask the platform to provision a scoped identity for this run.
    Generate,
    /// Reuse an identity that already exists on the platform.
    Existing(String),
    /// Let the platform pick its default identity.
    #[default]
    PlatformDefault,
}

/// A request to execute a job exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub name: String,
    pub job_name: String,
    pub identity: IdentityRequest,
    /// Per-run timeout, takes precedence over the job timeout.
    pub timeout: Option<Duration>,
}

impl RunRequest {
    /// A run request with the same name as the job it executes.
    pub fn for_job(job: &JobSpec, identity: IdentityRequest) -> Self {
        Self {
            name: job.name.clone(),
            job_name: job.name.clone(),
            identity,
            timeout: None,
        }
    }

    /// Effective completion timeout: run, then job, then `fallback`.
    pub fn effective_timeout(&self, job: &JobSpec, fallback: Duration) -> Duration {
        self.timeout.or(job.timeout).unwrap_or(fallback)
    }
}

/// Per-run behaviour switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Request the platform to auto-provision an execution identity.
    #[serde(default)]
    pub generate_identity: bool,
    /// Keep every created resource for post-mortem inspection.
    #[serde(default)]
    pub skip_cleanup: bool,
}

impl RunOptions {
    pub fn identity(&self) -> IdentityRequest {
        if self.generate_identity {
            IdentityRequest::Generate
        } else {
            IdentityRequest::PlatformDefault
        }
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// Blueprint from which every worker of a load run derives its own job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobTemplate {
    /// Prefix of every generated resource name.
    pub prefix: String,
    pub strategy: String,
    pub kind: BuildKind,
    pub source: SourceSpec,
    /// Output image base (`server/org`) or full reference.
    pub output_image: String,
    pub output_credentials: Option<String>,
    pub timeout: Option<Duration>,
    pub skip_verify_repository: bool,
    pub options: RunOptions,
}

impl JobTemplate {
    /// Check that the template carries everything needed to build a job.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.prefix.trim().is_empty() {
            return Err(CoreError::Validation("name prefix must not be empty".into()));
        }
        if self.strategy.trim().is_empty() {
            return Err(CoreError::Validation("build strategy must not be empty".into()));
        }
        if self.source.url.trim().is_empty() {
            return Err(CoreError::Validation("source URL must not be empty".into()));
        }
        if self.output_image.trim().is_empty() {
            return Err(CoreError::Validation("output image URL must not be empty".into()));
        }
        Ok(())
    }

    /// Deterministic resource name for the worker at `index`.
    pub fn worker_name(&self, index: usize) -> String {
        format!("{}-{}-{}", self.prefix, self.strategy, index)
    }

    /// Annotations attached to every job built from this template.
    pub fn annotations(&self) -> BTreeMap<String, String> {
        let mut annotations = BTreeMap::new();
        if self.skip_verify_repository {
            annotations.insert(VERIFY_REPOSITORY_ANNOTATION.to_string(), "false".to_string());
        }
        annotations
    }

    /// Build the job for resource `name`, resolving its output image.
    pub fn job_spec(&self, name: &str) -> Result<JobSpec, CoreError> {
        Ok(JobSpec {
            name: name.to_string(),
            strategy: self.strategy.clone(),
            kind: self.kind.clone(),
            source: self.source.clone(),
            output: OutputTarget {
                image: resolve_output_image(name, &self.output_image)?,
                credentials: self.output_credentials.clone(),
            },
            timeout: self.timeout,
            annotations: self.annotations(),
        })
    }

    /// Run request for a job derived from this template.
    pub fn run_request(&self, job: &JobSpec) -> RunRequest {
        RunRequest::for_job(job, self.options.identity())
    }
}

/// Resolve the output image reference for the job `name`.
///
/// * `server/org` becomes `server/org/<name>:latest`.
/// * `server/org/image` becomes `server/org/image:latest`.
/// * `server/org/image:tag` is kept as is.
pub fn resolve_output_image(name: &str, base: &str) -> Result<String, CoreError> {
    let invalid = || CoreError::InvalidImageUrl(base.to_string());

    match base.split('/').count() {
        2 => Ok(format!("{base}/{name}:{DEFAULT_IMAGE_TAG}")),
        3 => match base.split(':').count() {
            1 => Ok(format!("{base}:{DEFAULT_IMAGE_TAG}")),
            2 => Ok(base.to_string()),
            _ => Err(invalid()),
        },
        _ => Err(invalid()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
