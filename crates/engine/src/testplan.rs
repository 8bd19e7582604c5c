//! Sequential test plans loaded from YAML.
//!
//! ```yaml
//! namespace: load-test
//! generateServiceAccount: true
//! steps:
//!   - name: one
//!     buildAnnotations:
//!       build.shipwright.io/verify.repository: "false"
//!     buildSpec:
//!       strategy:
//!         name: kaniko
//!       source:
//!         url: https://github.com/shipwright-io/sample-go
//!         contextDir: docker-build
//!       dockerfile: Dockerfile
//!       output:
//!         image: docker.io/example
//!         credentials: registry-credentials
//! ```

use std::collections::{BTreeMap, HashSet};

use buildload_core::job::resolve_output_image;
use buildload_core::{
    BuildKind, JobSpec, OutputTarget, RunOptions, RunRequest, SourceSpec, StageTiming,
};
use serde::Deserialize;

use crate::error::EngineError;
use crate::lifecycle::LifecycleController;

/// Prefix of every job created by a test plan step.
const STEP_NAME_PREFIX: &str = "test-plan-step";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlan {
    /// Namespace the plan's resources are created in, if not the default.
    #[serde(default)]
    pub namespace: Option<String>,
    #[serde(default)]
    pub generate_service_account: bool,
    #[serde(default)]
    pub steps: Vec<TestPlanStep>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestPlanStep {
    pub name: String,
    #[serde(default)]
    pub build_annotations: BTreeMap<String, String>,
    pub build_spec: StepBuildSpec,
}

/// Build description of one step.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepBuildSpec {
    pub strategy: StrategyRef,
    pub source: SourceSpec,
    /// Output base (`server/org`) or full image reference.
    pub output: OutputTarget,
    /// Set for Dockerfile-driven strategies.
    #[serde(default)]
    pub dockerfile: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StrategyRef {
    pub name: String,
}

impl TestPlan {
    pub fn from_yaml(input: &str) -> Result<Self, EngineError> {
        let plan: Self = serde_yaml::from_str(input)?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<(), EngineError> {
        if self.steps.is_empty() {
            return Err(EngineError::InvalidTestPlan("the plan has no steps".into()));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(EngineError::InvalidTestPlan("step without a name".into()));
            }
            if !seen.insert(step.name.as_str()) {
                return Err(EngineError::InvalidTestPlan(format!(
                    "duplicate step name {}",
                    step.name
                )));
            }
        }
        Ok(())
    }

    pub fn options(&self) -> RunOptions {
        RunOptions {
            generate_identity: self.generate_service_account,
            skip_cleanup: false,
        }
    }
}

impl TestPlanStep {
    /// Job name of this step.
    pub fn job_name(&self) -> String {
        format!("{STEP_NAME_PREFIX}-{}", self.name)
    }

    pub fn job_spec(&self) -> Result<JobSpec, EngineError> {
        let name = self.job_name();
        let spec = &self.build_spec;

        let image =
            resolve_output_image(&name, &spec.output.image).map_err(EngineError::JobTemplate)?;
        let kind = match &spec.dockerfile {
            Some(dockerfile) => BuildKind::Kaniko {
                dockerfile: dockerfile.clone(),
            },
            None => BuildKind::Buildpacks,
        };

        Ok(JobSpec {
            name,
            strategy: spec.strategy.name.clone(),
            kind,
            source: spec.source.clone(),
            output: OutputTarget {
                image,
                credentials: spec.output.credentials.clone(),
            },
            timeout: None,
            annotations: self.build_annotations.clone(),
        })
    }
}

/// Run every step of `plan` one after another.
///
/// Stops at the first failing step with [`EngineError::TestPlanAborted`],
/// which carries the timings of the steps completed before it.
pub async fn execute_test_plan(
    controller: &LifecycleController,
    plan: &TestPlan,
) -> Result<Vec<StageTiming>, EngineError> {
    let options = plan.options();
    let total = plan.steps.len();
    let mut completed = Vec::with_capacity(total);

    for (index, step) in plan.steps.iter().enumerate() {
        tracing::info!(
            step = %step.name,
            position = index + 1,
            total,
            strategy = %step.build_spec.strategy.name,
            source = %step.build_spec.source.url,
            "Running test plan step"
        );

        let outcome = match step.job_spec() {
            Ok(job) => {
                let run = RunRequest::for_job(&job, options.identity());
                controller.run_once(&job, &run, options).await
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(timing) => completed.push(timing),
            Err(source) => {
                return Err(EngineError::TestPlanAborted {
                    step: step.name.clone(),
                    completed,
                    source: Box::new(source),
                });
            }
        }
    }

    Ok(completed)
}
