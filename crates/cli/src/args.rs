//! Command line arguments.

use std::path::PathBuf;
use std::time::Duration;

use buildload_core::{BuildKind, JobTemplate, RunOptions, SourceSpec};
use clap::{ArgAction, Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "build-load", version, about = "Create synthetic load for Shipwright builds")]
pub struct Cli {
    /// Enable debug output.
    #[arg(long, global = true)]
    pub debug: bool,

    /// Namespace to test in (overrides KUBE_NAMESPACE).
    #[arg(long, global = true)]
    pub namespace: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create builds in parallel and wait for them to be registered.
    Builds {
        /// Number of builds.
        #[arg(long, default_value_t = 5)]
        count: usize,

        #[command(flatten)]
        build: BuildArgs,

        #[command(flatten)]
        output: ReportArgs,
    },

    /// Run builds in parallel once.
    Buildruns {
        /// Number of parallel build runs.
        #[arg(long, default_value_t = 1)]
        parallel: usize,

        #[command(flatten)]
        build: BuildArgs,

        #[command(flatten)]
        output: ReportArgs,
    },

    /// Run builds at increasing parallelism levels.
    BuildrunsSeries {
        /// Lowest number of parallel builds to test.
        #[arg(long = "build-tests-min", default_value_t = 5)]
        start: usize,

        /// Highest number of parallel builds to test.
        #[arg(long = "build-tests-max", default_value_t = 100)]
        end: usize,

        /// Increment between two levels.
        #[arg(long = "build-tests-increment", default_value_t = 5)]
        increment: usize,

        #[command(flatten)]
        build: BuildArgs,

        #[command(flatten)]
        output: ReportArgs,
    },

    /// Run the steps of a test plan one after another.
    BuildrunsTestplan {
        /// Test plan YAML file.
        #[arg(long)]
        testplan: PathBuf,

        #[command(flatten)]
        output: ReportArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    /// Write a CSV report to this file.
    #[arg(long)]
    pub csv: Option<PathBuf>,
}

/// Flags shared by every command that derives builds from a template.
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Prefix for generated resource names.
    #[arg(long, default_value = "test")]
    pub prefix: String,

    /// Cluster build strategy to test.
    #[arg(long)]
    pub cluster_build_strategy: String,

    /// Generate a service account for each build run.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub generate_service_account: bool,

    /// Source repository URL.
    #[arg(long)]
    pub source_url: String,

    /// Directory inside the source repository to build.
    #[arg(long)]
    pub source_context: Option<String>,

    /// Branch, tag or commit to build.
    #[arg(long)]
    pub source_revision: Option<String>,

    /// Secret granting access to the source repository.
    #[arg(long)]
    pub source_secret: Option<String>,

    /// Dockerfile for Dockerfile based strategies.
    #[arg(long, default_value = "Dockerfile")]
    pub dockerfile: String,

    /// Skip the verification of the source repository.
    #[arg(long)]
    pub skip_verify_repository: bool,

    /// Output image base (`server/org`) or full reference.
    #[arg(long)]
    pub output_image_url: String,

    /// Secret holding the registry push credentials.
    #[arg(long)]
    pub output_secret_ref: Option<String>,

    /// Maximum runtime of a build run in seconds.
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Keep builds, build runs and output images.
    #[arg(long)]
    pub skip_delete: bool,
}

impl BuildArgs {
    pub fn template(&self) -> JobTemplate {
        JobTemplate {
            prefix: self.prefix.clone(),
            strategy: self.cluster_build_strategy.clone(),
            kind: build_kind(&self.cluster_build_strategy, &self.dockerfile),
            source: SourceSpec {
                url: self.source_url.clone(),
                revision: self.source_revision.clone(),
                context_dir: self.source_context.clone(),
                credentials: self.source_secret.clone(),
            },
            output_image: self.output_image_url.clone(),
            output_credentials: self.output_secret_ref.clone(),
            timeout: self.timeout_secs.map(Duration::from_secs),
            skip_verify_repository: self.skip_verify_repository,
            options: RunOptions {
                generate_identity: self.generate_service_account,
                skip_cleanup: self.skip_delete,
            },
        }
    }
}

/// Dockerfile driven strategies are recognised by name.
fn build_kind(strategy: &str, dockerfile: &str) -> BuildKind {
    if strategy.contains("kaniko") || strategy.contains("buildkit") {
        BuildKind::Kaniko {
            dockerfile: dockerfile.to_string(),
        }
    } else {
        BuildKind::Buildpacks
    }
}
