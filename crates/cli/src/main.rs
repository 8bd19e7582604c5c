mod args;
mod report;

use std::fs::File;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use buildload_controlplane::{ControlPlane, KubeConfig, KubeControlPlane, RegistryRouter};
use buildload_core::{aggregate, JobTemplate, StageTiming};
use buildload_engine::{
    execute_test_plan, preflight, EngineConfig, EngineError, EventSink, LifecycleController,
    LoadEvent, Orchestrator, SeriesDriver, TestPlan, BUILDRUN_ENTITY, BUILD_ENTITY,
};
use clap::Parser;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use args::{Cli, Command};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // --- Tracing ---
    let default_filter = if cli.debug {
        "buildload=debug"
    } else {
        "buildload=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Builds {
            count,
            build,
            output,
        } => {
            anyhow::ensure!(count > 0, "--count must be at least 1");
            let template = checked_template(&build)?;
            let engine = Engine::connect(cli.namespace.as_deref())?;

            let timings = engine
                .orchestrator()
                .register_parallel(&template, count)
                .await?;
            report_timings(BUILD_ENTITY, &timings, output.csv.as_deref())?;
        }

        Command::Buildruns {
            parallel,
            build,
            output,
        } => {
            anyhow::ensure!(parallel > 0, "--parallel must be at least 1");
            let template = checked_template(&build)?;
            let engine = Engine::connect(cli.namespace.as_deref())?;
            engine.preflight(&template, parallel).await?;

            let timings = engine
                .orchestrator()
                .run_parallel(&template, parallel)
                .await?;
            report_timings(BUILDRUN_ENTITY, &timings, output.csv.as_deref())?;
        }

        Command::BuildrunsSeries {
            start,
            end,
            increment,
            build,
            output,
        } => {
            let template = checked_template(&build)?;
            let engine = Engine::connect(cli.namespace.as_deref())?;
            engine.preflight(&template, end).await?;

            let printer = print_levels(engine.events.subscribe());
            let outcome = SeriesDriver::new(engine.orchestrator())
                .run_series(&template, start, end, increment)
                .await;
            drop(engine);
            // Completes once every sender is gone.
            let _ = printer.await;

            let (series, failure) = match outcome {
                Ok(series) => (series, None),
                Err(EngineError::SeriesAborted {
                    level,
                    completed,
                    source,
                }) => {
                    let e = anyhow::Error::new(*source)
                        .context(format!("Series aborted at parallel level {level}"));
                    (completed, Some(e))
                }
                Err(e) => return Err(e.into()),
            };

            if let Some(path) = output.csv.as_deref() {
                store(path, |file| report::write_series_csv(&series, file))?;
            }
            if let Some(e) = failure {
                return Err(e);
            }
        }

        Command::BuildrunsTestplan { testplan, output } => {
            let yaml = std::fs::read_to_string(&testplan)
                .with_context(|| format!("Failed to read test plan {}", testplan.display()))?;
            let plan = TestPlan::from_yaml(&yaml)?;
            let namespace = plan.namespace.as_deref().or(cli.namespace.as_deref());
            let engine = Engine::connect(namespace)?;

            tracing::info!(steps = plan.steps.len(), "Executing test plan");
            let timings = execute_test_plan(&engine.controller, &plan).await?;
            report_timings(BUILDRUN_ENTITY, &timings, output.csv.as_deref())?;
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Engine assembly
// ---------------------------------------------------------------------------

struct Engine {
    client: Arc<KubeControlPlane>,
    events: EventSink,
    controller: LifecycleController,
}

impl Engine {
    fn connect(namespace: Option<&str>) -> anyhow::Result<Self> {
        let mut config = KubeConfig::from_env().context("Failed to load Kubernetes configuration")?;
        if let Some(namespace) = namespace {
            config.namespace = namespace.to_string();
        }
        tracing::info!(api_url = %config.api_url, namespace = %config.namespace, "Loaded Kubernetes configuration");

        let client = Arc::new(KubeControlPlane::new(&config)?);
        let events = EventSink::default();
        let controller = LifecycleController::new(
            client.clone(),
            Arc::new(RegistryRouter::with_defaults()),
            EngineConfig::default(),
            events.clone(),
        );

        Ok(Self {
            client,
            events,
            controller,
        })
    }

    fn orchestrator(&self) -> Orchestrator {
        Orchestrator::new(self.controller.clone())
    }

    /// Abort on an unknown strategy, warn on insufficient capacity and on
    /// runs left on the cluster.
    async fn preflight(&self, template: &JobTemplate, parallel: usize) -> anyhow::Result<()> {
        let client: &dyn ControlPlane = self.client.as_ref();
        let report = preflight(client, &template.strategy, parallel).await?;
        if report.fits() == Some(false) {
            eprintln!("Warning: {report}. Builds may queue or fail for lack of resources.");
        }
        if let Some(runs) = report.existing_runs {
            if runs.completed > 0 {
                eprintln!(
                    "Note: {} completed build run(s) on the cluster, consider removing obsolete ones.",
                    runs.completed
                );
            }
            if runs.active() > 0 {
                eprintln!(
                    "Warning: {} active build run(s) on the cluster may interfere with the measurement.",
                    runs.active()
                );
            }
        }
        Ok(())
    }
}

fn checked_template(build: &args::BuildArgs) -> anyhow::Result<JobTemplate> {
    let template = build.template();
    template.validate().context("Invalid build settings")?;
    Ok(template)
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn report_timings(
    entity_type: &str,
    timings: &[StageTiming],
    csv: Option<&Path>,
) -> anyhow::Result<()> {
    if let Some(path) = csv {
        store(path, |file| report::write_timings_csv(entity_type, timings, file))?;
    }
    let result = aggregate(timings, entity_type)?;
    print!("{}", report::result_table(&result));
    Ok(())
}

fn store(
    path: &Path,
    write: impl FnOnce(File) -> Result<(), csv::Error>,
) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create report {}", path.display()))?;
    write(file).with_context(|| format!("Failed to write report {}", path.display()))?;
    tracing::info!(path = %path.display(), "Report written");
    Ok(())
}

/// Print every completed series level as soon as it is aggregated.
fn print_levels(mut events: broadcast::Receiver<LoadEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(LoadEvent::LevelCompleted { result, .. }) => {
                    print!("{}", report::result_table(&result));
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Progress output fell behind");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
