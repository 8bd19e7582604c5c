//! Locating the sub-run and execution unit that carried out a run.
//!
//! The recorded reference is tried first. Without one, resources labelled
//! with the run's name are listed and only an unambiguous single match is
//! accepted.

use buildload_controlplane::{ControlPlane, ControlPlaneError, RunStatus, SubRunStatus, UnitStatus};

use crate::config::EngineConfig;

pub(crate) async fn locate_sub_run(
    client: &dyn ControlPlane,
    config: &EngineConfig,
    run: &RunStatus,
) -> Result<Option<SubRunStatus>, ControlPlaneError> {
    if let Some(reference) = &run.sub_run_ref {
        match client.get_sub_run(reference).await {
            Ok(sub_run) => return Ok(Some(sub_run)),
            Err(e) if e.is_not_found() => {
                tracing::debug!(run = %run.name, sub_run = %reference, "Referenced sub-run not found, trying label lookup");
            }
            Err(e) => return Err(e),
        }
    }

    let matches = client
        .find_sub_runs(&config.sub_run_selector(&run.name))
        .await?;
    Ok(single(matches, "sub-run", &run.name))
}

pub(crate) async fn locate_unit(
    client: &dyn ControlPlane,
    config: &EngineConfig,
    run_name: &str,
    sub_run: Option<&SubRunStatus>,
) -> Result<Option<UnitStatus>, ControlPlaneError> {
    if let Some(reference) = sub_run.and_then(|s| s.unit_ref.as_deref()) {
        match client.get_execution_unit(reference).await {
            Ok(unit) => return Ok(Some(unit)),
            Err(e) if e.is_not_found() => {
                tracing::debug!(run = %run_name, unit = %reference, "Referenced execution unit not found, trying label lookup");
            }
            Err(e) => return Err(e),
        }
    }

    let matches = client
        .find_execution_units(&config.sub_run_selector(run_name))
        .await?;
    Ok(single(matches, "execution unit", run_name))
}

fn single<T>(mut matches: Vec<T>, kind: &str, run_name: &str) -> Option<T> {
    match matches.len() {
        1 => matches.pop(),
        0 => None,
        n => {
            tracing::debug!(run = %run_name, matches = n, "Ambiguous {kind} lookup, ignoring");
            None
        }
    }
}
