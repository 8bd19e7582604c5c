//! Best-effort failure diagnostics: the run status rendered as YAML plus the
//! logs of every container of its execution unit.

use buildload_controlplane::{ControlPlane, RunStatus};
use buildload_core::Diagnostics;
use futures::StreamExt;

use crate::config::EngineConfig;
use crate::lookup::{locate_sub_run, locate_unit};

/// Assemble diagnostics for a failed run. Lookup and log errors are logged
/// and leave the corresponding part empty.
pub(crate) async fn collect(
    client: &dyn ControlPlane,
    config: &EngineConfig,
    run: &RunStatus,
) -> Diagnostics {
    let status_snapshot = match serde_yaml::to_string(&run.snapshot) {
        Ok(yaml) => yaml,
        Err(e) => {
            tracing::warn!(run = %run.name, error = %e, "Cannot render run status");
            run.snapshot.to_string()
        }
    };

    let sub_run = match locate_sub_run(client, config, run).await {
        Ok(sub_run) => sub_run,
        Err(e) => {
            tracing::warn!(run = %run.name, error = %e, "Sub-run lookup failed while collecting diagnostics");
            None
        }
    };

    let unit = match locate_unit(client, config, &run.name, sub_run.as_ref()).await {
        Ok(unit) => unit,
        Err(e) => {
            tracing::warn!(run = %run.name, error = %e, "Execution unit lookup failed while collecting diagnostics");
            None
        }
    };

    let mut log_lines = Vec::new();
    if let Some(unit) = unit {
        for container in &unit.containers {
            log_lines.extend(container_logs(client, &unit.name, container).await);
        }
    } else {
        tracing::debug!(run = %run.name, "No execution unit, diagnostics carry the status only");
    }

    Diagnostics {
        status_snapshot,
        log_lines,
    }
}

/// Log lines of one container, each prefixed with `[container]`.
async fn container_logs(client: &dyn ControlPlane, unit: &str, container: &str) -> Vec<String> {
    let mut stream = match client.stream_container_logs(unit, container).await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(unit, container, error = %e, "Cannot stream container logs");
            return Vec::new();
        }
    };

    let mut raw = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => raw.extend_from_slice(&bytes),
            Err(e) => {
                tracing::warn!(unit, container, error = %e, "Container log stream broke off");
                break;
            }
        }
    }

    String::from_utf8_lossy(&raw)
        .lines()
        .map(|line| format!("[{container}] {line}"))
        .collect()
}
