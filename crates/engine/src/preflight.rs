//! Advisory check before a load run: does the strategy exist, and could the
//! cluster fit `parallel` builds of it at once?
//!
//! Runs already on the cluster are counted as well: finished ones are
//! clutter, unfinished ones compete with the load for resources.
//!
//! The estimate takes the largest CPU and the largest memory request of any
//! strategy step and multiplies both by the parallelism. It is a rough
//! indicator, never a reason to refuse a run.

use std::fmt;

use buildload_controlplane::{ControlPlane, NodeCapacity, RunStatus, StrategyDescriptor};
use serde::Serialize;

use crate::error::EngineError;

/// Outcome of [`preflight`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreflightReport {
    pub strategy: String,
    pub parallel: usize,
    /// Estimated requests of `parallel` concurrent builds, if known.
    pub required: Option<NodeCapacity>,
    /// Summed node capacity, if the nodes could be listed.
    pub available: Option<NodeCapacity>,
    pub node_count: usize,
    /// Runs found on the cluster, if they could be listed.
    pub existing_runs: Option<ExistingRuns>,
}

/// Runs present on the cluster before the load starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExistingRuns {
    pub total: usize,
    pub completed: usize,
}

impl ExistingRuns {
    pub fn count(runs: &[RunStatus]) -> Self {
        Self {
            total: runs.len(),
            completed: runs.iter().filter(|run| run.completed_at.is_some()).count(),
        }
    }

    /// Runs that have not completed yet.
    pub fn active(&self) -> usize {
        self.total - self.completed
    }
}

impl PreflightReport {
    /// `Some(false)` when the estimate exceeds the cluster capacity.
    pub fn fits(&self) -> Option<bool> {
        let (required, available) = (self.required?, self.available?);
        Some(
            required.cpu_millis <= available.cpu_millis
                && required.memory_bytes <= available.memory_bytes,
        )
    }
}

impl fmt::Display for PreflightReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.required, self.available) {
            (Some(required), Some(available)) => write!(
                f,
                "{} concurrent {} builds request about {} CPU and {} memory, \
                 the {} node(s) of the cluster offer {} CPU and {} memory",
                self.parallel,
                self.strategy,
                format_cpu(required.cpu_millis),
                format_bytes(required.memory_bytes),
                self.node_count,
                format_cpu(available.cpu_millis),
                format_bytes(available.memory_bytes),
            ),
            (Some(required), None) => write!(
                f,
                "{} concurrent {} builds request about {} CPU and {} memory, cluster capacity unknown",
                self.parallel,
                self.strategy,
                format_cpu(required.cpu_millis),
                format_bytes(required.memory_bytes),
            ),
            (None, _) => write!(
                f,
                "no resource estimate available for strategy {}",
                self.strategy
            ),
        }
    }
}

/// Check `strategy` and estimate whether `parallel` builds fit the cluster.
///
/// Fails only when the strategy list could be read and does not contain
/// `strategy`. Listing failures leave the affected part of the report empty.
pub async fn preflight(
    client: &dyn ControlPlane,
    strategy: &str,
    parallel: usize,
) -> Result<PreflightReport, EngineError> {
    let required = match client.list_strategies().await {
        Ok(strategies) => {
            let descriptor = strategies
                .iter()
                .find(|s| s.name == strategy)
                .ok_or_else(|| EngineError::StrategyNotFound {
                    name: strategy.to_string(),
                    available: strategies.iter().map(|s| s.name.clone()).collect(),
                })?;
            Some(estimate_requests(descriptor, parallel))
        }
        Err(e) => {
            tracing::warn!(strategy, error = %e, "Cannot verify that the build strategy exists");
            None
        }
    };

    let existing_runs = match client.list_runs().await {
        Ok(runs) => Some(ExistingRuns::count(&runs)),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot list the build runs on the cluster");
            None
        }
    };
    if let Some(runs) = existing_runs {
        if runs.completed > 0 {
            tracing::info!(
                completed = runs.completed,
                "Completed build runs found on the cluster, consider removing obsolete ones"
            );
        }
        if runs.active() > 0 {
            tracing::warn!(
                active = runs.active(),
                "Active build runs may interfere with the measurement"
            );
        }
    }

    let (available, node_count) = match client.list_nodes().await {
        Ok(nodes) => (Some(total_capacity(&nodes)), nodes.len()),
        Err(e) => {
            tracing::warn!(error = %e, "Cannot read cluster node capacity");
            (None, 0)
        }
    };

    let report = PreflightReport {
        strategy: strategy.to_string(),
        parallel,
        required,
        available,
        node_count,
        existing_runs,
    };

    if report.fits() == Some(false) {
        tracing::warn!(%report, "Cluster capacity is likely insufficient");
    } else {
        tracing::debug!(%report, "Preflight check done");
    }
    Ok(report)
}

/// Largest CPU and memory request of any step, times `parallel`.
pub fn estimate_requests(strategy: &StrategyDescriptor, parallel: usize) -> NodeCapacity {
    let cpu = strategy.steps.iter().map(|s| s.cpu_millis).max().unwrap_or(0);
    let memory = strategy.steps.iter().map(|s| s.memory_bytes).max().unwrap_or(0);
    let parallel = parallel as u64;

    NodeCapacity {
        cpu_millis: cpu.saturating_mul(parallel),
        memory_bytes: memory.saturating_mul(parallel),
    }
}

fn total_capacity(nodes: &[NodeCapacity]) -> NodeCapacity {
    nodes.iter().fold(NodeCapacity::default(), |acc, node| NodeCapacity {
        cpu_millis: acc.cpu_millis.saturating_add(node.cpu_millis),
        memory_bytes: acc.memory_bytes.saturating_add(node.memory_bytes),
    })
}

fn format_cpu(millis: u64) -> String {
    if millis % 1000 == 0 {
        format!("{}", millis / 1000)
    } else {
        format!("{millis}m")
    }
}

fn format_bytes(bytes: u64) -> String {
    const GI: f64 = 1024.0 * 1024.0 * 1024.0;
    const MI: f64 = 1024.0 * 1024.0;
    let value = bytes as f64;
    if value >= GI {
        format!("{:.1}Gi", value / GI)
    } else {
        format!("{:.0}Mi", value / MI)
    }
}

#[cfg(test)]
mod tests {
    use buildload_controlplane::StepResources;

    use super::*;

    fn strategy() -> StrategyDescriptor {
        StrategyDescriptor {
            name: "kaniko".into(),
            steps: vec![
                StepResources {
                    name: "source".into(),
                    cpu_millis: 100,
                    memory_bytes: 2 << 30,
                },
                StepResources {
                    name: "build".into(),
                    cpu_millis: 500,
                    memory_bytes: 1 << 30,
                },
            ],
        }
    }

    #[test]
    fn estimate_uses_largest_request_per_resource() {
        let estimate = estimate_requests(&strategy(), 4);
        assert_eq!(estimate.cpu_millis, 2000);
        assert_eq!(estimate.memory_bytes, 8 << 30);
    }

    #[test]
    fn fits_compares_both_resources() {
        let mut report = PreflightReport {
            strategy: "kaniko".into(),
            parallel: 4,
            required: Some(estimate_requests(&strategy(), 4)),
            available: Some(NodeCapacity {
                cpu_millis: 8000,
                memory_bytes: 16 << 30,
            }),
            node_count: 2,
            existing_runs: None,
        };
        assert_eq!(report.fits(), Some(true));

        report.available = Some(NodeCapacity {
            cpu_millis: 8000,
            memory_bytes: 4 << 30,
        });
        assert_eq!(report.fits(), Some(false));

        report.available = None;
        assert_eq!(report.fits(), None);
    }

    #[test]
    fn total_capacity_sums_nodes() {
        let total = total_capacity(&[
            NodeCapacity {
                cpu_millis: 4000,
                memory_bytes: 1 << 30,
            },
            NodeCapacity {
                cpu_millis: 2000,
                memory_bytes: 1 << 30,
            },
        ]);
        assert_eq!(total.cpu_millis, 6000);
        assert_eq!(total.memory_bytes, 2 << 30);
    }

    #[test]
    fn formatting() {
        assert_eq!(format_cpu(2000), "2");
        assert_eq!(format_cpu(2500), "2500m");
        assert_eq!(format_bytes(8 << 30), "8.0Gi");
        assert_eq!(format_bytes(512 << 20), "512Mi");
    }
}
