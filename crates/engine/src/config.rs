//! Engine timing configuration.

use std::time::Duration;

/// Default interval between status polls.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default limit for a job to become registered.
const DEFAULT_REGISTRATION_TIMEOUT: Duration = Duration::from_secs(5 * 60);
/// Completion limit when neither the run nor the job sets one.
const DEFAULT_RUN_TIMEOUT: Duration = Duration::from_secs(5 * 60);
const DEFAULT_DELETE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_DELETE_TIMEOUT: Duration = Duration::from_secs(10);

/// Label the platform puts on sub-runs and execution units, valued with the
/// owning run's name.
pub const DEFAULT_SUB_RUN_LABEL: &str = "buildrun.shipwright.io/name";

/// Timing and lookup settings shared by every engine component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Interval between registration and completion polls.
    pub poll_interval: Duration,
    pub registration_timeout: Duration,
    /// Completion timeout used when neither run nor job carries one.
    pub default_run_timeout: Duration,
    /// Interval between polls while waiting for a deleted resource to vanish.
    pub delete_poll_interval: Duration,
    pub delete_timeout: Duration,
    /// Label key used to find sub-runs and execution units of a run.
    pub sub_run_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            registration_timeout: DEFAULT_REGISTRATION_TIMEOUT,
            default_run_timeout: DEFAULT_RUN_TIMEOUT,
            delete_poll_interval: DEFAULT_DELETE_POLL_INTERVAL,
            delete_timeout: DEFAULT_DELETE_TIMEOUT,
            sub_run_label: DEFAULT_SUB_RUN_LABEL.to_string(),
        }
    }
}

impl EngineConfig {
    /// `label=<run>` selector matching the sub-resources of `run_name`.
    pub fn sub_run_selector(&self, run_name: &str) -> String {
        format!("{}={run_name}", self.sub_run_label)
    }
}
