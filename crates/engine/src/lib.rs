//! Execution and measurement engine of the build load generator.
//!
//! [`LifecycleController`] drives single builds, [`Orchestrator`] runs many
//! of them at once, and [`SeriesDriver`] sweeps the parallelism level. Test
//! plans and the pre-flight advisory build on the same pieces.

pub mod config;
mod diagnostics;
pub mod error;
pub mod events;
pub mod lifecycle;
mod lookup;
pub mod orchestrator;
mod polling;
pub mod preflight;
pub mod series;
pub mod testplan;

pub use config::EngineConfig;
pub use error::EngineError;
pub use events::{EventSink, LoadEvent};
pub use lifecycle::LifecycleController;
pub use orchestrator::{Orchestrator, ParallelRun, BUILD_ENTITY};
pub use preflight::{preflight, ExistingRuns, PreflightReport};
pub use series::{series_levels, SeriesDriver, BUILDRUN_ENTITY};
pub use testplan::{execute_test_plan, TestPlan};
