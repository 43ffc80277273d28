//! Batch execution with bounded retry.
//!
//! The orchestrator fans a configuration space out over a worker pool,
//! collects and validates the per-run artifacts, and re-dispatches the
//! failure set until it drains or the retry budget is spent.

pub mod collector;
pub mod executor;
pub mod pool;
pub mod retry;
pub mod run;
pub mod validate;

pub use collector::{collect, ScenarioCollection};
pub use executor::{Executor, ProcessExecutor};
pub use pool::{run_batch, FailureCause, TaskOutcome};
pub use retry::{collect_all, drive, EnsembleReport, RetryPlan};
pub use run::{run_ensemble, write_report_outputs, RunResult};
pub use validate::{violations, WarmingCriterion};
