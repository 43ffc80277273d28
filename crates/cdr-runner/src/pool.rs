use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc;
use std::thread;

use thiserror::Error;
use tracing::debug;

use cdr_core::space::RunConfig;

use crate::executor::Executor;

/// Why a run is in the failure set.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FailureCause {
    #[error("execution failed: {0}")]
    Execution(String),
    #[error("artifact unreadable: {0}")]
    ArtifactRead(String),
    #[error("warming {value} exceeds {bound} at {year}")]
    Validation { value: f64, bound: f64, year: i32 },
}

/// Per-task result. Every config put into a batch comes back as exactly one
/// outcome; a failure never takes its siblings down with it.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Completed(RunConfig),
    Failed(RunConfig, FailureCause),
}

impl TaskOutcome {
    pub fn config(&self) -> &RunConfig {
        match self {
            TaskOutcome::Completed(config) => config,
            TaskOutcome::Failed(config, _) => config,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failed(..))
    }
}

/// Executes one batch: the first `immediate` configs serially in the caller
/// (cheap to debug, bounds startup latency), the rest on exactly
/// `concurrency` worker threads pulling from a shared index. Returns one
/// outcome per config after the pool has fully drained.
pub fn run_batch<E: Executor>(
    executor: &E,
    batch: &[RunConfig],
    concurrency: usize,
    immediate: usize,
) -> Vec<TaskOutcome> {
    let total = batch.len();
    let immediate = immediate.min(total);
    let mut outcomes: Vec<TaskOutcome> = Vec::with_capacity(total);
    for (i, config) in batch[..immediate].iter().enumerate() {
        outcomes.push(run_one(executor, config));
        debug!(completed = i + 1, total, "task finished");
    }

    let rest = &batch[immediate..];
    if rest.is_empty() {
        return outcomes;
    }

    let workers = concurrency.clamp(1, rest.len());
    let next = AtomicUsize::new(0);
    let completed = AtomicUsize::new(immediate);
    let (tx, rx) = mpsc::channel::<TaskOutcome>();
    thread::scope(|scope| {
        for _ in 0..workers {
            let tx = tx.clone();
            let next = &next;
            let completed = &completed;
            scope.spawn(move || loop {
                let idx = next.fetch_add(1, Ordering::SeqCst);
                if idx >= rest.len() {
                    break;
                }
                let outcome = run_one(executor, &rest[idx]);
                let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                debug!(completed = done, total, "task finished");
                if tx.send(outcome).is_err() {
                    break;
                }
            });
        }
        drop(tx);
        outcomes.extend(rx.iter());
    });
    outcomes
}

fn run_one<E: Executor + ?Sized>(executor: &E, config: &RunConfig) -> TaskOutcome {
    match executor.execute(config) {
        Ok(()) => TaskOutcome::Completed(config.clone()),
        Err(err) => TaskOutcome::Failed(
            config.clone(),
            FailureCause::Execution(format!("{:#}", err)),
        ),
    }
}
