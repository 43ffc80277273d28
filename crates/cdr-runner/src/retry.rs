use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use cdr_core::config::RunSpec;
use cdr_core::sanitize::Sanitizer;
use cdr_core::series::SeriesTable;
use cdr_core::space::{batches, config_space, ModelScenario, RunConfig};

use crate::collector::collect;
use crate::executor::Executor;
use crate::pool::{run_batch, TaskOutcome};
use crate::validate::{violations, WarmingCriterion};

/// Everything the retry loop needs to know, resolved once from the run spec.
#[derive(Debug, Clone)]
pub struct RetryPlan {
    pub members: u32,
    pub batch_size: usize,
    pub concurrency: usize,
    pub immediate: usize,
    pub max_retries: u32,
    pub settle: Option<Duration>,
    pub criterion: WarmingCriterion,
    pub sanitizer: Sanitizer,
}

impl RetryPlan {
    pub fn from_spec(spec: &RunSpec) -> Self {
        Self {
            members: spec.ensemble.members,
            batch_size: spec.ensemble.batch_size,
            concurrency: spec.ensemble.concurrency,
            immediate: spec.ensemble.immediate,
            max_retries: spec.ensemble.max_retries,
            settle: (spec.ensemble.settle_seconds > 0)
                .then(|| Duration::from_secs(spec.ensemble.settle_seconds)),
            criterion: WarmingCriterion {
                upper_bound: spec.validation.warming_bound,
                year: spec.validation.reference_year,
            },
            sanitizer: spec.sanitize.clone(),
        }
    }
}

/// Final state of one orchestrated run set.
#[derive(Debug, Clone)]
pub struct EnsembleReport {
    pub cdr: SeriesTable,
    pub temp: SeriesTable,
    /// Identities that never produced an accepted artifact.
    pub failed: Vec<RunConfig>,
    /// Retry cycles actually used (0 when the first sweep was clean).
    pub cycles: u32,
}

/// Runs the full configuration space once, then re-dispatches the failure
/// set until it is empty or `max_retries` cycles are spent. Exhaustion is
/// reported, never raised.
pub fn drive<E: Executor>(
    executor: &E,
    pairs: &[ModelScenario],
    plan: &RetryPlan,
    results_dir: &Path,
) -> EnsembleReport {
    let configs = config_space(pairs, plan.members);
    info!(
        runs = configs.len(),
        pairs = pairs.len(),
        members = plan.members,
        "dispatching full configuration space"
    );
    let mut failures = dispatch(executor, &configs, plan);
    settle(plan);

    let mut collected: BTreeMap<(String, String), (SeriesTable, SeriesTable)> = BTreeMap::new();
    let all_pairs: BTreeSet<(String, String)> = pairs
        .iter()
        .map(|p| (p.model.clone(), p.scenario.clone()))
        .collect();
    collect_pairs(&all_pairs, plan, results_dir, &mut collected, &mut failures);

    let mut cycles = 0;
    while !failures.is_empty() && cycles < plan.max_retries {
        cycles += 1;
        info!(
            cycle = cycles,
            max_retries = plan.max_retries,
            failing = failures.len(),
            "retry cycle"
        );
        let retry_configs: Vec<RunConfig> = failures.iter().cloned().collect();
        let mut fresh = dispatch(executor, &retry_configs, plan);
        settle(plan);

        // Re-collect only the implicated pairs; their tables are replaced
        // wholesale so the aggregate always reflects fresh artifact reads.
        let implicated: BTreeSet<(String, String)> = retry_configs
            .iter()
            .map(|c| (c.model.clone(), c.scenario.clone()))
            .collect();
        collect_pairs(&implicated, plan, results_dir, &mut collected, &mut fresh);
        failures = fresh;
    }

    let mut cdr = SeriesTable::new();
    let mut temp = SeriesTable::new();
    for (_, (pair_cdr, pair_temp)) in collected {
        cdr.extend(pair_cdr);
        temp.extend(pair_temp);
    }
    if failures.is_empty() {
        info!(cycles, "ensemble complete");
    } else {
        warn!(
            cycles,
            failed = failures.len(),
            "retry budget exhausted; reporting permanent failures"
        );
    }
    EnsembleReport {
        cdr,
        temp,
        failed: failures.into_iter().collect(),
        cycles,
    }
}

/// Collection + validation over an existing results directory, without
/// dispatching anything.
pub fn collect_all(
    pairs: &[ModelScenario],
    plan: &RetryPlan,
    results_dir: &Path,
) -> EnsembleReport {
    let mut collected = BTreeMap::new();
    let mut failures = BTreeSet::new();
    let keys: BTreeSet<(String, String)> = pairs
        .iter()
        .map(|p| (p.model.clone(), p.scenario.clone()))
        .collect();
    collect_pairs(&keys, plan, results_dir, &mut collected, &mut failures);
    let mut cdr = SeriesTable::new();
    let mut temp = SeriesTable::new();
    for (_, (pair_cdr, pair_temp)) in collected {
        cdr.extend(pair_cdr);
        temp.extend(pair_temp);
    }
    EnsembleReport {
        cdr,
        temp,
        failed: failures.into_iter().collect(),
        cycles: 0,
    }
}

fn dispatch<E: Executor>(
    executor: &E,
    configs: &[RunConfig],
    plan: &RetryPlan,
) -> BTreeSet<RunConfig> {
    let mut failures = BTreeSet::new();
    let batch_count = configs.len().div_ceil(plan.batch_size);
    for (i, batch) in batches(configs, plan.batch_size).enumerate() {
        info!(batch = i + 1, batch_count, size = batch.len(), "dispatching batch");
        for outcome in run_batch(executor, batch, plan.concurrency, plan.immediate) {
            if let TaskOutcome::Failed(config, cause) = outcome {
                warn!(
                    model = %config.model,
                    scenario = %config.scenario,
                    member = config.ensemble_member,
                    cause = %cause,
                    "task failed"
                );
                failures.insert(config);
            }
        }
    }
    failures
}

fn collect_pairs(
    pairs: &BTreeSet<(String, String)>,
    plan: &RetryPlan,
    results_dir: &Path,
    collected: &mut BTreeMap<(String, String), (SeriesTable, SeriesTable)>,
    failures: &mut BTreeSet<RunConfig>,
) {
    for (model, scenario) in pairs {
        let collection = collect(model, scenario, plan.members, results_dir, &plan.sanitizer);
        for (config, cause) in collection.failed {
            warn!(
                model = %config.model,
                scenario = %config.scenario,
                member = config.ensemble_member,
                cause = %cause,
                "collection failure"
            );
            failures.insert(config);
        }
        for config in violations(&collection.temp, &plan.criterion) {
            warn!(
                model = %config.model,
                scenario = %config.scenario,
                member = config.ensemble_member,
                bound = plan.criterion.upper_bound,
                year = plan.criterion.year,
                "validation violation"
            );
            failures.insert(config);
        }
        collected.insert(
            (model.clone(), scenario.clone()),
            (collection.cdr, collection.temp),
        );
    }
}

fn settle(plan: &RetryPlan) {
    if let Some(delay) = plan.settle {
        thread::sleep(delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use cdr_core::fsutil::ensure_dir;
    use cdr_core::sanitize::{artifact_file_name, ArtifactKind};
    use chrono::Utc;
    use std::fs;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Succeeds after a per-config number of engineered failures, then
    /// writes both artifacts with a fixed 2100 temperature.
    struct FlakyExecutor {
        results_dir: PathBuf,
        sanitizer: Sanitizer,
        failures_before_success: u32,
        temp_at_2100: f64,
        attempts: Mutex<BTreeMap<RunConfig, u32>>,
    }

    impl FlakyExecutor {
        fn new(results_dir: &Path, failures_before_success: u32, temp_at_2100: f64) -> Self {
            Self {
                results_dir: results_dir.to_path_buf(),
                sanitizer: Sanitizer::default(),
                failures_before_success,
                temp_at_2100,
                attempts: Mutex::new(BTreeMap::new()),
            }
        }

        fn attempts_for(&self, config: &RunConfig) -> u32 {
            *self
                .attempts
                .lock()
                .expect("attempts lock")
                .get(config)
                .unwrap_or(&0)
        }
    }

    impl Executor for FlakyExecutor {
        fn execute(&self, config: &RunConfig) -> anyhow::Result<()> {
            let attempt = {
                let mut attempts = self.attempts.lock().expect("attempts lock");
                let n = attempts.entry(config.clone()).or_insert(0);
                *n += 1;
                *n
            };
            if attempt <= self.failures_before_success {
                return Err(anyhow!("engineered failure on attempt {}", attempt));
            }
            for (kind, variable, unit, value) in [
                (ArtifactKind::Cdr, "Carbon Dioxide Removal|Novel", "Mt CO2/yr", 100.0),
                (ArtifactKind::Temp, "Surface Temperature", "K", self.temp_at_2100),
            ] {
                let name = artifact_file_name(
                    kind,
                    &self.sanitizer,
                    &config.model,
                    &config.scenario,
                    config.ensemble_member,
                );
                fs::write(
                    self.results_dir.join(name),
                    format!(
                        "Model,Scenario,Region,Variable,Unit,2100\n{},{},World,{},{},{}\n",
                        config.model, config.scenario, variable, unit, value
                    ),
                )?;
            }
            Ok(())
        }
    }

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cdrlab_retry_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        dir
    }

    fn plan(members: u32, max_retries: u32) -> RetryPlan {
        RetryPlan {
            members,
            batch_size: 4,
            concurrency: 2,
            immediate: 1,
            max_retries,
            settle: None,
            criterion: WarmingCriterion::default(),
            sanitizer: Sanitizer::default(),
        }
    }

    fn one_pair() -> Vec<ModelScenario> {
        vec![ModelScenario {
            model: "GCAM 5.3".into(),
            scenario: "Low".into(),
        }]
    }

    #[test]
    fn flaky_identity_drains_after_two_retries() {
        let dir = scratch_dir("flaky");
        let executor = FlakyExecutor::new(&dir, 2, 1.4);
        let report = drive(&executor, &one_pair(), &plan(1, 10), &dir);
        assert!(report.failed.is_empty());
        assert_eq!(report.cycles, 2);
        assert_eq!(
            executor.attempts_for(&RunConfig::new(0, "GCAM 5.3", "Low")),
            3
        );
        assert_eq!(report.cdr.len(), 1);
        assert_eq!(report.temp.len(), 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn permanent_failure_survives_exactly_max_retries_cycles() {
        let dir = scratch_dir("permanent");
        let executor = FlakyExecutor::new(&dir, u32::MAX, 1.4);
        let report = drive(&executor, &one_pair(), &plan(1, 2), &dir);
        assert_eq!(report.cycles, 2);
        assert_eq!(report.failed, vec![RunConfig::new(0, "GCAM 5.3", "Low")]);
        // 1 initial attempt + 2 retries, never more.
        assert_eq!(
            executor.attempts_for(&RunConfig::new(0, "GCAM 5.3", "Low")),
            3
        );
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn validation_violations_are_reexecuted_not_just_revalidated() {
        let dir = scratch_dir("violation");
        // Always succeeds but always lands above the bound.
        let executor = FlakyExecutor::new(&dir, 0, 1.6);
        let report = drive(&executor, &one_pair(), &plan(1, 2), &dir);
        assert_eq!(report.failed, vec![RunConfig::new(0, "GCAM 5.3", "Low")]);
        assert_eq!(
            executor.attempts_for(&RunConfig::new(0, "GCAM 5.3", "Low")),
            3
        );
        // The artifact itself was readable, so it stays in the aggregate.
        assert_eq!(report.temp.len(), 1);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn clean_first_sweep_uses_no_retries() {
        let dir = scratch_dir("clean");
        let executor = FlakyExecutor::new(&dir, 0, 1.4);
        let report = drive(&executor, &one_pair(), &plan(4, 10), &dir);
        assert!(report.failed.is_empty());
        assert_eq!(report.cycles, 0);
        assert_eq!(report.cdr.len(), 4);
        for member in 0..4 {
            assert_eq!(
                executor.attempts_for(&RunConfig::new(member, "GCAM 5.3", "Low")),
                1,
                "clean members must not be re-dispatched"
            );
        }
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn collect_all_reports_without_dispatching() {
        let dir = scratch_dir("collect_all");
        let executor = FlakyExecutor::new(&dir, 0, 1.4);
        for member in 0..2 {
            executor
                .execute(&RunConfig::new(member, "GCAM 5.3", "Low"))
                .expect("seed artifacts");
        }
        let report = collect_all(&one_pair(), &plan(3, 0), &dir);
        assert_eq!(report.cycles, 0);
        assert_eq!(report.cdr.len(), 2);
        assert_eq!(report.failed, vec![RunConfig::new(2, "GCAM 5.3", "Low")]);
        let _ = fs::remove_dir_all(dir);
    }
}
