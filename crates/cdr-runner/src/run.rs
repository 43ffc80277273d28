use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cdr_core::config::RunSpec;
use cdr_core::fsutil::{
    atomic_write_bytes, atomic_write_json_pretty, canonical_json_digest, ensure_dir,
};
use cdr_core::space::{load_scenario_list, RunConfig};

use crate::executor::ProcessExecutor;
use crate::retry::{drive, EnsembleReport, RetryPlan};

#[derive(Debug)]
pub struct RunResult {
    pub run_dir: PathBuf,
    pub run_id: String,
    pub report: EnsembleReport,
}

fn write_run_state(
    run_dir: &Path,
    run_id: &str,
    status: &str,
    failed: Option<usize>,
) -> Result<()> {
    let payload = json!({
        "schema_version": "run_state_v1",
        "run_id": run_id,
        "status": status,
        "failed_identities": failed,
        "updated_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(&run_dir.join("run_state.json"), &payload)
}

struct RunStateGuard {
    run_dir: PathBuf,
    run_id: String,
    done: bool,
}

impl RunStateGuard {
    fn new(run_dir: &Path, run_id: &str) -> Self {
        Self {
            run_dir: run_dir.to_path_buf(),
            run_id: run_id.to_string(),
            done: false,
        }
    }

    fn complete(&mut self, status: &str, failed: usize) -> Result<()> {
        write_run_state(&self.run_dir, &self.run_id, status, Some(failed))?;
        self.done = true;
        Ok(())
    }
}

impl Drop for RunStateGuard {
    fn drop(&mut self) {
        if !self.done {
            let _ = write_run_state(&self.run_dir, &self.run_id, "failed", None);
        }
    }
}

/// Drives a full run set from a resolved spec: run directory + provenance
/// files, dispatch through the retry loop, aggregated outputs.
pub fn run_ensemble(spec: &RunSpec) -> Result<RunResult> {
    spec.validate()?;
    let pairs = load_scenario_list(&spec.run.scenario_list)?;
    if pairs.is_empty() {
        return Err(anyhow!(
            "scenario list {} is empty",
            spec.run.scenario_list.display()
        ));
    }

    let run_id = format!("run_{}", Utc::now().format("%Y%m%d_%H%M%S"));
    let run_dir = spec.run.output_path.join("runs").join(&run_id);
    let results_dir = run_dir.join("results");
    ensure_dir(&results_dir)?;

    let resolved = serde_json::to_value(spec)?;
    atomic_write_json_pretty(&run_dir.join("resolved_run.json"), &resolved)?;
    atomic_write_bytes(
        &run_dir.join("resolved_run.digest"),
        canonical_json_digest(&resolved).as_bytes(),
    )?;
    let manifest = json!({
        "schema_version": "manifest_v1",
        "run_id": run_id,
        "runner_version": "cdrlab-0.1.0",
        "scenario_pairs": pairs.len(),
        "ensemble_members": spec.ensemble.members,
        "created_at": Utc::now().to_rfc3339(),
    });
    atomic_write_json_pretty(&run_dir.join("manifest.json"), &manifest)?;

    write_run_state(&run_dir, &run_id, "running", None)?;
    let mut guard = RunStateGuard::new(&run_dir, &run_id);

    let executor = ProcessExecutor::new(
        spec.executor.command.clone(),
        &results_dir,
        spec.sanitize.clone(),
        spec.executor.timeout_seconds.map(Duration::from_secs),
    )?;
    let plan = RetryPlan::from_spec(spec);
    let report = drive(&executor, &pairs, &plan, &results_dir);

    write_report_outputs(&run_dir, &report)?;
    let status = if report.failed.is_empty() {
        "completed"
    } else {
        "completed_with_failures"
    };
    guard.complete(status, report.failed.len())?;

    Ok(RunResult {
        run_dir,
        run_id,
        report,
    })
}

/// Writes the aggregated CDR/TEMP tables plus the permanently-failed
/// identity list next to each other.
pub fn write_report_outputs(dir: &Path, report: &EnsembleReport) -> Result<()> {
    report.cdr.write_csv(&dir.join("cdr.csv"))?;
    report.temp.write_csv(&dir.join("temp.csv"))?;
    write_failed_csv(&dir.join("failed.csv"), &report.failed)?;
    Ok(())
}

fn write_failed_csv(path: &Path, failed: &[RunConfig]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    for config in failed {
        writer.write_record([
            config.ensemble_member.to_string(),
            config.model.clone(),
            config.scenario.clone(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdr_core::config::{EnsembleSection, ExecutorSection, RunSection};
    use cdr_core::series::SeriesTable;
    use std::fs;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "cdrlab_run_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        dir
    }

    fn spec_for(dir: &Path, scenario_list: &Path, members: u32, command: Vec<String>) -> RunSpec {
        RunSpec {
            version: "0.1".to_string(),
            run: RunSection {
                output_path: dir.to_path_buf(),
                scenario_list: scenario_list.to_path_buf(),
            },
            ensemble: EnsembleSection {
                members,
                batch_size: 2,
                concurrency: 2,
                immediate: 1,
                max_retries: 1,
                settle_seconds: 0,
            },
            executor: ExecutorSection {
                command,
                timeout_seconds: None,
            },
            validation: Default::default(),
            sanitize: Default::default(),
            pathways: Default::default(),
        }
    }

    #[cfg(unix)]
    const ARTIFACT_SCRIPT: &str = r#"
base="${CDRLAB_OUTPUT_MODEL}_${CDRLAB_SCENARIO}_${CDRLAB_ENSEMBLE_MEMBER}"
printf 'Model,Scenario,Region,Variable,Unit,2100\n%s,%s,World,Carbon Dioxide Removal|Novel,Mt CO2/yr,100\n' \
  "$CDRLAB_MODEL" "$CDRLAB_SCENARIO" > "$CDRLAB_RESULTS_DIR/CDR_${base}.csv"
printf 'Model,Scenario,Region,Variable,Unit,2100\n%s,%s,World,Surface Temperature,K,1.4\n' \
  "$CDRLAB_MODEL" "$CDRLAB_SCENARIO" > "$CDRLAB_RESULTS_DIR/TEMP_${base}.csv"
"#;

    #[cfg(unix)]
    #[test]
    fn run_ensemble_end_to_end_with_a_shell_step() {
        let dir = scratch_dir("e2e");
        let scenario_list = dir.join("scenarios.csv");
        fs::write(&scenario_list, "0,GCAM 5.3,Low\n").expect("scenario list");

        let spec = spec_for(
            &dir,
            &scenario_list,
            2,
            vec!["sh".into(), "-c".into(), ARTIFACT_SCRIPT.into()],
        );
        let result = run_ensemble(&spec).expect("run");
        assert!(result.report.failed.is_empty());
        assert_eq!(result.report.cdr.len(), 2);

        let state: serde_json::Value = serde_json::from_slice(
            &fs::read(result.run_dir.join("run_state.json")).expect("state file"),
        )
        .expect("state json");
        assert_eq!(state["status"], "completed");
        assert!(result.run_dir.join("resolved_run.digest").exists());

        let written = SeriesTable::read_csv(&result.run_dir.join("temp.csv")).expect("temp.csv");
        assert_eq!(written.len(), 2);
        assert_eq!(written.rows[0].value_at(2100), Some(1.4));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn empty_scenario_list_terminates_the_run() {
        let dir = scratch_dir("empty");
        let scenario_list = dir.join("scenarios.csv");
        fs::write(&scenario_list, "").expect("scenario list");
        let spec = spec_for(&dir, &scenario_list, 2, vec!["true".into()]);
        let err = run_ensemble(&spec).expect_err("empty list must be fatal");
        assert!(err.to_string().contains("is empty"), "{}", err);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn failed_identities_are_written_one_row_each() {
        let dir = scratch_dir("failedcsv");
        let report = EnsembleReport {
            cdr: SeriesTable::new(),
            temp: SeriesTable::new(),
            failed: vec![
                RunConfig::new(2, "AIM/CGE 2.2", "SSP1-19"),
                RunConfig::new(5, "GCAM 5.3", "Low"),
            ],
            cycles: 10,
        };
        write_report_outputs(&dir, &report).expect("write outputs");
        let raw = fs::read_to_string(dir.join("failed.csv")).expect("failed.csv");
        let lines: Vec<&str> = raw.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], "2,AIM/CGE 2.2,SSP1-19");
        let _ = fs::remove_dir_all(dir);
    }
}
