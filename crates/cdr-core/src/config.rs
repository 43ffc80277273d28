//! The typed run manifest.
//!
//! Every knob the orchestrator needs comes from one YAML manifest loaded
//! into `RunSpec` — nothing is read from ambient process state.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::sanitize::Sanitizer;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSpec {
    pub version: String,
    pub run: RunSection,
    pub ensemble: EnsembleSection,
    pub executor: ExecutorSection,
    #[serde(default)]
    pub validation: ValidationSection,
    #[serde(default)]
    pub sanitize: Sanitizer,
    #[serde(default)]
    pub pathways: PathwaySection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSection {
    /// Root directory for run directories and results.
    pub output_path: PathBuf,
    /// Headerless CSV of (index, model, scenario) rows.
    pub scenario_list: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnsembleSection {
    /// Ensemble members per (model, scenario).
    pub members: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Parallel workers per batch.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Configs of each batch executed serially before the pool starts.
    #[serde(default = "default_immediate")]
    pub immediate: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Delay before re-reading artifacts after a retry dispatch.
    #[serde(default)]
    pub settle_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorSection {
    /// Argv of the simulation step. Receives the run identity and the
    /// results directory through CDRLAB_* environment variables.
    pub command: Vec<String>,
    /// Optional per-task deadline; expiry is recorded as a task failure.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationSection {
    #[serde(default = "default_warming_bound")]
    pub warming_bound: f64,
    #[serde(default = "default_reference_year")]
    pub reference_year: i32,
}

impl Default for ValidationSection {
    fn default() -> Self {
        Self {
            warming_bound: default_warming_bound(),
            reference_year: default_reference_year(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathwaySection {
    /// Component variables summed into the novel-CDR total.
    #[serde(default)]
    pub novel_cdr_components: Vec<String>,
    #[serde(default = "default_target_variable")]
    pub target_variable: String,
    #[serde(default = "default_netzero_threshold")]
    pub netzero_threshold: f64,
    #[serde(default = "default_unit_scale")]
    pub unit_scale: f64,
}

impl Default for PathwaySection {
    fn default() -> Self {
        Self {
            novel_cdr_components: Vec::new(),
            target_variable: default_target_variable(),
            netzero_threshold: default_netzero_threshold(),
            unit_scale: default_unit_scale(),
        }
    }
}

fn default_batch_size() -> usize {
    24
}

fn default_concurrency() -> usize {
    16
}

fn default_immediate() -> usize {
    3
}

fn default_max_retries() -> u32 {
    10
}

fn default_warming_bound() -> f64 {
    1.55
}

fn default_reference_year() -> i32 {
    2100
}

fn default_target_variable() -> String {
    "Carbon Dioxide Removal|Novel".to_string()
}

fn default_netzero_threshold() -> f64 {
    0.1
}

fn default_unit_scale() -> f64 {
    1.0
}

impl RunSpec {
    /// Structural validation; reports every problem at once.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.run.output_path.as_os_str().is_empty() {
            problems.push("run.output_path is empty");
        }
        if self.run.scenario_list.as_os_str().is_empty() {
            problems.push("run.scenario_list is empty");
        }
        if self.ensemble.members == 0 {
            problems.push("ensemble.members must be positive");
        }
        if self.ensemble.batch_size == 0 {
            problems.push("ensemble.batch_size must be positive");
        }
        if self.ensemble.concurrency == 0 {
            problems.push("ensemble.concurrency must be positive");
        }
        if self.executor.command.is_empty() {
            problems.push("executor.command is empty");
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("invalid run spec: {}", problems.join("; ")))
        }
    }
}

/// Loads and validates a run spec. Relative `run.*` paths are resolved
/// against the manifest's directory.
pub fn load_run_spec(path: &Path) -> Result<RunSpec> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("cannot read run spec {}", path.display()))?;
    let mut spec: RunSpec = serde_yaml::from_str(&raw)
        .with_context(|| format!("cannot parse run spec {}", path.display()))?;
    let base = path.parent().unwrap_or(Path::new("."));
    if spec.run.output_path.is_relative() {
        spec.run.output_path = base.join(&spec.run.output_path);
    }
    if spec.run.scenario_list.is_relative() {
        spec.run.scenario_list = base.join(&spec.run.scenario_list);
    }
    spec.validate()?;
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::ensure_dir;
    use chrono::Utc;

    const MINIMAL: &str = "\
version: '0.1'
run:
  output_path: /tmp/cdrlab_out
  scenario_list: /tmp/scenarios.csv
ensemble:
  members: 10
executor:
  command: [python, run_member.py]
";

    #[test]
    fn minimal_spec_gets_defaults() {
        let spec: RunSpec = serde_yaml::from_str(MINIMAL).expect("parse");
        spec.validate().expect("valid");
        assert_eq!(spec.ensemble.batch_size, 24);
        assert_eq!(spec.ensemble.concurrency, 16);
        assert_eq!(spec.ensemble.immediate, 3);
        assert_eq!(spec.ensemble.max_retries, 10);
        assert_eq!(spec.validation.warming_bound, 1.55);
        assert_eq!(spec.validation.reference_year, 2100);
        assert_eq!(spec.sanitize, Sanitizer::default());
        assert_eq!(spec.pathways.netzero_threshold, 0.1);
    }

    #[test]
    fn validation_reports_every_problem() {
        let mut spec: RunSpec = serde_yaml::from_str(MINIMAL).expect("parse");
        spec.ensemble.members = 0;
        spec.ensemble.batch_size = 0;
        spec.executor.command.clear();
        let msg = spec.validate().expect_err("invalid").to_string();
        assert!(msg.contains("ensemble.members"), "{}", msg);
        assert!(msg.contains("ensemble.batch_size"), "{}", msg);
        assert!(msg.contains("executor.command"), "{}", msg);
    }

    #[test]
    fn relative_paths_resolve_against_spec_dir() {
        let dir = std::env::temp_dir().join(format!(
            "cdrlab_config_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        let spec_path = dir.join("cdrlab.yaml");
        std::fs::write(
            &spec_path,
            "\
version: '0.1'
run:
  output_path: out
  scenario_list: data/scenarios.csv
ensemble:
  members: 2
executor:
  command: [python, run_member.py]
",
        )
        .expect("write spec");
        let spec = load_run_spec(&spec_path).expect("load");
        assert_eq!(spec.run.output_path, dir.join("out"));
        assert_eq!(spec.run.scenario_list, dir.join("data/scenarios.csv"));
        let _ = std::fs::remove_dir_all(dir);
    }
}
