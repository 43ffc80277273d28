use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use cdr_core::config::{load_run_spec, RunSpec};
use cdr_core::fsutil::ensure_dir;
use cdr_core::series::SeriesTable;
use cdr_core::space::load_scenario_list;
use cdr_pathways::{
    aggregate_novel_cdr, construct_all, netzero_year, NetZeroLookup, Pathway, PathwaySettings,
};
use cdr_runner::{collect_all, run_ensemble, write_report_outputs, RetryPlan};

#[derive(Parser)]
#[command(name = "cdrlab", version = "0.1.0", about = "CDR ensemble runner CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Dispatch the full ensemble and retry failures until drained.
    Run {
        spec: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Collect and validate an existing results directory.
    Collect {
        spec: PathBuf,
        #[arg(long)]
        results: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Construct novel-CDR pathways from a base table and a net-zero lookup.
    Pathways {
        spec: PathBuf,
        #[arg(long)]
        base: PathBuf,
        #[arg(long)]
        lookup: PathBuf,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Derive net-zero years from an emissions table into a lookup skeleton.
    Netzero {
        spec: PathBuf,
        #[arg(long)]
        emissions: PathBuf,
        #[arg(long)]
        variable: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Print the resolved run summary without executing anything.
    Describe {
        spec: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Write a run spec template.
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Remove generated run directories.
    Clean {
        spec: PathBuf,
        #[arg(long)]
        runs: bool,
        #[arg(long)]
        pathways: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    match run_command(cli.command) {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                emit_json(&json_error("command_failed", err.to_string(), json!({})));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn run_command(command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Run { spec, json } => {
            let spec = load_run_spec(&spec)?;
            let summary = summarize_spec(&spec)?;
            let result = run_ensemble(&spec)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "run",
                    "summary": summary_to_json(&summary),
                    "run": {
                        "run_id": result.run_id,
                        "run_dir": result.run_dir.display().to_string(),
                        "retry_cycles": result.report.cycles,
                        "failed_identities": result.report.failed.len(),
                        "failed": failed_to_json(&result.report.failed),
                    }
                })));
            }
            print_summary(&summary);
            println!("run_id: {}", result.run_id);
            println!("run_dir: {}", result.run_dir.display());
            println!("retry_cycles: {}", result.report.cycles);
            println!("failed_identities: {}", result.report.failed.len());
            for config in &result.report.failed {
                println!(
                    "failed: member {} of {} / {}",
                    config.ensemble_member, config.model, config.scenario
                );
            }
        }
        Commands::Collect {
            spec,
            results,
            out,
            json,
        } => {
            let spec = load_run_spec(&spec)?;
            let pairs = load_scenario_list(&spec.run.scenario_list)?;
            if pairs.is_empty() {
                return Err(anyhow!(
                    "scenario list {} is empty",
                    spec.run.scenario_list.display()
                ));
            }
            let plan = RetryPlan::from_spec(&spec);
            let report = collect_all(&pairs, &plan, &results);
            let out_dir = out.unwrap_or_else(|| {
                results
                    .parent()
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| results.clone())
            });
            ensure_dir(&out_dir)?;
            write_report_outputs(&out_dir, &report)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "collect",
                    "out_dir": out_dir.display().to_string(),
                    "cdr_rows": report.cdr.len(),
                    "temp_rows": report.temp.len(),
                    "failed_identities": report.failed.len(),
                    "failed": failed_to_json(&report.failed),
                })));
            }
            println!("out_dir: {}", out_dir.display());
            println!("cdr_rows: {}", report.cdr.len());
            println!("temp_rows: {}", report.temp.len());
            println!("failed_identities: {}", report.failed.len());
            for config in &report.failed {
                println!(
                    "failed: member {} of {} / {}",
                    config.ensemble_member, config.model, config.scenario
                );
            }
        }
        Commands::Pathways {
            spec,
            base,
            lookup,
            out,
            json,
        } => {
            let spec = load_run_spec(&spec)?;
            let base_table = SeriesTable::read_csv(&base)?;
            let base_table = if spec.pathways.novel_cdr_components.is_empty() {
                base_table
            } else {
                aggregate_novel_cdr(
                    &base_table,
                    &spec.pathways.novel_cdr_components,
                    &spec.pathways.target_variable,
                )
            };
            if base_table.is_empty() {
                return Err(anyhow!("base table {} has no usable rows", base.display()));
            }
            let lookup = NetZeroLookup::from_csv(&lookup)?;
            if lookup.is_empty() {
                return Err(anyhow!("net-zero lookup is empty"));
            }
            let settings = PathwaySettings {
                unit_scale: spec.pathways.unit_scale,
                ..Default::default()
            };
            let identities = lookup.identities();
            let (pathways, failed) =
                construct_all(&base_table, &lookup, &identities, &settings);

            let out_dir = out.unwrap_or_else(|| spec.run.output_path.join("pathways"));
            ensure_dir(&out_dir)?;
            let combined = SeriesTable::concat(pathways.iter().map(|p| p.table.clone()));
            combined.write_csv(&out_dir.join("pathways.csv"))?;
            write_pathway_summary(&out_dir.join("pathways_summary.csv"), &pathways)?;

            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "pathways",
                    "out_dir": out_dir.display().to_string(),
                    "constructed": pathways.len(),
                    "failed": failed
                        .iter()
                        .map(|(config, err)| json!({
                            "ensemble_member": config.ensemble_member,
                            "model": config.model,
                            "scenario": config.scenario,
                            "error": err.to_string(),
                        }))
                        .collect::<Vec<_>>(),
                })));
            }
            println!("out_dir: {}", out_dir.display());
            println!("constructed: {}", pathways.len());
            println!("failed: {}", failed.len());
            for (config, err) in &failed {
                println!(
                    "failed: member {} of {} / {}: {}",
                    config.ensemble_member, config.model, config.scenario, err
                );
            }
        }
        Commands::Netzero {
            spec,
            emissions,
            variable,
            out,
            json,
        } => {
            let spec = load_run_spec(&spec)?;
            let table = SeriesTable::read_csv(&emissions)?;
            let threshold = spec.pathways.netzero_threshold;
            let out_path = out.unwrap_or_else(|| spec.run.output_path.join("netzero.csv"));
            let (written, skipped) =
                write_netzero_lookup(&out_path, &table, variable.as_deref(), threshold)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "netzero",
                    "out": out_path.display().to_string(),
                    "threshold": threshold,
                    "written": written,
                    "never_crossing": skipped,
                })));
            }
            println!("out: {}", out_path.display());
            println!("threshold: {}", threshold);
            println!("written: {}", written);
            println!("never_crossing: {}", skipped);
        }
        Commands::Describe { spec, json } => {
            let spec = load_run_spec(&spec)?;
            let summary = summarize_spec(&spec)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "describe",
                    "summary": summary_to_json(&summary),
                })));
            }
            print_summary(&summary);
        }
        Commands::Init { force } => {
            let path = PathBuf::from("cdrlab.yaml");
            if !force && path.exists() {
                return Err(anyhow!(
                    "spec file already exists (use --force): {}",
                    path.display()
                ));
            }
            std::fs::write(&path, SPEC_TEMPLATE)?;
            println!("wrote: {}", path.display());
            println!("next: edit {} \u{2014} fill in all fields marked REQUIRED", path.display());
            println!("next: cdrlab describe {}", path.display());
        }
        Commands::Clean {
            spec,
            runs,
            pathways,
        } => {
            let spec = load_run_spec(&spec)?;
            if runs {
                let runs_dir = spec.run.output_path.join("runs");
                if runs_dir.exists() {
                    std::fs::remove_dir_all(&runs_dir)?;
                    println!("removed: {}", runs_dir.display());
                }
            }
            if pathways {
                let pathways_dir = spec.run.output_path.join("pathways");
                if pathways_dir.exists() {
                    std::fs::remove_dir_all(&pathways_dir)?;
                    println!("removed: {}", pathways_dir.display());
                }
            }
        }
    }
    Ok(None)
}

struct SpecSummary {
    scenario_pairs: usize,
    members: u32,
    total_runs: usize,
    batch_size: usize,
    batch_count: usize,
    concurrency: usize,
    immediate: usize,
    max_retries: u32,
    warming_bound: f64,
    reference_year: i32,
    executor: Vec<String>,
    output_path: PathBuf,
}

fn summarize_spec(spec: &RunSpec) -> Result<SpecSummary> {
    let pairs = load_scenario_list(&spec.run.scenario_list)?;
    if pairs.is_empty() {
        return Err(anyhow!(
            "scenario list {} is empty",
            spec.run.scenario_list.display()
        ));
    }
    let total_runs = pairs.len() * spec.ensemble.members as usize;
    Ok(SpecSummary {
        scenario_pairs: pairs.len(),
        members: spec.ensemble.members,
        total_runs,
        batch_size: spec.ensemble.batch_size,
        batch_count: total_runs.div_ceil(spec.ensemble.batch_size),
        concurrency: spec.ensemble.concurrency,
        immediate: spec.ensemble.immediate,
        max_retries: spec.ensemble.max_retries,
        warming_bound: spec.validation.warming_bound,
        reference_year: spec.validation.reference_year,
        executor: spec.executor.command.clone(),
        output_path: spec.run.output_path.clone(),
    })
}

fn summary_to_json(summary: &SpecSummary) -> Value {
    json!({
        "scenario_pairs": summary.scenario_pairs,
        "ensemble_members": summary.members,
        "total_runs": summary.total_runs,
        "batch_size": summary.batch_size,
        "batch_count": summary.batch_count,
        "concurrency": summary.concurrency,
        "immediate": summary.immediate,
        "max_retries": summary.max_retries,
        "warming_bound": summary.warming_bound,
        "reference_year": summary.reference_year,
        "executor": summary.executor,
        "output_path": summary.output_path.display().to_string(),
    })
}

fn print_summary(summary: &SpecSummary) {
    println!("scenario_pairs: {}", summary.scenario_pairs);
    println!("ensemble_members: {}", summary.members);
    println!("total_runs: {}", summary.total_runs);
    println!("batch_size: {}", summary.batch_size);
    println!("batch_count: {}", summary.batch_count);
    println!("concurrency: {}", summary.concurrency);
    println!("immediate: {}", summary.immediate);
    println!("max_retries: {}", summary.max_retries);
    println!("warming_bound: {}", summary.warming_bound);
    println!("reference_year: {}", summary.reference_year);
    println!("executor: {:?}", summary.executor);
    println!("output_path: {}", summary.output_path.display());
}

fn failed_to_json(failed: &[cdr_core::space::RunConfig]) -> Vec<Value> {
    failed
        .iter()
        .map(|config| {
            json!({
                "ensemble_member": config.ensemble_member,
                "model": config.model,
                "scenario": config.scenario,
            })
        })
        .collect()
}

fn write_pathway_summary(path: &Path, pathways: &[Pathway]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "model",
        "scenario",
        "ensemble_member",
        "netzero_year",
        "shear_angle",
        "cumulative_removal",
    ])?;
    for pathway in pathways {
        writer.write_record([
            pathway.model.clone(),
            pathway.scenario.clone(),
            pathway.ensemble_member.to_string(),
            pathway.netzero_year.to_string(),
            pathway.shear_angle.to_string(),
            pathway.cumulative_removal.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}

/// Writes a lookup skeleton with derived net-zero years and zero first
/// guesses; rows that never cross the threshold are skipped.
fn write_netzero_lookup(
    path: &Path,
    table: &SeriesTable,
    variable: Option<&str>,
    threshold: f64,
) -> Result<(usize, usize)> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record([
        "model",
        "scenario",
        "ensemble_member",
        "netzero_year",
        "first_guess_removal",
    ])?;
    let mut written = 0usize;
    let mut skipped = 0usize;
    for row in &table.rows {
        if let Some(wanted) = variable {
            if row.variable != wanted {
                continue;
            }
        }
        match netzero_year(row, threshold) {
            Some(year) => {
                writer.write_record([
                    row.model.clone(),
                    row.scenario.clone(),
                    row.ensemble_member.unwrap_or(0).to_string(),
                    (year.round() as i32).to_string(),
                    "0.0".to_string(),
                ])?;
                written += 1;
            }
            None => skipped += 1,
        }
    }
    writer.flush()?;
    Ok((written, skipped))
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Run { json, .. }
        | Commands::Collect { json, .. }
        | Commands::Pathways { json, .. }
        | Commands::Netzero { json, .. }
        | Commands::Describe { json, .. } => *json,
        _ => false,
    }
}

const SPEC_TEMPLATE: &str = "\
version: '0.1'
run:
  output_path: ''                     # REQUIRED: root for runs/ and pathways/
  scenario_list: ''                   # REQUIRED: CSV of (index, model, scenario) rows
ensemble:
  members: 0                          # REQUIRED: set > 0
  batch_size: 24
  concurrency: 16
  immediate: 3
  max_retries: 10
  settle_seconds: 0
executor:
  command: []                         # REQUIRED: e.g. [python, run_member.py]
  # timeout_seconds: 3600
validation:
  warming_bound: 1.55
  reference_year: 2100
sanitize:
  replace: ['/']
  with: '-'
pathways:
  novel_cdr_components: []
  target_variable: Carbon Dioxide Removal|Novel
  netzero_threshold: 0.1
  unit_scale: 1.0
";
