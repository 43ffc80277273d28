//! Run identities and the ensemble configuration space.

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// One (model, scenario) pair from the scenario list.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelScenario {
    pub model: String,
    pub scenario: String,
}

/// Identity of a single simulation run. The triple is the identity; two
/// configs with equal fields are the same run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunConfig {
    pub ensemble_member: u32,
    pub model: String,
    pub scenario: String,
}

impl RunConfig {
    pub fn new(ensemble_member: u32, model: &str, scenario: &str) -> Self {
        Self {
            ensemble_member,
            model: model.to_string(),
            scenario: scenario.to_string(),
        }
    }

    pub fn pair(&self) -> ModelScenario {
        ModelScenario {
            model: self.model.clone(),
            scenario: self.scenario.clone(),
        }
    }
}

/// Full cross-product of the scenario list and `0..members`, scenario-major
/// then member-minor. Duplicate pairs in the input are kept as redundant
/// entries, not deduplicated.
pub fn config_space(pairs: &[ModelScenario], members: u32) -> Vec<RunConfig> {
    let mut configs = Vec::with_capacity(pairs.len() * members as usize);
    for pair in pairs {
        for member in 0..members {
            configs.push(RunConfig::new(member, &pair.model, &pair.scenario));
        }
    }
    configs
}

/// Order-preserving chunks of at most `batch_size` configs; the last chunk
/// holds the remainder. Concatenating the chunks reproduces the input.
pub fn batches(configs: &[RunConfig], batch_size: usize) -> impl Iterator<Item = &[RunConfig]> {
    assert!(batch_size > 0, "batch_size must be positive");
    configs.chunks(batch_size)
}

/// Loads the scenario list CSV. Rows are headerless `(index, model,
/// scenario)` triples; two-column `(model, scenario)` rows are accepted too.
pub fn load_scenario_list(path: &Path) -> Result<Vec<ModelScenario>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .map_err(|e| anyhow!("cannot read scenario list {}: {}", path.display(), e))?;
    let mut pairs = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let (model, scenario) = match record.len() {
            0 => continue,
            2 => (record.get(0), record.get(1)),
            _ => (record.get(1), record.get(2)),
        };
        match (model, scenario) {
            (Some(m), Some(s)) if !m.trim().is_empty() && !s.trim().is_empty() => {
                pairs.push(ModelScenario {
                    model: m.trim().to_string(),
                    scenario: s.trim().to_string(),
                });
            }
            _ => {
                return Err(anyhow!(
                    "malformed scenario list row {} in {}",
                    line + 1,
                    path.display()
                ));
            }
        }
    }
    Ok(pairs)
}
