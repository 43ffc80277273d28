//! Pathway construction: pick the shear angle whose warped pathway delivers
//! a target cumulative removal, then apply it.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

use cdr_core::series::SeriesTable;
use cdr_core::space::RunConfig;

use crate::optimize::golden_section_min;
use crate::shear::{rotated_cumulative, table_cumulative};
use crate::PathwayError;

/// Net-zero metadata for one (model, scenario, ensemble member).
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct NetZeroEntry {
    pub netzero_year: i32,
    /// First-guess additional removal added to the base cumulative to form
    /// the optimization target.
    pub first_guess_removal: f64,
}

/// Lookup table keyed by run identity.
#[derive(Debug, Clone, Default)]
pub struct NetZeroLookup {
    entries: BTreeMap<(String, String, u32), NetZeroEntry>,
}

#[derive(Debug, Deserialize)]
struct LookupRow {
    model: String,
    scenario: String,
    ensemble_member: u32,
    netzero_year: i32,
    first_guess_removal: f64,
}

impl NetZeroLookup {
    pub fn insert(&mut self, model: &str, scenario: &str, member: u32, entry: NetZeroEntry) {
        self.entries
            .insert((model.to_string(), scenario.to_string(), member), entry);
    }

    pub fn get(&self, model: &str, scenario: &str, member: u32) -> Option<&NetZeroEntry> {
        self.entries
            .get(&(model.to_string(), scenario.to_string(), member))
    }

    /// Identities present in the lookup, in key order.
    pub fn identities(&self) -> Vec<RunConfig> {
        self.entries
            .keys()
            .map(|(model, scenario, member)| RunConfig::new(*member, model, scenario))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reads a lookup CSV with columns
    /// `model,scenario,ensemble_member,netzero_year,first_guess_removal`.
    pub fn from_csv(path: &Path) -> Result<Self> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("cannot open lookup {}", path.display()))?;
        let mut lookup = NetZeroLookup::default();
        for row in reader.deserialize::<LookupRow>() {
            let row = row.with_context(|| format!("bad lookup row in {}", path.display()))?;
            lookup.insert(
                &row.model,
                &row.scenario,
                row.ensemble_member,
                NetZeroEntry {
                    netzero_year: row.netzero_year,
                    first_guess_removal: row.first_guess_removal,
                },
            );
        }
        Ok(lookup)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct PathwaySettings {
    pub horizon_year: i32,
    /// Scale applied to cumulative values before they are compared.
    pub unit_scale: f64,
    /// Bracket width at which the angle search stops, in degrees.
    pub angle_tolerance: f64,
}

impl Default for PathwaySettings {
    fn default() -> Self {
        Self {
            horizon_year: 2100,
            unit_scale: 1.0,
            angle_tolerance: 1e-6,
        }
    }
}

/// A constructed pathway: the sheared single-scenario table plus the
/// metadata the shear was derived from.
#[derive(Debug, Clone)]
pub struct Pathway {
    pub table: SeriesTable,
    pub model: String,
    pub scenario: String,
    pub ensemble_member: u32,
    pub netzero_year: i32,
    pub shear_angle: f64,
    /// Scaled cumulative removal of the sheared pathway over
    /// `[netzero_year, horizon_year]`.
    pub cumulative_removal: f64,
}

/// Builds one pathway. Pure given its inputs: filter, resolve the pivot,
/// derive the target cumulative, search the angle, re-apply the shear.
pub fn construct_pathway(
    base: &SeriesTable,
    lookup: &NetZeroLookup,
    model: &str,
    scenario: &str,
    ensemble_member: u32,
    settings: &PathwaySettings,
) -> Result<Pathway, PathwayError> {
    let scoped = base.filter_pair(model, scenario);
    if scoped.is_empty() {
        return Err(PathwayError::InvalidScope {
            model: model.to_string(),
            scenario: scenario.to_string(),
            detail: "selection is empty".to_string(),
        });
    }
    let entry =
        lookup
            .get(model, scenario, ensemble_member)
            .ok_or_else(|| PathwayError::MissingNetZero {
                model: model.to_string(),
                scenario: scenario.to_string(),
                member: ensemble_member,
            })?;

    let pivot = entry.netzero_year;
    let required = table_cumulative(&scoped, pivot, settings.horizon_year) * settings.unit_scale
        + entry.first_guess_removal;

    let objective = |angle: f64| match rotated_cumulative(&scoped, pivot, angle, settings.horizon_year)
    {
        Ok((_, total)) => (total * settings.unit_scale - required).abs(),
        Err(_) => f64::INFINITY,
    };
    let angle = golden_section_min(objective, 0.0, 90.0, settings.angle_tolerance);

    let (sheared, total) = rotated_cumulative(&scoped, pivot, angle, settings.horizon_year)?;
    Ok(Pathway {
        table: sheared.with_member(ensemble_member),
        model: model.to_string(),
        scenario: scenario.to_string(),
        ensemble_member,
        netzero_year: pivot,
        shear_angle: angle,
        cumulative_removal: total * settings.unit_scale,
    })
}

/// Constructs a pathway for every identity, recording per-identity failures
/// instead of aborting the batch.
pub fn construct_all(
    base: &SeriesTable,
    lookup: &NetZeroLookup,
    identities: &[RunConfig],
    settings: &PathwaySettings,
) -> (Vec<Pathway>, Vec<(RunConfig, PathwayError)>) {
    let mut pathways = Vec::new();
    let mut failed = Vec::new();
    for config in identities {
        match construct_pathway(
            base,
            lookup,
            &config.model,
            &config.scenario,
            config.ensemble_member,
            settings,
        ) {
            Ok(pathway) => pathways.push(pathway),
            Err(err) => {
                warn!(
                    model = %config.model,
                    scenario = %config.scenario,
                    member = config.ensemble_member,
                    error = %err,
                    "pathway construction failed"
                );
                failed.push((config.clone(), err));
            }
        }
    }
    (pathways, failed)
}
