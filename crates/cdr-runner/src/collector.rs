use std::path::Path;

use tracing::debug;

use cdr_core::sanitize::{artifact_file_name, ArtifactKind, Sanitizer};
use cdr_core::series::SeriesTable;
use cdr_core::space::RunConfig;

use crate::pool::FailureCause;

/// Everything one (model, scenario) collection pass produced.
pub struct ScenarioCollection {
    pub cdr: SeriesTable,
    pub temp: SeriesTable,
    pub failed: Vec<(RunConfig, FailureCause)>,
}

/// Reads the CDR and TEMP artifacts for every expected ensemble member of
/// one (model, scenario) pair. A member whose artifacts are missing or
/// unparseable is recorded as failed and excluded from the aggregates;
/// collection continues for the remaining members.
pub fn collect(
    model: &str,
    scenario: &str,
    ensemble_members: u32,
    results_dir: &Path,
    sanitizer: &Sanitizer,
) -> ScenarioCollection {
    let mut cdr = SeriesTable::new();
    let mut temp = SeriesTable::new();
    let mut failed = Vec::new();

    for member in 0..ensemble_members {
        let cdr_path = results_dir.join(artifact_file_name(
            ArtifactKind::Cdr,
            sanitizer,
            model,
            scenario,
            member,
        ));
        let temp_path = results_dir.join(artifact_file_name(
            ArtifactKind::Temp,
            sanitizer,
            model,
            scenario,
            member,
        ));
        let member_tables = SeriesTable::read_csv(&cdr_path)
            .and_then(|c| SeriesTable::read_csv(&temp_path).map(|t| (c, t)));
        match member_tables {
            Ok((member_cdr, member_temp)) => {
                cdr.extend(member_cdr.with_member(member));
                temp.extend(member_temp.with_member(member));
            }
            Err(err) => {
                let config = RunConfig::new(member, model, scenario);
                debug!(
                    model,
                    scenario,
                    member,
                    error = %format!("{:#}", err),
                    "artifact unreadable"
                );
                failed.push((config, FailureCause::ArtifactRead(format!("{:#}", err))));
            }
        }
    }

    ScenarioCollection { cdr, temp, failed }
}
