//! Shared leaf types for the cdrlab workspace: run identities and the
//! configuration space, batching, filename sanitization, the wide
//! time-series table used for CDR/TEMP artifacts, and filesystem helpers.

pub mod config;
pub mod fsutil;
pub mod sanitize;
pub mod series;
pub mod space;

pub use config::{load_run_spec, RunSpec};
pub use fsutil::{atomic_write_bytes, atomic_write_json_pretty, ensure_dir};
pub use sanitize::{artifact_file_name, ArtifactKind, Sanitizer};
pub use series::{SeriesRow, SeriesTable};
pub use space::{batches, config_space, load_scenario_list, ModelScenario, RunConfig};
