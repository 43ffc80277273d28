//! Filesystem-safe naming for result artifacts.
//!
//! Model names may contain path separators (`MESSAGEix-GLOBIOM 1.0` is fine,
//! `AIM/CGE 2.2` is not). The same substitution policy must be applied on the
//! write side (the execution step) and the read side (collection), so the
//! policy is an explicit value threaded through both.

use serde::{Deserialize, Serialize};

/// Character-substitution policy for artifact file names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sanitizer {
    /// Characters to replace.
    pub replace: Vec<char>,
    /// Replacement character.
    pub with: char,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            replace: vec!['/'],
            with: '-',
        }
    }
}

impl Sanitizer {
    pub fn apply(&self, name: &str) -> String {
        name.chars()
            .map(|c| if self.replace.contains(&c) { self.with } else { c })
            .collect()
    }
}

/// The two artifact kinds every run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Cdr,
    Temp,
}

impl ArtifactKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactKind::Cdr => "CDR",
            ArtifactKind::Temp => "TEMP",
        }
    }
}

/// Deterministic artifact name: `{KIND}_{model-sanitized}_{scenario}_{member}.csv`.
pub fn artifact_file_name(
    kind: ArtifactKind,
    sanitizer: &Sanitizer,
    model: &str,
    scenario: &str,
    ensemble_member: u32,
) -> String {
    format!(
        "{}_{}_{}_{}.csv",
        kind.as_str(),
        sanitizer.apply(model),
        scenario,
        ensemble_member
    )
}
