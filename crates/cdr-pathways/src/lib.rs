//! Novel-CDR pathway reconstruction.
//!
//! A base emissions pathway is warped around its net-zero year — every
//! post-pivot value is lifted by `(year − pivot) · tan(θ)` — and the shear
//! angle θ is chosen so that the cumulative removal between the net-zero
//! year and the horizon matches a target value. The search is a bounded,
//! derivative-free 1-D minimization over θ ∈ [0°, 90°].

pub mod aggregate;
pub mod construct;
pub mod netzero;
pub mod optimize;
pub mod shear;

pub use aggregate::aggregate_novel_cdr;
pub use construct::{
    construct_all, construct_pathway, NetZeroEntry, NetZeroLookup, Pathway, PathwaySettings,
};
pub use netzero::netzero_year;
pub use optimize::golden_section_min;
pub use shear::{cumulative, rotated_cumulative, shear};

use thiserror::Error;

/// Per-identity failures of pathway construction. The batch driver records
/// them and moves on; one bad pathway never stops the rest.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PathwayError {
    #[error("invalid scope for {model}/{scenario}: {detail}")]
    InvalidScope {
        model: String,
        scenario: String,
        detail: String,
    },
    #[error("no net-zero year for {model}/{scenario} ensemble member {member}")]
    MissingNetZero {
        model: String,
        scenario: String,
        member: u32,
    },
}
