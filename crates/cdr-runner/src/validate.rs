use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use cdr_core::series::SeriesTable;
use cdr_core::space::RunConfig;

/// Physical acceptance criterion: warming must stay at or under
/// `upper_bound` in `year`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WarmingCriterion {
    pub upper_bound: f64,
    pub year: i32,
}

impl Default for WarmingCriterion {
    fn default() -> Self {
        Self {
            upper_bound: 1.55,
            year: 2100,
        }
    }
}

/// Identities whose temperature series exceeds the bound at the reference
/// year. Zero violations is the normal case, not an error; rows without an
/// ensemble member tag or without a value at the reference year are skipped.
pub fn violations(temp: &SeriesTable, criterion: &WarmingCriterion) -> Vec<RunConfig> {
    let mut violating: BTreeSet<RunConfig> = BTreeSet::new();
    for row in &temp.rows {
        let Some(member) = row.ensemble_member else {
            continue;
        };
        let Some(value) = row.value_at(criterion.year) else {
            continue;
        };
        if value > criterion.upper_bound {
            violating.insert(RunConfig::new(member, &row.model, &row.scenario));
        }
    }
    violating.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdr_core::series::SeriesRow;
    use std::collections::BTreeMap;

    fn temp_row(model: &str, scenario: &str, member: u32, value_2100: f64) -> SeriesRow {
        SeriesRow {
            model: model.into(),
            scenario: scenario.into(),
            region: "World".into(),
            variable: "Surface Temperature".into(),
            unit: "K".into(),
            ensemble_member: Some(member),
            values: BTreeMap::from([(2050, 1.3), (2100, value_2100)]),
        }
    }

    #[test]
    fn value_above_bound_is_flagged_and_below_is_not() {
        let table = SeriesTable {
            rows: vec![
                temp_row("GCAM 5.3", "Low", 0, 1.6),
                temp_row("GCAM 5.3", "Low", 1, 1.5),
            ],
        };
        let criterion = WarmingCriterion::default();
        let flagged = violations(&table, &criterion);
        assert_eq!(flagged, vec![RunConfig::new(0, "GCAM 5.3", "Low")]);
    }

    #[test]
    fn value_equal_to_bound_passes() {
        let table = SeriesTable {
            rows: vec![temp_row("GCAM 5.3", "Low", 0, 1.55)],
        };
        assert!(violations(&table, &WarmingCriterion::default()).is_empty());
    }

    #[test]
    fn empty_table_has_no_violations() {
        assert!(violations(&SeriesTable::new(), &WarmingCriterion::default()).is_empty());
    }

    #[test]
    fn duplicate_variable_rows_flag_the_identity_once() {
        let mut row2 = temp_row("GCAM 5.3", "Low", 0, 1.7);
        row2.variable = "Surface Temperature|Upper".into();
        let table = SeriesTable {
            rows: vec![temp_row("GCAM 5.3", "Low", 0, 1.6), row2],
        };
        assert_eq!(violations(&table, &WarmingCriterion::default()).len(), 1);
    }
}
