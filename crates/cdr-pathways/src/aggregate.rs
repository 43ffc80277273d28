//! Aggregation of component CDR variables into one novel-CDR total.

use std::collections::BTreeMap;

use cdr_core::series::{SeriesRow, SeriesTable};

/// Sums the listed component variables into a single `target_variable`
/// series per (model, scenario, region, unit, ensemble member). Years
/// missing from a component simply contribute nothing for that year.
/// Rows whose variable is not listed are dropped.
pub fn aggregate_novel_cdr(
    table: &SeriesTable,
    components: &[String],
    target_variable: &str,
) -> SeriesTable {
    let mut groups: BTreeMap<(String, String, String, String, Option<u32>), BTreeMap<i32, f64>> =
        BTreeMap::new();
    for row in &table.rows {
        if !components.iter().any(|c| c == &row.variable) {
            continue;
        }
        let key = (
            row.model.clone(),
            row.scenario.clone(),
            row.region.clone(),
            row.unit.clone(),
            row.ensemble_member,
        );
        let values = groups.entry(key).or_default();
        for (&year, &value) in &row.values {
            *values.entry(year).or_insert(0.0) += value;
        }
    }
    SeriesTable {
        rows: groups
            .into_iter()
            .map(
                |((model, scenario, region, unit, ensemble_member), values)| SeriesRow {
                    model,
                    scenario,
                    region,
                    variable: target_variable.to_string(),
                    unit,
                    ensemble_member,
                    values,
                },
            )
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(variable: &str, scenario: &str, values: &[(i32, f64)]) -> SeriesRow {
        SeriesRow {
            model: "GCAM 5.3".into(),
            scenario: scenario.into(),
            region: "World".into(),
            variable: variable.into(),
            unit: "Mt CO2/yr".into(),
            ensemble_member: None,
            values: values.iter().copied().collect::<BTreeMap<_, _>>(),
        }
    }

    fn components() -> Vec<String> {
        vec![
            "Carbon Dioxide Removal|BECCS".to_string(),
            "Carbon Dioxide Removal|DACCS".to_string(),
        ]
    }

    #[test]
    fn components_sum_per_year_into_the_target_variable() {
        let table = SeriesTable {
            rows: vec![
                row("Carbon Dioxide Removal|BECCS", "Low", &[(2050, 100.0), (2100, 300.0)]),
                row("Carbon Dioxide Removal|DACCS", "Low", &[(2050, 20.0), (2100, 80.0)]),
                row("Emissions|CO2", "Low", &[(2050, 9999.0)]),
            ],
        };
        let out = aggregate_novel_cdr(&table, &components(), "Carbon Dioxide Removal|Novel");
        assert_eq!(out.len(), 1);
        let total = &out.rows[0];
        assert_eq!(total.variable, "Carbon Dioxide Removal|Novel");
        assert_eq!(total.value_at(2050), Some(120.0));
        assert_eq!(total.value_at(2100), Some(380.0));
    }

    #[test]
    fn scenarios_aggregate_independently() {
        let table = SeriesTable {
            rows: vec![
                row("Carbon Dioxide Removal|BECCS", "Low", &[(2100, 300.0)]),
                row("Carbon Dioxide Removal|BECCS", "High", &[(2100, 50.0)]),
            ],
        };
        let out = aggregate_novel_cdr(&table, &components(), "Carbon Dioxide Removal|Novel");
        assert_eq!(out.len(), 2);
        assert_eq!(out.pairs().len(), 2);
    }

    #[test]
    fn missing_component_years_contribute_nothing() {
        let table = SeriesTable {
            rows: vec![
                row("Carbon Dioxide Removal|BECCS", "Low", &[(2050, 100.0)]),
                row("Carbon Dioxide Removal|DACCS", "Low", &[(2100, 80.0)]),
            ],
        };
        let out = aggregate_novel_cdr(&table, &components(), "Carbon Dioxide Removal|Novel");
        assert_eq!(out.rows[0].value_at(2050), Some(100.0));
        assert_eq!(out.rows[0].value_at(2100), Some(80.0));
    }
}
