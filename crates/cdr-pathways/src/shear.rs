//! The shear transform and the cumulative integral it is scored with.

use cdr_core::series::{SeriesRow, SeriesTable};

use crate::PathwayError;

/// Rotates a table around the value at `pivot_year`: every value at a year
/// strictly after the pivot gains `(year − pivot) · tan(angle)`. Years at or
/// before the pivot are untouched. Returns a new table; the input is never
/// mutated.
pub fn shear(table: &SeriesTable, pivot_year: i32, angle_deg: f64) -> SeriesTable {
    let slope = angle_deg.to_radians().tan();
    let rows = table
        .rows
        .iter()
        .map(|row| {
            let values = row
                .values
                .iter()
                .map(|(&year, &value)| {
                    if year > pivot_year {
                        (year, value + f64::from(year - pivot_year) * slope)
                    } else {
                        (year, value)
                    }
                })
                .collect();
            SeriesRow {
                values,
                ..row.clone()
            }
        })
        .collect();
    SeriesTable { rows }
}

/// Trapezoidal integral of one series over the closed year range
/// `[first_year, last_year]`, using the years present in that window.
/// Fewer than two points integrate to zero.
pub fn cumulative(row: &SeriesRow, first_year: i32, last_year: i32) -> f64 {
    let points: Vec<(i32, f64)> = row
        .values
        .range(first_year..=last_year)
        .map(|(&y, &v)| (y, v))
        .collect();
    points
        .windows(2)
        .map(|pair| {
            let (y0, v0) = pair[0];
            let (y1, v1) = pair[1];
            (v0 + v1) / 2.0 * f64::from(y1 - y0)
        })
        .sum()
}

/// Sum of the per-row cumulative integrals of a table.
pub fn table_cumulative(table: &SeriesTable, first_year: i32, last_year: i32) -> f64 {
    table
        .rows
        .iter()
        .map(|row| cumulative(row, first_year, last_year))
        .sum()
}

/// Shears a single-scenario table and scores the result's cumulative value
/// over `[pivot_year, horizon_year]`. Rejects tables spanning more than one
/// (model, scenario) pair — the transform's pivot is only meaningful for
/// one scenario at a time.
pub fn rotated_cumulative(
    table: &SeriesTable,
    pivot_year: i32,
    angle_deg: f64,
    horizon_year: i32,
) -> Result<(SeriesTable, f64), PathwayError> {
    let pairs = table.pairs();
    if pairs.len() > 1 {
        let (model, scenario) = pairs.iter().next().expect("nonempty pairs");
        return Err(PathwayError::InvalidScope {
            model: model.clone(),
            scenario: scenario.clone(),
            detail: format!("table spans {} (model, scenario) pairs", pairs.len()),
        });
    }
    let sheared = shear(table, pivot_year, angle_deg);
    let total = table_cumulative(&sheared, pivot_year, horizon_year);
    Ok((sheared, total))
}
