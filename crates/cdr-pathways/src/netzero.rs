//! Net-zero year detection.

use cdr_core::series::SeriesRow;

/// First year at which the series crosses `threshold`, linearly
/// interpolated between the bracketing years. `None` when the series never
/// crosses.
pub fn netzero_year(row: &SeriesRow, threshold: f64) -> Option<f64> {
    let points: Vec<(i32, f64)> = row.values.iter().map(|(&y, &v)| (y, v)).collect();
    for pair in points.windows(2) {
        let (y0, v0) = pair[0];
        let (y1, v1) = pair[1];
        let d0 = v0 - threshold;
        let d1 = v1 - threshold;
        if d0 == 0.0 {
            return Some(f64::from(y0));
        }
        if d0 * d1 < 0.0 {
            let fraction = d0 / (v0 - v1);
            return Some(f64::from(y0) + fraction * f64::from(y1 - y0));
        }
    }
    points
        .last()
        .filter(|&&(_, v)| v == threshold)
        .map(|&(y, _)| f64::from(y))
}
