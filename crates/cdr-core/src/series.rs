//! Wide time-series tables in the IAMC layout.
//!
//! Artifacts and aggregated outputs are CSV tables with one row per
//! (model, scenario, region, variable, unit) series and one column per time
//! step. Time columns may be labelled with bare years (`2100`), float years
//! (`2100.0`), or full timestamps (`2100-01-01 00:00:00`); every label is
//! normalized to a calendar year once, at parse time.

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Normalizes a time-column label to a calendar year.
pub fn parse_year_label(label: &str) -> Result<i32> {
    let trimmed = label.trim();
    let digits: String = trimmed.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() == 4 {
        let rest = &trimmed[4..];
        let is_plain_year = rest.is_empty();
        let is_float_year = rest.starts_with('.') && rest[1..].chars().all(|c| c.is_ascii_digit());
        let is_timestamp = rest.starts_with('-') || rest.starts_with(' ') || rest.starts_with('T');
        if is_plain_year || is_float_year || is_timestamp {
            return Ok(digits.parse()?);
        }
    }
    Err(anyhow!("unrecognized time label: {:?}", label))
}

/// One series: fixed identity columns plus a year-keyed value map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesRow {
    pub model: String,
    pub scenario: String,
    pub region: String,
    pub variable: String,
    pub unit: String,
    pub ensemble_member: Option<u32>,
    pub values: BTreeMap<i32, f64>,
}

impl SeriesRow {
    pub fn value_at(&self, year: i32) -> Option<f64> {
        self.values.get(&year).copied()
    }
}

/// A bag of series rows. Aggregation across collections is plain
/// concatenation; duplicate identities are a caller error, not merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SeriesTable {
    pub rows: Vec<SeriesRow>,
}

impl SeriesTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn push(&mut self, row: SeriesRow) {
        self.rows.push(row);
    }

    pub fn extend(&mut self, other: SeriesTable) {
        self.rows.extend(other.rows);
    }

    pub fn concat(tables: impl IntoIterator<Item = SeriesTable>) -> SeriesTable {
        let mut out = SeriesTable::new();
        for table in tables {
            out.extend(table);
        }
        out
    }

    /// New table holding only the rows of one (model, scenario) pair.
    pub fn filter_pair(&self, model: &str, scenario: &str) -> SeriesTable {
        SeriesTable {
            rows: self
                .rows
                .iter()
                .filter(|r| r.model == model && r.scenario == scenario)
                .cloned()
                .collect(),
        }
    }

    /// Distinct (model, scenario) pairs present in the table.
    pub fn pairs(&self) -> BTreeSet<(String, String)> {
        self.rows
            .iter()
            .map(|r| (r.model.clone(), r.scenario.clone()))
            .collect()
    }

    /// New table with every row tagged as `ensemble_member`.
    pub fn with_member(&self, ensemble_member: u32) -> SeriesTable {
        SeriesTable {
            rows: self
                .rows
                .iter()
                .map(|r| SeriesRow {
                    ensemble_member: Some(ensemble_member),
                    ..r.clone()
                })
                .collect(),
        }
    }

    fn all_years(&self) -> BTreeSet<i32> {
        self.rows
            .iter()
            .flat_map(|r| r.values.keys().copied())
            .collect()
    }

    pub fn read_csv(path: &Path) -> Result<SeriesTable> {
        let mut reader = csv::Reader::from_path(path)
            .with_context(|| format!("cannot open {}", path.display()))?;
        let headers = reader.headers()?.clone();

        let mut meta: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut year_columns: Vec<(usize, i32)> = Vec::new();
        for (idx, header) in headers.iter().enumerate() {
            let lowered = header.trim().to_ascii_lowercase();
            match lowered.as_str() {
                "model" => meta.insert("model", idx),
                "scenario" => meta.insert("scenario", idx),
                "region" => meta.insert("region", idx),
                "variable" => meta.insert("variable", idx),
                "unit" => meta.insert("unit", idx),
                "ensemble_member" => meta.insert("ensemble_member", idx),
                _ => {
                    let year = parse_year_label(header)
                        .with_context(|| format!("bad header in {}", path.display()))?;
                    year_columns.push((idx, year));
                    None
                }
            };
        }
        for required in ["model", "scenario", "region", "variable", "unit"] {
            if !meta.contains_key(required) {
                return Err(anyhow!(
                    "{} is missing the {} column",
                    path.display(),
                    required
                ));
            }
        }

        let field = |record: &csv::StringRecord, key: &str| -> String {
            record.get(meta[key]).unwrap_or("").trim().to_string()
        };

        let mut table = SeriesTable::new();
        for (line, record) in reader.records().enumerate() {
            let record =
                record.with_context(|| format!("bad row {} in {}", line + 2, path.display()))?;
            let ensemble_member = match meta.get("ensemble_member") {
                Some(&idx) => match record.get(idx).map(str::trim) {
                    None | Some("") => None,
                    Some(raw) => Some(raw.parse::<u32>().with_context(|| {
                        format!("bad ensemble_member on row {} in {}", line + 2, path.display())
                    })?),
                },
                None => None,
            };
            let mut values = BTreeMap::new();
            for &(idx, year) in &year_columns {
                let raw = record.get(idx).unwrap_or("").trim();
                if raw.is_empty() {
                    continue;
                }
                let value: f64 = raw.parse().with_context(|| {
                    format!("bad value for {} on row {} in {}", year, line + 2, path.display())
                })?;
                values.insert(year, value);
            }
            table.push(SeriesRow {
                model: field(&record, "model"),
                scenario: field(&record, "scenario"),
                region: field(&record, "region"),
                variable: field(&record, "variable"),
                unit: field(&record, "unit"),
                ensemble_member,
                values,
            });
        }
        Ok(table)
    }

    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let years: Vec<i32> = self.all_years().into_iter().collect();
        let tagged = self.rows.iter().any(|r| r.ensemble_member.is_some());

        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("cannot create {}", path.display()))?;
        let mut header = vec![
            "Model".to_string(),
            "Scenario".to_string(),
            "Region".to_string(),
            "Variable".to_string(),
            "Unit".to_string(),
        ];
        if tagged {
            header.push("ensemble_member".to_string());
        }
        header.extend(years.iter().map(|y| y.to_string()));
        writer.write_record(&header)?;

        for row in &self.rows {
            let mut record = vec![
                row.model.clone(),
                row.scenario.clone(),
                row.region.clone(),
                row.variable.clone(),
                row.unit.clone(),
            ];
            if tagged {
                record.push(
                    row.ensemble_member
                        .map(|m| m.to_string())
                        .unwrap_or_default(),
                );
            }
            for year in &years {
                record.push(
                    row.value_at(*year)
                        .map(|v| v.to_string())
                        .unwrap_or_default(),
                );
            }
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fsutil::ensure_dir;
    use chrono::Utc;
    use std::fs;

    #[test]
    fn year_labels_normalize_to_calendar_years() {
        assert_eq!(parse_year_label("2100").expect("bare"), 2100);
        assert_eq!(parse_year_label("2100.0").expect("float"), 2100);
        assert_eq!(parse_year_label("2100-01-01 00:00:00").expect("stamp"), 2100);
        assert_eq!(parse_year_label(" 2035 ").expect("padded"), 2035);
        assert!(parse_year_label("Region").is_err());
        assert!(parse_year_label("21000").is_err());
        assert!(parse_year_label("2100x").is_err());
    }

    #[test]
    fn reads_timestamp_labelled_csv() {
        let dir = std::env::temp_dir().join(format!(
            "cdrlab_series_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        let path = dir.join("temp.csv");
        fs::write(
            &path,
            "Model,Scenario,Region,Variable,Unit,2050-01-01 00:00:00,2100-01-01 00:00:00\n\
             GCAM 5.3,Low,World,Surface Temperature,K,1.2,1.6\n",
        )
        .expect("write csv");
        let table = SeriesTable::read_csv(&path).expect("read");
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].value_at(2100), Some(1.6));
        assert_eq!(table.rows[0].value_at(2050), Some(1.2));
        assert_eq!(table.rows[0].value_at(2075), None);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn written_tables_read_back_with_member_tags() {
        let dir = std::env::temp_dir().join(format!(
            "cdrlab_series_rt_test_{}_{}",
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&dir).expect("temp dir");
        let path = dir.join("cdr.csv");
        let table = SeriesTable {
            rows: vec![SeriesRow {
                model: "GCAM 5.3".into(),
                scenario: "Low".into(),
                region: "World".into(),
                variable: "Carbon Dioxide Removal|Novel".into(),
                unit: "Mt CO2/yr".into(),
                ensemble_member: None,
                values: BTreeMap::from([(2050, 100.0), (2100, 450.5)]),
            }],
        }
        .with_member(3);
        table.write_csv(&path).expect("write");
        let back = SeriesTable::read_csv(&path).expect("read");
        assert_eq!(back.rows[0].ensemble_member, Some(3));
        assert_eq!(back.rows[0].value_at(2100), Some(450.5));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn filter_pair_selects_only_that_pair() {
        let mut table = SeriesTable::new();
        for (model, scenario) in [("a", "s1"), ("a", "s2"), ("b", "s1")] {
            table.push(SeriesRow {
                model: model.into(),
                scenario: scenario.into(),
                region: "World".into(),
                variable: "v".into(),
                unit: "u".into(),
                ensemble_member: None,
                values: BTreeMap::new(),
            });
        }
        let selected = table.filter_pair("a", "s2");
        assert_eq!(selected.len(), 1);
        assert_eq!(selected.pairs().len(), 1);
        assert_eq!(table.pairs().len(), 3);
    }
}
