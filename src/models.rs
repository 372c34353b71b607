//! Data models for the analysis crew.
//!
//! This module contains the tabular input model (records and the
//! in-memory dataset) and the run parameters shared by the CLI, the
//! configuration layer and the crew.

use crate::error::{AnalysisError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::fmt;

/// Names of the typed fields every record carries.
pub const DATE_FIELD: &str = "date";
pub const VALUE_FIELD: &str = "value";
pub const CATEGORY_FIELD: &str = "category";
pub const REGION_FIELD: &str = "region";

/// Depth of an analysis run. Selects which work units are registered.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    /// Exploration, statistics and reporting only
    Quick,
    /// Adds the insight unit (default)
    #[default]
    Standard,
    /// Adds an IQR outlier review on top of standard
    Deep,
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Depth::Quick => write!(f, "quick"),
            Depth::Standard => write!(f, "standard"),
            Depth::Deep => write!(f, "deep"),
        }
    }
}

/// Encoding of the compiled report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Structured, heading-based document (default)
    #[default]
    Markdown,
    /// Flat `key: value` document
    Flat,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Markdown => write!(f, "markdown"),
            OutputFormat::Flat => write!(f, "flat"),
        }
    }
}

/// A single field of a record, as seen by the column-oriented engines.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Absent, JSON null or an empty string
    Missing,
    /// A number, or a string that parses as one
    Number(f64),
    /// Anything else
    Text(String),
}

impl FieldValue {
    fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => FieldValue::Missing,
            Value::Number(n) => n.as_f64().map_or(FieldValue::Missing, FieldValue::Number),
            Value::String(s) => {
                let trimmed = s.trim();
                if trimmed.is_empty() {
                    FieldValue::Missing
                } else {
                    match trimmed.parse::<f64>() {
                        Ok(n) if n.is_finite() => FieldValue::Number(n),
                        _ => FieldValue::Text(s.clone()),
                    }
                }
            }
            other => FieldValue::Text(other.to_string()),
        }
    }
}

/// One row of tabular input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Timestamp of the observation, if it could be parsed.
    pub date: Option<NaiveDateTime>,
    /// Primary numeric value.
    pub value: f64,
    /// Category label.
    pub category: String,
    /// Region label.
    pub region: String,
    /// Every field of the original row, including unknown ones.
    #[serde(default)]
    pub raw: Map<String, Value>,
}

impl Record {
    /// Creates a record with an empty raw mapping.
    pub fn new(
        date: Option<NaiveDateTime>,
        value: f64,
        category: impl Into<String>,
        region: impl Into<String>,
    ) -> Self {
        Self {
            date,
            value,
            category: category.into(),
            region: region.into(),
            raw: Map::new(),
        }
    }

    /// Attaches the raw field mapping.
    pub fn with_raw(mut self, raw: Map<String, Value>) -> Self {
        self.raw = raw;
        self
    }

    /// Looks up a column by name. Typed fields shadow raw fields of the same name.
    pub fn field(&self, name: &str) -> FieldValue {
        match name {
            VALUE_FIELD if self.value.is_finite() => FieldValue::Number(self.value),
            VALUE_FIELD => FieldValue::Missing,
            DATE_FIELD => self
                .date
                .map_or(FieldValue::Missing, |d| FieldValue::Text(format_timestamp(&d))),
            CATEGORY_FIELD => FieldValue::Text(self.category.clone()),
            REGION_FIELD => FieldValue::Text(self.region.clone()),
            other => self
                .raw
                .get(other)
                .map_or(FieldValue::Missing, FieldValue::from_json),
        }
    }

    /// Returns the timestamp stored under a column name.
    pub fn timestamp(&self, name: &str) -> Option<NaiveDateTime> {
        if name == DATE_FIELD {
            return self.date;
        }
        self.raw
            .get(name)
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
    }
}

/// The in-memory dataset for one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    reference: String,
    records: Vec<Record>,
}

impl Dataset {
    /// Creates a dataset. `reference` is opaque (usually the source path).
    pub fn new(reference: impl Into<String>, records: Vec<Record>) -> Self {
        Self {
            reference: reference.into(),
            records,
        }
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Column names: the typed fields first, then raw keys in first-seen order.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = [DATE_FIELD, VALUE_FIELD, CATEGORY_FIELD, REGION_FIELD]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let mut seen: HashSet<String> = names.iter().cloned().collect();

        for record in &self.records {
            for key in record.raw.keys() {
                if seen.insert(key.clone()) {
                    names.push(key.clone());
                }
            }
        }

        names
    }

    /// Reads a numeric column, keeping row positions (`None` for nulls).
    ///
    /// Fails with [`AnalysisError::NonNumericColumn`] when any row holds text
    /// or when no numeric value remains after dropping nulls.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<Option<f64>>> {
        let mut values = Vec::with_capacity(self.records.len());
        let mut numeric = 0usize;

        for record in &self.records {
            match record.field(name) {
                FieldValue::Missing => values.push(None),
                FieldValue::Number(n) => {
                    numeric += 1;
                    values.push(Some(n));
                }
                FieldValue::Text(_) => {
                    return Err(AnalysisError::NonNumericColumn {
                        column: name.to_string(),
                    })
                }
            }
        }

        if numeric == 0 {
            return Err(AnalysisError::NonNumericColumn {
                column: name.to_string(),
            });
        }

        Ok(values)
    }

    /// Whether a column is numeric (see [`Dataset::numeric_column`]).
    pub fn is_numeric_column(&self, name: &str) -> bool {
        self.numeric_column(name).is_ok()
    }

    /// All numeric columns, in [`Dataset::column_names`] order.
    pub fn numeric_columns(&self) -> Vec<String> {
        self.column_names()
            .into_iter()
            .filter(|name| self.is_numeric_column(name))
            .collect()
    }

    /// Number of missing values per column, in column order.
    pub fn null_counts(&self) -> Vec<(String, usize)> {
        self.column_names()
            .into_iter()
            .map(|name| {
                let nulls = self
                    .records
                    .iter()
                    .filter(|r| r.field(&name) == FieldValue::Missing)
                    .count();
                (name, nulls)
            })
            .collect()
    }
}

/// Parses the timestamp formats found in exported sales data.
pub fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Some(dt.naive_utc());
    }

    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y/%m/%d %H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(input, format) {
            return Some(dt);
        }
    }

    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(d) = NaiveDate::parse_from_str(input, format) {
            return d.and_hms_opt(0, 0, 0);
        }
    }

    None
}

/// Formats a timestamp, dropping the time part at midnight.
pub fn format_timestamp(ts: &NaiveDateTime) -> String {
    if ts.time() == chrono::NaiveTime::MIN {
        ts.format("%Y-%m-%d").to_string()
    } else {
        ts.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_with_raw(raw: Value) -> Record {
        let raw = raw.as_object().cloned().unwrap_or_default();
        Record::new(parse_timestamp("2024-01-01"), 10.0, "A", "North").with_raw(raw)
    }

    #[test]
    fn test_parse_timestamp_formats() {
        assert_eq!(
            format_timestamp(&parse_timestamp("2024-03-05").unwrap()),
            "2024-03-05"
        );
        assert_eq!(
            format_timestamp(&parse_timestamp("2024-03-05 10:30:00").unwrap()),
            "2024-03-05 10:30:00"
        );
        assert!(parse_timestamp("2024-03-05T10:30:00Z").is_some());
        assert!(parse_timestamp("not a date").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_field_lookup() {
        let record = record_with_raw(json!({"units": "12", "note": "promo", "empty": ""}));
        assert_eq!(record.field("value"), FieldValue::Number(10.0));
        assert_eq!(record.field("units"), FieldValue::Number(12.0));
        assert_eq!(record.field("note"), FieldValue::Text("promo".into()));
        assert_eq!(record.field("empty"), FieldValue::Missing);
        assert_eq!(record.field("absent"), FieldValue::Missing);
        assert_eq!(record.field("date"), FieldValue::Text("2024-01-01".into()));
    }

    #[test]
    fn test_numeric_column_rejects_text() {
        let dataset = Dataset::new(
            "test",
            vec![
                record_with_raw(json!({"units": 3})),
                record_with_raw(json!({"units": "many"})),
            ],
        );
        assert_eq!(
            dataset.numeric_column("units"),
            Err(AnalysisError::NonNumericColumn {
                column: "units".into()
            })
        );
        assert!(!dataset.is_numeric_column("category"));
    }

    #[test]
    fn test_numeric_column_keeps_null_positions() {
        let dataset = Dataset::new(
            "test",
            vec![
                record_with_raw(json!({"units": 3})),
                record_with_raw(json!({"units": null})),
                record_with_raw(json!({"units": "4.5"})),
            ],
        );
        assert_eq!(
            dataset.numeric_column("units").unwrap(),
            vec![Some(3.0), None, Some(4.5)]
        );
    }

    #[test]
    fn test_all_null_column_is_not_numeric() {
        let dataset = Dataset::new("test", vec![record_with_raw(json!({"units": null}))]);
        assert!(dataset.numeric_column("units").is_err());
    }

    #[test]
    fn test_column_names_order() {
        let dataset = Dataset::new(
            "test",
            vec![
                record_with_raw(json!({"units": 1})),
                record_with_raw(json!({"cost": 2, "units": 3})),
            ],
        );
        let names = dataset.column_names();
        assert_eq!(names[..4], ["date", "value", "category", "region"]);
        assert!(names.contains(&"units".to_string()));
        assert!(names.contains(&"cost".to_string()));
        assert_eq!(dataset.numeric_columns(), vec!["value", "units", "cost"]);
    }
}
