//! Dataset loading.
//!
//! Reads records from a JSON array or from JSON Lines (one object per line).

use crate::models::{
    parse_timestamp, Dataset, Record, CATEGORY_FIELD, DATE_FIELD, REGION_FIELD, VALUE_FIELD,
};
use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::path::Path;
use tracing::{debug, info, warn};

/// Fallback column for the value.
pub const SALES_FIELD: &str = "sales";
/// Fallback column for the category.
pub const PRODUCT_FIELD: &str = "product";

const UNKNOWN_LABEL: &str = "Unknown";

/// Load a dataset from a file. The path becomes the dataset reference.
pub fn load_dataset(path: &Path) -> Result<Dataset> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read dataset: {}", path.display()))?;

    let records = parse_records(&content)
        .with_context(|| format!("Failed to parse dataset: {}", path.display()))?;

    info!("Loaded {} records from {}", records.len(), path.display());
    Ok(Dataset::new(path.display().to_string(), records))
}

/// Parses a JSON array of objects, or JSON Lines.
pub fn parse_records(content: &str) -> Result<Vec<Record>> {
    let rows = if content.trim_start().starts_with('[') {
        serde_json::from_str::<Vec<Value>>(content).context("Invalid JSON array")?
    } else {
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line)
                    .with_context(|| format!("Invalid JSON on line {}", i + 1))
            })
            .collect::<Result<Vec<Value>>>()?
    };

    let mut records = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        let Value::Object(fields) = row else {
            bail!("Row {} is not a JSON object", index + 1);
        };
        if let Some(record) = record_from_fields(index, fields) {
            records.push(record);
        }
    }

    Ok(records)
}

/// Builds a record, or `None` when the row has no numeric value.
fn record_from_fields(index: usize, fields: Map<String, Value>) -> Option<Record> {
    let value_field = fields
        .get(VALUE_FIELD)
        .or_else(|| fields.get(SALES_FIELD));
    let Some(value) = value_field.and_then(as_number) else {
        warn!(
            "Skipping row {}: no numeric '{}' or '{}' field",
            index + 1,
            VALUE_FIELD,
            SALES_FIELD
        );
        return None;
    };

    let date = fields.get(DATE_FIELD).and_then(|raw| {
        let parsed = raw.as_str().and_then(parse_timestamp);
        if parsed.is_none() {
            debug!("Row {}: unparsable date {}", index + 1, raw);
        }
        parsed
    });

    let category = label(&fields, CATEGORY_FIELD)
        .or_else(|| label(&fields, PRODUCT_FIELD))
        .unwrap_or(UNKNOWN_LABEL);
    let region = label(&fields, REGION_FIELD).unwrap_or(UNKNOWN_LABEL);

    Some(Record::new(date, value, category.to_string(), region.to_string()).with_raw(fields))
}

/// Finite numbers, or strings that parse as one. "NaN" and "inf" do not count.
fn as_number(value: &Value) -> Option<f64> {
    let number: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    number.filter(|v| v.is_finite())
}

fn label<'a>(fields: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    fields
        .get(name)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_json_array() {
        let content = r#"[
            {"date": "2024-01-01", "value": 100, "category": "Widgets", "region": "North", "units": 4},
            {"date": "2024-01-02", "value": "150.5", "category": "Gadgets", "region": "South"}
        ]"#;

        let records = parse_records(content).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 100.0);
        assert_eq!(records[1].value, 150.5);
        assert_eq!(records[0].category, "Widgets");
        assert_eq!(records[0].raw.get("units"), Some(&serde_json::json!(4)));
        assert_eq!(
            records[1].date,
            chrono::NaiveDate::from_ymd_opt(2024, 1, 2).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
    }

    #[test]
    fn test_parse_json_lines_with_fallbacks() {
        let content = "{\"date\": \"2024-03-01 10:30:00\", \"sales\": 42, \"product\": \"Widgets\"}\n\n\
                       {\"date\": \"not a date\", \"sales\": 7}\n";

        let records = parse_records(content).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].value, 42.0);
        assert_eq!(records[0].category, "Widgets");
        assert_eq!(records[0].region, "Unknown");
        assert!(records[0].date.is_some());
        assert_eq!(records[1].date, None);
        assert_eq!(records[1].category, "Unknown");
    }

    #[test]
    fn test_non_numeric_rows_skipped() {
        let content = r#"[
            {"value": 10, "category": "A"},
            {"value": "n/a", "category": "B"},
            {"category": "C"},
            {"value": 30, "category": "D"}
        ]"#;

        let records = parse_records(content).unwrap();
        let labels: Vec<&str> = records.iter().map(|r| r.category.as_str()).collect();
        assert_eq!(labels, vec!["A", "D"]);
    }

    #[test]
    fn test_non_finite_values_skipped() {
        let content = r#"[
            {"value": 100}, {"value": 150}, {"value": "NaN"},
            {"value": "inf"}, {"sales": "-infinity"}, {"value": 180}, {"value": 5000}
        ]"#;

        let records = parse_records(content).unwrap();
        let values: Vec<f64> = records.iter().map(|r| r.value).collect();
        assert_eq!(values, vec![100.0, 150.0, 180.0, 5000.0]);
    }

    #[test]
    fn test_invalid_input() {
        assert!(parse_records("[1, 2]").is_err());
        assert!(parse_records("{\"value\": 1}\n{broken").is_err());
        assert!(parse_records("[]").unwrap().is_empty());
    }

    #[test]
    fn test_load_dataset_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "{{\"date\": \"2024-01-01\", \"value\": 5, \"region\": \"East\"}}").unwrap();
        writeln!(file, "{{\"date\": \"2024-01-02\", \"value\": 6, \"region\": \"West\"}}").unwrap();

        let dataset = load_dataset(file.path()).unwrap();
        assert_eq!(dataset.len(), 2);
        assert_eq!(dataset.reference(), file.path().display().to_string());

        let missing = load_dataset(Path::new("/nonexistent/data.json"));
        assert!(missing.is_err());
    }
}
