//! Record aggregation by categorical dimensions.
//!
//! This module groups records by a label column and computes per-group
//! counts, totals and averages for a numeric column.

use crate::models::{FieldValue, Record, CATEGORY_FIELD, REGION_FIELD};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Totals for one group label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub label: String,
    pub count: usize,
    pub total: f64,
    pub average: f64,
}

/// Group records by category, summing `column`.
pub fn group_by_category(records: &[Record], column: &str) -> Vec<GroupSummary> {
    group_by(records, CATEGORY_FIELD, column)
}

/// Group records by region, summing `column`.
pub fn group_by_region(records: &[Record], column: &str) -> Vec<GroupSummary> {
    group_by(records, REGION_FIELD, column)
}

/// Group records by the label in `dimension`, summing the numeric `column`.
///
/// Groups are sorted by total, highest first. Equal totals keep the order in
/// which their labels were first seen. Rows whose `column` is not numeric do
/// not contribute to their group.
pub fn group_by(records: &[Record], dimension: &str, column: &str) -> Vec<GroupSummary> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut groups: Vec<GroupSummary> = Vec::new();

    for record in records {
        let FieldValue::Number(value) = record.field(column) else {
            continue;
        };

        let label = match record.field(dimension) {
            FieldValue::Text(s) => s,
            FieldValue::Number(n) => n.to_string(),
            FieldValue::Missing => String::new(),
        };

        let slot = *index.entry(label.clone()).or_insert_with(|| {
            groups.push(GroupSummary {
                label,
                count: 0,
                total: 0.0,
                average: 0.0,
            });
            groups.len() - 1
        });

        let group = &mut groups[slot];
        group.count += 1;
        group.total += value;
    }

    for group in &mut groups {
        group.average = group.total / group.count as f64;
    }

    // sort_by is stable: ties keep first-seen order
    groups.sort_by(|a, b| b.total.total_cmp(&a.total));

    groups
}

/// The first `n` groups.
pub fn top_groups(groups: &[GroupSummary], n: usize) -> &[GroupSummary] {
    &groups[..n.min(groups.len())]
}
