//! Shared context accumulated across a run.
//!
//! The context starts with the run inputs and absorbs each completed unit's
//! payload in execution order. A later writer replaces an earlier one on the
//! same key; the context records who wrote each key last.

use super::dispatcher::Role;
use super::unit::Payload;
use crate::models::{Depth, OutputFormat};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Well-known context keys and the stage that owns each of them.
pub mod keys {
    use super::Role;

    // Run inputs
    pub const GOAL: &str = "goal";
    pub const DATASET_REF: &str = "dataset_ref";
    pub const DEPTH: &str = "depth";
    pub const OUTPUT_TARGET: &str = "output_target";
    pub const OUTPUT_FORMAT: &str = "output_format";

    // dataExploration
    pub const DATA_OVERVIEW: &str = "data_overview";
    pub const DATA_QUALITY: &str = "data_quality";
    pub const CATEGORY_SUMMARY: &str = "category_summary";
    pub const REGION_SUMMARY: &str = "region_summary";

    // statisticalAnalysis
    pub const BASIC_STATISTICS: &str = "basic_statistics";
    pub const TREND_ANALYSIS: &str = "trend_analysis";
    pub const CORRELATION_ANALYSIS: &str = "correlation_analysis";
    pub const ANOMALIES: &str = "anomalies";
    pub const IQR_ANOMALIES: &str = "iqr_anomalies";
    pub const ANALYSIS_NOTES: &str = "analysis_notes";

    // aiInsight
    pub const AI_INSIGHTS: &str = "ai_insights";
    pub const AI_ANOMALIES: &str = "ai_anomalies";
    pub const TREND_PREDICTION: &str = "trend_prediction";
    pub const RECOMMENDATIONS: &str = "recommendations";
    pub const INFERENCE_ANNOTATION: &str = "inference_annotation";

    // reporting
    pub const EXECUTIVE_SUMMARY: &str = "executive_summary";
    pub const KEY_FINDINGS: &str = "key_findings";

    /// Keys seeded from the run inputs.
    pub const RUN_INPUTS: [&str; 5] = [GOAL, DATASET_REF, DEPTH, OUTPUT_TARGET, OUTPUT_FORMAT];

    /// The role expected to write `key`. `None` for run inputs and unknown keys.
    pub fn owner(key: &str) -> Option<Role> {
        match key {
            DATA_OVERVIEW | DATA_QUALITY | CATEGORY_SUMMARY | REGION_SUMMARY => {
                Some(Role::DataExploration)
            }
            BASIC_STATISTICS | TREND_ANALYSIS | CORRELATION_ANALYSIS | ANOMALIES
            | IQR_ANOMALIES | ANALYSIS_NOTES => Some(Role::StatisticalAnalysis),
            AI_INSIGHTS | AI_ANOMALIES | TREND_PREDICTION | RECOMMENDATIONS
            | INFERENCE_ANNOTATION => Some(Role::AiInsight),
            EXECUTIVE_SUMMARY | KEY_FINDINGS => Some(Role::Reporting),
            _ => None,
        }
    }
}

/// Writer label used for values seeded from the run inputs.
pub const INPUT_WRITER: &str = "input";

/// Parameters of one run, seeded into the context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunInputs {
    pub goal: String,
    pub dataset_ref: String,
    pub depth: Depth,
    pub output_target: String,
    pub output_format: OutputFormat,
}

/// Mutable key/value state shared by the units of one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SharedContext {
    values: BTreeMap<String, Value>,
    writers: BTreeMap<String, String>,
}

impl SharedContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// A context seeded with the run inputs.
    pub fn from_inputs(inputs: &RunInputs) -> Self {
        let mut context = Self::new();
        context.insert(keys::GOAL, inputs.goal.clone());
        context.insert(keys::DATASET_REF, inputs.dataset_ref.clone());
        context.insert(keys::DEPTH, inputs.depth.to_string());
        context.insert(keys::OUTPUT_TARGET, inputs.output_target.clone());
        context.insert(keys::OUTPUT_FORMAT, inputs.output_format.to_string());
        context
    }

    /// Sets a value as a run input.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        self.writers.insert(key.clone(), INPUT_WRITER.to_string());
        self.values.insert(key, value.into());
    }

    /// Merges a unit payload. Returns the keys that already existed and
    /// were overwritten.
    pub fn merge(&mut self, writer: &str, payload: &Payload) -> Vec<String> {
        let mut overwritten = Vec::new();
        for (key, value) in payload {
            if self.values.insert(key.clone(), value.clone()).is_some() {
                overwritten.push(key.clone());
            }
            self.writers.insert(key.clone(), writer.to_string());
        }
        overwritten
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    /// Deserializes a value; `None` when absent or of another shape.
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Who last wrote `key`: a unit id or [`INPUT_WRITER`].
    pub fn writer(&self, key: &str) -> Option<&str> {
        self.writers.get(key).map(String::as_str)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn values(&self) -> &BTreeMap<String, Value> {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
