//! Built-in role handlers.
//!
//! Each handler reads what it needs from the shared context and falls back
//! to computing it from the dataset, or to a neutral default, when an
//! upstream key is missing. Only engine errors fail a unit.

use super::context::keys;
use super::dispatcher::{HandlerInput, RoleHandler};
use super::unit::Payload;
use crate::agent::Inference;
use crate::analysis::correlation::correlation_matrix_with_threshold;
use crate::analysis::{
    basic_statistics, detect_anomalies, group_by_category, group_by_region, is_zero_spread, mean,
    round_to, std_dev, trend_analysis, AnomalyReport, GroupSummary, StatisticsResult,
    TrendDirection, TrendResult,
};
use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::models::{format_timestamp, Dataset, Record, DATE_FIELD, VALUE_FIELD};
use crate::report::{format_count, format_number};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// |z| above this is reported by the insight screen.
pub const SCREEN_ZSCORE: f64 = 1.5;

/// |z| above this gives a high-confidence screen result.
pub const SCREEN_HIGH_CONFIDENCE: f64 = 2.5;

fn to_json<T: Serialize>(value: &T) -> Value {
    serde_json::to_value(value).unwrap_or(Value::Null)
}

fn insert<T: Serialize>(payload: &mut Payload, key: &str, value: &T) {
    payload.insert(key.to_string(), to_json(value));
}

// ---------------------------------------------------------------------------
// Data exploration
// ---------------------------------------------------------------------------

/// First and last observation dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: String,
    pub end: String,
}

/// Shape and headline figures of the dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataOverview {
    pub total_records: usize,
    pub columns: Vec<String>,
    pub numeric_columns: Vec<String>,
    pub categories: Vec<String>,
    pub regions: Vec<String>,
    pub date_range: Option<DateRange>,
    pub total_value: f64,
    pub average_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    /// Population standard deviation of the value column.
    pub value_std: f64,
}

/// Letter grade from the share of missing cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityGrade {
    A,
    B,
    C,
}

impl QualityGrade {
    /// Under 1% missing is `A`, under 5% is `B`.
    pub fn from_missing_ratio(ratio: f64) -> Self {
        if ratio < 0.01 {
            QualityGrade::A
        } else if ratio < 0.05 {
            QualityGrade::B
        } else {
            QualityGrade::C
        }
    }
}

/// Missing values and duplicates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataQuality {
    pub total_cells: usize,
    pub missing_cells: usize,
    /// Columns with at least one missing value.
    pub missing_by_column: BTreeMap<String, usize>,
    pub duplicate_records: usize,
    /// Share of non-missing cells, in percent.
    pub completeness: f64,
    pub quality_score: QualityGrade,
}

/// Computes the [`DataOverview`]. Fails on an empty dataset.
pub fn dataset_overview(dataset: &Dataset) -> Result<DataOverview> {
    let records = dataset.records();
    if records.is_empty() {
        return Err(AnalysisError::InsufficientData {
            required: 1,
            found: 0,
        });
    }

    let values: Vec<f64> = records
        .iter()
        .map(|r| r.value)
        .filter(|v| v.is_finite())
        .collect();
    if values.is_empty() {
        return Err(AnalysisError::InsufficientData {
            required: 1,
            found: 0,
        });
    }
    let categories: BTreeSet<&str> = records.iter().map(|r| r.category.as_str()).collect();
    let regions: BTreeSet<&str> = records.iter().map(|r| r.region.as_str()).collect();

    let dates = records.iter().filter_map(|r| r.date);
    let date_range = dates
        .clone()
        .min()
        .zip(dates.max())
        .map(|(start, end)| DateRange {
            start: format_timestamp(&start),
            end: format_timestamp(&end),
        });

    let total_value: f64 = values.iter().sum();

    Ok(DataOverview {
        total_records: records.len(),
        columns: dataset.column_names(),
        numeric_columns: dataset.numeric_columns(),
        categories: categories.into_iter().map(String::from).collect(),
        regions: regions.into_iter().map(String::from).collect(),
        date_range,
        total_value,
        average_value: total_value / values.len() as f64,
        min_value: values.iter().copied().fold(f64::INFINITY, f64::min),
        max_value: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        value_std: std_dev(&values, 0).unwrap_or(0.0),
    })
}

/// Computes the [`DataQuality`] check.
pub fn data_quality(dataset: &Dataset) -> DataQuality {
    let null_counts = dataset.null_counts();
    let total_cells = dataset.len() * null_counts.len();
    let missing_cells: usize = null_counts.iter().map(|(_, n)| n).sum();

    let mut seen = HashSet::new();
    let duplicate_records = dataset
        .records()
        .iter()
        .filter(|r| !seen.insert(serde_json::to_string(r).unwrap_or_default()))
        .count();

    let missing_ratio = if total_cells == 0 {
        0.0
    } else {
        missing_cells as f64 / total_cells as f64
    };

    DataQuality {
        total_cells,
        missing_cells,
        missing_by_column: null_counts.into_iter().filter(|(_, n)| *n > 0).collect(),
        duplicate_records,
        completeness: round_to((1.0 - missing_ratio) * 100.0, 2),
        quality_score: QualityGrade::from_missing_ratio(missing_ratio),
    }
}

/// Profiles the dataset: overview, quality and group breakdowns.
pub struct ExplorationHandler {
    dataset: Arc<Dataset>,
}

impl ExplorationHandler {
    pub fn new(dataset: Arc<Dataset>) -> Self {
        Self { dataset }
    }
}

#[async_trait]
impl RoleHandler for ExplorationHandler {
    async fn handle(&self, input: HandlerInput<'_>) -> Result<Payload> {
        let overview = dataset_overview(&self.dataset)?;
        let quality = data_quality(&self.dataset);
        let records = self.dataset.records();

        info!(
            "{}: {} records, {} categories, {} regions, quality {:?}",
            input.unit.id,
            overview.total_records,
            overview.categories.len(),
            overview.regions.len(),
            quality.quality_score
        );

        let mut payload = Payload::new();
        insert(&mut payload, keys::DATA_OVERVIEW, &overview);
        insert(&mut payload, keys::DATA_QUALITY, &quality);
        insert(
            &mut payload,
            keys::CATEGORY_SUMMARY,
            &group_by_category(records, VALUE_FIELD),
        );
        insert(
            &mut payload,
            keys::REGION_SUMMARY,
            &group_by_region(records, VALUE_FIELD),
        );
        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// Statistical analysis
// ---------------------------------------------------------------------------

/// Runs the statistics engine.
///
/// Unit parameters: `value_column`, `date_column`, `anomaly_method`,
/// `anomaly_key`, `threshold` and `anomalies_only`. Trend and correlation
/// are skipped with a note when the data cannot support them.
pub struct StatisticalAnalysisHandler {
    dataset: Arc<Dataset>,
    settings: AnalysisConfig,
}

impl StatisticalAnalysisHandler {
    pub fn new(dataset: Arc<Dataset>, settings: AnalysisConfig) -> Self {
        Self { dataset, settings }
    }
}

#[async_trait]
impl RoleHandler for StatisticalAnalysisHandler {
    async fn handle(&self, input: HandlerInput<'_>) -> Result<Payload> {
        let unit = input.unit;
        let value_column = unit.param_str("value_column").unwrap_or(VALUE_FIELD);
        let date_column = unit.param_str("date_column").unwrap_or(DATE_FIELD);
        let method = unit.param_str("anomaly_method").unwrap_or("zscore");
        let anomaly_key = unit.param_str("anomaly_key").unwrap_or(keys::ANOMALIES);
        let threshold = unit
            .param_f64("threshold")
            .unwrap_or(self.settings.zscore_threshold);

        let mut payload = Payload::new();

        if !unit.param_bool("anomalies_only").unwrap_or(false) {
            let stats = basic_statistics(&self.dataset, value_column)?;
            debug!("{}: mean {:.2}, std {:.2}", unit.id, stats.mean, stats.std_dev);
            insert(&mut payload, keys::BASIC_STATISTICS, &stats);

            let mut notes: Vec<String> = Vec::new();

            match trend_analysis(
                &self.dataset,
                value_column,
                date_column,
                self.settings.moving_average_window,
            ) {
                Ok(trend) => {
                    info!(
                        "{}: trend {} ({:.2}% average growth)",
                        unit.id, trend.trend, trend.average_growth_rate
                    );
                    insert(&mut payload, keys::TREND_ANALYSIS, &trend);
                }
                Err(e @ AnalysisError::InsufficientData { .. }) => {
                    warn!("{}: trend analysis skipped: {}", unit.id, e);
                    notes.push(format!("trend analysis skipped: {}", e));
                }
                Err(e) => return Err(e),
            }

            let columns = self.dataset.numeric_columns();
            match correlation_matrix_with_threshold(
                &self.dataset,
                &columns,
                &self.settings.correlation_method,
                self.settings.strong_correlation,
            ) {
                Ok(matrix) => {
                    info!(
                        "{}: {} strong correlations among {} columns",
                        unit.id,
                        matrix.strong_correlations.len(),
                        matrix.columns.len()
                    );
                    insert(&mut payload, keys::CORRELATION_ANALYSIS, &matrix);
                }
                Err(e @ AnalysisError::InsufficientColumns { .. }) => {
                    debug!("{}: correlation skipped: {}", unit.id, e);
                    notes.push(format!("correlation analysis skipped: {}", e));
                }
                Err(e) => return Err(e),
            }

            if !notes.is_empty() {
                insert(&mut payload, keys::ANALYSIS_NOTES, &notes);
            }
        }

        let anomalies = detect_anomalies(&self.dataset, value_column, method, threshold)?;
        info!(
            "{}: {} {} anomalies in '{}'",
            unit.id, anomalies.total_anomalies, anomalies.method, value_column
        );
        insert(&mut payload, anomaly_key, &anomalies);

        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// Insight synthesis
// ---------------------------------------------------------------------------

/// One extrapolated period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionPoint {
    /// Offset from the last observation, e.g. `+1`.
    pub period: String,
    pub value: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    pub low: f64,
    pub high: f64,
}

/// Deterministic extrapolation of a series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendPrediction {
    pub growth_rate: f64,
    pub trend: TrendDirection,
    pub predictions: Vec<PredictionPoint>,
    pub confidence_interval: ConfidenceInterval,
}

/// Extrapolates `periods` values from the last one at a fixed growth rate.
///
/// Period `i` is `last * (1 + g)^i` with confidence `0.85 - 0.1 i`, floored
/// at zero. The growth rate is forced to zero when the series mean is not
/// positive. The interval spans 90% to 110% of the mean.
pub fn predict_trend(values: &[f64], periods: usize, growth_rate: f64) -> TrendPrediction {
    let avg = mean(values).unwrap_or(0.0);
    let last = values.last().copied().unwrap_or(0.0);
    let g = if avg > 0.0 { growth_rate } else { 0.0 };

    let predictions = (1..=periods)
        .map(|i| PredictionPoint {
            period: format!("+{}", i),
            value: round_to(last * (1.0 + g).powi(i as i32), 2),
            confidence: round_to((0.85 - 0.1 * i as f64).max(0.0), 2),
        })
        .collect();

    let trend = if g > 0.0 {
        TrendDirection::Increasing
    } else if g < 0.0 {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    };

    TrendPrediction {
        growth_rate: g,
        trend,
        predictions,
        confidence_interval: ConfidenceInterval {
            low: round_to(avg * 0.9, 2),
            high: round_to(avg * 1.1, 2),
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Medium,
    High,
}

/// A value flagged by the insight screen.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenedAnomaly {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    pub value: f64,
    pub z_score: f64,
    pub confidence: Confidence,
    pub explanation: String,
}

/// Looser z-score screen used for insight synthesis: flags |z| > 1.5.
pub fn screen_anomalies(series: &[(Option<String>, f64)]) -> Vec<ScreenedAnomaly> {
    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let (Some(m), Some(std)) = (mean(&values), std_dev(&values, 0)) else {
        return Vec::new();
    };
    if is_zero_spread(std, m) {
        return Vec::new();
    }

    series
        .iter()
        .enumerate()
        .filter_map(|(index, (date, value))| {
            let z = (value - m) / std;
            (z.abs() > SCREEN_ZSCORE).then(|| ScreenedAnomaly {
                index,
                date: date.clone(),
                value: *value,
                z_score: round_to(z, 2),
                confidence: if z.abs() > SCREEN_HIGH_CONFIDENCE {
                    Confidence::High
                } else {
                    Confidence::Medium
                },
                explanation: format!(
                    "value deviates {:.2} standard deviations from the mean",
                    z
                ),
            })
        })
        .collect()
}

/// Short findings about level, variability and shape of the value column.
pub fn generate_insights(
    stats: Option<&StatisticsResult>,
    trend: Option<&TrendResult>,
    anomaly_count: usize,
) -> Vec<String> {
    let mut insights = Vec::new();

    if let Some(stats) = stats {
        insights.push(format!(
            "Overall: values range from {} to {} with an average of {}.",
            format_number(stats.min),
            format_number(stats.max),
            format_number(stats.mean)
        ));

        let variability = if stats.std_dev < stats.mean.abs() * 0.2 {
            "low volatility, performance is stable"
        } else {
            "high volatility, stability needs attention"
        };
        insights.push(format!(
            "Variability: standard deviation of {} indicates {}.",
            format_number(stats.std_dev),
            variability
        ));

        let ratio = if stats.mean != 0.0 {
            stats.median / stats.mean
        } else {
            f64::NAN
        };
        let shape = if ratio > 0.8 && ratio < 1.2 {
            "the distribution is balanced"
        } else {
            "the distribution is skewed"
        };
        insights.push(format!(
            "Distribution: median of {} means {}.",
            format_number(stats.median),
            shape
        ));
    }

    if let Some(trend) = trend {
        insights.push(format!(
            "Trend: {} with an average period growth of {:.2}%.",
            trend.trend, trend.average_growth_rate
        ));
    }

    if anomaly_count > 0 {
        insights.push(format!(
            "Anomalies: {} values stand out from the rest of the series.",
            anomaly_count
        ));
    }

    insights
}

/// Action items keyed off the trend and the anomaly count.
pub fn generate_recommendations(
    trend: Option<TrendDirection>,
    anomaly_count: usize,
) -> Vec<String> {
    let mut recommendations = Vec::new();

    recommendations.push(
        match trend.unwrap_or(TrendDirection::Stable) {
            TrendDirection::Increasing => "Maintain the current strategy and consider scaling up",
            TrendDirection::Decreasing => "Investigate the decline and adjust the strategy",
            TrendDirection::Stable => "Use the stable period to optimize operations",
        }
        .to_string(),
    );

    if anomaly_count > 0 {
        recommendations.push("Dig into the causes of the detected anomalies".to_string());
    }

    recommendations.push("Monitor key metrics regularly".to_string());
    recommendations.push("Focus investment on the top performing groups".to_string());

    recommendations
}

/// Finite values ordered by date; undated records keep their order after dated ones.
fn ordered_series(records: &[Record]) -> Vec<(Option<String>, f64)> {
    let mut ordered: Vec<&Record> = records.iter().filter(|r| r.value.is_finite()).collect();
    ordered.sort_by(|a, b| match (a.date, b.date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    ordered
        .into_iter()
        .map(|r| (r.date.as_ref().map(format_timestamp), r.value))
        .collect()
}

/// An inference backend with the time it is allowed to take.
#[derive(Clone)]
pub struct InferenceBinding {
    pub backend: Arc<dyn Inference>,
    pub timeout: Duration,
}

impl InferenceBinding {
    pub fn new(backend: Arc<dyn Inference>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    /// Calls the backend, mapping timeouts and failures to unit errors.
    pub async fn annotate(&self, prompt: &str, context: &Value) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.backend.infer(prompt, context)).await {
            Ok(Ok(text)) => Ok(text),
            Ok(Err(e)) => Err(AnalysisError::ExternalInferenceFailure(format!("{:#}", e))),
            Err(_) => Err(AnalysisError::ExternalInferenceTimeout(self.timeout)),
        }
    }
}

/// Synthesizes insights, predictions and recommendations.
pub struct AiInsightHandler {
    dataset: Arc<Dataset>,
    settings: AnalysisConfig,
    inference: Option<InferenceBinding>,
}

impl AiInsightHandler {
    pub fn new(
        dataset: Arc<Dataset>,
        settings: AnalysisConfig,
        inference: Option<InferenceBinding>,
    ) -> Self {
        Self {
            dataset,
            settings,
            inference,
        }
    }
}

#[async_trait]
impl RoleHandler for AiInsightHandler {
    async fn handle(&self, input: HandlerInput<'_>) -> Result<Payload> {
        let context = input.context;

        let stats = context
            .get_as::<StatisticsResult>(keys::BASIC_STATISTICS)
            .or_else(|| basic_statistics(&self.dataset, VALUE_FIELD).ok());
        let trend = context.get_as::<TrendResult>(keys::TREND_ANALYSIS);
        let detected = context.get_as::<AnomalyReport>(keys::ANOMALIES);

        let series = ordered_series(self.dataset.records());
        let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();

        let prediction = predict_trend(
            &values,
            self.settings.forecast_periods,
            self.settings.assumed_growth_rate,
        );
        let screened = screen_anomalies(&series);
        let anomaly_count = detected
            .as_ref()
            .map_or(screened.len(), |report| report.total_anomalies);

        let insights = generate_insights(stats.as_ref(), trend.as_ref(), anomaly_count);
        let recommendations =
            generate_recommendations(trend.as_ref().map(|t| t.trend), anomaly_count);

        info!(
            "{}: {} insights, {} screened anomalies, {} forecast periods",
            input.unit.id,
            insights.len(),
            screened.len(),
            prediction.predictions.len()
        );

        let mut payload = Payload::new();
        insert(&mut payload, keys::AI_INSIGHTS, &insights);
        insert(&mut payload, keys::TREND_PREDICTION, &prediction);
        insert(&mut payload, keys::AI_ANOMALIES, &screened);
        insert(&mut payload, keys::RECOMMENDATIONS, &recommendations);

        if let Some(binding) = &self.inference {
            let goal = context.get_str(keys::GOAL).unwrap_or("Describe the data");
            let prompt = format!("Analysis goal: {}", goal);
            let annotation_context = json!({
                "basic_statistics": to_json(&stats),
                "trend_analysis": to_json(&trend),
                "insights": insights,
                "trend_prediction": to_json(&prediction),
            });
            let annotation = binding.annotate(&prompt, &annotation_context).await?;
            payload.insert(keys::INFERENCE_ANNOTATION.to_string(), json!(annotation));
        }

        Ok(payload)
    }
}

// ---------------------------------------------------------------------------
// Reporting
// ---------------------------------------------------------------------------

/// Headline findings from whatever the upstream units produced.
pub fn key_findings(
    overview: Option<&DataOverview>,
    stats: Option<&StatisticsResult>,
    categories: &[GroupSummary],
    regions: &[GroupSummary],
    trend: Option<&TrendResult>,
    anomaly_count: Option<usize>,
) -> Vec<String> {
    let mut findings = Vec::new();

    let total = overview
        .map(|o| o.total_value)
        .or_else(|| stats.map(|s| s.sum));
    if let Some(total) = total {
        findings.push(format!("Total value: {}", format_number(total)));
    }
    if let Some(top) = categories.first() {
        findings.push(format!("Top category: {}", top.label));
    }
    if let Some(top) = regions.first() {
        findings.push(format!("Core region: {}", top.label));
    }
    findings.push(format!(
        "Overall trend: {}",
        trend.map_or_else(|| "unknown".to_string(), |t| t.trend.to_string())
    ));
    if let Some(count) = anomaly_count.filter(|n| *n > 0) {
        findings.push(format!("Detected {} anomalies", count));
    }

    findings
}

/// Writes the executive summary and key findings.
#[derive(Default)]
pub struct ReportingHandler;

impl ReportingHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RoleHandler for ReportingHandler {
    async fn handle(&self, input: HandlerInput<'_>) -> Result<Payload> {
        let context = input.context;

        let overview = context.get_as::<DataOverview>(keys::DATA_OVERVIEW);
        let stats = context.get_as::<StatisticsResult>(keys::BASIC_STATISTICS);
        let trend = context.get_as::<TrendResult>(keys::TREND_ANALYSIS);
        let categories = context
            .get_as::<Vec<GroupSummary>>(keys::CATEGORY_SUMMARY)
            .unwrap_or_default();
        let regions = context
            .get_as::<Vec<GroupSummary>>(keys::REGION_SUMMARY)
            .unwrap_or_default();
        let anomaly_count = context
            .get_as::<AnomalyReport>(keys::ANOMALIES)
            .map(|r| r.total_anomalies);
        let insights = context
            .get_as::<Vec<String>>(keys::AI_INSIGHTS)
            .unwrap_or_default();

        let findings = key_findings(
            overview.as_ref(),
            stats.as_ref(),
            &categories,
            &regions,
            trend.as_ref(),
            anomaly_count,
        );

        let mut summary = String::new();
        summary.push_str(&format!(
            "Goal: {}\n",
            context.get_str(keys::GOAL).unwrap_or("not specified")
        ));
        summary.push_str(&format!(
            "Dataset: {}",
            context.get_str(keys::DATASET_REF).unwrap_or("unknown")
        ));
        match &overview {
            Some(o) => summary.push_str(&format!(" ({} records)\n", format_count(o.total_records))),
            None => summary.push('\n'),
        }
        if let Some(stats) = &stats {
            summary.push_str(&format!(
                "Total value: {}; average value: {}\n",
                format_number(stats.sum),
                format_number(stats.mean)
            ));
        }
        if let Some(trend) = &trend {
            summary.push_str(&format!(
                "Trend: {} ({:.2}% average growth)\n",
                trend.trend, trend.average_growth_rate
            ));
        }
        if !insights.is_empty() {
            let highlights: Vec<&str> = insights.iter().take(2).map(String::as_str).collect();
            summary.push_str(&format!("Highlights: {}\n", highlights.join(" ")));
        }

        info!("{}: {} key findings", input.unit.id, findings.len());

        let mut payload = Payload::new();
        payload.insert(
            keys::EXECUTIVE_SUMMARY.to_string(),
            json!(summary.trim_end()),
        );
        insert(&mut payload, keys::KEY_FINDINGS, &findings);
        Ok(payload)
    }
}
