//! Report compilation.
//!
//! Turns an [`ExecutionReport`] into a single document. Compilation is a pure
//! function of the report: no clock, no environment, so the same run always
//! yields the same bytes. Every section carries its context value verbatim so
//! [`extract_sections`] can read it back out of the document.

use super::{format_count, format_number};
use crate::analysis::{top_groups, AnomalyReport, GroupSummary, StatisticsResult, TrendResult};
use crate::config::ReportConfig;
use crate::crew::roles::DataOverview;
use crate::crew::{keys, ExecutionReport, Role, UnitStatus, WorkUnit};
use crate::models::OutputFormat;
use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const SECTION_MARKER_PREFIX: &str = "<!-- section: ";
const SECTION_MARKER_SUFFIX: &str = " -->";
const SUMMARY_LINE: &str = "<summary>Raw data</summary>";
const NOT_AVAILABLE: &str = "not available";

/// Report sections in document order: key, title, and whether a placeholder
/// is rendered when the key is missing.
const SECTIONS: [(&str, &str, bool); 17] = [
    (keys::EXECUTIVE_SUMMARY, "Executive Summary", true),
    (keys::KEY_FINDINGS, "Key Findings", true),
    (keys::DATA_OVERVIEW, "Data Overview", true),
    (keys::DATA_QUALITY, "Data Quality", true),
    (keys::CATEGORY_SUMMARY, "Category Performance", true),
    (keys::REGION_SUMMARY, "Regional Performance", true),
    (keys::BASIC_STATISTICS, "Descriptive Statistics", true),
    (keys::TREND_ANALYSIS, "Trend Analysis", true),
    (keys::CORRELATION_ANALYSIS, "Correlation Analysis", true),
    (keys::ANOMALIES, "Anomalies", true),
    (keys::IQR_ANOMALIES, "Outlier Review (IQR)", false),
    (keys::ANALYSIS_NOTES, "Analysis Notes", false),
    (keys::AI_INSIGHTS, "Insights", true),
    (keys::AI_ANOMALIES, "Anomaly Screen", true),
    (keys::TREND_PREDICTION, "Trend Prediction", true),
    (keys::RECOMMENDATIONS, "Recommendations", true),
    (keys::INFERENCE_ANNOTATION, "Model Commentary", false),
];

/// Whether a section's value made it into the context.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum Availability {
    Available,
    Unavailable { reason: String },
}

/// One named section of the compiled report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportSection {
    /// Context key the section renders.
    pub key: String,
    pub title: String,
    pub availability: Availability,
    /// The context value, when available.
    pub content: Option<Value>,
    /// The section as it appears in the document.
    pub body: String,
}

/// Status and raw payload of one work unit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnitOutput {
    pub id: String,
    pub role: String,
    pub status: UnitStatus,
    /// Standalone markdown for the unit.
    pub body: String,
}

/// Result of [`compile`].
#[derive(Debug, Clone, Serialize)]
pub struct CompiledReport {
    pub format: OutputFormat,
    pub document: String,
    pub sections: Vec<ReportSection>,
    pub unit_outputs: Vec<UnitOutput>,
}

impl CompiledReport {
    pub fn section(&self, key: &str) -> Option<&ReportSection> {
        self.sections.iter().find(|s| s.key == key)
    }
}

/// Compiles `report` into a document of the given format.
pub fn compile(
    report: &ExecutionReport,
    format: OutputFormat,
    config: &ReportConfig,
) -> CompiledReport {
    let mut sections = Vec::new();

    for (key, title, required) in SECTIONS {
        let availability = match report.context.get(key) {
            Some(_) => Availability::Available,
            None if required => Availability::Unavailable {
                reason: unavailable_reason(key, report),
            },
            None => continue,
        };
        let content = report.context.get(key).cloned();
        let body = match format {
            OutputFormat::Markdown => {
                markdown_section(key, title, &availability, content.as_ref(), config)
            }
            OutputFormat::Flat => flat_section(key, &availability, content.as_ref()),
        };
        sections.push(ReportSection {
            key: key.to_string(),
            title: title.to_string(),
            availability,
            content,
            body,
        });
    }

    let document = match format {
        OutputFormat::Markdown => markdown_document(report, &sections, config),
        OutputFormat::Flat => flat_document(report, &sections),
    };

    CompiledReport {
        format,
        document,
        sections,
        unit_outputs: report.units.iter().map(unit_output).collect(),
    }
}

/// Why `key` is missing, naming the unit that should have produced it.
fn unavailable_reason(key: &str, report: &ExecutionReport) -> String {
    let Some(role) = keys::owner(key) else {
        return "no unit produces this key".to_string();
    };

    let owners: Vec<&WorkUnit> = report
        .units
        .iter()
        .filter(|u| u.role.parse::<Role>().ok() == Some(role))
        .collect();

    let blocked = owners
        .iter()
        .find(|u| matches!(u.status(), UnitStatus::Failed | UnitStatus::Skipped));

    match (blocked, owners.first()) {
        (Some(unit), _) => match &unit.error {
            Some(error) => format!("source unit `{}` {}: {}", unit.id, unit.status(), error),
            None => format!("source unit `{}` {}", unit.id, unit.status()),
        },
        (None, Some(unit)) => format!("not produced by `{}`", unit.id),
        (None, None) => format!("no {} unit was registered", role),
    }
}

// ---------------------------------------------------------------------------
// Structured (markdown) encoding
// ---------------------------------------------------------------------------

fn markdown_document(
    report: &ExecutionReport,
    sections: &[ReportSection],
    config: &ReportConfig,
) -> String {
    let mut output = String::new();

    output.push_str("# Insight Report\n\n");
    output.push_str(&escape_text(&run_overview(report)));
    output.push_str(&table_of_contents(sections, config));

    for section in sections {
        output.push_str(&section.body);
    }

    if config.include_execution_log {
        output.push_str(&escape_text(&execution_log_section(report)));
    }

    output.push_str("---\n\n");
    output.push_str("*Report generated by InsightCrew*\n");

    output
}

fn run_overview(report: &ExecutionReport) -> String {
    let context = &report.context;
    let mut section = String::new();

    section.push_str(&format!(
        "- **Goal:** {}\n",
        context.get_str(keys::GOAL).unwrap_or("not specified")
    ));
    section.push_str(&format!(
        "- **Dataset:** {}\n",
        context.get_str(keys::DATASET_REF).unwrap_or("unknown")
    ));
    if let Some(depth) = context.get_str(keys::DEPTH) {
        section.push_str(&format!("- **Depth:** {}\n", depth));
    }
    section.push_str(&format!(
        "- **Run Status:** {} ({} of {} units completed)\n\n",
        report.status,
        report.count(UnitStatus::Completed),
        report.units.len()
    ));

    section
}

fn table_of_contents(sections: &[ReportSection], config: &ReportConfig) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    for section in sections {
        toc.push_str(&format!("- [{}](#{})\n", section.title, anchor(&section.title)));
    }
    if config.include_execution_log {
        toc.push_str("- [Execution Log](#execution-log)\n");
    }
    toc.push('\n');

    toc
}

fn anchor(title: &str) -> String {
    title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .collect::<String>()
        .to_lowercase()
        .replace(' ', "-")
}

fn markdown_section(
    key: &str,
    title: &str,
    availability: &Availability,
    content: Option<&Value>,
    config: &ReportConfig,
) -> String {
    let mut section = format!("## {}\n\n", title);

    let (Availability::Available, Some(value)) = (availability, content) else {
        if let Availability::Unavailable { reason } = availability {
            section.push_str(&escape_text(&format!("_Not available: {}._\n\n", reason)));
        }
        return section;
    };

    section.push_str(&escape_text(&render_value(key, value, config)));

    // Raw value for readers and for extract_sections.
    section.push_str("<details>\n");
    section.push_str(SUMMARY_LINE);
    section.push_str("\n\n");
    section.push_str(&format!("{}{}{}\n", SECTION_MARKER_PREFIX, key, SECTION_MARKER_SUFFIX));
    section.push_str("```json\n");
    section.push_str(&serde_json::to_string_pretty(value).unwrap_or_else(|_| "null".to_string()));
    section.push_str("\n```\n</details>\n\n");

    section
}

/// Escapes `<` in rendered text so data can never open a marker or an HTML
/// block of its own. Markdown renders the entity as the original character.
fn escape_text(text: &str) -> String {
    text.replace('<', "&lt;")
}

/// Human-readable rendering of one context value.
fn render_value(key: &str, value: &Value, config: &ReportConfig) -> String {
    let typed = match key {
        keys::DATA_OVERVIEW => typed(value, render_overview),
        keys::CATEGORY_SUMMARY | keys::REGION_SUMMARY => {
            typed(value, |groups: Vec<GroupSummary>| render_groups(&groups, config.top_groups))
        }
        keys::BASIC_STATISTICS => typed(value, render_statistics),
        keys::TREND_ANALYSIS => typed(value, render_trend),
        keys::ANOMALIES | keys::IQR_ANOMALIES => typed(value, render_anomalies),
        _ => None,
    };

    typed.unwrap_or_else(|| render_generic(value))
}

fn typed<T, F>(value: &Value, render: F) -> Option<String>
where
    T: serde::de::DeserializeOwned,
    F: FnOnce(T) -> String,
{
    serde_json::from_value(value.clone()).ok().map(render)
}

fn render_generic(value: &Value) -> String {
    match value {
        Value::String(text) => format!("{}\n\n", text),
        Value::Array(items) if items.is_empty() => "_None._\n\n".to_string(),
        Value::Array(items) => {
            let mut list = String::new();
            for item in items {
                match item {
                    Value::String(text) => list.push_str(&format!("- {}\n", text)),
                    other => list.push_str(&format!("- `{}`\n", other)),
                }
            }
            list.push('\n');
            list
        }
        Value::Object(fields) => {
            let mut list = String::new();
            for (name, field) in fields {
                match field {
                    Value::String(text) => list.push_str(&format!("- **{}:** {}\n", name, text)),
                    Value::Number(_) | Value::Bool(_) => {
                        list.push_str(&format!("- **{}:** {}\n", name, field))
                    }
                    _ => {}
                }
            }
            if !list.is_empty() {
                list.push('\n');
            }
            list
        }
        other => format!("{}\n\n", other),
    }
}

fn render_overview(overview: DataOverview) -> String {
    let mut text = String::new();
    text.push_str(&format!("- **Records:** {}\n", format_count(overview.total_records)));
    text.push_str(&format!(
        "- **Categories:** {} ({})\n",
        overview.categories.len(),
        overview.categories.join(", ")
    ));
    text.push_str(&format!(
        "- **Regions:** {} ({})\n",
        overview.regions.len(),
        overview.regions.join(", ")
    ));
    if let Some(range) = &overview.date_range {
        text.push_str(&format!("- **Period:** {} to {}\n", range.start, range.end));
    }
    text.push_str(&format!("- **Total Value:** {}\n", format_number(overview.total_value)));
    text.push_str(&format!(
        "- **Value Range:** {} to {} (average {})\n\n",
        format_number(overview.min_value),
        format_number(overview.max_value),
        format_number(overview.average_value)
    ));
    text
}

fn render_groups(groups: &[GroupSummary], limit: usize) -> String {
    if groups.is_empty() {
        return "_No groups._\n\n".to_string();
    }

    let mut table = String::new();
    table.push_str("| Label | Records | Total | Average |\n");
    table.push_str("|:---|:---:|---:|---:|\n");
    for group in top_groups(groups, limit) {
        table.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            group.label,
            format_count(group.count),
            format_number(group.total),
            format_number(group.average)
        ));
    }
    if groups.len() > limit {
        table.push_str(&format!("\n*Top {} of {} groups shown.*\n", limit, groups.len()));
    }
    table.push('\n');
    table
}

fn render_statistics(stats: StatisticsResult) -> String {
    let rows = [
        ("Count", format_count(stats.count)),
        ("Sum", format_number(stats.sum)),
        ("Mean", format_number(stats.mean)),
        ("Median", format_number(stats.median)),
        ("Std. deviation", format_number(stats.std_dev)),
        ("Min", format_number(stats.min)),
        ("Q1", format_number(stats.q25)),
        ("Q3", format_number(stats.q75)),
        ("Max", format_number(stats.max)),
        ("Skewness", format!("{:.3}", stats.skewness)),
        ("Kurtosis", format!("{:.3}", stats.kurtosis)),
    ];

    let mut table = format!("Column `{}`\n\n| Metric | Value |\n|:---|---:|\n", stats.column);
    for (metric, value) in rows {
        table.push_str(&format!("| {} | {} |\n", metric, value));
    }
    table.push('\n');
    table
}

fn render_trend(trend: TrendResult) -> String {
    let mut text = format!(
        "Overall trend is **{}** from {} to {}, with an average growth of {:.2}% per period.\n",
        trend.trend, trend.start, trend.end, trend.average_growth_rate
    );
    if let Some(total) = trend.total_growth {
        text.push_str(&format!("Total growth over the period: {:.2}%.\n", total));
    }
    if let Some(latest) = trend.latest_moving_average {
        text.push_str(&format!(
            "Latest {}-period moving average: {}.\n",
            trend.window_size,
            format_number(latest)
        ));
    }
    if !trend.inflection_points.is_empty() {
        text.push_str(&format!(
            "Inflection points: {}.\n",
            trend.inflection_points.join(", ")
        ));
    }
    text.push('\n');
    text
}

fn render_anomalies(report: AnomalyReport) -> String {
    let mut text = format!(
        "{} of {} values flagged in `{}` by {} (rate {:.2}).\n\n",
        report.total_anomalies,
        report.sample_size,
        report.column,
        report.method,
        report.anomaly_rate
    );
    if report.anomalies.is_empty() {
        return text;
    }

    text.push_str("| Record | Date | Value | Severity |\n");
    text.push_str("|:---:|:---|---:|:---|\n");
    for anomaly in &report.anomalies {
        text.push_str(&format!(
            "| {} | {} | {} | {} |\n",
            anomaly.index,
            anomaly.date.as_deref().unwrap_or("-"),
            format_number(anomaly.value),
            anomaly.severity
        ));
    }
    text.push('\n');
    text
}

fn execution_log_section(report: &ExecutionReport) -> String {
    let mut section = String::new();

    section.push_str("## Execution Log\n\n");
    section.push_str("| Unit | Role | Status |\n");
    section.push_str("|:---|:---|:---|\n");
    for id in &report.execution_order {
        if let Some(unit) = report.unit(id) {
            let role = unit
                .role
                .parse::<Role>()
                .map_or(unit.role.as_str(), |role| role.title());
            section.push_str(&format!("| `{}` | {} | {} |\n", unit.id, role, unit.status()));
        }
    }
    section.push('\n');

    for (i, entry) in report.log.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, entry));
    }
    section.push('\n');

    section
}

// ---------------------------------------------------------------------------
// Flat encoding
// ---------------------------------------------------------------------------

fn flat_document(report: &ExecutionReport, sections: &[ReportSection]) -> String {
    let mut output = String::new();

    output.push_str(&format!("# status: {}\n", report.status));
    for (key, value) in report
        .context
        .iter()
        .filter(|(k, _)| keys::RUN_INPUTS.contains(&k.as_str()))
    {
        output.push_str(&format!("# {}: {}\n", key, value));
    }
    for section in sections {
        output.push_str(&section.body);
    }

    output
}

fn flat_section(key: &str, availability: &Availability, content: Option<&Value>) -> String {
    match (availability, content) {
        (Availability::Available, Some(value)) => format!("{}: {}\n", key, value),
        (Availability::Unavailable { reason }, _) => {
            format!("{}: {} ({})\n", key, NOT_AVAILABLE, reason)
        }
        (Availability::Available, None) => format!("{}: null\n", key),
    }
}

// ---------------------------------------------------------------------------
// Extraction and output
// ---------------------------------------------------------------------------

/// Reads the section values back out of a compiled document.
///
/// Placeholders are not returned.
pub fn extract_sections(document: &str, format: OutputFormat) -> BTreeMap<String, Value> {
    match format {
        OutputFormat::Markdown => extract_markdown(document),
        OutputFormat::Flat => extract_flat(document),
    }
}

/// Only markers opening a raw-data block count: the marker must follow the
/// `<details>` summary line and a blank line. The first block per key wins.
fn extract_markdown(document: &str) -> BTreeMap<String, Value> {
    let mut sections = BTreeMap::new();
    let mut lines = document.lines();
    let mut previous = ("", "");

    while let Some(line) = lines.next() {
        let opens_block = previous == (SUMMARY_LINE, "");
        previous = (previous.1, line);
        if !opens_block {
            continue;
        }
        let Some(key) = line
            .strip_prefix(SECTION_MARKER_PREFIX)
            .and_then(|rest| rest.strip_suffix(SECTION_MARKER_SUFFIX))
        else {
            continue;
        };
        if lines.next() != Some("```json") {
            continue;
        }

        let mut raw = String::new();
        for body_line in lines.by_ref() {
            if body_line == "```" {
                break;
            }
            raw.push_str(body_line);
            raw.push('\n');
        }
        if let Ok(value) = serde_json::from_str(&raw) {
            sections.entry(key.to_string()).or_insert(value);
        }
    }

    sections
}

fn extract_flat(document: &str) -> BTreeMap<String, Value> {
    document
        .lines()
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once(": "))
        .filter_map(|(key, raw)| {
            serde_json::from_str(raw)
                .ok()
                .map(|value| (key.to_string(), value))
        })
        .collect()
}

fn unit_output(unit: &WorkUnit) -> UnitOutput {
    let mut body = format!("# {}\n\n", unit.id);
    body.push_str(&format!("- **Description:** {}\n", unit.description));
    body.push_str(&format!("- **Role:** {}\n", unit.role));
    body.push_str(&format!("- **Status:** {}\n", unit.status()));
    if !unit.dependencies.is_empty() {
        body.push_str(&format!("- **Depends on:** {}\n", unit.dependencies.join(", ")));
    }
    if let Some(error) = &unit.error {
        body.push_str(&format!("- **Error:** {}\n", error));
    }
    body.push('\n');

    if let Some(result) = &unit.result {
        body.push_str("## Output\n\n```json\n");
        body.push_str(&serde_json::to_string_pretty(result).unwrap_or_else(|_| "{}".to_string()));
        body.push_str("\n```\n");
    }

    UnitOutput {
        id: unit.id.clone(),
        role: unit.role.clone(),
        status: unit.status(),
        body,
    }
}

/// Write the compiled document to a file.
pub fn write_report(report: &CompiledReport, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {}", parent.display()))?;
    }
    std::fs::write(path, &report.document)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}

/// Write one `<unit_id>.md` file per unit into `dir`. Returns the paths written.
pub fn write_unit_outputs(report: &CompiledReport, dir: &Path) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create sections directory {}", dir.display()))?;

    let mut written = Vec::with_capacity(report.unit_outputs.len());
    for output in &report.unit_outputs {
        let path = dir.join(format!("{}.md", output.id));
        std::fs::write(&path, &output.body)
            .with_context(|| format!("Failed to write section file {}", path.display()))?;
        written.push(path);
    }

    Ok(written)
}
