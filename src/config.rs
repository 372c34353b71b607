//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.insightcrew.toml` files.

use crate::analysis::{anomaly::DEFAULT_ZSCORE_THRESHOLD, correlation::STRONG_CORRELATION_THRESHOLD};
use crate::models::OutputFormat;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Name of the configuration file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".insightcrew.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Statistics pipeline settings.
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// External inference settings.
    #[serde(default)]
    pub inference: InferenceSettings,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "insight_report.md".to_string()
}

/// Thresholds and windows used by the analysis roles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Minimum |z| (at 2-decimal precision) for a z-score anomaly.
    #[serde(default = "default_zscore_threshold")]
    pub zscore_threshold: f64,

    /// Minimum |r| for a pair to count as a strong correlation.
    #[serde(default = "default_strong_correlation")]
    pub strong_correlation: f64,

    /// Trailing moving-average window for trend analysis.
    #[serde(default = "default_moving_average_window")]
    pub moving_average_window: usize,

    /// Number of periods extrapolated by the insight stage.
    #[serde(default = "default_forecast_periods")]
    pub forecast_periods: usize,

    /// Growth rate per period assumed by the extrapolation.
    #[serde(default = "default_assumed_growth_rate")]
    pub assumed_growth_rate: f64,

    /// Correlation method: pearson, spearman or kendall.
    #[serde(default = "default_correlation_method")]
    pub correlation_method: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            zscore_threshold: default_zscore_threshold(),
            strong_correlation: default_strong_correlation(),
            moving_average_window: default_moving_average_window(),
            forecast_periods: default_forecast_periods(),
            assumed_growth_rate: default_assumed_growth_rate(),
            correlation_method: default_correlation_method(),
        }
    }
}

fn default_zscore_threshold() -> f64 {
    DEFAULT_ZSCORE_THRESHOLD
}

fn default_strong_correlation() -> f64 {
    STRONG_CORRELATION_THRESHOLD
}

fn default_moving_average_window() -> usize {
    7
}

fn default_forecast_periods() -> usize {
    3
}

fn default_assumed_growth_rate() -> f64 {
    0.1
}

fn default_correlation_method() -> String {
    "pearson".to_string()
}

/// Settings for the optional language-model annotation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceSettings {
    /// Ask the model for an annotation during the insight stage.
    #[serde(default)]
    pub enabled: bool,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Model name.
    #[serde(default = "default_model")]
    pub model: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Upper bound on one inference call, in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            ollama_url: default_ollama_url(),
            model: default_model(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    120
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Document encoding.
    #[serde(default)]
    pub format: OutputFormat,

    /// Include the execution log section.
    #[serde(default = "default_true")]
    pub include_execution_log: bool,

    /// Groups listed per breakdown.
    #[serde(default = "default_top_groups")]
    pub top_groups: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::default(),
            include_execution_log: true,
            top_groups: default_top_groups(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_top_groups() -> usize {
    3
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings.
    /// Only values given explicitly on the command line override.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }
        if let Some(format) = args.format {
            self.report.format = format;
        }

        if let Some(threshold) = args.zscore_threshold {
            self.analysis.zscore_threshold = threshold;
        }
        if let Some(window) = args.window {
            self.analysis.moving_average_window = window;
        }

        if let Some(ref model) = args.model {
            self.inference.model = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.inference.ollama_url = url.clone();
        }
        if let Some(timeout) = args.timeout {
            self.inference.timeout_seconds = timeout;
        }

        // Flags always override
        if args.inference {
            self.inference.enabled = true;
        }
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.general.output, "insight_report.md");
        assert_eq!(config.analysis.zscore_threshold, 2.0);
        assert_eq!(config.analysis.strong_correlation, 0.7);
        assert_eq!(config.analysis.moving_average_window, 7);
        assert!(!config.inference.enabled);
        assert_eq!(config.report.format, OutputFormat::Markdown);
        assert_eq!(config.report.top_groups, 3);
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[general]
output = "q1_report.md"
verbose = true

[analysis]
zscore_threshold = 1.5
correlation_method = "spearman"

[inference]
enabled = true
model = "qwen2.5:7b"

[report]
format = "flat"
top_groups = 5
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.general.output, "q1_report.md");
        assert!(config.general.verbose);
        assert_eq!(config.analysis.zscore_threshold, 1.5);
        assert_eq!(config.analysis.correlation_method, "spearman");
        assert_eq!(config.analysis.forecast_periods, 3);
        assert!(config.inference.enabled);
        assert_eq!(config.inference.model, "qwen2.5:7b");
        assert_eq!(config.inference.timeout_seconds, 120);
        assert_eq!(config.report.format, OutputFormat::Flat);
        assert_eq!(config.report.top_groups, 5);
        assert!(config.report.include_execution_log);
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[analysis]"));
        assert!(toml_str.contains("[inference]"));
        assert!(toml_str.contains("[report]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.analysis, AnalysisConfig::default());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[analysis]\nforecast_periods = 6\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.analysis.forecast_periods, 6);
        assert!(Config::load(&dir.path().join("absent.toml")).is_err());
    }
}
