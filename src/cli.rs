//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::config::GeneralConfig;
use crate::models::{Depth, OutputFormat};
use clap::Parser;
use std::path::PathBuf;

/// InsightCrew - dependency-ordered analysis of tabular business data
///
/// Loads a dataset, runs exploration, statistics, insight and reporting
/// units in dependency order and compiles one report.
///
/// Examples:
///   insightcrew --data sales.json
///   insightcrew --data sales.jsonl --depth deep --format flat
///   insightcrew --data sales.json --inference --model llama3.2:latest
///   insightcrew --data sales.json --sections-dir sections/
///   insightcrew --data sales.json --dry-run
///   insightcrew --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Dataset to analyze (JSON array or JSON Lines)
    ///
    /// Not required when using --init-config or --dry-run.
    #[arg(
        short,
        long,
        value_name = "FILE",
        required_unless_present_any = ["init_config", "dry_run"]
    )]
    pub data: Option<PathBuf>,

    /// Analysis goal, passed through to the report
    #[arg(short, long, default_value = "Analyze the dataset and report key findings")]
    pub goal: String,

    /// Which units run: quick, standard or deep
    #[arg(long, default_value = "standard", value_name = "DEPTH")]
    pub depth: Depth,

    /// Report encoding (markdown, flat)
    ///
    /// Defaults to the config file setting, then markdown.
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<OutputFormat>,

    /// Output file path for the report
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Write one markdown file per work unit into this directory
    #[arg(long, value_name = "DIR")]
    pub sections_dir: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .insightcrew.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Z-score threshold for anomaly detection
    #[arg(long, value_name = "Z")]
    pub zscore_threshold: Option<f64>,

    /// Moving-average window for trend analysis
    #[arg(long, value_name = "POINTS")]
    pub window: Option<usize>,

    /// Ask an Ollama model for commentary during the insight unit
    #[arg(long)]
    pub inference: bool,

    /// Ollama model used with --inference
    #[arg(short, long, env = "INSIGHTCREW_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Inference timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: print the work-unit plan without executing it
    #[arg(long)]
    pub dry_run: bool,

    /// Generate a default .insightcrew.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        // Validate the dataset path (not needed for dry-run)
        if !self.dry_run {
            if let Some(ref data) = self.data {
                if !data.is_file() {
                    return Err(format!("Dataset file does not exist: {}", data.display()));
                }
            }
        }

        // Validate Ollama URL format
        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(threshold) = self.zscore_threshold {
            if !threshold.is_finite() || threshold <= 0.0 {
                return Err("Z-score threshold must be a positive number".to_string());
            }
        }

        if self.window == Some(0) {
            return Err("Moving-average window must be at least 1".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        // Validate timeout if provided
        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        Ok(())
    }

    /// Returns the log level. `--quiet` wins over `verbose` from either the
    /// command line or the config file.
    pub fn log_level(&self, general: &GeneralConfig) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || general.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
