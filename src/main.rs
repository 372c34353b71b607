//! InsightCrew - dependency-ordered analysis of tabular business data
//!
//! Loads a dataset, runs the analysis crew and writes a compiled report.
//!
//! Exit codes:
//!   0 - Every work unit completed
//!   1 - Runtime error (config, dataset, cycle, output, etc.)
//!   3 - Report written, but some units failed or were skipped

use anyhow::{Context, Result};
use insightcrew::agent::{InferenceConfig, OllamaInference};
use insightcrew::cli::Args;
use insightcrew::config::{Config, CONFIG_FILE_NAME};
use insightcrew::crew::{
    build_units, execution_order, Dispatcher, InferenceBinding, RunInputs, RunStatus, Scheduler,
    SharedContext, UnitStatus,
};
use insightcrew::{loader, report};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Load configuration first: [general] verbose feeds the log level
    let mut config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    };
    config.merge_with_args(&args);

    // Initialize logging
    init_logging(args.log_level(&config.general));

    info!("InsightCrew v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);
    debug!("Configuration: {:?}", config);

    match run_analysis(args, config).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .insightcrew.toml.
fn handle_init_config() -> Result<()> {
    let path = std::path::Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize thresholds, inference and report layout.");
    Ok(())
}

/// Initialize logging at the given level.
fn init_logging(level: tracing::Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

/// Run the complete analysis. Returns the exit code (0 or 3).
async fn run_analysis(args: Args, config: Config) -> Result<i32> {
    let start_time = Instant::now();

    let units = build_units(args.depth);

    // Handle --dry-run: print the plan and exit
    if args.dry_run {
        return handle_dry_run(&args, units);
    }

    let data_path = args
        .data
        .clone()
        .context("--data is required to run an analysis")?;

    // Step 1: Load the dataset
    println!("📥 Loading dataset: {}", data_path.display());
    let dataset = Arc::new(loader::load_dataset(&data_path)?);
    if dataset.is_empty() {
        warn!("Dataset {} has no usable records", data_path.display());
    }
    println!("   {} records", report::format_count(dataset.len()));

    // Step 2: Wire up the crew
    let inference = if config.inference.enabled {
        println!("🤖 Model commentary enabled");
        println!("   Model: {}", config.inference.model);
        println!("   Ollama: {}", config.inference.ollama_url);
        println!("   Timeout: {}s", config.inference.timeout_seconds);

        let backend = OllamaInference::new(InferenceConfig {
            ollama_url: config.inference.ollama_url.clone(),
            model_name: config.inference.model.clone(),
            temperature: config.inference.temperature,
            timeout_seconds: config.inference.timeout_seconds,
        })?;
        Some(InferenceBinding::new(
            Arc::new(backend),
            Duration::from_secs(config.inference.timeout_seconds),
        ))
    } else {
        None
    };

    let dispatcher =
        Dispatcher::with_default_handlers(dataset.clone(), config.analysis.clone(), inference);

    let output_path = PathBuf::from(&config.general.output);
    let inputs = RunInputs {
        goal: args.goal.clone(),
        dataset_ref: dataset.reference().to_string(),
        depth: args.depth,
        output_target: output_path.display().to_string(),
        output_format: config.report.format,
    };

    // Step 3: Execute the units
    println!("\n🔬 Running {} analysis ({} units)...", args.depth, units.len());
    let execution = Scheduler::new(dispatcher)
        .with_progress(!args.quiet)
        .execute(units, SharedContext::from_inputs(&inputs))
        .await?;

    // Step 4: Compile and save the report
    println!("\n📝 Generating report...");
    let compiled = report::compile(&execution, config.report.format, &config.report);
    report::write_report(&compiled, &output_path)?;

    if let Some(ref dir) = args.sections_dir {
        let written = report::write_unit_outputs(&compiled, dir)?;
        info!("Wrote {} section files to {}", written.len(), dir.display());
    }

    // Print summary
    let duration = start_time.elapsed().as_secs_f64();
    println!("\n📊 Run Summary:");
    for id in &execution.execution_order {
        if let Some(unit) = execution.unit(id) {
            let icon = match unit.status() {
                UnitStatus::Completed => "✅",
                UnitStatus::Failed => "❌",
                UnitStatus::Skipped => "⏭️",
                _ => "•",
            };
            match &unit.error {
                Some(e) => println!("   {} {} ({}): {}", icon, unit.id, unit.status(), e),
                None => println!("   {} {} ({})", icon, unit.id, unit.status()),
            }
        }
    }
    println!("   Duration: {:.1}s", duration);
    println!("\n✅ Report saved to: {}", output_path.display());

    match execution.status {
        RunStatus::Completed => Ok(0),
        RunStatus::Partial => {
            eprintln!("\n⚠️  Run was partial: some units failed or were skipped (exit code 3).");
            Ok(3)
        }
    }
}

/// Handle --dry-run: print the execution order without running anything.
fn handle_dry_run(args: &Args, units: Vec<insightcrew::crew::WorkUnit>) -> Result<i32> {
    println!("\n🔍 Dry run: {} plan (nothing is executed)\n", args.depth);

    let order = execution_order(&units)?;
    for (i, id) in order.iter().enumerate() {
        if let Some(unit) = units.iter().find(|u| &u.id == id) {
            println!("   {}. {} [{}]", i + 1, unit.id, unit.role);
            println!("      {}", unit.description);
            if !unit.dependencies.is_empty() {
                println!("      depends on: {}", unit.dependencies.join(", "));
            }
        }
    }

    println!("\n✅ Dry run complete. {} units would run.", order.len());
    Ok(0)
}

/// Load configuration from file or use defaults.
///
/// Runs before the subscriber is installed, so problems go to stderr.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => Ok(config),
        Ok(None) => Ok(Config::default()),
        Err(e) => {
            eprintln!("⚠️  Failed to load {}: {:#}. Using defaults.", CONFIG_FILE_NAME, e);
            Ok(Config::default())
        }
    }
}
