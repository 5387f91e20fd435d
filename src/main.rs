use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use patchgen::logging::{init_logging, resolve_log_file, LoggingOptions};
use patchgen::metrics::METRICS;
use patchgen::pipeline::resolve_output_root;
use patchgen::telemetry::{log_gpu_overview, PeriodicGpuMonitor};
use patchgen::{create_model, run_pipeline, CliOverrides, MethodRegistry, PipelineConfig};
use std::path::PathBuf;
use tracing::{debug, info, warn};

#[derive(Parser)]
#[command(name = "patchgen")]
#[command(version, about = "Dataset-driven code generation pipeline")]
struct Cli {
    #[command(flatten)]
    overrides: CliOverrides,

    /// TOML configuration file, applied below environment variables and flags
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print the available prompting methods and exit
    #[arg(long)]
    list_methods: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let registry = MethodRegistry::with_defaults();

    if cli.list_methods {
        for method in registry.available() {
            println!("{}", method);
        }
        return Ok(());
    }

    let dotenv = dotenvy::dotenv();

    let base = match cli.config {
        Some(ref path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => PipelineConfig::default(),
    };
    let config = base.from_env().apply_cli(&cli.overrides);

    if let Some(ref devices) = config.visible_devices {
        std::env::set_var("CUDA_VISIBLE_DEVICES", devices);
    }

    let dataset_path = config.validate(&registry)?;
    let method = config.method.trim().to_string();
    let output_root = resolve_output_root(
        &dataset_path,
        config.output_path.as_deref(),
        &config.model,
        &method,
        Local::now(),
    )
    .context("Failed to prepare output directory")?;

    let log_file = resolve_log_file(&config, &output_root, Local::now().date_naive());
    let _log_guard = init_logging(&LoggingOptions::from_config(&config, Some(log_file)));

    match dotenv {
        Ok(path) => debug!("Loaded environment from {}", path.display()),
        Err(e) if e.not_found() => {}
        Err(e) => warn!("Ignoring .env: {}", e),
    }
    if let Some(ref devices) = config.visible_devices {
        info!("Applied CUDA_VISIBLE_DEVICES={}", devices);
    }

    let model = create_model(&config.model, &config.llm)?;
    let limits = model.token_limits();

    info!("Dataset: {}", dataset_path.display());
    info!("Method: {}", method);
    info!("Model: {}", config.model);
    info!(
        "Token limits - input: {}, output: {}",
        limits.input_tokens, limits.output_tokens
    );
    info!("Output: {}", output_root.display());
    if let Ok(job) = std::env::var("SLURM_JOB_ID") {
        info!("SLURM_JOB_ID: {}", job);
    }
    if let Ok(devices) = std::env::var("CUDA_VISIBLE_DEVICES") {
        info!("CUDA_VISIBLE_DEVICES: {}", devices);
    }

    log_gpu_overview().await;
    let mut monitor = PeriodicGpuMonitor::new(config.gpu_monitor_interval(), config.gpu_monitor);
    monitor.start();

    let result = run_pipeline(&config, &registry, model, &dataset_path, &output_root).await;

    log_gpu_overview().await;
    monitor.stop().await;

    let summary = result?;
    info!(
        "{} rows succeeded, {} failed",
        summary.succeeded, summary.failed
    );
    debug!("Run metrics:\n{}", METRICS.export_prometheus());

    Ok(())
}
