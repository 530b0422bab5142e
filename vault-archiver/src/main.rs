//! Vault Archiver - Main entry point

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use vault_archiver::{config, utils, BackupExecutor, Config};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log every retention eviction
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Archives kept per vault (overrides config)
    #[arg(short, long)]
    retention: Option<usize>,

    /// Write a default configuration file and exit
    #[arg(long)]
    init: bool,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let config_path = match args.config {
        Some(path) => path,
        None => config::default_config_path()?,
    };

    // First run: hand the user a config to edit instead of archiving anything
    if args.init || !config_path.exists() {
        utils::logger::init(args.log_level.as_deref().unwrap_or("info"))?;
        Config::default()
            .write_new(&config_path)
            .with_context(|| format!("failed to create config at {}", config_path.display()))?;
        tracing::info!(
            "Config created at {}, make any necessary changes and run again",
            config_path.display()
        );
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::from_file(&config_path)?;

    // Initialize logging
    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting vault-archiver v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    config.verbose |= args.verbose;
    if let Some(retention) = args.retention {
        config.retention = retention;
    }

    let settings = config.resolve()?;
    let executor = BackupExecutor::from_settings(&settings);
    let summary = executor.execute(settings.jobs).await;
    summary.log();

    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
