//! `warden`: host a worker pool or a supervised child from the command line

mod cli;
mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use tracing::warn;
use warden_config::{ConfigLoader, WardenConfig};
use warden_process::registry;

use crate::cli::{Cli, Commands, ConfigCommands};
use crate::commands::pool::PoolOverrides;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let result = run(cli).await;

    let killed = registry::shutdown_all();
    if killed > 0 {
        warn!("Killed {} processes left behind", killed);
    }

    result
}

async fn run(cli: Cli) -> Result<()> {
    let Cli {
        config,
        log_level,
        command,
    } = cli;
    let log_level = log_level.as_deref();

    match command {
        Commands::Config { config_cmd } => {
            warden_logging::init_simple_tracing(log_level.unwrap_or("warn"))?;
            match config_cmd {
                ConfigCommands::Validate { config_file } => commands::config::validate(&config_file),
                ConfigCommands::Generate { output, force } => {
                    commands::config::generate(output, force)
                }
            }
        }
        Commands::Pool {
            program,
            count,
            enhanced,
            max_connections,
            stop_timeout,
            args,
        } => {
            let config = setup(config.as_deref(), log_level)?;
            let overrides = PoolOverrides {
                count,
                enhanced,
                max_connections,
                stop_timeout,
                args,
            };
            commands::pool::run(program, config.pool, overrides).await
        }
        Commands::Child {
            program,
            no_respawn,
            stop_timeout,
            args,
        } => {
            let config = setup(config.as_deref(), log_level)?;
            commands::child::run(program, config.child, no_respawn, stop_timeout, args).await
        }
        Commands::RunOnce {
            program,
            timeout,
            args,
        } => {
            let config = setup(config.as_deref(), log_level)?;
            commands::run_once::run(program, &config.child, timeout, args).await
        }
    }
}

/// Load configuration and initialise logging from `--log-level` or the config
fn setup(path: Option<&Path>, log_level: Option<&str>) -> Result<WardenConfig> {
    let config = ConfigLoader::new()
        .load(path)
        .with_context(|| match path {
            Some(path) => format!("Failed to load configuration from {}", path.display()),
            None => "Failed to load configuration from environment".to_string(),
        })?;

    match log_level {
        Some(level) => warden_logging::init_simple_tracing(level)?,
        None => warden_logging::init_logging_from_config(&config.logging)?,
    }
    Ok(config)
}
