//! Choreo - Main entry point
//!
//! Inspects and normalizes move-set projects, and drives a motion controller
//! over its telemetry link.

mod commands;
mod config;

use anyhow::{Context, Result};
use choreo_core::Rig;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "choreo")]
#[command(about = "Multi-device motion choreography tool")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "choreo.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a project's devices, groups and move sets
    Inspect {
        /// Move-set document (defaults to the configured project)
        project: Option<PathBuf>,
    },
    /// Re-encode a project in canonical form
    Normalize {
        project: Option<PathBuf>,
        /// Write here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Print controller status records as they arrive
    Monitor {
        /// Controller bridge address
        #[arg(short, long)]
        address: Option<String>,
    },
    /// Send a file of commands, waiting for the controller to settle after each
    Run {
        /// One controller command per line
        file: PathBuf,
        #[arg(short, long)]
        address: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Choreo v{}", env!("CARGO_PKG_VERSION"));

    let mut config = config::load_config(&args.config)?;

    match args.command {
        Command::Inspect { project } => {
            let project = project.unwrap_or_else(|| config.project.path.clone());
            let rig = match &config.rig.path {
                Some(path) => Some(
                    Rig::from_file(path)
                        .with_context(|| format!("failed to load rig {}", path.display()))?,
                ),
                None => None,
            };
            commands::inspect(&project, rig.as_ref())?;
        }
        Command::Normalize { project, output } => {
            let project = project.unwrap_or_else(|| config.project.path.clone());
            commands::normalize(&project, output.as_deref())?;
        }
        Command::Monitor { address } => {
            if let Some(address) = address {
                config.link.address = address;
            }
            commands::monitor(&config).await?;
        }
        Command::Run { file, address } => {
            if let Some(address) = address {
                config.link.address = address;
            }
            commands::run(&config, &file).await?;
        }
    }

    Ok(())
}
