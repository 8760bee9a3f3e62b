//! ParkStream CLI - Command-line client for the parking vehicle event stream.
//!
//! Watches the live stream of vehicle entries and exits from the terminal,
//! and helps troubleshoot which WebSocket address the backend answers on.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use park_core::config::{AppConfig, ConfigHandle};
use park_core::constants;
use park_core::error::ParkResult;
use park_core::logging;

/// ParkStream - real-time vehicle entry/exit events for smart parking yards.
#[derive(Parser)]
#[command(
    name = "parkstream",
    version,
    about = "Parking vehicle event stream client",
    long_about = "A command-line client for the parking backend's vehicle event stream.\n\
                  Connects over WebSocket, prints vehicle entries and exits as they happen,\n\
                  and diagnoses which endpoint the backend is reachable on."
)]
struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output format (text, json).
    #[arg(short = 'f', long, global = true, default_value = "text")]
    format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    Text,
    /// JSON output for scripting.
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the event stream and print events until Ctrl+C.
    Watch {
        /// Backend base URL (overrides config).
        #[arg(short, long)]
        url: Option<String>,
        /// Number of recent records to print when the stream stops.
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
    /// Probe every candidate endpoint and report which ones answer.
    Diagnose,
    /// List candidate endpoints in resolution order.
    Candidates,
    /// Show the effective configuration.
    Config {
        /// Write the effective configuration to the config file.
        #[arg(long)]
        save: bool,
    },
}

#[tokio::main]
async fn main() -> ParkResult<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = match cli.config.as_deref() {
        Some(path) => PathBuf::from(path),
        None => AppConfig::default_config_path()?,
    };
    let config = if cli.config.is_some() {
        let mut config = if config_path.exists() {
            AppConfig::load_from_file(&config_path)?
        } else {
            AppConfig::default()
        };
        config.apply_env_overrides();
        config
    } else {
        AppConfig::load_default()?
    };

    // Initialize logging
    let mut log_config = config.logging.clone();
    if cli.verbose {
        log_config.level = "debug".to_string();
    }
    let log_dir = config
        .effective_log_dir()
        .unwrap_or_else(|_| PathBuf::from("logs"));
    let _guard = logging::init_from_config(&log_config, &log_dir)?;

    info!("{} CLI v{}", constants::APP_NAME, constants::APP_VERSION);

    let config_handle = ConfigHandle::new(config);

    // Dispatch to command handlers
    match cli.command {
        Commands::Watch { url, limit } => {
            commands::watch::run(config_handle, url, limit, cli.format).await
        }
        Commands::Diagnose => commands::diagnose::run(config_handle, cli.format).await,
        Commands::Candidates => commands::candidates::run(config_handle, cli.format).await,
        Commands::Config { save } => {
            commands::config::run(config_handle, &config_path, save, cli.format).await
        }
    }
}
