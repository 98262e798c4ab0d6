//! Visor host binary
//!
//! Parses the command line, loads configuration, and hands off to the
//! command dispatcher. Everything interesting lives in the library.

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use visor_cli::commands::CommandDispatcher;
use visor_cli::{AppConfig, Cli, Result};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let mut config = match &cli.config {
        Some(path) => match AppConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration from {}: {}", path, e);
                std::process::exit(1);
            }
        },
        None => match AppConfig::load_default() {
            Ok(config) => config,
            Err(e) => {
                error!("Failed to load configuration: {}", e);
                std::process::exit(1);
            }
        },
    };

    if let Some(data_dir) = &cli.data_dir {
        config.host.state_dir = Some(PathBuf::from(data_dir));
    }

    if let Err(e) = CommandDispatcher::execute(cli, config).await {
        error!("Command failed: {}", e);
        std::process::exit(1);
    }

    info!("Visor host exiting");
    Ok(())
}

fn setup_logging(verbose: bool) {
    let level = if verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();
}
