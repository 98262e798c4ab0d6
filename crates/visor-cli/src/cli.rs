//! Command-line interface definitions and parsing

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "visor", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<String>,

    /// Disable the wireless transport
    #[arg(long)]
    pub no_wireless: bool,

    /// Disable the process bus transport
    #[arg(long)]
    pub no_bus: bool,

    /// Disable the cloud transport
    #[arg(long)]
    pub no_cloud: bool,

    /// Data directory for token, catalog, and pid files
    #[arg(short, long)]
    pub data_dir: Option<String>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the routing core with an interactive console on stdin
    Run {
        /// Serve the manager over an in-process link instead of the BLE radio
        #[arg(long)]
        loopback: bool,

        /// Bring up the simulated wearable at startup
        #[arg(long)]
        virtual_wearable: bool,

        /// Start with the companion app considered foregrounded
        #[arg(long)]
        foreground: bool,
    },
    /// Run headless, without reading commands from stdin
    Serve {
        /// Serve the manager over an in-process link instead of the BLE radio
        #[arg(long)]
        loopback: bool,

        /// Bring up the simulated wearable at startup
        #[arg(long)]
        virtual_wearable: bool,

        /// Start with the companion app considered foregrounded
        #[arg(long)]
        foreground: bool,
    },
    /// List installed edge apps and exit
    Apps,
    /// Store an auth token and exit
    SetToken {
        /// The token the cloud backend issued for this device
        token: String,
    },
    /// Print a status snapshot and exit
    Status,
}
