//! Visor CLI library
//!
//! The reference host for the visor routing core on a Linux machine. It
//! assembles the runtime with the real transports (BLE peripheral, process
//! bus, cloud session) over file-backed platform services, and drives the
//! whole thing from a line console.
//!
//! The binary in `main.rs` is a thin wrapper; embedders wanting a different
//! surface can reuse [`VisorApp`] and the platform implementations here.

pub mod app;
pub mod cli;
pub mod commands;
pub mod config;
pub mod console;
pub mod error;
pub mod platform;

pub use app::{TransportSelection, VisorApp};
pub use cli::{Cli, Commands};
pub use config::AppConfig;
pub use error::{CliError, Result};
pub use platform::{
    DirectoryAppScanner, FileCatalogStore, FileTokenStore, PidFileProcessInspector,
};

// Re-export commonly used types
pub use visor_core::{AppEvent, Command, VisorConfig};
pub use visor_runtime::{PlatformServices, VisorRuntime};
