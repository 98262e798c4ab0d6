//! Command dispatch
//!
//! Maps parsed CLI subcommands onto the host application. `run` and
//! `serve` bring up the full runtime; the rest are one-shot maintenance
//! commands that touch the platform files or ask the router one question
//! and exit.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};
use visor_core::auth::AuthState;
use visor_core::device::DeviceLinkStatus;
use visor_core::protocol::CoreStatus;
use visor_core::{AppEvent, Command};
use visor_runtime::{AppScanner, TokenStore};

use crate::app::{TransportSelection, VisorApp};
use crate::cli::{Cli, Commands};
use crate::config::AppConfig;
use crate::error::{CliError, Result};
use crate::platform::{DirectoryAppScanner, FileTokenStore};

const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Dispatcher
// ----------------------------------------------------------------------------

pub struct CommandDispatcher;

impl CommandDispatcher {
    pub async fn execute(cli: Cli, config: AppConfig) -> Result<()> {
        let base = TransportSelection {
            wireless: !cli.no_wireless,
            bus: !cli.no_bus,
            cloud: !cli.no_cloud,
            loopback: false,
        };

        match cli.command {
            Commands::Run {
                loopback,
                virtual_wearable,
                foreground,
            } => {
                let selection = TransportSelection { loopback, ..base };
                Self::run_core(config, selection, virtual_wearable, foreground, true).await
            }
            Commands::Serve {
                loopback,
                virtual_wearable,
                foreground,
            } => {
                let selection = TransportSelection { loopback, ..base };
                Self::run_core(config, selection, virtual_wearable, foreground, false).await
            }
            Commands::Apps => Self::list_apps(&config),
            Commands::SetToken { token } => Self::store_token(&config, &token),
            Commands::Status => Self::report_status(config).await,
        }
    }

    async fn run_core(
        config: AppConfig,
        selection: TransportSelection,
        virtual_wearable: bool,
        foreground: bool,
        console: bool,
    ) -> Result<()> {
        if selection.is_empty() {
            warn!("All transports are disabled; serving commands only");
        }

        let mut app = VisorApp::new(config)?;
        app.set_initial_foreground(foreground);
        app.set_virtual_wearable(virtual_wearable);
        app.register_transports(selection)?;
        app.start().await?;
        info!("Visor core is up");
        app.run(console).await
    }

    fn list_apps(config: &AppConfig) -> Result<()> {
        let scanner = DirectoryAppScanner::new(config.host.apps_dir.clone());
        let apps = scanner.installed_apps()?;
        if apps.is_empty() {
            println!("No edge apps under {}", config.host.apps_dir.display());
            return Ok(());
        }
        for app in apps {
            match app.descriptor {
                Some(descriptor) => {
                    println!("{}  {} v{}", app.package, descriptor.name, descriptor.version)
                }
                None => println!("{}  (unreadable manifest)", app.package),
            }
        }
        Ok(())
    }

    fn store_token(config: &AppConfig, token: &str) -> Result<()> {
        let path = config.state_dir()?.join("auth.json");
        let mut state = AuthState::new();
        state.set_token(token.to_string(), None);
        FileTokenStore::new(path.clone()).save(&state)?;
        println!("Token stored in {}", path.display());
        Ok(())
    }

    /// Ask the router for one status snapshot and print it
    ///
    /// The runtime runs without any transports here; the status command
    /// only needs the command surface.
    async fn report_status(config: AppConfig) -> Result<()> {
        let mut app = VisorApp::new(config)?;
        app.start().await?;
        let commands = app.command_sender()?;
        let mut events = app.take_app_event_receiver()?;
        commands
            .send(Command::RequestStatus)
            .await
            .map_err(|_| CliError::Console("Router is gone".to_string()))?;

        let status = timeout(STATUS_TIMEOUT, async {
            loop {
                match events.recv().await {
                    Some(AppEvent::StatusReport { status }) => break Some(status),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .map_err(|_| CliError::Console("Timed out waiting for a status report".to_string()))?
        .ok_or_else(|| CliError::Console("Router exited before reporting".to_string()))?;

        print_status(&status);
        app.stop().await
    }
}

// ----------------------------------------------------------------------------
// Status Printing
// ----------------------------------------------------------------------------

pub(crate) fn print_status(status: &CoreStatus) {
    let cloud = if status.cloud_connected {
        "connected"
    } else {
        "disconnected"
    };
    let foreground = if status.foreground_active {
        "active"
    } else {
        "inactive"
    };
    println!("cloud:      {}", cloud);
    println!("auth:       {}", status.auth);
    println!("wearable:   {}", describe_wearable(&status.wearable));
    println!("foreground: {}", foreground);
    if status.apps.is_empty() {
        println!("apps:       none");
    } else {
        println!("apps:");
        for app in &status.apps {
            let marker = if app.is_running { "*" } else { " " };
            println!("  {} {}  {} v{}", marker, app.package, app.name, app.version);
        }
    }
}

fn describe_wearable(status: &DeviceLinkStatus) -> String {
    match status {
        DeviceLinkStatus::Disconnected => "disconnected".to_string(),
        DeviceLinkStatus::Connecting => "connecting".to_string(),
        DeviceLinkStatus::Connected { kind } => format!("connected ({})", kind),
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use visor_core::device::DeviceKind;

    #[test]
    fn test_wearable_descriptions() {
        assert_eq!(describe_wearable(&DeviceLinkStatus::Disconnected), "disconnected");
        assert_eq!(describe_wearable(&DeviceLinkStatus::Connecting), "connecting");
        assert_eq!(
            describe_wearable(&DeviceLinkStatus::Connected {
                kind: DeviceKind::AudioGlasses,
            }),
            "connected (audio_glasses)"
        );
    }
}
