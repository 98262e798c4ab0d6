//! Host application
//!
//! Owns a `VisorRuntime` wired to the real transports and the file-backed
//! platform services, and drives it from a terminal: app events print as
//! observations, console lines become router commands, and the loopback
//! handset link (when selected) is exposed through the `phone` verb.

use std::sync::Arc;

use tracing::{info, warn};
use visor_ble::{LoopbackHandle, WirelessTransportTask};
use visor_bus::BusTransportTask;
use visor_cloud::CloudTransportTask;
use visor_core::device::{DeviceKind, DeviceLinkStatus};
use visor_core::{AppEvent, ChunkReassembler, Command, TransportTask};
use visor_runtime::{AppEventReceiver, CommandSender, PlatformServices, VisorRuntime};

use crate::config::AppConfig;
use crate::console::{self, ConsoleAction};
use crate::error::{CliError, Result};
use crate::platform::{
    DirectoryAppScanner, FileCatalogStore, FileTokenStore, PidFileProcessInspector,
};

// ----------------------------------------------------------------------------
// Transport Selection
// ----------------------------------------------------------------------------

/// Which transports to register on the runtime
#[derive(Debug, Clone, Copy, Default)]
pub struct TransportSelection {
    pub wireless: bool,
    pub bus: bool,
    pub cloud: bool,
    /// Replace the radio with the in-process loopback link
    pub loopback: bool,
}

impl TransportSelection {
    pub fn is_empty(&self) -> bool {
        !self.wireless && !self.bus && !self.cloud
    }
}

// ----------------------------------------------------------------------------
// Visor App
// ----------------------------------------------------------------------------

/// The embedding application around the routing core
pub struct VisorApp {
    runtime: VisorRuntime,
    config: AppConfig,
    phone: Option<LoopbackHandle>,
    virtual_wearable: bool,
}

impl VisorApp {
    /// Build the runtime over file-backed platform services
    pub fn new(config: AppConfig) -> Result<Self> {
        let state_dir = config.state_dir()?;
        let platform = PlatformServices::new(
            Arc::new(DirectoryAppScanner::new(config.host.apps_dir.clone())),
            Arc::new(PidFileProcessInspector::new(state_dir.join("run"))),
            Arc::new(FileTokenStore::new(state_dir.join("auth.json"))),
            Arc::new(FileCatalogStore::new(state_dir.join("catalog.json"))),
        );
        let runtime = VisorRuntime::new(config.core.clone(), platform)?;
        Ok(Self {
            runtime,
            config,
            phone: None,
            virtual_wearable: false,
        })
    }

    /// Start with the companion app considered foregrounded
    pub fn set_initial_foreground(&mut self, active: bool) {
        self.runtime.set_initial_foreground(active);
    }

    /// Report a simulated wearable right after start
    pub fn set_virtual_wearable(&mut self, enabled: bool) {
        self.virtual_wearable = enabled;
    }

    /// Register the selected transports; must happen before `start`
    pub fn register_transports(&mut self, selection: TransportSelection) -> Result<()> {
        if selection.wireless {
            if selection.loopback {
                let (task, handle) =
                    WirelessTransportTask::loopback(self.config.core.wireless.clone());
                self.phone = Some(handle);
                self.add(task)?;
            } else {
                self.add(WirelessTransportTask::new(self.config.core.wireless.clone()))?;
            }
        }
        if selection.bus {
            self.add(BusTransportTask::new(self.config.core.bus.clone()))?;
        }
        if selection.cloud {
            let mut task = CloudTransportTask::new(self.config.core.cloud.clone());
            match self.runtime.take_audio_receiver() {
                Some(audio) => task.attach_audio(audio),
                None => warn!("Microphone stream already claimed; cloud audio disabled"),
            }
            self.add(task)?;
        }
        Ok(())
    }

    fn add<T: TransportTask + 'static>(&mut self, task: T) -> Result<()> {
        self.runtime
            .add_transport(task)
            .map_err(|e| CliError::TransportInit(e.to_string()))
    }

    /// Start the router and transports
    pub async fn start(&mut self) -> Result<()> {
        self.runtime.start().await?;
        if self.virtual_wearable {
            self.command_sender()?
                .send(Command::EnableVirtualWearable { enabled: true })
                .await
                .map_err(|_| CliError::Console("Router is gone".to_string()))?;
        }
        Ok(())
    }

    /// Stop the router and transports
    pub async fn stop(&mut self) -> Result<()> {
        self.runtime.stop().await?;
        Ok(())
    }

    /// A handle for sending commands; fails before `start`
    pub fn command_sender(&self) -> Result<CommandSender> {
        self.runtime
            .command_sender()
            .cloned()
            .ok_or_else(|| CliError::Console("Runtime is not running".to_string()))
    }

    /// Claim the app event stream; fails if already claimed
    pub fn take_app_event_receiver(&mut self) -> Result<AppEventReceiver> {
        self.runtime
            .take_app_event_receiver()
            .ok_or_else(|| CliError::Console("App event stream already claimed".to_string()))
    }

    /// Drive the app until shutdown
    ///
    /// With `console` set, stdin lines are parsed as commands; without it
    /// the loop only prints observations and waits for a signal.
    pub async fn run(&mut self, console: bool) -> Result<()> {
        let commands = self.command_sender()?;
        let mut app_events = self.take_app_event_receiver()?;
        let mut phone = self.phone.take();
        let mut phone_frames = ChunkReassembler::new(self.config.core.wireless.max_message_size);
        let mut console_lines = if console {
            Some(console::spawn_reader(self.config.cli.prompt.clone()))
        } else {
            None
        };

        loop {
            tokio::select! {
                event = app_events.recv() => {
                    match event {
                        Some(event) => self.handle_app_event(event, &commands).await?,
                        None => {
                            info!("Router closed the app event stream");
                            break;
                        }
                    }
                }
                line = console::next_line(&mut console_lines) => {
                    match line {
                        Some(raw) => {
                            match console::parse_line(&raw) {
                                Some(ConsoleAction::Quit) => {
                                    let _ = commands.send(Command::Shutdown).await;
                                    break;
                                }
                                Some(action) => {
                                    self.dispatch_console(action, &commands, &phone).await?;
                                }
                                None if raw.trim().is_empty() => {}
                                None => println!("Unknown command; try `help`"),
                            }
                        }
                        None => {
                            // Stdin closed; keep serving without a console.
                            console_lines = None;
                        }
                    }
                }
                frame = next_phone_frame(&mut phone) => {
                    match frame {
                        Some(frame) => print_phone_frame(&mut phone_frames, &frame),
                        None => phone = None,
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    let _ = commands.send(Command::Shutdown).await;
                    break;
                }
            }
        }

        self.stop().await
    }

    async fn dispatch_console(
        &self,
        action: ConsoleAction,
        commands: &CommandSender,
        phone: &Option<LoopbackHandle>,
    ) -> Result<()> {
        match action {
            ConsoleAction::Send(command) => commands
                .send(command)
                .await
                .map_err(|_| CliError::Console("Router is gone".to_string()))?,
            ConsoleAction::Phone(raw) => match phone {
                Some(handle) => {
                    if !handle.write(raw.as_bytes()).await {
                        println!("Loopback handset link is down");
                    }
                }
                None => println!("No loopback handset link; run with --loopback"),
            },
            ConsoleAction::Help => println!("{}", console::HELP),
            ConsoleAction::Quit => {}
        }
        Ok(())
    }

    async fn handle_app_event(&self, event: AppEvent, commands: &CommandSender) -> Result<()> {
        match event {
            AppEvent::WearableLinkRequested { connect } => {
                // The embedder owns the actual device link. With a virtual
                // wearable we can answer immediately; otherwise the operator
                // answers through the console.
                if self.virtual_wearable {
                    let status = if connect {
                        DeviceLinkStatus::Connected {
                            kind: DeviceKind::Virtual,
                        }
                    } else {
                        DeviceLinkStatus::Disconnected
                    };
                    commands
                        .send(Command::SetDeviceLink { status })
                        .await
                        .map_err(|_| CliError::Console("Router is gone".to_string()))?;
                } else {
                    let verb = if connect { "wearable on" } else { "wearable off" };
                    println!("[core] wearable link requested; answer with `{}`", verb);
                }
            }
            AppEvent::Transcript {
                text,
                language,
                is_final,
            } => {
                if self.config.cli.show_transcripts {
                    let kind = if is_final { "final" } else { "interim" };
                    match language {
                        Some(language) => println!("[speech {} {}] {}", kind, language, text),
                        None => println!("[speech {}] {}", kind, text),
                    }
                }
            }
            AppEvent::DisplayRequested { sender, request } => {
                let from = sender
                    .map(|package| package.to_string())
                    .unwrap_or_else(|| "cloud".to_string());
                println!("[display {} from {}] {}", request.view, from, request.layout);
            }
            AppEvent::DisplayReleased { package } => {
                println!("[display] released by {}", package);
            }
            AppEvent::AppStarted { package } => println!("[apps] started {}", package),
            AppEvent::AppStopped { package } => println!("[apps] stopped {}", package),
            AppEvent::CatalogUpdated { apps } => {
                println!("[apps] catalog rebuilt with {} apps", apps.len());
            }
            AppEvent::StatusReport { status } => crate::commands::print_status(&status),
            AppEvent::WearableConnected { kind } => println!("[wearable] connected: {}", kind),
            AppEvent::WearableDisconnected => println!("[wearable] disconnected"),
            AppEvent::CloudSessionChanged { connected } => {
                let state = if connected { "up" } else { "down" };
                println!("[cloud] session {}", state);
            }
            AppEvent::MicrophoneStateChanged { enabled } => {
                let state = if enabled { "on" } else { "off" };
                println!("[mic] {}", state);
            }
            AppEvent::ErrorOccurred { error } => warn!("Core reported: {}", error),
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Loopback Handset Helpers
// ----------------------------------------------------------------------------

/// Await the next notification frame, pending forever without a link
async fn next_phone_frame(phone: &mut Option<LoopbackHandle>) -> Option<Vec<u8>> {
    match phone {
        Some(handle) => handle.next_notification().await,
        None => std::future::pending().await,
    }
}

/// Reassemble chunked notification frames and print complete messages
fn print_phone_frame(reassembler: &mut ChunkReassembler, frame: &[u8]) {
    match reassembler.accept(frame) {
        Ok(Some(message)) => println!("[phone] {}", String::from_utf8_lossy(&message)),
        Ok(None) => {}
        Err(e) => {
            warn!("Dropping malformed notification frame: {}", e);
            reassembler.reset();
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use visor_core::chunking::chunk_message;
    use visor_core::VisorConfig;

    fn test_config(root: &std::path::Path) -> AppConfig {
        let mut config = AppConfig::default();
        config.core = VisorConfig::testing();
        config.host.apps_dir = root.join("apps");
        config.host.state_dir = Some(root.join("state"));
        config
    }

    #[tokio::test]
    async fn test_app_starts_and_stops_without_transports() {
        let dir = tempdir().unwrap();
        let mut app = VisorApp::new(test_config(dir.path())).unwrap();

        assert!(app.command_sender().is_err());
        app.start().await.unwrap();
        assert!(app.command_sender().is_ok());
        app.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_loopback_selection_keeps_the_phone_handle() {
        let dir = tempdir().unwrap();
        let mut app = VisorApp::new(test_config(dir.path())).unwrap();
        app.register_transports(TransportSelection {
            wireless: true,
            loopback: true,
            ..Default::default()
        })
        .unwrap();
        assert!(app.phone.is_some());
    }

    #[tokio::test]
    async fn test_status_report_round_trip() {
        let dir = tempdir().unwrap();
        let mut app = VisorApp::new(test_config(dir.path())).unwrap();
        app.start().await.unwrap();

        let commands = app.command_sender().unwrap();
        let mut events = app.take_app_event_receiver().unwrap();
        commands.send(Command::RequestStatus).await.unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                match events.recv().await {
                    Some(AppEvent::StatusReport { status }) => break Some(status),
                    Some(_) => continue,
                    None => break None,
                }
            }
        })
        .await
        .expect("timed out waiting for status")
        .expect("app event stream closed");

        assert!(!event.cloud_connected);
        app.stop().await.unwrap();
    }

    #[test]
    fn test_phone_frames_reassemble_before_printing() {
        let mut reassembler = ChunkReassembler::new(4096);
        let chunks = chunk_message(br#"{"type":"ping","body":"hello there"}"#, 23).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            print_phone_frame(&mut reassembler, chunk);
        }
        assert!(!reassembler.in_progress());
    }

    #[test]
    fn test_empty_selection_is_detected() {
        assert!(TransportSelection::default().is_empty());
        assert!(!TransportSelection {
            bus: true,
            ..Default::default()
        }
        .is_empty());
    }
}
