//! Router Task Implementation
//!
//! Contains the main Router struct and its coordination loop.

use std::collections::BTreeSet;

use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use visor_core::channel::{AppEventSender, CommandReceiver, EffectSender, EventReceiver};
use visor_core::config::SharedVisorConfig;
use visor_core::{AppEvent, Command, Effect, Event, PackageId, VisorError, VisorResult};

use super::handlers::RouterHandlers;
use super::state::{RouterState, RouterStats};
use crate::platform::PlatformServices;

// ----------------------------------------------------------------------------
// Router Task
// ----------------------------------------------------------------------------

/// The router task that processes all commands and events
///
/// All mutable state lives in [`RouterState`] and is touched only from this
/// task, so the shared pieces the rest of the system cares about (the
/// believed-running set, the cloud session flag, the reassembly buffers in
/// the transports) each have exactly one writer.
pub struct Router {
    /// Router application state
    state: RouterState,
    /// Channel for receiving commands from the embedder
    command_receiver: CommandReceiver,
    /// Channel for receiving events from transport tasks
    event_receiver: EventReceiver,
    /// Channel for sending effects to transport tasks
    effect_sender: EffectSender,
    /// Channel for sending app events to the embedder
    app_event_sender: AppEventSender,
    /// Whether the event channel still has senders
    events_open: bool,
    /// Whether the task should continue running
    running: bool,
}

impl Router {
    /// Create a new router task
    pub fn new(
        config: SharedVisorConfig,
        platform: PlatformServices,
        initial_foreground: bool,
        command_receiver: CommandReceiver,
        event_receiver: EventReceiver,
        effect_sender: EffectSender,
        app_event_sender: AppEventSender,
    ) -> Self {
        let state = RouterState::new(config, platform, initial_foreground);
        Self {
            state,
            command_receiver,
            event_receiver,
            effect_sender,
            app_event_sender,
            events_open: true,
            running: true,
        }
    }

    /// Run the main router loop
    pub async fn run(&mut self) -> VisorResult<()> {
        info!("Router starting");

        if self.state.config.lifecycle.discover_on_start {
            if let Err(e) = self.startup_discovery().await {
                self.handle_processing_error(e, "startup discovery");
            }
        }
        if self.running {
            // Construction is not a transition, so an initially-desired
            // session is opened explicitly here.
            match RouterHandlers::handle_startup(&mut self.state) {
                Ok(output) => self.dispatch(output).await?,
                Err(e) => self.handle_processing_error(e, "startup"),
            }
        }

        let mut reconcile =
            tokio::time::interval(self.state.config.lifecycle.reconcile_interval);
        reconcile.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires immediately; swallow it so the first pass
        // lands one full interval after startup.
        reconcile.tick().await;

        while self.running {
            tokio::select! {
                command = self.command_receiver.recv() => {
                    match command {
                        Some(command) => {
                            if let Err(e) = self.process_command(command).await {
                                self.handle_processing_error(e, "command");
                            }
                        }
                        None => {
                            info!("Command channel closed, shutting down");
                            break;
                        }
                    }
                }

                event = self.event_receiver.recv(), if self.events_open => {
                    match event {
                        Some(event) => {
                            if let Err(e) = self.process_event(event).await {
                                self.handle_processing_error(e, "event");
                            }
                        }
                        None => {
                            // Guarded out of the select from here on; the
                            // router keeps serving commands.
                            info!("Event channel closed");
                            self.events_open = false;
                        }
                    }
                }

                _ = reconcile.tick() => {
                    if let Err(e) = self.run_reconciliation().await {
                        self.handle_processing_error(e, "reconciliation");
                    }
                }
            }
        }

        info!("Router stopped");
        Ok(())
    }

    /// Stop the router task
    pub fn stop(&mut self) {
        self.running = false;
    }

    /// Triage a processing error: channel and configuration failures kill
    /// the task, everything else is logged and survived
    fn handle_processing_error(&mut self, e: VisorError, context: &str) {
        match e {
            VisorError::Channel { .. } | VisorError::Configuration { .. } => {
                error!(
                    "Unrecoverable error processing {}, shutting down router: {}",
                    context, e
                );
                self.running = false;
            }
            VisorError::Registry(_) | VisorError::Auth(_) | VisorError::InvalidCommand { .. } => {
                warn!("Dropping {} after error: {}", context, e);
            }
            _ => {
                error!("Error processing {}: {}", context, e);
            }
        }
    }

    /// Process a command from the embedder
    async fn process_command(&mut self, command: Command) -> VisorResult<()> {
        self.state.stats.commands_processed += 1;

        let output = match command {
            Command::StartApp { package } => {
                RouterHandlers::handle_start_app(&mut self.state, package)?
            }
            Command::StopApp { package } => {
                RouterHandlers::handle_stop_app(&mut self.state, package)?
            }
            Command::RunDiscovery => RouterHandlers::handle_run_discovery(&mut self.state)?,
            Command::ConnectWearable => RouterHandlers::handle_connect_wearable()?,
            Command::DisconnectWearable => RouterHandlers::handle_disconnect_wearable()?,
            Command::EnableVirtualWearable { enabled } => {
                RouterHandlers::handle_enable_virtual_wearable(&mut self.state, enabled)?
            }
            Command::SetForeground { active } => {
                RouterHandlers::handle_set_foreground(&mut self.state, active)?
            }
            Command::SetDeviceLink { status } => {
                RouterHandlers::handle_set_device_link(&mut self.state, status)?
            }
            Command::RequestStatus => RouterHandlers::handle_request_status(&mut self.state)?,
            Command::SetAuthToken { token } => {
                RouterHandlers::handle_set_auth_token(&mut self.state, token, None)?
            }
            Command::VerifyAuthToken => RouterHandlers::handle_verify_auth_token(&mut self.state)?,
            Command::DeleteAuthToken => RouterHandlers::handle_delete_auth_token(&mut self.state)?,
            Command::UpdateAppSettings { package, settings } => {
                RouterHandlers::handle_update_app_settings(&mut self.state, package, settings)?
            }
            Command::PhoneNotification { notification } => {
                RouterHandlers::handle_phone_notification(&mut self.state, notification)?
            }
            Command::ButtonPressed { button, press } => {
                RouterHandlers::handle_button_pressed(&mut self.state, button, press)?
            }
            Command::HeadPositionChanged { position } => {
                RouterHandlers::handle_head_position(&mut self.state, position)?
            }
            Command::BatteryChanged {
                level,
                charging,
                time_remaining_minutes,
            } => RouterHandlers::handle_battery_changed(
                &mut self.state,
                level,
                charging,
                time_remaining_minutes,
            )?,
            Command::LocationChanged { lat, lng } => {
                RouterHandlers::handle_location_changed(&mut self.state, lat, lng)?
            }
            Command::SpeakingStateChanged { speaking } => {
                RouterHandlers::handle_speaking_state(&mut self.state, speaking)?
            }
            Command::Shutdown => {
                self.running = false;
                RouterHandlers::handle_shutdown()?
            }
        };

        self.dispatch(output).await
    }

    /// Process an event from a transport task
    async fn process_event(&mut self, event: Event) -> VisorResult<()> {
        self.state.stats.events_processed += 1;

        let output = match event {
            Event::CentralConnected { central } => {
                RouterHandlers::handle_central_connected(&mut self.state, central)?
            }
            Event::CentralDisconnected { central } => {
                RouterHandlers::handle_central_disconnected(&mut self.state, central)?
            }
            Event::WirelessMessage { central, payload } => {
                RouterHandlers::handle_wireless_message(&mut self.state, central, payload)?
            }
            Event::WirelessLinkState { available } => {
                RouterHandlers::handle_wireless_link_state(&mut self.state, available)?
            }
            Event::PairingDenied { reason } => RouterHandlers::handle_pairing_denied(reason)?,
            Event::BusEnvelope { envelope } => {
                RouterHandlers::handle_bus_envelope(&mut self.state, envelope)?
            }
            Event::CloudOpened => RouterHandlers::handle_cloud_opened(&mut self.state)?,
            Event::CloudClosed { reason } => {
                RouterHandlers::handle_cloud_closed(&mut self.state, reason)?
            }
            Event::CloudMessage { message } => {
                RouterHandlers::handle_cloud_message(&mut self.state, message)?
            }
            Event::CloudFailure { reason } => {
                RouterHandlers::handle_cloud_failure(&mut self.state, reason)?
            }
            Event::TransportStatusChanged { channel, status } => {
                RouterHandlers::handle_transport_status(channel, status)?
            }
        };

        self.dispatch(output).await
    }

    /// Run one reconciliation pass against the live process list
    async fn run_reconciliation(&mut self) -> VisorResult<()> {
        let alive: BTreeSet<PackageId> = match self.state.platform.inspector.running_packages() {
            Ok(packages) => packages.into_iter().collect(),
            Err(e) => {
                // Skipped, not failed: a blind pass must not forget apps.
                warn!("Process inspection failed; skipping reconciliation: {}", e);
                return Ok(());
            }
        };

        let output = RouterHandlers::handle_reconcile(&mut self.state, alive)?;
        self.dispatch(output).await
    }

    /// Discovery once at startup, tolerating a platform that is not ready
    async fn startup_discovery(&mut self) -> VisorResult<()> {
        let output = RouterHandlers::handle_run_discovery(&mut self.state)?;
        self.dispatch(output).await
    }

    /// Deliver a handler's output to the transports and the embedder
    async fn dispatch(&mut self, output: (Vec<Effect>, Vec<AppEvent>)) -> VisorResult<()> {
        let (effects, app_events) = output;
        for effect in effects {
            self.send_effect(effect)?;
        }
        for app_event in app_events {
            self.send_app_event(app_event).await?;
        }
        Ok(())
    }

    /// Broadcast an effect to the transport tasks
    fn send_effect(&mut self, effect: Effect) -> VisorResult<()> {
        // A broadcast with no subscribers means no transport is attached;
        // the effect is dropped the same way one aimed at an absent
        // transport kind would be ignored.
        match self.effect_sender.send(effect) {
            Ok(_) => {
                self.state.stats.effects_generated += 1;
            }
            Err(e) => {
                debug!("No transport attached; dropping effect {:?}", e.0);
            }
        }
        Ok(())
    }

    /// Send an app event to the embedder
    async fn send_app_event(&mut self, app_event: AppEvent) -> VisorResult<()> {
        self.app_event_sender
            .send(app_event)
            .await
            .map_err(|_| VisorError::channel_error("App event channel closed"))?;
        self.state.stats.app_events_generated += 1;
        Ok(())
    }

    /// Get current statistics
    pub fn stats(&self) -> &RouterStats {
        &self.state.stats
    }

    /// Read access to the router state, for inspection in tests
    pub fn state(&self) -> &RouterState {
        &self.state
    }
}
