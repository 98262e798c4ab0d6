//! Router Command and Event Handlers
//!
//! Every handler takes the router state plus the message payload and returns
//! the effects and app events the message produced. Handlers never touch a
//! channel themselves; the router task owns dispatch, which keeps all of this
//! synchronous and directly testable.
//!
//! Manager-bound notices go through [`RouterHandlers::route_notice`], which
//! picks between the radio and the bus based on where the manager last spoke
//! from. User-level failures (a start that is refused, a token that will not
//! persist) become `ErrorOccurred` app events and error notices rather than
//! `Err` returns; an `Err` from a handler means the router itself is broken.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};
use visor_core::errors::RegistryError;
use visor_core::protocol::bus::{BusEnvelope, BusMessage, BusTier, CoreBusMessage};
use visor_core::protocol::cloud::{
    CloudInbound, CloudOutbound, HeadPosition, PhoneNotification, PressKind, StreamConfig,
    StreamKind,
};
use visor_core::protocol::manager::{CoreStatus, ManagerCommand, ManagerNotice, NotifyLevel};
use visor_core::{
    AppEvent, AppKind, CentralId, ChannelKind, DeviceKind, DeviceLinkStatus, EdgeApp, Effect,
    PackageId, PolicyDirective, TransportStatus, VisorResult,
};

use super::state::{CloudSessionState, RouterState, SpeechSubscription};

/// How long the launch overlay stays up while an app boots
const BOOT_OVERLAY_MS: u64 = 3_000;

/// Command and event handlers for the router task
pub struct RouterHandlers;

// ----------------------------------------------------------------------------
// Command Handlers
// ----------------------------------------------------------------------------

impl RouterHandlers {
    /// Handle a request to start an app
    pub fn handle_start_app(
        state: &mut RouterState,
        package: PackageId,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        let installed = match state.platform.scanner.is_installed(&package) {
            Ok(installed) => installed,
            Err(e) => {
                // With the scanner down, trust the catalog rather than
                // purging entries on bad data.
                warn!("Install check for {} failed: {}", package, e);
                true
            }
        };

        match state.registry.start(&package, installed) {
            Ok(app) => {
                info!("Starting app {}", package);
                effects.push(Effect::BusPublish {
                    target: None,
                    message: CoreBusMessage::AppStart {
                        package: package.clone(),
                    },
                });
                if state.cloud.is_open() {
                    effects.push(Effect::CloudSend {
                        message: CloudOutbound::StartApp {
                            package: package.clone(),
                            timestamp: state.now().as_millis(),
                        },
                    });
                }
                app_events.push(AppEvent::AppStarted {
                    package: package.clone(),
                });
                if Self::display_available(state) {
                    app_events.push(AppEvent::DisplayRequested {
                        sender: Some(package.clone()),
                        request: visor_core::protocol::display::DisplayRequest::transient(
                            serde_json::json!({
                                "layoutType": "text_wall",
                                "text": format!("Starting {}", app.name),
                            }),
                            BOOT_OVERLAY_MS,
                        ),
                    });
                }
                Self::route_notice(
                    state,
                    ManagerNotice::AppStateChanged {
                        package,
                        running: true,
                    },
                    &mut effects,
                )?;
                Self::push_status(state, &mut effects, &mut app_events)?;
            }
            Err(e) => {
                warn!("Start of {} refused: {}", package, e);
                if matches!(e, RegistryError::NotInstalled { .. }) {
                    // The stale catalog entry is already purged.
                    Self::persist_catalog(state);
                    app_events.push(AppEvent::CatalogUpdated {
                        apps: state.registry.snapshot(),
                    });
                }
                Self::route_notice(
                    state,
                    ManagerNotice::Notify {
                        message: e.to_string(),
                        level: NotifyLevel::Error,
                    },
                    &mut effects,
                )?;
                app_events.push(AppEvent::ErrorOccurred {
                    error: e.to_string(),
                });
            }
        }

        Ok((effects, app_events))
    }

    /// Handle a request to stop an app
    ///
    /// Safe in any state: the stop signal always goes out, so a stop
    /// converges even when the running belief was wrong.
    pub fn handle_stop_app(
        state: &mut RouterState,
        package: PackageId,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        let was_running = state.registry.stop(&package);

        effects.push(Effect::BusPublish {
            target: None,
            message: CoreBusMessage::AppStop {
                package: package.clone(),
            },
        });
        app_events.push(AppEvent::DisplayReleased {
            package: package.clone(),
        });

        let had_subscription = state.speech_subscribers.remove(&package).is_some();
        state.voice_commands.remove(&package);
        if had_subscription {
            Self::refresh_speech_streams(state, &mut effects);
        }

        if was_running {
            info!("Stopped app {}", package);
            if state.cloud.is_open() {
                effects.push(Effect::CloudSend {
                    message: CloudOutbound::StopApp {
                        package: package.clone(),
                        timestamp: state.now().as_millis(),
                    },
                });
            }
            app_events.push(AppEvent::AppStopped {
                package: package.clone(),
            });
            Self::route_notice(
                state,
                ManagerNotice::AppStateChanged {
                    package,
                    running: false,
                },
                &mut effects,
            )?;
            Self::push_status(state, &mut effects, &mut app_events)?;
        } else {
            debug!("Stop of {} was a no-op", package);
        }

        Ok((effects, app_events))
    }

    /// Rebuild the app catalog from a fresh package enumeration
    pub fn handle_run_discovery(
        state: &mut RouterState,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        let installed = match state.platform.scanner.installed_apps() {
            Ok(installed) => installed,
            Err(e) => {
                warn!("App discovery failed: {}", e);
                app_events.push(AppEvent::ErrorOccurred {
                    error: format!("App discovery failed: {}", e),
                });
                return Ok((effects, app_events));
            }
        };

        let apps = state.registry.rebuild_catalog(installed);
        info!("Discovery cataloged {} apps", apps.len());
        Self::persist_catalog(state);

        app_events.push(AppEvent::CatalogUpdated { apps });
        Self::route_notice(
            state,
            ManagerNotice::AppInfo {
                apps: state.registry.summaries(),
            },
            &mut effects,
        )?;
        Self::push_status(state, &mut effects, &mut app_events)?;

        Ok((effects, app_events))
    }

    /// Stop an app if needed and drop it from the catalog
    pub fn handle_uninstall_app(
        state: &mut RouterState,
        package: PackageId,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let (mut effects, mut app_events) = Self::handle_stop_app(state, package.clone())?;

        if state.registry.uninstall(&package) {
            info!("Uninstalled {}", package);
            Self::persist_catalog(state);
            app_events.push(AppEvent::CatalogUpdated {
                apps: state.registry.snapshot(),
            });
            Self::push_status(state, &mut effects, &mut app_events)?;
        } else {
            debug!("Uninstall of {}: not in catalog", package);
        }

        Ok((effects, app_events))
    }

    /// Ask the embedder to bring the wearable link up
    pub fn handle_connect_wearable() -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        Ok((
            Vec::new(),
            vec![AppEvent::WearableLinkRequested { connect: true }],
        ))
    }

    /// Ask the embedder to drop the wearable link
    pub fn handle_disconnect_wearable() -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        Ok((
            Vec::new(),
            vec![AppEvent::WearableLinkRequested { connect: false }],
        ))
    }

    /// Switch the simulated wearable on or off
    pub fn handle_enable_virtual_wearable(
        state: &mut RouterState,
        enabled: bool,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        if enabled {
            Self::apply_wearable_status(
                state,
                DeviceLinkStatus::Connected {
                    kind: DeviceKind::Virtual,
                },
                &mut effects,
                &mut app_events,
            )?;
        } else if state.wearable.kind() == Some(DeviceKind::Virtual) {
            Self::apply_wearable_status(
                state,
                DeviceLinkStatus::Disconnected,
                &mut effects,
                &mut app_events,
            )?;
        } else {
            debug!("Virtual wearable disable ignored; link is {:?}", state.wearable);
        }

        Ok((effects, app_events))
    }

    /// Adopt a device link state reported by the embedder
    pub fn handle_set_device_link(
        state: &mut RouterState,
        status: DeviceLinkStatus,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();
        Self::apply_wearable_status(state, status, &mut effects, &mut app_events)?;
        Ok((effects, app_events))
    }

    /// Handle a foreground activity change
    pub fn handle_set_foreground(
        state: &mut RouterState,
        active: bool,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        if state.policy.foreground_active() == active {
            return Ok((effects, app_events));
        }
        debug!("Foreground activity: {}", active);
        if let Some(directive) = state.policy.set_foreground(active) {
            Self::apply_policy_directive(state, directive, &mut effects, &mut app_events);
        }
        Self::push_status(state, &mut effects, &mut app_events)?;

        Ok((effects, app_events))
    }

    /// Push a full status snapshot everywhere
    pub fn handle_request_status(
        state: &mut RouterState,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();
        Self::push_status(state, &mut effects, &mut app_events)?;
        Ok((effects, app_events))
    }

    /// Store a new auth token and cycle the cloud session onto it
    pub fn handle_set_auth_token(
        state: &mut RouterState,
        token: String,
        owner: Option<String>,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        if let Err(e) = state.auth.set_token(token, owner) {
            warn!("Auth token update failed: {}", e);
            Self::route_notice(
                state,
                ManagerNotice::Notify {
                    message: format!("Could not store auth key: {}", e),
                    level: NotifyLevel::Error,
                },
                &mut effects,
            )?;
            app_events.push(AppEvent::ErrorOccurred {
                error: e.to_string(),
            });
            return Ok((effects, app_events));
        }

        info!("Auth token updated");
        // Any live session still rides the old token.
        Self::close_cloud(state, &mut effects, &mut app_events);
        if state.policy.desired() {
            Self::try_connect_cloud(state, &mut effects);
        }
        Self::push_status(state, &mut effects, &mut app_events)?;

        Ok((effects, app_events))
    }

    /// Verify the stored token against the cloud
    ///
    /// The connection acknowledgement doubles as the verification verdict,
    /// so verification is a connect attempt unless a session already proves
    /// the token good.
    pub fn handle_verify_auth_token(
        state: &mut RouterState,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        if !state.auth.has_usable_token() {
            Self::route_notice(
                state,
                ManagerNotice::Notify {
                    message: "No auth key to verify".to_string(),
                    level: NotifyLevel::Error,
                },
                &mut effects,
            )?;
            app_events.push(AppEvent::ErrorOccurred {
                error: "No auth key to verify".to_string(),
            });
        } else if state.cloud.is_ready() {
            if let Err(e) = state.auth.mark_verified(state.now()) {
                warn!("Auth state persist failed: {}", e);
            }
            Self::route_notice(
                state,
                ManagerNotice::Notify {
                    message: "Auth key verified".to_string(),
                    level: NotifyLevel::Info,
                },
                &mut effects,
            )?;
            Self::push_status(state, &mut effects, &mut app_events)?;
        } else {
            Self::try_connect_cloud(state, &mut effects);
        }

        Ok((effects, app_events))
    }

    /// Delete the stored auth token and close the session it carried
    pub fn handle_delete_auth_token(
        state: &mut RouterState,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        if let Err(e) = state.auth.clear() {
            warn!("Auth token delete failed: {}", e);
            Self::route_notice(
                state,
                ManagerNotice::Notify {
                    message: format!("Could not delete auth key: {}", e),
                    level: NotifyLevel::Error,
                },
                &mut effects,
            )?;
            app_events.push(AppEvent::ErrorOccurred {
                error: e.to_string(),
            });
            return Ok((effects, app_events));
        }

        info!("Auth token deleted");
        Self::close_cloud(state, &mut effects, &mut app_events);
        Self::push_status(state, &mut effects, &mut app_events)?;

        Ok((effects, app_events))
    }

    /// Replace an app's settings and tell the app about it
    pub fn handle_update_app_settings(
        state: &mut RouterState,
        package: PackageId,
        settings: serde_json::Value,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        match state.registry.update_settings(&package, settings.clone()) {
            Ok(()) => {
                debug!("Settings updated for {}", package);
                Self::persist_catalog(state);
                effects.push(Effect::BusPublish {
                    target: Some(package.clone()),
                    message: CoreBusMessage::SettingsUpdate { package, settings },
                });
                app_events.push(AppEvent::CatalogUpdated {
                    apps: state.registry.snapshot(),
                });
            }
            Err(e) => {
                warn!("Settings update for {} refused: {}", package, e);
                Self::route_notice(
                    state,
                    ManagerNotice::Notify {
                        message: e.to_string(),
                        level: NotifyLevel::Error,
                    },
                    &mut effects,
                )?;
                app_events.push(AppEvent::ErrorOccurred {
                    error: e.to_string(),
                });
            }
        }

        Ok((effects, app_events))
    }

    /// Forward a phone notification to the cloud
    pub fn handle_phone_notification(
        state: &mut RouterState,
        notification: PhoneNotification,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        if state.cloud.is_open() {
            effects.push(Effect::CloudSend {
                message: CloudOutbound::PhoneNotification {
                    notification,
                    timestamp: state.now().as_millis(),
                },
            });
        } else {
            debug!("Dropping phone notification; no cloud session");
        }
        Ok((effects, Vec::new()))
    }

    /// Forward a hardware button press to the cloud
    pub fn handle_button_pressed(
        state: &mut RouterState,
        button: String,
        press: PressKind,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        if state.cloud.is_open() {
            effects.push(Effect::CloudSend {
                message: CloudOutbound::ButtonPress {
                    button,
                    press,
                    timestamp: state.now().as_millis(),
                },
            });
        } else {
            debug!("Dropping button press; no cloud session");
        }
        Ok((effects, Vec::new()))
    }

    /// Forward a head position change to the cloud
    pub fn handle_head_position(
        state: &mut RouterState,
        position: HeadPosition,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        if state.cloud.is_open() {
            effects.push(Effect::CloudSend {
                message: CloudOutbound::HeadPosition {
                    position,
                    timestamp: state.now().as_millis(),
                },
            });
        }
        Ok((effects, Vec::new()))
    }

    /// Forward wearable battery state to the cloud
    pub fn handle_battery_changed(
        state: &mut RouterState,
        level: u8,
        charging: bool,
        time_remaining_minutes: Option<u32>,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        if state.cloud.is_open() {
            effects.push(Effect::CloudSend {
                message: CloudOutbound::BatteryUpdate {
                    level,
                    charging,
                    time_remaining_minutes,
                    timestamp: state.now().as_millis(),
                },
            });
        }
        Ok((effects, Vec::new()))
    }

    /// Forward a location fix to the cloud
    pub fn handle_location_changed(
        state: &mut RouterState,
        lat: f64,
        lng: f64,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        if state.cloud.is_open() {
            effects.push(Effect::CloudSend {
                message: CloudOutbound::LocationUpdate {
                    lat,
                    lng,
                    timestamp: state.now().as_millis(),
                },
            });
        }
        Ok((effects, Vec::new()))
    }

    /// Forward a voice activity change to the cloud
    pub fn handle_speaking_state(
        state: &mut RouterState,
        speaking: bool,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        if state.cloud.is_open() {
            effects.push(Effect::CloudSend {
                message: CloudOutbound::Vad { status: speaking },
            });
        }
        Ok((effects, Vec::new()))
    }

    /// Startup pass: open the cloud session if the initial policy
    /// derivation already wants one
    pub fn handle_startup(state: &mut RouterState) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        if state.policy.desired() {
            Self::try_connect_cloud(state, &mut effects);
        }
        Ok((effects, Vec::new()))
    }

    /// Handle shutdown: tear the transports down
    pub fn handle_shutdown() -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        info!("Shutting down");
        Ok((
            vec![Effect::WirelessStop, Effect::CloudDisconnect, Effect::Shutdown],
            Vec::new(),
        ))
    }
}

// ----------------------------------------------------------------------------
// Event Handlers
// ----------------------------------------------------------------------------

impl RouterHandlers {
    /// A central connected to the wireless link
    pub fn handle_central_connected(
        state: &mut RouterState,
        central: CentralId,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        info!("Central {} connected", central);
        state.central = Some(central);

        // A fresh manager wants state immediately.
        let mut effects = Vec::new();
        let mut app_events = Vec::new();
        Self::push_status(state, &mut effects, &mut app_events)?;
        Ok((effects, app_events))
    }

    /// The connected central went away
    pub fn handle_central_disconnected(
        state: &mut RouterState,
        central: CentralId,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        if state.central.as_ref() == Some(&central) {
            info!("Central {} disconnected", central);
            state.central = None;
        } else {
            debug!("Disconnect for unknown central {}", central);
        }
        Ok((Vec::new(), Vec::new()))
    }

    /// A complete message arrived over the wireless link
    pub fn handle_wireless_message(
        state: &mut RouterState,
        central: CentralId,
        payload: String,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        // A real radio write means the manager is on the handset again.
        if state.loopback {
            info!("Radio traffic resumed; notices leave loopback");
            state.loopback = false;
        }

        match ManagerCommand::parse(&payload) {
            Ok(command) => Self::dispatch_manager_command(state, command),
            Err(e) => {
                warn!("Dropping malformed manager command from {}: {}", central, e);
                state.stats.malformed_dropped += 1;
                Ok((Vec::new(), Vec::new()))
            }
        }
    }

    /// The radio came up or went down
    pub fn handle_wireless_link_state(
        state: &mut RouterState,
        available: bool,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        if available {
            info!("Radio available");
        } else {
            info!("Radio unavailable; advertising resumes when it returns");
            state.central = None;
        }
        Ok((Vec::new(), Vec::new()))
    }

    /// A pairing attempt asked for more than just-works
    pub fn handle_pairing_denied(reason: String) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        warn!("Pairing attempt denied: {}", reason);
        Ok((
            Vec::new(),
            vec![AppEvent::ErrorOccurred {
                error: format!("Pairing denied: {}", reason),
            }],
        ))
    }

    /// A bus message arrived with its broker-verified sender
    pub fn handle_bus_envelope(
        state: &mut RouterState,
        envelope: BusEnvelope,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let BusEnvelope { sender, message } = envelope;

        match message.tier() {
            BusTier::Open => {}
            BusTier::Gated => {
                if !state.registry.is_running(&sender) {
                    return Self::punish(state, sender, "gated bus message");
                }
            }
            BusTier::Manager => {
                if sender.as_str() != state.config.bus.manager_package {
                    return Self::punish(state, sender, "manager control frame");
                }
            }
        }

        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        match message {
            BusMessage::RegisterApp { descriptor } => {
                debug!("Bus registration from {}", sender);
                state.registry.upsert(EdgeApp {
                    package: sender,
                    name: descriptor.name,
                    description: descriptor.description,
                    version: descriptor.version,
                    kind: AppKind::Standard,
                    settings: descriptor.settings,
                    entry_point: None,
                });
                Self::persist_catalog(state);
                app_events.push(AppEvent::CatalogUpdated {
                    apps: state.registry.snapshot(),
                });
            }
            BusMessage::RegisterCommands { commands } => {
                debug!("{} registered {} voice commands", sender, commands.len());
                state.voice_commands.insert(sender, commands);
            }
            BusMessage::DisplayRequest { request } => {
                if Self::display_available(state) {
                    app_events.push(AppEvent::DisplayRequested {
                        sender: Some(sender),
                        request,
                    });
                } else {
                    warn!("Dropping display request from {}; no display attached", sender);
                }
            }
            BusMessage::SubscribeSpeech {
                source_language,
                target_language,
            } => {
                debug!(
                    "{} subscribed to speech ({} -> {:?})",
                    sender, source_language, target_language
                );
                state.speech_subscribers.insert(
                    sender,
                    SpeechSubscription {
                        source_language,
                        target_language,
                    },
                );
                Self::refresh_speech_streams(state, &mut effects);
            }
            BusMessage::UnsubscribeSpeech => {
                if state.speech_subscribers.remove(&sender).is_some() {
                    Self::refresh_speech_streams(state, &mut effects);
                }
            }
            BusMessage::CustomContent { payload } => {
                Self::route_notice(
                    state,
                    ManagerNotice::AppContent {
                        package: sender,
                        payload,
                    },
                    &mut effects,
                )?;
            }
            BusMessage::ManagerControl { command } => {
                // Control over the bus means the manager is co-located;
                // replies take the same path until the radio speaks again.
                if !state.loopback {
                    info!("Manager is co-located; notices switch to the bus");
                    state.loopback = true;
                }
                return Self::dispatch_manager_command(state, command);
            }
        }

        Ok((effects, app_events))
    }

    /// The cloud socket opened; the session introduction is on the wire
    pub fn handle_cloud_opened(
        state: &mut RouterState,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        info!("Cloud socket open, awaiting acknowledgement");
        state.cloud = CloudSessionState::Open;
        Ok((Vec::new(), Vec::new()))
    }

    /// The cloud session closed without an error
    pub fn handle_cloud_closed(
        state: &mut RouterState,
        reason: Option<String>,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        if state.cloud.is_closed() {
            debug!("Cloud close for an already-closed session");
            return Ok((effects, app_events));
        }

        info!(
            "Cloud session closed{}",
            reason.map(|r| format!(": {}", r)).unwrap_or_default()
        );
        let was_ready = state.cloud.is_ready();
        state.cloud = CloudSessionState::Closed;
        state.active_streams.clear();
        if was_ready {
            app_events.push(AppEvent::CloudSessionChanged { connected: false });
            Self::push_status(state, &mut effects, &mut app_events)?;
        }

        Ok((effects, app_events))
    }

    /// A typed message arrived from the cloud
    pub fn handle_cloud_message(
        state: &mut RouterState,
        message: CloudInbound,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        match message {
            CloudInbound::ConnectionAck { session_id } => {
                info!("Cloud session acknowledged");
                state.cloud = CloudSessionState::Ready { session_id };
                // A session the backend accepted proves the token.
                if let Err(e) = state.auth.mark_verified(state.now()) {
                    warn!("Auth state persist failed: {}", e);
                }
                app_events.push(AppEvent::CloudSessionChanged { connected: true });
                // The backend starts from a blank stream config.
                let streams = Self::stream_set(&state.speech_subscribers);
                state.active_streams = streams.clone();
                if !streams.is_empty() {
                    effects.push(Effect::CloudSend {
                        message: CloudOutbound::Config { streams },
                    });
                }
                Self::push_status(state, &mut effects, &mut app_events)?;
            }
            CloudInbound::ConnectionError { message } => {
                let reason = message.unwrap_or_else(|| "unspecified".to_string());
                warn!("Cloud reported a session error: {}", reason);
                app_events.push(AppEvent::ErrorOccurred {
                    error: format!("Cloud error: {}", reason),
                });
                Self::route_notice(
                    state,
                    ManagerNotice::Notify {
                        message: format!("Cloud error: {}", reason),
                        level: NotifyLevel::Error,
                    },
                    &mut effects,
                )?;
            }
            CloudInbound::AuthError { message } => {
                let reason = message.unwrap_or_else(|| "token rejected".to_string());
                warn!("Cloud rejected the auth token: {}", reason);
                if let Err(e) = state.auth.mark_invalid() {
                    warn!("Auth state persist failed: {}", e);
                }
                Self::close_cloud(state, &mut effects, &mut app_events);
                app_events.push(AppEvent::ErrorOccurred {
                    error: format!("Auth rejected: {}", reason),
                });
                Self::route_notice(
                    state,
                    ManagerNotice::Notify {
                        message: format!("Auth rejected: {}", reason),
                        level: NotifyLevel::Error,
                    },
                    &mut effects,
                )?;
                Self::push_status(state, &mut effects, &mut app_events)?;
            }
            CloudInbound::AppStateChange { active_packages } => {
                // Informational; the local process list is the authority.
                debug!("Cloud believes {} apps are active", active_packages.len());
            }
            CloudInbound::MicrophoneStateChange { enabled } => {
                if state.microphone_enabled != enabled {
                    info!("Microphone {}", if enabled { "enabled" } else { "muted" });
                    state.microphone_enabled = enabled;
                    app_events.push(AppEvent::MicrophoneStateChanged { enabled });
                }
            }
            CloudInbound::DisplayEvent { request } => {
                if Self::display_available(state) {
                    app_events.push(AppEvent::DisplayRequested {
                        sender: None,
                        request,
                    });
                } else {
                    warn!("Dropping cloud display event; no display attached");
                }
            }
            CloudInbound::Interim {
                text,
                language,
                translate_language,
            } => {
                Self::deliver_transcript(
                    state,
                    text,
                    language,
                    translate_language,
                    false,
                    &mut effects,
                    &mut app_events,
                );
            }
            CloudInbound::Final {
                text,
                language,
                translate_language,
            } => {
                Self::deliver_transcript(
                    state,
                    text,
                    language,
                    translate_language,
                    true,
                    &mut effects,
                    &mut app_events,
                );
            }
            CloudInbound::RequestSingle { data_type } => {
                debug!("Cloud requested {:?}; answering with status", data_type);
                if state.cloud.is_open() {
                    effects.push(Effect::CloudSend {
                        message: CloudOutbound::CoreStatus {
                            status: Self::build_status(state),
                            timestamp: state.now().as_millis(),
                        },
                    });
                }
            }
            CloudInbound::Reconnect => {
                info!("Cloud asked for a reconnect");
                Self::close_cloud(state, &mut effects, &mut app_events);
                if state.policy.desired() {
                    Self::try_connect_cloud(state, &mut effects);
                }
            }
            CloudInbound::Unknown => {
                debug!("Ignoring unknown cloud message");
            }
        }

        Ok((effects, app_events))
    }

    /// The cloud session died
    pub fn handle_cloud_failure(
        state: &mut RouterState,
        reason: String,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        warn!("Cloud session failed: {}", reason);

        let mut effects = Vec::new();
        let mut app_events = vec![AppEvent::ErrorOccurred {
            error: format!("Cloud failure: {}", reason),
        }];

        // Marked closed, nothing more: reconnection waits for the next
        // policy transition or explicit command.
        let was_ready = state.cloud.is_ready();
        state.cloud = CloudSessionState::Closed;
        state.active_streams.clear();
        if was_ready {
            app_events.push(AppEvent::CloudSessionChanged { connected: false });
        }
        Self::push_status(state, &mut effects, &mut app_events)?;

        Ok((effects, app_events))
    }

    /// A transport changed its own availability
    pub fn handle_transport_status(
        channel: ChannelKind,
        status: TransportStatus,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        info!("{} transport is {}", channel, status);
        Ok((Vec::new(), Vec::new()))
    }

    /// Reconcile the believed-running set against the live process list
    pub fn handle_reconcile(
        state: &mut RouterState,
        alive: BTreeSet<PackageId>,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        state.stats.reconcile_passes += 1;
        let outcome = state.registry.reconcile(&alive);
        if outcome.is_empty() {
            return Ok((Vec::new(), Vec::new()));
        }

        let mut effects = Vec::new();
        let mut app_events = Vec::new();

        for package in outcome.forgotten {
            info!("Forgetting {}; its process is gone", package);
            state.speech_subscribers.remove(&package);
            state.voice_commands.remove(&package);
            if state.cloud.is_open() {
                effects.push(Effect::CloudSend {
                    message: CloudOutbound::StopApp {
                        package: package.clone(),
                        timestamp: state.now().as_millis(),
                    },
                });
            }
            app_events.push(AppEvent::DisplayReleased {
                package: package.clone(),
            });
            app_events.push(AppEvent::AppStopped {
                package: package.clone(),
            });
            Self::route_notice(
                state,
                ManagerNotice::AppStateChanged {
                    package,
                    running: false,
                },
                &mut effects,
            )?;
        }
        Self::refresh_speech_streams(state, &mut effects);

        for package in outcome.strays {
            warn!("Stopping stray process {}", package);
            let (stray_effects, stray_events) = Self::handle_stop_app(state, package)?;
            effects.extend(stray_effects);
            app_events.extend(stray_events);
        }

        Self::push_status(state, &mut effects, &mut app_events)?;
        Ok((effects, app_events))
    }
}

// ----------------------------------------------------------------------------
// Manager Command Dispatch
// ----------------------------------------------------------------------------

impl RouterHandlers {
    /// Dispatch a parsed manager command, whichever path it arrived on
    pub fn dispatch_manager_command(
        state: &mut RouterState,
        command: ManagerCommand,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        match command {
            ManagerCommand::Ping => {
                let mut effects = Vec::new();
                Self::route_notice(state, ManagerNotice::Pong, &mut effects)?;
                Ok((effects, Vec::new()))
            }
            ManagerCommand::RequestStatus => Self::handle_request_status(state),
            ManagerCommand::ConnectWearable { target } => {
                if let Some(target) = target {
                    debug!("Wearable connect requested toward {}", target);
                }
                Self::handle_connect_wearable()
            }
            ManagerCommand::DisconnectWearable => Self::handle_disconnect_wearable(),
            ManagerCommand::EnableVirtualWearable { enabled } => {
                Self::handle_enable_virtual_wearable(state, enabled)
            }
            ManagerCommand::StartApp { package } => Self::handle_start_app(state, package),
            ManagerCommand::StopApp { package } => Self::handle_stop_app(state, package),
            ManagerCommand::UninstallApp { package } => Self::handle_uninstall_app(state, package),
            ManagerCommand::PhoneNotification { notification } => {
                Self::handle_phone_notification(state, notification)
            }
            ManagerCommand::SetAuthSecretKey { key, user_id } => {
                Self::handle_set_auth_token(state, key, user_id)
            }
            ManagerCommand::VerifyAuthSecretKey => Self::handle_verify_auth_token(state),
            ManagerCommand::DeleteAuthSecretKey => Self::handle_delete_auth_token(state),
            ManagerCommand::UpdateAppSettings { package, settings } => {
                Self::handle_update_app_settings(state, package, settings)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Shared Helpers
// ----------------------------------------------------------------------------

impl RouterHandlers {
    /// Drop an unauthorized message and stop its sender
    fn punish(
        state: &mut RouterState,
        sender: PackageId,
        what: &str,
    ) -> VisorResult<(Vec<Effect>, Vec<AppEvent>)> {
        warn!("Dropping {} from unauthorized sender {}; stopping it", what, sender);
        state.stats.unauthorized_drops += 1;
        Self::handle_stop_app(state, sender)
    }

    /// Send a notice to the manager over whichever path it last used
    fn route_notice(
        state: &RouterState,
        notice: ManagerNotice,
        effects: &mut Vec<Effect>,
    ) -> VisorResult<()> {
        if state.loopback {
            effects.push(Effect::BusPublish {
                target: Some(PackageId::from(state.config.bus.manager_package.clone())),
                message: CoreBusMessage::ManagerNotice { notice },
            });
        } else if state.central.is_some() {
            effects.push(Effect::WirelessSend {
                message: serde_json::to_string(&notice)?,
            });
        } else {
            debug!("No manager path; dropping notice");
        }
        Ok(())
    }

    /// Push a status snapshot to the manager, the cloud, and the embedder
    fn push_status(
        state: &RouterState,
        effects: &mut Vec<Effect>,
        app_events: &mut Vec<AppEvent>,
    ) -> VisorResult<()> {
        let status = Self::build_status(state);
        if state.cloud.is_open() {
            effects.push(Effect::CloudSend {
                message: CloudOutbound::CoreStatus {
                    status: status.clone(),
                    timestamp: state.now().as_millis(),
                },
            });
        }
        Self::route_notice(
            state,
            ManagerNotice::Status {
                status: status.clone(),
            },
            effects,
        )?;
        app_events.push(AppEvent::StatusReport { status });
        Ok(())
    }

    /// Assemble the full status snapshot
    pub fn build_status(state: &RouterState) -> CoreStatus {
        CoreStatus {
            cloud_connected: state.cloud.is_ready(),
            auth: state.auth.status(),
            wearable: state.wearable.clone(),
            foreground_active: state.policy.foreground_active(),
            apps: state.registry.summaries(),
        }
    }

    /// Adopt a new wearable link status, driving policy off it
    fn apply_wearable_status(
        state: &mut RouterState,
        status: DeviceLinkStatus,
        effects: &mut Vec<Effect>,
        app_events: &mut Vec<AppEvent>,
    ) -> VisorResult<()> {
        if state.wearable == status {
            return Ok(());
        }
        info!("Wearable link: {:?} -> {:?}", state.wearable, status);
        state.wearable = status;

        match &state.wearable {
            DeviceLinkStatus::Connected { kind } => {
                app_events.push(AppEvent::WearableConnected { kind: *kind });
            }
            DeviceLinkStatus::Disconnected => {
                app_events.push(AppEvent::WearableDisconnected);
            }
            DeviceLinkStatus::Connecting => {}
        }

        if let Some(directive) = state.policy.set_device_link(state.wearable.is_active()) {
            Self::apply_policy_directive(state, directive, effects, app_events);
        }
        Self::push_status(state, effects, app_events)?;
        Ok(())
    }

    /// Act on a policy transition
    fn apply_policy_directive(
        state: &mut RouterState,
        directive: PolicyDirective,
        effects: &mut Vec<Effect>,
        app_events: &mut Vec<AppEvent>,
    ) {
        match directive {
            PolicyDirective::Connect => {
                Self::try_connect_cloud(state, effects);
            }
            PolicyDirective::Disconnect => {
                Self::close_cloud(state, effects, app_events);
            }
        }
    }

    /// Open the cloud session if there is none and a token allows it
    fn try_connect_cloud(state: &mut RouterState, effects: &mut Vec<Effect>) -> bool {
        if !state.cloud.is_closed() {
            debug!("Cloud connect skipped; session is {:?}", state.cloud);
            return false;
        }
        let token = match state.auth.token() {
            Some(token) if state.auth.has_usable_token() => token.to_string(),
            _ => {
                debug!("Cloud connection desired but no usable token is stored");
                return false;
            }
        };
        info!("Opening cloud session");
        state.cloud = CloudSessionState::Pending;
        effects.push(Effect::CloudConnect { core_token: token });
        true
    }

    /// Close the cloud session if one is up
    fn close_cloud(
        state: &mut RouterState,
        effects: &mut Vec<Effect>,
        app_events: &mut Vec<AppEvent>,
    ) {
        if state.cloud.is_closed() {
            return;
        }
        info!("Closing cloud session");
        let was_ready = state.cloud.is_ready();
        state.cloud = CloudSessionState::Closed;
        state.active_streams.clear();
        effects.push(Effect::CloudDisconnect);
        if was_ready {
            app_events.push(AppEvent::CloudSessionChanged { connected: false });
        }
    }

    /// Push the current stream set to the cloud if it changed
    fn refresh_speech_streams(state: &mut RouterState, effects: &mut Vec<Effect>) {
        let streams = Self::stream_set(&state.speech_subscribers);
        if streams == state.active_streams {
            return;
        }
        debug!("Speech stream set now has {} entries", streams.len());
        state.active_streams = streams.clone();
        if state.cloud.is_open() {
            effects.push(Effect::CloudSend {
                message: CloudOutbound::Config { streams },
            });
        }
    }

    /// Deduplicated stream configs for the current subscribers
    pub fn stream_set(
        subscribers: &BTreeMap<PackageId, SpeechSubscription>,
    ) -> Vec<StreamConfig> {
        let mut seen = BTreeSet::new();
        let mut streams = Vec::new();
        for sub in subscribers.values() {
            if seen.insert((sub.source_language.clone(), sub.target_language.clone())) {
                streams.push(StreamConfig {
                    kind: if sub.target_language.is_some() {
                        StreamKind::Translation
                    } else {
                        StreamKind::Transcription
                    },
                    source_language: sub.source_language.clone(),
                    target_language: sub.target_language.clone(),
                });
            }
        }
        streams
    }

    /// Fan a transcript out to the embedder and matching subscribers
    ///
    /// A transcript without a language labels no stream and goes to every
    /// subscriber; otherwise it goes to subscribers whose (source, target)
    /// pair produced it. The delivered language is the language of the text
    /// as the consumer receives it.
    fn deliver_transcript(
        state: &RouterState,
        text: String,
        language: Option<String>,
        translate_language: Option<String>,
        is_final: bool,
        effects: &mut Vec<Effect>,
        app_events: &mut Vec<AppEvent>,
    ) {
        let delivered_language = translate_language.clone().or_else(|| language.clone());
        app_events.push(AppEvent::Transcript {
            text: text.clone(),
            language: delivered_language.clone(),
            is_final,
        });

        for (package, sub) in &state.speech_subscribers {
            let matches = match &language {
                None => true,
                Some(lang) => {
                    sub.source_language == *lang && sub.target_language == translate_language
                }
            };
            if matches {
                effects.push(Effect::BusPublish {
                    target: Some(package.clone()),
                    message: CoreBusMessage::Transcript {
                        text: text.clone(),
                        language: delivered_language.clone(),
                        is_final,
                    },
                });
            }
        }
    }

    /// Whether the current wearable can draw anything
    fn display_available(state: &RouterState) -> bool {
        state
            .wearable
            .kind()
            .map(|kind| kind.capabilities().has_display)
            .unwrap_or(false)
    }

    /// Write the catalog snapshot through the platform store
    fn persist_catalog(state: &RouterState) {
        if let Err(e) = state.platform.catalog_store.save(&state.registry.snapshot()) {
            warn!("Catalog persist failed: {}", e);
        }
    }
}
