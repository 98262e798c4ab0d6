//! Typed messages for communication between the router and its surroundings
//!
//! Four message families cross task boundaries:
//! - `Command`: embedding layer to router (control surface)
//! - `Event`: transport tasks to router (things that happened)
//! - `Effect`: router to transport tasks (things to do, broadcast)
//! - `AppEvent`: router to embedding layer (things to observe)
//!
//! Every message is an owned value; senders never share state with the
//! router. Each transport consumes only the `Effect` variants addressed to
//! its channel and ignores the rest.

use serde::{Deserialize, Serialize};

use crate::device::{DeviceKind, DeviceLinkStatus};
use crate::protocol::bus::{BusEnvelope, CoreBusMessage};
use crate::protocol::cloud::{CloudInbound, CloudOutbound, HeadPosition, PhoneNotification, PressKind};
use crate::protocol::display::DisplayRequest;
use crate::protocol::manager::CoreStatus;
use crate::registry::EdgeApp;
use crate::types::{CentralId, PackageId};

// ----------------------------------------------------------------------------
// Commands (Embedding Layer → Router)
// ----------------------------------------------------------------------------

/// Control-surface requests from the embedding layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Start an installed app
    StartApp { package: PackageId },

    /// Stop an app (safe to call regardless of state)
    StopApp { package: PackageId },

    /// Rebuild the app catalog from installed packages
    RunDiscovery,

    /// Ask the embedder to raise the wearable device link
    ConnectWearable,

    /// Ask the embedder to drop the wearable device link
    DisconnectWearable,

    /// Switch the simulated wearable on or off
    EnableVirtualWearable { enabled: bool },

    /// Foreground activity changed on the embedding side
    SetForeground { active: bool },

    /// Device link state reported by the embedder's communicator
    SetDeviceLink { status: DeviceLinkStatus },

    /// Request a full status snapshot
    RequestStatus,

    /// Store a new auth token (status becomes pending until verified)
    SetAuthToken { token: String },

    /// Verify the stored token against the cloud
    VerifyAuthToken,

    /// Delete the stored token
    DeleteAuthToken,

    /// Replace an app's settings payload
    UpdateAppSettings {
        package: PackageId,
        settings: serde_json::Value,
    },

    /// Forward a phone notification to the cloud
    PhoneNotification { notification: PhoneNotification },

    /// Hardware button pressed on the wearable
    ButtonPressed { button: String, press: PressKind },

    /// Head position changed on the wearable
    HeadPositionChanged { position: HeadPosition },

    /// Battery state changed on the wearable
    BatteryChanged {
        level: u8,
        charging: bool,
        time_remaining_minutes: Option<u32>,
    },

    /// Location fix from the embedding layer
    LocationChanged { lat: f64, lng: f64 },

    /// Voice activity detection state changed
    SpeakingStateChanged { speaking: bool },

    /// Shut down the router and all transports
    Shutdown,
}

// ----------------------------------------------------------------------------
// Events (Transports → Router)
// ----------------------------------------------------------------------------

/// Things that happened on a transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    /// A central connected to the wireless link
    CentralConnected { central: CentralId },

    /// The connected central went away
    CentralDisconnected { central: CentralId },

    /// A complete inbound message was reassembled on the wireless link
    WirelessMessage { central: CentralId, payload: String },

    /// Radio availability changed (false while the adapter is off)
    WirelessLinkState { available: bool },

    /// A pairing attempt was rejected
    PairingDenied { reason: String },

    /// A sender-stamped message arrived on the process bus
    BusEnvelope { envelope: BusEnvelope },

    /// The cloud socket is open and `connection_init` was sent
    CloudOpened,

    /// The cloud session closed (cleanly or after a disconnect effect)
    CloudClosed { reason: Option<String> },

    /// A typed message arrived from the cloud
    CloudMessage { message: CloudInbound },

    /// The cloud session failed; no retry is attempted by the transport
    CloudFailure { reason: String },

    /// A transport changed operational status
    TransportStatusChanged {
        channel: ChannelKind,
        status: TransportStatus,
    },
}

// ----------------------------------------------------------------------------
// Effects (Router → Transports)
// ----------------------------------------------------------------------------

/// Instructions to transport tasks, broadcast to all of them
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// Send a message to the connected central, chunked and paced
    WirelessSend { message: String },

    /// Start advertising (stop-then-start if already running)
    WirelessStart,

    /// Stop advertising and drop any connection
    WirelessStop,

    /// Publish a message on the process bus, to one peer or to all
    BusPublish {
        target: Option<PackageId>,
        message: CoreBusMessage,
    },

    /// Open the cloud session, presenting the stored token
    CloudConnect { core_token: String },

    /// Close the cloud session
    CloudDisconnect,

    /// Send a typed message over the open cloud session
    CloudSend { message: CloudOutbound },

    /// Stop all transport tasks
    Shutdown,
}

// ----------------------------------------------------------------------------
// App Events (Router → Embedding Layer)
// ----------------------------------------------------------------------------

/// Observations for the embedding UI or supervisor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AppEvent {
    /// Something wants to draw on the wearable display
    DisplayRequested {
        /// Requesting app, or `None` when the request came from the cloud
        sender: Option<PackageId>,
        request: DisplayRequest,
    },

    /// An app stopped; its display layers should be cleared
    DisplayReleased { package: PackageId },

    /// A transcript fragment from the speech pipeline
    Transcript {
        text: String,
        language: Option<String>,
        is_final: bool,
    },

    /// An app was started
    AppStarted { package: PackageId },

    /// An app was stopped
    AppStopped { package: PackageId },

    /// The app catalog was rebuilt
    CatalogUpdated { apps: Vec<EdgeApp> },

    /// A full status snapshot, in response to a request or a state change
    StatusReport { status: CoreStatus },

    /// The embedder should raise (true) or drop (false) the device link
    WearableLinkRequested { connect: bool },

    /// The wearable device link came up
    WearableConnected { kind: DeviceKind },

    /// The wearable device link went down
    WearableDisconnected,

    /// The cloud session became usable or stopped being usable
    CloudSessionChanged { connected: bool },

    /// The cloud changed the microphone state
    MicrophoneStateChanged { enabled: bool },

    /// A non-fatal error worth surfacing
    ErrorOccurred { error: String },
}

// ----------------------------------------------------------------------------
// Transport Identification
// ----------------------------------------------------------------------------

/// The three channels the router demultiplexes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Handset-facing wireless link
    Wireless,
    /// Local process bus
    Bus,
    /// Cloud backend session
    Cloud,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Wireless => write!(f, "wireless"),
            ChannelKind::Bus => write!(f, "bus"),
            ChannelKind::Cloud => write!(f, "cloud"),
        }
    }
}

/// Operational status of a transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportStatus {
    /// Running and able to carry traffic
    Active,
    /// Deliberately stopped
    Disabled,
    /// Wanted but unusable (radio off, socket path busy, endpoint down)
    Unavailable,
}

impl std::fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportStatus::Active => write!(f, "active"),
            TransportStatus::Disabled => write!(f, "disabled"),
            TransportStatus::Unavailable => write!(f, "unavailable"),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
