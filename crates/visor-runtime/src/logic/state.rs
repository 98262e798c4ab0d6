//! Router State Management
//!
//! Contains the router's application state and statistics. All of it is owned
//! by the router task; the channel system means nothing here needs a lock.

use std::collections::BTreeMap;

use tracing::warn;
use visor_core::config::SharedVisorConfig;
use visor_core::device::DeviceLinkStatus;
use visor_core::policy::ConnectionPolicy;
use visor_core::protocol::cloud::StreamConfig;
use visor_core::types::{CentralId, PackageId, SystemTimeSource, TimeSource, Timestamp};

use crate::managers::{AppRegistry, AuthManager};
use crate::platform::PlatformServices;

// ----------------------------------------------------------------------------
// Router State
// ----------------------------------------------------------------------------

/// Application state owned by the router task
pub struct RouterState {
    /// Shared runtime configuration
    pub config: SharedVisorConfig,
    /// App catalog and believed-running set
    pub registry: AppRegistry,
    /// Auth token and its verification status
    pub auth: AuthManager,
    /// Desired-connection derivation
    pub policy: ConnectionPolicy,
    /// Platform integration seams
    pub platform: PlatformServices,
    /// Wearable link as last reported
    pub wearable: DeviceLinkStatus,
    /// Whether manager traffic is routed over the bus instead of the radio
    pub loopback: bool,
    /// Cloud session lifecycle
    pub cloud: CloudSessionState,
    /// The connected central, if any
    pub central: Option<CentralId>,
    /// Per-app speech stream subscriptions
    pub speech_subscribers: BTreeMap<PackageId, SpeechSubscription>,
    /// Per-app registered voice command phrases
    pub voice_commands: BTreeMap<PackageId, Vec<String>>,
    /// Stream set last pushed to the cloud
    pub active_streams: Vec<StreamConfig>,
    /// Microphone state as dictated by the cloud
    pub microphone_enabled: bool,
    /// Wall-clock source for outbound timestamps
    pub time_source: SystemTimeSource,
    /// Statistics
    pub stats: RouterStats,
}

impl RouterState {
    /// Create router state, adopting whatever the platform stores hold
    ///
    /// A broken token or catalog store degrades to an empty start rather
    /// than preventing one.
    pub fn new(
        config: SharedVisorConfig,
        platform: PlatformServices,
        initial_foreground: bool,
    ) -> Self {
        let auth = match AuthManager::load(platform.token_store.clone()) {
            Ok(auth) => auth,
            Err(e) => {
                warn!("Token store unreadable, starting without a token: {}", e);
                AuthManager::empty(platform.token_store.clone())
            }
        };

        let mut registry = AppRegistry::new();
        match platform.catalog_store.load() {
            Ok(apps) => registry.load_catalog(apps),
            Err(e) => warn!("Catalog store unreadable, starting empty: {}", e),
        }

        Self {
            config,
            registry,
            auth,
            policy: ConnectionPolicy::new(initial_foreground),
            platform,
            wearable: DeviceLinkStatus::default(),
            loopback: false,
            cloud: CloudSessionState::Closed,
            central: None,
            speech_subscribers: BTreeMap::new(),
            voice_commands: BTreeMap::new(),
            active_streams: Vec::new(),
            microphone_enabled: true,
            time_source: SystemTimeSource,
            stats: RouterStats::default(),
        }
    }

    /// Current wall-clock time in epoch milliseconds
    pub fn now(&self) -> Timestamp {
        self.time_source.now()
    }
}

// ----------------------------------------------------------------------------
// Cloud Session State
// ----------------------------------------------------------------------------

/// Lifecycle of the single cloud session
///
/// `Pending` means a connect directive has been issued but the socket is not
/// up yet; `Open` means the socket is up but the server has not acknowledged
/// the session. Only `Ready` counts as connected for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CloudSessionState {
    #[default]
    Closed,
    Pending,
    Open,
    Ready {
        session_id: Option<String>,
    },
}

impl CloudSessionState {
    pub fn is_closed(&self) -> bool {
        matches!(self, CloudSessionState::Closed)
    }

    /// Whether the socket is up, acknowledged or not
    pub fn is_open(&self) -> bool {
        matches!(self, CloudSessionState::Open | CloudSessionState::Ready { .. })
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, CloudSessionState::Ready { .. })
    }
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// One app's speech stream request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSubscription {
    pub source_language: String,
    /// Present for translation streams, absent for plain transcription
    pub target_language: Option<String>,
}

/// Statistics for the router task
#[derive(Debug, Clone, Default)]
pub struct RouterStats {
    pub commands_processed: u64,
    pub events_processed: u64,
    pub effects_generated: u64,
    pub app_events_generated: u64,
    /// Gated bus messages dropped for lack of authorization
    pub unauthorized_drops: u64,
    /// Frames dropped because they failed to parse
    pub malformed_dropped: u64,
    pub reconcile_passes: u64,
}
