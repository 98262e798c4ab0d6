//! Peripheral link abstraction and platform dispatch
//!
//! A [`PeripheralLink`] owns the platform radio: it advertises the service,
//! accepts one central, and surfaces everything that happens as
//! [`LinkEvent`]s on a channel the transport task selects over. The
//! transport never touches platform APIs directly, which keeps its
//! state machine testable against the in-process [`LoopbackLink`].

pub mod fallback;
#[cfg(target_os = "linux")]
pub mod linux;
pub mod loopback;

pub use loopback::{LoopbackHandle, LoopbackLink};

use tokio::sync::mpsc;
use visor_core::{CentralId, VisorResult};

use visor_core::config::WirelessConfig;

// ----------------------------------------------------------------------------
// Link Events
// ----------------------------------------------------------------------------

/// Something the radio observed
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A central subscribed to notifications
    CentralConnected { central: CentralId },
    /// The central dropped the connection
    CentralDisconnected { central: CentralId },
    /// One inbound write; `is_final` marks the end of a write transaction
    Write {
        central: CentralId,
        data: Vec<u8>,
        is_final: bool,
    },
    /// The central negotiated a new MTU
    MtuChanged { central: CentralId, mtu: usize },
    /// The radio was switched on or off underneath us
    RadioStateChanged { available: bool },
    /// A bonding attempt was rejected or fell apart
    PairingFailed { reason: String },
}

// ----------------------------------------------------------------------------
// Peripheral Link Trait
// ----------------------------------------------------------------------------

/// Platform radio in the peripheral role
#[async_trait::async_trait]
pub trait PeripheralLink: Send + Sync {
    /// Register the GATT service and start advertising
    async fn start(&mut self, config: &WirelessConfig) -> VisorResult<()>;

    /// Tear down advertising and the GATT service; safe to call repeatedly
    async fn stop(&mut self) -> VisorResult<()>;

    /// Whether the service is currently up
    fn is_active(&self) -> bool;

    /// Push one notification frame to the subscribed central
    async fn notify(&mut self, frame: &[u8]) -> VisorResult<()>;
}

// ----------------------------------------------------------------------------
// Platform Dispatch
// ----------------------------------------------------------------------------

/// Platform-selected link implementation
pub enum PlatformLink {
    #[cfg(target_os = "linux")]
    BlueZ(linux::BlueZLink),
    Loopback(LoopbackLink),
    #[allow(dead_code)]
    Fallback(fallback::FallbackLink),
}

impl PlatformLink {
    /// Create the link for the current platform
    pub fn new(events: mpsc::Sender<LinkEvent>) -> Self {
        #[cfg(target_os = "linux")]
        {
            Self::BlueZ(linux::BlueZLink::new(events))
        }
        #[cfg(not(target_os = "linux"))]
        {
            Self::Fallback(fallback::FallbackLink::new(events))
        }
    }

    /// Create an in-process link paired with a handle acting as the central
    pub fn loopback(events: mpsc::Sender<LinkEvent>) -> (Self, LoopbackHandle) {
        let (link, handle) = LoopbackLink::pair(events);
        (Self::Loopback(link), handle)
    }
}

#[async_trait::async_trait]
impl PeripheralLink for PlatformLink {
    async fn start(&mut self, config: &WirelessConfig) -> VisorResult<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::BlueZ(link) => link.start(config).await,
            Self::Loopback(link) => link.start(config).await,
            Self::Fallback(link) => link.start(config).await,
        }
    }

    async fn stop(&mut self) -> VisorResult<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::BlueZ(link) => link.stop().await,
            Self::Loopback(link) => link.stop().await,
            Self::Fallback(link) => link.stop().await,
        }
    }

    fn is_active(&self) -> bool {
        match self {
            #[cfg(target_os = "linux")]
            Self::BlueZ(link) => link.is_active(),
            Self::Loopback(link) => link.is_active(),
            Self::Fallback(link) => link.is_active(),
        }
    }

    async fn notify(&mut self, frame: &[u8]) -> VisorResult<()> {
        match self {
            #[cfg(target_os = "linux")]
            Self::BlueZ(link) => link.notify(frame).await,
            Self::Loopback(link) => link.notify(frame).await,
            Self::Fallback(link) => link.notify(frame).await,
        }
    }
}
