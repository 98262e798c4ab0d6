//! Wireless (BLE peripheral) transport for Visor
//!
//! This crate implements the wireless channel of the core runtime: the device
//! advertises a single GATT service and lets one manager central at a time
//! connect, write JSON frames, and receive paced, chunked notifications.
//!
//! ## Architecture
//!
//! - [`protocol`] - GATT identifiers shared with the manager app
//! - `link` - peripheral link backends: BlueZ on Linux, an in-process
//!   loopback for co-located managers and tests, and a fallback that only
//!   reports the platform gap
//! - [`transport`] - the transport task bridging link events onto the
//!   router channels
//!
//! ## Usage
//!
//! ```rust,no_run
//! use visor_ble::WirelessTransportTask;
//! use visor_core::channel::{create_effect_channel, create_event_channel};
//! use visor_core::config::{ChannelConfig, WirelessConfig};
//! use visor_core::TransportTask;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let channels = ChannelConfig::default();
//! let (event_sender, _event_receiver) = create_event_channel(&channels);
//! let (_effect_sender, effect_receiver) = create_effect_channel(&channels);
//!
//! let mut transport = WirelessTransportTask::new(WirelessConfig::default());
//! transport.attach_channels(event_sender, effect_receiver)?;
//! tokio::spawn(async move { transport.run().await });
//! # Ok(())
//! # }
//! ```
//!
//! ## Platform Support
//!
//! - **Linux**: full peripheral role via `bluer` with BlueZ (advertising,
//!   GATT service, just-works pairing agent)
//! - **Other platforms**: no peripheral role; the loopback link still works,
//!   so a co-located manager is unaffected

mod link;
pub mod protocol;
mod transport;

// Public API exports
pub use link::{LinkEvent, LoopbackHandle, LoopbackLink, PeripheralLink, PlatformLink};
pub use protocol::{VISOR_CHARACTERISTIC_UUID, VISOR_SERVICE_UUID};
pub use transport::WirelessTransportTask;

// Re-export the transport trait for embedders wiring this crate up
pub use visor_core::TransportTask;
