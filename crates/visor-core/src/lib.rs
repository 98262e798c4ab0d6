//! Visor Core Protocol and Policy Logic
//!
//! This crate provides the foundational types for the visor wearable
//! companion runtime: the typed channel vocabulary, wire protocols for the
//! wireless, bus, and cloud channels, chunked message framing, the app
//! catalog model, and the cloud connection policy. Everything here is pure
//! logic; the transport crates and the runtime own the I/O.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod auth;
pub mod channel;
pub mod chunking;
pub mod config;
pub mod device;
pub mod errors;
pub mod policy;
pub mod protocol;
pub mod registry;
pub mod transport_task;
pub mod types;
pub mod wireless;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use auth::{AuthState, TokenStatus};
pub use channel::{AppEvent, ChannelKind, Command, Effect, Event, TransportStatus};
pub use chunking::{chunk_message, ChunkHeader, ChunkReassembler};
pub use config::{SharedVisorConfig, VisorConfig, VisorConfigBuilder};
pub use device::{CapabilitySet, DeviceKind, DeviceLinkStatus};
pub use errors::{Result, VisorError, VisorResult};
pub use policy::{ConnectionPolicy, PolicyDirective};
pub use registry::{AppDescriptor, AppKind, EdgeApp, InstalledApp};
pub use transport_task::TransportTask;
pub use types::{CentralId, PackageId, SystemTimeSource, TimeSource, Timestamp};
pub use wireless::WirelessSession;
