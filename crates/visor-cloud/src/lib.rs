//! Cloud transport for Visor
//!
//! Maintains the single WebSocket session to the backend: flat tagged JSON
//! as text frames, raw audio as binary frames. The session is opened and
//! closed on router effects and never reconnects on its own; when it fails,
//! the failure is reported and the connection policy decides what happens
//! next.

mod session;
mod transport;

// Public API exports
pub use session::{CloudSession, SessionEvent};
pub use transport::CloudTransportTask;

// Re-export the transport trait for embedders wiring this crate up
pub use visor_core::TransportTask;
