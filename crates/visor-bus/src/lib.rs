//! Process bus transport for Visor
//!
//! Edge apps on the device talk to the core over a local Unix socket with
//! newline-delimited JSON frames. This crate provides the broker (the
//! listening side the core runs), a client for apps, and the transport task
//! that bridges the broker onto the router channels.
//!
//! The broker stamps every inbound message with the identity its connection
//! introduced itself as, so authorization decisions downstream never rely on
//! anything a payload claims about its sender.

mod broker;
mod client;
mod transport;

// Public API exports
pub use broker::BusBroker;
pub use client::BusClient;
pub use transport::BusTransportTask;

// Re-export the transport trait for embedders wiring this crate up
pub use visor_core::TransportTask;
