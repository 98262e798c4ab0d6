//! Protocol Module
//!
//! Wire-level message definitions for the three channels the router serves:
//! - `bus`: process bus frames and envelopes
//! - `cloud`: cloud session messages, both directions
//! - `display`: display request payloads shared by bus and cloud
//! - `manager`: handset manager vocabulary and status reporting

pub mod bus;
pub mod cloud;
pub mod display;
pub mod manager;

pub use bus::{BusEnvelope, BusHello, BusMessage, BusTier, CoreBusMessage};
pub use cloud::{
    AudioFrame, CloudInbound, CloudOutbound, HeadPosition, PhoneNotification, PressKind,
    StreamConfig, StreamKind,
};
pub use display::{DisplayRequest, DisplayView};
pub use manager::{AppSummary, CoreStatus, ManagerCommand, ManagerNotice, NotifyLevel};
