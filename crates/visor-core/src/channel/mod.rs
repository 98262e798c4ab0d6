//! Channel Module
//!
//! This module contains the CSP (Communicating Sequential Processes) channel infrastructure:
//! - `communication`: Core channel types, commands, events, effects, and app events
//! - `utils`: Channel creation helpers and non-blocking send support

pub mod communication;
pub mod utils;

// Re-export communication types
pub use communication::{AppEvent, ChannelKind, Command, Effect, Event, TransportStatus};

// Re-export ChannelConfig from config module
pub use crate::config::ChannelConfig;

// Re-export utility types
pub use utils::{
    create_app_event_channel, create_audio_channel, create_command_channel, create_effect_channel,
    create_effect_receiver, create_event_channel, AppEventReceiver, AppEventSender, AudioReceiver,
    AudioSender, CommandReceiver, CommandSender, EffectReceiver, EffectSender, EventReceiver,
    EventSender, NonBlockingSend,
};
