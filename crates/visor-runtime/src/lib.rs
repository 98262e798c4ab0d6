//! Visor Runtime Engine
//!
//! This crate contains the routing engine for the visor companion runtime,
//! including:
//! - `VisorRuntime`: The main orchestrator that manages transport tasks
//! - `Router`: The central state machine demultiplexing all three channels
//! - App registry, auth, and connection policy managers
//! - The platform service traits hosts implement
//!
//! This is the "engine" of the system - it orchestrates message routing and
//! app lifecycle while `visor-core` provides the stable protocol and policy
//! definitions.

pub mod logic;
pub mod managers;
pub mod platform;
mod runtime;

pub use logic::{CloudSessionState, Router, RouterState, RouterStats};
pub use managers::*;
pub use platform::{
    AppScanner, CatalogStore, MemoryAppScanner, MemoryCatalogStore, MemoryProcessInspector,
    MemoryTokenStore, PlatformServices, ProcessInspector, TokenStore,
};
pub use runtime::*;

// Re-export core types for convenience
pub use visor_core::{
    channel::{
        create_app_event_channel, create_audio_channel, create_command_channel,
        create_effect_channel, create_effect_receiver, create_event_channel, AppEventReceiver,
        AppEventSender, AudioReceiver, AudioSender, CommandReceiver, CommandSender, EffectReceiver,
        EffectSender, EventReceiver, EventSender, NonBlockingSend,
    },
    AppEvent, ChannelKind, Command, Effect, Event, PackageId, TransportStatus, TransportTask,
    VisorError, VisorResult,
};
