//! Transport Task Trait Definition
//!
//! Defines the common interface for transport tasks in the visor architecture.
//! Concrete implementations live in their respective crates (visor-ble,
//! visor-bus, visor-cloud).

use crate::{
    channel::{ChannelKind, EffectReceiver, EventSender},
    Result as VisorResult,
};

// ----------------------------------------------------------------------------
// Transport Task Trait
// ----------------------------------------------------------------------------

/// Common interface for transport tasks
///
/// Transport tasks are independent async tasks that each own one of the
/// router's channels (wireless, bus, cloud). They communicate with the
/// router task via CSP channels and execute the effects addressed to them.
///
/// ## Architecture
///
/// Each transport task:
/// - Runs independently with its own async event loop via the `run()` method
/// - Receives effects from the router via `EffectReceiver` and ignores
///   variants meant for other channels
/// - Sends events to the router via `EventSender`
/// - Maintains no shared state with other tasks
/// - Lifecycle (spawning/aborting) is managed by `VisorRuntime`
#[async_trait::async_trait]
pub trait TransportTask: Send + Sync {
    /// Attach CSP channels created by the runtime
    ///
    /// Implementations must store these handles internally and use them for
    /// all communication with the router task.
    fn attach_channels(
        &mut self,
        event_sender: EventSender,
        effect_receiver: EffectReceiver,
    ) -> VisorResult<()>;

    /// Run the transport's main event loop
    ///
    /// This future should run until shutdown. The implementation should
    /// handle initialization, process effects from the router, and perform
    /// cleanup when the future is cancelled. Teardown must tolerate being
    /// invoked when the transport never fully started.
    async fn run(&mut self) -> VisorResult<()>;

    /// Which of the router's channels this task serves
    fn channel_kind(&self) -> ChannelKind;
}
