//! Visor Runtime
//!
//! Provides runtime management for setting up and coordinating the router
//! task and transport tasks across different environments (CLI, tests,
//! embedded hosts).
//!
//! ## Generic Architecture
//!
//! The [`VisorRuntime`] can manage any number of transport implementations,
//! allowing different applications to plug in their own channel transports
//! while keeping the router logic unchanged.
//!
//! ### For Application Developers
//!
//! When building a host application, you register the transport tasks you
//! need and start the runtime:
//!
//! ```rust,no_run
//! use visor_core::{ChannelKind, TransportTask, VisorConfig};
//! use visor_runtime::{PlatformServices, VisorRuntime};
//!
//! // Example: a host that only speaks to the local process bus
//! # struct BusTransportTask;
//! # #[async_trait::async_trait]
//! # impl TransportTask for BusTransportTask {
//! #     fn attach_channels(
//! #         &mut self,
//! #         _event_sender: visor_core::channel::EventSender,
//! #         _effect_receiver: visor_core::channel::EffectReceiver,
//! #     ) -> visor_core::VisorResult<()> { Ok(()) }
//! #     async fn run(&mut self) -> visor_core::VisorResult<()> { Ok(()) }
//! #     fn channel_kind(&self) -> ChannelKind { ChannelKind::Bus }
//! # }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = VisorConfig::default();
//! let platform = PlatformServices::memory();
//! let mut runtime = VisorRuntime::new(config, platform)?;
//!
//! // Register transport tasks
//! # let bus_transport = BusTransportTask;
//! runtime.add_transport(bus_transport)?;
//!
//! // Start the runtime (which spawns transport.run() for each transport)
//! runtime.start().await?;
//!
//! // Drive it through the command channel, drain app events, then stop
//! runtime.stop().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ### For Testing
//!
//! [`VisorRuntime::for_testing`] pairs the testing configuration with
//! in-memory platform services so integration tests never touch the host.

use crate::logic::Router;
use crate::platform::PlatformServices;
use std::collections::HashMap;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use visor_core::{
    channel::{
        create_app_event_channel, create_audio_channel, create_command_channel,
        create_effect_channel, create_effect_receiver, create_event_channel, AppEventReceiver,
        AudioReceiver, AudioSender, CommandSender, EffectReceiver, EventSender,
    },
    ChannelKind, SharedVisorConfig, TransportTask, VisorConfig, VisorError, VisorResult,
};

// ----------------------------------------------------------------------------
// Visor Runtime
// ----------------------------------------------------------------------------

/// Runtime for coordinating the router task and its transport tasks
///
/// The runtime can manage any number of transport implementations, allowing
/// different hosts (CLI, tests, embedded shells) to plug in their own
/// transport tasks while keeping the router logic unchanged. Starting with
/// no transports at all is also supported; the router then serves only the
/// embedder's command channel, and effects addressed to absent channels are
/// dropped.
///
/// ## Design Trade-offs
///
/// All routing decisions are serialized through a single [`Router`] task.
/// That gives every piece of shared state exactly one writer, at the cost of
/// putting the router on the critical path of every channel. Audio is the one
/// stream that bypasses it: microphone frames travel on a dedicated channel
/// created here and handed straight to the cloud transport.
pub struct VisorRuntime {
    /// Configuration shared with every spawned task
    config: SharedVisorConfig,
    /// Host-provided platform services (scanner, inspector, stores)
    platform: PlatformServices,
    /// Foreground state the router's connection policy starts from
    initial_foreground: bool,
    /// Registered transport tasks (before start)
    pending_transports: Vec<Box<dyn TransportTask>>,
    /// Running transport task handles (after start)
    transport_handles: HashMap<ChannelKind, JoinHandle<VisorResult<()>>>,
    /// Router task handle
    router_handle: Option<JoinHandle<VisorResult<()>>>,
    /// Command sender for external use
    command_sender: Option<CommandSender>,
    /// App event receiver for external use
    app_event_receiver: Option<AppEventReceiver>,
    /// Producer side of the microphone stream
    audio_sender: AudioSender,
    /// Consumer side of the microphone stream, claimed by the cloud transport
    audio_receiver: Option<AudioReceiver>,
    /// Whether the runtime is currently running
    running: bool,
}

impl VisorRuntime {
    /// Create a new runtime with the given configuration and platform services
    ///
    /// Validates the configuration up front; every later channel allocation
    /// relies on the buffer sizes being non-zero.
    pub fn new(config: VisorConfig, platform: PlatformServices) -> VisorResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config.shared(), platform))
    }

    /// Create a runtime with the testing configuration and in-memory services
    pub fn for_testing(platform: PlatformServices) -> Self {
        Self::assemble(VisorConfig::testing().shared(), platform)
    }

    fn assemble(config: SharedVisorConfig, platform: PlatformServices) -> Self {
        // The audio channel exists before start() so hosts can hand the
        // receiver to their cloud transport while wiring transports up.
        let (audio_sender, audio_receiver) = create_audio_channel(&config.channels);
        Self {
            config,
            platform,
            initial_foreground: false,
            pending_transports: Vec::new(),
            transport_handles: HashMap::new(),
            router_handle: None,
            command_sender: None,
            app_event_receiver: None,
            audio_sender,
            audio_receiver: Some(audio_receiver),
            running: false,
        }
    }

    /// Set the foreground state the connection policy is constructed with
    ///
    /// Takes effect at [`start`](Self::start); changing it afterwards does
    /// nothing until the next start.
    pub fn set_initial_foreground(&mut self, foreground: bool) {
        self.initial_foreground = foreground;
    }

    /// Register a transport task to be started with the runtime
    ///
    /// Transport tasks must be added before calling [`start`](Self::start).
    /// Each channel kind can be served by at most one transport.
    pub fn add_transport<T: TransportTask + 'static>(&mut self, transport: T) -> VisorResult<()> {
        if self.running {
            return Err(VisorError::config_error(
                "Cannot add transports while the runtime is running",
            ));
        }

        let kind = transport.channel_kind();
        for existing in &self.pending_transports {
            if existing.channel_kind() == kind {
                return Err(VisorError::config_error(format!(
                    "A transport for the {kind} channel is already registered"
                )));
            }
        }

        self.pending_transports.push(Box::new(transport));
        Ok(())
    }

    /// Start the runtime
    ///
    /// Spawns the router task and every registered transport task. On
    /// failure the partially started tasks are aborted before the error is
    /// returned, so a retry begins from a clean slate.
    pub async fn start(&mut self) -> VisorResult<()> {
        if self.running {
            return Err(VisorError::config_error("Runtime is already running"));
        }

        // Channel plumbing: commands and events flow into the router,
        // effects fan out to every transport, app events flow back to the
        // embedder. The initial effect receiver is dropped; each transport
        // subscribes to the broadcast channel itself below.
        let (command_sender, command_receiver) = create_command_channel(&self.config.channels);
        let (event_sender, event_receiver) = create_event_channel(&self.config.channels);
        let (effect_sender, _initial_effect_receiver) =
            create_effect_channel(&self.config.channels);
        let (app_event_sender, app_event_receiver) =
            create_app_event_channel(&self.config.channels);

        self.command_sender = Some(command_sender);
        self.app_event_receiver = Some(app_event_receiver);

        let mut router = Router::new(
            self.config.clone(),
            self.platform.clone(),
            self.initial_foreground,
            command_receiver,
            event_receiver,
            effect_sender.clone(),
            app_event_sender,
        );
        self.router_handle = Some(tokio::spawn(async move { router.run().await }));

        // Collect kinds before draining so the handles can be keyed
        let kinds: Vec<_> = self
            .pending_transports
            .iter()
            .map(|t| t.channel_kind())
            .collect();
        let transports = self.pending_transports.drain(..).collect::<Vec<_>>();

        for (i, transport) in transports.into_iter().enumerate() {
            let kind = kinds[i];
            // Each transport gets its own subscription to the broadcast
            // effect channel
            let transport_effect_receiver = create_effect_receiver(&effect_sender);
            match self.start_transport_task(transport, event_sender.clone(), transport_effect_receiver)
            {
                Ok(handle) => {
                    self.transport_handles.insert(kind, handle);
                }
                Err(e) => {
                    self.abort_tasks();
                    self.command_sender = None;
                    self.app_event_receiver = None;
                    return Err(e);
                }
            }
        }

        self.running = true;

        info!(
            transports = self.transport_handles.len(),
            "Visor runtime started"
        );

        Ok(())
    }

    /// Stop the runtime
    ///
    /// Aborts the router and transport tasks. Safe to call when the runtime
    /// was never started or has already been stopped.
    pub async fn stop(&mut self) -> VisorResult<()> {
        if !self.running {
            return Ok(());
        }

        self.running = false;
        self.abort_tasks();

        // Clear channels
        self.command_sender = None;
        self.app_event_receiver = None;

        info!("Visor runtime stopped");

        Ok(())
    }

    /// Get command sender for external use
    pub fn command_sender(&self) -> Option<&CommandSender> {
        self.command_sender.as_ref()
    }

    /// Take app event receiver for external use
    pub fn take_app_event_receiver(&mut self) -> Option<AppEventReceiver> {
        self.app_event_receiver.take()
    }

    /// Get a handle for pushing microphone frames toward the cloud
    pub fn audio_sender(&self) -> AudioSender {
        self.audio_sender.clone()
    }

    /// Take the microphone stream receiver
    ///
    /// The host hands this to its cloud transport before starting the
    /// runtime. Returns `None` once claimed.
    pub fn take_audio_receiver(&mut self) -> Option<AudioReceiver> {
        self.audio_receiver.take()
    }

    /// Check if the runtime is running
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Get configuration
    pub fn config(&self) -> &VisorConfig {
        &self.config
    }

    /// Get the list of registered channel kinds
    pub fn channel_kinds(&self) -> Vec<ChannelKind> {
        if self.running {
            self.transport_handles.keys().copied().collect()
        } else {
            self.pending_transports
                .iter()
                .map(|t| t.channel_kind())
                .collect()
        }
    }

    /// Check if a transport is registered for the given channel
    pub fn has_transport(&self, kind: ChannelKind) -> bool {
        if self.running {
            self.transport_handles.contains_key(&kind)
        } else {
            self.pending_transports
                .iter()
                .any(|t| t.channel_kind() == kind)
        }
    }

    /// Start a single transport task
    fn start_transport_task(
        &self,
        mut transport: Box<dyn TransportTask>,
        event_sender: EventSender,
        effect_receiver: EffectReceiver,
    ) -> VisorResult<JoinHandle<VisorResult<()>>> {
        let kind = transport.channel_kind();

        transport.attach_channels(event_sender, effect_receiver)?;

        debug!(channel = %kind, "Starting transport task");

        let handle = tokio::spawn(async move {
            // The transport owns its lifecycle from here; teardown runs
            // when this future is cancelled.
            transport.run().await
        });

        Ok(handle)
    }

    fn abort_tasks(&mut self) {
        for (kind, handle) in self.transport_handles.drain() {
            debug!(channel = %kind, "Stopping transport task");
            handle.abort();
        }
        if let Some(handle) = self.router_handle.take() {
            handle.abort();
        }
    }
}

impl Drop for VisorRuntime {
    fn drop(&mut self) {
        if self.running {
            // Abort tasks if the runtime is dropped while running
            for handle in self.transport_handles.values() {
                handle.abort();
            }
            if let Some(ref handle) = self.router_handle {
                handle.abort();
            }
        }
    }
}
