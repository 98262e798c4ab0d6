//! Wireless transport task
//!
//! Owns the peripheral link and bridges it onto the router channels: link
//! events become [`Event`]s, wireless effects drive advertising and the
//! paced, chunked notification path. One central is tracked at a time; a
//! write from a different address adopts it and discards the previous
//! reassembly state.

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tracing::{debug, info, warn};
use visor_core::channel::{EffectReceiver, EventSender};
use visor_core::chunking::chunk_message;
use visor_core::config::WirelessConfig;
use visor_core::errors::VisorError;
use visor_core::{
    ChannelKind, Effect, Event, TransportStatus, TransportTask, VisorResult, WirelessSession,
};

use crate::link::{LinkEvent, LoopbackHandle, PeripheralLink, PlatformLink};

/// Buffer between the link callbacks and the transport loop
const LINK_EVENT_BUFFER: usize = 32;

// ----------------------------------------------------------------------------
// Wireless Transport Task
// ----------------------------------------------------------------------------

pub struct WirelessTransportTask {
    config: WirelessConfig,
    event_sender: Option<EventSender>,
    effect_receiver: Option<EffectReceiver>,
    link: PlatformLink,
    link_events: Option<mpsc::Receiver<LinkEvent>>,
    session: Option<WirelessSession>,
    /// The link should be advertising whenever the radio allows it
    want_active: bool,
    /// Deadline for the post-pairing-failure restart
    restart_at: Option<Instant>,
}

impl WirelessTransportTask {
    /// Create a transport backed by the platform link
    pub fn new(config: WirelessConfig) -> Self {
        let (link_tx, link_rx) = mpsc::channel(LINK_EVENT_BUFFER);
        Self::with_link(config, PlatformLink::new(link_tx), link_rx)
    }

    /// Create a transport backed by an in-process link, returning the
    /// handle that plays the central's side
    pub fn loopback(config: WirelessConfig) -> (Self, LoopbackHandle) {
        let (link_tx, link_rx) = mpsc::channel(LINK_EVENT_BUFFER);
        let (link, handle) = PlatformLink::loopback(link_tx);
        (Self::with_link(config, link, link_rx), handle)
    }

    fn with_link(
        config: WirelessConfig,
        link: PlatformLink,
        link_events: mpsc::Receiver<LinkEvent>,
    ) -> Self {
        Self {
            config,
            event_sender: None,
            effect_receiver: None,
            link,
            link_events: Some(link_events),
            session: None,
            want_active: false,
            restart_at: None,
        }
    }

    async fn run_internal(&mut self) -> VisorResult<()> {
        let event_sender = self.event_sender.take().ok_or_else(|| {
            VisorError::channel_error("wireless transport started without channels")
        })?;
        let mut effect_receiver = self.effect_receiver.take().ok_or_else(|| {
            VisorError::channel_error("wireless transport started without channels")
        })?;
        let mut link_events = self.link_events.take().ok_or_else(|| {
            VisorError::channel_error("wireless transport link already consumed")
        })?;

        self.want_active = true;
        match self.link.start(&self.config).await {
            Ok(()) => {
                info!("Wireless link up as '{}'", self.config.device_name);
                self.send_status(&event_sender, TransportStatus::Active).await;
            }
            Err(e) => {
                warn!("Wireless link unavailable: {}", e);
                self.send_status(&event_sender, TransportStatus::Unavailable)
                    .await;
            }
        }

        loop {
            tokio::select! {
                effect = effect_receiver.recv() => {
                    match effect {
                        Ok(effect) => {
                            if !self.process_effect(effect, &event_sender).await {
                                break;
                            }
                        }
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Wireless transport lagged, skipped {} effects", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                link_event = link_events.recv() => {
                    match link_event {
                        Some(event) => self.handle_link_event(event, &event_sender).await,
                        None => break,
                    }
                }
                _ = wait_until(self.restart_at) => {
                    self.restart_at = None;
                    if self.want_active {
                        self.restart(&event_sender).await;
                    }
                }
            }
        }

        let _ = self.link.stop().await;
        self.session = None;
        Ok(())
    }

    /// Apply one router effect; returns false when the loop should exit
    async fn process_effect(&mut self, effect: Effect, event_sender: &EventSender) -> bool {
        match effect {
            Effect::WirelessSend { message } => {
                self.send_paced(&message).await;
            }
            Effect::WirelessStart => {
                // A start on a running link tears it down first.
                self.want_active = true;
                self.restart_at = None;
                self.restart(event_sender).await;
            }
            Effect::WirelessStop => {
                self.want_active = false;
                self.restart_at = None;
                let _ = self.link.stop().await;
                self.session = None;
                self.send_status(event_sender, TransportStatus::Disabled).await;
            }
            Effect::Shutdown => return false,
            _ => {}
        }
        true
    }

    async fn handle_link_event(&mut self, event: LinkEvent, event_sender: &EventSender) {
        match event {
            LinkEvent::CentralConnected { central } => {
                info!("Central connected: {}", central);
                self.session = Some(WirelessSession::new(
                    central.clone(),
                    self.config.default_mtu,
                    self.config.max_message_size,
                ));
                self.forward(event_sender, Event::CentralConnected { central })
                    .await;
            }
            LinkEvent::CentralDisconnected { central } => {
                info!("Central disconnected: {}", central);
                if self.session_is(&central) {
                    self.session = None;
                }
                self.forward(event_sender, Event::CentralDisconnected { central })
                    .await;
            }
            LinkEvent::Write {
                central,
                data,
                is_final,
            } => {
                if !self.session_is(&central) {
                    // Adopt the writer; whatever was buffered belonged to a
                    // central that is gone.
                    self.session = Some(WirelessSession::new(
                        central.clone(),
                        self.config.default_mtu,
                        self.config.max_message_size,
                    ));
                    self.forward(
                        event_sender,
                        Event::CentralConnected {
                            central: central.clone(),
                        },
                    )
                    .await;
                }
                let result = match self.session.as_mut() {
                    Some(session) => session.append_write(&data, is_final),
                    None => return,
                };
                match result {
                    Ok(Some(payload)) => {
                        self.forward(event_sender, Event::WirelessMessage { central, payload })
                            .await;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        // The session already dropped its buffer.
                        warn!("Discarded inbound data from {}: {}", central, e);
                    }
                }
            }
            LinkEvent::MtuChanged { central, mtu } => {
                if let Some(session) = self.session.as_mut() {
                    if session.central() == &central {
                        match session.set_mtu(mtu) {
                            Ok(()) => debug!("MTU for {} is now {}", central, mtu),
                            Err(e) => warn!("Ignoring MTU {} from {}: {}", mtu, central, e),
                        }
                    }
                }
            }
            LinkEvent::RadioStateChanged { available } => {
                info!("Radio available: {}", available);
                self.forward(event_sender, Event::WirelessLinkState { available })
                    .await;
                if available {
                    if self.want_active && !self.link.is_active() {
                        self.restart(event_sender).await;
                    }
                } else {
                    let _ = self.link.stop().await;
                    self.session = None;
                    self.send_status(event_sender, TransportStatus::Unavailable)
                        .await;
                }
            }
            LinkEvent::PairingFailed { reason } => {
                warn!("Pairing failed: {}", reason);
                self.forward(
                    event_sender,
                    Event::PairingDenied {
                        reason: reason.clone(),
                    },
                )
                .await;
                let _ = self.link.stop().await;
                self.session = None;
                self.restart_at = Some(Instant::now() + self.config.pairing_backoff);
            }
        }
    }

    /// Tear the link down and bring it back up
    async fn restart(&mut self, event_sender: &EventSender) {
        let _ = self.link.stop().await;
        self.session = None;
        match self.link.start(&self.config).await {
            Ok(()) => {
                info!("Wireless link restarted");
                self.send_status(event_sender, TransportStatus::Active).await;
            }
            Err(e) => {
                warn!("Wireless restart failed: {}", e);
                self.send_status(event_sender, TransportStatus::Unavailable)
                    .await;
            }
        }
    }

    /// Notify the message to the central in paced, header-framed chunks.
    /// Delivery is fire and forget; a failed chunk abandons the rest.
    async fn send_paced(&mut self, message: &str) {
        let mtu = match self.session.as_ref() {
            Some(session) => session.mtu(),
            None => {
                debug!("No central; dropping {} byte outbound message", message.len());
                return;
            }
        };
        let chunks = match chunk_message(message.as_bytes(), mtu) {
            Ok(chunks) => chunks,
            Err(e) => {
                warn!("Cannot chunk outbound message: {}", e);
                return;
            }
        };
        let total = chunks.len();
        for (index, chunk) in chunks.iter().enumerate() {
            if index > 0 {
                sleep(self.config.chunk_delay).await;
            }
            if let Err(e) = self.link.notify(chunk).await {
                warn!("Notify failed on chunk {}/{}: {}", index + 1, total, e);
                return;
            }
        }
        debug!("Sent {} bytes in {} chunks", message.len(), total);
    }

    fn session_is(&self, central: &visor_core::CentralId) -> bool {
        self.session
            .as_ref()
            .map(|session| session.central() == central)
            .unwrap_or(false)
    }

    async fn forward(&self, event_sender: &EventSender, event: Event) {
        if event_sender.send(event).await.is_err() {
            warn!("Event channel closed; router is gone");
        }
    }

    async fn send_status(&self, event_sender: &EventSender, status: TransportStatus) {
        self.forward(
            event_sender,
            Event::TransportStatusChanged {
                channel: ChannelKind::Wireless,
                status,
            },
        )
        .await;
    }
}

/// Sleep until the deadline, or forever when there is none
async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => std::future::pending::<()>().await,
    }
}

#[async_trait::async_trait]
impl TransportTask for WirelessTransportTask {
    fn attach_channels(
        &mut self,
        event_sender: EventSender,
        effect_receiver: EffectReceiver,
    ) -> VisorResult<()> {
        self.event_sender = Some(event_sender);
        self.effect_receiver = Some(effect_receiver);
        Ok(())
    }

    async fn run(&mut self) -> VisorResult<()> {
        self.run_internal().await
    }

    fn channel_kind(&self) -> ChannelKind {
        ChannelKind::Wireless
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
