//! Bus transport task
//!
//! Runs the broker and bridges it onto the router channels: stamped
//! envelopes become [`Event::BusEnvelope`]s, and publish effects turn into
//! targeted or broadcast deliveries.

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};
use visor_core::channel::{EffectReceiver, EventSender};
use visor_core::config::BusConfig;
use visor_core::errors::VisorError;
use visor_core::protocol::bus::BusEnvelope;
use visor_core::{ChannelKind, Effect, Event, TransportStatus, TransportTask, VisorResult};

use crate::broker::BusBroker;

/// Buffer between peer connections and the transport loop
const INBOUND_BUFFER: usize = 64;

// ----------------------------------------------------------------------------
// Bus Transport Task
// ----------------------------------------------------------------------------

pub struct BusTransportTask {
    event_sender: Option<EventSender>,
    effect_receiver: Option<EffectReceiver>,
    inbound: Option<mpsc::Receiver<BusEnvelope>>,
    broker: BusBroker,
}

impl BusTransportTask {
    pub fn new(config: BusConfig) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        Self {
            event_sender: None,
            effect_receiver: None,
            inbound: Some(inbound_rx),
            broker: BusBroker::new(config.socket_path, inbound_tx),
        }
    }

    async fn run_internal(&mut self) -> VisorResult<()> {
        let event_sender = self
            .event_sender
            .take()
            .ok_or_else(|| VisorError::channel_error("bus transport started without channels"))?;
        let mut effect_receiver = self
            .effect_receiver
            .take()
            .ok_or_else(|| VisorError::channel_error("bus transport started without channels"))?;
        let mut inbound = self
            .inbound
            .take()
            .ok_or_else(|| VisorError::channel_error("bus transport inbound already consumed"))?;

        match self.broker.start().await {
            Ok(()) => {
                self.send_status(&event_sender, TransportStatus::Active).await;
            }
            Err(e) => {
                warn!("Bus unavailable: {}", e);
                self.send_status(&event_sender, TransportStatus::Unavailable)
                    .await;
            }
        }

        loop {
            tokio::select! {
                effect = effect_receiver.recv() => {
                    match effect {
                        Ok(Effect::BusPublish { target, message }) => {
                            self.broker.deliver(target.as_ref(), &message).await;
                        }
                        Ok(Effect::Shutdown) => break,
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Bus transport lagged, skipped {} effects", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                envelope = inbound.recv() => {
                    match envelope {
                        Some(envelope) => {
                            if event_sender
                                .send(Event::BusEnvelope { envelope })
                                .await
                                .is_err()
                            {
                                warn!("Event channel closed; router is gone");
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }

        self.broker.stop().await;
        info!("Bus transport stopped");
        Ok(())
    }

    async fn send_status(&self, event_sender: &EventSender, status: TransportStatus) {
        let event = Event::TransportStatusChanged {
            channel: ChannelKind::Bus,
            status,
        };
        if event_sender.send(event).await.is_err() {
            warn!("Event channel closed; router is gone");
        }
    }
}

#[async_trait::async_trait]
impl TransportTask for BusTransportTask {
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
        ChannelKind::Bus
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
