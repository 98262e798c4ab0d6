//! Cloud transport task
//!
//! Bridges the router channels onto one WebSocket session. Connects and
//! disconnects are idempotent; a failed session is reported and left closed,
//! reconnecting is the policy layer's call. Audio frames bypass the router
//! and are forwarded here, gated on the backend's acknowledgement with a
//! bounded drop-oldest queue in between.

use std::collections::VecDeque;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use visor_core::channel::{AudioReceiver, EffectReceiver, EventSender};
use visor_core::config::CloudConfig;
use visor_core::errors::{CloudError, VisorError};
use visor_core::protocol::cloud::{AudioFrame, CloudInbound};
use visor_core::{ChannelKind, Effect, Event, TransportStatus, TransportTask, VisorResult};

use crate::session::{CloudSession, SessionEvent};

// ----------------------------------------------------------------------------
// Cloud Transport Task
// ----------------------------------------------------------------------------

pub struct CloudTransportTask {
    config: CloudConfig,
    event_sender: Option<EventSender>,
    effect_receiver: Option<EffectReceiver>,
    audio: Option<AudioReceiver>,
}

impl CloudTransportTask {
    pub fn new(config: CloudConfig) -> Self {
        Self {
            config,
            event_sender: None,
            effect_receiver: None,
            audio: None,
        }
    }

    /// Attach the microphone stream this task forwards as binary frames
    pub fn attach_audio(&mut self, receiver: AudioReceiver) {
        self.audio = Some(receiver);
    }

    async fn run_internal(&mut self) -> VisorResult<()> {
        let event_sender = self
            .event_sender
            .take()
            .ok_or_else(|| VisorError::channel_error("cloud transport started without channels"))?;
        let mut effect_receiver = self.effect_receiver.take().ok_or_else(|| {
            VisorError::channel_error("cloud transport started without channels")
        })?;
        let mut audio = self.audio.take();

        let mut session: Option<CloudSession> = None;
        let mut session_rx: Option<mpsc::Receiver<SessionEvent>> = None;
        let mut pending_audio: VecDeque<AudioFrame> = VecDeque::new();
        // Armed while a session is open but unacknowledged.
        let mut ack_deadline: Option<tokio::time::Instant> = None;

        self.send_status(&event_sender, TransportStatus::Active).await;

        loop {
            tokio::select! {
                effect = effect_receiver.recv() => {
                    match effect {
                        Ok(Effect::CloudConnect { core_token }) => {
                            if session.is_some() {
                                debug!("Cloud connect ignored; session already open");
                                continue;
                            }
                            match CloudSession::open(&self.config.endpoint, &core_token).await {
                                Ok((opened, receiver)) => {
                                    session = Some(opened);
                                    session_rx = Some(receiver);
                                    ack_deadline = Some(
                                        tokio::time::Instant::now() + self.config.ack_timeout,
                                    );
                                    self.forward(&event_sender, Event::CloudOpened).await;
                                }
                                Err(e) => {
                                    warn!("Cloud connect failed: {}", e);
                                    self.forward(
                                        &event_sender,
                                        Event::CloudFailure {
                                            reason: e.to_string(),
                                        },
                                    )
                                    .await;
                                }
                            }
                        }
                        Ok(Effect::CloudDisconnect) => {
                            if let Some(open) = session.take() {
                                open.close().await;
                                session_rx = None;
                                pending_audio.clear();
                                ack_deadline = None;
                                self.forward(
                                    &event_sender,
                                    Event::CloudClosed {
                                        reason: Some("disconnected".to_string()),
                                    },
                                )
                                .await;
                            }
                        }
                        Ok(Effect::CloudSend { message }) => {
                            let failed = match session.as_mut() {
                                Some(open) => match open.send(&message).await {
                                    Ok(()) => None,
                                    Err(e) => Some(e.to_string()),
                                },
                                None => {
                                    debug!("Dropping cloud message; no session");
                                    None
                                }
                            };
                            if let Some(reason) = failed {
                                warn!("Cloud send failed: {}", reason);
                                if let Some(dead) = session.take() {
                                    dead.close().await;
                                }
                                session_rx = None;
                                pending_audio.clear();
                                ack_deadline = None;
                                self.forward(&event_sender, Event::CloudFailure { reason })
                                    .await;
                            }
                        }
                        Ok(Effect::Shutdown) => break,
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Cloud transport lagged, skipped {} effects", skipped);
                        }
                        Err(RecvError::Closed) => break,
                    }
                }
                event = next_session_event(&mut session_rx) => {
                    match event {
                        SessionEvent::Message(message) => {
                            if matches!(message, CloudInbound::ConnectionAck { .. }) {
                                ack_deadline = None;
                                if let Some(open) = session.as_mut() {
                                    open.mark_acked();
                                    if let Err(e) = drain_audio(open, &mut pending_audio).await {
                                        warn!("Cloud send failed: {}", e);
                                        if let Some(dead) = session.take() {
                                            dead.close().await;
                                        }
                                        session_rx = None;
                                        pending_audio.clear();
                                        self.forward(
                                            &event_sender,
                                            Event::CloudFailure {
                                                reason: e.to_string(),
                                            },
                                        )
                                        .await;
                                    }
                                }
                            }
                            self.forward(&event_sender, Event::CloudMessage { message })
                                .await;
                        }
                        SessionEvent::Closed { reason } => {
                            session = None;
                            session_rx = None;
                            pending_audio.clear();
                            ack_deadline = None;
                            self.forward(&event_sender, Event::CloudClosed { reason })
                                .await;
                        }
                        SessionEvent::Failed { reason } => {
                            if let Some(dead) = session.take() {
                                dead.close().await;
                            }
                            session_rx = None;
                            pending_audio.clear();
                            ack_deadline = None;
                            self.forward(&event_sender, Event::CloudFailure { reason })
                                .await;
                        }
                    }
                }
                _ = ack_overdue(&ack_deadline) => {
                    warn!(
                        "No connection_ack within {:?}; closing the session",
                        self.config.ack_timeout
                    );
                    if let Some(dead) = session.take() {
                        dead.close().await;
                    }
                    session_rx = None;
                    pending_audio.clear();
                    ack_deadline = None;
                    self.forward(
                        &event_sender,
                        Event::CloudFailure {
                            reason: "connection_ack timed out".to_string(),
                        },
                    )
                    .await;
                }
                frame = next_audio_frame(&mut audio) => {
                    match frame {
                        Some(frame) => match session.as_mut() {
                            Some(open) if open.is_acked() => {
                                if let Err(e) = open.send_audio(frame).await {
                                    warn!("Cloud send failed: {}", e);
                                    if let Some(dead) = session.take() {
                                        dead.close().await;
                                    }
                                    session_rx = None;
                                    pending_audio.clear();
                                    self.forward(
                                        &event_sender,
                                        Event::CloudFailure {
                                            reason: e.to_string(),
                                        },
                                    )
                                    .await;
                                }
                            }
                            Some(_) => {
                                // Session not acknowledged yet; hold the
                                // newest frames, oldest out first.
                                pending_audio.push_back(frame);
                                while pending_audio.len() > self.config.audio_queue_capacity {
                                    pending_audio.pop_front();
                                }
                            }
                            None => {}
                        },
                        None => {
                            // Microphone side is gone; keep serving the rest.
                            audio = None;
                        }
                    }
                }
            }
        }

        if let Some(open) = session.take() {
            open.close().await;
        }
        info!("Cloud transport stopped");
        Ok(())
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
                channel: ChannelKind::Cloud,
                status,
            },
        )
        .await;
    }
}

/// Flush everything held back while the session was unacknowledged
async fn drain_audio(
    session: &mut CloudSession,
    queue: &mut VecDeque<AudioFrame>,
) -> Result<(), CloudError> {
    while let Some(frame) = queue.pop_front() {
        session.send_audio(frame).await?;
    }
    Ok(())
}

/// Resolve when the ack deadline passes; pend forever while disarmed
async fn ack_overdue(deadline: &Option<tokio::time::Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(*at).await,
        None => std::future::pending().await,
    }
}

async fn next_session_event(rx: &mut Option<mpsc::Receiver<SessionEvent>>) -> SessionEvent {
    match rx {
        Some(rx) => match rx.recv().await {
            Some(event) => event,
            None => std::future::pending().await,
        },
        None => std::future::pending().await,
    }
}

async fn next_audio_frame(rx: &mut Option<AudioReceiver>) -> Option<AudioFrame> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[async_trait::async_trait]
impl TransportTask for CloudTransportTask {
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
        ChannelKind::Cloud
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use visor_core::channel::{create_audio_channel, create_effect_channel, create_event_channel};
    use visor_core::config::ChannelConfig;

    #[test]
    fn test_transport_reports_cloud_channel() {
        let task = CloudTransportTask::new(CloudConfig::default());
        assert_eq!(task.channel_kind(), ChannelKind::Cloud);
    }

    #[test]
    fn test_attach_stores_all_endpoints() {
        let channels = ChannelConfig::testing();
        let (event_sender, _event_receiver) = create_event_channel(&channels);
        let (_effect_sender, effect_receiver) = create_effect_channel(&channels);
        let (_audio_sender, audio_receiver) = create_audio_channel(&channels);

        let mut task = CloudTransportTask::new(CloudConfig::default());
        task.attach_channels(event_sender, effect_receiver)
            .expect("attach should succeed");
        task.attach_audio(audio_receiver);
        assert!(task.event_sender.is_some());
        assert!(task.effect_receiver.is_some());
        assert!(task.audio.is_some());
    }
}
