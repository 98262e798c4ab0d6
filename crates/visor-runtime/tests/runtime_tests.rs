//! Tests for runtime assembly and transport lifecycle
//!
//! Transports are stubbed: each one reports itself active and then drains
//! effects until shutdown, which is all the runtime plumbing needs to be
//! exercised end to end.

use std::time::Duration;

use tokio::time::timeout;
use visor_core::channel::{EffectReceiver, EventSender};
use visor_core::protocol::cloud::AudioFrame;
use visor_core::{
    AppEvent, ChannelKind, Command, Effect, Event, TransportStatus, TransportTask, VisorError,
    VisorResult,
};
use visor_runtime::platform::PlatformServices;
use visor_runtime::VisorRuntime;

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

struct StubTransport {
    kind: ChannelKind,
    event_sender: Option<EventSender>,
    effect_receiver: Option<EffectReceiver>,
}

impl StubTransport {
    fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            event_sender: None,
            effect_receiver: None,
        }
    }
}

#[async_trait::async_trait]
impl TransportTask for StubTransport {
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
        let event_sender = self
            .event_sender
            .take()
            .ok_or_else(|| VisorError::channel_error("stub started without channels"))?;
        let mut effect_receiver = self
            .effect_receiver
            .take()
            .ok_or_else(|| VisorError::channel_error("stub started without channels"))?;

        event_sender
            .send(Event::TransportStatusChanged {
                channel: self.kind,
                status: TransportStatus::Active,
            })
            .await
            .map_err(|_| VisorError::channel_error("event channel closed"))?;

        loop {
            match effect_receiver.recv().await {
                Ok(Effect::Shutdown) => return Ok(()),
                Ok(_) => {}
                Err(_) => return Ok(()),
            }
        }
    }

    fn channel_kind(&self) -> ChannelKind {
        self.kind
    }
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_runtime_lifecycle() -> VisorResult<()> {
    let mut runtime = VisorRuntime::for_testing(PlatformServices::memory());
    assert!(!runtime.is_running());
    assert!(runtime.command_sender().is_none());

    runtime.add_transport(StubTransport::new(ChannelKind::Bus))?;
    runtime.start().await?;
    assert!(runtime.is_running());

    let sender = runtime.command_sender().cloned().expect("running runtime has a sender");
    let mut app_events = runtime
        .take_app_event_receiver()
        .expect("app event receiver not yet claimed");

    sender.send(Command::RequestStatus).await.unwrap();
    loop {
        let event = timeout(Duration::from_secs(2), app_events.recv())
            .await
            .expect("timed out waiting for status")
            .expect("app event channel closed");
        if matches!(event, AppEvent::StatusReport { .. }) {
            break;
        }
    }

    runtime.stop().await?;
    assert!(!runtime.is_running());
    assert!(runtime.command_sender().is_none());
    Ok(())
}

#[tokio::test]
async fn test_stop_before_start_is_safe() -> VisorResult<()> {
    let mut runtime = VisorRuntime::for_testing(PlatformServices::memory());
    runtime.stop().await?;
    assert!(!runtime.is_running());
    Ok(())
}

#[tokio::test]
async fn test_start_twice_is_rejected() -> VisorResult<()> {
    let mut runtime = VisorRuntime::for_testing(PlatformServices::memory());
    runtime.start().await?;

    assert!(runtime.start().await.is_err());
    assert!(runtime.is_running());

    runtime.stop().await?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Transport Registration
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_duplicate_transport_kind_is_rejected() -> VisorResult<()> {
    let mut runtime = VisorRuntime::for_testing(PlatformServices::memory());

    runtime.add_transport(StubTransport::new(ChannelKind::Bus))?;
    assert!(runtime
        .add_transport(StubTransport::new(ChannelKind::Bus))
        .is_err());
    runtime.add_transport(StubTransport::new(ChannelKind::Wireless))?;

    assert_eq!(runtime.channel_kinds().len(), 2);
    assert!(runtime.has_transport(ChannelKind::Bus));
    assert!(runtime.has_transport(ChannelKind::Wireless));
    assert!(!runtime.has_transport(ChannelKind::Cloud));
    Ok(())
}

#[tokio::test]
async fn test_add_transport_while_running_is_rejected() -> VisorResult<()> {
    let mut runtime = VisorRuntime::for_testing(PlatformServices::memory());
    runtime.start().await?;

    assert!(runtime
        .add_transport(StubTransport::new(ChannelKind::Bus))
        .is_err());

    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_runtime_without_transports_serves_commands() -> VisorResult<()> {
    // An embedder that brings no transports still gets the command surface;
    // effects have nowhere to go and are dropped.
    let mut runtime = VisorRuntime::for_testing(PlatformServices::memory());
    runtime.start().await?;

    let sender = runtime.command_sender().cloned().expect("sender after start");
    let mut app_events = runtime.take_app_event_receiver().expect("receiver after start");

    sender.send(Command::RequestStatus).await.unwrap();
    loop {
        let event = timeout(Duration::from_secs(2), app_events.recv())
            .await
            .expect("timed out waiting for status")
            .expect("app event channel closed");
        if matches!(event, AppEvent::StatusReport { .. }) {
            break;
        }
    }

    runtime.stop().await?;
    Ok(())
}

// ----------------------------------------------------------------------------
// Audio Path
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_audio_receiver_is_claimed_once() -> VisorResult<()> {
    let mut runtime = VisorRuntime::for_testing(PlatformServices::memory());

    let mut audio = runtime.take_audio_receiver().expect("first claim succeeds");
    assert!(runtime.take_audio_receiver().is_none());

    // The path bypasses the router entirely, so it works before start
    runtime
        .audio_sender()
        .send(AudioFrame::new(vec![1, 2, 3]))
        .await
        .unwrap();
    let frame = timeout(Duration::from_secs(2), audio.recv())
        .await
        .expect("timed out waiting for audio")
        .expect("audio channel closed");
    assert_eq!(frame.len(), 3);
    Ok(())
}
