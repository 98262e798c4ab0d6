//! Integration tests for the wireless transport task
//!
//! The loopback link stands in for the radio: each test plays the manager
//! central through a [`LoopbackHandle`] while the task runs against real
//! router channels.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::timeout;
use visor_ble::{LoopbackHandle, WirelessTransportTask};
use visor_core::channel::{
    create_effect_channel, create_event_channel, EffectSender, EventReceiver,
};
use visor_core::chunking::{ChunkReassembler, MTU_RESERVED};
use visor_core::config::{ChannelConfig, WirelessConfig};
use visor_core::{
    CentralId, ChannelKind, Effect, Event, TransportStatus, TransportTask, VisorResult,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

struct Harness {
    handle: LoopbackHandle,
    effects: EffectSender,
    events: EventReceiver,
    task: JoinHandle<VisorResult<()>>,
    config: WirelessConfig,
}

fn spawn_transport() -> Harness {
    let channels = ChannelConfig::testing();
    let (event_sender, events) = create_event_channel(&channels);
    let (effects, effect_receiver) = create_effect_channel(&channels);

    let config = WirelessConfig::testing();
    let (mut task, handle) = WirelessTransportTask::loopback(config.clone());
    task.attach_channels(event_sender, effect_receiver)
        .expect("attach channels");
    let task = tokio::spawn(async move { task.run().await });

    Harness {
        handle,
        effects,
        events,
        task,
        config,
    }
}

async fn next_event(events: &mut EventReceiver) -> Event {
    timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

/// Drain events until the link reports the given status
async fn wait_for_status(events: &mut EventReceiver, wanted: TransportStatus) {
    loop {
        if let Event::TransportStatusChanged { channel, status } = next_event(events).await {
            assert_eq!(channel, ChannelKind::Wireless);
            if status == wanted {
                return;
            }
        }
    }
}

/// Drain events until the central connects
async fn wait_for_central(events: &mut EventReceiver) -> CentralId {
    loop {
        if let Event::CentralConnected { central } = next_event(events).await {
            return central;
        }
    }
}

/// Drain events until an inbound message arrives
async fn next_message(events: &mut EventReceiver) -> (CentralId, String) {
    loop {
        if let Event::WirelessMessage { central, payload } = next_event(events).await {
            return (central, payload);
        }
    }
}

// ----------------------------------------------------------------------------
// Startup and Inbound
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_startup_reports_active_then_central() -> VisorResult<()> {
    let mut h = spawn_transport();

    let first = next_event(&mut h.events).await;
    assert!(matches!(
        first,
        Event::TransportStatusChanged {
            channel: ChannelKind::Wireless,
            status: TransportStatus::Active,
        }
    ));
    let central = wait_for_central(&mut h.events).await;
    assert_eq!(central, CentralId::loopback());

    h.task.abort();
    Ok(())
}

#[tokio::test]
async fn test_inbound_write_becomes_one_message() -> VisorResult<()> {
    let mut h = spawn_transport();
    wait_for_central(&mut h.events).await;

    assert!(h.handle.write(br#"{"command":"ping"}"#).await);
    let (central, payload) = next_message(&mut h.events).await;
    assert_eq!(central, CentralId::loopback());
    assert_eq!(payload, r#"{"command":"ping"}"#);

    h.task.abort();
    Ok(())
}

#[tokio::test]
async fn test_segmented_write_parses_only_at_the_final_segment() -> VisorResult<()> {
    let mut h = spawn_transport();
    wait_for_central(&mut h.events).await;

    assert!(h.handle.write_segment(br#"{"command":"pi"#, false).await);
    assert!(h.handle.write_segment(br#"ng"}"#, true).await);

    let (_, payload) = next_message(&mut h.events).await;
    assert_eq!(payload, r#"{"command":"ping"}"#);

    h.task.abort();
    Ok(())
}

#[tokio::test]
async fn test_malformed_write_is_dropped_and_the_link_recovers() -> VisorResult<()> {
    let mut h = spawn_transport();
    wait_for_central(&mut h.events).await;

    // Not UTF-8; the buffer is discarded without producing a message.
    assert!(h.handle.write(&[0xff, 0xfe, 0xfd]).await);
    assert!(h.handle.write(br#"{"command":"ping"}"#).await);

    let (_, payload) = next_message(&mut h.events).await;
    assert_eq!(payload, r#"{"command":"ping"}"#);

    h.task.abort();
    Ok(())
}

// ----------------------------------------------------------------------------
// Outbound Chunking
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_outbound_message_is_chunked_and_reassembles() -> VisorResult<()> {
    let mut h = spawn_transport();
    wait_for_central(&mut h.events).await;

    let message = serde_json::json!({
        "event": "display_text",
        "params": { "text": "a".repeat(600) },
    })
    .to_string();
    let chunk_payload = h.config.default_mtu - MTU_RESERVED;
    let expected_chunks = (message.len() + chunk_payload - 1) / chunk_payload;
    assert!(expected_chunks > 1, "message must span several chunks");

    h.effects
        .send(Effect::WirelessSend {
            message: message.clone(),
        })
        .expect("effect send");

    let mut reassembler = ChunkReassembler::new(h.config.max_message_size);
    let mut frames = 0;
    let assembled = loop {
        let frame = timeout(RECV_TIMEOUT, h.handle.next_notification())
            .await
            .expect("timed out waiting for notification")
            .expect("notification channel closed");
        assert!(frame.len() <= h.config.default_mtu - MTU_RESERVED + 2);
        assert_eq!(frame[1] as usize, expected_chunks);
        frames += 1;
        if let Some(payload) = reassembler.accept(&frame).expect("well-formed chunk") {
            break payload;
        }
    };

    assert_eq!(frames, expected_chunks);
    assert_eq!(String::from_utf8(assembled).expect("utf-8"), message);

    h.task.abort();
    Ok(())
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_stop_effect_disables_and_start_restores() -> VisorResult<()> {
    let mut h = spawn_transport();
    wait_for_central(&mut h.events).await;

    h.effects
        .send(Effect::WirelessStop)
        .expect("effect send");
    wait_for_status(&mut h.events, TransportStatus::Disabled).await;

    h.effects
        .send(Effect::WirelessStart)
        .expect("effect send");
    wait_for_status(&mut h.events, TransportStatus::Active).await;
    wait_for_central(&mut h.events).await;

    assert!(h.handle.write(br#"{"command":"ping"}"#).await);
    let (_, payload) = next_message(&mut h.events).await;
    assert_eq!(payload, r#"{"command":"ping"}"#);

    h.task.abort();
    Ok(())
}

#[tokio::test]
async fn test_start_while_running_resets_the_session() -> VisorResult<()> {
    let mut h = spawn_transport();
    wait_for_central(&mut h.events).await;

    // Leave half a message in the reassembly buffer, then restart.
    assert!(h.handle.write_segment(br#"{"command":"pi"#, false).await);
    tokio::time::sleep(Duration::from_millis(20)).await;
    h.effects
        .send(Effect::WirelessStart)
        .expect("effect send");
    wait_for_status(&mut h.events, TransportStatus::Active).await;
    wait_for_central(&mut h.events).await;

    // The stale prefix is gone; a fresh message parses on its own.
    assert!(h.handle.write(br#"{"command":"ping"}"#).await);
    let (_, payload) = next_message(&mut h.events).await;
    assert_eq!(payload, r#"{"command":"ping"}"#);

    h.task.abort();
    Ok(())
}

#[tokio::test]
async fn test_shutdown_effect_ends_the_task() -> VisorResult<()> {
    let mut h = spawn_transport();
    wait_for_central(&mut h.events).await;

    h.effects.send(Effect::Shutdown).expect("effect send");
    let joined = timeout(RECV_TIMEOUT, h.task)
        .await
        .expect("task did not exit");
    assert!(matches!(joined, Ok(Ok(()))));

    // The link is gone with the task.
    assert!(h.handle.next_notification().await.is_none());
    Ok(())
}
