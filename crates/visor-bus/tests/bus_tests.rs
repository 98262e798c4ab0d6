//! Integration tests for the bus transport
//!
//! Each test runs the broker on a socket in a fresh temp directory and
//! drives it with real clients.

use std::path::PathBuf;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::UnixStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use visor_bus::{BusClient, BusTransportTask};
use visor_core::channel::{
    create_effect_channel, create_event_channel, EffectSender, EventReceiver,
};
use visor_core::config::{BusConfig, ChannelConfig};
use visor_core::protocol::bus::{BusEnvelope, BusMessage, CoreBusMessage};
use visor_core::{
    ChannelKind, Effect, Event, PackageId, TransportStatus, TransportTask, VisorResult,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(2);

// ----------------------------------------------------------------------------
// Test Utilities
// ----------------------------------------------------------------------------

struct Harness {
    _dir: tempfile::TempDir,
    socket: PathBuf,
    effects: EffectSender,
    events: EventReceiver,
    task: JoinHandle<VisorResult<()>>,
}

async fn spawn_bus() -> Harness {
    let dir = tempfile::tempdir().expect("tempdir");
    let socket = dir.path().join("bus.sock");

    let channels = ChannelConfig::testing();
    let (event_sender, mut events) = create_event_channel(&channels);
    let (effects, effect_receiver) = create_effect_channel(&channels);

    let config = BusConfig {
        socket_path: socket.display().to_string(),
        ..BusConfig::default()
    };
    let mut task = BusTransportTask::new(config);
    task.attach_channels(event_sender, effect_receiver)
        .expect("attach channels");
    let task = tokio::spawn(async move { task.run().await });

    // The socket exists once the broker reports itself active.
    loop {
        if let Event::TransportStatusChanged { channel, status } = next_event(&mut events).await {
            assert_eq!(channel, ChannelKind::Bus);
            assert_eq!(status, TransportStatus::Active);
            break;
        }
    }

    Harness {
        _dir: dir,
        socket,
        effects,
        events,
        task,
    }
}

async fn next_event(events: &mut EventReceiver) -> Event {
    timeout(RECV_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_envelope(events: &mut EventReceiver) -> BusEnvelope {
    loop {
        if let Event::BusEnvelope { envelope } = next_event(events).await {
            return envelope;
        }
    }
}

async fn next_core_message(client: &mut BusClient) -> CoreBusMessage {
    timeout(RECV_TIMEOUT, client.recv())
        .await
        .expect("timed out waiting for bus delivery")
        .expect("bus read failed")
        .expect("broker closed the connection")
}

fn pkg(name: &str) -> PackageId {
    PackageId::from(name)
}

// ----------------------------------------------------------------------------
// Identity Stamping
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_messages_carry_the_hello_identity() -> VisorResult<()> {
    let mut h = spawn_bus().await;

    let mut client = BusClient::connect(&h.socket, pkg("com.example.weather")).await?;
    client
        .send(&BusMessage::RegisterCommands {
            commands: vec!["weather".to_string()],
        })
        .await?;

    let envelope = next_envelope(&mut h.events).await;
    assert_eq!(envelope.sender, pkg("com.example.weather"));
    assert!(matches!(
        envelope.message,
        BusMessage::RegisterCommands { .. }
    ));

    h.task.abort();
    Ok(())
}

#[tokio::test]
async fn test_first_frame_must_be_hello() -> VisorResult<()> {
    let mut h = spawn_bus().await;

    // Skip the hello and publish straight away; the broker rejects the
    // connection without surfacing anything.
    let mut raw = UnixStream::connect(&h.socket).await.expect("connect");
    raw.write_all(b"{\"type\":\"unsubscribe_speech\"}\n")
        .await
        .expect("write");

    // A well-behaved peer afterwards is the only one that surfaces.
    let mut client = BusClient::connect(&h.socket, pkg("com.example.notes")).await?;
    client.send(&BusMessage::UnsubscribeSpeech).await?;

    let envelope = next_envelope(&mut h.events).await;
    assert_eq!(envelope.sender, pkg("com.example.notes"));

    h.task.abort();
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_is_dropped_but_the_peer_survives() -> VisorResult<()> {
    let mut h = spawn_bus().await;

    let mut raw = UnixStream::connect(&h.socket).await.expect("connect");
    raw.write_all(b"{\"package\":\"com.example.weather\"}\n")
        .await
        .expect("hello");
    raw.write_all(b"this is not json\n").await.expect("garbage");
    raw.write_all(b"{\"type\":\"unsubscribe_speech\"}\n")
        .await
        .expect("frame");

    let envelope = next_envelope(&mut h.events).await;
    assert_eq!(envelope.sender, pkg("com.example.weather"));
    assert!(matches!(envelope.message, BusMessage::UnsubscribeSpeech));

    h.task.abort();
    Ok(())
}

// ----------------------------------------------------------------------------
// Delivery
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_targeted_delivery_reaches_only_the_addressee() -> VisorResult<()> {
    let mut h = spawn_bus().await;

    let mut weather = BusClient::connect(&h.socket, pkg("com.example.weather")).await?;
    let mut notes = BusClient::connect(&h.socket, pkg("com.example.notes")).await?;

    // Round-trip one frame per client so both hellos are registered
    // before anything is delivered.
    weather.send(&BusMessage::UnsubscribeSpeech).await?;
    next_envelope(&mut h.events).await;
    notes.send(&BusMessage::UnsubscribeSpeech).await?;
    next_envelope(&mut h.events).await;

    let start = CoreBusMessage::AppStart {
        package: pkg("com.example.weather"),
    };
    h.effects
        .send(Effect::BusPublish {
            target: Some(pkg("com.example.weather")),
            message: start.clone(),
        })
        .expect("effect send");
    let marker = CoreBusMessage::Transcript {
        text: "marker".to_string(),
        language: None,
        is_final: true,
    };
    h.effects
        .send(Effect::BusPublish {
            target: None,
            message: marker.clone(),
        })
        .expect("effect send");

    assert_eq!(next_core_message(&mut weather).await, start);
    assert_eq!(next_core_message(&mut weather).await, marker);
    // The first thing notes sees is the broadcast, so the targeted
    // message never reached it.
    assert_eq!(next_core_message(&mut notes).await, marker);

    h.task.abort();
    Ok(())
}

// ----------------------------------------------------------------------------
// Lifecycle
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_shutdown_disconnects_peers_and_removes_the_socket() -> VisorResult<()> {
    let mut h = spawn_bus().await;

    let mut client = BusClient::connect(&h.socket, pkg("com.example.weather")).await?;
    client.send(&BusMessage::UnsubscribeSpeech).await?;
    next_envelope(&mut h.events).await;

    h.effects.send(Effect::Shutdown).expect("effect send");
    let joined = timeout(RECV_TIMEOUT, h.task)
        .await
        .expect("task did not exit");
    assert!(matches!(joined, Ok(Ok(()))));

    // The connection is shut down and the socket file is gone.
    let eof = timeout(RECV_TIMEOUT, client.recv())
        .await
        .expect("timed out waiting for EOF")?;
    assert!(eof.is_none());
    assert!(UnixStream::connect(&h.socket).await.is_err());
    Ok(())
}
