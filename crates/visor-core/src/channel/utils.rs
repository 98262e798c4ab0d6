//! Channel creation helpers and send utilities
//!
//! The runtime wires tasks together with bounded tokio channels. Commands,
//! events, and app events are point-to-point mpsc; effects are broadcast so
//! every transport task sees them and picks out its own. Audio frames bypass
//! the router entirely on a dedicated mpsc channel to the cloud task.

use tokio::sync::{broadcast, mpsc};

use crate::channel::communication::{AppEvent, Command, Effect, Event};
use crate::config::ChannelConfig;
use crate::errors::{Result, VisorError};
use crate::protocol::cloud::AudioFrame;

// ----------------------------------------------------------------------------
// Channel Type Aliases
// ----------------------------------------------------------------------------

pub type CommandSender = mpsc::Sender<Command>;
pub type CommandReceiver = mpsc::Receiver<Command>;

pub type EventSender = mpsc::Sender<Event>;
pub type EventReceiver = mpsc::Receiver<Event>;

pub type EffectSender = broadcast::Sender<Effect>;
pub type EffectReceiver = broadcast::Receiver<Effect>;

pub type AppEventSender = mpsc::Sender<AppEvent>;
pub type AppEventReceiver = mpsc::Receiver<AppEvent>;

pub type AudioSender = mpsc::Sender<AudioFrame>;
pub type AudioReceiver = mpsc::Receiver<AudioFrame>;

// ----------------------------------------------------------------------------
// Channel Creation
// ----------------------------------------------------------------------------

/// Create the command channel (embedding layer → router)
pub fn create_command_channel(config: &ChannelConfig) -> (CommandSender, CommandReceiver) {
    mpsc::channel(config.command_buffer_size)
}

/// Create the event channel (transports → router)
pub fn create_event_channel(config: &ChannelConfig) -> (EventSender, EventReceiver) {
    mpsc::channel(config.event_buffer_size)
}

/// Create the effect channel (router → transports, fan-out)
pub fn create_effect_channel(config: &ChannelConfig) -> (EffectSender, EffectReceiver) {
    broadcast::channel(config.effect_buffer_size)
}

/// Subscribe an additional transport to the effect channel
pub fn create_effect_receiver(sender: &EffectSender) -> EffectReceiver {
    sender.subscribe()
}

/// Create the app event channel (router → embedding layer)
pub fn create_app_event_channel(config: &ChannelConfig) -> (AppEventSender, AppEventReceiver) {
    mpsc::channel(config.app_event_buffer_size)
}

/// Create the audio frame channel (embedding layer → cloud task)
pub fn create_audio_channel(config: &ChannelConfig) -> (AudioSender, AudioReceiver) {
    mpsc::channel(config.audio_buffer_size)
}

// ----------------------------------------------------------------------------
// Non-Blocking Send
// ----------------------------------------------------------------------------

/// Send without awaiting, for callers that must never block (UI threads,
/// interrupt-style callbacks)
///
/// A full buffer is an error rather than a wait; the caller decides whether
/// dropping is acceptable.
pub trait NonBlockingSend<T> {
    fn send_now(&self, value: T) -> Result<()>;
}

impl<T: Send> NonBlockingSend<T> for mpsc::Sender<T> {
    fn send_now(&self, value: T) -> Result<()> {
        self.try_send(value).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => VisorError::channel_error("channel buffer full"),
            mpsc::error::TrySendError::Closed(_) => VisorError::channel_error("channel closed"),
        })
    }
}

impl NonBlockingSend<Effect> for EffectSender {
    fn send_now(&self, value: Effect) -> Result<()> {
        // Broadcast send fails only when no receiver exists.
        self.send(value)
            .map(|_| ())
            .map_err(|_| VisorError::channel_error("no effect receivers attached"))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_command_channel_round_trip() {
        let (tx, mut rx) = create_command_channel(&ChannelConfig::testing());
        tx.send(Command::RequestStatus).await.unwrap();
        assert_eq!(rx.recv().await, Some(Command::RequestStatus));
    }

    #[tokio::test]
    async fn test_effect_fan_out() {
        let (tx, mut rx_a) = create_effect_channel(&ChannelConfig::testing());
        let mut rx_b = create_effect_receiver(&tx);
        tx.send(Effect::WirelessStart).unwrap();
        assert_eq!(rx_a.recv().await.unwrap(), Effect::WirelessStart);
        assert_eq!(rx_b.recv().await.unwrap(), Effect::WirelessStart);
    }

    #[tokio::test]
    async fn test_non_blocking_send_reports_full_buffer() {
        let config = ChannelConfig {
            command_buffer_size: 1,
            ..ChannelConfig::testing()
        };
        let (tx, _rx) = create_command_channel(&config);
        tx.send_now(Command::RequestStatus).unwrap();
        let err = tx.send_now(Command::RequestStatus).unwrap_err();
        assert!(err.to_string().contains("full"));
    }

    #[tokio::test]
    async fn test_non_blocking_send_reports_closed_channel() {
        let (tx, rx) = create_command_channel(&ChannelConfig::testing());
        drop(rx);
        let err = tx.send_now(Command::RequestStatus).unwrap_err();
        assert!(err.to_string().contains("closed"));
    }

    #[tokio::test]
    async fn test_effect_send_without_receivers_fails() {
        let (tx, rx) = create_effect_channel(&ChannelConfig::testing());
        drop(rx);
        assert!(tx.send_now(Effect::WirelessStop).is_err());
    }
}
