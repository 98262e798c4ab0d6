//! Process bus wire protocol
//!
//! Bus peers exchange newline-delimited JSON over a local socket. A client's
//! first frame is a `BusHello` naming its package; every subsequent frame is
//! a `BusMessage`. The broker stamps each message with the authenticated
//! sender before handing it to the router as a `BusEnvelope`, so receivers
//! never trust a self-declared identity field inside the payload.

use serde::{Deserialize, Serialize};

use crate::protocol::display::DisplayRequest;
use crate::protocol::manager::{ManagerCommand, ManagerNotice};
use crate::registry::AppDescriptor;
use crate::types::PackageId;

// ----------------------------------------------------------------------------
// Frames (Clients → Broker)
// ----------------------------------------------------------------------------

/// First frame on a new bus connection, naming the peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusHello {
    pub package: PackageId,
}

/// Messages apps publish on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusMessage {
    /// Announce this app and its catalog entry
    RegisterApp { descriptor: AppDescriptor },

    /// Announce the voice commands this app answers to
    RegisterCommands { commands: Vec<String> },

    /// Ask for wearable display output
    DisplayRequest { request: DisplayRequest },

    /// Start receiving transcripts, optionally translated
    SubscribeSpeech {
        source_language: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        target_language: Option<String>,
    },

    /// Stop receiving transcripts
    UnsubscribeSpeech,

    /// Free-form content routed to the connected handset
    CustomContent { payload: serde_json::Value },

    /// Privileged control traffic from the co-located manager
    ManagerControl { command: ManagerCommand },
}

/// Authorization tier a bus message belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusTier {
    /// Accepted from any connected peer
    Open,
    /// Accepted only from peers in the running set
    Gated,
    /// Accepted only from the configured manager identity
    Manager,
}

impl BusMessage {
    /// The tier the router enforces for this message
    pub fn tier(&self) -> BusTier {
        match self {
            BusMessage::RegisterApp { .. } | BusMessage::RegisterCommands { .. } => BusTier::Open,
            BusMessage::DisplayRequest { .. }
            | BusMessage::SubscribeSpeech { .. }
            | BusMessage::UnsubscribeSpeech
            | BusMessage::CustomContent { .. } => BusTier::Gated,
            BusMessage::ManagerControl { .. } => BusTier::Manager,
        }
    }
}

/// A bus message with its broker-verified sender
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusEnvelope {
    pub sender: PackageId,
    pub message: BusMessage,
}

// ----------------------------------------------------------------------------
// Frames (Broker → Clients)
// ----------------------------------------------------------------------------

/// Messages the router publishes toward apps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreBusMessage {
    /// The named app should begin running
    AppStart { package: PackageId },

    /// The named app should stop
    AppStop { package: PackageId },

    /// A transcript for speech subscribers
    Transcript {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        is_final: bool,
    },

    /// New settings payload for the named app
    SettingsUpdate {
        package: PackageId,
        settings: serde_json::Value,
    },

    /// Status and reply traffic for the manager while it is co-located
    ManagerNotice { notice: ManagerNotice },
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_registration_is_open_tier() {
        let register = BusMessage::RegisterApp {
            descriptor: AppDescriptor {
                name: "Weather".to_string(),
                description: "Forecasts".to_string(),
                version: "1.0.0".to_string(),
                settings: json!({}),
            },
        };
        assert_eq!(register.tier(), BusTier::Open);
        assert_eq!(
            BusMessage::RegisterCommands {
                commands: vec!["weather".to_string()]
            }
            .tier(),
            BusTier::Open
        );
    }

    #[test]
    fn test_content_messages_are_gated() {
        assert_eq!(
            BusMessage::DisplayRequest {
                request: DisplayRequest::main(json!({"text": "hi"}))
            }
            .tier(),
            BusTier::Gated
        );
        assert_eq!(
            BusMessage::SubscribeSpeech {
                source_language: "en-US".to_string(),
                target_language: None
            }
            .tier(),
            BusTier::Gated
        );
        assert_eq!(BusMessage::UnsubscribeSpeech.tier(), BusTier::Gated);
        assert_eq!(
            BusMessage::CustomContent { payload: json!(1) }.tier(),
            BusTier::Gated
        );
    }

    #[test]
    fn test_manager_control_is_manager_tier() {
        let control = BusMessage::ManagerControl {
            command: ManagerCommand::Ping,
        };
        assert_eq!(control.tier(), BusTier::Manager);
    }

    #[test]
    fn test_envelope_round_trip() {
        let envelope = BusEnvelope {
            sender: PackageId::from("com.example.weather"),
            message: BusMessage::UnsubscribeSpeech,
        };
        let line = serde_json::to_string(&envelope).unwrap();
        let restored: BusEnvelope = serde_json::from_str(&line).unwrap();
        assert_eq!(restored, envelope);
    }

    #[test]
    fn test_hello_frame_shape() {
        let hello: BusHello = serde_json::from_str(r#"{"package":"com.example.weather"}"#).unwrap();
        assert_eq!(hello.package.as_str(), "com.example.weather");
    }

    #[test]
    fn test_core_message_tags() {
        let start = CoreBusMessage::AppStart {
            package: PackageId::from("com.example.weather"),
        };
        let json = serde_json::to_value(&start).unwrap();
        assert_eq!(json["type"], "app_start");
        assert_eq!(json["package"], "com.example.weather");
    }
}
