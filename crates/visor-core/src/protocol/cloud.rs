//! Cloud session wire protocol
//!
//! Text frames carry flat JSON objects discriminated by a `type` tag; binary
//! frames carry raw audio samples with no framing. Field names follow the
//! backend's conventions (camelCase inside messages, snake_case tags, with
//! `VAD` as the one uppercase tag).
//!
//! Unknown inbound tags deserialize to `CloudInbound::Unknown` so new server
//! message types never break an older client.

use serde::{Deserialize, Serialize};

use crate::protocol::display::DisplayRequest;
use crate::protocol::manager::CoreStatus;
use crate::types::PackageId;

// ----------------------------------------------------------------------------
// Outbound Messages (Core → Cloud)
// ----------------------------------------------------------------------------

/// Messages sent to the cloud backend
///
/// Timestamps are epoch milliseconds, filled in by the router when the send
/// is decided rather than when the frame goes out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CloudOutbound {
    /// Session introduction, sent immediately after the socket opens
    ConnectionInit {
        #[serde(rename = "coreToken")]
        core_token: String,
    },

    /// Voice activity changed
    #[serde(rename = "VAD")]
    Vad { status: bool },

    /// Replace the set of speech streams the backend should run
    Config { streams: Vec<StreamConfig> },

    /// An app started on this device
    StartApp {
        #[serde(rename = "packageName")]
        package: PackageId,
        timestamp: u64,
    },

    /// An app stopped on this device
    StopApp {
        #[serde(rename = "packageName")]
        package: PackageId,
        timestamp: u64,
    },

    /// A notification arrived on the paired phone
    PhoneNotification {
        #[serde(flatten)]
        notification: PhoneNotification,
        timestamp: u64,
    },

    /// Hardware button pressed
    ButtonPress {
        #[serde(rename = "buttonId")]
        button: String,
        #[serde(rename = "pressType")]
        press: PressKind,
        timestamp: u64,
    },

    /// Head position changed
    HeadPosition {
        position: HeadPosition,
        timestamp: u64,
    },

    /// Wearable battery state
    BatteryUpdate {
        level: u8,
        charging: bool,
        #[serde(rename = "timeRemaining", skip_serializing_if = "Option::is_none")]
        time_remaining_minutes: Option<u32>,
        timestamp: u64,
    },

    /// Location fix
    LocationUpdate { lat: f64, lng: f64, timestamp: u64 },

    /// Full status snapshot, on request or on material change
    CoreStatus { status: CoreStatus, timestamp: u64 },
}

/// One speech stream the backend should maintain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(rename = "streamType")]
    pub kind: StreamKind,
    #[serde(rename = "transcribeLanguage")]
    pub source_language: String,
    #[serde(
        rename = "translateLanguage",
        skip_serializing_if = "Option::is_none",
        default
    )]
    pub target_language: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    Transcription,
    Translation,
}

/// Phone notification payload forwarded to the cloud
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhoneNotification {
    #[serde(rename = "notificationId", default)]
    pub id: String,
    #[serde(default)]
    pub app: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub priority: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressKind {
    Short,
    Long,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadPosition {
    Up,
    Down,
}

// ----------------------------------------------------------------------------
// Inbound Messages (Cloud → Core)
// ----------------------------------------------------------------------------

/// Messages received from the cloud backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CloudInbound {
    /// Session established; audio may flow
    ConnectionAck {
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
    },

    /// Session-level failure reported by the backend
    ConnectionError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The presented token was rejected
    AuthError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// The backend's view of active apps changed (informational only)
    AppStateChange {
        #[serde(rename = "activeAppPackageNames", default)]
        active_packages: Vec<PackageId>,
    },

    /// The backend wants the microphone on or off
    MicrophoneStateChange {
        #[serde(rename = "isMicrophoneEnabled", default = "default_microphone_enabled")]
        enabled: bool,
    },

    /// Something should be drawn on the wearable display
    DisplayEvent {
        #[serde(flatten)]
        request: DisplayRequest,
    },

    /// Partial transcript
    Interim {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(
            rename = "translateLanguage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        translate_language: Option<String>,
    },

    /// Completed transcript segment
    Final {
        text: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        language: Option<String>,
        #[serde(
            rename = "translateLanguage",
            default,
            skip_serializing_if = "Option::is_none"
        )]
        translate_language: Option<String>,
    },

    /// The backend wants one status snapshot
    RequestSingle {
        #[serde(rename = "data_type", default, skip_serializing_if = "Option::is_none")]
        data_type: Option<String>,
    },

    /// The backend wants this client to cycle its connection
    Reconnect,

    /// Any tag this client does not know
    #[serde(other)]
    Unknown,
}

fn default_microphone_enabled() -> bool {
    true
}

// ----------------------------------------------------------------------------
// Audio Frames
// ----------------------------------------------------------------------------

/// One raw audio payload bound for the cloud as a binary frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioFrame(Vec<u8>);

impl AudioFrame {
    pub fn new(samples: Vec<u8>) -> Self {
        Self(samples)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

impl From<Vec<u8>> for AudioFrame {
    fn from(samples: Vec<u8>) -> Self {
        Self(samples)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_init_wire_format() {
        let msg = CloudOutbound::ConnectionInit {
            core_token: "tok-123".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "connection_init");
        assert_eq!(json["coreToken"], "tok-123");
    }

    #[test]
    fn test_vad_uses_uppercase_tag() {
        let msg = CloudOutbound::Vad { status: true };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "VAD");
        assert_eq!(json["status"], true);
    }

    #[test]
    fn test_start_app_wire_format() {
        let msg = CloudOutbound::StartApp {
            package: PackageId::from("com.example.weather"),
            timestamp: 1_700_000_000_000,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "start_app");
        assert_eq!(json["packageName"], "com.example.weather");
        assert_eq!(json["timestamp"], 1_700_000_000_000u64);
    }

    #[test]
    fn test_config_stream_fields() {
        let msg = CloudOutbound::Config {
            streams: vec![
                StreamConfig {
                    kind: StreamKind::Transcription,
                    source_language: "en-US".to_string(),
                    target_language: None,
                },
                StreamConfig {
                    kind: StreamKind::Translation,
                    source_language: "en-US".to_string(),
                    target_language: Some("fr-FR".to_string()),
                },
            ],
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["streams"][0]["streamType"], "transcription");
        assert_eq!(json["streams"][0]["transcribeLanguage"], "en-US");
        assert!(json["streams"][0].get("translateLanguage").is_none());
        assert_eq!(json["streams"][1]["streamType"], "translation");
        assert_eq!(json["streams"][1]["translateLanguage"], "fr-FR");
    }

    #[test]
    fn test_battery_omits_missing_time_remaining() {
        let msg = CloudOutbound::BatteryUpdate {
            level: 80,
            charging: false,
            time_remaining_minutes: None,
            timestamp: 1,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "battery_update");
        assert!(json.get("timeRemaining").is_none());
    }

    #[test]
    fn test_inbound_final_transcript() {
        let json = r#"{"type":"final","text":"hello world","language":"en-US"}"#;
        let msg: CloudInbound = serde_json::from_str(json).unwrap();
        assert_eq!(
            msg,
            CloudInbound::Final {
                text: "hello world".to_string(),
                language: Some("en-US".to_string()),
                translate_language: None,
            }
        );
    }

    #[test]
    fn test_inbound_microphone_default_is_on() {
        let json = r#"{"type":"microphone_state_change"}"#;
        let msg: CloudInbound = serde_json::from_str(json).unwrap();
        assert_eq!(msg, CloudInbound::MicrophoneStateChange { enabled: true });
    }

    #[test]
    fn test_inbound_display_event_flattens_request() {
        let json = r#"{"type":"display_event","view":"dashboard","layout":{"layoutType":"text_wall","text":"hi"}}"#;
        let msg: CloudInbound = serde_json::from_str(json).unwrap();
        match msg {
            CloudInbound::DisplayEvent { request } => {
                assert_eq!(request.view, crate::protocol::display::DisplayView::Dashboard);
                assert_eq!(request.layout["text"], "hi");
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_inbound_unknown_tag_is_tolerated() {
        let json = r#"{"type":"brand_new_feature","anything":42}"#;
        let msg: CloudInbound = serde_json::from_str(json).unwrap();
        assert_eq!(msg, CloudInbound::Unknown);
    }

    #[test]
    fn test_inbound_reconnect_ignores_extra_fields() {
        let json = r#"{"type":"reconnect","reason":"maintenance"}"#;
        let msg: CloudInbound = serde_json::from_str(json).unwrap();
        assert_eq!(msg, CloudInbound::Reconnect);
    }
}
