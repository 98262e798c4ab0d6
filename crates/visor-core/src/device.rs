//! Wearable device kinds and capabilities
//!
//! The set of supported wearables is closed: routing decisions (can this
//! device display? does it have a microphone?) switch on `DeviceKind` rather
//! than on free-form model strings, so an unsupported device cannot reach
//! the routing layer half-configured.

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Device Kinds
// ----------------------------------------------------------------------------

/// The wearable families this runtime can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Simulated wearable used in loopback mode
    Virtual,
    /// Glasses with a display and microphone
    DisplayGlasses,
    /// Audio-only glasses, no display
    AudioGlasses,
}

impl DeviceKind {
    /// What this device family can do
    pub fn capabilities(&self) -> CapabilitySet {
        match self {
            DeviceKind::Virtual => CapabilitySet {
                has_display: true,
                has_microphone: true,
                has_speaker: true,
                has_camera: false,
            },
            DeviceKind::DisplayGlasses => CapabilitySet {
                has_display: true,
                has_microphone: true,
                has_speaker: false,
                has_camera: true,
            },
            DeviceKind::AudioGlasses => CapabilitySet {
                has_display: false,
                has_microphone: true,
                has_speaker: true,
                has_camera: false,
            },
        }
    }
}

impl std::fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceKind::Virtual => write!(f, "virtual"),
            DeviceKind::DisplayGlasses => write!(f, "display_glasses"),
            DeviceKind::AudioGlasses => write!(f, "audio_glasses"),
        }
    }
}

/// Hardware capabilities of a device kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet {
    pub has_display: bool,
    pub has_microphone: bool,
    pub has_speaker: bool,
    pub has_camera: bool,
}

// ----------------------------------------------------------------------------
// Device Link State
// ----------------------------------------------------------------------------

/// State of the link to the wearable hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DeviceLinkStatus {
    Disconnected,
    Connecting,
    Connected { kind: DeviceKind },
}

impl DeviceLinkStatus {
    /// True only once the link is fully up
    pub fn is_active(&self) -> bool {
        matches!(self, DeviceLinkStatus::Connected { .. })
    }

    /// The connected device kind, if any
    pub fn kind(&self) -> Option<DeviceKind> {
        match self {
            DeviceLinkStatus::Connected { kind } => Some(*kind),
            _ => None,
        }
    }
}

impl Default for DeviceLinkStatus {
    fn default() -> Self {
        DeviceLinkStatus::Disconnected
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
