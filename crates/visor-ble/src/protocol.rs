//! BLE protocol constants for the handset link
//!
//! The service exposes a single characteristic carrying both directions:
//! the handset manager writes JSON commands to it and subscribes to it for
//! chunked JSON notifications. Subscription doubles as the signal that a
//! central is ready to receive.

use uuid::Uuid;

// ----------------------------------------------------------------------------
// Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Visor manager link service UUID
pub const VISOR_SERVICE_UUID: Uuid = Uuid::from_u128(0x12345678_1234_5678_1234_56789abcdef0);

/// Single read/write/notify characteristic carrying manager traffic
pub const VISOR_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xabcdef12_3456_789a_bcde_f01234567890);

/// Client characteristic configuration descriptor (notification enable)
pub const CCCD_UUID: Uuid = Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// Payload returned to a plain characteristic read
///
/// Reads carry no state; the fixed banner lets the manager probe the link
/// before subscribing.
pub const READ_BANNER: &[u8] = br#"{"status":"OK","message":"Hello from Visor!"}"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uuids_are_distinct() {
        assert_ne!(VISOR_SERVICE_UUID, VISOR_CHARACTERISTIC_UUID);
        assert_ne!(VISOR_CHARACTERISTIC_UUID, CCCD_UUID);
    }

    #[test]
    fn test_read_banner_is_json() {
        let value: serde_json::Value = serde_json::from_slice(READ_BANNER).unwrap();
        assert_eq!(value["status"], "OK");
    }
}
