//! Per-central wireless session state
//!
//! At most one central is connected at a time; its session owns the
//! negotiated MTU and the inbound write buffer. A new connection replaces
//! the session wholesale, so stale bytes from a previous central can never
//! leak into the next one's messages.
//!
//! Inbound and outbound framing are asymmetric. The central writes raw
//! segments that accumulate until one is flagged final (a simple write is
//! its own final segment), and the accumulated bytes parse as one UTF-8
//! JSON message. Outbound messages are chunked with the 2-byte sequence
//! header from `chunking` and sent as paced notifications.

use crate::chunking::{MIN_MTU, MTU_RESERVED};
use crate::errors::{ChunkError, WirelessError};
use crate::types::CentralId;

// ----------------------------------------------------------------------------
// Wireless Session
// ----------------------------------------------------------------------------

/// State for the currently connected central
#[derive(Debug)]
pub struct WirelessSession {
    central: CentralId,
    mtu: usize,
    max_message_size: usize,
    rx_buffer: Vec<u8>,
}

impl WirelessSession {
    pub fn new(central: CentralId, default_mtu: usize, max_message_size: usize) -> Self {
        Self {
            central,
            mtu: default_mtu,
            max_message_size,
            rx_buffer: Vec::new(),
        }
    }

    pub fn central(&self) -> &CentralId {
        &self.central
    }

    pub fn mtu(&self) -> usize {
        self.mtu
    }

    /// Record the MTU the central negotiated
    pub fn set_mtu(&mut self, mtu: usize) -> Result<(), ChunkError> {
        if mtu < MIN_MTU {
            return Err(ChunkError::MtuTooSmall { mtu, min: MIN_MTU });
        }
        self.mtu = mtu;
        Ok(())
    }

    /// Payload bytes available per outbound chunk at the current MTU
    pub fn chunk_payload_size(&self) -> usize {
        self.mtu - MTU_RESERVED
    }

    /// Append one inbound write; a final segment yields the whole message
    ///
    /// On any failure the buffer is cleared: a partial transaction that
    /// overflowed or failed to decode is unrecoverable and must not corrupt
    /// the next message.
    pub fn append_write(
        &mut self,
        data: &[u8],
        is_final: bool,
    ) -> Result<Option<String>, WirelessError> {
        if self.rx_buffer.len() + data.len() > self.max_message_size {
            let size = self.rx_buffer.len() + data.len();
            self.rx_buffer.clear();
            return Err(WirelessError::BufferOverflow {
                size,
                max: self.max_message_size,
            });
        }
        self.rx_buffer.extend_from_slice(data);

        if !is_final {
            return Ok(None);
        }
        if self.rx_buffer.is_empty() {
            return Ok(None);
        }

        let bytes = std::mem::take(&mut self.rx_buffer);
        match String::from_utf8(bytes) {
            Ok(message) => Ok(Some(message)),
            Err(_) => Err(WirelessError::InvalidEncoding),
        }
    }

    /// Drop any partially accumulated transaction
    pub fn reset(&mut self) {
        self.rx_buffer.clear();
    }

    pub fn pending_bytes(&self) -> usize {
        self.rx_buffer.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> WirelessSession {
        WirelessSession::new(CentralId::new("AA:BB:CC:DD:EE:FF"), 251, 1024)
    }

    #[test]
    fn test_simple_write_is_one_message() {
        let mut session = session();
        let message = session
            .append_write(b"{\"command\":\"ping\"}", true)
            .unwrap();
        assert_eq!(message.as_deref(), Some("{\"command\":\"ping\"}"));
        assert_eq!(session.pending_bytes(), 0);
    }

    #[test]
    fn test_prepared_write_accumulates_until_final() {
        let mut session = session();
        assert_eq!(session.append_write(b"{\"command\":", false).unwrap(), None);
        assert_eq!(session.pending_bytes(), 11);
        let message = session.append_write(b"\"ping\"}", true).unwrap();
        assert_eq!(message.as_deref(), Some("{\"command\":\"ping\"}"));
        assert_eq!(session.pending_bytes(), 0);
    }

    #[test]
    fn test_empty_final_write_yields_nothing() {
        let mut session = session();
        assert_eq!(session.append_write(b"", true).unwrap(), None);
    }

    #[test]
    fn test_overflow_clears_and_errors() {
        let mut session = WirelessSession::new(CentralId::new("AA"), 251, 8);
        session.append_write(b"12345", false).unwrap();
        let err = session.append_write(b"67890", false).unwrap_err();
        assert!(matches!(err, WirelessError::BufferOverflow { size: 10, max: 8 }));
        assert_eq!(session.pending_bytes(), 0);
    }

    #[test]
    fn test_invalid_utf8_clears_and_errors() {
        let mut session = session();
        let err = session.append_write(&[0xFF, 0xFE], true).unwrap_err();
        assert!(matches!(err, WirelessError::InvalidEncoding));
        assert_eq!(session.pending_bytes(), 0);
    }

    #[test]
    fn test_reset_discards_partial_transaction() {
        let mut session = session();
        session.append_write(b"partial", false).unwrap();
        session.reset();
        let message = session.append_write(b"{\"command\":\"ping\"}", true).unwrap();
        assert_eq!(message.as_deref(), Some("{\"command\":\"ping\"}"));
    }

    #[test]
    fn test_mtu_floor_enforced() {
        let mut session = session();
        assert!(session.set_mtu(3).is_err());
        assert_eq!(session.mtu(), 251);
        session.set_mtu(185).unwrap();
        assert_eq!(session.chunk_payload_size(), 182);
    }
}
