//! Wireless message chunking and reassembly
//!
//! Messages to the handset are arbitrary-length JSON; the link layer carries
//! at most MTU bytes per notification. This module splits an encoded message
//! into chunks of `mtu - 3` payload bytes, each prefixed with a 2-byte header
//! `[sequence_index][total_chunks]`, and reassembles the counterpart stream.
//!
//! Chunked sends are fire-and-forget: there is no acknowledgement and no
//! retransmission. Reassembly assumes in-order delivery within one session.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::errors::ChunkError;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Size of the per-chunk header in bytes
pub const CHUNK_HEADER_SIZE: usize = 2;

/// Bytes reserved out of the MTU for link-layer overhead; the chunk payload
/// is `mtu - MTU_RESERVED`
pub const MTU_RESERVED: usize = 3;

/// Smallest MTU that still leaves at least one payload byte per chunk
pub const MIN_MTU: usize = 4;

/// Maximum number of chunks per message (total_chunks is a u8)
pub const MAX_CHUNKS: usize = u8::MAX as usize;

/// Default cap on a reassembled message, guarding against hostile centrals
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 * 1024;

// ----------------------------------------------------------------------------
// Chunk Header
// ----------------------------------------------------------------------------

/// Two-byte header carried by every chunk: `[sequence_index][total_chunks]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkHeader {
    /// Zero-based index of this chunk within the message
    pub sequence: u8,
    /// Total number of chunks in the message
    pub total: u8,
}

impl ChunkHeader {
    pub fn new(sequence: u8, total: u8) -> Self {
        Self { sequence, total }
    }

    /// Encode the header into its wire form
    pub fn encode(&self) -> [u8; CHUNK_HEADER_SIZE] {
        [self.sequence, self.total]
    }

    /// Decode a header from the front of a chunk
    pub fn decode(chunk: &[u8]) -> Result<Self, ChunkError> {
        if chunk.len() < CHUNK_HEADER_SIZE {
            return Err(ChunkError::ChunkTooShort { len: chunk.len() });
        }
        let header = Self {
            sequence: chunk[0],
            total: chunk[1],
        };
        if header.total == 0 {
            return Err(ChunkError::EmptyMessage);
        }
        if header.sequence >= header.total {
            return Err(ChunkError::SequenceOutOfRange {
                sequence: header.sequence,
                total: header.total,
            });
        }
        Ok(header)
    }
}

// ----------------------------------------------------------------------------
// Chunking
// ----------------------------------------------------------------------------

/// Payload bytes available per chunk at a given MTU
pub fn chunk_payload_size(mtu: usize) -> Result<usize, ChunkError> {
    if mtu < MIN_MTU {
        return Err(ChunkError::MtuTooSmall { mtu, min: MIN_MTU });
    }
    Ok(mtu - MTU_RESERVED)
}

/// Split an encoded message into wire chunks for the given MTU
///
/// Every returned chunk starts with a `ChunkHeader`; chunks are produced in
/// sequence order. An empty message still yields one chunk so the receiver
/// observes a complete (empty) delivery.
pub fn chunk_message(payload: &[u8], mtu: usize) -> Result<SmallVec<[Vec<u8>; 4]>, ChunkError> {
    let payload_size = chunk_payload_size(mtu)?;
    let total = if payload.is_empty() {
        1
    } else {
        payload.len().div_ceil(payload_size)
    };
    if total > MAX_CHUNKS {
        return Err(ChunkError::TooManyChunks {
            required: total,
            max: MAX_CHUNKS,
        });
    }

    let mut chunks = SmallVec::new();
    for (index, piece) in ChunkPieces::new(payload, payload_size, total).enumerate() {
        let header = ChunkHeader::new(index as u8, total as u8);
        let mut chunk = Vec::with_capacity(CHUNK_HEADER_SIZE + piece.len());
        chunk.extend_from_slice(&header.encode());
        chunk.extend_from_slice(piece);
        chunks.push(chunk);
    }
    Ok(chunks)
}

/// Iterator over payload pieces, emitting exactly `total` pieces even for an
/// empty payload
struct ChunkPieces<'a> {
    payload: &'a [u8],
    piece_size: usize,
    remaining: usize,
    offset: usize,
}

impl<'a> ChunkPieces<'a> {
    fn new(payload: &'a [u8], piece_size: usize, total: usize) -> Self {
        Self {
            payload,
            piece_size,
            remaining: total,
            offset: 0,
        }
    }
}

impl<'a> Iterator for ChunkPieces<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let end = usize::min(self.offset + self.piece_size, self.payload.len());
        let piece = &self.payload[self.offset..end];
        self.offset = end;
        Some(piece)
    }
}

// ----------------------------------------------------------------------------
// Reassembly
// ----------------------------------------------------------------------------

/// Reassembles one message at a time from a stream of chunks
///
/// The reassembler is per-session state: a new central connection replaces it
/// wholesale. A chunk with sequence 0 implicitly starts a new message,
/// discarding any incomplete predecessor.
#[derive(Debug)]
pub struct ChunkReassembler {
    expected_total: Option<u8>,
    received: Vec<Vec<u8>>,
    bytes: usize,
    max_message_size: usize,
}

impl Default for ChunkReassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE)
    }
}

impl ChunkReassembler {
    pub fn new(max_message_size: usize) -> Self {
        Self {
            expected_total: None,
            received: Vec::new(),
            bytes: 0,
            max_message_size,
        }
    }

    /// Accept one wire chunk; returns the complete message once the final
    /// chunk arrives
    pub fn accept(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, ChunkError> {
        let header = ChunkHeader::decode(chunk)?;
        let payload = &chunk[CHUNK_HEADER_SIZE..];

        if header.sequence == 0 {
            if self.in_progress() {
                tracing::debug!(
                    dropped_bytes = self.bytes,
                    "new message started over an incomplete one"
                );
            }
            self.reset();
            self.expected_total = Some(header.total);
        }

        let expected_total = match self.expected_total {
            Some(total) => total,
            // Mid-message chunk with no message in progress (lost start).
            None => {
                return Err(ChunkError::SequenceOutOfRange {
                    sequence: header.sequence,
                    total: header.total,
                })
            }
        };

        if header.total != expected_total {
            let err = ChunkError::TotalMismatch {
                expected: expected_total,
                actual: header.total,
            };
            self.reset();
            return Err(err);
        }

        let next = self.received.len() as u8;
        if header.sequence < next {
            return Err(ChunkError::DuplicateChunk {
                sequence: header.sequence,
            });
        }
        if header.sequence > next {
            // In-order delivery assumption violated; abandon the message.
            let err = ChunkError::SequenceOutOfRange {
                sequence: header.sequence,
                total: header.total,
            };
            self.reset();
            return Err(err);
        }

        if self.bytes + payload.len() > self.max_message_size {
            let err = ChunkError::MessageTooLarge {
                size: self.bytes + payload.len(),
                max: self.max_message_size,
            };
            self.reset();
            return Err(err);
        }

        self.bytes += payload.len();
        self.received.push(payload.to_vec());

        if self.received.len() == expected_total as usize {
            let mut message = Vec::with_capacity(self.bytes);
            for piece in self.received.drain(..) {
                message.extend_from_slice(&piece);
            }
            self.reset();
            Ok(Some(message))
        } else {
            Ok(None)
        }
    }

    /// Discard any partially reassembled message
    pub fn reset(&mut self) {
        self.expected_total = None;
        self.received.clear();
        self.bytes = 0;
    }

    /// Whether a message is partially reassembled
    pub fn in_progress(&self) -> bool {
        self.expected_total.is_some() && !self.received.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
