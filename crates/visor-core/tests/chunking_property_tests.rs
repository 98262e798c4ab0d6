//! Property-based tests for wireless message chunking
//!
//! These tests verify the framing invariants: a message chunked at any
//! valid MTU reassembles to itself, every chunk respects the MTU budget,
//! and sequence numbering is dense and zero-based.

use proptest::prelude::*;

use visor_core::chunking::{
    chunk_message, ChunkHeader, ChunkReassembler, CHUNK_HEADER_SIZE, MAX_CHUNKS, MIN_MTU,
    MTU_RESERVED,
};

/// Generate arbitrary message payloads up to a few chunks' worth
fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..2048)
}

/// Generate MTUs across the valid range, biased toward small values where
/// the arithmetic is tightest
fn arb_mtu() -> impl Strategy<Value = usize> {
    prop_oneof![
        MIN_MTU..=32usize,
        33..=185usize,
        186..=517usize,
    ]
}

proptest! {
    /// Property: chunk then reassemble returns the original payload for any
    /// MTU of at least MIN_MTU
    #[test]
    fn chunk_reassemble_round_trip(payload in arb_payload(), mtu in arb_mtu()) {
        let payload_size = mtu - MTU_RESERVED;
        let required = payload.len().div_ceil(payload_size).max(1);
        prop_assume!(required <= MAX_CHUNKS);

        let chunks = chunk_message(&payload, mtu).expect("chunking should succeed");

        let mut reassembler = ChunkReassembler::default();
        let mut result = None;
        for chunk in &chunks {
            result = reassembler.accept(chunk).expect("accept should succeed");
        }
        prop_assert_eq!(result, Some(payload));
    }

    /// Property: no chunk ever exceeds header-plus-payload budget, and every
    /// chunk except the last is full
    #[test]
    fn chunks_respect_mtu_budget(payload in arb_payload(), mtu in arb_mtu()) {
        let payload_size = mtu - MTU_RESERVED;
        let required = payload.len().div_ceil(payload_size).max(1);
        prop_assume!(required <= MAX_CHUNKS);

        let chunks = chunk_message(&payload, mtu).expect("chunking should succeed");
        let budget = CHUNK_HEADER_SIZE + payload_size;

        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert!(chunk.len() <= budget);
            if i + 1 < chunks.len() {
                prop_assert_eq!(chunk.len(), budget);
            }
        }
    }

    /// Property: sequence indices are dense from zero and every header
    /// agrees on the total
    #[test]
    fn sequence_numbering_is_dense(payload in arb_payload(), mtu in arb_mtu()) {
        let payload_size = mtu - MTU_RESERVED;
        let required = payload.len().div_ceil(payload_size).max(1);
        prop_assume!(required <= MAX_CHUNKS);

        let chunks = chunk_message(&payload, mtu).expect("chunking should succeed");

        for (i, chunk) in chunks.iter().enumerate() {
            let header = ChunkHeader::decode(chunk).expect("header should decode");
            prop_assert_eq!(header.sequence as usize, i);
            prop_assert_eq!(header.total as usize, chunks.len());
        }
    }

    /// Property: total chunk count matches the payload length arithmetic
    #[test]
    fn chunk_count_matches_arithmetic(payload in arb_payload(), mtu in arb_mtu()) {
        let payload_size = mtu - MTU_RESERVED;
        let required = payload.len().div_ceil(payload_size).max(1);
        prop_assume!(required <= MAX_CHUNKS);

        let chunks = chunk_message(&payload, mtu).expect("chunking should succeed");
        prop_assert_eq!(chunks.len(), required);
    }
}

#[test]
fn rejects_mtu_below_floor() {
    for mtu in 0..MIN_MTU {
        assert!(chunk_message(b"payload", mtu).is_err());
    }
}
