//! Property-based tests for the encrypted envelope
//!
//! These tests verify that sealing and reassembly are independent of how the
//! transport splits notifications, and that any tampering is rejected.

use keyturner_core::protocol::envelope::{EnvelopeCodec, EnvelopeReassembler, HEADER_SIZE};
use keyturner_core::protocol::frame::CommandId;
use keyturner_core::{KeyturnerError, ProtocolError, SharedKey};
use proptest::prelude::*;

fn arb_key() -> impl Strategy<Value = SharedKey> {
    any::<[u8; 32]>().prop_map(SharedKey::from_bytes)
}

fn arb_body() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..1024).prop_map(|payload| {
        let mut body = CommandId::KeyturnerStates.to_le_bytes().to_vec();
        body.extend_from_slice(&payload);
        body
    })
}

/// Split `bytes` at the given cut sizes, cycling through them
fn chunked(bytes: &[u8], sizes: &[usize]) -> Vec<Vec<u8>> {
    let mut chunks = Vec::new();
    let mut offset = 0;
    let mut i = 0;
    while offset < bytes.len() {
        let size = sizes[i % sizes.len()].min(bytes.len() - offset);
        chunks.push(bytes[offset..offset + size].to_vec());
        offset += size;
        i += 1;
    }
    chunks
}

proptest! {
    /// Property: decode inverts encode for every body length
    #[test]
    fn envelope_round_trip(key in arb_key(), id in any::<u32>(), body in arb_body()) {
        let codec = EnvelopeCodec::new(id, key);
        let envelope = codec.encode(&body).unwrap();
        let frame = codec.decode(&envelope).unwrap();

        prop_assert_eq!(frame.command, CommandId::KeyturnerStates.as_u16());
        prop_assert_eq!(&frame.payload[..], &body[2..]);
    }

    /// Property: reassembly yields the same envelope however it is chunked
    #[test]
    fn reassembly_ignores_chunk_boundaries(
        key in arb_key(),
        body in arb_body(),
        sizes in prop::collection::vec(1usize..64, 1..8),
    ) {
        let codec = EnvelopeCodec::new(7, key);
        let envelope = codec.encode(&body).unwrap();
        let chunks = chunked(&envelope, &sizes);
        let last = chunks.len() - 1;

        let mut reassembler = EnvelopeReassembler::new();
        for (i, chunk) in chunks.iter().enumerate() {
            let complete = reassembler.push(chunk).unwrap();
            if i < last {
                prop_assert!(complete.is_none());
            } else {
                prop_assert_eq!(complete.as_deref(), Some(&envelope[..]));
            }
        }
        prop_assert_eq!(reassembler.buffered(), 0);
    }

    /// Property: flipping any ciphertext bit fails decryption
    #[test]
    fn tampered_ciphertext_is_rejected(
        key in arb_key(),
        body in arb_body(),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let codec = EnvelopeCodec::new(3, key);
        let mut envelope = codec.encode(&body).unwrap();
        let index = HEADER_SIZE + position.index(envelope.len() - HEADER_SIZE);
        envelope[index] ^= 1 << bit;

        let err = codec.decode(&envelope).unwrap_err();
        prop_assert!(
            matches!(err, KeyturnerError::Protocol(ProtocolError::DecryptionFailed)),
            "unexpected error: {}", err
        );
    }

    /// Property: a different key never opens the envelope
    #[test]
    fn wrong_key_is_rejected(a in arb_key(), b in arb_key(), body in arb_body()) {
        prop_assume!(a != b);
        let envelope = EnvelopeCodec::new(1, a).encode(&body).unwrap();
        prop_assert!(EnvelopeCodec::new(1, b).decode(&envelope).is_err());
    }
}
