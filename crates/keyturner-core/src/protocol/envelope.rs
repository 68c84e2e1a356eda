//! Encrypted envelopes on the data channel
//!
//! ## Envelope Format
//!
//! - Nonce: 24 bytes
//! - Authorization id: 4 bytes (u32, little-endian, cleartext)
//! - Ciphertext length: 2 bytes (u16, little-endian)
//! - Ciphertext: XSalsa20-Poly1305 secret box (16-byte tag first)
//!
//! The ciphertext opens to `authorizationId(4) || commandId(2) || payload ||
//! crc16(2)`, the checksum covering everything before it.

use crypto_secretbox::aead::{Aead, KeyInit};
use crypto_secretbox::{Key, Nonce, XSalsa20Poly1305};
use tracing::trace;

use super::crc::{append_crc, verify_crc, CRC_SIZE};
use super::frame::{read_command, Frame};
use crate::crypto::{random_bytes, SharedKey};
use crate::errors::{CryptographicError, ProtocolError};
use crate::Result;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

pub const NONCE_SIZE: usize = 24;
pub const MAC_SIZE: usize = 16;

/// Offset of the cleartext authorization id
pub const AUTH_ID_OFFSET: usize = NONCE_SIZE;

/// Offset of the declared ciphertext length
pub const LENGTH_OFFSET: usize = AUTH_ID_OFFSET + 4;

/// Bytes needed before the declared length can be read
pub const HEADER_SIZE: usize = LENGTH_OFFSET + 2;

/// Smallest valid decrypted body: auth id, command id and checksum
pub const MIN_PLAINTEXT_SIZE: usize = 4 + 2 + CRC_SIZE;

// ----------------------------------------------------------------------------
// Secret Box
// ----------------------------------------------------------------------------

/// Encrypt `plaintext` into a secret box under `key` and `nonce`
pub fn seal(key: &SharedKey, nonce: &[u8; NONCE_SIZE], plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = <XSalsa20Poly1305 as KeyInit>::new(Key::from_slice(key.as_bytes()));
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| CryptographicError::EncryptionFailed.into())
}

/// Open a secret box; any tampering or a wrong key fails
pub fn open(key: &SharedKey, nonce: &[u8; NONCE_SIZE], ciphertext: &[u8]) -> Result<Vec<u8>> {
    let cipher = <XSalsa20Poly1305 as KeyInit>::new(Key::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| ProtocolError::DecryptionFailed.into())
}

// ----------------------------------------------------------------------------
// Envelope Codec
// ----------------------------------------------------------------------------

/// Encodes outbound and validates inbound envelopes for one paired lock
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    authorization_id: u32,
    key: SharedKey,
}

impl EnvelopeCodec {
    pub fn new(authorization_id: u32, key: SharedKey) -> Self {
        Self {
            authorization_id,
            key,
        }
    }

    pub fn authorization_id(&self) -> u32 {
        self.authorization_id
    }

    /// Wrap a `commandId || payload` body with a fresh random nonce
    pub fn encode(&self, body: &[u8]) -> Result<Vec<u8>> {
        self.encode_with_nonce(body, &random_bytes::<NONCE_SIZE>())
    }

    /// Wrap a `commandId || payload` body with the given nonce
    pub fn encode_with_nonce(&self, body: &[u8], nonce: &[u8; NONCE_SIZE]) -> Result<Vec<u8>> {
        let auth_id = self.authorization_id.to_le_bytes();

        let mut plaintext = Vec::with_capacity(4 + body.len());
        plaintext.extend_from_slice(&auth_id);
        plaintext.extend_from_slice(body);
        let plaintext = append_crc(&plaintext);

        let ciphertext = seal(&self.key, nonce, &plaintext)?;
        let length = u16::try_from(ciphertext.len())
            .map_err(|_| CryptographicError::EncryptionFailed)?;

        let mut envelope = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        envelope.extend_from_slice(nonce);
        envelope.extend_from_slice(&auth_id);
        envelope.extend_from_slice(&length.to_le_bytes());
        envelope.extend_from_slice(&ciphertext);
        Ok(envelope)
    }

    /// Validate and decrypt one complete envelope
    ///
    /// Checks run in order: cleartext authorization id, decryption, checksum,
    /// then the authorization id inside the plaintext.
    pub fn decode(&self, envelope: &[u8]) -> Result<Frame> {
        if envelope.len() < HEADER_SIZE {
            return Err(ProtocolError::PayloadTooShort {
                expected: HEADER_SIZE,
                actual: envelope.len(),
            }
            .into());
        }

        let declared = read_length(envelope);
        let ciphertext = &envelope[HEADER_SIZE..];
        if ciphertext.len() != declared {
            return Err(ProtocolError::PayloadTooLong {
                declared,
                received: ciphertext.len(),
            }
            .into());
        }

        let clear_id = read_u32(&envelope[AUTH_ID_OFFSET..]);
        if clear_id != self.authorization_id {
            return Err(ProtocolError::AuthorizationIdMismatch {
                expected: self.authorization_id,
                actual: clear_id,
            }
            .into());
        }

        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&envelope[..NONCE_SIZE]);
        let plaintext = open(&self.key, &nonce, ciphertext)?;

        if plaintext.len() < MIN_PLAINTEXT_SIZE {
            return Err(ProtocolError::PayloadTooShort {
                expected: MIN_PLAINTEXT_SIZE,
                actual: plaintext.len(),
            }
            .into());
        }
        if !verify_crc(&plaintext) {
            return Err(ProtocolError::CrcMismatch.into());
        }

        let inner_id = read_u32(&plaintext);
        if inner_id != self.authorization_id {
            return Err(ProtocolError::EncryptedAuthorizationIdMismatch {
                expected: self.authorization_id,
                actual: inner_id,
            }
            .into());
        }

        let body = &plaintext[4..plaintext.len() - CRC_SIZE];
        Ok(Frame::new(read_command(body), body[2..].to_vec()))
    }
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn read_length(bytes: &[u8]) -> usize {
    u16::from_le_bytes([bytes[LENGTH_OFFSET], bytes[LENGTH_OFFSET + 1]]) as usize
}

// ----------------------------------------------------------------------------
// Reassembly
// ----------------------------------------------------------------------------

/// Accumulates notification chunks until one envelope is complete
#[derive(Debug, Default)]
pub struct EnvelopeReassembler {
    buffer: Vec<u8>,
}

impl EnvelopeReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk; returns the envelope once exactly complete
    ///
    /// Receiving more ciphertext than declared clears the buffer and fails.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>> {
        self.buffer.extend_from_slice(chunk);

        if self.buffer.len() < HEADER_SIZE {
            trace!(buffered = self.buffer.len(), "Waiting for envelope header");
            return Ok(None);
        }

        let declared = read_length(&self.buffer);
        let received = self.buffer.len() - HEADER_SIZE;

        if received < declared {
            trace!(declared, received, "Waiting for more ciphertext");
            Ok(None)
        } else if received > declared {
            self.buffer.clear();
            Err(ProtocolError::PayloadTooLong { declared, received }.into())
        } else {
            Ok(Some(std::mem::take(&mut self.buffer)))
        }
    }

    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KeyturnerError;
    use crate::protocol::frame::{encode_command, CommandId};

    fn codec(auth_id: u32) -> EnvelopeCodec {
        EnvelopeCodec::new(auth_id, SharedKey::from_bytes([0x42; 32]))
    }

    #[test]
    fn test_envelope_layout() {
        let codec = codec(0x0A0B0C0D);
        let nonce = [0x11; NONCE_SIZE];
        let envelope = codec
            .encode_with_nonce(&encode_command(CommandId::RequestData, &[0x0C, 0x00]), &nonce)
            .unwrap();

        // 4 auth + 2 cmd + 2 payload + 2 crc + 16 mac
        assert_eq!(envelope.len(), HEADER_SIZE + 26);
        assert_eq!(&envelope[..NONCE_SIZE], &nonce);
        assert_eq!(&envelope[24..28], &0x0A0B0C0Du32.to_le_bytes());
        assert_eq!(&envelope[28..30], &26u16.to_le_bytes());
    }

    #[test]
    fn test_decode_round_trip() {
        let codec = codec(7);
        let envelope = codec
            .encode(&encode_command(CommandId::Status, &[0x01]))
            .unwrap();
        let frame = codec.decode(&envelope).unwrap();
        assert!(frame.is(CommandId::Status));
        assert_eq!(frame.payload, vec![0x01]);
    }

    #[test]
    fn test_cleartext_auth_id_mismatch() {
        let envelope = codec(7)
            .encode(&encode_command(CommandId::Status, &[0x00]))
            .unwrap();
        let err = codec(8).decode(&envelope).unwrap_err();
        assert!(matches!(
            err,
            KeyturnerError::Protocol(ProtocolError::AuthorizationIdMismatch { expected: 8, actual: 7 })
        ));
    }

    #[test]
    fn test_inner_auth_id_mismatch() {
        let mut envelope = codec(7)
            .encode(&encode_command(CommandId::Status, &[0x00]))
            .unwrap();
        // Rewrite only the cleartext id
        envelope[24..28].copy_from_slice(&8u32.to_le_bytes());
        let err = codec(8).decode(&envelope).unwrap_err();
        assert!(matches!(
            err,
            KeyturnerError::Protocol(ProtocolError::EncryptedAuthorizationIdMismatch { .. })
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let codec = codec(7);
        let mut envelope = codec
            .encode(&encode_command(CommandId::Status, &[0x00]))
            .unwrap();
        let last = envelope.len() - 1;
        envelope[last] ^= 0x01;
        assert!(matches!(
            codec.decode(&envelope),
            Err(KeyturnerError::Protocol(ProtocolError::DecryptionFailed))
        ));
    }

    #[test]
    fn test_bad_inner_crc_fails() {
        let key = SharedKey::from_bytes([0x42; 32]);
        let nonce = [3u8; NONCE_SIZE];
        let mut plaintext = Vec::new();
        plaintext.extend_from_slice(&7u32.to_le_bytes());
        plaintext.extend_from_slice(&[0x0E, 0x00, 0x00, 0xDE, 0xAD]);
        let ciphertext = seal(&key, &nonce, &plaintext).unwrap();

        let mut envelope = nonce.to_vec();
        envelope.extend_from_slice(&7u32.to_le_bytes());
        envelope.extend_from_slice(&(ciphertext.len() as u16).to_le_bytes());
        envelope.extend_from_slice(&ciphertext);

        assert!(matches!(
            codec(7).decode(&envelope),
            Err(KeyturnerError::Protocol(ProtocolError::CrcMismatch))
        ));
    }

    #[test]
    fn test_reassembler_waits_for_header_and_body() {
        let envelope = codec(1)
            .encode(&encode_command(CommandId::Status, &[0x00]))
            .unwrap();
        let mut reassembler = EnvelopeReassembler::new();

        assert!(reassembler.push(&envelope[..29]).unwrap().is_none());
        assert!(reassembler.push(&envelope[29..40]).unwrap().is_none());
        let complete = reassembler.push(&envelope[40..]).unwrap().unwrap();
        assert_eq!(complete, envelope);
        assert_eq!(reassembler.buffered(), 0);
    }

    #[test]
    fn test_reassembler_rejects_overlong_input() {
        let mut envelope = codec(1)
            .encode(&encode_command(CommandId::Status, &[0x00]))
            .unwrap();
        envelope.push(0xFF);

        let mut reassembler = EnvelopeReassembler::new();
        let err = reassembler.push(&envelope).unwrap_err();
        assert!(matches!(
            err,
            KeyturnerError::Protocol(ProtocolError::PayloadTooLong { .. })
        ));
        assert_eq!(reassembler.buffered(), 0);
    }
}
