//! Error types for the keyturner protocol
//!
//! This module contains all error types used throughout the core engine:
//! cryptographic failures, credential misuse, wire protocol faults, pairing
//! failures and persisted-config problems, unified under [`KeyturnerError`].
//!
//! None of these errors ever carry key material.

use crate::protocol::PairingState;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Specific cryptographic error types
#[derive(Debug, thiserror::Error)]
pub enum CryptographicError {
    #[error("Key derivation failed")]
    KeyDerivationFailed,
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Invalid key format")]
    InvalidKeyFormat,
    #[error("Key has an unexpected type")]
    UnexpectedKeyType,
}

/// Misuse of the write-once credential fields
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Cannot override an already set lock public key")]
    PeerPublicKeyAlreadySet,
    #[error("Lock public key is missing")]
    PeerPublicKeyMissing,
}

/// Wire protocol faults on either channel
///
/// Every variant aborts the current pairing step or command and discards the
/// in-progress reassembly buffer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Unexpected command 0x{command:04x} received during {context}")]
    UnexpectedCommand { context: String, command: u16 },
    #[error("CRC does not match")]
    CrcMismatch,
    #[error("Invalid authorization identifier: expected {expected}, got {actual}")]
    AuthorizationIdMismatch { expected: u32, actual: u32 },
    #[error("Invalid authorization identifier in encrypted payload: expected {expected}, got {actual}")]
    EncryptedAuthorizationIdMismatch { expected: u32, actual: u32 },
    #[error("Could not decrypt the payload")]
    DecryptionFailed,
    #[error("Received too much data: declared {declared} bytes, received {received}")]
    PayloadTooLong { declared: usize, received: usize },
    #[error("Payload too short (expected at least {expected}, got {actual})")]
    PayloadTooShort { expected: usize, actual: usize },
    #[error("Command {command} requires a challenge")]
    ChallengeMissing { command: &'static str },
    #[error("A command is already in progress")]
    CommandInProgress,
    #[error("Received a message but no command is active")]
    NoActiveCommand,
}

/// Pairing handshake failures
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("{message}")]
    Device { code: u8, message: String },
    #[error("The authenticator could not be verified")]
    AuthenticatorMismatch,
    #[error("{message}")]
    Rejected { message: String },
    #[error("Pairing is not in progress (state {state})")]
    NotInProgress { state: PairingState },
}

/// Persisted configuration problems
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid hex in field {field}")]
    InvalidHex { field: &'static str },
    #[error("Field {field} has length {actual}, expected {expected}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Encrypted commands can only be sent to paired locks")]
    NotPaired,
}

// ----------------------------------------------------------------------------
// Top-level Error
// ----------------------------------------------------------------------------

/// Core error types for the keyturner protocol
#[derive(Debug, thiserror::Error)]
pub enum KeyturnerError {
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptographicError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Pairing failed: {0}")]
    Pairing(#[from] PairingError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl KeyturnerError {
    /// Create an unexpected command error for the given context
    pub fn unexpected_command<C: Into<String>>(context: C, command: u16) -> Self {
        KeyturnerError::Protocol(ProtocolError::UnexpectedCommand {
            context: context.into(),
            command,
        })
    }

    /// Create a payload too short error
    pub fn payload_too_short(expected: usize, actual: usize) -> Self {
        KeyturnerError::Protocol(ProtocolError::PayloadTooShort { expected, actual })
    }

    /// Create a device error from a numeric code reported during pairing
    pub fn device(code: u8) -> Self {
        KeyturnerError::Pairing(PairingError::Device {
            code,
            message: crate::error_codes::error_message(code),
        })
    }

    /// Whether this error is an integrity or framing fault on the wire
    pub fn is_protocol_fault(&self) -> bool {
        matches!(self, KeyturnerError::Protocol(_))
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, KeyturnerError>;
pub type KeyturnerResult<T> = Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_id_mismatch_messages() {
        let clear = ProtocolError::AuthorizationIdMismatch {
            expected: 1,
            actual: 2,
        };
        let inner = ProtocolError::EncryptedAuthorizationIdMismatch {
            expected: 1,
            actual: 2,
        };
        assert_eq!(
            clear.to_string(),
            "Invalid authorization identifier: expected 1, got 2"
        );
        assert!(inner.to_string().contains("in encrypted payload"));
    }

    #[test]
    fn test_device_error_uses_mapped_message() {
        let err = KeyturnerError::device(0x10);
        assert_eq!(
            err.to_string(),
            "Pairing failed: The smart lock is not in pairing mode"
        );
        assert!(!err.is_protocol_fault());
    }
}
