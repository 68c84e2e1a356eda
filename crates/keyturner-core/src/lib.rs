//! Keyturner Smart Lock Protocol Core
//!
//! Sans-IO engine for the encrypted BLE protocol spoken by keyturner smart
//! locks: the Diffie-Hellman pairing handshake, the encrypted envelope codec
//! with reassembly, and the command variants run on top of it. Nothing in
//! this crate performs I/O; the transport feeds notifications in and writes
//! out whatever the engine hands back.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod commands;
pub mod config;
pub mod credentials;
pub mod crypto;
pub mod error_codes;
pub mod errors;
pub mod protocol;
pub mod states;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use commands::{Command, CommandResponse, KeyTurnerState, ResponseData};
pub use config::{LockConfig, PairedConfig};
pub use credentials::Credentials;
pub use crypto::{KeyPair, SharedKey};
pub use errors::{
    ConfigError, CredentialError, CryptographicError, KeyturnerError, KeyturnerResult,
    PairingError, ProtocolError, Result,
};
pub use protocol::{
    ChannelEvent, ClientRole, CommandChannel, PairingOptions, PairingSession, PairingState,
    PairingStep, ProgressCallback,
};
pub use states::{DoorSensorState, LockAction, LockState, NukiState, Trigger};
