//! Error types for the BLE lock transport

use keyturner_core::KeyturnerError;
use thiserror::Error;

// ----------------------------------------------------------------------------
// Error Types
// ----------------------------------------------------------------------------

/// Errors raised while talking to a lock over BLE
#[derive(Error, Debug)]
pub enum BleTransportError {
    #[error("Failed to connect to lock: {0}")]
    ConnectionFailed(String),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Lock not connected")]
    NotConnected,

    #[error("Connection lost while waiting for the lock")]
    ConnectionLost,

    #[error("Lock not found: {id}")]
    LockNotFound { id: String },

    #[error("Failed to discover services: {0}")]
    ServiceDiscoveryFailed(String),

    #[error("The device is not a valid smart lock: missing characteristic {characteristic}")]
    CharacteristicNotFound { characteristic: String },

    #[error("Failed to subscribe to notifications: {0}")]
    SubscriptionFailed(String),

    #[error("Failed to write to characteristic: {0}")]
    WriteFailed(String),

    #[error("Failed to get BLE events: {0}")]
    EventStreamFailed(String),

    #[error("Event stream closed")]
    EventStreamClosed,

    #[error("BLE adapter not available")]
    AdapterNotAvailable,

    #[error("Encrypted commands can only be sent to paired locks")]
    NotPaired,

    #[error(transparent)]
    Protocol(#[from] KeyturnerError),
}

impl From<btleplug::Error> for BleTransportError {
    fn from(err: btleplug::Error) -> Self {
        match err {
            btleplug::Error::NotConnected => BleTransportError::NotConnected,
            btleplug::Error::DeviceNotFound => BleTransportError::LockNotFound {
                id: "unknown".to_string(),
            },
            btleplug::Error::TimedOut(_) => BleTransportError::ConnectionTimeout,
            other => BleTransportError::ConnectionFailed(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BleTransportError>;
