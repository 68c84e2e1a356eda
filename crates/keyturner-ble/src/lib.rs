//! Bluetooth Low Energy connection layer for keyturner smart locks
//!
//! This crate drives the sans-IO engine from `keyturner-core` over a real
//! BLE link. Each lock gets its own [`SmartLock`] actor which serializes
//! pairing and commands on that lock's connection.
//!
//! ## Architecture
//!
//! - [`config`] - Connection, reconnect and liveness settings
//! - [`error`] - Error types for the BLE layer
//! - [`protocol`] - GATT service and characteristic identifiers, advertisement parsing
//! - [`transport`] - The [`LockTransport`] capability the actor runs on
//! - [`connection`] - btleplug-backed scanning and transport
//! - [`monitor`] - Liveness and state-counter monitoring
//! - [`lock`] - The per-lock connection actor
//!
//! ## Usage
//!
//! ```rust,no_run
//! use keyturner_ble::{BleManager, BleTransportConfig, SmartLock};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = BleTransportConfig::new().with_display_name("Hallway tablet");
//! let manager = BleManager::new(config.clone()).await?;
//! let transport = manager.find_lock("54:D2:72:AB:CD:EF").await?;
//!
//! let mut lock = SmartLock::new(transport, config);
//! lock.connect().await?;
//! let paired = lock.pair().await?.to_json()?;
//! // Persist `paired` and restore it later with `SmartLock::with_config`
//!
//! let response = lock.unlock().await?;
//! println!("unlocked: {}", response.success);
//! # let _ = paired;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod lock;
pub mod monitor;
pub mod protocol;
pub mod transport;

// Public API exports
pub use config::BleTransportConfig;
pub use connection::{Advertisement, BleManager, BtleplugTransport};
pub use error::{BleTransportError, Result};
pub use lock::SmartLock;
pub use monitor::{LivenessTracker, MonitorEvent, StateCounter};
pub use protocol::{
    KEYTURNER_GDIO_CHARACTERISTIC_UUID, KEYTURNER_SERVICE_UUID,
    KEYTURNER_USDIO_CHARACTERISTIC_UUID, PAIRING_GDIO_CHARACTERISTIC_UUID, PAIRING_SERVICE_UUID,
};
pub use transport::{LockChannel, LockTransport, TransportEvent};

// Re-export the engine types callers need alongside the actor
pub use keyturner_core::{Command, CommandResponse, LockAction, PairedConfig, ResponseData};
