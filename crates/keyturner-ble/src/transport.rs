//! Transport capability consumed by the lock actor
//!
//! The actor never touches a BLE stack directly. Anything that can connect,
//! subscribe, write and deliver notifications for the two lock channels can
//! carry the protocol; [`crate::BtleplugTransport`] is the production
//! implementation.

use async_trait::async_trait;

use crate::error::Result;

/// Logical channel on the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockChannel {
    /// Unencrypted pairing characteristic
    Pairing,
    /// Encrypted command characteristic
    Data,
}

/// Inbound event from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Notification { channel: LockChannel, value: Vec<u8> },
    Disconnected,
}

/// Connection to one lock
#[async_trait]
pub trait LockTransport: Send {
    /// Stable identifier of the lock, usually its address
    fn id(&self) -> String;

    fn is_connected(&self) -> bool;

    /// Connect and discover the lock's characteristics
    async fn connect(&mut self) -> Result<()>;

    async fn disconnect(&mut self) -> Result<()>;

    async fn subscribe(&mut self, channel: LockChannel) -> Result<()>;

    async fn unsubscribe(&mut self, channel: LockChannel) -> Result<()>;

    /// Write one complete frame or envelope
    async fn write(&mut self, channel: LockChannel, data: &[u8]) -> Result<()>;

    /// Wait for the next event; `None` once the transport is gone
    async fn next_event(&mut self) -> Option<TransportEvent>;

    /// An already queued event, without waiting
    fn try_next_event(&mut self) -> Option<TransportEvent>;
}
