//! BLE transport configuration

use std::time::Duration;

use keyturner_core::{ClientRole, PairingOptions};
use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Configuration for talking to locks over BLE
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BleTransportConfig {
    /// Maximum time to scan for a lock
    pub scan_timeout: Duration,
    /// Maximum time to wait for a connection
    pub connection_timeout: Duration,
    /// Reconnect when the link drops while a command is unfinished
    pub auto_reconnect: bool,
    /// How often the liveness monitor checks for silence
    pub liveness_interval: Duration,
    /// Silence after which a lock is reported stale
    pub liveness_timeout: Duration,
    /// Identity presented while pairing
    pub pairing: PairingOptions,
}

impl Default for BleTransportConfig {
    fn default() -> Self {
        Self {
            scan_timeout: Duration::from_secs(10),
            connection_timeout: Duration::from_secs(5),
            auto_reconnect: true,
            liveness_interval: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(60),
            pairing: PairingOptions::default(),
        }
    }
}

impl BleTransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_scan_timeout(mut self, timeout: Duration) -> Self {
        self.scan_timeout = timeout;
        self
    }

    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Enable or disable the mid-command reconnect
    pub fn with_auto_reconnect(mut self, enabled: bool) -> Self {
        self.auto_reconnect = enabled;
        self
    }

    pub fn with_liveness(mut self, interval: Duration, timeout: Duration) -> Self {
        self.liveness_interval = interval;
        self.liveness_timeout = timeout;
        self
    }

    pub fn with_role(mut self, role: ClientRole) -> Self {
        self.pairing.role = role;
        self
    }

    /// Name shown in the lock's authorization list
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.pairing.display_name = name.into();
        self
    }
}
