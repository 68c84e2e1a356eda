//! Device enumerations carried in command payloads
//!
//! Every enumeration keeps an `Unknown(u8)` fallback so that firmware adding
//! new values never makes a response undecodable.

use core::fmt;

use serde::{Serialize, Serializer};

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident = $value:literal => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            Unknown(u8),
        }

        impl $name {
            pub fn from_u8(value: u8) -> Self {
                match value {
                    $($value => Self::$variant,)+
                    other => Self::Unknown(other),
                }
            }

            pub fn as_u8(self) -> u8 {
                match self {
                    $(Self::$variant => $value,)+
                    Self::Unknown(other) => other,
                }
            }

            pub fn name(self) -> Option<&'static str> {
                match self {
                    $(Self::$variant => Some($label),)+
                    Self::Unknown(_) => None,
                }
            }
        }

        impl From<u8> for $name {
            fn from(value: u8) -> Self {
                Self::from_u8(value)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match self.name() {
                    Some(label) => f.write_str(label),
                    None => write!(f, "UNKNOWN(0x{:02x})", self.as_u8()),
                }
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                match self.name() {
                    Some(label) => serializer.serialize_str(label),
                    None => serializer.serialize_u8(self.as_u8()),
                }
            }
        }
    };
}

wire_enum! {
    /// Operating mode of the lock
    pub enum NukiState {
        Uninitialized = 0x00 => "UNINITIALIZED",
        PairingMode = 0x01 => "PAIRING_MODE",
        DoorMode = 0x02 => "DOOR_MODE",
        MaintenanceMode = 0x04 => "MAINTENANCE_MODE",
    }
}

wire_enum! {
    /// Mechanical lock state
    pub enum LockState {
        Uncalibrated = 0x00 => "UNCALIBRATED",
        Locked = 0x01 => "LOCKED",
        Unlocking = 0x02 => "UNLOCKING",
        Unlocked = 0x03 => "UNLOCKED",
        Locking = 0x04 => "LOCKING",
        Unlatched = 0x05 => "UNLATCHED",
        UnlockedLockNGo = 0x06 => "UNLOCKED_LOCK_N_GO",
        Unlatching = 0x07 => "UNLATCHING",
        Calibration = 0xFC => "CALIBRATION",
        BootRun = 0xFD => "BOOT_RUN",
        MotorBlocked = 0xFE => "MOTOR_BLOCKED",
        Undefined = 0xFF => "UNDEFINED",
    }
}

wire_enum! {
    /// What caused the last state change
    pub enum Trigger {
        System = 0x00 => "SYSTEM",
        Manual = 0x01 => "MANUAL",
        Button = 0x02 => "BUTTON",
        Automatic = 0x03 => "AUTOMATIC",
    }
}

wire_enum! {
    /// Action requested by a lock action command
    pub enum LockAction {
        Unlock = 0x01 => "UNLOCK",
        Lock = 0x02 => "LOCK",
        Unlatch = 0x03 => "UNLATCH",
        LockNGo = 0x04 => "LOCK_N_GO",
        LockNGoUnlatch = 0x05 => "LOCK_N_GO_UNLATCH",
        FullLock = 0x06 => "FULL_LOCK",
        FobAction1 = 0x81 => "FOB_ACTION_1",
        FobAction2 = 0x82 => "FOB_ACTION_2",
        FobAction3 = 0x83 => "FOB_ACTION_3",
    }
}

wire_enum! {
    pub enum DoorSensorState {
        Unavailable = 0x00 => "UNAVAILABLE",
        Deactivated = 0x01 => "DEACTIVATED",
        Closed = 0x02 => "CLOSED",
        Open = 0x03 => "OPEN",
        Indeterminate = 0x04 => "UNKNOWN",
        Calibrating = 0x05 => "CALIBRATING",
    }
}

wire_enum! {
    pub enum HomeKitStatus {
        NotAvailable = 0x00 => "NOT_AVAILABLE",
        Disabled = 0x01 => "DISABLED",
        Enabled = 0x02 => "ENABLED",
        EnabledPaired = 0x03 => "ENABLED_PAIRED",
    }
}

wire_enum! {
    pub enum DstMode {
        Disabled = 0x00 => "DISABLED",
        European = 0x01 => "EUROPEAN",
    }
}

wire_enum! {
    /// Action bound to a key fob button press
    pub enum FobAction {
        NoAction = 0x00 => "NO_ACTION",
        Unlock = 0x01 => "UNLOCK",
        Lock = 0x02 => "LOCK",
        LockNGo = 0x03 => "LOCK_N_GO",
        Intelligent = 0x04 => "INTELLIGENT",
    }
}

wire_enum! {
    pub enum AdvertisingMode {
        Automatic = 0x00 => "AUTOMATIC",
        Normal = 0x01 => "NORMAL",
        Slow = 0x02 => "SLOW",
        Slowest = 0x03 => "SLOWEST",
    }
}

wire_enum! {
    /// Action bound to the lock's own button
    pub enum ButtonPressAction {
        NoAction = 0x00 => "NO_ACTION",
        Intelligent = 0x01 => "INTELLIGENT",
        Unlock = 0x02 => "UNLOCK",
        Lock = 0x03 => "LOCK",
        Unlatch = 0x04 => "UNLATCH",
        LockNGo = 0x05 => "LOCK_N_GO",
        ShowStatus = 0x06 => "SHOW_STATUS",
    }
}

wire_enum! {
    pub enum BatteryType {
        Alkaline = 0x00 => "ALKALINE",
        Accumulators = 0x01 => "ACCUMULATORS",
        Lithium = 0x02 => "LITHIUM",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_and_unknown_values() {
        assert_eq!(LockState::from_u8(0x03), LockState::Unlocked);
        assert_eq!(LockState::from_u8(0x42), LockState::Unknown(0x42));
        assert_eq!(LockState::Unknown(0x42).as_u8(), 0x42);
        assert_eq!(LockAction::FobAction2.as_u8(), 0x82);
    }

    #[test]
    fn test_door_sensor_unknown_label_is_not_fallback() {
        // 0x04 is a real "unknown" reading, distinct from unmapped values
        assert_eq!(DoorSensorState::from_u8(0x04), DoorSensorState::Indeterminate);
        assert_eq!(DoorSensorState::from_u8(0x04).name(), Some("UNKNOWN"));
        assert_eq!(DoorSensorState::from_u8(0x09), DoorSensorState::Unknown(0x09));
    }

    #[test]
    fn test_display_and_serialize() {
        assert_eq!(Trigger::Button.to_string(), "BUTTON");
        assert_eq!(Trigger::from_u8(0x10).to_string(), "UNKNOWN(0x10)");
        assert_eq!(serde_json::to_string(&NukiState::DoorMode).unwrap(), "\"DOOR_MODE\"");
        assert_eq!(serde_json::to_string(&NukiState::from_u8(9)).unwrap(), "9");
    }
}
