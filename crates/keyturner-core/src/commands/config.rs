//! Device configuration queries
//!
//! Both structures are decoded from fixed offsets; only their wire encoding
//! is modelled here.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::codec::{DecodeResult, PayloadReader};
use super::Outcome;
use crate::crypto::Challenge;
use crate::errors::KeyturnerError;
use crate::protocol::frame::{encode_command, CommandId};
use crate::states::{AdvertisingMode, BatteryType, ButtonPressAction, DstMode, FobAction, HomeKitStatus};
use crate::Result;

pub const CONFIG_SIZE: usize = 74;
pub const ADVANCED_CONFIG_SIZE: usize = 19;

// ----------------------------------------------------------------------------
// Config
// ----------------------------------------------------------------------------

/// Payload of a `CONFIG` frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    pub nuki_id: u32,
    pub name: String,
    pub latitude: f32,
    pub longitude: f32,
    pub auto_unlatch: bool,
    pub pairing_enabled: bool,
    pub button_enabled: bool,
    pub led_enabled: bool,
    pub led_brightness: u8,
    pub current_time: NaiveDateTime,
    pub utc_offset_seconds: i16,
    pub dst_mode: DstMode,
    pub has_fob: bool,
    pub fob_action_1: FobAction,
    pub fob_action_2: FobAction,
    pub fob_action_3: FobAction,
    pub single_lock: bool,
    pub advertising_mode: AdvertisingMode,
    pub has_keypad: bool,
    pub firmware_version: String,
    pub hardware_revision: String,
    pub homekit_status: HomeKitStatus,
    pub time_zone_id: u16,
}

impl DeviceConfig {
    pub fn decode(payload: &[u8]) -> DecodeResult<Self> {
        let r = PayloadReader::new(payload, CONFIG_SIZE)?;
        Ok(Self {
            nuki_id: r.u32(0)?,
            name: r.string(4, 32)?,
            latitude: r.f32(36)?,
            longitude: r.f32(40)?,
            auto_unlatch: r.flag(44)?,
            pairing_enabled: r.flag(45)?,
            button_enabled: r.flag(46)?,
            led_enabled: r.flag(47)?,
            led_brightness: r.u8(48)?,
            current_time: r.local_datetime(49, "currentTime")?,
            utc_offset_seconds: r.i16(56)?,
            dst_mode: DstMode::from_u8(r.u8(58)?),
            has_fob: r.flag(59)?,
            fob_action_1: FobAction::from_u8(r.u8(60)?),
            fob_action_2: FobAction::from_u8(r.u8(61)?),
            fob_action_3: FobAction::from_u8(r.u8(62)?),
            single_lock: r.flag(63)?,
            advertising_mode: AdvertisingMode::from_u8(r.u8(64)?),
            has_keypad: r.flag(65)?,
            firmware_version: r.version(66, 3)?,
            hardware_revision: r.version(69, 2)?,
            homekit_status: HomeKitStatus::from_u8(r.u8(71)?),
            time_zone_id: r.u16(72)?,
        })
    }
}

/// Reads the [`DeviceConfig`]; requires a challenge
#[derive(Debug, Default)]
pub struct RequestConfigCommand {
    config: Option<DeviceConfig>,
}

impl RequestConfigCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_data(&self, challenge: &Challenge) -> Vec<u8> {
        encode_command(CommandId::RequestConfig, challenge)
    }

    pub fn handle_data(&mut self, command: u16, payload: &[u8]) -> Result<Outcome> {
        if command != CommandId::Config.as_u16() {
            return Err(KeyturnerError::unexpected_command("RequestConfig", command));
        }
        Ok(match DeviceConfig::decode(payload) {
            Ok(config) => {
                self.config = Some(config);
                Outcome::Complete
            }
            Err(err) => Outcome::Failed(err.to_string()),
        })
    }

    pub fn into_config(self) -> Option<DeviceConfig> {
        self.config
    }
}

// ----------------------------------------------------------------------------
// Advanced Config
// ----------------------------------------------------------------------------

/// Payload of an `ADVANCED_CONFIG` frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancedDeviceConfig {
    pub total_degrees: u16,
    pub unlocked_position_offset_degrees: i16,
    pub locked_position_offset_degrees: i16,
    pub single_locked_position_offset_degrees: i16,
    pub unlocked_to_locked_transition_offset_degrees: i16,
    pub lock_n_go_timeout: u8,
    pub single_button_press_action: ButtonPressAction,
    pub double_button_press_action: ButtonPressAction,
    pub detached_cylinder: bool,
    pub battery_type: BatteryType,
    pub automatic_battery_type_detection: bool,
    pub unlatch_duration: u8,
    pub auto_lock_timeout: u16,
}

impl AdvancedDeviceConfig {
    pub fn decode(payload: &[u8]) -> DecodeResult<Self> {
        let r = PayloadReader::new(payload, ADVANCED_CONFIG_SIZE)?;
        Ok(Self {
            total_degrees: r.u16(0)?,
            unlocked_position_offset_degrees: r.i16(2)?,
            locked_position_offset_degrees: r.i16(4)?,
            single_locked_position_offset_degrees: r.i16(6)?,
            unlocked_to_locked_transition_offset_degrees: r.i16(8)?,
            lock_n_go_timeout: r.u8(10)?,
            single_button_press_action: ButtonPressAction::from_u8(r.u8(11)?),
            double_button_press_action: ButtonPressAction::from_u8(r.u8(12)?),
            detached_cylinder: r.flag(13)?,
            battery_type: BatteryType::from_u8(r.u8(14)?),
            automatic_battery_type_detection: r.flag(15)?,
            unlatch_duration: r.u8(16)?,
            auto_lock_timeout: r.u16(17)?,
        })
    }
}

/// Reads the [`AdvancedDeviceConfig`]; requires a challenge
#[derive(Debug, Default)]
pub struct RequestAdvancedConfigCommand {
    config: Option<AdvancedDeviceConfig>,
}

impl RequestAdvancedConfigCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_data(&self, challenge: &Challenge) -> Vec<u8> {
        encode_command(CommandId::RequestAdvancedConfig, challenge)
    }

    pub fn handle_data(&mut self, command: u16, payload: &[u8]) -> Result<Outcome> {
        if command != CommandId::AdvancedConfig.as_u16() {
            return Err(KeyturnerError::unexpected_command(
                "RequestAdvancedConfig",
                command,
            ));
        }
        Ok(match AdvancedDeviceConfig::decode(payload) {
            Ok(config) => {
                self.config = Some(config);
                Outcome::Complete
            }
            Err(err) => Outcome::Failed(err.to_string()),
        })
    }

    pub fn into_config(self) -> Option<AdvancedDeviceConfig> {
        self.config
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn sample_config_payload() -> Vec<u8> {
        let mut p = Vec::with_capacity(CONFIG_SIZE);
        p.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        let mut name = b"Front Door".to_vec();
        name.resize(32, 0);
        p.extend_from_slice(&name);
        p.extend_from_slice(&48.2f32.to_le_bytes());
        p.extend_from_slice(&16.37f32.to_le_bytes());
        p.extend_from_slice(&[1, 1, 1, 0, 3]);
        p.extend_from_slice(&2022u16.to_le_bytes());
        p.extend_from_slice(&[12, 31, 23, 0, 0]);
        p.extend_from_slice(&3600i16.to_le_bytes());
        p.extend_from_slice(&[1, 1, 1, 2, 4, 0, 2, 1]);
        p.extend_from_slice(&[2, 0, 5]);
        p.extend_from_slice(&[18, 4]);
        p.push(3);
        p.extend_from_slice(&37u16.to_le_bytes());
        p
    }

    pub(crate) fn sample_advanced_payload() -> Vec<u8> {
        let mut p = Vec::with_capacity(ADVANCED_CONFIG_SIZE);
        p.extend_from_slice(&900u16.to_le_bytes());
        for offset in [-10i16, 20, -30, 40] {
            p.extend_from_slice(&offset.to_le_bytes());
        }
        p.extend_from_slice(&[20, 1, 4, 0, 2, 1, 3]);
        p.extend_from_slice(&300u16.to_le_bytes());
        p
    }

    #[test]
    fn test_decode_config_layout() {
        let payload = sample_config_payload();
        assert_eq!(payload.len(), CONFIG_SIZE);

        let config = DeviceConfig::decode(&payload).unwrap();
        assert_eq!(config.nuki_id, 0x1234_5678);
        assert_eq!(config.name, "Front Door");
        assert!((config.latitude - 48.2).abs() < f32::EPSILON);
        assert!(config.auto_unlatch && !config.led_enabled);
        assert_eq!(config.led_brightness, 3);
        assert_eq!(config.current_time.to_string(), "2023-01-01 00:00:00");
        assert_eq!(config.dst_mode, DstMode::European);
        assert_eq!(config.fob_action_2, FobAction::Lock);
        assert_eq!(config.fob_action_3, FobAction::Intelligent);
        assert_eq!(config.advertising_mode, AdvertisingMode::Slow);
        assert!(config.has_keypad);
        assert_eq!(config.firmware_version, "2.0.5");
        assert_eq!(config.hardware_revision, "18.4");
        assert_eq!(config.homekit_status, HomeKitStatus::EnabledPaired);
        assert_eq!(config.time_zone_id, 37);
    }

    #[test]
    fn test_decode_advanced_config_layout() {
        let config = AdvancedDeviceConfig::decode(&sample_advanced_payload()).unwrap();
        assert_eq!(config.total_degrees, 900);
        assert_eq!(config.unlocked_position_offset_degrees, -10);
        assert_eq!(config.unlocked_to_locked_transition_offset_degrees, 40);
        assert_eq!(config.single_button_press_action, ButtonPressAction::Intelligent);
        assert_eq!(config.double_button_press_action, ButtonPressAction::Unlatch);
        assert!(!config.detached_cylinder);
        assert_eq!(config.battery_type, BatteryType::Lithium);
        assert!(config.automatic_battery_type_detection);
        assert_eq!(config.unlatch_duration, 3);
        assert_eq!(config.auto_lock_timeout, 300);
    }

    #[test]
    fn test_request_layouts_append_challenge() {
        let challenge = [0xC7; 32];
        let request = RequestConfigCommand::new().request_data(&challenge);
        assert_eq!(&request[..2], &[0x14, 0x00]);
        assert_eq!(&request[2..], &challenge);

        let request = RequestAdvancedConfigCommand::new().request_data(&challenge);
        assert_eq!(&request[..2], &[0x36, 0x00]);
        assert_eq!(request.len(), 34);
    }

    #[test]
    fn test_truncated_config_fails() {
        let mut command = RequestConfigCommand::new();
        let outcome = command
            .handle_data(CommandId::Config.as_u16(), &sample_config_payload()[..40])
            .unwrap();
        assert!(matches!(outcome, Outcome::Failed(_)));
    }
}
