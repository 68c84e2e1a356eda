//! Lock state query and the 19-byte `KEYTURNER_STATES` payload

use chrono::NaiveDateTime;
use serde::Serialize;

use super::codec::{DecodeResult, PayloadReader};
use super::Outcome;
use crate::errors::KeyturnerError;
use crate::protocol::frame::{request_data, CommandId};
use crate::states::{DoorSensorState, LockAction, LockState, NukiState, Trigger};
use crate::Result;

/// Size of a `KEYTURNER_STATES` payload
pub const KEYTURNER_STATE_SIZE: usize = 19;

/// Snapshot of the lock's state
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyTurnerState {
    pub nuki_state: NukiState,
    pub lock_state: LockState,
    pub trigger: Trigger,
    /// Lock wall clock, UTC plus the reported offset
    pub current_time: NaiveDateTime,
    pub utc_offset_seconds: i16,
    pub battery_critical: bool,
    pub config_update_count: u8,
    pub lock_n_go_timer: u8,
    pub last_lock_action: LockAction,
    pub last_lock_action_trigger: Trigger,
    pub last_lock_action_completion_status: u8,
    pub door_sensor_state: DoorSensorState,
}

impl KeyTurnerState {
    pub fn decode(payload: &[u8]) -> DecodeResult<Self> {
        let r = PayloadReader::new(payload, KEYTURNER_STATE_SIZE)?;
        Ok(Self {
            nuki_state: NukiState::from_u8(r.u8(0)?),
            lock_state: LockState::from_u8(r.u8(1)?),
            trigger: Trigger::from_u8(r.u8(2)?),
            current_time: r.local_datetime(3, "currentTime")?,
            utc_offset_seconds: r.i16(10)?,
            battery_critical: r.flag(12)?,
            config_update_count: r.u8(13)?,
            lock_n_go_timer: r.u8(14)?,
            last_lock_action: LockAction::from_u8(r.u8(15)?),
            last_lock_action_trigger: Trigger::from_u8(r.u8(16)?),
            last_lock_action_completion_status: r.u8(17)?,
            door_sensor_state: DoorSensorState::from_u8(r.u8(18)?),
        })
    }
}

/// Reads the current [`KeyTurnerState`]; needs no challenge
#[derive(Debug, Default)]
pub struct KeyTurnerStatesCommand {
    state: Option<KeyTurnerState>,
}

impl KeyTurnerStatesCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_data(&self) -> Vec<u8> {
        request_data(CommandId::KeyturnerStates)
    }

    pub fn handle_data(&mut self, command: u16, payload: &[u8]) -> Result<Outcome> {
        if command != CommandId::KeyturnerStates.as_u16() {
            return Err(KeyturnerError::unexpected_command("KeyTurnerStates", command));
        }
        Ok(match KeyTurnerState::decode(payload) {
            Ok(state) => {
                self.state = Some(state);
                Outcome::Complete
            }
            Err(err) => Outcome::Failed(err.to_string()),
        })
    }

    pub fn into_state(self) -> Option<KeyTurnerState> {
        self.state
    }
}
