//! Lock actions (lock, unlock, unlatch, ...)
//!
//! The lock answers with `STATUS ACCEPTED`, optionally some
//! `KEYTURNER_STATES` frames while the motor runs, then `STATUS COMPLETE`.

use tracing::debug;

use super::keyturner_state::KeyTurnerState;
use super::Outcome;
use crate::config::PairedConfig;
use crate::crypto::Challenge;
use crate::errors::KeyturnerError;
use crate::protocol::frame::{encode_command, status, CommandId};
use crate::states::LockAction;
use crate::Result;

#[derive(Debug)]
pub struct LockActionCommand {
    action: LockAction,
    accepted: bool,
    last_state: Option<KeyTurnerState>,
}

impl LockActionCommand {
    pub fn new(action: LockAction) -> Self {
        Self {
            action,
            accepted: false,
            last_state: None,
        }
    }

    pub fn action(&self) -> LockAction {
        self.action
    }

    /// `action(1) || appId(4) || flags(1) || challenge(32)`
    pub fn request_data(&self, config: &PairedConfig, challenge: &Challenge) -> Vec<u8> {
        let mut payload = Vec::with_capacity(6 + challenge.len());
        payload.push(self.action.as_u8());
        payload.extend_from_slice(&config.app_id().to_le_bytes());
        payload.push(0);
        payload.extend_from_slice(challenge);
        encode_command(CommandId::LockAction, &payload)
    }

    pub fn handle_data(&mut self, command: u16, payload: &[u8]) -> Result<Outcome> {
        match CommandId::from_u16(command) {
            Some(CommandId::Status) => Ok(self.on_status(payload.first().copied())),
            Some(CommandId::KeyturnerStates) => Ok(match KeyTurnerState::decode(payload) {
                Ok(state) => {
                    self.last_state = Some(state.clone());
                    Outcome::Progress(state)
                }
                Err(err) => Outcome::Failed(err.to_string()),
            }),
            _ => Err(KeyturnerError::unexpected_command("LockAction", command)),
        }
    }

    fn on_status(&mut self, value: Option<u8>) -> Outcome {
        match (self.accepted, value) {
            (false, Some(status::ACCEPTED)) => {
                debug!(action = %self.action, "Lock action accepted");
                self.accepted = true;
                Outcome::Pending
            }
            (true, Some(status::COMPLETE)) => Outcome::Complete,
            (_, Some(other)) => Outcome::Failed(format!(
                "Unexpected status 0x{:02x} for lock action {}",
                other, self.action
            )),
            (_, None) => Outcome::Failed("Empty status frame".to_string()),
        }
    }

    /// Last state reported while the action was running
    pub fn into_last_state(self) -> Option<KeyTurnerState> {
        self.last_state
    }
}
