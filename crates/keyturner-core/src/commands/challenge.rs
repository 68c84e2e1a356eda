//! Challenge exchange preceding privileged commands

use super::Outcome;
use crate::crypto::{Challenge, CHALLENGE_SIZE};
use crate::errors::KeyturnerError;
use crate::protocol::frame::{request_data, CommandId};
use crate::Result;

/// Asks the lock for a fresh nonce
#[derive(Debug, Default)]
pub struct ChallengeCommand {
    challenge: Option<Challenge>,
}

impl ChallengeCommand {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_data(&self) -> Vec<u8> {
        request_data(CommandId::Challenge)
    }

    pub fn handle_data(&mut self, command: u16, payload: &[u8]) -> Result<Outcome> {
        if command != CommandId::Challenge.as_u16() {
            return Err(KeyturnerError::unexpected_command("Challenge", command));
        }
        let Some(bytes) = payload.get(..CHALLENGE_SIZE) else {
            return Ok(Outcome::Failed(format!(
                "Challenge too short: {} bytes",
                payload.len()
            )));
        };
        let mut challenge = [0u8; CHALLENGE_SIZE];
        challenge.copy_from_slice(bytes);
        self.challenge = Some(challenge);
        Ok(Outcome::Complete)
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        self.challenge.as_ref()
    }

    pub fn into_challenge(self) -> Option<Challenge> {
        self.challenge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_layout() {
        assert_eq!(ChallengeCommand::new().request_data(), vec![0x01, 0x00, 0x04, 0x00]);
    }

    #[test]
    fn test_single_frame_completes() {
        let mut command = ChallengeCommand::new();
        let outcome = command
            .handle_data(CommandId::Challenge.as_u16(), &[0x5A; 32])
            .unwrap();
        assert_eq!(outcome, Outcome::Complete);
        assert_eq!(command.into_challenge(), Some([0x5A; 32]));
    }

    #[test]
    fn test_short_nonce_fails() {
        let mut command = ChallengeCommand::new();
        let outcome = command
            .handle_data(CommandId::Challenge.as_u16(), &[0x5A; 8])
            .unwrap();
        assert!(matches!(outcome, Outcome::Failed(_)));
    }
}
