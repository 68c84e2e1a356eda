//! Encrypted command channel for one paired lock
//!
//! The channel owns the envelope codec, the single reassembly buffer and at
//! most one command execution. Commands that need a challenge are preceded
//! by a challenge exchange; the challenge answer is consumed internally and
//! the real request is handed back to the caller as [`ChannelEvent::Send`].
//!
//! Integrity faults (over-length data, failed decryption, checksum or
//! authorization id mismatch, unexpected command ids) abort the execution,
//! clear the buffer and surface as errors. Error reports from the lock end
//! the command unsuccessfully instead.

use core::fmt;

use tracing::{debug, warn};

use super::envelope::{EnvelopeCodec, EnvelopeReassembler};
use super::frame::{CommandId, ErrorReport, Frame};
use crate::commands::{Command, CommandResponse, KeyTurnerState, Outcome, ResponseData};
use crate::config::PairedConfig;
use crate::errors::ProtocolError;
use crate::Result;

/// Invoked with intermediate states reported during a lock action
pub type ProgressCallback = Box<dyn FnMut(&KeyTurnerState) + Send>;

/// What the caller should do after feeding inbound data
#[derive(Debug)]
pub enum ChannelEvent {
    /// Waiting for more data
    Pending,
    /// Write this envelope; the challenge phase finished
    Send(Vec<u8>),
    /// The active lock action reported an intermediate state
    Progress(KeyTurnerState),
    /// The command finished, successfully or not
    Completed(CommandResponse),
    /// Data arrived while no command was waiting for it
    Unexpected { bytes: usize },
}

/// The one outstanding request on a connection
pub struct CommandExecution {
    command: Command,
    progress: Option<ProgressCallback>,
}

impl CommandExecution {
    pub fn new(command: Command, progress: Option<ProgressCallback>) -> Self {
        Self { command, progress }
    }

    pub fn command(&self) -> &Command {
        &self.command
    }
}

impl fmt::Debug for CommandExecution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandExecution")
            .field("command", &self.command.name())
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Per-connection encrypted command channel
#[derive(Debug)]
pub struct CommandChannel {
    config: PairedConfig,
    codec: EnvelopeCodec,
    reassembler: EnvelopeReassembler,
    active: Option<CommandExecution>,
    // Command waiting for the challenge exchange to finish
    gated: Option<CommandExecution>,
    expecting: bool,
}

impl CommandChannel {
    pub fn new(config: PairedConfig) -> Self {
        let codec = EnvelopeCodec::new(config.authorization_id(), config.shared_key().clone());
        Self {
            config,
            codec,
            reassembler: EnvelopeReassembler::new(),
            active: None,
            gated: None,
            expecting: false,
        }
    }

    pub fn config(&self) -> &PairedConfig {
        &self.config
    }

    /// Whether a command is outstanding
    pub fn is_busy(&self) -> bool {
        self.active.is_some() || self.gated.is_some()
    }

    pub fn is_expecting(&self) -> bool {
        self.expecting
    }

    /// Start a command; returns the first envelope to write
    pub fn submit(&mut self, command: Command, progress: Option<ProgressCallback>) -> Result<Vec<u8>> {
        if self.is_busy() {
            return Err(ProtocolError::CommandInProgress.into());
        }

        let execution = CommandExecution::new(command, progress);
        let body = if execution.command.requires_challenge() {
            debug!(
                lock = %self.config.uuid(),
                command = execution.command.name(),
                "Requesting challenge"
            );
            let challenge = Command::challenge();
            let body = challenge.request_data(&self.config, None)?;
            self.active = Some(CommandExecution::new(challenge, None));
            self.gated = Some(execution);
            body
        } else {
            debug!(
                lock = %self.config.uuid(),
                command = execution.command.name(),
                "Sending command"
            );
            let body = execution.command.request_data(&self.config, None)?;
            self.active = Some(execution);
            body
        };

        let envelope = match self.codec.encode(&body) {
            Ok(envelope) => envelope,
            Err(err) => {
                self.reset();
                return Err(err);
            }
        };
        self.reassembler.reset();
        self.expecting = true;
        Ok(envelope)
    }

    /// Feed one notification from the data characteristic
    pub fn receive(&mut self, chunk: &[u8]) -> Result<ChannelEvent> {
        if !self.expecting || self.active.is_none() {
            warn!(
                lock = %self.config.uuid(),
                bytes = chunk.len(),
                "Received data while no command is waiting for it"
            );
            return Ok(ChannelEvent::Unexpected { bytes: chunk.len() });
        }

        match self.process(chunk) {
            Ok(event) => Ok(event),
            Err(err) => {
                warn!(lock = %self.config.uuid(), error = %err, "Command aborted");
                self.reset();
                Err(err)
            }
        }
    }

    /// Drop any outstanding command and buffered data
    pub fn abort(&mut self) {
        if self.is_busy() {
            debug!(lock = %self.config.uuid(), "Aborting command");
        }
        self.reset();
    }

    fn reset(&mut self) {
        self.active = None;
        self.gated = None;
        self.expecting = false;
        self.reassembler.reset();
    }

    fn process(&mut self, chunk: &[u8]) -> Result<ChannelEvent> {
        let Some(envelope) = self.reassembler.push(chunk)? else {
            return Ok(ChannelEvent::Pending);
        };
        let frame = self.codec.decode(&envelope)?;

        if frame.is(CommandId::ErrorReport) {
            let report = ErrorReport::parse(&frame.payload)?;
            warn!(
                lock = %self.config.uuid(),
                code = report.code,
                "Lock reported an error"
            );
            return Ok(self.finish_failed(report.message()));
        }

        self.dispatch(frame)
    }

    fn dispatch(&mut self, frame: Frame) -> Result<ChannelEvent> {
        let execution = self
            .active
            .as_mut()
            .ok_or(ProtocolError::NoActiveCommand)?;

        match execution.command.handle_data(frame.command, &frame.payload)? {
            Outcome::Pending => Ok(ChannelEvent::Pending),
            Outcome::Progress(state) => {
                if let Some(progress) = execution.progress.as_mut() {
                    progress(&state);
                }
                Ok(ChannelEvent::Progress(state))
            }
            Outcome::Failed(message) => Ok(self.finish_failed(message)),
            Outcome::Complete => self.finish_complete(),
        }
    }

    fn finish_complete(&mut self) -> Result<ChannelEvent> {
        let Some(finished) = self.active.take() else {
            return Err(ProtocolError::NoActiveCommand.into());
        };

        let Some(next) = self.gated.take() else {
            self.expecting = false;
            return Ok(ChannelEvent::Completed(CommandResponse::succeeded(
                finished.command.into_data(),
            )));
        };

        // Challenge answered, send the gated command with it
        let response = CommandResponse::succeeded(finished.command.into_data());
        let Some(challenge) = response.challenge().copied() else {
            self.expecting = false;
            return Ok(ChannelEvent::Completed(CommandResponse::failed(
                "The lock did not return a challenge",
                next.command.into_data(),
            )));
        };

        let body = next.command.request_data(&self.config, Some(&challenge))?;
        debug!(
            lock = %self.config.uuid(),
            command = next.command.name(),
            "Sending command"
        );
        self.active = Some(next);
        Ok(ChannelEvent::Send(self.codec.encode(&body)?))
    }

    fn finish_failed(&mut self, message: String) -> ChannelEvent {
        let active = self.active.take();
        let data = match self.gated.take().or(active) {
            Some(execution) => execution.command.into_data(),
            None => ResponseData::None,
        };
        self.expecting = false;
        self.reassembler.reset();
        ChannelEvent::Completed(CommandResponse::failed(message, data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LockConfig;
    use crate::crypto::KeyPair;
    use crate::errors::KeyturnerError;
    use crate::states::LockAction;

    fn channel() -> CommandChannel {
        let mut config = LockConfig::new("lock").unwrap();
        config
            .credentials_mut()
            .set_peer_public_key(KeyPair::generate().unwrap().public_key_bytes())
            .unwrap();
        CommandChannel::new(config.into_paired(5, [0; 16]).unwrap())
    }

    #[test]
    fn test_data_while_idle_is_an_anomaly() {
        let mut channel = channel();
        let event = channel.receive(&[0u8; 40]).unwrap();
        assert!(matches!(event, ChannelEvent::Unexpected { bytes: 40 }));
        assert!(!channel.is_busy());
    }

    #[test]
    fn test_only_one_command_at_a_time() {
        let mut channel = channel();
        channel.submit(Command::keyturner_states(), None).unwrap();
        assert!(channel.is_busy() && channel.is_expecting());

        let err = channel
            .submit(Command::lock_action(LockAction::Lock), None)
            .unwrap_err();
        assert!(matches!(
            err,
            KeyturnerError::Protocol(ProtocolError::CommandInProgress)
        ));

        channel.abort();
        assert!(!channel.is_busy());
        assert!(channel.submit(Command::request_config(), None).is_ok());
    }

    #[test]
    fn test_overlong_data_aborts_command() {
        let mut channel = channel();
        channel.submit(Command::keyturner_states(), None).unwrap();

        // Declares 4 bytes of ciphertext, delivers 5
        let mut junk = vec![0u8; 30];
        junk[24..28].copy_from_slice(&5u32.to_le_bytes());
        junk[28..30].copy_from_slice(&4u16.to_le_bytes());
        junk.extend_from_slice(&[1, 2, 3, 4, 5]);

        assert!(channel.receive(&junk).is_err());
        assert!(!channel.is_busy());
        assert!(matches!(
            channel.receive(&[0]).unwrap(),
            ChannelEvent::Unexpected { .. }
        ));
    }
}
