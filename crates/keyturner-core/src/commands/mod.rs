//! Command variants for the encrypted data channel
//!
//! Each variant knows how to build its request body, whether it needs a
//! challenge first, and how to fold the decoded response frames into its own
//! accumulator. [`Command`] is the closed set the channel dispatches on.

pub mod authorizations;
pub mod challenge;
pub mod codec;
pub mod config;
pub mod keyturner_state;
pub mod lock_action;

pub use authorizations::{AuthorizationEntry, AuthorizationList, RequestAuthorizationsCommand};
pub use challenge::ChallengeCommand;
pub use codec::DecodeError;
pub use config::{
    AdvancedDeviceConfig, DeviceConfig, RequestAdvancedConfigCommand, RequestConfigCommand,
};
pub use keyturner_state::{KeyTurnerState, KeyTurnerStatesCommand};
pub use lock_action::LockActionCommand;

use serde::Serialize;

use crate::config::PairedConfig;
use crate::crypto::Challenge;
use crate::errors::ProtocolError;
use crate::states::LockAction;
use crate::Result;

// ----------------------------------------------------------------------------
// Outcome
// ----------------------------------------------------------------------------

/// Effect of one decoded frame on the active command
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// More frames are expected
    Pending,
    /// Intermediate state while a lock action runs
    Progress(KeyTurnerState),
    /// Finished successfully
    Complete,
    /// Finished unsuccessfully with a reason
    Failed(String),
}

// ----------------------------------------------------------------------------
// Command
// ----------------------------------------------------------------------------

/// Supported commands
#[derive(Debug)]
pub enum Command {
    Challenge(ChallengeCommand),
    KeyTurnerStates(KeyTurnerStatesCommand),
    LockAction(LockActionCommand),
    RequestConfig(RequestConfigCommand),
    RequestAdvancedConfig(RequestAdvancedConfigCommand),
    RequestAuthorizations(RequestAuthorizationsCommand),
}

impl Command {
    pub fn challenge() -> Self {
        Self::Challenge(ChallengeCommand::new())
    }

    pub fn keyturner_states() -> Self {
        Self::KeyTurnerStates(KeyTurnerStatesCommand::new())
    }

    pub fn lock_action(action: LockAction) -> Self {
        Self::LockAction(LockActionCommand::new(action))
    }

    pub fn request_config() -> Self {
        Self::RequestConfig(RequestConfigCommand::new())
    }

    pub fn request_advanced_config() -> Self {
        Self::RequestAdvancedConfig(RequestAdvancedConfigCommand::new())
    }

    pub fn request_authorizations(pin: u16, offset: u16, count: u16) -> Self {
        Self::RequestAuthorizations(RequestAuthorizationsCommand::new(pin, offset, count))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Challenge(_) => "Challenge",
            Self::KeyTurnerStates(_) => "KeyTurnerStates",
            Self::LockAction(_) => "LockAction",
            Self::RequestConfig(_) => "RequestConfig",
            Self::RequestAdvancedConfig(_) => "RequestAdvancedConfig",
            Self::RequestAuthorizations(_) => "RequestAuthorizations",
        }
    }

    /// Whether a challenge exchange must run before this command
    pub fn requires_challenge(&self) -> bool {
        !matches!(self, Self::Challenge(_) | Self::KeyTurnerStates(_))
    }

    /// Build the `commandId || payload` body for this command
    ///
    /// Challenge-gated variants place the challenge where their layout
    /// expects it and fail without one.
    pub fn request_data(
        &self,
        config: &PairedConfig,
        challenge: Option<&Challenge>,
    ) -> Result<Vec<u8>> {
        let gated = || {
            challenge.ok_or(ProtocolError::ChallengeMissing {
                command: self.name(),
            })
        };
        Ok(match self {
            Self::Challenge(command) => command.request_data(),
            Self::KeyTurnerStates(command) => command.request_data(),
            Self::LockAction(command) => command.request_data(config, gated()?),
            Self::RequestConfig(command) => command.request_data(gated()?),
            Self::RequestAdvancedConfig(command) => command.request_data(gated()?),
            Self::RequestAuthorizations(command) => command.request_data(gated()?),
        })
    }

    /// Fold one decoded frame into the command
    ///
    /// A command id the variant does not expect is a protocol fault.
    pub fn handle_data(&mut self, command: u16, payload: &[u8]) -> Result<Outcome> {
        match self {
            Self::Challenge(c) => c.handle_data(command, payload),
            Self::KeyTurnerStates(c) => c.handle_data(command, payload),
            Self::LockAction(c) => c.handle_data(command, payload),
            Self::RequestConfig(c) => c.handle_data(command, payload),
            Self::RequestAdvancedConfig(c) => c.handle_data(command, payload),
            Self::RequestAuthorizations(c) => c.handle_data(command, payload),
        }
    }

    /// Consume the command, returning whatever it accumulated
    pub fn into_data(self) -> ResponseData {
        match self {
            Self::Challenge(c) => c
                .into_challenge()
                .map_or(ResponseData::None, ResponseData::Challenge),
            Self::KeyTurnerStates(c) => c
                .into_state()
                .map_or(ResponseData::None, ResponseData::KeyTurnerState),
            Self::LockAction(c) => ResponseData::LockAction {
                last_state: c.into_last_state(),
            },
            Self::RequestConfig(c) => c
                .into_config()
                .map_or(ResponseData::None, ResponseData::Config),
            Self::RequestAdvancedConfig(c) => c
                .into_config()
                .map_or(ResponseData::None, ResponseData::AdvancedConfig),
            Self::RequestAuthorizations(c) => ResponseData::Authorizations(c.into_list()),
        }
    }
}

// ----------------------------------------------------------------------------
// Response
// ----------------------------------------------------------------------------

/// Data gathered by a finished command
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum ResponseData {
    None,
    #[serde(serialize_with = "serialize_hex")]
    Challenge(Challenge),
    KeyTurnerState(KeyTurnerState),
    LockAction {
        last_state: Option<KeyTurnerState>,
    },
    Config(DeviceConfig),
    AdvancedConfig(AdvancedDeviceConfig),
    Authorizations(AuthorizationList),
}

fn serialize_hex<S: serde::Serializer>(
    bytes: &Challenge,
    serializer: S,
) -> core::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&hex::encode(bytes))
}

/// Final result of a command
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResponse {
    pub success: bool,
    pub message: Option<String>,
    pub data: ResponseData,
}

impl CommandResponse {
    pub fn succeeded(data: ResponseData) -> Self {
        Self {
            success: true,
            message: None,
            data,
        }
    }

    pub fn failed(message: impl Into<String>, data: ResponseData) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data,
        }
    }

    pub fn keyturner_state(&self) -> Option<&KeyTurnerState> {
        match &self.data {
            ResponseData::KeyTurnerState(state) => Some(state),
            ResponseData::LockAction { last_state } => last_state.as_ref(),
            _ => None,
        }
    }

    pub fn challenge(&self) -> Option<&Challenge> {
        match &self.data {
            ResponseData::Challenge(challenge) => Some(challenge),
            _ => None,
        }
    }
}
