//! Pairing handshake state machine
//!
//! Drives the unencrypted pairing characteristic from a fresh
//! [`LockConfig`] to a [`PairedConfig`]. The session is sans-IO: the caller
//! writes whatever [`PairingSession::start`] and
//! [`PairingSession::handle_notification`] hand back, and feeds every
//! notification received on the pairing characteristic into the session.
//!
//! ## Handshake
//!
//! 1. Request the lock's public key, receive it in two fragments.
//! 2. Send our public key.
//! 3. Receive a challenge, answer with `HMAC(s, ourPk || lockPk || nonce)`.
//! 4. Receive a second challenge, answer with the authorization data.
//! 5. Receive the authorization id in five fragments and verify the lock's
//!    authenticator.
//! 6. Confirm the authorization id and wait for `STATUS COMPLETE`.
//!
//! The first fragment of each multi-fragment response carries no checksum of
//! its own; the checksum covers the concatenation and is checked once the
//! final fragment arrives. [`PairingState::verifies_crc`] is the table of
//! states in which that check runs.

use core::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::crc::verify_crc;
use super::frame::{encode_frame, read_command, status, CommandId, ErrorReport};
use crate::config::{LockConfig, PairedConfig, LOCK_UUID_SIZE};
use crate::crypto::{
    authenticator, random_bytes, verify_authenticator, Challenge, AUTHENTICATOR_SIZE,
    CHALLENGE_SIZE, KEY_SIZE,
};
use crate::errors::{KeyturnerError, PairingError, ProtocolError};
use crate::Result;

/// Length of the space-padded display name in the authorization data
pub const DISPLAY_NAME_SIZE: usize = 32;

/// Name sent to the lock when none is configured
pub const DEFAULT_DISPLAY_NAME: &str = "Keyturner Rust Client";

const AUTH_ID_PAYLOAD_SIZE: usize = AUTHENTICATOR_SIZE + 4 + LOCK_UUID_SIZE + CHALLENGE_SIZE;

// ----------------------------------------------------------------------------
// Pairing State
// ----------------------------------------------------------------------------

/// Handshake progress; transitions only move forward
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairingState {
    Idle,
    RequestPublicKey,
    RequestPublicKeyFin,
    RequestChallenge,
    RequestChallengeFin,
    RequestChallengeAuth,
    RequestChallengeAuthFin,
    RequestAuthIdA,
    RequestAuthIdB,
    RequestAuthIdC,
    RequestAuthIdD,
    RequestAuthIdFin,
    RequestAuthIdConfirm,
    Paired,
    Failed,
}

impl PairingState {
    /// Whether the accumulated frame is checksummed when entering this state
    pub fn verifies_crc(self) -> bool {
        matches!(
            self,
            Self::RequestPublicKeyFin
                | Self::RequestChallengeFin
                | Self::RequestChallengeAuthFin
                | Self::RequestAuthIdFin
                | Self::RequestAuthIdConfirm
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Paired | Self::Failed)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::RequestPublicKey => "REQ_PUB_KEY",
            Self::RequestPublicKeyFin => "REQ_PUB_KEY_FIN",
            Self::RequestChallenge => "REQ_CHALLENGE",
            Self::RequestChallengeFin => "REQ_CHALLENGE_FIN",
            Self::RequestChallengeAuth => "REQ_CHALLENGE_AUTH",
            Self::RequestChallengeAuthFin => "REQ_CHALLENGE_AUTH_FIN",
            Self::RequestAuthIdA => "REQ_AUTH_ID_A",
            Self::RequestAuthIdB => "REQ_AUTH_ID_B",
            Self::RequestAuthIdC => "REQ_AUTH_ID_C",
            Self::RequestAuthIdD => "REQ_AUTH_ID_D",
            Self::RequestAuthIdFin => "REQ_AUTH_ID_FIN",
            Self::RequestAuthIdConfirm => "REQ_AUTH_ID_CONFIRM",
            Self::Paired => "PAIRED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for PairingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ----------------------------------------------------------------------------
// Pairing Options
// ----------------------------------------------------------------------------

/// Role announced to the lock in the authorization data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientRole {
    #[default]
    App,
    Bridge,
}

impl ClientRole {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::App => 0,
            Self::Bridge => 1,
        }
    }
}

/// Identity this client presents while pairing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PairingOptions {
    pub role: ClientRole,
    pub display_name: String,
}

impl Default for PairingOptions {
    fn default() -> Self {
        Self {
            role: ClientRole::App,
            display_name: DEFAULT_DISPLAY_NAME.to_string(),
        }
    }
}

impl PairingOptions {
    pub fn new(role: ClientRole, display_name: impl Into<String>) -> Self {
        Self {
            role,
            display_name: display_name.into(),
        }
    }

    /// Display name truncated to 32 bytes and padded with spaces
    ///
    /// Truncation never splits a multi-byte character.
    pub fn padded_name(&self) -> [u8; DISPLAY_NAME_SIZE] {
        let mut name = [b' '; DISPLAY_NAME_SIZE];
        let mut len = self.display_name.len().min(DISPLAY_NAME_SIZE);
        while !self.display_name.is_char_boundary(len) {
            len -= 1;
        }
        name[..len].copy_from_slice(&self.display_name.as_bytes()[..len]);
        name
    }

    /// `role(1) || appId(4 LE) || name(32)`
    pub fn authorization_data(&self, app_id: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(5 + DISPLAY_NAME_SIZE);
        data.push(self.role.as_u8());
        data.extend_from_slice(&app_id.to_le_bytes());
        data.extend_from_slice(&self.padded_name());
        data
    }
}

// ----------------------------------------------------------------------------
// Pairing Session
// ----------------------------------------------------------------------------

/// What the caller should do after feeding a notification
#[derive(Debug)]
pub enum PairingStep {
    /// More fragments are expected
    Wait,
    /// Write these bytes to the pairing characteristic
    Send(Vec<u8>),
    /// Handshake complete
    Paired(Box<PairedConfig>),
}

/// One pairing attempt
#[derive(Debug)]
pub struct PairingSession {
    state: PairingState,
    config: Option<LockConfig>,
    options: PairingOptions,
    partial: Vec<u8>,
    local_nonce: Option<Challenge>,
    pending: Option<PendingAuthorization>,
}

// Values received in the authorization id frame, applied once confirmed
#[derive(Debug, Clone, Copy)]
struct PendingAuthorization {
    authorization_id: u32,
    lock_uuid: [u8; LOCK_UUID_SIZE],
}

impl PairingSession {
    pub fn new(config: LockConfig, options: PairingOptions) -> Self {
        Self {
            state: PairingState::Idle,
            config: Some(config),
            options,
            partial: Vec::new(),
            local_nonce: None,
            pending: None,
        }
    }

    pub fn state(&self) -> PairingState {
        self.state
    }

    /// Begin the handshake; returns the public key request to write
    pub fn start(&mut self) -> Result<Vec<u8>> {
        if self.state != PairingState::Idle {
            return Err(PairingError::NotInProgress { state: self.state }.into());
        }
        self.transition(PairingState::RequestPublicKey);
        Ok(encode_frame(
            CommandId::RequestData,
            &CommandId::PublicKey.to_le_bytes(),
        ))
    }

    /// Feed one notification from the pairing characteristic
    ///
    /// Any error leaves the session in [`PairingState::Failed`].
    pub fn handle_notification(&mut self, data: &[u8]) -> Result<PairingStep> {
        if self.state == PairingState::Idle || self.state.is_terminal() {
            return Err(PairingError::NotInProgress { state: self.state }.into());
        }

        match self.step(data) {
            Ok(step) => Ok(step),
            Err(err) => {
                warn!(state = %self.state, error = %err, "Pairing failed");
                self.partial.clear();
                self.local_nonce = None;
                self.pending = None;
                self.state = PairingState::Failed;
                Err(err)
            }
        }
    }

    fn transition(&mut self, next: PairingState) {
        debug!(from = %self.state, to = %next, "Pairing state transition");
        self.state = next;
    }

    fn config_mut(&mut self) -> Result<&mut LockConfig> {
        let state = self.state;
        self.config
            .as_mut()
            .ok_or_else(|| PairingError::NotInProgress { state }.into())
    }

    fn step(&mut self, data: &[u8]) -> Result<PairingStep> {
        if self.state.verifies_crc() {
            let mut whole = self.partial.clone();
            whole.extend_from_slice(data);
            if !verify_crc(&whole) {
                return Err(ProtocolError::CrcMismatch.into());
            }
        }

        match self.state {
            PairingState::RequestPublicKey => {
                self.first_fragment(data, CommandId::PublicKey, PairingState::RequestPublicKeyFin)
            }
            PairingState::RequestPublicKeyFin => self.on_public_key(data),
            PairingState::RequestChallenge => {
                self.first_fragment(data, CommandId::Challenge, PairingState::RequestChallengeFin)
            }
            PairingState::RequestChallengeFin => self.on_challenge(data),
            PairingState::RequestChallengeAuth => self.first_fragment(
                data,
                CommandId::Challenge,
                PairingState::RequestChallengeAuthFin,
            ),
            PairingState::RequestChallengeAuthFin => self.on_authorization_challenge(data),
            PairingState::RequestAuthIdA => {
                self.first_fragment(data, CommandId::AuthId, PairingState::RequestAuthIdB)
            }
            PairingState::RequestAuthIdB => Ok(self.next_fragment(data, PairingState::RequestAuthIdC)),
            PairingState::RequestAuthIdC => Ok(self.next_fragment(data, PairingState::RequestAuthIdD)),
            PairingState::RequestAuthIdD => {
                Ok(self.next_fragment(data, PairingState::RequestAuthIdFin))
            }
            PairingState::RequestAuthIdFin => self.on_authorization_id(data),
            PairingState::RequestAuthIdConfirm => self.on_confirmation(data),
            PairingState::Idle | PairingState::Paired | PairingState::Failed => {
                Err(PairingError::NotInProgress { state: self.state }.into())
            }
        }
    }

    // Start a multi-fragment frame after checking its command id
    fn first_fragment(
        &mut self,
        data: &[u8],
        expected: CommandId,
        next: PairingState,
    ) -> Result<PairingStep> {
        if data.len() < 2 {
            return Err(KeyturnerError::payload_too_short(2, data.len()));
        }
        let command = read_command(data);
        if command != expected.as_u16() {
            return Err(self.unexpected(data));
        }
        self.partial = data.to_vec();
        self.transition(next);
        Ok(PairingStep::Wait)
    }

    fn next_fragment(&mut self, data: &[u8], next: PairingState) -> PairingStep {
        self.partial.extend_from_slice(data);
        self.transition(next);
        PairingStep::Wait
    }

    // Payload of the accumulated frame without command id and checksum
    fn take_payload<const N: usize>(&mut self, data: &[u8]) -> Result<[u8; N]> {
        let mut whole = std::mem::take(&mut self.partial);
        whole.extend_from_slice(data);
        if whole.len() < 4 + N {
            return Err(KeyturnerError::payload_too_short(4 + N, whole.len()));
        }
        let mut out = [0u8; N];
        out.copy_from_slice(&whole[2..2 + N]);
        Ok(out)
    }

    fn on_public_key(&mut self, data: &[u8]) -> Result<PairingStep> {
        let peer_public_key = self.take_payload::<KEY_SIZE>(data)?;

        let credentials = self.config_mut()?.credentials_mut();
        credentials.set_peer_public_key(peer_public_key)?;
        credentials.shared_secret()?;
        let own_public_key = credentials.public_key();

        self.transition(PairingState::RequestChallenge);
        Ok(PairingStep::Send(encode_frame(
            CommandId::PublicKey,
            &own_public_key,
        )))
    }

    fn on_challenge(&mut self, data: &[u8]) -> Result<PairingStep> {
        let nonce = self.take_payload::<CHALLENGE_SIZE>(data)?;

        let credentials = self.config_mut()?.credentials_mut();
        let own = credentials.public_key();
        let peer = credentials.peer_public_key()?;
        let key = credentials.shared_secret()?;
        let authenticator = authenticator(key, &[&own, &peer, &nonce])?;

        self.transition(PairingState::RequestChallengeAuth);
        Ok(PairingStep::Send(encode_frame(
            CommandId::AuthAuthenticator,
            &authenticator,
        )))
    }

    fn on_authorization_challenge(&mut self, data: &[u8]) -> Result<PairingStep> {
        let lock_nonce = self.take_payload::<CHALLENGE_SIZE>(data)?;
        let local_nonce = random_bytes::<CHALLENGE_SIZE>();

        let app_id = self.config_mut()?.app_id();
        let auth_data = self.options.authorization_data(app_id);
        let key = self.config_mut()?.credentials_mut().shared_secret()?;
        let authenticator = authenticator(key, &[&auth_data, &local_nonce, &lock_nonce])?;

        let mut payload = Vec::with_capacity(AUTHENTICATOR_SIZE + auth_data.len() + CHALLENGE_SIZE);
        payload.extend_from_slice(&authenticator);
        payload.extend_from_slice(&auth_data);
        payload.extend_from_slice(&local_nonce);

        self.local_nonce = Some(local_nonce);
        self.transition(PairingState::RequestAuthIdA);
        Ok(PairingStep::Send(encode_frame(CommandId::AuthData, &payload)))
    }

    fn on_authorization_id(&mut self, data: &[u8]) -> Result<PairingStep> {
        let payload = self.take_payload::<AUTH_ID_PAYLOAD_SIZE>(data)?;
        let local_nonce = self.local_nonce.ok_or(PairingError::NotInProgress {
            state: self.state,
        })?;

        let (lock_authenticator, rest) = payload.split_at(AUTHENTICATOR_SIZE);
        let (auth_id_bytes, rest) = rest.split_at(4);
        let (lock_uuid_bytes, lock_nonce) = rest.split_at(LOCK_UUID_SIZE);

        let key = self.config_mut()?.credentials_mut().shared_secret()?;
        let verified = verify_authenticator(
            key,
            &[auth_id_bytes, lock_uuid_bytes, lock_nonce, &local_nonce],
            lock_authenticator,
        )?;
        if !verified {
            return Err(PairingError::AuthenticatorMismatch.into());
        }

        let confirmation = authenticator(key, &[auth_id_bytes, lock_nonce])?;
        let mut response = Vec::with_capacity(AUTHENTICATOR_SIZE + 4);
        response.extend_from_slice(&confirmation);
        response.extend_from_slice(auth_id_bytes);

        let mut lock_uuid = [0u8; LOCK_UUID_SIZE];
        lock_uuid.copy_from_slice(lock_uuid_bytes);
        self.pending = Some(PendingAuthorization {
            authorization_id: u32::from_le_bytes([
                auth_id_bytes[0],
                auth_id_bytes[1],
                auth_id_bytes[2],
                auth_id_bytes[3],
            ]),
            lock_uuid,
        });

        self.transition(PairingState::RequestAuthIdConfirm);
        Ok(PairingStep::Send(encode_frame(
            CommandId::AuthIdConfirm,
            &response,
        )))
    }

    fn on_confirmation(&mut self, data: &[u8]) -> Result<PairingStep> {
        let completed = data.len() >= 5
            && read_command(data) == CommandId::Status.as_u16()
            && data[2] == status::COMPLETE;
        if !completed {
            return Err(self.rejection(data));
        }

        let pending = self.pending.take().ok_or(PairingError::NotInProgress {
            state: self.state,
        })?;
        let config = self.config.take().ok_or(PairingError::NotInProgress {
            state: self.state,
        })?;
        let paired = config.into_paired(pending.authorization_id, pending.lock_uuid)?;

        self.local_nonce = None;
        self.transition(PairingState::Paired);
        Ok(PairingStep::Paired(Box::new(paired)))
    }

    // Unexpected command for the current state, or an error report
    fn unexpected(&self, data: &[u8]) -> KeyturnerError {
        match self.error_report(data) {
            Some(report) => KeyturnerError::device(report.code),
            None => KeyturnerError::unexpected_command(self.state.name(), read_command(data)),
        }
    }

    fn rejection(&self, data: &[u8]) -> KeyturnerError {
        match self.error_report(data) {
            Some(report) => KeyturnerError::device(report.code),
            None => PairingError::Rejected {
                message: "The smart lock indicated that the pairing failed".to_string(),
            }
            .into(),
        }
    }

    fn error_report(&self, data: &[u8]) -> Option<ErrorReport> {
        if data.len() > 2 && read_command(data) == CommandId::ErrorReport.as_u16() {
            ErrorReport::parse(&data[2..]).ok()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::append_crc;
    use crate::testing::SimulatedLock;

    fn session(options: PairingOptions) -> PairingSession {
        PairingSession::new(LockConfig::new("AA:BB:CC:DD:EE:FF").unwrap(), options)
    }

    // Shuttle frames between the session and the simulated lock
    fn run(lock: &mut SimulatedLock, session: &mut PairingSession) -> Result<Box<PairedConfig>> {
        let mut outgoing = session.start()?;
        loop {
            let mut next = None;
            for notification in lock.handle_pairing_write(&outgoing) {
                match session.handle_notification(&notification)? {
                    PairingStep::Wait => {}
                    PairingStep::Send(bytes) => next = Some(bytes),
                    PairingStep::Paired(config) => return Ok(config),
                }
            }
            outgoing = next.expect("handshake stalled");
        }
    }

    #[test]
    fn test_handshake_with_simulated_lock() {
        let mut lock = SimulatedLock::new(0x0102_0304);
        let mut session = session(PairingOptions::default());

        let paired = run(&mut lock, &mut session).unwrap();

        assert_eq!(session.state(), PairingState::Paired);
        assert!(lock.is_paired());
        assert_eq!(paired.authorization_id(), 0x0102_0304);
        assert_eq!(paired.lock_uuid(), &lock.lock_uuid());
        assert_eq!(Some(paired.shared_key()), lock.shared_key());
        assert_eq!(
            paired.credentials().peer_public_key().unwrap(),
            lock.public_key()
        );

        let (role, app_id, name) = lock.registered().unwrap();
        assert_eq!(role, ClientRole::App.as_u8());
        assert_eq!(app_id, paired.app_id());
        assert_eq!(name, DEFAULT_DISPLAY_NAME);
    }

    #[test]
    fn test_bridge_role_and_long_name_are_sent() {
        let mut lock = SimulatedLock::new(7);
        let long_name = "A display name well beyond thirty-two bytes";
        let mut session = session(PairingOptions::new(ClientRole::Bridge, long_name));

        run(&mut lock, &mut session).unwrap();

        let (role, _, name) = lock.registered().unwrap();
        assert_eq!(role, 1);
        assert_eq!(name, &long_name[..DISPLAY_NAME_SIZE]);
    }

    #[test]
    fn test_corrupt_lock_authenticator_fails() {
        let mut lock = SimulatedLock::new(9).with_corrupt_authenticator();
        let mut session = session(PairingOptions::default());

        let err = run(&mut lock, &mut session).unwrap_err();

        assert!(matches!(
            err,
            KeyturnerError::Pairing(PairingError::AuthenticatorMismatch)
        ));
        assert_eq!(session.state(), PairingState::Failed);
        assert!(!lock.is_paired());
    }

    #[test]
    fn test_device_error_report_maps_code() {
        let mut lock = SimulatedLock::new(9).with_pairing_error(0x10);
        let mut session = session(PairingOptions::default());

        match run(&mut lock, &mut session).unwrap_err() {
            KeyturnerError::Pairing(PairingError::Device { code, message }) => {
                assert_eq!(code, 0x10);
                assert_eq!(message, "The smart lock is not in pairing mode");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(session.state(), PairingState::Failed);
    }

    #[test]
    fn test_crc_checked_on_final_fragment() {
        let mut session = session(PairingOptions::default());
        session.start().unwrap();

        let mut frame = encode_frame(CommandId::PublicKey, &[0x55; KEY_SIZE]);
        let last = frame.len() - 1;
        frame[last] ^= 0x01;

        assert!(matches!(
            session.handle_notification(&frame[..20]).unwrap(),
            PairingStep::Wait
        ));
        assert_eq!(session.state(), PairingState::RequestPublicKeyFin);

        let err = session.handle_notification(&frame[20..]).unwrap_err();
        assert!(matches!(
            err,
            KeyturnerError::Protocol(ProtocolError::CrcMismatch)
        ));
        assert_eq!(session.state(), PairingState::Failed);
    }

    #[test]
    fn test_unexpected_command_in_first_fragment() {
        let mut session = session(PairingOptions::default());
        session.start().unwrap();

        let frame = encode_frame(CommandId::Challenge, &[0; CHALLENGE_SIZE]);
        let err = session.handle_notification(&frame[..20]).unwrap_err();

        match err {
            KeyturnerError::Protocol(ProtocolError::UnexpectedCommand { context, command }) => {
                assert_eq!(context, "REQ_PUB_KEY");
                assert_eq!(command, CommandId::Challenge.as_u16());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_non_complete_confirmation_is_rejected() {
        let mut session = session(PairingOptions::default());
        session.state = PairingState::RequestAuthIdConfirm;

        let mut body = CommandId::Status.to_le_bytes().to_vec();
        body.push(status::ACCEPTED);
        let frame = append_crc(&body);

        let err = session.handle_notification(&frame).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Pairing failed: The smart lock indicated that the pairing failed"
        );
    }

    #[test]
    fn test_session_refuses_notifications_outside_handshake() {
        let mut session = session(PairingOptions::default());
        assert!(matches!(
            session.handle_notification(&[0, 0]).unwrap_err(),
            KeyturnerError::Pairing(PairingError::NotInProgress {
                state: PairingState::Idle
            })
        ));

        session.start().unwrap();
        assert!(session.start().is_err());
    }

    #[test]
    fn test_crc_table_matches_final_states() {
        let checked: Vec<_> = [
            PairingState::RequestPublicKey,
            PairingState::RequestPublicKeyFin,
            PairingState::RequestChallengeFin,
            PairingState::RequestAuthIdA,
            PairingState::RequestAuthIdD,
            PairingState::RequestAuthIdFin,
            PairingState::RequestAuthIdConfirm,
        ]
        .into_iter()
        .filter(|state| state.verifies_crc())
        .collect();

        assert_eq!(
            checked,
            vec![
                PairingState::RequestPublicKeyFin,
                PairingState::RequestChallengeFin,
                PairingState::RequestAuthIdFin,
                PairingState::RequestAuthIdConfirm,
            ]
        );
    }

    #[test]
    fn test_padded_name() {
        let options = PairingOptions::new(ClientRole::App, "Door");
        let name = options.padded_name();
        assert_eq!(&name[..4], b"Door");
        assert!(name[4..].iter().all(|b| *b == b' '));
        assert_eq!(options.authorization_data(0xAABBCCDD).len(), 37);
    }

    #[test]
    fn test_padded_name_keeps_characters_whole() {
        // 31 ASCII bytes followed by a 2-byte character straddling the limit
        let display_name = format!("{}é", "a".repeat(31));
        let options = PairingOptions::new(ClientRole::App, display_name);
        let name = options.padded_name();

        assert_eq!(&name[..31], "a".repeat(31).as_bytes());
        assert_eq!(name[31], b' ');
        assert!(std::str::from_utf8(&name).is_ok());

        let options = PairingOptions::new(ClientRole::App, "Küche Tür Schloss Haupteingang Nord");
        assert!(std::str::from_utf8(&options.padded_name()).is_ok());
    }
}
