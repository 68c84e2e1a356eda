//! Simulated lock for tests
//!
//! Implements the device side of the pairing handshake and of the encrypted
//! command channel, splitting every response into BLE-sized notifications
//! the way a real lock does. Enabled with the `testing` feature.

use crate::config::LOCK_UUID_SIZE;
use crate::crypto::{
    authenticator, random_bytes, verify_authenticator, Challenge, KeyPair, SharedKey,
    AUTHENTICATOR_SIZE, CHALLENGE_SIZE, KEY_SIZE,
};
use crate::protocol::crc::verify_crc;
use crate::protocol::envelope::EnvelopeCodec;
use crate::protocol::frame::{encode_command, encode_frame, status, CommandId, Frame};
use crate::states::{LockAction, LockState, NukiState, Trigger};

/// Default notification size
pub const DEFAULT_FRAGMENT_SIZE: usize = 20;

const ERROR_BAD_CRC: u8 = 0xFD;
const ERROR_BAD_AUTHENTICATOR: u8 = 0x11;
const ERROR_BAD_PIN: u8 = 0x21;
const ERROR_BAD_NONCE: u8 = 0x22;

// ----------------------------------------------------------------------------
// Payload Builders
// ----------------------------------------------------------------------------

/// A 19-byte state payload at 2024-01-01 12:00:00 UTC with no offset
pub fn keyturner_state_payload(nuki: NukiState, lock: LockState, trigger: Trigger) -> Vec<u8> {
    let mut p = vec![nuki.as_u8(), lock.as_u8(), trigger.as_u8()];
    p.extend_from_slice(&2024u16.to_le_bytes());
    p.extend_from_slice(&[1, 1, 12, 0, 0]);
    p.extend_from_slice(&0i16.to_le_bytes());
    p.extend_from_slice(&[0, 1, 0, 0, 0, 0, 2]);
    p
}

/// A 74-byte config payload for a lock called `name`
pub fn config_payload(nuki_id: u32, name: &str) -> Vec<u8> {
    let mut p = nuki_id.to_le_bytes().to_vec();
    p.extend_from_slice(&fixed_name(name));
    p.extend_from_slice(&52.52f32.to_le_bytes());
    p.extend_from_slice(&13.40f32.to_le_bytes());
    p.extend_from_slice(&[0, 1, 1, 1, 2]);
    p.extend_from_slice(&2024u16.to_le_bytes());
    p.extend_from_slice(&[1, 1, 12, 0, 0]);
    p.extend_from_slice(&0i16.to_le_bytes());
    p.extend_from_slice(&[1, 0, 0, 0, 0, 0, 0, 0]);
    p.extend_from_slice(&[1, 6, 4, 2, 0, 0]);
    p.extend_from_slice(&0u16.to_le_bytes());
    p
}

/// A 19-byte advanced config payload
pub fn advanced_config_payload() -> Vec<u8> {
    let mut p = 720u16.to_le_bytes().to_vec();
    p.extend_from_slice(&[0; 8]);
    p.extend_from_slice(&[20, 1, 4, 0, 0, 1, 3]);
    p.extend_from_slice(&0u16.to_le_bytes());
    p
}

/// A 56-byte authorization entry without time limits
pub fn authorization_entry_payload(authorization_id: u32, name: &str) -> Vec<u8> {
    let mut p = authorization_id.to_le_bytes().to_vec();
    p.push(0);
    p.extend_from_slice(&fixed_name(name));
    p.extend_from_slice(&[1, 1]);
    for _ in 0..2 {
        p.extend_from_slice(&2024u16.to_le_bytes());
        p.extend_from_slice(&[1, 1, 12, 0, 0]);
    }
    p.extend_from_slice(&0u16.to_le_bytes());
    p.push(0);
    p
}

fn fixed_name(name: &str) -> [u8; 32] {
    let mut out = [0u8; 32];
    let len = name.len().min(32);
    out[..len].copy_from_slice(&name.as_bytes()[..len]);
    out
}

// ----------------------------------------------------------------------------
// Simulated Lock
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DevicePairing {
    AwaitRequest,
    AwaitPublicKey,
    AwaitAuthenticator,
    AwaitAuthorizationData,
    AwaitConfirmation,
    Paired,
}

/// Device side of the pairing and command protocols
#[derive(Debug)]
pub struct SimulatedLock {
    key_pair: KeyPair,
    authorization_id: u32,
    lock_uuid: [u8; LOCK_UUID_SIZE],
    fragment_size: usize,

    pairing: DevicePairing,
    client_public_key: Option<[u8; KEY_SIZE]>,
    shared_key: Option<SharedKey>,
    pairing_nonce: Challenge,
    client_nonce: Challenge,
    registered: Option<(u8, u32, String)>,

    challenge: Option<Challenge>,
    lock_state: LockState,
    pin: u16,
    authorizations: Vec<(u32, String)>,

    corrupt_authenticator: bool,
    pairing_error: Option<u8>,
    final_action_status: u8,
    withheld_entries: usize,
}

impl SimulatedLock {
    pub fn new(authorization_id: u32) -> Self {
        Self {
            key_pair: KeyPair::generate().expect("lock key pair"),
            authorization_id,
            lock_uuid: random_bytes::<LOCK_UUID_SIZE>(),
            fragment_size: DEFAULT_FRAGMENT_SIZE,
            pairing: DevicePairing::AwaitRequest,
            client_public_key: None,
            shared_key: None,
            pairing_nonce: [0; CHALLENGE_SIZE],
            client_nonce: [0; CHALLENGE_SIZE],
            registered: None,
            challenge: None,
            lock_state: LockState::Locked,
            pin: 0,
            authorizations: Vec::new(),
            corrupt_authenticator: false,
            pairing_error: None,
            final_action_status: status::COMPLETE,
            withheld_entries: 0,
        }
    }

    pub fn with_pin(mut self, pin: u16) -> Self {
        self.pin = pin;
        self
    }

    pub fn with_fragment_size(mut self, size: usize) -> Self {
        self.fragment_size = size.max(1);
        self
    }

    /// Send a wrong authenticator with the authorization id
    pub fn with_corrupt_authenticator(mut self) -> Self {
        self.corrupt_authenticator = true;
        self
    }

    /// Refuse pairing with an error report carrying `code`
    pub fn with_pairing_error(mut self, code: u8) -> Self {
        self.pairing_error = Some(code);
        self
    }

    /// Status sent in place of `COMPLETE` at the end of a lock action
    pub fn with_final_action_status(mut self, value: u8) -> Self {
        self.final_action_status = value;
        self
    }

    pub fn with_authorizations(mut self, entries: Vec<(u32, String)>) -> Self {
        self.authorizations = entries;
        self
    }

    /// Announce all entries but send `count` fewer of them
    pub fn with_withheld_entries(mut self, count: usize) -> Self {
        self.withheld_entries = count;
        self
    }

    pub fn authorization_id(&self) -> u32 {
        self.authorization_id
    }

    pub fn lock_uuid(&self) -> [u8; LOCK_UUID_SIZE] {
        self.lock_uuid
    }

    pub fn public_key(&self) -> [u8; KEY_SIZE] {
        self.key_pair.public_key_bytes()
    }

    pub fn shared_key(&self) -> Option<&SharedKey> {
        self.shared_key.as_ref()
    }

    pub fn is_paired(&self) -> bool {
        self.pairing == DevicePairing::Paired
    }

    /// Role, app id and trimmed name the client registered with
    pub fn registered(&self) -> Option<(u8, u32, &str)> {
        self.registered
            .as_ref()
            .map(|(role, app_id, name)| (*role, *app_id, name.as_str()))
    }

    pub fn lock_state(&self) -> LockState {
        self.lock_state
    }

    /// Pair with a client key pair directly, skipping the handshake
    pub fn pair_with(&mut self, client_public_key: [u8; KEY_SIZE]) -> Option<SharedKey> {
        let key = self.key_pair.derive_shared_key(&client_public_key).ok()?;
        self.client_public_key = Some(client_public_key);
        self.shared_key = Some(key.clone());
        self.pairing = DevicePairing::Paired;
        Some(key)
    }

    fn fragment(&self, bytes: &[u8]) -> Vec<Vec<u8>> {
        bytes.chunks(self.fragment_size).map(<[u8]>::to_vec).collect()
    }

    fn pairing_error_frame(code: u8, command: CommandId) -> Vec<Vec<u8>> {
        let mut payload = vec![code];
        payload.extend_from_slice(&command.to_le_bytes());
        vec![encode_frame(CommandId::ErrorReport, &payload)]
    }

    // ------------------------------------------------------------------------
    // Pairing
    // ------------------------------------------------------------------------

    /// Handle a write to the pairing characteristic; returns notifications
    pub fn handle_pairing_write(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        if !verify_crc(data) {
            return Self::pairing_error_frame(ERROR_BAD_CRC, CommandId::RequestData);
        }
        let Ok(frame) = Frame::from_checked_bytes(data) else {
            return Self::pairing_error_frame(ERROR_BAD_CRC, CommandId::RequestData);
        };

        match (self.pairing, frame.command_id()) {
            (DevicePairing::AwaitRequest, Some(CommandId::RequestData)) => {
                if let Some(code) = self.pairing_error {
                    return Self::pairing_error_frame(code, CommandId::RequestData);
                }
                self.pairing = DevicePairing::AwaitPublicKey;
                let key = self.public_key();
                self.fragment(&encode_frame(CommandId::PublicKey, &key))
            }
            (DevicePairing::AwaitPublicKey, Some(CommandId::PublicKey)) => {
                let Some(client_key) = to_array::<KEY_SIZE>(&frame.payload) else {
                    return Self::pairing_error_frame(0x12, CommandId::PublicKey);
                };
                let Ok(shared) = self.key_pair.derive_shared_key(&client_key) else {
                    return Self::pairing_error_frame(0x12, CommandId::PublicKey);
                };
                self.client_public_key = Some(client_key);
                self.shared_key = Some(shared);
                self.pairing_nonce = random_bytes::<CHALLENGE_SIZE>();
                self.pairing = DevicePairing::AwaitAuthenticator;
                self.fragment(&encode_frame(CommandId::Challenge, &self.pairing_nonce))
            }
            (DevicePairing::AwaitAuthenticator, Some(CommandId::AuthAuthenticator)) => {
                let (Some(key), Some(client)) = (&self.shared_key, self.client_public_key) else {
                    return Self::pairing_error_frame(0xFF, CommandId::AuthAuthenticator);
                };
                let own = self.public_key();
                let valid = verify_authenticator(
                    key,
                    &[&client, &own, &self.pairing_nonce],
                    &frame.payload,
                )
                .unwrap_or(false);
                if !valid {
                    return Self::pairing_error_frame(
                        ERROR_BAD_AUTHENTICATOR,
                        CommandId::AuthAuthenticator,
                    );
                }
                self.pairing_nonce = random_bytes::<CHALLENGE_SIZE>();
                self.pairing = DevicePairing::AwaitAuthorizationData;
                self.fragment(&encode_frame(CommandId::Challenge, &self.pairing_nonce))
            }
            (DevicePairing::AwaitAuthorizationData, Some(CommandId::AuthData)) => {
                self.on_authorization_data(&frame.payload)
            }
            (DevicePairing::AwaitConfirmation, Some(CommandId::AuthIdConfirm)) => {
                let Some(key) = &self.shared_key else {
                    return Self::pairing_error_frame(0xFF, CommandId::AuthIdConfirm);
                };
                let payload = &frame.payload;
                let valid = payload.len() == AUTHENTICATOR_SIZE + 4
                    && verify_authenticator(
                        key,
                        &[&self.authorization_id.to_le_bytes(), &self.pairing_nonce],
                        &payload[..AUTHENTICATOR_SIZE],
                    )
                    .unwrap_or(false);
                if !valid {
                    return Self::pairing_error_frame(
                        ERROR_BAD_AUTHENTICATOR,
                        CommandId::AuthIdConfirm,
                    );
                }
                self.pairing = DevicePairing::Paired;
                vec![encode_frame(CommandId::Status, &[status::COMPLETE])]
            }
            _ => Self::pairing_error_frame(0xFF, CommandId::RequestData),
        }
    }

    fn on_authorization_data(&mut self, payload: &[u8]) -> Vec<Vec<u8>> {
        let Some(key) = self.shared_key.clone() else {
            return Self::pairing_error_frame(0xFF, CommandId::AuthData);
        };
        // authenticator(32) || role(1) || appId(4) || name(32) || nonce(32)
        if payload.len() != AUTHENTICATOR_SIZE + 37 + CHALLENGE_SIZE {
            return Self::pairing_error_frame(0x12, CommandId::AuthData);
        }
        let (client_authenticator, rest) = payload.split_at(AUTHENTICATOR_SIZE);
        let (auth_data, client_nonce) = rest.split_at(37);

        let valid = verify_authenticator(
            &key,
            &[auth_data, client_nonce, &self.pairing_nonce],
            client_authenticator,
        )
        .unwrap_or(false);
        if !valid {
            return Self::pairing_error_frame(ERROR_BAD_AUTHENTICATOR, CommandId::AuthData);
        }

        let app_id = u32::from_le_bytes([auth_data[1], auth_data[2], auth_data[3], auth_data[4]]);
        let name = String::from_utf8_lossy(&auth_data[5..]).trim_end().to_string();
        self.registered = Some((auth_data[0], app_id, name));
        self.client_nonce.copy_from_slice(client_nonce);

        self.pairing_nonce = random_bytes::<CHALLENGE_SIZE>();
        let auth_id = self.authorization_id.to_le_bytes();
        let Ok(mut lock_authenticator) = authenticator(
            &key,
            &[&auth_id, &self.lock_uuid, &self.pairing_nonce, &self.client_nonce],
        ) else {
            return Self::pairing_error_frame(0xFF, CommandId::AuthData);
        };
        if self.corrupt_authenticator {
            lock_authenticator[0] ^= 0xFF;
        }

        let mut response = lock_authenticator.to_vec();
        response.extend_from_slice(&auth_id);
        response.extend_from_slice(&self.lock_uuid);
        response.extend_from_slice(&self.pairing_nonce);

        self.pairing = DevicePairing::AwaitConfirmation;
        self.fragment(&encode_frame(CommandId::AuthId, &response))
    }

    // ------------------------------------------------------------------------
    // Command Channel
    // ------------------------------------------------------------------------

    fn codec(&self) -> Option<EnvelopeCodec> {
        self.shared_key
            .as_ref()
            .map(|key| EnvelopeCodec::new(self.authorization_id, key.clone()))
    }

    /// Encrypt one frame as the lock would send it, unfragmented
    pub fn encrypt_frame(&self, command: CommandId, payload: &[u8]) -> Vec<u8> {
        self.codec()
            .and_then(|codec| codec.encode(&encode_command(command, payload)).ok())
            .unwrap_or_default()
    }

    fn respond(&self, frames: &[(CommandId, Vec<u8>)]) -> Vec<Vec<u8>> {
        frames
            .iter()
            .flat_map(|(command, payload)| self.fragment(&self.encrypt_frame(*command, payload)))
            .collect()
    }

    fn error_report(&self, code: u8, command: CommandId) -> Vec<Vec<u8>> {
        let mut payload = vec![code];
        payload.extend_from_slice(&command.to_le_bytes());
        self.respond(&[(CommandId::ErrorReport, payload)])
    }

    // Consume the issued challenge and compare it with the echoed one
    fn check_challenge(&mut self, echoed: &[u8]) -> bool {
        match self.challenge.take() {
            Some(issued) => echoed.len() >= CHALLENGE_SIZE && echoed[..CHALLENGE_SIZE] == issued,
            None => false,
        }
    }

    /// Handle one complete envelope written to the data characteristic
    pub fn handle_data_write(&mut self, envelope: &[u8]) -> Vec<Vec<u8>> {
        let Some(codec) = self.codec() else {
            return Vec::new();
        };
        let Ok(frame) = codec.decode(envelope) else {
            return Vec::new();
        };
        let payload = frame.payload.as_slice();

        match frame.command_id() {
            Some(CommandId::RequestData) if payload.len() >= 2 => {
                match CommandId::from_u16(u16::from_le_bytes([payload[0], payload[1]])) {
                    Some(CommandId::Challenge) => {
                        let challenge = random_bytes::<CHALLENGE_SIZE>();
                        self.challenge = Some(challenge);
                        self.respond(&[(CommandId::Challenge, challenge.to_vec())])
                    }
                    Some(CommandId::KeyturnerStates) => self.respond(&[(
                        CommandId::KeyturnerStates,
                        self.state_payload(self.lock_state),
                    )]),
                    _ => self.error_report(0xFE, CommandId::RequestData),
                }
            }
            Some(CommandId::LockAction) if payload.len() >= 6 => {
                if !self.check_challenge(&payload[6..]) {
                    return self.error_report(ERROR_BAD_NONCE, CommandId::LockAction);
                }
                self.run_lock_action(LockAction::from_u8(payload[0]))
            }
            Some(CommandId::RequestConfig) => {
                if !self.check_challenge(payload) {
                    return self.error_report(ERROR_BAD_NONCE, CommandId::RequestConfig);
                }
                self.respond(&[(CommandId::Config, config_payload(0x00C0_FFEE, "Simulated Lock"))])
            }
            Some(CommandId::RequestAdvancedConfig) => {
                if !self.check_challenge(payload) {
                    return self.error_report(ERROR_BAD_NONCE, CommandId::RequestAdvancedConfig);
                }
                self.respond(&[(CommandId::AdvancedConfig, advanced_config_payload())])
            }
            Some(CommandId::RequestAuthorizationEntries) if payload.len() >= 6 + CHALLENGE_SIZE => {
                if !self.check_challenge(&payload[4..]) {
                    return self.error_report(ERROR_BAD_NONCE, CommandId::RequestAuthorizationEntries);
                }
                let pin_offset = 4 + CHALLENGE_SIZE;
                let pin = u16::from_le_bytes([payload[pin_offset], payload[pin_offset + 1]]);
                if pin != self.pin {
                    return self.error_report(ERROR_BAD_PIN, CommandId::RequestAuthorizationEntries);
                }
                self.list_authorizations(
                    u16::from_le_bytes([payload[0], payload[1]]) as usize,
                    u16::from_le_bytes([payload[2], payload[3]]) as usize,
                )
            }
            _ => self.error_report(0xFE, CommandId::RequestData),
        }
    }

    fn state_payload(&self, lock: LockState) -> Vec<u8> {
        keyturner_state_payload(NukiState::DoorMode, lock, Trigger::Manual)
    }

    fn run_lock_action(&mut self, action: LockAction) -> Vec<Vec<u8>> {
        let (moving, settled) = match action {
            LockAction::Unlock => (LockState::Unlocking, LockState::Unlocked),
            LockAction::Lock | LockAction::FullLock => (LockState::Locking, LockState::Locked),
            LockAction::Unlatch => (LockState::Unlatching, LockState::Unlatched),
            LockAction::LockNGo | LockAction::LockNGoUnlatch => {
                (LockState::Unlocking, LockState::UnlockedLockNGo)
            }
            _ => (self.lock_state, self.lock_state),
        };

        let mut frames = vec![
            (CommandId::Status, vec![status::ACCEPTED]),
            (CommandId::KeyturnerStates, self.state_payload(moving)),
        ];
        if self.final_action_status == status::COMPLETE {
            self.lock_state = settled;
        }
        frames.push((CommandId::Status, vec![self.final_action_status]));
        self.respond(&frames)
    }

    fn list_authorizations(&self, offset: usize, count: usize) -> Vec<Vec<u8>> {
        let selected: Vec<&(u32, String)> =
            self.authorizations.iter().skip(offset).take(count).collect();
        let sent = selected.len().saturating_sub(self.withheld_entries);

        let mut frames = vec![(
            CommandId::AuthorizationEntryCount,
            (selected.len() as u16).to_le_bytes().to_vec(),
        )];
        if selected.is_empty() {
            return self.respond(&frames);
        }
        for (id, name) in selected.into_iter().take(sent) {
            frames.push((
                CommandId::AuthorizationEntry,
                authorization_entry_payload(*id, name),
            ));
        }
        frames.push((CommandId::Status, vec![status::COMPLETE]));
        self.respond(&frames)
    }
}

fn to_array<const N: usize>(bytes: &[u8]) -> Option<[u8; N]> {
    bytes.try_into().ok()
}
