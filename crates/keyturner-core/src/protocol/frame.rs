//! Command identifiers and plain command frames
//!
//! Every message on either channel starts with a little-endian `u16` command
//! id. On the pairing channel the frame is `commandId || payload || crc16`;
//! on the data channel the same `commandId || payload` body is wrapped in an
//! encrypted envelope.

use core::fmt;

use super::crc::{append_crc, CRC_SIZE};
use crate::errors::KeyturnerError;
use crate::Result;

// ----------------------------------------------------------------------------
// Command Identifiers
// ----------------------------------------------------------------------------

/// Known command identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum CommandId {
    RequestData = 0x01,
    PublicKey = 0x03,
    Challenge = 0x04,
    AuthAuthenticator = 0x05,
    AuthData = 0x06,
    AuthId = 0x07,
    RequestAuthorizationEntries = 0x09,
    AuthorizationEntry = 0x0A,
    KeyturnerStates = 0x0C,
    LockAction = 0x0D,
    Status = 0x0E,
    ErrorReport = 0x12,
    RequestConfig = 0x14,
    Config = 0x15,
    AuthIdConfirm = 0x1E,
    AuthorizationEntryCount = 0x27,
    RequestAdvancedConfig = 0x36,
    AdvancedConfig = 0x37,
}

impl CommandId {
    pub fn from_u16(value: u16) -> Option<Self> {
        let id = match value {
            0x01 => Self::RequestData,
            0x03 => Self::PublicKey,
            0x04 => Self::Challenge,
            0x05 => Self::AuthAuthenticator,
            0x06 => Self::AuthData,
            0x07 => Self::AuthId,
            0x09 => Self::RequestAuthorizationEntries,
            0x0A => Self::AuthorizationEntry,
            0x0C => Self::KeyturnerStates,
            0x0D => Self::LockAction,
            0x0E => Self::Status,
            0x12 => Self::ErrorReport,
            0x14 => Self::RequestConfig,
            0x15 => Self::Config,
            0x1E => Self::AuthIdConfirm,
            0x27 => Self::AuthorizationEntryCount,
            0x36 => Self::RequestAdvancedConfig,
            0x37 => Self::AdvancedConfig,
            _ => return None,
        };
        Some(id)
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }

    pub fn to_le_bytes(self) -> [u8; 2] {
        self.as_u16().to_le_bytes()
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::RequestData => "REQUEST_DATA",
            Self::PublicKey => "PUBLIC_KEY",
            Self::Challenge => "CHALLENGE",
            Self::AuthAuthenticator => "AUTH_AUTHENTICATOR",
            Self::AuthData => "AUTH_DATA",
            Self::AuthId => "AUTH_ID",
            Self::RequestAuthorizationEntries => "REQUEST_AUTHORIZATION_ENTRIES",
            Self::AuthorizationEntry => "AUTHORIZATION_ENTRY",
            Self::KeyturnerStates => "KEYTURNER_STATES",
            Self::LockAction => "LOCK_ACTION",
            Self::Status => "STATUS",
            Self::ErrorReport => "ERROR_REPORT",
            Self::RequestConfig => "REQUEST_CONFIG",
            Self::Config => "CONFIG",
            Self::AuthIdConfirm => "AUTH_ID_CONFIRM",
            Self::AuthorizationEntryCount => "AUTHORIZATION_ENTRY_COUNT",
            Self::RequestAdvancedConfig => "REQUEST_ADVANCED_CONFIG",
            Self::AdvancedConfig => "ADVANCED_CONFIG",
        }
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02x})", self.name(), self.as_u16())
    }
}

/// Values of the single status byte in a `STATUS` frame
pub mod status {
    pub const COMPLETE: u8 = 0x00;
    pub const ACCEPTED: u8 = 0x01;
}

// ----------------------------------------------------------------------------
// Frame Construction
// ----------------------------------------------------------------------------

/// `commandId || payload`, without checksum
pub fn encode_command(command: CommandId, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(2 + payload.len());
    out.extend_from_slice(&command.to_le_bytes());
    out.extend_from_slice(payload);
    out
}

/// `commandId || payload || crc16`, as written to the pairing channel
pub fn encode_frame(command: CommandId, payload: &[u8]) -> Vec<u8> {
    append_crc(&encode_command(command, payload))
}

/// Body of a data request asking the lock to send `requested`
pub fn request_data(requested: CommandId) -> Vec<u8> {
    encode_command(CommandId::RequestData, &requested.to_le_bytes())
}

// ----------------------------------------------------------------------------
// Frame Parsing
// ----------------------------------------------------------------------------

/// A decoded `commandId || payload` body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: u16,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(command: u16, payload: Vec<u8>) -> Self {
        Self { command, payload }
    }

    pub fn command_id(&self) -> Option<CommandId> {
        CommandId::from_u16(self.command)
    }

    pub fn is(&self, command: CommandId) -> bool {
        self.command == command.as_u16()
    }

    /// Parse a pairing-channel frame, dropping the checksum trailer
    ///
    /// The checksum itself is not verified here.
    pub fn from_checked_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 2 + CRC_SIZE {
            return Err(KeyturnerError::payload_too_short(2 + CRC_SIZE, bytes.len()));
        }
        Ok(Self {
            command: read_command(bytes),
            payload: bytes[2..bytes.len() - CRC_SIZE].to_vec(),
        })
    }
}

/// Read the leading command id; callers guarantee at least two bytes
pub(crate) fn read_command(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[0], bytes[1]])
}

/// Payload of an `ERROR_REPORT` frame: `errorCode(u8) || commandId(u16 LE)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorReport {
    pub code: u8,
    pub command: Option<u16>,
}

impl ErrorReport {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let code = *payload
            .first()
            .ok_or_else(|| KeyturnerError::payload_too_short(1, 0))?;
        let command = payload
            .get(1..3)
            .map(|bytes| u16::from_le_bytes([bytes[0], bytes[1]]));
        Ok(Self { code, command })
    }

    pub fn message(&self) -> String {
        crate::error_codes::error_message(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::crc::verify_crc;

    #[test]
    fn test_command_id_table_round_trips() {
        for raw in 0u16..=0xFF {
            if let Some(id) = CommandId::from_u16(raw) {
                assert_eq!(id.as_u16(), raw);
            }
        }
        assert_eq!(CommandId::from_u16(0x37), Some(CommandId::AdvancedConfig));
        assert_eq!(CommandId::from_u16(0x02), None);
    }

    #[test]
    fn test_request_data_layout() {
        assert_eq!(request_data(CommandId::Challenge), vec![0x01, 0x00, 0x04, 0x00]);
        let frame = encode_frame(CommandId::RequestData, &CommandId::PublicKey.to_le_bytes());
        assert!(verify_crc(&frame));
    }

    #[test]
    fn test_frame_strips_trailer() {
        let frame = encode_frame(CommandId::Status, &[status::ACCEPTED]);
        let parsed = Frame::from_checked_bytes(&frame).unwrap();
        assert!(parsed.is(CommandId::Status));
        assert_eq!(parsed.payload, vec![status::ACCEPTED]);
        assert!(Frame::from_checked_bytes(&[0x0E, 0x00, 0x01]).is_err());
    }

    #[test]
    fn test_error_report_reads_unsigned_code() {
        let report = ErrorReport::parse(&[0xFD, 0x0D, 0x00]).unwrap();
        assert_eq!(report.code, 0xFD);
        assert_eq!(report.command, Some(0x0D));
        assert_eq!(report.message(), "CRC does not match");

        let short = ErrorReport::parse(&[0x21]).unwrap();
        assert_eq!(short.command, None);
        assert!(ErrorReport::parse(&[]).is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(CommandId::KeyturnerStates.to_string(), "KEYTURNER_STATES (0x0c)");
    }
}
