//! Wire protocol
//!
//! - `crc`: CRC-16/CCITT-FALSE checksums
//! - `frame`: command ids and plain `commandId || payload` frames
//! - `envelope`: encrypted envelopes and their reassembly
//! - `pairing`: the pairing handshake state machine
//! - `channel`: the encrypted command channel

pub mod channel;
pub mod crc;
pub mod envelope;
pub mod frame;
pub mod pairing;

pub use channel::{ChannelEvent, CommandChannel, CommandExecution, ProgressCallback};
pub use crc::{append_crc, crc16, verify_crc};
pub use envelope::{EnvelopeCodec, EnvelopeReassembler};
pub use frame::{status, CommandId, ErrorReport, Frame};
pub use pairing::{ClientRole, PairingOptions, PairingSession, PairingState, PairingStep};
