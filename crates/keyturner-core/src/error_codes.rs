//! Numeric error codes reported by the lock
//!
//! The lock reports failures as a single error byte inside an `ERROR_REPORT`
//! frame. Codes fall into three ranges: pairing errors (`0x10..`), keyturner
//! errors (`0x20..0x4F`) and general errors (`0xFD..`).

// ----------------------------------------------------------------------------
// Error Code Tables
// ----------------------------------------------------------------------------

/// Errors reported while pairing
pub const PAIRING_ERRORS: &[(u8, &str)] = &[
    (0x10, "The smart lock is not in pairing mode"),
    (
        0x11,
        "The received authenticator does not match the calculated one",
    ),
    (0x12, "Parameter out of range"),
    (0x13, "Maximum number of users reached"),
];

/// Errors reported on the encrypted command channel
pub const KEYTURNER_ERRORS: &[(u8, &str)] = &[
    (0x21, "The provided PIN is invalid"),
    (0x22, "The provided nonce does not match the last stored one"),
    (0x23, "Parameter out of range"),
    (0x24, "The authorization id is invalid"),
    (0x25, "The authorization is disabled"),
    (0x26, "Remote access is not allowed for this authorization"),
    (0x27, "Access is not allowed at this time"),
    (0x28, "Too many invalid PIN attempts"),
    (0x29, "Too many entries"),
    (0x2A, "The keypad code already exists"),
    (0x2B, "The keypad code is invalid"),
    (0x2C, "Invalid keypad code, timeout 1 active"),
    (0x2D, "Invalid keypad code, timeout 2 active"),
    (0x2E, "Invalid keypad code, timeout 3 active"),
    (0x40, "Auto unlock was triggered too recently"),
    (0x41, "The lock position is unknown"),
    (0x42, "The motor is blocked"),
    (0x43, "Clutch failure"),
    (0x44, "The motor timed out"),
    (0x45, "The lock is busy"),
    (0x46, "The action was canceled"),
    (0x47, "The lock is not calibrated"),
    (0x48, "The motor position limit was exceeded"),
    (0x49, "The motor voltage is too low"),
    (0x4A, "Motor power failure"),
    (0x4B, "Clutch power failure"),
    (0x4C, "The battery voltage is too low"),
    (0x4D, "A firmware update is needed"),
];

/// Errors shared by both channels
pub const GENERAL_ERRORS: &[(u8, &str)] = &[
    (0xFD, "CRC does not match"),
    (0xFE, "Unexpected length of payload"),
    (0xFF, "Unknown error"),
];

// ----------------------------------------------------------------------------
// Lookup
// ----------------------------------------------------------------------------

fn lookup(code: u8) -> Option<&'static str> {
    PAIRING_ERRORS
        .iter()
        .chain(KEYTURNER_ERRORS)
        .chain(GENERAL_ERRORS)
        .find(|(candidate, _)| *candidate == code)
        .map(|(_, message)| *message)
}

/// Map a lock error code to a human readable message
///
/// Unmapped codes render as `Unknown error - code: 0x..`.
pub fn error_message(code: u8) -> String {
    match lookup(code) {
        Some(message) => message.to_string(),
        None => format!("Unknown error - code: 0x{:02x}", code),
    }
}

/// Whether the code has a dedicated entry in one of the tables
pub fn is_known(code: u8) -> bool {
    lookup(code).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pairing_codes() {
        assert_eq!(error_message(0x10), "The smart lock is not in pairing mode");
        assert_eq!(error_message(0x13), "Maximum number of users reached");
    }

    #[test]
    fn test_general_and_keyturner_codes() {
        assert_eq!(error_message(0xFD), "CRC does not match");
        assert_eq!(error_message(0x21), "The provided PIN is invalid");
        assert!(is_known(0x4D));
    }

    #[test]
    fn test_unmapped_code_falls_back_to_hex() {
        assert_eq!(error_message(0x99), "Unknown error - code: 0x99");
        assert_eq!(error_message(0x01), "Unknown error - code: 0x01");
        assert!(!is_known(0x99));
    }

    #[test]
    fn test_tables_have_unique_codes() {
        let mut codes: Vec<u8> = PAIRING_ERRORS
            .iter()
            .chain(KEYTURNER_ERRORS)
            .chain(GENERAL_ERRORS)
            .map(|(code, _)| *code)
            .collect();
        let total = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), total);
    }
}
