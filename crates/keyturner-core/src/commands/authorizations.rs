//! Authorization entry enumeration
//!
//! The lock answers with an `AUTHORIZATION_ENTRY_COUNT` frame, then one
//! `AUTHORIZATION_ENTRY` frame per entry and a final `STATUS` frame.

use chrono::NaiveDateTime;
use serde::Serialize;

use super::codec::{DecodeResult, PayloadReader};
use super::Outcome;
use crate::crypto::Challenge;
use crate::errors::KeyturnerError;
use crate::protocol::frame::{encode_command, status, CommandId};
use crate::Result;

/// Minimum size of an entry without time limits
pub const ENTRY_MIN_SIZE: usize = 56;

/// Size of an entry carrying its time-limit block
pub const ENTRY_TIME_LIMITED_SIZE: usize = 75;

const WEEKDAYS: [(u8, &str); 7] = [
    (0x40, "Monday"),
    (0x20, "Tuesday"),
    (0x10, "Wednesday"),
    (0x08, "Thursday"),
    (0x04, "Friday"),
    (0x02, "Saturday"),
    (0x01, "Sunday"),
];

/// One authorization known to the lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizationEntry {
    pub authorization_id: u32,
    pub id_type: u8,
    pub name: String,
    pub enabled: bool,
    pub remote_allowed: bool,
    pub date_created: Option<NaiveDateTime>,
    pub date_last_active: Option<NaiveDateTime>,
    pub lock_count: u16,
    pub time_limited: bool,
    pub allowed_from_date: Option<NaiveDateTime>,
    pub allowed_until_date: Option<NaiveDateTime>,
    /// `None` when no weekday restriction is set
    pub allowed_weekdays: Option<Vec<String>>,
    pub allowed_from_time: Option<String>,
    pub allowed_until_time: Option<String>,
}

impl AuthorizationEntry {
    pub fn decode(payload: &[u8]) -> DecodeResult<Self> {
        let r = PayloadReader::new(payload, ENTRY_MIN_SIZE)?;
        let time_limited = r.flag(55)?;

        let mut entry = Self {
            authorization_id: r.u32(0)?,
            id_type: r.u8(4)?,
            name: r.string(5, 32)?,
            enabled: r.flag(37)?,
            remote_allowed: r.flag(38)?,
            date_created: r.naive_datetime(39)?,
            date_last_active: r.naive_datetime(46)?,
            lock_count: r.u16(53)?,
            time_limited,
            allowed_from_date: None,
            allowed_until_date: None,
            allowed_weekdays: None,
            allowed_from_time: None,
            allowed_until_time: None,
        };

        if time_limited {
            let r = PayloadReader::new(payload, ENTRY_TIME_LIMITED_SIZE)?;
            entry.allowed_from_date = r.naive_datetime(56)?;
            entry.allowed_until_date = r.naive_datetime(63)?;
            entry.allowed_weekdays = decode_weekdays(r.u8(70)?);
            entry.allowed_from_time = Some(r.time_of_day(71)?);
            entry.allowed_until_time = Some(r.time_of_day(73)?);
        }

        Ok(entry)
    }
}

fn decode_weekdays(mask: u8) -> Option<Vec<String>> {
    if mask == 0 {
        return None;
    }
    Some(
        WEEKDAYS
            .iter()
            .filter(|(bit, _)| mask & bit != 0)
            .map(|(_, day)| day.to_string())
            .collect(),
    )
}

/// Result of an authorization listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthorizationList {
    pub count: Option<u16>,
    pub authorizations: Vec<AuthorizationEntry>,
}

/// Lists authorization entries; requires a challenge and the lock PIN
#[derive(Debug)]
pub struct RequestAuthorizationsCommand {
    pin: u16,
    offset: u16,
    count: u16,
    list: AuthorizationList,
}

impl RequestAuthorizationsCommand {
    pub const DEFAULT_COUNT: u16 = 10;

    pub fn new(pin: u16, offset: u16, count: u16) -> Self {
        Self {
            pin,
            offset,
            count,
            list: AuthorizationList::default(),
        }
    }

    /// `offset(2) || count(2) || challenge(32) || pin(2)`
    pub fn request_data(&self, challenge: &Challenge) -> Vec<u8> {
        let mut payload = Vec::with_capacity(6 + challenge.len());
        payload.extend_from_slice(&self.offset.to_le_bytes());
        payload.extend_from_slice(&self.count.to_le_bytes());
        payload.extend_from_slice(challenge);
        payload.extend_from_slice(&self.pin.to_le_bytes());
        encode_command(CommandId::RequestAuthorizationEntries, &payload)
    }

    pub fn handle_data(&mut self, command: u16, payload: &[u8]) -> Result<Outcome> {
        match CommandId::from_u16(command) {
            Some(CommandId::AuthorizationEntryCount) => {
                let count = match PayloadReader::new(payload, 2).and_then(|r| r.u16(0)) {
                    Ok(count) => count,
                    Err(err) => return Ok(Outcome::Failed(err.to_string())),
                };
                self.list.count = Some(count);
                Ok(if count == 0 {
                    Outcome::Complete
                } else {
                    Outcome::Pending
                })
            }
            Some(CommandId::AuthorizationEntry) => Ok(match AuthorizationEntry::decode(payload) {
                Ok(entry) => {
                    self.list.authorizations.push(entry);
                    Outcome::Pending
                }
                Err(err) => Outcome::Failed(err.to_string()),
            }),
            Some(CommandId::Status) => {
                let received = self.list.authorizations.len();
                let complete = payload.first() == Some(&status::COMPLETE)
                    && u16::try_from(received).ok() == self.list.count;
                Ok(if complete {
                    Outcome::Complete
                } else {
                    Outcome::Failed(format!(
                        "Authorization listing ended after {} of {} entries",
                        received,
                        self.list.count.unwrap_or(0)
                    ))
                })
            }
            _ => Err(KeyturnerError::unexpected_command(
                "RequestAuthorizations",
                command,
            )),
        }
    }

    pub fn into_list(self) -> AuthorizationList {
        self.list
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    fn datetime(year: u16, rest: [u8; 5]) -> Vec<u8> {
        let mut out = year.to_le_bytes().to_vec();
        out.extend_from_slice(&rest);
        out
    }

    pub(crate) fn sample_entry(id: u32, time_limited: bool) -> Vec<u8> {
        let mut p = id.to_le_bytes().to_vec();
        p.push(0);
        let mut name = format!("User {}", id).into_bytes();
        name.resize(32, 0);
        p.extend_from_slice(&name);
        p.extend_from_slice(&[1, 0]);
        p.extend_from_slice(&datetime(2021, [3, 4, 5, 6, 7]));
        p.extend_from_slice(&datetime(2022, [8, 9, 10, 11, 12]));
        p.extend_from_slice(&17u16.to_le_bytes());
        p.push(time_limited as u8);
        if time_limited {
            p.extend_from_slice(&datetime(2023, [1, 1, 0, 0, 0]));
            p.extend_from_slice(&datetime(2023, [12, 31, 23, 59, 59]));
            p.push(0x40 | 0x04 | 0x01);
            p.extend_from_slice(&[8, 0, 17, 30]);
        }
        p
    }

    const COUNT: u16 = 0x27;
    const ENTRY: u16 = 0x0A;
    const STATUS: u16 = 0x0E;

    #[test]
    fn test_request_layout() {
        let command = RequestAuthorizationsCommand::new(1234, 2, 5);
        let challenge = [0xEE; 32];
        let request = command.request_data(&challenge);

        assert_eq!(&request[..2], &[0x09, 0x00]);
        assert_eq!(&request[2..4], &2u16.to_le_bytes());
        assert_eq!(&request[4..6], &5u16.to_le_bytes());
        assert_eq!(&request[6..38], &challenge);
        assert_eq!(&request[38..], &1234u16.to_le_bytes());
    }

    #[test]
    fn test_decode_plain_entry() {
        let entry = AuthorizationEntry::decode(&sample_entry(7, false)).unwrap();
        assert_eq!(entry.authorization_id, 7);
        assert_eq!(entry.name, "User 7");
        assert!(entry.enabled && !entry.remote_allowed);
        assert_eq!(entry.date_created.unwrap().to_string(), "2021-03-04 05:06:07");
        assert_eq!(entry.lock_count, 17);
        assert!(entry.allowed_weekdays.is_none());
        assert!(entry.allowed_from_time.is_none());
    }

    #[test]
    fn test_decode_time_limited_entry() {
        let entry = AuthorizationEntry::decode(&sample_entry(9, true)).unwrap();
        assert!(entry.time_limited);
        assert_eq!(
            entry.allowed_until_date.unwrap().to_string(),
            "2023-12-31 23:59:59"
        );
        assert_eq!(
            entry.allowed_weekdays.unwrap(),
            vec!["Monday", "Friday", "Sunday"]
        );
        assert_eq!(entry.allowed_from_time.as_deref(), Some("08:00"));
        assert_eq!(entry.allowed_until_time.as_deref(), Some("17:30"));
    }

    #[test]
    fn test_zero_count_completes_immediately() {
        let mut command = RequestAuthorizationsCommand::new(0, 0, 10);
        assert_eq!(command.handle_data(COUNT, &[0, 0]).unwrap(), Outcome::Complete);
        let list = command.into_list();
        assert_eq!(list.count, Some(0));
        assert!(list.authorizations.is_empty());
    }

    #[test]
    fn test_full_listing_succeeds() {
        let mut command = RequestAuthorizationsCommand::new(0, 0, 10);
        assert_eq!(command.handle_data(COUNT, &[2, 0]).unwrap(), Outcome::Pending);
        assert_eq!(command.handle_data(ENTRY, &sample_entry(1, false)).unwrap(), Outcome::Pending);
        assert_eq!(command.handle_data(ENTRY, &sample_entry(2, true)).unwrap(), Outcome::Pending);
        assert_eq!(command.handle_data(STATUS, &[0]).unwrap(), Outcome::Complete);
        assert_eq!(command.into_list().authorizations.len(), 2);
    }

    #[test]
    fn test_missing_entries_fail() {
        let mut command = RequestAuthorizationsCommand::new(0, 0, 10);
        command.handle_data(COUNT, &[3, 0]).unwrap();
        command.handle_data(ENTRY, &sample_entry(1, false)).unwrap();
        assert!(matches!(
            command.handle_data(STATUS, &[0]).unwrap(),
            Outcome::Failed(_)
        ));
    }

    #[test]
    fn test_entry_overflow_does_not_wrap_to_count() {
        let mut command = RequestAuthorizationsCommand::new(0, 0, 10);
        command.handle_data(COUNT, &[1, 0]).unwrap();
        let entry = sample_entry(1, false);
        for _ in 0..=u16::MAX as usize + 1 {
            command.handle_data(ENTRY, &entry).unwrap();
        }
        assert!(matches!(
            command.handle_data(STATUS, &[0]).unwrap(),
            Outcome::Failed(_)
        ));
    }

    #[test]
    fn test_status_without_count_fails() {
        let mut command = RequestAuthorizationsCommand::new(0, 0, 10);
        assert!(matches!(
            command.handle_data(STATUS, &[0]).unwrap(),
            Outcome::Failed(_)
        ));
    }
}
