//! Little-endian readers for fixed-offset response payloads

use chrono::{Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};

/// Why a response payload could not be decoded
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Payload too short: needed {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("Invalid date/time in field {field}")]
    InvalidDateTime { field: &'static str },
}

pub type DecodeResult<T> = core::result::Result<T, DecodeError>;

/// Bounds-checked view over a response payload
#[derive(Debug, Clone, Copy)]
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
}

impl<'a> PayloadReader<'a> {
    /// Wrap `bytes`, failing early when it is shorter than `min_len`
    pub fn new(bytes: &'a [u8], min_len: usize) -> DecodeResult<Self> {
        if bytes.len() < min_len {
            return Err(DecodeError::TooShort {
                needed: min_len,
                actual: bytes.len(),
            });
        }
        Ok(Self { bytes })
    }

    fn slice(&self, offset: usize, len: usize) -> DecodeResult<&'a [u8]> {
        self.bytes
            .get(offset..offset + len)
            .ok_or(DecodeError::TooShort {
                needed: offset + len,
                actual: self.bytes.len(),
            })
    }

    pub fn u8(&self, offset: usize) -> DecodeResult<u8> {
        Ok(self.slice(offset, 1)?[0])
    }

    pub fn flag(&self, offset: usize) -> DecodeResult<bool> {
        Ok(self.u8(offset)? != 0)
    }

    pub fn u16(&self, offset: usize) -> DecodeResult<u16> {
        let b = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16(&self, offset: usize) -> DecodeResult<i16> {
        let b = self.slice(offset, 2)?;
        Ok(i16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32(&self, offset: usize) -> DecodeResult<u32> {
        let b = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn f32(&self, offset: usize) -> DecodeResult<f32> {
        let b = self.slice(offset, 4)?;
        Ok(f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Fixed-width UTF-8 string with NUL bytes removed
    pub fn string(&self, offset: usize, len: usize) -> DecodeResult<String> {
        let raw = self.slice(offset, len)?;
        Ok(String::from_utf8_lossy(raw).replace('\0', ""))
    }

    /// Dotted version made of `parts` single bytes, e.g. `"1.2.3"`
    pub fn version(&self, offset: usize, parts: usize) -> DecodeResult<String> {
        let raw = self.slice(offset, parts)?;
        Ok(raw
            .iter()
            .map(u8::to_string)
            .collect::<Vec<_>>()
            .join("."))
    }

    /// 7-byte date time: `year(u16) month day hour minute second`
    pub fn naive_datetime(&self, offset: usize) -> DecodeResult<Option<NaiveDateTime>> {
        let year = self.u16(offset)?;
        let raw = self.slice(offset + 2, 5)?;
        Ok(NaiveDate::from_ymd_opt(year as i32, raw[0] as u32, raw[1] as u32).and_then(|date| {
            date.and_hms_opt(raw[2] as u32, raw[3] as u32, raw[4] as u32)
        }))
    }

    /// 7-byte UTC date time followed by a signed offset in seconds
    ///
    /// The offset is added to the UTC instant to produce the lock's wall
    /// clock.
    pub fn local_datetime(&self, offset: usize, field: &'static str) -> DecodeResult<NaiveDateTime> {
        let utc = self
            .naive_datetime(offset)?
            .ok_or(DecodeError::InvalidDateTime { field })?;
        let shift = self.i16(offset + 7)?;
        let instant = Utc.from_utc_datetime(&utc) + Duration::seconds(shift as i64);
        Ok(instant.naive_utc())
    }

    /// Zero-padded `"HH:MM"` from two bytes
    pub fn time_of_day(&self, offset: usize) -> DecodeResult<String> {
        let raw = self.slice(offset, 2)?;
        Ok(format!("{:02}:{:02}", raw[0], raw[1]))
    }
}
