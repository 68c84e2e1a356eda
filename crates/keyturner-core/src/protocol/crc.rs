//! CRC16 checksum used on both channels
//!
//! CRC-16/CCITT-FALSE: polynomial 0x1021, initial value 0xFFFF, no
//! reflection and no final xor. The checksum is appended little-endian.

use crc::{Crc, CRC_16_IBM_3740};

const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Size of the trailing checksum
pub const CRC_SIZE: usize = 2;

/// Compute the checksum of `data`
pub fn crc16(data: &[u8]) -> u16 {
    CCITT.checksum(data)
}

/// Return `data` followed by its little-endian checksum
pub fn append_crc(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + CRC_SIZE);
    out.extend_from_slice(data);
    out.extend_from_slice(&crc16(data).to_le_bytes());
    out
}

/// Check the trailing little-endian checksum of `data`
///
/// Inputs shorter than the checksum itself never verify.
pub fn verify_crc(data: &[u8]) -> bool {
    if data.len() < CRC_SIZE {
        return false;
    }
    let (body, trailer) = data.split_at(data.len() - CRC_SIZE);
    u16::from_le_bytes([trailer[0], trailer[1]]) == crc16(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_check_value() {
        assert_eq!(crc16(b"123456789"), 0x29B1);
    }

    #[test]
    fn test_request_public_key_frame() {
        // REQUEST_DATA(PUBLIC_KEY)
        let frame = append_crc(&[0x01, 0x00, 0x03, 0x00]);
        assert_eq!(frame, vec![0x01, 0x00, 0x03, 0x00, 0x27, 0xA7]);
        assert!(verify_crc(&frame));
    }

    #[test]
    fn test_short_input_never_verifies() {
        assert!(!verify_crc(&[]));
        assert!(!verify_crc(&[0xFF]));
    }

    proptest! {
        #[test]
        fn prop_append_then_verify(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            prop_assert!(verify_crc(&append_crc(&data)));
        }

        #[test]
        fn prop_single_bit_flip_fails(
            data in proptest::collection::vec(any::<u8>(), 1..256),
            position in any::<prop::sample::Index>(),
            bit in 0u8..8,
        ) {
            let mut framed = append_crc(&data);
            let index = position.index(framed.len());
            framed[index] ^= 1 << bit;
            prop_assert!(!verify_crc(&framed));
        }
    }
}
