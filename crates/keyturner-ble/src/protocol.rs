//! BLE service layout and advertisement parsing for keyturner locks

use uuid::Uuid;

use crate::transport::LockChannel;

// ----------------------------------------------------------------------------
// BLE Service and Characteristic UUIDs
// ----------------------------------------------------------------------------

/// Service exposed while the lock is in pairing mode
pub const PAIRING_SERVICE_UUID: Uuid = Uuid::from_u128(0xA92EE100_5501_11E4_916C_0800200C9A66);

/// General data input/output of the pairing service
pub const PAIRING_GDIO_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xA92EE101_5501_11E4_916C_0800200C9A66);

/// Keyturner service carrying encrypted commands
pub const KEYTURNER_SERVICE_UUID: Uuid = Uuid::from_u128(0xA92EE200_5501_11E4_916C_0800200C9A66);

/// General data input/output of the keyturner service
pub const KEYTURNER_GDIO_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xA92EE201_5501_11E4_916C_0800200C9A66);

/// User-specific data input/output, the encrypted command channel
pub const KEYTURNER_USDIO_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0xA92EE202_5501_11E4_916C_0800200C9A66);

/// Characteristics a device must expose to be treated as a lock
pub const REQUIRED_CHARACTERISTICS: [Uuid; 3] = [
    PAIRING_GDIO_CHARACTERISTIC_UUID,
    KEYTURNER_GDIO_CHARACTERISTIC_UUID,
    KEYTURNER_USDIO_CHARACTERISTIC_UUID,
];

impl LockChannel {
    /// Characteristic written to and notified on for this channel
    pub fn characteristic_uuid(self) -> Uuid {
        match self {
            LockChannel::Pairing => PAIRING_GDIO_CHARACTERISTIC_UUID,
            LockChannel::Data => KEYTURNER_USDIO_CHARACTERISTIC_UUID,
        }
    }

    pub fn from_characteristic(uuid: Uuid) -> Option<Self> {
        [LockChannel::Pairing, LockChannel::Data]
            .into_iter()
            .find(|channel| channel.characteristic_uuid() == uuid)
    }
}

// ----------------------------------------------------------------------------
// Advertisement Data
// ----------------------------------------------------------------------------

/// Length of the manufacturer data that carries a state counter
pub const MANUFACTURER_DATA_SIZE: usize = 21;

/// Offset of the state counter inside the manufacturer data
pub const STATE_COUNTER_OFFSET: usize = 13;

/// Manufacturer data as advertised: company id (LE) followed by its payload
pub fn manufacturer_data(company_id: u16, payload: &[u8]) -> Vec<u8> {
    let mut data = company_id.to_le_bytes().to_vec();
    data.extend_from_slice(payload);
    data
}

/// State counter from advertised manufacturer data
///
/// The lock bumps the counter whenever its state changes; data of any other
/// length carries no counter.
pub fn parse_state_counter(data: &[u8]) -> Option<u8> {
    if data.len() == MANUFACTURER_DATA_SIZE {
        Some(data[STATE_COUNTER_OFFSET])
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_mapping() {
        for channel in [LockChannel::Pairing, LockChannel::Data] {
            assert_eq!(
                LockChannel::from_characteristic(channel.characteristic_uuid()),
                Some(channel)
            );
        }
        assert_eq!(
            LockChannel::from_characteristic(KEYTURNER_GDIO_CHARACTERISTIC_UUID),
            None
        );
        assert_eq!(
            PAIRING_SERVICE_UUID.to_string(),
            "a92ee100-5501-11e4-916c-0800200c9a66"
        );
    }

    #[test]
    fn test_state_counter() {
        let mut payload = [0u8; MANUFACTURER_DATA_SIZE - 2];
        payload[STATE_COUNTER_OFFSET - 2] = 0x2A;
        let data = manufacturer_data(0x004C, &payload);

        assert_eq!(parse_state_counter(&data), Some(0x2A));
        assert_eq!(parse_state_counter(&data[..20]), None);
        assert_eq!(parse_state_counter(&[]), None);
    }
}
