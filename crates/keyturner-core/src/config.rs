//! Lock configuration before and after pairing
//!
//! [`LockConfig`] is what a pairing attempt starts from: the peripheral's
//! uuid, fresh credentials and a random app id. A successful handshake turns
//! it into a [`PairedConfig`], which is the only place the authorization id
//! and the lock's 16-byte uuid can be set. Both are therefore assigned exactly
//! once, at construction.
//!
//! The persisted JSON shape is
//!
//! ```json
//! {
//!   "uuid": "...",
//!   "paired": true,
//!   "credentials": {
//!     "slPublicKey": "hex", "publicKey": "hex",
//!     "privateKey": "hex", "sharedSecret": "hex"
//!   },
//!   "appId": 1234,
//!   "authorizationId": 5678,
//!   "slUUID": "hex"
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::credentials::Credentials;
use crate::crypto::{random_app_id, KeyPair, SharedKey, KEY_SIZE};
use crate::errors::ConfigError;
use crate::Result;

/// Length of the lock's own uuid as reported during pairing
pub const LOCK_UUID_SIZE: usize = 16;

// ----------------------------------------------------------------------------
// Unpaired Configuration
// ----------------------------------------------------------------------------

/// Configuration of a lock that has not completed pairing yet
#[derive(Debug, Clone)]
pub struct LockConfig {
    uuid: String,
    credentials: Credentials,
    app_id: u32,
}

impl LockConfig {
    /// Fresh configuration with new credentials and a random app id
    pub fn new(uuid: impl Into<String>) -> Result<Self> {
        Ok(Self::with_credentials(
            uuid,
            Credentials::generate()?,
            random_app_id(),
        ))
    }

    pub fn with_credentials(uuid: impl Into<String>, credentials: Credentials, app_id: u32) -> Self {
        Self {
            uuid: uuid.into(),
            credentials,
            app_id,
        }
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    pub fn app_id(&self) -> u32 {
        self.app_id
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn credentials_mut(&mut self) -> &mut Credentials {
        &mut self.credentials
    }

    /// Finish pairing with the values assigned by the lock
    pub(crate) fn into_paired(
        mut self,
        authorization_id: u32,
        lock_uuid: [u8; LOCK_UUID_SIZE],
    ) -> Result<PairedConfig> {
        let shared_key = self.credentials.shared_secret()?.clone();
        Ok(PairedConfig {
            uuid: self.uuid,
            credentials: self.credentials,
            shared_key,
            app_id: self.app_id,
            authorization_id,
            lock_uuid,
        })
    }
}

// ----------------------------------------------------------------------------
// Paired Configuration
// ----------------------------------------------------------------------------

/// Configuration of a paired lock, everything the command channel needs
#[derive(Debug, Clone)]
pub struct PairedConfig {
    uuid: String,
    credentials: Credentials,
    shared_key: SharedKey,
    app_id: u32,
    authorization_id: u32,
    lock_uuid: [u8; LOCK_UUID_SIZE],
}

impl PairedConfig {
    /// Peripheral uuid this config belongs to
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Always true, kept for parity with the persisted shape
    pub fn paired(&self) -> bool {
        true
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn shared_key(&self) -> &SharedKey {
        &self.shared_key
    }

    pub fn app_id(&self) -> u32 {
        self.app_id
    }

    pub fn authorization_id(&self) -> u32 {
        self.authorization_id
    }

    pub fn lock_uuid(&self) -> &[u8; LOCK_UUID_SIZE] {
        &self.lock_uuid
    }

    /// Convert into the persisted record shape
    pub fn to_record(&self) -> ConfigRecord {
        let credentials = &self.credentials;
        ConfigRecord {
            uuid: self.uuid.clone(),
            paired: true,
            credentials: CredentialsRecord {
                sl_public_key: credentials
                    .peer_public_key()
                    .map(hex::encode)
                    .unwrap_or_default(),
                public_key: hex::encode(credentials.public_key()),
                private_key: hex::encode(credentials.key_pair().private_key_bytes()),
                shared_secret: hex::encode(self.shared_key.as_bytes()),
            },
            app_id: self.app_id,
            authorization_id: Some(self.authorization_id),
            sl_uuid: hex::encode(self.lock_uuid),
        }
    }

    /// Restore from the persisted record shape
    pub fn from_record(record: &ConfigRecord) -> Result<Self> {
        if !record.paired {
            return Err(ConfigError::NotPaired.into());
        }
        let authorization_id = record.authorization_id.ok_or(ConfigError::NotPaired)?;

        let creds = &record.credentials;
        let public_key = decode_fixed::<KEY_SIZE>("publicKey", &creds.public_key)?;
        let private_key = decode_fixed::<KEY_SIZE>("privateKey", &creds.private_key)?;
        let peer_public_key = decode_optional::<KEY_SIZE>("slPublicKey", &creds.sl_public_key)?;
        let shared_secret = decode_optional::<KEY_SIZE>("sharedSecret", &creds.shared_secret)?;
        let lock_uuid = decode_fixed::<LOCK_UUID_SIZE>("slUUID", &record.sl_uuid)?;

        let key_pair = KeyPair::from_bytes(&public_key, &private_key)?;
        let mut credentials = Credentials::from_parts(
            key_pair,
            peer_public_key,
            shared_secret.map(SharedKey::from_bytes),
        );
        let shared_key = credentials.shared_secret()?.clone();

        Ok(Self {
            uuid: record.uuid.clone(),
            credentials,
            shared_key,
            app_id: record.app_id,
            authorization_id,
            lock_uuid,
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(&self.to_record()).map_err(|e| ConfigError::Json(e).into())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let record: ConfigRecord = serde_json::from_str(json).map_err(ConfigError::Json)?;
        Self::from_record(&record)
    }
}

// ----------------------------------------------------------------------------
// Persisted Shape
// ----------------------------------------------------------------------------

/// Serialized form of a lock configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigRecord {
    pub uuid: String,
    pub paired: bool,
    pub credentials: CredentialsRecord,
    pub app_id: u32,
    #[serde(default)]
    pub authorization_id: Option<u32>,
    #[serde(rename = "slUUID", default)]
    pub sl_uuid: String,
}

/// Serialized credentials, all fields hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRecord {
    #[serde(default)]
    pub sl_public_key: String,
    pub public_key: String,
    pub private_key: String,
    #[serde(default)]
    pub shared_secret: String,
}

fn decode_fixed<const N: usize>(field: &'static str, value: &str) -> Result<[u8; N]> {
    let bytes = hex::decode(value).map_err(|_| ConfigError::InvalidHex { field })?;
    if bytes.len() != N {
        return Err(ConfigError::InvalidLength {
            field,
            expected: N,
            actual: bytes.len(),
        }
        .into());
    }
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

// Empty strings stand for values that were never set
fn decode_optional<const N: usize>(field: &'static str, value: &str) -> Result<Option<[u8; N]>> {
    if value.is_empty() {
        return Ok(None);
    }
    decode_fixed(field, value).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::KeyturnerError;

    fn paired_config() -> PairedConfig {
        let lock = KeyPair::generate().unwrap();
        let mut config = LockConfig::new("c4:1c:d5:3e:00:01").unwrap();
        config
            .credentials_mut()
            .set_peer_public_key(lock.public_key_bytes())
            .unwrap();
        config.into_paired(0x0102_0304, [0xAA; 16]).unwrap()
    }

    #[test]
    fn test_into_paired_requires_peer_key() {
        let config = LockConfig::new("lock").unwrap();
        assert!(config.into_paired(1, [0; 16]).is_err());
    }

    #[test]
    fn test_json_round_trip() {
        let config = paired_config();
        let json = config.to_json().unwrap();
        let restored = PairedConfig::from_json(&json).unwrap();

        assert_eq!(restored.uuid(), config.uuid());
        assert_eq!(restored.app_id(), config.app_id());
        assert_eq!(restored.authorization_id(), 0x0102_0304);
        assert_eq!(restored.lock_uuid(), &[0xAA; 16]);
        assert_eq!(restored.shared_key(), config.shared_key());
    }

    #[test]
    fn test_record_field_names() {
        let json = paired_config().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert!(value.get("slUUID").is_some());
        assert!(value.get("authorizationId").is_some());
        assert!(value["credentials"].get("slPublicKey").is_some());
        assert!(value["credentials"].get("sharedSecret").is_some());
        assert_eq!(value["paired"], serde_json::Value::Bool(true));
    }

    #[test]
    fn test_unpaired_record_is_rejected() {
        let mut record = paired_config().to_record();
        record.paired = false;
        assert!(matches!(
            PairedConfig::from_record(&record),
            Err(KeyturnerError::Config(ConfigError::NotPaired))
        ));
    }

    #[test]
    fn test_invalid_hex_names_field() {
        let mut record = paired_config().to_record();
        record.sl_uuid = "zz".into();
        let err = PairedConfig::from_record(&record).unwrap_err();
        assert!(err.to_string().contains("slUUID"));

        let mut record = paired_config().to_record();
        record.sl_uuid = "abcd".into();
        assert!(matches!(
            PairedConfig::from_record(&record),
            Err(KeyturnerError::Config(ConfigError::InvalidLength { expected: 16, .. }))
        ));
    }
}
