//! Credential store for a single lock
//!
//! Holds the local X25519 key pair, the lock's public key and the shared
//! secret derived from both. The lock's public key is write-once and the
//! shared secret is derived at most once unless re-derivation is requested
//! explicitly.

use core::fmt;

use crate::crypto::{KeyPair, SharedKey, KEY_SIZE};
use crate::errors::CredentialError;
use crate::Result;

/// Key material shared between this client and one lock
#[derive(Clone)]
pub struct Credentials {
    key_pair: KeyPair,
    peer_public_key: Option<[u8; KEY_SIZE]>,
    shared_secret: Option<SharedKey>,
}

impl Credentials {
    /// Create credentials with a freshly generated key pair
    pub fn generate() -> Result<Self> {
        Ok(Self {
            key_pair: KeyPair::generate()?,
            peer_public_key: None,
            shared_secret: None,
        })
    }

    /// Restore credentials from persisted parts
    ///
    /// A stored shared secret is trusted as-is; it is not recomputed.
    pub fn from_parts(
        key_pair: KeyPair,
        peer_public_key: Option<[u8; KEY_SIZE]>,
        shared_secret: Option<SharedKey>,
    ) -> Self {
        Self {
            key_pair,
            peer_public_key,
            shared_secret,
        }
    }

    pub fn key_pair(&self) -> &KeyPair {
        &self.key_pair
    }

    /// Our public key
    pub fn public_key(&self) -> [u8; KEY_SIZE] {
        self.key_pair.public_key_bytes()
    }

    /// The lock's public key
    pub fn peer_public_key(&self) -> Result<[u8; KEY_SIZE]> {
        self.peer_public_key
            .ok_or_else(|| CredentialError::PeerPublicKeyMissing.into())
    }

    pub fn has_peer_public_key(&self) -> bool {
        self.peer_public_key.is_some()
    }

    /// Store the lock's public key; fails when one is already set
    pub fn set_peer_public_key(&mut self, key: [u8; KEY_SIZE]) -> Result<()> {
        if self.peer_public_key.is_some() {
            return Err(CredentialError::PeerPublicKeyAlreadySet.into());
        }
        self.peer_public_key = Some(key);
        Ok(())
    }

    /// Get the shared secret, deriving and caching it on first use
    pub fn shared_secret(&mut self) -> Result<&SharedKey> {
        if self.shared_secret.is_none() {
            self.derive_shared_secret()?;
        }
        self.cached_shared_secret()
            .ok_or_else(|| CredentialError::PeerPublicKeyMissing.into())
    }

    /// Recompute the shared secret from the current keys, replacing the cache
    pub fn derive_shared_secret(&mut self) -> Result<&SharedKey> {
        let peer = self.peer_public_key()?;
        let key = self.key_pair.derive_shared_key(&peer)?;
        Ok(self.shared_secret.insert(key))
    }

    /// The cached shared secret, if it has been derived or restored
    pub fn cached_shared_secret(&self) -> Option<&SharedKey> {
        self.shared_secret.as_ref()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("public_key", &hex::encode(self.public_key()))
            .field("peer_public_key", &self.peer_public_key.map(hex::encode))
            .field("shared_secret", &self.shared_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
