//! Cryptographic primitives for the keyturner protocol
//!
//! This module provides thin, safe wrappers around the primitives both
//! channels depend on: the X25519 key pair, derivation of the shared secret
//! (X25519 followed by the HSalsa20 core, matching NaCl's `crypto_box`
//! precomputation), HMAC-SHA256 authenticators and random nonces.

use core::fmt;

use hmac::{Hmac, Mac};
use rand_core::{CryptoRng, OsRng, RngCore};
use salsa20::cipher::consts::U10;
use salsa20::cipher::generic_array::GenericArray;
use sha2::Sha256;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::errors::CryptographicError;
use crate::Result;

// ----------------------------------------------------------------------------
// Constants
// ----------------------------------------------------------------------------

/// Size of X25519 keys and of the derived shared secret
pub const KEY_SIZE: usize = 32;

/// Size of HMAC-SHA256 authenticators
pub const AUTHENTICATOR_SIZE: usize = 32;

/// Size of lock challenges and locally generated pairing nonces
pub const CHALLENGE_SIZE: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// A lock issued nonce that privileged commands must echo back
pub type Challenge = [u8; CHALLENGE_SIZE];

/// HMAC-SHA256 output
pub type Authenticator = [u8; AUTHENTICATOR_SIZE];

// ----------------------------------------------------------------------------
// Shared Key
// ----------------------------------------------------------------------------

/// 32-byte symmetric key shared with a paired lock
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedKey([u8; KEY_SIZE]);

impl SharedKey {
    /// Wrap raw key bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedKey(<redacted>)")
    }
}

// ----------------------------------------------------------------------------
// Key Pair (X25519)
// ----------------------------------------------------------------------------

/// X25519 key pair used for the pairing Diffie-Hellman exchange
#[derive(Clone)]
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Result<Self> {
        Self::generate_with_rng(&mut OsRng)
    }

    /// Generate a new key pair with custom RNG
    pub fn generate_with_rng<R: RngCore + CryptoRng>(rng: &mut R) -> Result<Self> {
        let secret = StaticSecret::random_from_rng(rng);
        let public = PublicKey::from(&secret);

        // An all-zero public key means the scalar did not produce a usable
        // curve point.
        if public.as_bytes().iter().all(|b| *b == 0) {
            return Err(CryptographicError::UnexpectedKeyType.into());
        }

        Ok(Self { secret, public })
    }

    /// Restore a key pair from persisted bytes
    ///
    /// Fails when the public key does not belong to the private key.
    pub fn from_bytes(public_key: &[u8; KEY_SIZE], private_key: &[u8; KEY_SIZE]) -> Result<Self> {
        let secret = StaticSecret::from(*private_key);
        let public = PublicKey::from(&secret);

        if public.as_bytes() != public_key {
            return Err(CryptographicError::InvalidKeyFormat.into());
        }

        Ok(Self { secret, public })
    }

    /// Get the public key bytes
    pub fn public_key_bytes(&self) -> [u8; KEY_SIZE] {
        *self.public.as_bytes()
    }

    /// Get the private key bytes
    pub fn private_key_bytes(&self) -> [u8; KEY_SIZE] {
        self.secret.to_bytes()
    }

    /// Derive the symmetric key shared with the owner of `peer_public_key`
    pub fn derive_shared_key(&self, peer_public_key: &[u8; KEY_SIZE]) -> Result<SharedKey> {
        let dh = self
            .secret
            .diffie_hellman(&PublicKey::from(*peer_public_key));

        if !dh.was_contributory() {
            return Err(CryptographicError::KeyDerivationFailed.into());
        }

        Ok(hsalsa20_core(dh.as_bytes()))
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &hex::encode(self.public.as_bytes()))
            .field("secret", &"<redacted>")
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Shared Secret Derivation
// ----------------------------------------------------------------------------

/// Run the HSalsa20 core (20 rounds) over a Diffie-Hellman result
///
/// The constant words are "expand 32-byte k" and the 16-byte input block is
/// all zero, which is what the lock computes on its side.
pub fn hsalsa20_core(dh_output: &[u8; KEY_SIZE]) -> SharedKey {
    let input = GenericArray::default();
    let mut derived = salsa20::hsalsa::<U10>(GenericArray::from_slice(dh_output), &input);

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&derived);
    derived.zeroize();

    SharedKey(key)
}

// ----------------------------------------------------------------------------
// Authenticators (HMAC-SHA256)
// ----------------------------------------------------------------------------

fn keyed_mac(key: &SharedKey, parts: &[&[u8]]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| CryptographicError::InvalidKeyFormat)?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac)
}

/// Compute `HMAC-SHA256(key, parts[0] || parts[1] || ...)`
pub fn authenticator(key: &SharedKey, parts: &[&[u8]]) -> Result<Authenticator> {
    let mac = keyed_mac(key, parts)?;
    let mut out = [0u8; AUTHENTICATOR_SIZE];
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

/// Verify an authenticator in constant time
pub fn verify_authenticator(key: &SharedKey, parts: &[&[u8]], expected: &[u8]) -> Result<bool> {
    let mac = keyed_mac(key, parts)?;
    Ok(mac.verify_slice(expected).is_ok())
}

// ----------------------------------------------------------------------------
// Randomness
// ----------------------------------------------------------------------------

/// Fill a fixed-size buffer from the OS random number generator
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Generate a random 32-bit application id
pub fn random_app_id() -> u32 {
    OsRng.next_u32()
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
