//! Key material.
//!
//! A person has one [`PersonKeyPair`]: an X25519 secret for key agreement
//! and an Ed25519 secret for signing posts. Its public half,
//! [`PersonPublicKey`], is what the exchange channel distributes. A
//! [`LocalKey`] never leaves the device; authors wrap each post's content
//! key under it so they can reopen their own posts.
//!
//! # Security
//!
//! - Secret bytes are zeroized on drop
//! - `Debug` never prints secret material

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as ExchangePublic, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

/// Size of a symmetric key in bytes.
pub const SYMMETRIC_KEY_SIZE: usize = 32;

/// Size of each half of a public key in bytes.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Size of an Ed25519 signature in bytes.
pub const SIGNATURE_SIZE: usize = 64;

fn to_array<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyLength { expected: N, actual: bytes.len() })
}

/// A 32-byte XChaCha20-Poly1305 key.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
pub struct SymmetricKey {
    bytes: [u8; SYMMETRIC_KEY_SIZE],
}

impl SymmetricKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self { bytes }
    }

    /// Parse from a slice, checking the length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        to_array(bytes).map(Self::new)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_SIZE] {
        &self.bytes
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// A device-local key that wraps the content keys of one's own posts.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalKey(SymmetricKey);

impl LocalKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; SYMMETRIC_KEY_SIZE]) -> Self {
        Self(SymmetricKey::new(bytes))
    }

    /// The underlying symmetric key.
    pub fn key(&self) -> &SymmetricKey {
        &self.0
    }
}

impl fmt::Debug for LocalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LocalKey(..)")
    }
}

/// Public half of a person's keys.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PersonPublicKey {
    exchange: [u8; PUBLIC_KEY_SIZE],
    verifying: [u8; PUBLIC_KEY_SIZE],
}

impl PersonPublicKey {
    /// Build from both halves, checking the Ed25519 key is a valid point.
    pub fn new(
        exchange: [u8; PUBLIC_KEY_SIZE],
        verifying: [u8; PUBLIC_KEY_SIZE],
    ) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(&verifying)
            .map_err(|e| CryptoError::InvalidPublicKey { reason: e.to_string() })?;
        Ok(Self { exchange, verifying })
    }

    /// Parse the 64-byte `exchange || verifying` form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes: [u8; 2 * PUBLIC_KEY_SIZE] = to_array(bytes)?;
        let (exchange, verifying) = bytes.split_at(PUBLIC_KEY_SIZE);
        Self::new(to_array(exchange)?, to_array(verifying)?)
    }

    /// The 64-byte `exchange || verifying` form.
    pub fn to_bytes(&self) -> [u8; 2 * PUBLIC_KEY_SIZE] {
        let mut bytes = [0u8; 2 * PUBLIC_KEY_SIZE];
        bytes[..PUBLIC_KEY_SIZE].copy_from_slice(&self.exchange);
        bytes[PUBLIC_KEY_SIZE..].copy_from_slice(&self.verifying);
        bytes
    }

    /// X25519 public key bytes.
    pub fn exchange_bytes(&self) -> &[u8; PUBLIC_KEY_SIZE] {
        &self.exchange
    }

    /// Hex SHA-256 fingerprint of the exchange key.
    pub fn fingerprint(&self) -> String {
        hex::encode(Sha256::digest(self.exchange))
    }

    /// Verify an Ed25519 signature. Malformed signatures verify as `false`.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        let Ok(key) = VerifyingKey::from_bytes(&self.verifying) else {
            return false;
        };
        key.verify(message, &signature).is_ok()
    }
}

impl fmt::Debug for PersonPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PersonPublicKey({:02x}{:02x}..)", self.exchange[0], self.exchange[1])
    }
}

/// A person's secret keys plus their public half.
///
/// Serializes as the two secrets; the public half is recomputed on load.
#[derive(Clone, Serialize, Deserialize)]
#[serde(from = "KeyPairSecrets", into = "KeyPairSecrets")]
pub struct PersonKeyPair {
    secrets: KeyPairSecrets,
    public: PersonPublicKey,
}

#[derive(Clone, Zeroize, ZeroizeOnDrop, Serialize, Deserialize)]
struct KeyPairSecrets {
    exchange: [u8; 32],
    signing: [u8; 32],
}

impl From<KeyPairSecrets> for PersonKeyPair {
    fn from(secrets: KeyPairSecrets) -> Self {
        let exchange = ExchangePublic::from(&StaticSecret::from(secrets.exchange)).to_bytes();
        let verifying = SigningKey::from_bytes(&secrets.signing).verifying_key().to_bytes();
        Self { secrets, public: PersonPublicKey { exchange, verifying } }
    }
}

impl From<PersonKeyPair> for KeyPairSecrets {
    fn from(pair: PersonKeyPair) -> Self {
        pair.secrets.clone()
    }
}

impl PersonKeyPair {
    /// Build a key pair from secret bytes.
    ///
    /// The caller supplies the randomness, so tests can be deterministic.
    /// Production callers MUST use a cryptographically secure source.
    pub fn from_secrets(exchange: [u8; 32], signing: [u8; 32]) -> Self {
        KeyPairSecrets { exchange, signing }.into()
    }

    /// Public half.
    pub fn public_key(&self) -> &PersonPublicKey {
        &self.public
    }

    /// Sign `message` with the Ed25519 secret.
    pub fn sign(&self, message: &[u8]) -> [u8; SIGNATURE_SIZE] {
        SigningKey::from_bytes(&self.secrets.signing).sign(message).to_bytes()
    }

    /// Raw X25519 agreement with `peer`.
    ///
    /// Rejects low-order peer keys that would yield an all-zero secret.
    pub fn diffie_hellman(&self, peer: &PersonPublicKey) -> Result<[u8; 32], CryptoError> {
        let secret = StaticSecret::from(self.secrets.exchange);
        let shared = secret.diffie_hellman(&ExchangePublic::from(peer.exchange));
        if !shared.was_contributory() {
            return Err(CryptoError::NonContributory);
        }
        Ok(shared.to_bytes())
    }
}

impl fmt::Debug for PersonKeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersonKeyPair").field("public", &self.public).finish_non_exhaustive()
    }
}
