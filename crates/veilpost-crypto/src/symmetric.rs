//! Symmetric primitives: XChaCha20-Poly1305 sealing and HKDF key derivation.
//!
//! Every post carries one 24-byte iv. The same iv is used to seal the post
//! content under the content key and the owner key blobs under the author's
//! local key, so the keys must differ. A content key is never reused across
//! posts.

use chacha20poly1305::{
    XChaCha20Poly1305, XNonce,
    aead::{Aead, KeyInit},
};
use hkdf::Hkdf;
use sha2::Sha256;

use crate::{error::CryptoError, keys::SymmetricKey};

/// Size of the payload iv in bytes (XChaCha20 nonce).
pub const IV_SIZE: usize = 24;

fn nonce(iv: &[u8]) -> Result<&XNonce, CryptoError> {
    if iv.len() != IV_SIZE {
        return Err(CryptoError::InvalidIvLength { expected: IV_SIZE, actual: iv.len() });
    }
    Ok(XNonce::from_slice(iv))
}

/// Seal `plaintext` under `key` with `iv`.
///
/// # Errors
///
/// - `InvalidIvLength` if `iv` is not [`IV_SIZE`] bytes
pub fn seal(key: &SymmetricKey, iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = nonce(iv)?;
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    let Ok(ciphertext) = cipher.encrypt(nonce, plaintext) else {
        unreachable!("XChaCha20-Poly1305 encryption cannot fail with valid inputs");
    };
    Ok(ciphertext)
}

/// Open `ciphertext` sealed by [`seal`].
///
/// # Errors
///
/// - `InvalidIvLength` if `iv` is not [`IV_SIZE`] bytes
/// - `DecryptionFailed` if authentication fails
pub fn open(key: &SymmetricKey, iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.as_bytes().into());
    cipher
        .decrypt(nonce(iv)?, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed { reason: "authentication failed".to_string() })
}

/// Derive a 32-byte key from input keying material with HKDF-SHA256.
pub fn derive_key(ikm: &[u8], salt: &[u8], label: &[u8]) -> SymmetricKey {
    let salt = if salt.is_empty() { None } else { Some(salt) };
    let hk = Hkdf::<Sha256>::new(salt, ikm);
    let mut okm = [0u8; 32];
    let Ok(()) = hk.expand(label, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    SymmetricKey::new(okm)
}
