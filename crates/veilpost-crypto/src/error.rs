//! Error types for cryptographic operations

use thiserror::Error;
use veilpost_proto::PayloadVersion;

/// Errors from key handling, wrapping, and decryption.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    /// Invalid key material length
    #[error("invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength {
        /// Expected key length
        expected: usize,
        /// Actual key length
        actual: usize,
    },

    /// The iv is not a valid AEAD nonce
    #[error("invalid iv length: expected {expected}, got {actual}")]
    InvalidIvLength {
        /// Expected iv length
        expected: usize,
        /// Actual iv length
        actual: usize,
    },

    /// Public key bytes are not a valid curve point
    #[error("invalid public key: {reason}")]
    InvalidPublicKey {
        /// Why the key was rejected
        reason: String,
    },

    /// ECDH produced an all-zero secret (low-order peer key)
    #[error("key agreement was not contributory")]
    NonContributory,

    /// None of the wrapped keys opened under the provided key
    #[error("no wrapped key could be opened")]
    KeyUnwrapFailed,

    /// Content failed authentication or is malformed
    #[error("decryption failed: {reason}")]
    DecryptionFailed {
        /// Reason for decryption failure
        reason: String,
    },

    /// The version is read-only and cannot mint new material
    #[error("version {0} can no longer create new data")]
    DeprecatedVersion(PayloadVersion),

    /// A payload could not be assembled
    #[error("payload construction failed: {0}")]
    Payload(#[from] veilpost_proto::ProtocolError),
}

impl CryptoError {
    /// Whether this error is a failure to open ciphertext, as opposed to bad
    /// input or a forbidden operation.
    pub fn is_decryption_failure(&self) -> bool {
        matches!(self, Self::KeyUnwrapFailed | Self::DecryptionFailed { .. })
    }
}
