//! Error types for the decryption protocol.
//!
//! Domain outcomes (no key, not a recipient, tampered content) are never
//! errors: they come back as [`crate::DecryptionResult::Failure`]. The types
//! here cover the infrastructure around the protocol: the key store, the
//! exchange channel, programmer mistakes, and re-sharing.

use thiserror::Error;
use veilpost_crypto::CryptoError;
use veilpost_proto::{PayloadVersion, PersonIdentifier};

/// Errors from a [`crate::KeyStore`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// The backing store is temporarily unreachable
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Returns true if this error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Errors from an [`crate::ExchangeChannel`] implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The channel could not be reached
    #[error("channel unavailable: {0}")]
    Unavailable(String),

    /// The channel refused the request
    #[error("channel rejected request: {0}")]
    Rejected(String),
}

impl ChannelError {
    /// Returns true if this error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Infrastructure or programmer errors while decrypting.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecryptError {
    /// The orchestrator reached a state it cannot continue from
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The key store failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The exchange channel failed
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// The spawned decryption task panicked or was aborted
    #[error("decryption task failed: {0}")]
    TaskFailed(String),
}

impl DecryptError {
    /// Returns true if the attempt may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Channel(e) => e.is_transient(),
            Self::InvalidState(_) | Self::TaskFailed(_) => false,
        }
    }

    /// Returns true if this indicates a bug rather than an environment fault.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }
}

/// Errors from sharing a post with more recipients.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AppendError {
    /// The version can no longer mint key shares
    #[error("version {0} cannot create new data anymore due to leaking risks")]
    DeprecatedVersion(PayloadVersion),

    /// The author's key pair or local key is not in the store
    #[error("keys of {0} are not available locally")]
    MissingAuthorKeys(PersonIdentifier),

    /// Key extraction or wrapping failed
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The key store failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The exchange channel failed
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),
}

impl AppendError {
    /// Returns true if retrying the same request can never succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::DeprecatedVersion(_) | Self::MissingAuthorKeys(_) | Self::Crypto(_))
    }

    /// Returns true if this error may succeed on retry.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::Channel(e) => e.is_transient(),
            _ => false,
        }
    }
}
