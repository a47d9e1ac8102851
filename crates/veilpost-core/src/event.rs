//! Decryption results, progress events, and observers.

use serde::{Deserialize, Serialize};

/// Outcome of one decryption attempt.
///
/// Every domain outcome is a value here; infrastructure faults surface as
/// [`crate::DecryptError`] instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DecryptionResult {
    /// The post was decrypted.
    Success {
        /// Decrypted post text.
        plaintext: String,
        /// Whether the author's signature was checked and valid. `false`
        /// when the signature is absent or the author key is unknown.
        signature_verified: bool,
        /// Which paths produced this result, in order.
        provenance: Vec<Provenance>,
    },
    /// The post could not be decrypted.
    Failure {
        /// Why.
        reason: FailureReason,
    },
}

impl DecryptionResult {
    pub(crate) fn failure(reason: FailureReason) -> Self {
        Self::Failure { reason }
    }

    /// Decrypted text, if successful.
    pub fn plaintext(&self) -> Option<&str> {
        match self {
            Self::Success { plaintext, .. } => Some(plaintext),
            Self::Failure { .. } => None,
        }
    }

    /// Failure reason, if unsuccessful.
    pub fn failure_reason(&self) -> Option<FailureReason> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { reason } => Some(*reason),
        }
    }
}

/// Stable reason codes for a failed decryption.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// The text is not a payload of any supported version.
    UnknownPayload,
    /// The author's public key could not be found.
    AuthorKeyNotFound,
    /// The caller wrote this post but can no longer open it.
    SelfDecryptionFailed,
    /// The caller has no key pair.
    AccountNotSetUp,
    /// No key share for the caller exists.
    NotShareTarget,
    /// Key material was found but the post did not open.
    DecryptionFailed,
}

/// How a successful result was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// The author's public key was not available, so nothing was verified.
    AuthorKeyNotFound,
    /// The content key came from the local cache.
    PostKeyCached,
    /// The content key was recovered from the payload or a key share.
    NormalDecrypted,
}

/// Transient progress reported while a decryption is running.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Progress {
    /// Looking for the author's public key (once per discovery attempt).
    FindingPersonPublicKey,
    /// Looking for a key share addressed to the caller.
    FindingPostKey,
    /// Channel lookup keys of a hashed share query.
    FindingHash {
        /// Hash of the post
        post_hash: String,
        /// Hash of the caller's public key
        key_hash: String,
    },
    /// No share was published yet; waiting for one.
    AwaitingKeyShare,
}

/// Receives progress events.
pub trait ProgressObserver: Send {
    /// Called for each event, in order.
    fn on_progress(&mut self, progress: Progress);
}

impl<F> ProgressObserver for F
where
    F: FnMut(Progress) + Send,
{
    fn on_progress(&mut self, progress: Progress) {
        self(progress);
    }
}

/// An observer that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct IgnoreProgress;

impl ProgressObserver for IgnoreProgress {
    fn on_progress(&mut self, _progress: Progress) {}
}
