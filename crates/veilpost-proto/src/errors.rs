//! Error types for wire parsing and encoding.

use thiserror::Error;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while parsing or producing wire values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The text does not carry a payload, or its fields cannot be split.
    #[error("malformed payload: {reason}")]
    MalformedPayload {
        /// What was wrong with the input
        reason: String,
    },

    /// The payload carries a version tag we do not know.
    #[error("unsupported payload version: {0}")]
    UnsupportedVersion(String),

    /// The version may be read but no longer minted.
    #[error("payload version {0} is read-only and cannot produce new data")]
    DeprecatedVersion(i8),

    /// An identifier's canonical text form failed to parse.
    #[error("invalid identifier {input:?}: {reason}")]
    InvalidIdentifier {
        /// The rejected input
        input: String,
        /// Why it was rejected
        reason: &'static str,
    },
}

impl ProtocolError {
    pub(crate) fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedPayload { reason: reason.into() }
    }

    /// Whether the error means "this text is not a payload we can read".
    ///
    /// Both structural and version errors count: callers surface them to the
    /// user the same way.
    pub fn is_unknown_payload(&self) -> bool {
        matches!(self, Self::MalformedPayload { .. } | Self::UnsupportedVersion(_))
    }
}
