//! Key shares and recipient records.
//!
//! A key share is the post's content key wrapped for exactly one recipient.
//! Shares are published to the exchange channel and looked up by the
//! recipient with a version-specific [`ShareLookup`].

use serde::{Deserialize, Serialize};

use crate::{
    identifier::{GroupIdentifier, PostIvIdentifier},
    payload::PayloadVersion,
};

/// A content key wrapped for one recipient.
///
/// A share carries no recipient identity. Who it is for follows only from
/// the [`ShareLookup`] it was published under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyShare {
    /// Content key, AEAD-wrapped under the ECDH-derived key.
    pub encrypted_key: Vec<u8>,
    /// HKDF salt used to derive the wrapping key. Empty for -40.
    pub salt: Vec<u8>,
    /// Why the recipient received the share, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provenance: Option<RecipientReason>,
}

/// Why a person became a recipient of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RecipientReason {
    /// The author shared with them directly.
    Direct {
        /// Unix seconds when the share was made
        at: u64,
    },
    /// They were added as a member of one of the author's groups.
    Group {
        /// Unix seconds when the share was made
        at: u64,
        /// The group that invited them
        group: GroupIdentifier,
    },
}

impl RecipientReason {
    /// Build a reason from an optional inviting group.
    pub fn new(at: u64, invited_by: Option<GroupIdentifier>) -> Self {
        match invited_by {
            Some(group) => Self::Group { at, group },
            None => Self::Direct { at },
        }
    }

    /// When the share was made.
    pub fn at(&self) -> u64 {
        match self {
            Self::Direct { at } | Self::Group { at, .. } => *at,
        }
    }
}

/// Everything recorded locally about one recipient of a post.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecipientDetail {
    /// Every reason this person was shared with, oldest first.
    pub reasons: Vec<RecipientReason>,
}

/// Where on the exchange channel a recipient's shares for a post live.
///
/// -40 indexes shares by the recipient's user id. Later versions index by
/// hashes of the post and of the recipient's public key, so neither the
/// lookup nor the [`KeyShare`] stored under it names the recipient.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ShareLookup {
    /// Direct lookup (-40).
    ByRecipient {
        /// Post the share belongs to
        post: PostIvIdentifier,
        /// Recipient user id
        user_id: String,
    },
    /// Hashed lookup (-39, -38).
    ByKeyHash {
        /// Payload version
        version: PayloadVersion,
        /// Hash of (version, network, iv)
        post_hash: String,
        /// Truncated hash of the recipient's exchange public key
        key_hash: String,
    },
}

impl ShareLookup {
    /// `(post_hash, key_hash)` when the lookup is hash-based.
    pub fn hashes(&self) -> Option<(&str, &str)> {
        match self {
            Self::ByRecipient { .. } => None,
            Self::ByKeyHash { post_hash, key_hash, .. } => Some((post_hash, key_hash)),
        }
    }
}
