//! Versioned encrypted-post payloads.
//!
//! Posts travel as plain text inside social-network content:
//!
//! ```text
//! 🎼<tag>|<owner key field>|<iv>|<encrypted text>|<signature>:||
//! ```
//!
//! Binary fields are standard base64. The tag selects the version and with
//! it the field layout: `4/4` (-38) carries one owner key blob, `3/4` (-39)
//! and `2/4` (-40) carry a comma-separated list of owner key blobs. The
//! signature may be empty.
//!
//! # Invariants
//!
//! - A payload's version fixes its owner key shape for its whole lifetime;
//!   [`Payload::new`] rejects mismatched shapes.
//! - `decode(encode(p)) == p` for every payload whose version is not -40.
//! - Version -40 decodes but never encodes.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};

use crate::{
    errors::{ProtocolError, Result},
    identifier::PostIvIdentifier,
};

/// Marks the start of a payload inside surrounding text.
pub const PAYLOAD_MARKER: &str = "\u{1F3BC}";

/// Marks the end of a payload.
pub const PAYLOAD_TERMINATOR: &str = ":||";

const FIELD_SEPARATOR: char = '|';
const LIST_SEPARATOR: char = ',';

/// Fields after the version tag: owner key, iv, text, signature.
const FIELD_COUNT: usize = 4;

/// Supported payload versions.
///
/// Numbered negatively for historical reasons; lower is older.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PayloadVersion {
    /// Version -40. Read-only: no new payloads or key shares.
    Alpha40,
    /// Version -39. Per-recipient key shares on the exchange channel.
    Alpha39,
    /// Version -38. Single owner-broadcast key field.
    Alpha38,
}

impl PayloadVersion {
    /// Every supported version, oldest first.
    pub const ALL: [Self; 3] = [Self::Alpha40, Self::Alpha39, Self::Alpha38];

    /// Numeric version (-40, -39, -38).
    pub const fn number(self) -> i8 {
        match self {
            Self::Alpha40 => -40,
            Self::Alpha39 => -39,
            Self::Alpha38 => -38,
        }
    }

    /// Look a version up by number.
    pub const fn from_number(number: i8) -> Option<Self> {
        match number {
            -40 => Some(Self::Alpha40),
            -39 => Some(Self::Alpha39),
            -38 => Some(Self::Alpha38),
            _ => None,
        }
    }

    /// Tag written after the payload marker.
    pub const fn wire_tag(self) -> &'static str {
        match self {
            Self::Alpha40 => "2/4",
            Self::Alpha39 => "3/4",
            Self::Alpha38 => "4/4",
        }
    }

    /// Look a version up by wire tag.
    pub fn from_wire_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|version| version.wire_tag() == tag)
    }

    /// Whether new payloads or key shares may be created for this version.
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::Alpha40)
    }

    /// Whether recipients can wait for key shares published later.
    pub const fn supports_live_updates(self) -> bool {
        !self.is_read_only()
    }

    /// Whether the owner key field is list-shaped.
    pub const fn has_owner_key_list(self) -> bool {
        !matches!(self, Self::Alpha38)
    }
}

impl fmt::Display for PayloadVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Content key material addressed to the post's author.
///
/// Each blob is the content key wrapped under one local key of the author.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerKeyField {
    /// One wrapped key (-38).
    Single(Vec<u8>),
    /// One wrapped key per owner local key (-39, -40).
    List(Vec<Vec<u8>>),
}

impl OwnerKeyField {
    /// All wrapped keys, in wire order.
    pub fn blobs(&self) -> impl Iterator<Item = &[u8]> {
        let blobs: &[Vec<u8>] = match self {
            Self::Single(blob) => std::slice::from_ref(blob),
            Self::List(blobs) => blobs,
        };
        blobs.iter().map(Vec::as_slice)
    }

    fn to_wire(&self) -> String {
        match self {
            Self::Single(blob) => BASE64.encode(blob),
            Self::List(blobs) => {
                blobs.iter().map(|blob| BASE64.encode(blob)).collect::<Vec<_>>().join(",")
            },
        }
    }

    fn from_wire(version: PayloadVersion, field: &str) -> Result<Self> {
        if version.has_owner_key_list() {
            let blobs = field
                .split(LIST_SEPARATOR)
                .map(|blob| decode_field("owner key", blob))
                .collect::<Result<Vec<_>>>()?;
            Ok(Self::List(blobs))
        } else {
            decode_field("owner key", field).map(Self::Single)
        }
    }
}

/// A decoded encrypted post.
///
/// Immutable once built. Construct through [`Payload::new`] or
/// [`Payload::decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    version: PayloadVersion,
    owner_key: OwnerKeyField,
    iv: Vec<u8>,
    encrypted_text: Vec<u8>,
    signature: Vec<u8>,
}

impl Payload {
    /// Build a payload, checking that the owner key shape matches the
    /// version and that no blob is empty.
    ///
    /// An empty `signature` means the post is unsigned.
    pub fn new(
        version: PayloadVersion,
        owner_key: OwnerKeyField,
        iv: Vec<u8>,
        encrypted_text: Vec<u8>,
        signature: Vec<u8>,
    ) -> Result<Self> {
        match (&owner_key, version.has_owner_key_list()) {
            (OwnerKeyField::Single(_), false) => {},
            (OwnerKeyField::List(blobs), true) if !blobs.is_empty() => {},
            _ => {
                return Err(ProtocolError::malformed(format!(
                    "owner key shape does not match version {version}"
                )));
            },
        }
        if owner_key.blobs().any(<[u8]>::is_empty) {
            return Err(ProtocolError::malformed("empty owner key blob"));
        }
        if iv.is_empty() {
            return Err(ProtocolError::malformed("empty iv"));
        }
        Ok(Self { version, owner_key, iv, encrypted_text, signature })
    }

    /// Parse a payload out of text.
    ///
    /// Anything before the marker is ignored, since payloads are embedded in
    /// larger posts.
    pub fn decode(text: &str) -> Result<Self> {
        let start = text
            .find(PAYLOAD_MARKER)
            .ok_or_else(|| ProtocolError::malformed("payload marker not found"))?;
        let body = &text[start + PAYLOAD_MARKER.len()..];
        let end = body
            .find(PAYLOAD_TERMINATOR)
            .ok_or_else(|| ProtocolError::malformed("payload terminator not found"))?;
        let body = &body[..end];

        let (tag, fields) = body
            .split_once(FIELD_SEPARATOR)
            .ok_or_else(|| ProtocolError::malformed("no fields after version tag"))?;
        let version = PayloadVersion::from_wire_tag(tag)
            .ok_or_else(|| ProtocolError::UnsupportedVersion(tag.to_string()))?;

        let fields: Vec<&str> = fields.split(FIELD_SEPARATOR).collect();
        let [owner_key, iv, encrypted_text, signature] = fields.as_slice() else {
            return Err(ProtocolError::malformed(format!(
                "version {version} expects {FIELD_COUNT} fields, got {}",
                fields.len()
            )));
        };

        Self::new(
            version,
            OwnerKeyField::from_wire(version, owner_key)?,
            decode_field("iv", iv)?,
            decode_optional_field("encrypted text", encrypted_text)?,
            decode_optional_field("signature", signature)?,
        )
    }

    /// Serialize to wire text.
    ///
    /// Fails with [`ProtocolError::DeprecatedVersion`] for -40.
    pub fn encode(&self) -> Result<String> {
        if self.version.is_read_only() {
            return Err(ProtocolError::DeprecatedVersion(self.version.number()));
        }
        Ok(format!(
            "{PAYLOAD_MARKER}{}|{}|{}:||",
            self.version.wire_tag(),
            self.signable_text(),
            BASE64.encode(&self.signature)
        ))
    }

    /// Bytes covered by the author's signature.
    pub fn signable_bytes(&self) -> Vec<u8> {
        self.signable_text().into_bytes()
    }

    fn signable_text(&self) -> String {
        format!(
            "{}|{}|{}",
            self.owner_key.to_wire(),
            BASE64.encode(&self.iv),
            BASE64.encode(&self.encrypted_text)
        )
    }

    /// Return a copy carrying `signature`.
    #[must_use]
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    /// Identifier of this post on `network`.
    pub fn post_identifier(&self, network: &str) -> Result<PostIvIdentifier> {
        PostIvIdentifier::new(network, self.iv.clone())
    }

    /// Payload version.
    pub fn version(&self) -> PayloadVersion {
        self.version
    }

    /// Owner key material.
    pub fn owner_key(&self) -> &OwnerKeyField {
        &self.owner_key
    }

    /// Initialization vector shared by content and owner-key encryption.
    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    /// Encrypted content.
    pub fn encrypted_text(&self) -> &[u8] {
        &self.encrypted_text
    }

    /// Signature over [`Payload::signable_bytes`]. `None` if unsigned.
    pub fn signature(&self) -> Option<&[u8]> {
        if self.signature.is_empty() { None } else { Some(&self.signature) }
    }
}

fn decode_field(name: &str, field: &str) -> Result<Vec<u8>> {
    if field.is_empty() {
        return Err(ProtocolError::malformed(format!("empty {name}")));
    }
    decode_optional_field(name, field)
}

fn decode_optional_field(name: &str, field: &str) -> Result<Vec<u8>> {
    BASE64.decode(field).map_err(|e| ProtocolError::malformed(format!("{name} is not base64: {e}")))
}
