//! Wire types for veilpost.
//!
//! Encrypted posts are text blobs embedded in ordinary social-network posts.
//! This crate parses and produces that text ([`Payload`]), the typed
//! identifiers used to key local storage and the exchange channel
//! ([`PersonIdentifier`], [`GroupIdentifier`], [`PostIvIdentifier`]), and
//! the records exchanged when a post is shared with more people
//! ([`KeyShare`], [`RecipientDetail`]).
//!
//! Everything here is pure: no I/O, no cryptography. Parsing fails closed.
#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod errors;
pub mod identifier;
pub mod payload;
pub mod share;

pub use errors::{ProtocolError, Result};
pub use identifier::{GroupIdentifier, PersonIdentifier, PostIvIdentifier};
pub use payload::{OwnerKeyField, PAYLOAD_MARKER, PAYLOAD_TERMINATOR, Payload, PayloadVersion};
pub use share::{KeyShare, RecipientDetail, RecipientReason, ShareLookup};
