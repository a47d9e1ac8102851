//! Local key and post store contract.
//!
//! The store holds everything the device knows: its own key pairs and local
//! keys, confirmed public keys of other people, recovered post keys, and who
//! each post has been shared with. The trait is async (via `async-trait`)
//! because real backends sit behind I/O.

mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
pub use memory::MemoryStore;
use serde::{Deserialize, Serialize};
use veilpost_crypto::{LocalKey, PersonKeyPair, PersonPublicKey, SymmetricKey};
use veilpost_proto::{PersonIdentifier, PostIvIdentifier, RecipientDetail, RecipientReason};

use crate::{error::StoreError, subscription::Subscription};

/// What the store knows about one person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersonRecord {
    /// Who this is.
    pub identifier: PersonIdentifier,
    /// Their public key, once known.
    pub public_key: Option<PersonPublicKey>,
}

impl PersonRecord {
    /// A record with a known public key.
    pub fn with_key(identifier: PersonIdentifier, public_key: PersonPublicKey) -> Self {
        Self { identifier, public_key: Some(public_key) }
    }
}

/// Key/post store used by the decryption protocol.
///
/// Must be Clone (shared by the orchestrator, appender, and spawned tasks),
/// Send + Sync, and `'static`. Implementations typically share internal
/// state via Arc, so clones access the same underlying store.
///
/// # Invariants
///
/// - A cached post key, once written, is never replaced by a different key
/// - `resolve_identity` is best-effort; callers treat errors as "not found"
#[async_trait]
pub trait KeyStore: Clone + Send + Sync + 'static {
    /// Key pair of a local identity. `None` if this device has no account
    /// for `who`.
    async fn private_key_of(
        &self,
        who: &PersonIdentifier,
    ) -> Result<Option<PersonKeyPair>, StoreError>;

    /// Local wrapping key of a local identity.
    async fn local_key_of(&self, who: &PersonIdentifier) -> Result<Option<LocalKey>, StoreError>;

    /// Confirmed public key of anyone.
    async fn public_key_of(
        &self,
        who: &PersonIdentifier,
    ) -> Result<Option<PersonPublicKey>, StoreError>;

    /// Previously recovered content key of a post.
    async fn cached_post_key(
        &self,
        post: &PostIvIdentifier,
    ) -> Result<Option<SymmetricKey>, StoreError>;

    /// Remember the content key of a post.
    ///
    /// Writing the same key again is a no-op. Writing a different key keeps
    /// the first one.
    async fn put_cached_post_key(
        &self,
        post: &PostIvIdentifier,
        key: &SymmetricKey,
        author: &PersonIdentifier,
    ) -> Result<(), StoreError>;

    /// Try to learn `who`'s public key from sources outside the store
    /// (profile scraping, directories). A key found this way is recorded.
    async fn resolve_identity(
        &self,
        who: &PersonIdentifier,
    ) -> Result<Option<PersonRecord>, StoreError>;

    /// Notifications whenever the store's record of `who` changes.
    fn subscribe_person_changes(&self, who: &PersonIdentifier) -> Subscription<PersonRecord>;

    /// Everyone a post has been shared with.
    async fn post_recipients(
        &self,
        post: &PostIvIdentifier,
    ) -> Result<BTreeMap<PersonIdentifier, RecipientDetail>, StoreError>;

    /// Record new recipients of a post. Reasons are appended to any already
    /// recorded for the same person.
    async fn append_post_recipients(
        &self,
        post: &PostIvIdentifier,
        recipients: BTreeMap<PersonIdentifier, RecipientReason>,
    ) -> Result<(), StoreError>;
}
