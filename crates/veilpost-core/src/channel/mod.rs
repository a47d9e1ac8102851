//! Exchange channel contract.
//!
//! The exchange channel is the shared pub/sub service where public keys
//! and key shares are published. It is untrusted: everything read from it
//! is authenticated by the crypto layer before use.

mod memory;

use async_trait::async_trait;
pub use memory::MemoryChannel;
use serde::{Deserialize, Serialize};
use veilpost_proto::{KeyShare, PayloadVersion, PersonIdentifier, PostIvIdentifier, ShareLookup};

use crate::{error::ChannelError, store::PersonRecord, subscription::Subscription};

/// A key share together with the lookup it is published under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressedShare {
    /// Where the recipient will look for it.
    pub lookup: ShareLookup,
    /// The wrapped content key.
    pub share: KeyShare,
}

/// Exchange channel used by the decryption protocol.
#[async_trait]
pub trait ExchangeChannel: Clone + Send + Sync + 'static {
    /// Publish shares for one post.
    async fn publish_key_shares(
        &self,
        version: PayloadVersion,
        post: &PostIvIdentifier,
        shares: Vec<AddressedShare>,
    ) -> Result<(), ChannelError>;

    /// Every share currently published under `lookup`.
    async fn query_key_shares(&self, lookup: &ShareLookup) -> Result<Vec<KeyShare>, ChannelError>;

    /// Shares published under `lookup` from now on.
    fn subscribe_key_shares(&self, lookup: &ShareLookup) -> Subscription<KeyShare>;

    /// Public key announcements for `who`, starting with the current one if
    /// the channel already has it.
    fn subscribe_public_key(&self, who: &PersonIdentifier) -> Subscription<PersonRecord>;
}
