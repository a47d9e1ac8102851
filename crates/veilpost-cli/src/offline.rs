//! Exchange channel for running without a network.

use async_trait::async_trait;
use veilpost_core::{AddressedShare, ChannelError, ExchangeChannel, PersonRecord, Subscription};
use veilpost_proto::{KeyShare, PayloadVersion, PersonIdentifier, PostIvIdentifier, ShareLookup};

/// A channel with nothing on it.
///
/// Queries come back empty and subscriptions close immediately, so the
/// decryptor relies on the local store alone. Publishing is rejected.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineChannel;

#[async_trait]
impl ExchangeChannel for OfflineChannel {
    async fn publish_key_shares(
        &self,
        _version: PayloadVersion,
        post: &PostIvIdentifier,
        _shares: Vec<AddressedShare>,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unavailable(format!("offline, cannot publish shares for {post}")))
    }

    async fn query_key_shares(&self, _lookup: &ShareLookup) -> Result<Vec<KeyShare>, ChannelError> {
        Ok(Vec::new())
    }

    fn subscribe_key_shares(&self, _lookup: &ShareLookup) -> Subscription<KeyShare> {
        Subscription::closed()
    }

    fn subscribe_public_key(&self, _who: &PersonIdentifier) -> Subscription<PersonRecord> {
        Subscription::closed()
    }
}
