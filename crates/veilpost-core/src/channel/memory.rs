#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;
use veilpost_crypto::PersonPublicKey;
use veilpost_proto::{KeyShare, PayloadVersion, PersonIdentifier, PostIvIdentifier, ShareLookup};

use super::{AddressedShare, ExchangeChannel};
use crate::{error::ChannelError, store::PersonRecord, subscription::Subscription};

type Watchers<K, T> = HashMap<K, Vec<(u64, mpsc::UnboundedSender<T>)>>;

/// In-memory exchange channel for tests and simulation.
///
/// Clones share state. Counts queries and subscriptions so tests can assert
/// which network paths an operation took.
#[derive(Clone, Default)]
pub struct MemoryChannel {
    inner: Arc<Mutex<MemoryChannelInner>>,
}

#[derive(Default)]
struct MemoryChannelInner {
    shares: HashMap<ShareLookup, Vec<KeyShare>>,
    share_watchers: Watchers<ShareLookup, KeyShare>,
    /// Published as soon as the next query has taken its snapshot
    after_next_query: Vec<AddressedShare>,

    public_keys: HashMap<PersonIdentifier, PersonPublicKey>,
    key_watchers: Watchers<PersonIdentifier, PersonRecord>,

    next_watcher_id: u64,
    queries: usize,
    share_subscriptions: usize,
    key_subscriptions: usize,
    offline: bool,
}

impl MemoryChannel {
    /// Create a new empty channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `who`'s public key and notify subscribers.
    #[allow(clippy::expect_used)]
    pub fn announce_public_key(&self, who: PersonIdentifier, key: PersonPublicKey) {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.public_keys.insert(who.clone(), key);
        let record = PersonRecord::with_key(who.clone(), key);
        if let Some(watchers) = inner.key_watchers.get_mut(&who) {
            watchers.retain(|(_, tx)| tx.send(record.clone()).is_ok());
        }
    }

    /// Make queries and publishes fail with `Unavailable`.
    #[allow(clippy::expect_used)]
    pub fn set_offline(&self, offline: bool) {
        self.inner.lock().expect("Mutex poisoned").offline = offline;
    }

    /// Publish `shares` right after the next `query_key_shares` has read
    /// its result, so the querier misses them.
    #[allow(clippy::expect_used)]
    pub fn publish_after_next_query(&self, shares: Vec<AddressedShare>) {
        self.inner.lock().expect("Mutex poisoned").after_next_query.extend(shares);
    }

    /// End every open key-share subscription.
    #[allow(clippy::expect_used)]
    pub fn close_share_subscriptions(&self) {
        self.inner.lock().expect("Mutex poisoned").share_watchers.clear();
    }

    /// Number of `query_key_shares` calls so far.
    #[allow(clippy::expect_used)]
    pub fn query_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").queries
    }

    /// Number of key-share subscriptions ever opened.
    #[allow(clippy::expect_used)]
    pub fn share_subscription_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").share_subscriptions
    }

    /// Number of public-key subscriptions ever opened.
    #[allow(clippy::expect_used)]
    pub fn key_subscription_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").key_subscriptions
    }

    /// Number of subscriptions of either kind still open.
    #[allow(clippy::expect_used)]
    pub fn open_subscriptions(&self) -> usize {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.share_watchers.values().map(Vec::len).sum::<usize>()
            + inner.key_watchers.values().map(Vec::len).sum::<usize>()
    }

    /// Every share published under `lookup`, without counting a query.
    #[allow(clippy::expect_used)]
    pub fn published(&self, lookup: &ShareLookup) -> Vec<KeyShare> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        inner.shares.get(lookup).cloned().unwrap_or_default()
    }

    fn unavailable() -> ChannelError {
        ChannelError::Unavailable("channel offline".to_string())
    }
}

impl MemoryChannelInner {
    fn deliver(&mut self, shares: Vec<AddressedShare>) {
        for AddressedShare { lookup, share } in shares {
            if let Some(watchers) = self.share_watchers.get_mut(&lookup) {
                watchers.retain(|(_, tx)| tx.send(share.clone()).is_ok());
            }
            self.shares.entry(lookup).or_default().push(share);
        }
    }
}

/// Register a watcher and build a subscription that unregisters it.
///
/// `initial` is delivered to the new watcher only, before anything else.
#[allow(clippy::expect_used)]
fn watch<K, T, F>(
    channel: &MemoryChannel,
    key: &K,
    initial: Option<T>,
    select: F,
) -> Subscription<T>
where
    K: Clone + Eq + Hash + Send + 'static,
    T: Send + 'static,
    F: Fn(&mut MemoryChannelInner) -> &mut Watchers<K, T> + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    if let Some(event) = initial {
        let _ = tx.send(event);
    }
    let id = {
        let mut inner = channel.inner.lock().expect("Mutex poisoned");
        let id = inner.next_watcher_id;
        inner.next_watcher_id += 1;
        select(&mut *inner).entry(key.clone()).or_default().push((id, tx));
        id
    };

    let shared = Arc::clone(&channel.inner);
    let key = key.clone();
    Subscription::new(rx, move || {
        let mut inner = shared.lock().expect("Mutex poisoned");
        let watchers = select(&mut *inner);
        if let Some(list) = watchers.get_mut(&key) {
            list.retain(|(watcher, _)| *watcher != id);
            if list.is_empty() {
                watchers.remove(&key);
            }
        }
    })
}

#[async_trait]
impl ExchangeChannel for MemoryChannel {
    #[allow(clippy::expect_used)]
    async fn publish_key_shares(
        &self,
        version: PayloadVersion,
        post: &PostIvIdentifier,
        shares: Vec<AddressedShare>,
    ) -> Result<(), ChannelError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        if inner.offline {
            return Err(Self::unavailable());
        }

        debug!(%version, %post, count = shares.len(), "publishing key shares");
        inner.deliver(shares);
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn query_key_shares(&self, lookup: &ShareLookup) -> Result<Vec<KeyShare>, ChannelError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.queries += 1;
        if inner.offline {
            return Err(Self::unavailable());
        }
        let found = inner.shares.get(lookup).cloned().unwrap_or_default();
        let late = std::mem::take(&mut inner.after_next_query);
        inner.deliver(late);
        Ok(found)
    }

    #[allow(clippy::expect_used)]
    fn subscribe_key_shares(&self, lookup: &ShareLookup) -> Subscription<KeyShare> {
        self.inner.lock().expect("Mutex poisoned").share_subscriptions += 1;
        watch(self, lookup, None, |inner| &mut inner.share_watchers)
    }

    #[allow(clippy::expect_used)]
    fn subscribe_public_key(&self, who: &PersonIdentifier) -> Subscription<PersonRecord> {
        let current = {
            let mut inner = self.inner.lock().expect("Mutex poisoned");
            inner.key_subscriptions += 1;
            inner.public_keys.get(who).map(|key| PersonRecord::with_key(who.clone(), *key))
        };

        watch(self, who, current, |inner| &mut inner.key_watchers)
    }
}
