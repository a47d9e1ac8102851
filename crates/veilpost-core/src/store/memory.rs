#![allow(clippy::disallowed_types, reason = "Synchronous in-memory operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;
use veilpost_crypto::{LocalKey, PersonKeyPair, PersonPublicKey, SymmetricKey};
use veilpost_proto::{PersonIdentifier, PostIvIdentifier, RecipientDetail, RecipientReason};

use super::{KeyStore, PersonRecord};
use crate::{error::StoreError, subscription::Subscription};

/// In-memory key store for tests, simulation, and ephemeral sessions.
///
/// All state is wrapped in `Arc<Mutex<>>` so clones share it. Uses
/// `lock().expect()`, which panics if the mutex is poisoned - acceptable for
/// test code. The lock is never held across an await.
///
/// Besides the [`KeyStore`] contract it models an external directory:
/// profiles registered with [`MemoryStore::publish_profile`] are what
/// [`KeyStore::resolve_identity`] finds.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryStoreInner>>,
}

#[derive(Default)]
struct MemoryStoreInner {
    /// Local accounts
    key_pairs: HashMap<PersonIdentifier, PersonKeyPair>,
    local_keys: HashMap<PersonIdentifier, LocalKey>,

    /// Confirmed public keys
    public_keys: HashMap<PersonIdentifier, PersonPublicKey>,

    /// Profiles reachable by `resolve_identity`
    directory: HashMap<PersonIdentifier, PersonPublicKey>,

    /// Recovered post keys with the author they were recorded for
    post_keys: HashMap<PostIvIdentifier, (SymmetricKey, PersonIdentifier)>,

    recipients: HashMap<PostIvIdentifier, BTreeMap<PersonIdentifier, RecipientDetail>>,

    /// Person-change subscribers by identity, tagged for removal on cancel
    watchers: HashMap<PersonIdentifier, Vec<(u64, mpsc::UnboundedSender<PersonRecord>)>>,
    next_watcher_id: u64,

    /// Keys recorded just after the next resolve of that person misses
    learned_after_resolve: HashMap<PersonIdentifier, PersonPublicKey>,

    resolve_calls: usize,
    fail_resolves: bool,
}

impl MemoryStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local account: key pair, local key, and own public key.
    #[allow(clippy::expect_used)]
    pub fn add_identity(&self, who: PersonIdentifier, key_pair: PersonKeyPair, local: LocalKey) {
        let public = *key_pair.public_key();
        {
            let mut inner = self.inner.lock().expect("Mutex poisoned");
            inner.key_pairs.insert(who.clone(), key_pair);
            inner.local_keys.insert(who.clone(), local);
        }
        self.put_public_key(who, public);
    }

    /// Record a confirmed public key and notify person-change subscribers.
    #[allow(clippy::expect_used)]
    pub fn put_public_key(&self, who: PersonIdentifier, key: PersonPublicKey) {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.public_keys.insert(who.clone(), key);
        let record = PersonRecord::with_key(who.clone(), key);
        if let Some(watchers) = inner.watchers.get_mut(&who) {
            watchers.retain(|(_, tx)| tx.send(record.clone()).is_ok());
        }
    }

    /// Notify person-change subscribers with the current record of `who`,
    /// whether or not it has a key.
    #[allow(clippy::expect_used)]
    pub fn touch_person(&self, who: &PersonIdentifier) {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let record = PersonRecord {
            identifier: who.clone(),
            public_key: inner.public_keys.get(who).copied(),
        };
        if let Some(watchers) = inner.watchers.get_mut(who) {
            watchers.retain(|(_, tx)| tx.send(record.clone()).is_ok());
        }
    }

    /// Make `who`'s profile discoverable by `resolve_identity`.
    #[allow(clippy::expect_used)]
    pub fn publish_profile(&self, who: PersonIdentifier, key: PersonPublicKey) {
        self.inner.lock().expect("Mutex poisoned").directory.insert(who, key);
    }

    /// Have the next `resolve_identity` of `who` come back empty, then record
    /// `key` before it returns, as if learned from elsewhere meanwhile.
    #[allow(clippy::expect_used)]
    pub fn learn_after_next_resolve(&self, who: PersonIdentifier, key: PersonPublicKey) {
        self.inner.lock().expect("Mutex poisoned").learned_after_resolve.insert(who, key);
    }

    /// Make every `resolve_identity` call fail, to exercise best-effort paths.
    #[allow(clippy::expect_used)]
    pub fn set_resolve_failure(&self, fail: bool) {
        self.inner.lock().expect("Mutex poisoned").fail_resolves = fail;
    }

    /// Number of `resolve_identity` calls so far.
    #[allow(clippy::expect_used)]
    pub fn resolve_calls(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").resolve_calls
    }

    /// Number of live person-change subscriptions.
    #[allow(clippy::expect_used)]
    pub fn watcher_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").watchers.values().map(Vec::len).sum()
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    #[allow(clippy::expect_used)]
    async fn private_key_of(
        &self,
        who: &PersonIdentifier,
    ) -> Result<Option<PersonKeyPair>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").key_pairs.get(who).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn local_key_of(&self, who: &PersonIdentifier) -> Result<Option<LocalKey>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").local_keys.get(who).cloned())
    }

    #[allow(clippy::expect_used)]
    async fn public_key_of(
        &self,
        who: &PersonIdentifier,
    ) -> Result<Option<PersonPublicKey>, StoreError> {
        Ok(self.inner.lock().expect("Mutex poisoned").public_keys.get(who).copied())
    }

    #[allow(clippy::expect_used)]
    async fn cached_post_key(
        &self,
        post: &PostIvIdentifier,
    ) -> Result<Option<SymmetricKey>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.post_keys.get(post).map(|(key, _)| key.clone()))
    }

    #[allow(clippy::expect_used)]
    async fn put_cached_post_key(
        &self,
        post: &PostIvIdentifier,
        key: &SymmetricKey,
        author: &PersonIdentifier,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        match inner.post_keys.get(post) {
            Some((existing, _)) if existing == key => {},
            Some(_) => warn!(%post, "refusing to replace cached post key with a different key"),
            None => {
                inner.post_keys.insert(post.clone(), (key.clone(), author.clone()));
            },
        }
        Ok(())
    }

    #[allow(clippy::expect_used)]
    async fn resolve_identity(
        &self,
        who: &PersonIdentifier,
    ) -> Result<Option<PersonRecord>, StoreError> {
        let (found, learned) = {
            let mut inner = self.inner.lock().expect("Mutex poisoned");
            inner.resolve_calls += 1;
            if inner.fail_resolves {
                return Err(StoreError::Unavailable("directory unreachable".to_string()));
            }
            match inner.learned_after_resolve.remove(who) {
                Some(key) => (None, Some(key)),
                None => (inner.directory.get(who).copied(), None),
            }
        };

        if let Some(key) = learned {
            self.put_public_key(who.clone(), key);
            return Ok(None);
        }

        match found {
            Some(key) => {
                self.put_public_key(who.clone(), key);
                Ok(Some(PersonRecord::with_key(who.clone(), key)))
            },
            None => Ok(None),
        }
    }

    #[allow(clippy::expect_used)]
    fn subscribe_person_changes(&self, who: &PersonIdentifier) -> Subscription<PersonRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut inner = self.inner.lock().expect("Mutex poisoned");
            let id = inner.next_watcher_id;
            inner.next_watcher_id += 1;
            inner.watchers.entry(who.clone()).or_default().push((id, tx));
            id
        };

        let store = Arc::clone(&self.inner);
        let who = who.clone();
        Subscription::new(rx, move || {
            let mut inner = store.lock().expect("Mutex poisoned");
            if let Some(watchers) = inner.watchers.get_mut(&who) {
                watchers.retain(|(watcher, _)| *watcher != id);
                if watchers.is_empty() {
                    inner.watchers.remove(&who);
                }
            }
        })
    }

    #[allow(clippy::expect_used)]
    async fn post_recipients(
        &self,
        post: &PostIvIdentifier,
    ) -> Result<BTreeMap<PersonIdentifier, RecipientDetail>, StoreError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.recipients.get(post).cloned().unwrap_or_default())
    }

    #[allow(clippy::expect_used)]
    async fn append_post_recipients(
        &self,
        post: &PostIvIdentifier,
        recipients: BTreeMap<PersonIdentifier, RecipientReason>,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        let recorded = inner.recipients.entry(post.clone()).or_default();
        for (who, reason) in recipients {
            recorded.entry(who).or_default().reasons.push(reason);
        }
        Ok(())
    }
}
