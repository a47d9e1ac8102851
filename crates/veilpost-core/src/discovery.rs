//! Author public key discovery.
//!
//! Finding a key is a bounded loop. Each attempt asks the store to resolve
//! the author from outside sources, and if that fails, waits for whichever
//! fires first: the exchange channel announcing the key, or the store
//! learning about the author some other way. A caller that already has the
//! post key cached does not wait at all; it only needs the author key to
//! verify a signature.
//!
//! Both sources are watched before the attempt resolves, so a key that lands
//! while resolution is still running wakes the wait instead of being missed.

use std::time::Duration;

use tracing::{debug, warn};
use veilpost_crypto::PersonPublicKey;
use veilpost_proto::PersonIdentifier;

use crate::{
    channel::ExchangeChannel,
    env::Environment,
    error::DecryptError,
    event::{Progress, ProgressObserver},
    store::{KeyStore, PersonRecord},
    subscription::{Race, Subscription, first_wins},
};

/// Default bound on discovery attempts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Key announcements from the channel, then changes seen by the store.
type Watch = (Subscription<PersonRecord>, Subscription<PersonRecord>);

/// Where discovery gives up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryConfig {
    /// Attempts before giving up with [`Discovery::OutOfChance`].
    pub max_attempts: u32,
    /// Upper bound on a single wait for the channel or the store. `None`
    /// waits until either side produces a key or closes.
    pub wakeup_timeout: Option<Duration>,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self { max_attempts: DEFAULT_MAX_ATTEMPTS, wakeup_timeout: None }
    }
}

/// How discovery ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Discovery {
    /// The author's key is known.
    Found(PersonPublicKey),
    /// Every attempt failed.
    OutOfChance,
    /// Resolution failed and the caller said a cached post key is enough.
    UseCache,
}

/// Bounded search for an author's public key.
pub struct KeyDiscovery<'a, S, C, E> {
    store: &'a S,
    channel: &'a C,
    env: &'a E,
    config: &'a DiscoveryConfig,
}

impl<'a, S, C, E> KeyDiscovery<'a, S, C, E>
where
    S: KeyStore,
    C: ExchangeChannel,
    E: Environment,
{
    /// Borrow the collaborators for one search.
    pub fn new(store: &'a S, channel: &'a C, env: &'a E, config: &'a DiscoveryConfig) -> Self {
        Self { store, channel, env, config }
    }

    /// Find `author`'s public key.
    ///
    /// Emits [`Progress::FindingPersonPublicKey`] once per attempt.
    ///
    /// # Errors
    ///
    /// - `Store` if the local key lookup fails. Resolution failures are not
    ///   errors; they count as "not found".
    pub async fn discover_author_public_key<O: ProgressObserver>(
        &self,
        author: &PersonIdentifier,
        has_cache_fallback: bool,
        observer: &mut O,
    ) -> Result<Discovery, DecryptError> {
        if let Some(key) = self.store.public_key_of(author).await? {
            return Ok(Discovery::Found(key));
        }

        for attempt in 1..=self.config.max_attempts {
            observer.on_progress(Progress::FindingPersonPublicKey);
            debug!(%author, attempt, "resolving author");
            let watch = (!has_cache_fallback).then(|| self.watch(author));

            match self.store.resolve_identity(author).await {
                Ok(Some(PersonRecord { public_key: Some(key), .. })) => {
                    return Ok(Discovery::Found(key));
                },
                Ok(_) => {},
                Err(e) => warn!(%author, error = %e, "identity resolution failed"),
            }

            let Some((from_channel, from_store)) = watch else {
                return Ok(Discovery::UseCache);
            };

            match self.wait_for_change(from_channel, from_store).await {
                Race::First(record) | Race::Second(record) => {
                    if let Some(key) = record.public_key {
                        debug!(%author, attempt, "author key announced");
                        return Ok(Discovery::Found(key));
                    }
                },
                Race::Closed => debug!(%author, attempt, "both key sources closed"),
                Race::TimedOut => debug!(%author, attempt, "key wait timed out"),
            }

            if let Some(key) = self.store.public_key_of(author).await? {
                return Ok(Discovery::Found(key));
            }
        }

        debug!(%author, attempts = self.config.max_attempts, "author key not found");
        Ok(Discovery::OutOfChance)
    }

    fn watch(&self, author: &PersonIdentifier) -> Watch {
        (self.channel.subscribe_public_key(author), self.store.subscribe_person_changes(author))
    }

    /// Race the channel's key announcements against store changes.
    ///
    /// Any event from either side ends the wait, keyless ones included. The
    /// store reports additions and updates but has no removal event, so a
    /// keyless record only means the author changed and the caller rechecks
    /// [`KeyStore::public_key_of`] before the next attempt.
    async fn wait_for_change(
        &self,
        from_channel: Subscription<PersonRecord>,
        from_store: Subscription<PersonRecord>,
    ) -> Race<PersonRecord, PersonRecord> {
        let any = |_: &PersonRecord| true;

        let timeout = self.config.wakeup_timeout;
        let deadline = async move {
            match timeout {
                Some(duration) => self.env.sleep(duration).await,
                None => std::future::pending().await,
            }
        };

        first_wins(from_channel, any, from_store, any, deadline).await
    }
}
