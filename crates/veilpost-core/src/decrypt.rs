//! Decryption orchestrator.
//!
//! One attempt walks a fixed set of states. The cheap paths come first: a
//! cached post key needs no asymmetric crypto at all, and a post the caller
//! wrote opens with their local key. Only then does the orchestrator go to
//! the exchange channel, first with a one-shot query and, for versions that
//! support it, with a live subscription that waits for the share to appear.
//! That subscription is opened before the query runs, so a share published
//! in between reaches the wait.
//!
//! ```text
//! Init -> CacheCheck -> CacheHitVerify -------------------------> Done
//!                    \-> KeyDiscovery -> SelfAuthorDecrypt ------> Done
//!                                     \-> RecipientShareDecrypt -> Done
//!                                                           \-> SubscribeWait -> Done
//! ```
//!
//! Domain outcomes always end in a [`DecryptionResult`]. Only store and
//! channel faults end in a [`DecryptError`].

use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info, warn};
use veilpost_crypto::{
    CryptoError, Decrypted, PayloadCrypto, PersonKeyPair, PersonPublicKey, SymmetricKey,
    strategy_for,
};
use veilpost_proto::{KeyShare, Payload, PersonIdentifier, PostIvIdentifier, ProtocolError};

use crate::{
    channel::ExchangeChannel,
    discovery::{Discovery, DiscoveryConfig, KeyDiscovery},
    env::Environment,
    error::DecryptError,
    event::{DecryptionResult, FailureReason, Progress, ProgressObserver, Provenance},
    store::KeyStore,
    subscription::Subscription,
};

/// Orchestrator configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DecryptorConfig {
    /// Bounds on author key discovery.
    pub discovery: DiscoveryConfig,
}

/// One post to decrypt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecryptionRequest {
    /// Encoded payload text, possibly embedded in a larger post.
    pub payload: String,
    /// Who the social network says wrote the post.
    pub author: PersonIdentifier,
    /// The local user.
    pub me: PersonIdentifier,
}

/// Runs decryption attempts against a store, a channel, and an environment.
///
/// Cheap to clone; clones share the same collaborators.
#[derive(Clone)]
pub struct Decryptor<S, C, E> {
    store: S,
    channel: C,
    env: E,
    config: DecryptorConfig,
}

/// Where an attempt is.
enum State {
    CacheCheck,
    CacheHitVerify { plaintext: Vec<u8> },
    KeyDiscovery,
    SelfAuthorDecrypt { author_key: PersonPublicKey },
    RecipientShareDecrypt { author_key: PersonPublicKey },
    SubscribeWait {
        author_key: PersonPublicKey,
        mine: Box<PersonKeyPair>,
        shares: Subscription<KeyShare>,
    },
    Done(DecryptionResult),
}

impl State {
    fn name(&self) -> &'static str {
        match self {
            Self::CacheCheck => "cache_check",
            Self::CacheHitVerify { .. } => "cache_hit_verify",
            Self::KeyDiscovery => "key_discovery",
            Self::SelfAuthorDecrypt { .. } => "self_author_decrypt",
            Self::RecipientShareDecrypt { .. } => "recipient_share_decrypt",
            Self::SubscribeWait { .. } => "subscribe_wait",
            Self::Done(_) => "done",
        }
    }

    fn fail(reason: FailureReason) -> Self {
        Self::Done(DecryptionResult::failure(reason))
    }
}

enum ShareOutcome {
    Opened(Decrypted),
    NotForMe,
    Broken,
}

/// Everything fixed for the duration of one attempt.
struct Attempt {
    request: DecryptionRequest,
    payload: Payload,
    post: PostIvIdentifier,
    crypto: &'static dyn PayloadCrypto,
}

impl Attempt {
    fn parse(request: DecryptionRequest) -> Result<Self, ProtocolError> {
        let payload = Payload::decode(&request.payload)?;
        // A post lives on the network it was written on
        let post = payload.post_identifier(request.author.network())?;
        let crypto = strategy_for(payload.version());
        Ok(Self { request, payload, post, crypto })
    }

    fn is_self_authored(&self) -> bool {
        self.request.author == self.request.me
    }

    fn open_share(
        &self,
        share: &KeyShare,
        author_key: &PersonPublicKey,
        mine: &PersonKeyPair,
    ) -> ShareOutcome {
        match self.crypto.decrypt_as_recipient(&self.payload, share, author_key, mine) {
            Ok(decrypted) => ShareOutcome::Opened(decrypted),
            Err(CryptoError::KeyUnwrapFailed) => {
                debug!(post = %self.post, "skipping key share that does not unwrap");
                ShareOutcome::NotForMe
            },
            Err(e) => {
                warn!(post = %self.post, error = %e, "key share did not open the post");
                ShareOutcome::Broken
            },
        }
    }

    fn success(
        &self,
        plaintext: &[u8],
        author_key: Option<&PersonPublicKey>,
        provenance: Vec<Provenance>,
    ) -> DecryptionResult {
        let signature_verified = match (self.payload.signature(), author_key) {
            (Some(signature), Some(key)) => {
                let valid =
                    self.crypto.verify_signature(&self.payload.signable_bytes(), signature, key);
                if !valid {
                    warn!(post = %self.post, author = %self.request.author, "bad signature");
                }
                valid
            },
            _ => false,
        };

        DecryptionResult::Success {
            plaintext: String::from_utf8_lossy(plaintext).into_owned(),
            signature_verified,
            provenance,
        }
    }
}

impl<S, C, E> Decryptor<S, C, E>
where
    S: KeyStore,
    C: ExchangeChannel,
    E: Environment,
{
    /// Create an orchestrator over the given collaborators.
    pub fn new(store: S, channel: C, env: E, config: DecryptorConfig) -> Self {
        Self { store, channel, env, config }
    }

    /// Decrypt one post, reporting progress to `observer`.
    ///
    /// # Errors
    ///
    /// - `Store` or `Channel` if a collaborator fails. Identity resolution
    ///   and cache writes are best-effort and never fail the attempt.
    pub async fn decrypt<O: ProgressObserver>(
        &self,
        request: DecryptionRequest,
        observer: &mut O,
    ) -> Result<DecryptionResult, DecryptError> {
        let attempt = match Attempt::parse(request) {
            Ok(attempt) => attempt,
            Err(e) => {
                debug!(error = %e, "not a decodable payload");
                return Ok(DecryptionResult::failure(FailureReason::UnknownPayload));
            },
        };

        let version = attempt.payload.version();
        let mut state = State::CacheCheck;
        loop {
            debug!(state = state.name(), %version, post = %attempt.post, "decrypt step");
            state = match state {
                State::CacheCheck => self.check_cache(&attempt).await?,
                State::CacheHitVerify { plaintext } => {
                    self.verify_cached(&attempt, &plaintext, observer).await?
                },
                State::KeyDiscovery => self.discover(&attempt, observer).await?,
                State::SelfAuthorDecrypt { author_key } => {
                    self.decrypt_as_self(&attempt, author_key).await?
                },
                State::RecipientShareDecrypt { author_key } => {
                    self.decrypt_with_shares(&attempt, author_key, observer).await?
                },
                State::SubscribeWait { author_key, mine, shares } => {
                    self.await_share(&attempt, &author_key, &mine, shares, observer).await?
                },
                State::Done(result) => {
                    match result.failure_reason() {
                        None => info!(%version, post = %attempt.post, "post decrypted"),
                        Some(reason) => {
                            info!(%version, post = %attempt.post, ?reason, "post not decrypted");
                        },
                    }
                    return Ok(result);
                },
            };
        }
    }

    /// Run [`Decryptor::decrypt`] on a tokio task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(&self, request: DecryptionRequest) -> DecryptionTask {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut observer = move |progress: Progress| {
                let _ = progress_tx.send(progress);
            };
            this.decrypt(request, &mut observer).await
        });
        DecryptionTask { progress: progress_rx, handle: Some(handle) }
    }

    async fn check_cache(&self, attempt: &Attempt) -> Result<State, DecryptError> {
        let Some(key) = self.store.cached_post_key(&attempt.post).await? else {
            return Ok(State::KeyDiscovery);
        };

        let payload = &attempt.payload;
        let opened =
            attempt.crypto.decrypt_with_symmetric_key(&key, payload.iv(), payload.encrypted_text());
        match opened {
            Ok(plaintext) => Ok(State::CacheHitVerify { plaintext }),
            Err(e) => {
                warn!(post = %attempt.post, error = %e, "cached post key does not open the post");
                Ok(State::fail(FailureReason::DecryptionFailed))
            },
        }
    }

    async fn verify_cached<O: ProgressObserver>(
        &self,
        attempt: &Attempt,
        plaintext: &[u8],
        observer: &mut O,
    ) -> Result<State, DecryptError> {
        let result = match self.author_key(attempt, true, observer).await? {
            Some(key) => attempt.success(plaintext, Some(&key), vec![Provenance::PostKeyCached]),
            None => attempt.success(
                plaintext,
                None,
                vec![Provenance::AuthorKeyNotFound, Provenance::PostKeyCached],
            ),
        };
        Ok(State::Done(result))
    }

    async fn discover<O: ProgressObserver>(
        &self,
        attempt: &Attempt,
        observer: &mut O,
    ) -> Result<State, DecryptError> {
        match self.author_key(attempt, false, observer).await? {
            Some(author_key) => Ok(State::SelfAuthorDecrypt { author_key }),
            None => Ok(State::fail(FailureReason::AuthorKeyNotFound)),
        }
    }

    /// The author's public key. Own keys are only ever looked up locally.
    async fn author_key<O: ProgressObserver>(
        &self,
        attempt: &Attempt,
        has_cache_fallback: bool,
        observer: &mut O,
    ) -> Result<Option<PersonPublicKey>, DecryptError> {
        let me = &attempt.request.me;
        if attempt.is_self_authored() {
            if let Some(key) = self.store.public_key_of(me).await? {
                return Ok(Some(key));
            }
            return Ok(self.store.private_key_of(me).await?.map(|pair| *pair.public_key()));
        }

        let discovery =
            KeyDiscovery::new(&self.store, &self.channel, &self.env, &self.config.discovery);
        let author = &attempt.request.author;
        match discovery.discover_author_public_key(author, has_cache_fallback, observer).await? {
            Discovery::Found(key) => Ok(Some(key)),
            Discovery::OutOfChance | Discovery::UseCache => Ok(None),
        }
    }

    /// Try the owner key field with the author's local key, then with the
    /// caller's (the same person may post from several identities).
    async fn decrypt_as_self(
        &self,
        attempt: &Attempt,
        author_key: PersonPublicKey,
    ) -> Result<State, DecryptError> {
        let request = &attempt.request;
        let candidates = std::iter::once(&request.author)
            .chain((!attempt.is_self_authored()).then_some(&request.me));

        for who in candidates {
            let Some(local) = self.store.local_key_of(who).await? else {
                continue;
            };
            match attempt.crypto.decrypt_as_author(&attempt.payload, &local) {
                Ok((plaintext, key)) => {
                    self.remember(attempt, &key).await;
                    let provenance = vec![Provenance::NormalDecrypted];
                    let result = attempt.success(&plaintext, Some(&author_key), provenance);
                    return Ok(State::Done(result));
                },
                Err(e) => debug!(%who, error = %e, "owner key field did not open"),
            }
        }

        if attempt.is_self_authored() {
            return Ok(State::fail(FailureReason::SelfDecryptionFailed));
        }
        Ok(State::RecipientShareDecrypt { author_key })
    }

    async fn decrypt_with_shares<O: ProgressObserver>(
        &self,
        attempt: &Attempt,
        author_key: PersonPublicKey,
        observer: &mut O,
    ) -> Result<State, DecryptError> {
        let me = &attempt.request.me;
        let Some(mine) = self.store.private_key_of(me).await? else {
            return Ok(State::fail(FailureReason::AccountNotSetUp));
        };

        observer.on_progress(Progress::FindingPostKey);
        let lookup = attempt.crypto.share_lookup(&attempt.post, me, mine.public_key());
        if let Some((post_hash, key_hash)) = lookup.hashes() {
            observer.on_progress(Progress::FindingHash {
                post_hash: post_hash.to_string(),
                key_hash: key_hash.to_string(),
            });
        }

        let live = attempt.payload.version().supports_live_updates();
        let pending = live.then(|| self.channel.subscribe_key_shares(&lookup));

        let shares = self.channel.query_key_shares(&lookup).await?;
        debug!(post = %attempt.post, count = shares.len(), "queried key shares");
        for share in &shares {
            match attempt.open_share(share, &author_key, &mine) {
                ShareOutcome::Opened(decrypted) => {
                    let result = self.share_opened(attempt, decrypted, &author_key).await;
                    return Ok(State::Done(result));
                },
                ShareOutcome::NotForMe => {},
                ShareOutcome::Broken => return Ok(State::fail(FailureReason::DecryptionFailed)),
            }
        }

        let Some(subscription) = pending else {
            return Ok(State::fail(FailureReason::NotShareTarget));
        };
        Ok(State::SubscribeWait { author_key, mine: Box::new(mine), shares: subscription })
    }

    async fn await_share<O: ProgressObserver>(
        &self,
        attempt: &Attempt,
        author_key: &PersonPublicKey,
        mine: &PersonKeyPair,
        mut shares: Subscription<KeyShare>,
        observer: &mut O,
    ) -> Result<State, DecryptError> {
        observer.on_progress(Progress::AwaitingKeyShare);

        while let Some(share) = shares.next().await {
            match attempt.open_share(&share, author_key, mine) {
                ShareOutcome::Opened(decrypted) => {
                    shares.cancel();
                    let result = self.share_opened(attempt, decrypted, author_key).await;
                    return Ok(State::Done(result));
                },
                ShareOutcome::NotForMe => {},
                ShareOutcome::Broken => {
                    shares.cancel();
                    return Ok(State::fail(FailureReason::DecryptionFailed));
                },
            }
        }

        debug!(post = %attempt.post, "key share subscription closed");
        Ok(State::fail(FailureReason::NotShareTarget))
    }

    async fn share_opened(
        &self,
        attempt: &Attempt,
        (plaintext, key): Decrypted,
        author_key: &PersonPublicKey,
    ) -> DecryptionResult {
        self.remember(attempt, &key).await;
        attempt.success(&plaintext, Some(author_key), vec![Provenance::NormalDecrypted])
    }

    async fn remember(&self, attempt: &Attempt, key: &SymmetricKey) {
        let stored = self.store.put_cached_post_key(&attempt.post, key, &attempt.request.author);
        if let Err(e) = stored.await {
            warn!(post = %attempt.post, error = %e, "failed to cache post key");
        }
    }
}

/// An event from a spawned decryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecryptionEvent {
    /// Intermediate progress.
    Progress(Progress),
    /// The final result. Always the last event.
    Finished(DecryptionResult),
}

/// Handle to a decryption running on a tokio task.
///
/// Dropping the handle aborts the task, which drops its subscriptions.
#[derive(Debug)]
pub struct DecryptionTask {
    progress: mpsc::UnboundedReceiver<Progress>,
    handle: Option<JoinHandle<Result<DecryptionResult, DecryptError>>>,
}

impl DecryptionTask {
    /// Next event: every progress event in order, then one
    /// [`DecryptionEvent::Finished`], then `None`.
    ///
    /// # Errors
    ///
    /// - Whatever [`Decryptor::decrypt`] returned
    /// - `TaskFailed` if the task panicked or was aborted
    pub async fn next_event(&mut self) -> Result<Option<DecryptionEvent>, DecryptError> {
        // The sender lives in the task, so this drains until the task ends
        if let Some(progress) = self.progress.recv().await {
            return Ok(Some(DecryptionEvent::Progress(progress)));
        }

        let Some(handle) = self.handle.take() else {
            return Ok(None);
        };
        match handle.await {
            Ok(result) => result.map(|result| Some(DecryptionEvent::Finished(result))),
            Err(e) => Err(DecryptError::TaskFailed(e.to_string())),
        }
    }

    /// Stop the decryption. A later [`DecryptionTask::next_event`] reports
    /// `TaskFailed`.
    pub fn abort(&self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

impl Drop for DecryptionTask {
    fn drop(&mut self) {
        self.abort();
    }
}
