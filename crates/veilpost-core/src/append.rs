//! Sharing an existing post with more recipients.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, warn};
use veilpost_crypto::{CryptoError, SymmetricKey, strategy_for};
use veilpost_proto::{
    GroupIdentifier, OwnerKeyField, PayloadVersion, PersonIdentifier, PostIvIdentifier,
    RecipientReason,
};

use crate::{
    channel::{AddressedShare, ExchangeChannel},
    env::Environment,
    error::AppendError,
    store::KeyStore,
};

/// Salt length for each new key share.
pub const SHARE_SALT_SIZE: usize = 16;

/// The post's content key as the author has it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentKey {
    /// Already recovered.
    Plain(SymmetricKey),
    /// Still wrapped in the payload's owner key field under the author's
    /// local key.
    Wrapped(OwnerKeyField),
}

/// A request to share a post with more people.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    /// Version of the post being shared.
    pub version: PayloadVersion,
    /// The post's content key.
    pub content_key: ContentKey,
    /// The post's iv.
    pub iv: Vec<u8>,
    /// People to add, in order.
    pub recipients: Vec<PersonIdentifier>,
    /// The post's author, a local identity.
    pub author: PersonIdentifier,
    /// The group the new recipients were invited through, if any.
    pub invited_by: Option<GroupIdentifier>,
}

/// What an append did with each requested recipient.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendReport {
    /// Recipients that received a new key share.
    pub shared: Vec<PersonIdentifier>,
    /// Recipients already shared with, listed twice, or the author.
    pub skipped_duplicates: Vec<PersonIdentifier>,
    /// Recipients whose public key is not known locally.
    pub skipped_without_key: Vec<PersonIdentifier>,
}

/// Mints and publishes key shares for new recipients.
#[derive(Clone)]
pub struct Appender<S, C, E> {
    store: S,
    channel: C,
    env: E,
}

impl<S, C, E> Appender<S, C, E>
where
    S: KeyStore,
    C: ExchangeChannel,
    E: Environment,
{
    /// Create an appender over the given collaborators.
    pub fn new(store: S, channel: C, env: E) -> Self {
        Self { store, channel, env }
    }

    /// Share a post with `request.recipients`.
    ///
    /// Every new share is published in one batch, then recorded as a
    /// recipient of the post in the store. Nothing is published when every
    /// recipient is skipped.
    ///
    /// # Errors
    ///
    /// - `DeprecatedVersion` for read-only versions, before anything else
    /// - `MissingAuthorKeys` if the author's key pair, or the local key
    ///   needed to unwrap a [`ContentKey::Wrapped`], is not in the store
    /// - `Crypto` if the content key does not unwrap or a recipient key is
    ///   unusable
    /// - `Store` or `Channel` if a collaborator fails
    pub async fn append_share_target(
        &self,
        request: AppendRequest,
    ) -> Result<AppendReport, AppendError> {
        let AppendRequest { version, content_key, iv, recipients, author, invited_by } = request;
        if version.is_read_only() {
            return Err(AppendError::DeprecatedVersion(version));
        }
        let crypto = strategy_for(version);

        let author_keys = self
            .store
            .private_key_of(&author)
            .await?
            .ok_or_else(|| AppendError::MissingAuthorKeys(author.clone()))?;

        let content_key = match content_key {
            ContentKey::Plain(key) => key,
            ContentKey::Wrapped(owner_key) => {
                let local = self
                    .store
                    .local_key_of(&author)
                    .await?
                    .ok_or_else(|| AppendError::MissingAuthorKeys(author.clone()))?;
                crypto.extract_content_key(&owner_key, &iv, &local)?
            },
        };

        let post = PostIvIdentifier::new(author.network(), iv.clone()).map_err(CryptoError::from)?;
        let recorded = self.store.post_recipients(&post).await?;
        let reason = RecipientReason::new(self.env.wall_clock_secs(), invited_by);

        let mut report = AppendReport::default();
        let mut seen = BTreeSet::new();
        let mut shares = Vec::new();
        let mut reasons = BTreeMap::new();

        for recipient in recipients {
            if recipient == author
                || recorded.contains_key(&recipient)
                || !seen.insert(recipient.clone())
            {
                report.skipped_duplicates.push(recipient);
                continue;
            }

            let Some(public) = self.store.public_key_of(&recipient).await? else {
                warn!(%recipient, %post, "no public key for recipient, skipping");
                report.skipped_without_key.push(recipient);
                continue;
            };

            let salt = self.env.random_array::<SHARE_SALT_SIZE>().to_vec();
            let mut share =
                crypto.wrap_for_recipient(&content_key, &iv, &author_keys, &public, salt)?;
            share.provenance = Some(reason.clone());

            let lookup = crypto.share_lookup(&post, &recipient, &public);
            shares.push(AddressedShare { lookup, share });
            reasons.insert(recipient.clone(), reason.clone());
            report.shared.push(recipient);
        }

        if shares.is_empty() {
            debug!(%post, "no new recipients");
            return Ok(report);
        }

        self.channel.publish_key_shares(version, &post, shares).await?;
        self.store.append_post_recipients(&post, reasons).await?;

        info!(
            %version,
            %post,
            shared = report.shared.len(),
            duplicates = report.skipped_duplicates.len(),
            without_key = report.skipped_without_key.len(),
            "appended share targets"
        );
        Ok(report)
    }
}
