//! Per-version cryptographic strategies.
//!
//! Each payload version fixes how content keys are wrapped for the author,
//! how they are wrapped for recipients, and where recipients look their
//! shares up. [`strategy_for`] maps a version to its [`PayloadCrypto`]
//! implementation; supporting a new version means adding one more
//! implementation and one more arm there.
//!
//! # Scheme
//!
//! ```text
//! content     = XChaCha20-Poly1305(content_key, iv, plaintext)
//! owner blob  = XChaCha20-Poly1305(local_key, iv, content_key)
//! share       = XChaCha20-Poly1305(HKDF(X25519(author, recipient), salt, label), iv, content_key)
//! signature   = Ed25519(author, owner_field | iv | content)
//! ```
//!
//! The decrypt operations are shared by all versions. Version -40 is
//! read-only: it can still be opened but refuses to mint payloads or shares.

use sha2::{Digest, Sha256};
use veilpost_proto::{
    KeyShare, OwnerKeyField, Payload, PayloadVersion, PersonIdentifier, PostIvIdentifier,
    ShareLookup,
};

use crate::{
    error::CryptoError,
    keys::{LocalKey, PersonKeyPair, PersonPublicKey, SymmetricKey},
    symmetric,
};

/// Hex characters kept from the recipient key hash in hashed lookups.
pub const KEY_HASH_LEN: usize = 16;

const ALPHA40_LABEL: &[u8] = b"veilpost alpha-40 key share";
const ALPHA39_LABEL: &[u8] = b"veilpost alpha-39 key share";
const ALPHA38_LABEL: &[u8] = b"veilpost alpha-38 key share";

/// Plaintext together with the content key that opened it.
pub type Decrypted = (Vec<u8>, SymmetricKey);

/// Cryptographic operations for one payload version.
pub trait PayloadCrypto: Send + Sync {
    /// Version this strategy handles.
    fn version(&self) -> PayloadVersion;

    /// Derive the key that wraps content keys between two people.
    ///
    /// # Errors
    ///
    /// - `NonContributory` for a low-order peer key
    fn derive_shared_secret(
        &self,
        mine: &PersonKeyPair,
        theirs: &PersonPublicKey,
        salt: &[u8],
    ) -> Result<SymmetricKey, CryptoError>;

    /// Seal a new payload as its author.
    ///
    /// # Errors
    ///
    /// - `DeprecatedVersion` for read-only versions
    /// - `InvalidIvLength` if `iv` is not 24 bytes
    fn encrypt_as_author(
        &self,
        plaintext: &[u8],
        content_key: &SymmetricKey,
        iv: &[u8],
        local_key: &LocalKey,
        author: &PersonKeyPair,
    ) -> Result<Payload, CryptoError>;

    /// Wrap `content_key` for one recipient.
    ///
    /// # Errors
    ///
    /// - `DeprecatedVersion` for read-only versions
    /// - `NonContributory` for a low-order recipient key
    fn wrap_for_recipient(
        &self,
        content_key: &SymmetricKey,
        iv: &[u8],
        author: &PersonKeyPair,
        recipient_public: &PersonPublicKey,
        salt: Vec<u8>,
    ) -> Result<KeyShare, CryptoError>;

    /// Where on the exchange channel `recipient`'s shares for `post` live.
    fn share_lookup(
        &self,
        post: &PostIvIdentifier,
        recipient: &PersonIdentifier,
        recipient_public: &PersonPublicKey,
    ) -> ShareLookup;

    /// Recover the content key from the owner key field.
    ///
    /// Every blob is tried in order; the first that opens under `local_key`
    /// wins.
    ///
    /// # Errors
    ///
    /// - `KeyUnwrapFailed` if no blob opens
    fn extract_content_key(
        &self,
        owner_key: &OwnerKeyField,
        iv: &[u8],
        local_key: &LocalKey,
    ) -> Result<SymmetricKey, CryptoError> {
        owner_key
            .blobs()
            .find_map(|blob| {
                let bytes = symmetric::open(local_key.key(), iv, blob).ok()?;
                SymmetricKey::from_slice(&bytes).ok()
            })
            .ok_or(CryptoError::KeyUnwrapFailed)
    }

    /// Open a payload as its author.
    ///
    /// # Errors
    ///
    /// - `KeyUnwrapFailed` if the owner key field does not open
    /// - `DecryptionFailed` if the content does not open
    fn decrypt_as_author(
        &self,
        payload: &Payload,
        local_key: &LocalKey,
    ) -> Result<Decrypted, CryptoError> {
        let key = self.extract_content_key(payload.owner_key(), payload.iv(), local_key)?;
        let plaintext =
            self.decrypt_with_symmetric_key(&key, payload.iv(), payload.encrypted_text())?;
        Ok((plaintext, key))
    }

    /// Open a payload with a key share addressed to `mine`.
    ///
    /// # Errors
    ///
    /// - `KeyUnwrapFailed` if the share is not for this key pair
    /// - `DecryptionFailed` if the share opened but the content did not
    fn decrypt_as_recipient(
        &self,
        payload: &Payload,
        share: &KeyShare,
        author: &PersonPublicKey,
        mine: &PersonKeyPair,
    ) -> Result<Decrypted, CryptoError> {
        let wrapping = self.derive_shared_secret(mine, author, &share.salt)?;
        let bytes = symmetric::open(&wrapping, payload.iv(), &share.encrypted_key).map_err(
            |e| match e {
                CryptoError::DecryptionFailed { .. } => CryptoError::KeyUnwrapFailed,
                other => other,
            },
        )?;
        let key = SymmetricKey::from_slice(&bytes).map_err(|_| CryptoError::KeyUnwrapFailed)?;
        let plaintext =
            self.decrypt_with_symmetric_key(&key, payload.iv(), payload.encrypted_text())?;
        Ok((plaintext, key))
    }

    /// Open content with an already known content key.
    ///
    /// # Errors
    ///
    /// - `DecryptionFailed` if authentication fails
    fn decrypt_with_symmetric_key(
        &self,
        key: &SymmetricKey,
        iv: &[u8],
        encrypted_text: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        symmetric::open(key, iv, encrypted_text)
    }

    /// Check the author's signature over a payload's signable bytes.
    fn verify_signature(
        &self,
        signable: &[u8],
        signature: &[u8],
        author: &PersonPublicKey,
    ) -> bool {
        author.verify(signable, signature)
    }
}

/// Look up the strategy for `version`.
pub fn strategy_for(version: PayloadVersion) -> &'static dyn PayloadCrypto {
    match version {
        PayloadVersion::Alpha40 => &Alpha40,
        PayloadVersion::Alpha39 => &Alpha39,
        PayloadVersion::Alpha38 => &Alpha38,
    }
}

/// Version -40: unsalted shares looked up by recipient user id. Read-only.
#[derive(Debug, Clone, Copy, Default)]
pub struct Alpha40;

/// Version -39: salted shares behind hashed lookups, owner key list.
#[derive(Debug, Clone, Copy, Default)]
pub struct Alpha39;

/// Version -38: salted shares behind hashed lookups, single owner key.
#[derive(Debug, Clone, Copy, Default)]
pub struct Alpha38;

impl PayloadCrypto for Alpha40 {
    fn version(&self) -> PayloadVersion {
        PayloadVersion::Alpha40
    }

    fn derive_shared_secret(
        &self,
        mine: &PersonKeyPair,
        theirs: &PersonPublicKey,
        _salt: &[u8],
    ) -> Result<SymmetricKey, CryptoError> {
        agree(mine, theirs, &[], ALPHA40_LABEL)
    }

    fn encrypt_as_author(
        &self,
        _plaintext: &[u8],
        _content_key: &SymmetricKey,
        _iv: &[u8],
        _local_key: &LocalKey,
        _author: &PersonKeyPair,
    ) -> Result<Payload, CryptoError> {
        Err(CryptoError::DeprecatedVersion(PayloadVersion::Alpha40))
    }

    fn wrap_for_recipient(
        &self,
        _content_key: &SymmetricKey,
        _iv: &[u8],
        _author: &PersonKeyPair,
        _recipient_public: &PersonPublicKey,
        _salt: Vec<u8>,
    ) -> Result<KeyShare, CryptoError> {
        Err(CryptoError::DeprecatedVersion(PayloadVersion::Alpha40))
    }

    fn share_lookup(
        &self,
        post: &PostIvIdentifier,
        recipient: &PersonIdentifier,
        _recipient_public: &PersonPublicKey,
    ) -> ShareLookup {
        ShareLookup::ByRecipient { post: post.clone(), user_id: recipient.user_id().to_string() }
    }
}

impl PayloadCrypto for Alpha39 {
    fn version(&self) -> PayloadVersion {
        PayloadVersion::Alpha39
    }

    fn derive_shared_secret(
        &self,
        mine: &PersonKeyPair,
        theirs: &PersonPublicKey,
        salt: &[u8],
    ) -> Result<SymmetricKey, CryptoError> {
        agree(mine, theirs, salt, ALPHA39_LABEL)
    }

    fn encrypt_as_author(
        &self,
        plaintext: &[u8],
        content_key: &SymmetricKey,
        iv: &[u8],
        local_key: &LocalKey,
        author: &PersonKeyPair,
    ) -> Result<Payload, CryptoError> {
        let blob = symmetric::seal(local_key.key(), iv, content_key.as_bytes())?;
        let owner_key = OwnerKeyField::List(vec![blob]);
        seal_payload(self.version(), owner_key, plaintext, content_key, iv, author)
    }

    fn wrap_for_recipient(
        &self,
        content_key: &SymmetricKey,
        iv: &[u8],
        author: &PersonKeyPair,
        recipient_public: &PersonPublicKey,
        salt: Vec<u8>,
    ) -> Result<KeyShare, CryptoError> {
        let wrapping = self.derive_shared_secret(author, recipient_public, &salt)?;
        wrap_share(&wrapping, content_key, iv, salt)
    }

    fn share_lookup(
        &self,
        post: &PostIvIdentifier,
        _recipient: &PersonIdentifier,
        recipient_public: &PersonPublicKey,
    ) -> ShareLookup {
        hashed_lookup(self.version(), post, recipient_public)
    }
}

impl PayloadCrypto for Alpha38 {
    fn version(&self) -> PayloadVersion {
        PayloadVersion::Alpha38
    }

    fn derive_shared_secret(
        &self,
        mine: &PersonKeyPair,
        theirs: &PersonPublicKey,
        salt: &[u8],
    ) -> Result<SymmetricKey, CryptoError> {
        agree(mine, theirs, salt, ALPHA38_LABEL)
    }

    fn encrypt_as_author(
        &self,
        plaintext: &[u8],
        content_key: &SymmetricKey,
        iv: &[u8],
        local_key: &LocalKey,
        author: &PersonKeyPair,
    ) -> Result<Payload, CryptoError> {
        let blob = symmetric::seal(local_key.key(), iv, content_key.as_bytes())?;
        let owner_key = OwnerKeyField::Single(blob);
        seal_payload(self.version(), owner_key, plaintext, content_key, iv, author)
    }

    fn wrap_for_recipient(
        &self,
        content_key: &SymmetricKey,
        iv: &[u8],
        author: &PersonKeyPair,
        recipient_public: &PersonPublicKey,
        salt: Vec<u8>,
    ) -> Result<KeyShare, CryptoError> {
        let wrapping = self.derive_shared_secret(author, recipient_public, &salt)?;
        wrap_share(&wrapping, content_key, iv, salt)
    }

    fn share_lookup(
        &self,
        post: &PostIvIdentifier,
        _recipient: &PersonIdentifier,
        recipient_public: &PersonPublicKey,
    ) -> ShareLookup {
        hashed_lookup(self.version(), post, recipient_public)
    }
}

fn agree(
    mine: &PersonKeyPair,
    theirs: &PersonPublicKey,
    salt: &[u8],
    label: &[u8],
) -> Result<SymmetricKey, CryptoError> {
    let shared = mine.diffie_hellman(theirs)?;
    Ok(symmetric::derive_key(&shared, salt, label))
}

fn seal_payload(
    version: PayloadVersion,
    owner_key: OwnerKeyField,
    plaintext: &[u8],
    content_key: &SymmetricKey,
    iv: &[u8],
    author: &PersonKeyPair,
) -> Result<Payload, CryptoError> {
    let encrypted_text = symmetric::seal(content_key, iv, plaintext)?;
    let unsigned = Payload::new(version, owner_key, iv.to_vec(), encrypted_text, Vec::new())?;
    let signature = author.sign(&unsigned.signable_bytes());
    Ok(unsigned.with_signature(signature.to_vec()))
}

fn wrap_share(
    wrapping: &SymmetricKey,
    content_key: &SymmetricKey,
    iv: &[u8],
    salt: Vec<u8>,
) -> Result<KeyShare, CryptoError> {
    let encrypted_key = symmetric::seal(wrapping, iv, content_key.as_bytes())?;
    Ok(KeyShare { encrypted_key, salt, provenance: None })
}

fn hashed_lookup(
    version: PayloadVersion,
    post: &PostIvIdentifier,
    recipient_public: &PersonPublicKey,
) -> ShareLookup {
    let network = post.network().as_bytes();
    let mut hasher = Sha256::new();
    hasher.update(version.number().to_be_bytes());
    hasher.update((network.len() as u64).to_be_bytes());
    hasher.update(network);
    hasher.update(post.iv());
    let post_hash = hex::encode(hasher.finalize());

    let mut key_hash = recipient_public.fingerprint();
    key_hash.truncate(KEY_HASH_LEN);

    ShareLookup::ByKeyHash { version, post_hash, key_hash }
}
