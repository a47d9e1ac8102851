//! Veilpost decryption protocol.
//!
//! Given an encoded post, its claimed author, and the local user, recover
//! the plaintext while the author's public key or the post's key share may
//! still be on their way. Also re-shares a post with new recipients.
//!
//! # Architecture
//!
//! The protocol logic is generic over its collaborators, which are supplied
//! at construction:
//!
//! - [`KeyStore`]: local keys, the post key cache, recipient records
//! - [`ExchangeChannel`]: published public keys and key shares
//! - [`Environment`]: wall clock, randomness, timers
//!
//! [`MemoryStore`] and [`MemoryChannel`] back tests and simulations.
//!
//! # Components
//!
//! - [`Decryptor`]: the decryption state machine
//! - [`KeyDiscovery`]: bounded search for an author's public key
//! - [`Appender`]: mints key shares for new recipients
//! - [`Subscription`] and [`first_wins`]: cancellable event streams

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod append;
pub mod channel;
pub mod decrypt;
pub mod discovery;
pub mod env;
pub mod error;
pub mod event;
pub mod store;
pub mod subscription;

pub use append::{AppendReport, AppendRequest, Appender, ContentKey};
pub use channel::{AddressedShare, ExchangeChannel, MemoryChannel};
pub use decrypt::{DecryptionEvent, DecryptionRequest, DecryptionTask, Decryptor, DecryptorConfig};
pub use discovery::{DEFAULT_MAX_ATTEMPTS, Discovery, DiscoveryConfig, KeyDiscovery};
pub use env::{Environment, SystemEnv};
pub use error::{AppendError, ChannelError, DecryptError, StoreError};
pub use event::{
    DecryptionResult, FailureReason, IgnoreProgress, Progress, ProgressObserver, Provenance,
};
pub use store::{KeyStore, MemoryStore, PersonRecord};
pub use subscription::{Race, Subscription, first_wins};
