//! Durable storage for the veilpost key store.
//!
//! [`RedbStore`] implements [`veilpost_core::KeyStore`] on top of a single
//! Redb file, so accounts, confirmed public keys, recovered post keys and
//! recipient records survive restarts.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod redb;

pub use crate::redb::RedbStore;
