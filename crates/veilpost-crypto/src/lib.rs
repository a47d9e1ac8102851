//! Veilpost cryptographic primitives
//!
//! Key material, symmetric sealing, and the per-version strategy table used
//! to open and mint encrypted posts. Pure functions with deterministic
//! outputs. Callers provide salts, ivs, and key seeds so tests can be
//! deterministic.
//!
//! # Key Hierarchy
//!
//! ```text
//! PersonKeyPair (X25519 + Ed25519)          LocalKey (never shared)
//!        │                                          │
//!        ▼                                          ▼
//! ECDH + HKDF(salt, version label)          wraps content key → owner key field
//!        │
//!        ▼
//! wraps content key → KeyShare per recipient
//!
//! content key → XChaCha20-Poly1305(iv) → encrypted text
//! ```
//!
//! # Security
//!
//! - Content keys are fresh per post; the iv is unique per post
//! - Failed authentication tag -> reject, never partial plaintext
//! - Salts make shares to the same recipient unlinkable across posts (-38/-39)
//! - Version -40 can be read but never written

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod error;
pub mod keys;
pub mod strategy;
pub mod symmetric;

pub use error::CryptoError;
pub use keys::{LocalKey, PersonKeyPair, PersonPublicKey, SYMMETRIC_KEY_SIZE, SymmetricKey};
pub use strategy::{Alpha38, Alpha39, Alpha40, Decrypted, PayloadCrypto, strategy_for};
pub use symmetric::IV_SIZE;
