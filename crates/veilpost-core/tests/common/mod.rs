//! Shared fixtures for the scenario tests.
//!
//! Each test binary uses a different subset.
#![allow(dead_code)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha20Rng;
use veilpost_core::{
    AddressedShare, Appender, Decryptor, DecryptorConfig, Environment, ExchangeChannel,
    MemoryChannel, MemoryStore,
};
use veilpost_crypto::{
    IV_SIZE, LocalKey, PersonKeyPair, PersonPublicKey, SymmetricKey, strategy_for, symmetric,
};
use veilpost_proto::{
    KeyShare, OwnerKeyField, PAYLOAD_MARKER, Payload, PayloadVersion, PersonIdentifier,
    PostIvIdentifier,
};

pub const NETWORK: &str = "example.net";
pub const IV: [u8; IV_SIZE] = [7; IV_SIZE];
pub const CLOCK: u64 = 1_700_000_000;

/// Deterministic environment: seeded ChaCha RNG, frozen wall clock, tokio
/// timers (pausable in tests).
#[derive(Clone)]
pub struct SimEnv {
    rng: Arc<Mutex<ChaCha20Rng>>,
    clock: u64,
}

impl SimEnv {
    pub fn with_seed(seed: u64) -> Self {
        Self { rng: Arc::new(Mutex::new(ChaCha20Rng::seed_from_u64(seed))), clock: CLOCK }
    }
}

impl Environment for SimEnv {
    fn wall_clock_secs(&self) -> u64 {
        self.clock
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn random_bytes(&self, buffer: &mut [u8]) {
        self.rng.lock().unwrap().fill_bytes(buffer);
    }
}

/// A local identity with its secrets.
#[derive(Clone)]
pub struct Account {
    pub id: PersonIdentifier,
    pub pair: PersonKeyPair,
    pub local: LocalKey,
}

impl Account {
    pub fn new(user: &str, seed: u8) -> Self {
        Self {
            id: person(user),
            pair: PersonKeyPair::from_secrets([seed; 32], [seed.wrapping_add(100); 32]),
            local: LocalKey::new([seed.wrapping_add(200); 32]),
        }
    }

    pub fn public(&self) -> PersonPublicKey {
        *self.pair.public_key()
    }
}

pub fn person(user: &str) -> PersonIdentifier {
    PersonIdentifier::new(NETWORK, user).unwrap()
}

pub fn post_id() -> PostIvIdentifier {
    PostIvIdentifier::new(NETWORK, IV.to_vec()).unwrap()
}

pub fn content_key() -> SymmetricKey {
    SymmetricKey::new([0x42; 32])
}

/// Store, channel, and environment of one simulated device.
#[derive(Clone)]
pub struct World {
    pub store: MemoryStore,
    pub channel: MemoryChannel,
    pub env: SimEnv,
}

impl World {
    pub fn new() -> Self {
        Self {
            store: MemoryStore::new(),
            channel: MemoryChannel::new(),
            env: SimEnv::with_seed(42),
        }
    }

    /// A world where `account` is set up locally.
    pub fn with_account(account: &Account) -> Self {
        let world = Self::new();
        world.store.add_identity(account.id.clone(), account.pair.clone(), account.local.clone());
        world
    }

    pub fn decryptor(&self) -> Decryptor<MemoryStore, MemoryChannel, SimEnv> {
        self.decryptor_with(DecryptorConfig::default())
    }

    pub fn decryptor_with(
        &self,
        config: DecryptorConfig,
    ) -> Decryptor<MemoryStore, MemoryChannel, SimEnv> {
        Decryptor::new(self.store.clone(), self.channel.clone(), self.env.clone(), config)
    }

    pub fn appender(&self) -> Appender<MemoryStore, MemoryChannel, SimEnv> {
        Appender::new(self.store.clone(), self.channel.clone(), self.env.clone())
    }

    /// Publish `author`'s share of `post` for `recipient` the way an
    /// author's client would.
    pub async fn publish_share(&self, post: &Post, author: &Account, recipient: &Account) {
        let version = post.payload.version();
        let share = share_for(post, author, recipient);
        let lookup =
            strategy_for(version).share_lookup(&post_id(), &recipient.id, &recipient.public());
        let shares = vec![AddressedShare { lookup, share }];
        self.channel.publish_key_shares(version, &post_id(), shares).await.unwrap();
    }
}

/// An encrypted post in structured and wire form.
pub struct Post {
    pub payload: Payload,
    pub text: String,
}

/// Seal `plaintext` as `author`. -40 is assembled by hand since it can no
/// longer be minted.
pub fn write_post(version: PayloadVersion, author: &Account, plaintext: &str) -> Post {
    let key = content_key();
    let payload = if version.is_read_only() {
        let blob = symmetric::seal(author.local.key(), &IV, key.as_bytes()).unwrap();
        let text = symmetric::seal(&key, &IV, plaintext.as_bytes()).unwrap();
        let unsigned =
            Payload::new(version, OwnerKeyField::List(vec![blob]), IV.to_vec(), text, vec![])
                .unwrap();
        let signature = author.pair.sign(&unsigned.signable_bytes());
        unsigned.with_signature(signature.to_vec())
    } else {
        strategy_for(version)
            .encrypt_as_author(plaintext.as_bytes(), &key, &IV, &author.local, &author.pair)
            .unwrap()
    };
    let text = encode_any(&payload);
    Post { payload, text }
}

/// Wire text for any version, including read-only ones.
pub fn encode_any(payload: &Payload) -> String {
    let signable = String::from_utf8(payload.signable_bytes()).unwrap();
    let signature = BASE64.encode(payload.signature().unwrap_or_default());
    format!("{PAYLOAD_MARKER}{}|{signable}|{signature}:||", payload.version().wire_tag())
}

/// The content key of `post` wrapped for `recipient`.
pub fn share_for(post: &Post, author: &Account, recipient: &Account) -> KeyShare {
    let crypto = strategy_for(post.payload.version());
    if post.payload.version().is_read_only() {
        let wrapping = crypto.derive_shared_secret(&author.pair, &recipient.public(), &[]).unwrap();
        let encrypted_key = symmetric::seal(&wrapping, &IV, content_key().as_bytes()).unwrap();
        return KeyShare { encrypted_key, salt: vec![], provenance: None };
    }
    let (key, salt) = (content_key(), vec![9; 16]);
    let public = recipient.public();
    crypto.wrap_for_recipient(&key, &IV, &author.pair, &public, salt).unwrap()
}
