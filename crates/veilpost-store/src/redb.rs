//! Redb-backed durable key store.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety. Every
//! table is keyed by the display form of an identifier and holds a
//! CBOR-encoded value. Person-change subscriptions are process-local and do
//! not survive a reopen.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    path::Path,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use serde::{Serialize, de::DeserializeOwned};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use veilpost_core::{KeyStore, PersonRecord, StoreError, Subscription};
use veilpost_crypto::{LocalKey, PersonKeyPair, PersonPublicKey, SymmetricKey};
use veilpost_proto::{PersonIdentifier, PostIvIdentifier, RecipientDetail, RecipientReason};

type Table = TableDefinition<'static, &'static [u8], &'static [u8]>;

/// Table: key_pairs
/// Key: person identifier
/// Value: CBOR-encoded PersonKeyPair
const KEY_PAIRS: Table = TableDefinition::new("key_pairs");

/// Table: local_keys
/// Key: person identifier
/// Value: CBOR-encoded LocalKey
const LOCAL_KEYS: Table = TableDefinition::new("local_keys");

/// Table: public_keys
/// Key: person identifier
/// Value: CBOR-encoded PersonPublicKey
const PUBLIC_KEYS: Table = TableDefinition::new("public_keys");

/// Table: directory
/// Key: person identifier
/// Value: CBOR-encoded PersonPublicKey from a scraped profile
const DIRECTORY: Table = TableDefinition::new("directory");

/// Table: post_keys
/// Key: post identifier
/// Value: CBOR-encoded (SymmetricKey, author PersonIdentifier)
const POST_KEYS: Table = TableDefinition::new("post_keys");

/// Table: recipients
/// Key: post identifier
/// Value: CBOR-encoded map of PersonIdentifier to RecipientDetail
const RECIPIENTS: Table = TableDefinition::new("recipients");

const TABLES: [Table; 6] = [KEY_PAIRS, LOCAL_KEYS, PUBLIC_KEYS, DIRECTORY, POST_KEYS, RECIPIENTS];

/// Durable key store backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
/// Secrets are stored as-is; protecting the file is up to the host.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
    watchers: Arc<Mutex<Watchers>>,
}

#[derive(Default)]
struct Watchers {
    by_person: HashMap<PersonIdentifier, Vec<(u64, mpsc::UnboundedSender<PersonRecord>)>>,
    next_id: u64,
}

impl RedbStore {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates any missing tables.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the database cannot be opened or created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let txn = db.begin_write().map_err(io)?;
        for table in TABLES {
            let _ = txn.open_table(table).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(Self { db: Arc::new(db), watchers: Arc::new(Mutex::new(Watchers::default())) })
    }

    /// Register a local account: key pair, local key, and own public key.
    pub fn add_identity(
        &self,
        who: &PersonIdentifier,
        key_pair: &PersonKeyPair,
        local: &LocalKey,
    ) -> Result<(), StoreError> {
        let key = id_key(who);
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut pairs = txn.open_table(KEY_PAIRS).map_err(io)?;
            pairs.insert(key.as_slice(), encode(key_pair)?.as_slice()).map_err(io)?;

            let mut locals = txn.open_table(LOCAL_KEYS).map_err(io)?;
            locals.insert(key.as_slice(), encode(local)?.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        self.put_public_key(who, key_pair.public_key())
    }

    /// Record a confirmed public key and notify person-change subscribers.
    pub fn put_public_key(
        &self,
        who: &PersonIdentifier,
        key: &PersonPublicKey,
    ) -> Result<(), StoreError> {
        self.write(PUBLIC_KEYS, &id_key(who), key)?;
        self.notify(&PersonRecord::with_key(who.clone(), *key));
        Ok(())
    }

    /// Record a profile that `resolve_identity` can confirm later.
    pub fn publish_profile(
        &self,
        who: &PersonIdentifier,
        key: &PersonPublicKey,
    ) -> Result<(), StoreError> {
        self.write(DIRECTORY, &id_key(who), key)
    }

    fn read<T: DeserializeOwned>(&self, table: Table, key: &[u8]) -> Result<Option<T>, StoreError> {
        let txn = self.db.begin_read().map_err(io)?;
        let table = txn.open_table(table).map_err(io)?;

        match table.get(key).map_err(io)? {
            Some(value) => decode(value.value()).map(Some),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, table: Table, key: &[u8], value: &T) -> Result<(), StoreError> {
        let bytes = encode(value)?;

        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(table).map_err(io)?;
            table.insert(key, bytes.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(())
    }

    #[allow(clippy::expect_used)]
    fn notify(&self, record: &PersonRecord) {
        let mut watchers = self.watchers.lock().expect("Mutex poisoned");
        if let Some(list) = watchers.by_person.get_mut(&record.identifier) {
            list.retain(|(_, tx)| tx.send(record.clone()).is_ok());
        }
    }
}

#[async_trait]
impl KeyStore for RedbStore {
    async fn private_key_of(
        &self,
        who: &PersonIdentifier,
    ) -> Result<Option<PersonKeyPair>, StoreError> {
        self.read(KEY_PAIRS, &id_key(who))
    }

    async fn local_key_of(&self, who: &PersonIdentifier) -> Result<Option<LocalKey>, StoreError> {
        self.read(LOCAL_KEYS, &id_key(who))
    }

    async fn public_key_of(
        &self,
        who: &PersonIdentifier,
    ) -> Result<Option<PersonPublicKey>, StoreError> {
        self.read(PUBLIC_KEYS, &id_key(who))
    }

    async fn cached_post_key(
        &self,
        post: &PostIvIdentifier,
    ) -> Result<Option<SymmetricKey>, StoreError> {
        let entry: Option<(SymmetricKey, PersonIdentifier)> = self.read(POST_KEYS, &id_key(post))?;
        Ok(entry.map(|(key, _)| key))
    }

    async fn put_cached_post_key(
        &self,
        post: &PostIvIdentifier,
        key: &SymmetricKey,
        author: &PersonIdentifier,
    ) -> Result<(), StoreError> {
        let row = id_key(post);
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(POST_KEYS).map_err(io)?;

            let existing: Option<(SymmetricKey, PersonIdentifier)> =
                match table.get(row.as_slice()).map_err(io)? {
                    Some(value) => Some(decode(value.value())?),
                    None => None,
                };

            match existing {
                Some((stored, _)) if stored == *key => {},
                Some(_) => warn!(%post, "refusing to replace cached post key with a different key"),
                None => {
                    let bytes = encode(&(key, author))?;
                    table.insert(row.as_slice(), bytes.as_slice()).map_err(io)?;
                },
            }
        }
        txn.commit().map_err(io)?;

        Ok(())
    }

    async fn resolve_identity(
        &self,
        who: &PersonIdentifier,
    ) -> Result<Option<PersonRecord>, StoreError> {
        let Some(key) = self.read::<PersonPublicKey>(DIRECTORY, &id_key(who))? else {
            debug!(%who, "no profile in directory");
            return Ok(None);
        };

        self.put_public_key(who, &key)?;
        Ok(Some(PersonRecord::with_key(who.clone(), key)))
    }

    #[allow(clippy::expect_used)]
    fn subscribe_person_changes(&self, who: &PersonIdentifier) -> Subscription<PersonRecord> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut watchers = self.watchers.lock().expect("Mutex poisoned");
            let id = watchers.next_id;
            watchers.next_id += 1;
            watchers.by_person.entry(who.clone()).or_default().push((id, tx));
            id
        };

        let watchers = Arc::clone(&self.watchers);
        let who = who.clone();
        Subscription::new(rx, move || {
            let mut watchers = watchers.lock().expect("Mutex poisoned");
            if let Some(list) = watchers.by_person.get_mut(&who) {
                list.retain(|(watcher, _)| *watcher != id);
                if list.is_empty() {
                    watchers.by_person.remove(&who);
                }
            }
        })
    }

    async fn post_recipients(
        &self,
        post: &PostIvIdentifier,
    ) -> Result<BTreeMap<PersonIdentifier, RecipientDetail>, StoreError> {
        Ok(self.read(RECIPIENTS, &id_key(post))?.unwrap_or_default())
    }

    async fn append_post_recipients(
        &self,
        post: &PostIvIdentifier,
        recipients: BTreeMap<PersonIdentifier, RecipientReason>,
    ) -> Result<(), StoreError> {
        let row = id_key(post);
        let txn = self.db.begin_write().map_err(io)?;
        {
            let mut table = txn.open_table(RECIPIENTS).map_err(io)?;

            let mut recorded: BTreeMap<PersonIdentifier, RecipientDetail> =
                match table.get(row.as_slice()).map_err(io)? {
                    Some(value) => decode(value.value())?,
                    None => BTreeMap::new(),
                };
            for (who, reason) in recipients {
                recorded.entry(who).or_default().reasons.push(reason);
            }

            let bytes = encode(&recorded)?;
            table.insert(row.as_slice(), bytes.as_slice()).map_err(io)?;
        }
        txn.commit().map_err(io)?;

        Ok(())
    }
}

fn io(e: impl fmt::Display) -> StoreError {
    StoreError::Io(e.to_string())
}

fn id_key(id: &impl fmt::Display) -> Vec<u8> {
    id.to_string().into_bytes()
}

fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, StoreError> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)
        .map_err(|e| StoreError::Serialization(e.to_string()))?;
    Ok(bytes)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    ciborium::from_reader(bytes).map_err(|e| StoreError::Serialization(e.to_string()))
}
