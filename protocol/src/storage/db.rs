//! # Wallet Store
//!
//! Durable home of the voucher collection, the outbox of signed events
//! that still have to reach the log, and the cache of vouchers the market
//! has announced. The ledger talks to it through [`VoucherStore`];
//! [`SledStore`] is the on-disk engine and [`MemoryStore`] backs tests.
//!
//! ## Tree Layout
//!
//! | Tree       | Key               | Value                  |
//! |------------|-------------------|------------------------|
//! | `vouchers` | voucher id (32B)  | `bincode(Voucher)`     |
//! | `outbox`   | event id (32B)    | `bincode(Event)`       |
//! | `known`    | voucher id (32B)  | `bincode(KnownVoucher)` |
//!
//! ## Atomicity
//!
//! Every write is flushed before it returns. [`VoucherStore::replace_all`]
//! runs as one sled transaction over the `vouchers` tree: after a crash the
//! tree holds either the old collection or the new one, never a mix.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, IVec, Tree};

use crate::events::event::Event;
use crate::voucher::model::{KnownVoucher, Voucher, VoucherId};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during store operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("store is read-only")]
    ReadOnly,
}

pub type DbResult<T> = Result<T, DbError>;

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// Store Trait
// ---------------------------------------------------------------------------

/// Persistence the ledger and the wallet rely on.
pub trait VoucherStore: Send + Sync {
    /// Insert or overwrite one voucher. Durable on return.
    fn save(&self, voucher: &Voucher) -> DbResult<()>;

    fn load_all(&self) -> DbResult<Vec<Voucher>>;

    /// Swap the whole collection in one all-or-nothing step.
    fn replace_all(&self, vouchers: &[Voucher]) -> DbResult<()>;

    /// Keep a signed event until the log has acknowledged it.
    fn push_outbox(&self, event: &Event) -> DbResult<()>;

    fn outbox(&self) -> DbResult<Vec<Event>>;

    fn remove_outbox(&self, event_id: &[u8; 32]) -> DbResult<()>;

    fn put_known(&self, known: &KnownVoucher) -> DbResult<()>;

    fn get_known(&self, id: &VoucherId) -> DbResult<Option<KnownVoucher>>;

    fn list_known(&self) -> DbResult<Vec<KnownVoucher>>;
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// sled-backed [`VoucherStore`].
///
/// Cheap to clone; every clone shares the same database handle.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    vouchers: Tree,
    outbox: Tree,
    known: Tree,
}

impl SledStore {
    /// Open or create a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A store that lives in a temporary directory and disappears on drop.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    /// Open the named trees on an existing database.
    pub fn from_db(db: Db) -> DbResult<Self> {
        let vouchers = db.open_tree("vouchers")?;
        let outbox = db.open_tree("outbox")?;
        let known = db.open_tree("known")?;
        Ok(Self {
            db,
            vouchers,
            outbox,
            known,
        })
    }

    /// The underlying database, for components that keep their own trees
    /// next to the wallet's (the local event log does).
    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }

    fn read_tree<T: DeserializeOwned>(tree: &Tree) -> DbResult<Vec<T>> {
        tree.iter()
            .values()
            .map(|value| decode(&value?))
            .collect()
    }
}

impl VoucherStore for SledStore {
    fn save(&self, voucher: &Voucher) -> DbResult<()> {
        self.vouchers
            .insert(voucher.id.as_bytes(), encode(voucher)?)?;
        self.flush()
    }

    fn load_all(&self) -> DbResult<Vec<Voucher>> {
        Self::read_tree(&self.vouchers)
    }

    fn replace_all(&self, vouchers: &[Voucher]) -> DbResult<()> {
        let existing: Vec<IVec> = self.vouchers.iter().keys().collect::<Result<_, _>>()?;
        let encoded: Vec<(IVec, IVec)> = vouchers
            .iter()
            .map(|v| Ok((IVec::from(&v.id.as_bytes()[..]), IVec::from(encode(v)?))))
            .collect::<DbResult<_>>()?;

        self.vouchers
            .transaction(|tx| {
                for key in &existing {
                    tx.remove(key.clone())?;
                }
                for (key, value) in &encoded {
                    tx.insert(key.clone(), value.clone())?;
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            })
            .map_err(|e| match e {
                TransactionError::Abort(()) => {
                    DbError::Serialization("replace_all aborted".to_string())
                }
                TransactionError::Storage(e) => DbError::Sled(e),
            })?;

        self.flush()
    }

    fn push_outbox(&self, event: &Event) -> DbResult<()> {
        self.outbox.insert(event.id, encode(event)?)?;
        self.flush()
    }

    fn outbox(&self) -> DbResult<Vec<Event>> {
        let mut events: Vec<Event> = Self::read_tree(&self.outbox)?;
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    fn remove_outbox(&self, event_id: &[u8; 32]) -> DbResult<()> {
        self.outbox.remove(event_id)?;
        self.flush()
    }

    fn put_known(&self, known: &KnownVoucher) -> DbResult<()> {
        self.known
            .insert(known.descriptor.id.as_bytes(), encode(known)?)?;
        self.flush()
    }

    fn get_known(&self, id: &VoucherId) -> DbResult<Option<KnownVoucher>> {
        match self.known.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn list_known(&self) -> DbResult<Vec<KnownVoucher>> {
        Self::read_tree(&self.known)
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory [`VoucherStore`] for tests. Can be switched to read-only to
/// simulate a failing disk.
#[derive(Default)]
pub struct MemoryStore {
    vouchers: Mutex<BTreeMap<VoucherId, Voucher>>,
    outbox: Mutex<BTreeMap<[u8; 32], Event>>,
    known: Mutex<HashMap<VoucherId, KnownVoucher>>,
    read_only: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_read_only(&self, read_only: bool) {
        self.read_only.store(read_only, Ordering::SeqCst);
    }

    fn writable(&self) -> DbResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            Err(DbError::ReadOnly)
        } else {
            Ok(())
        }
    }
}

impl VoucherStore for MemoryStore {
    fn save(&self, voucher: &Voucher) -> DbResult<()> {
        self.writable()?;
        self.vouchers.lock().insert(voucher.id, voucher.clone());
        Ok(())
    }

    fn load_all(&self) -> DbResult<Vec<Voucher>> {
        Ok(self.vouchers.lock().values().cloned().collect())
    }

    fn replace_all(&self, vouchers: &[Voucher]) -> DbResult<()> {
        self.writable()?;
        let next = vouchers.iter().map(|v| (v.id, v.clone())).collect();
        *self.vouchers.lock() = next;
        Ok(())
    }

    fn push_outbox(&self, event: &Event) -> DbResult<()> {
        self.writable()?;
        self.outbox.lock().insert(event.id, event.clone());
        Ok(())
    }

    fn outbox(&self) -> DbResult<Vec<Event>> {
        let mut events: Vec<Event> = self.outbox.lock().values().cloned().collect();
        events.sort_by_key(|e| e.created_at);
        Ok(events)
    }

    fn remove_outbox(&self, event_id: &[u8; 32]) -> DbResult<()> {
        self.writable()?;
        self.outbox.lock().remove(event_id);
        Ok(())
    }

    fn put_known(&self, known: &KnownVoucher) -> DbResult<()> {
        self.writable()?;
        self.known
            .lock()
            .insert(known.descriptor.id, known.clone());
        Ok(())
    }

    fn get_known(&self, id: &VoucherId) -> DbResult<Option<KnownVoucher>> {
        Ok(self.known.lock().get(id).cloned())
    }

    fn list_known(&self) -> DbResult<Vec<KnownVoucher>> {
        Ok(self.known.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::schnorr::generate_key;
    use crate::events::event::{transfer, TransferRecord};
    use crate::voucher::issuance::{issue_voucher, IssueRequest};
    use crate::voucher::model::{VoucherMetadata, VoucherStatus};

    // -- Helpers ------------------------------------------------------------

    fn make_voucher(value: u32) -> Voucher {
        let (_, issuer) = generate_key();
        let request = IssueRequest {
            value,
            issuer,
            validity_secs: None,
            metadata: VoucherMetadata::default(),
        };
        issue_voucher(&request, 1_000).unwrap()
    }

    fn make_event(timestamp: u64) -> Event {
        let (key, id) = generate_key();
        let record = TransferRecord {
            voucher_id: id,
            from_identity: id,
            to_identity: None,
            value: 1,
            timestamp,
            transfer_count: 1,
        };
        transfer(&record, &key).unwrap()
    }

    fn sorted(mut vouchers: Vec<Voucher>) -> Vec<Voucher> {
        vouchers.sort_by_key(|v| v.id);
        vouchers
    }

    fn exercise(store: &dyn VoucherStore) {
        let a = make_voucher(10);
        let b = make_voucher(20);
        store.save(&a).unwrap();
        store.save(&b).unwrap();
        assert_eq!(sorted(store.load_all().unwrap()), sorted(vec![a.clone(), b.clone()]));

        let mut spent = a.clone();
        spent.status = VoucherStatus::Spent;
        spent.share_p2 = None;
        let c = make_voucher(30);
        store.replace_all(&[spent.clone(), c.clone()]).unwrap();
        assert_eq!(sorted(store.load_all().unwrap()), sorted(vec![spent, c]));

        let late = make_event(20);
        let early = make_event(10);
        store.push_outbox(&late).unwrap();
        store.push_outbox(&early).unwrap();
        assert_eq!(store.outbox().unwrap(), vec![early.clone(), late.clone()]);
        store.remove_outbox(&early.id).unwrap();
        assert_eq!(store.outbox().unwrap(), vec![late]);
    }

    // -- Tests --------------------------------------------------------------

    #[test]
    fn sled_store_contract() {
        let store = SledStore::open_temporary().unwrap();
        exercise(&store);
    }

    #[test]
    fn memory_store_contract() {
        let store = MemoryStore::new();
        exercise(&store);
    }

    #[test]
    fn sled_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let voucher = make_voucher(42);
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.save(&voucher).unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        let loaded = store.load_all().unwrap();
        assert_eq!(loaded, vec![voucher]);
        assert!(loaded[0].share_p2.is_some());
    }

    #[test]
    fn replace_all_with_empty_clears() {
        let store = SledStore::open_temporary().unwrap();
        store.save(&make_voucher(1)).unwrap();
        store.replace_all(&[]).unwrap();
        assert!(store.load_all().unwrap().is_empty());
    }

    #[test]
    fn known_vouchers_round_trip() {
        let store = SledStore::open_temporary().unwrap();
        let voucher = make_voucher(5);
        let known = KnownVoucher {
            descriptor: voucher.descriptor(),
            witness: voucher.share_p3.clone(),
            retired: false,
        };
        assert!(store.get_known(&voucher.id).unwrap().is_none());
        store.put_known(&known).unwrap();
        assert_eq!(store.get_known(&voucher.id).unwrap(), Some(known.clone()));
        assert_eq!(store.list_known().unwrap(), vec![known]);
    }

    #[test]
    fn read_only_memory_store_refuses_writes() {
        let store = MemoryStore::new();
        store.set_read_only(true);
        assert!(matches!(store.save(&make_voucher(1)), Err(DbError::ReadOnly)));
        assert!(store.load_all().unwrap().is_empty());
    }
}
