//! # TreasuryDb: Persistent Storage Engine
//!
//! The durable side of the treasury client, built on sled's embedded
//! key-value store. Everything that must survive a restart goes through
//! here: revocable transfers still inside their window, payroll batches,
//! redeem allowlist counters, and the local network's ledger snapshot.
//!
//! ## Tree Layout
//!
//! | Tree               | Key                          | Value                          |
//! |--------------------|------------------------------|--------------------------------|
//! | `revocable`        | tx id (UTF-8)                | `bincode(RevocableTransaction)`|
//! | `revocable_expiry` | `expires_at` (8B) ‖ tx id    | `bincode(String)` (tx id)      |
//! | `payroll_batches`  | batch id (UTF-8)             | `bincode(PayrollBatch)`        |
//! | `redeem_allow`     | wallet (32B)                 | `bincode(RedeemAllowEntry)`    |
//! | `metadata`         | key (UTF-8)                  | `bincode(..)`                  |
//!
//! Timestamps in keys are order-preserving big-endian encodings (see
//! [`timestamp_key`]) so sled's lexicographic order matches time order and
//! "everything that expired before T" is a plain range scan.
//!
//! The store is generic over the value type; the record types themselves
//! live with the modules that own them.

use serde::de::DeserializeOwned;
use serde::Serialize;
use sled::transaction::{TransactionError, TransactionResult};
use sled::{Db, Transactional, Tree};
use std::ops::RangeBounds;
use std::path::Path;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),

    #[error("transaction aborted: {0}")]
    Aborted(String),
}

pub type DbResult<T> = Result<T, DbError>;

// ---------------------------------------------------------------------------
// Keyspaces
// ---------------------------------------------------------------------------

/// The named trees of a [`TreasuryDb`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Keyspace {
    Revocable,
    RevocableExpiry,
    PayrollBatches,
    RedeemAllow,
    Metadata,
}

impl Keyspace {
    pub const ALL: [Keyspace; 5] = [
        Keyspace::Revocable,
        Keyspace::RevocableExpiry,
        Keyspace::PayrollBatches,
        Keyspace::RedeemAllow,
        Keyspace::Metadata,
    ];

    pub fn tree_name(&self) -> &'static str {
        match self {
            Keyspace::Revocable => "revocable",
            Keyspace::RevocableExpiry => "revocable_expiry",
            Keyspace::PayrollBatches => "payroll_batches",
            Keyspace::RedeemAllow => "redeem_allow",
            Keyspace::Metadata => "metadata",
        }
    }
}

/// Order-preserving key for a signed timestamp: flips the sign bit so
/// negative values sort before positive ones, then big-endian.
pub fn timestamp_key(ts: i64) -> [u8; 8] {
    ((ts as u64) ^ (1u64 << 63)).to_be_bytes()
}

fn encode<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// TreasuryDb
// ---------------------------------------------------------------------------

/// Persistent storage engine for the treasury client.
///
/// sled trees support concurrent reads and serialized writes, so a
/// `TreasuryDb` is shared as `Arc<TreasuryDb>` without extra locking.
/// Read-modify-write sequences that must not interleave are serialized by
/// the owning component.
#[derive(Debug, Clone)]
pub struct TreasuryDb {
    db: Db,
    revocable: Tree,
    revocable_expiry: Tree,
    payroll_batches: Tree,
    redeem_allow: Tree,
    metadata: Tree,
}

impl TreasuryDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// A database that is deleted when dropped. Used by tests and dry runs.
    pub fn open_temporary() -> DbResult<Self> {
        let config = sled::Config::new().temporary(true);
        let db = config.open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        Ok(Self {
            revocable: db.open_tree(Keyspace::Revocable.tree_name())?,
            revocable_expiry: db.open_tree(Keyspace::RevocableExpiry.tree_name())?,
            payroll_batches: db.open_tree(Keyspace::PayrollBatches.tree_name())?,
            redeem_allow: db.open_tree(Keyspace::RedeemAllow.tree_name())?,
            metadata: db.open_tree(Keyspace::Metadata.tree_name())?,
            db,
        })
    }

    fn tree(&self, keyspace: Keyspace) -> &Tree {
        match keyspace {
            Keyspace::Revocable => &self.revocable,
            Keyspace::RevocableExpiry => &self.revocable_expiry,
            Keyspace::PayrollBatches => &self.payroll_batches,
            Keyspace::RedeemAllow => &self.redeem_allow,
            Keyspace::Metadata => &self.metadata,
        }
    }

    // -- Single-key operations ----------------------------------------------

    pub fn get<T: DeserializeOwned>(&self, keyspace: Keyspace, key: &[u8]) -> DbResult<Option<T>> {
        match self.tree(keyspace).get(key)? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Like [`get`](Self::get), but a missing key is an error.
    pub fn get_required<T: DeserializeOwned>(&self, keyspace: Keyspace, key: &[u8]) -> DbResult<T> {
        self.get(keyspace, key)?.ok_or_else(|| {
            DbError::NotFound(format!(
                "{}/{}",
                keyspace.tree_name(),
                String::from_utf8_lossy(key)
            ))
        })
    }

    pub fn put<T: Serialize>(&self, keyspace: Keyspace, key: &[u8], value: &T) -> DbResult<()> {
        self.tree(keyspace).insert(key, encode(value)?)?;
        Ok(())
    }

    /// Inserts only if `key` is absent. Returns `false` if it already existed.
    pub fn insert_new<T: Serialize>(&self, keyspace: Keyspace, key: &[u8], value: &T) -> DbResult<bool> {
        let bytes = encode(value)?;
        let swapped = self
            .tree(keyspace)
            .compare_and_swap(key, None as Option<&[u8]>, Some(bytes))?;
        Ok(swapped.is_ok())
    }

    /// Removes `key`. Returns whether it was present.
    pub fn remove(&self, keyspace: Keyspace, key: &[u8]) -> DbResult<bool> {
        Ok(self.tree(keyspace).remove(key)?.is_some())
    }

    pub fn contains(&self, keyspace: Keyspace, key: &[u8]) -> DbResult<bool> {
        Ok(self.tree(keyspace).contains_key(key)?)
    }

    // -- Multi-key operations -----------------------------------------------

    /// Writes a record and its index entry in one sled transaction: both
    /// land or neither does.
    pub fn put_indexed<T: Serialize, I: Serialize>(
        &self,
        primary: (Keyspace, &[u8], &T),
        index: (Keyspace, &[u8], &I),
    ) -> DbResult<()> {
        let (primary_space, primary_key, primary_value) = primary;
        let (index_space, index_key, index_value) = index;
        let primary_bytes = encode(primary_value)?;
        let index_bytes = encode(index_value)?;

        let result: TransactionResult<()> = (self.tree(primary_space), self.tree(index_space))
            .transaction(|(p, i)| {
                p.insert(primary_key, primary_bytes.clone())?;
                i.insert(index_key, index_bytes.clone())?;
                Ok(())
            });
        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Storage(e)) => Err(DbError::Sled(e)),
            Err(TransactionError::Abort(())) => Err(DbError::Aborted(format!(
                "{} + {}",
                primary_space.tree_name(),
                index_space.tree_name()
            ))),
        }
    }

    /// Decoded key/value pairs whose keys fall in `range`, in key order.
    pub fn scan<T, K, R>(&self, keyspace: Keyspace, range: R) -> DbResult<Vec<(Vec<u8>, T)>>
    where
        T: DeserializeOwned,
        K: AsRef<[u8]>,
        R: RangeBounds<K>,
    {
        let mut out = Vec::new();
        for item in self.tree(keyspace).range(range) {
            let (key, value) = item?;
            out.push((key.to_vec(), decode(&value)?));
        }
        Ok(out)
    }

    /// Every value in `keyspace`, in key order.
    pub fn values<T: DeserializeOwned>(&self, keyspace: Keyspace) -> DbResult<Vec<T>> {
        let mut out = Vec::new();
        for item in self.tree(keyspace).iter() {
            let (_key, value) = item?;
            out.push(decode(&value)?);
        }
        Ok(out)
    }

    pub fn len(&self, keyspace: Keyspace) -> usize {
        self.tree(keyspace).len()
    }

    pub fn is_empty(&self, keyspace: Keyspace) -> bool {
        self.tree(keyspace).is_empty()
    }

    /// Force a flush of all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
