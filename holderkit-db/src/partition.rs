//! Prefixed namespaces over a shared database.

use crate::connection::Db;
use crate::error::{DbError, DbResult};
use crate::transaction::Transaction;

/// A namespace of keys sharing a common prefix.
///
/// Partitions never own a transaction: writes go into a caller-supplied
/// [`Transaction`] so that several partitions can be updated in a single
/// commit.
#[derive(Debug, Clone)]
pub struct Partition {
    db: Db,
    prefix: Vec<u8>,
}

impl Partition {
    pub(crate) const fn new(db: Db, prefix: Vec<u8>) -> Self {
        Self { db, prefix }
    }

    /// Returns the full key for `key` within this partition.
    #[must_use]
    pub fn key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }

    /// Returns the partition prefix.
    #[must_use]
    pub fn prefix(&self) -> &[u8] {
        &self.prefix
    }

    /// Returns the underlying database.
    #[must_use]
    pub const fn db(&self) -> &Db {
        &self.db
    }

    /// Starts a transaction on the underlying database.
    #[must_use]
    pub fn begin(&self) -> Transaction {
        self.db.begin()
    }

    /// Reads the committed value of `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the committed state cannot be queried.
    pub fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.db.get(&self.key(key))
    }

    /// Reads `key` through `tx`, seeing its buffered writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the committed state cannot be queried.
    pub fn get_in(&self, tx: &Transaction, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        tx.get(&self.key(key))
    }

    /// Buffers a write of `value` under `key` into `tx`.
    pub fn put(&self, tx: &mut Transaction, key: &[u8], value: impl Into<Vec<u8>>) {
        tx.put(self.key(key), value);
    }

    /// Buffers a deletion of `key` into `tx`.
    pub fn delete(&self, tx: &mut Transaction, key: &[u8]) {
        tx.delete(self.key(key));
    }

    /// Visits every committed entry of the partition in key order, with the
    /// prefix stripped from the key. The visitor returns `Ok(false)` to stop.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the visitor, or a query error.
    pub fn iterate<E, F>(&self, mut visit: F) -> Result<(), E>
    where
        E: From<DbError>,
        F: FnMut(&[u8], &[u8]) -> Result<bool, E>,
    {
        let prefix_len = self.prefix.len();
        self.db
            .scan_prefix(&self.prefix, |key, value| visit(&key[prefix_len..], value))
    }
}
