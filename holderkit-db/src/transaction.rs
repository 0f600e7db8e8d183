//! Buffered write transactions.

use std::collections::BTreeMap;

use crate::connection::Db;
use crate::error::DbResult;

/// Pending writes keyed by full key; `None` marks a deletion.
pub(super) type WriteSet = BTreeMap<Vec<u8>, Option<Vec<u8>>>;

/// An open database transaction.
///
/// Writes are buffered until [`commit`](Self::commit), which applies them
/// inside one `SQLite` transaction, and are discarded if the transaction is
/// dropped uncommitted. Reads through the transaction see its own buffered
/// writes.
#[derive(Debug)]
pub struct Transaction {
    db: Db,
    writes: WriteSet,
}

impl Transaction {
    pub(crate) const fn new(db: Db) -> Self {
        Self {
            db,
            writes: WriteSet::new(),
        }
    }

    /// Reads `key`, preferring this transaction's buffered writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the committed state cannot be queried.
    pub fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        self.writes
            .get(key)
            .map_or_else(|| self.db.get(key), |buffered| Ok(buffered.clone()))
    }

    /// Buffers a write of `value` under `key`.
    pub fn put(&mut self, key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) {
        self.writes.insert(key.into(), Some(value.into()));
    }

    /// Buffers a deletion of `key`.
    pub fn delete(&mut self, key: impl Into<Vec<u8>>) {
        self.writes.insert(key.into(), None);
    }

    /// Returns `true` if nothing has been written yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Commits every buffered write atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` rejects any write or the commit; the
    /// previously committed state is left untouched.
    pub fn commit(self) -> DbResult<()> {
        if self.writes.is_empty() {
            return Ok(());
        }
        self.db.apply(&self.writes)
    }
}
