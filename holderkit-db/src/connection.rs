//! Database handle.

#![allow(clippy::significant_drop_tightening)]

use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};

use crate::error::{DbError, DbResult};
use crate::partition::Partition;
use crate::schema;
use crate::transaction::{Transaction, WriteSet};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SELECT_ONE: &str = "SELECT value_bytes FROM kv_entries WHERE key_bytes = ?1";
const SCAN_BOUNDED: &str = "SELECT key_bytes, value_bytes
     FROM kv_entries
     WHERE key_bytes >= ?1 AND key_bytes < ?2
     ORDER BY key_bytes";
const SCAN_UNBOUNDED: &str = "SELECT key_bytes, value_bytes
     FROM kv_entries
     WHERE key_bytes >= ?1
     ORDER BY key_bytes";
const UPSERT: &str = "INSERT INTO kv_entries (key_bytes, value_bytes) VALUES (?1, ?2)
     ON CONFLICT (key_bytes) DO UPDATE SET value_bytes = excluded.value_bytes";
const DELETE: &str = "DELETE FROM kv_entries WHERE key_bytes = ?1";

type Entry = (Vec<u8>, Vec<u8>);

/// Handle to one transactional key-value store backed by `SQLite`.
///
/// Cloning is cheap; every clone shares the same connection. All calls
/// block on `SQLite` I/O, so async callers should run them off the reactor
/// (for example with `tokio::task::spawn_blocking`).
#[derive(Clone)]
pub struct Db {
    conn: Arc<Mutex<Connection>>,
}

impl fmt::Debug for Db {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Db").finish_non_exhaustive()
    }
}

impl Db {
    /// Opens (or creates) the database file at `path`. Missing parent
    /// directories are created.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be opened as a database or was
    /// written by an incompatible schema version.
    pub fn open_file<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                DbError::io(
                    format!("failed to create directory '{}'", parent.display()),
                    e,
                )
            })?;
        }
        let conn = Connection::open(path)?;
        Self::prepare(conn, &path.display().to_string())
    }

    /// Creates an empty database that lives only in memory.
    ///
    /// # Errors
    ///
    /// Returns an error if `SQLite` cannot allocate the database.
    pub fn in_memory() -> DbResult<Self> {
        Self::prepare(Connection::open_in_memory()?, ":memory:")
    }

    fn prepare(conn: Connection, location: &str) -> DbResult<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = FULL;",
        )?;
        schema::ensure_schema(&conn, location)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::LockPoisoned)
    }

    /// Reads the committed value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn get(&self, key: &[u8]) -> DbResult<Option<Vec<u8>>> {
        let value = self
            .conn()?
            .prepare_cached(SELECT_ONE)?
            .query_row(params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    /// Visits every committed entry whose key starts with `prefix`, in key
    /// order. The visitor returns `Ok(false)` to stop early.
    ///
    /// Entries are read out before the first call, so the visitor may
    /// freely open transactions on this database.
    ///
    /// # Errors
    ///
    /// Returns the first error produced by the visitor, or a query error.
    pub fn scan_prefix<E, F>(&self, prefix: &[u8], mut visit: F) -> Result<(), E>
    where
        E: From<DbError>,
        F: FnMut(&[u8], &[u8]) -> Result<bool, E>,
    {
        let entries = self.load_prefix(prefix)?;
        for (key, value) in &entries {
            if !visit(key, value)? {
                break;
            }
        }
        Ok(())
    }

    fn load_prefix(&self, prefix: &[u8]) -> DbResult<Vec<Entry>> {
        let conn = self.conn()?;
        let upper = prefix_upper_bound(prefix);
        let sql = if upper.is_some() {
            SCAN_BOUNDED
        } else {
            SCAN_UNBOUNDED
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = match &upper {
            Some(upper) => stmt.query(params![prefix, upper])?,
            None => stmt.query(params![prefix])?,
        };
        let entries = rows
            .mapped(|row| Ok((row.get(0)?, row.get(1)?)))
            .collect::<Result<Vec<Entry>, _>>()?;
        Ok(entries)
    }

    /// Starts a new transaction.
    #[must_use]
    pub fn begin(&self) -> Transaction {
        Transaction::new(self.clone())
    }

    /// Returns a view of the keys under `prefix`.
    #[must_use]
    pub fn partition(&self, prefix: impl Into<Vec<u8>>) -> Partition {
        Partition::new(self.clone(), prefix.into())
    }

    /// Applies a write-set in one `SQLite` transaction: either every write
    /// becomes visible and durable, or none does.
    pub(crate) fn apply(&self, writes: &WriteSet) -> DbResult<()> {
        let mut conn = self.conn()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        {
            let mut upsert = tx.prepare_cached(UPSERT)?;
            let mut delete = tx.prepare_cached(DELETE)?;
            for (key, value) in writes {
                match value {
                    Some(value) => upsert.execute(params![key, value])?,
                    None => delete.execute(params![key])?,
                };
            }
        }
        tx.commit()?;
        Ok(())
    }
}

/// Smallest key greater than every key starting with `prefix`, or `None`
/// when no such key exists.
fn prefix_upper_bound(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut upper = prefix.to_vec();
    while let Some(last) = upper.pop() {
        if last < u8::MAX {
            upper.push(last + 1);
            return Some(upper);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::prefix_upper_bound;

    #[test]
    fn test_prefix_upper_bound() {
        assert_eq!(prefix_upper_bound(b"tickets/"), Some(b"tickets0".to_vec()));
        assert_eq!(prefix_upper_bound(&[0x01, 0xff]), Some(vec![0x02]));
        assert_eq!(prefix_upper_bound(&[0xff, 0xff]), None);
        assert_eq!(prefix_upper_bound(b""), None);
    }
}
