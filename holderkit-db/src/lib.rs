//! Minimal transactional key-value store for on-device `HolderKit` state.
//!
//! A single [`Db`] holds every persisted record of an identity in one
//! `SQLite` table. Components address their own slice of it through a
//! [`Partition`] (a key prefix) and group writes, possibly across
//! partitions, in a [`Transaction`] that is applied atomically on commit.
//!
//! Databases are either file-backed (write-ahead log, full sync) or held
//! in memory for tests and ephemeral identities.

mod connection;
pub mod error;
mod partition;
mod schema;
mod transaction;

pub use connection::Db;
pub use error::{DbError, DbResult};
pub use partition::Partition;
pub use transaction::Transaction;

#[cfg(test)]
mod tests;
