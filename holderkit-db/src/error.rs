//! Error types for the transactional key-value store.

use thiserror::Error;

/// Error returned by database operations.
#[derive(Debug, Error)]
pub enum DbError {
    /// Filesystem failure while preparing the database location.
    #[error("io error ({context}): {source}")]
    Io {
        /// What the store was doing when the failure happened.
        context: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// `SQLite` rejected a statement or a commit.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// The database was created by an incompatible schema version.
    #[error("unsupported schema version {found} in {location}")]
    UnsupportedSchema {
        /// Version recorded in the database.
        found: i64,
        /// Path of the offending database.
        location: String,
    },

    /// A caller panicked while holding the connection.
    #[error("database lock poisoned")]
    LockPoisoned,
}

impl DbError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }
}

/// Result type for database operations.
pub type DbResult<T> = Result<T, DbError>;
