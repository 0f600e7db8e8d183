//! Key-value table schema management.

use rusqlite::{Connection, OptionalExtension};

use crate::error::{DbError, DbResult};

const SCHEMA_VERSION: i64 = 1;

pub(super) fn ensure_schema(conn: &Connection, location: &str) -> DbResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS kv_meta (
            schema_version  INTEGER NOT NULL,
            created_at      INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS kv_entries (
            key_bytes       BLOB    NOT NULL,
            value_bytes     BLOB    NOT NULL,
            PRIMARY KEY (key_bytes)
        ) WITHOUT ROWID;",
    )?;

    let existing: Option<i64> = conn
        .query_row("SELECT schema_version FROM kv_meta LIMIT 1;", [], |row| {
            row.get(0)
        })
        .optional()?;

    match existing {
        Some(version) if version == SCHEMA_VERSION => Ok(()),
        Some(found) => Err(DbError::UnsupportedSchema {
            found,
            location: location.to_string(),
        }),
        None => {
            conn.execute(
                "INSERT INTO kv_meta (schema_version, created_at)
                 VALUES (?1, strftime('%s','now'))",
                [SCHEMA_VERSION],
            )?;
            Ok(())
        }
    }
}
