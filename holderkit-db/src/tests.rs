//! Unit tests for the transactional key-value store.

use std::path::Path;

use super::*;

/// Makes every write of `key` fail until the returned connection drops the
/// triggers again.
fn fail_writes_of(path: &Path, key: &str) -> rusqlite::Connection {
    let conn = rusqlite::Connection::open(path).expect("second connection");
    conn.execute_batch(&format!(
        "CREATE TRIGGER fail_insert BEFORE INSERT ON kv_entries
         WHEN NEW.key_bytes = CAST('{key}' AS BLOB)
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;
         CREATE TRIGGER fail_update BEFORE UPDATE ON kv_entries
         WHEN NEW.key_bytes = CAST('{key}' AS BLOB)
         BEGIN SELECT RAISE(ABORT, 'disk full'); END;"
    ))
    .expect("create triggers");
    conn
}

fn restore_writes(conn: &rusqlite::Connection) {
    conn.execute_batch("DROP TRIGGER fail_insert; DROP TRIGGER fail_update;")
        .expect("drop triggers");
}

#[test]
fn test_transaction_commit() {
    let db = Db::in_memory().expect("open");
    let mut tx = db.begin();
    tx.put(b"a".to_vec(), b"1".to_vec());
    tx.put(b"b".to_vec(), b"2".to_vec());
    assert_eq!(db.get(b"a").expect("get"), None);
    tx.commit().expect("commit");
    assert_eq!(db.get(b"a").expect("get"), Some(b"1".to_vec()));
    assert_eq!(db.get(b"b").expect("get"), Some(b"2".to_vec()));
}

#[test]
fn test_transaction_rollback_on_drop() {
    let db = Db::in_memory().expect("open");
    {
        let mut tx = db.begin();
        tx.put(b"a".to_vec(), b"1".to_vec());
    }
    assert_eq!(db.get(b"a").expect("get"), None);
}

#[test]
fn test_transaction_reads_own_writes() {
    let db = Db::in_memory().expect("open");
    let mut tx = db.begin();
    tx.put(b"k".to_vec(), b"v1".to_vec());
    tx.commit().expect("commit");

    let mut tx = db.begin();
    assert_eq!(tx.get(b"k").expect("get"), Some(b"v1".to_vec()));
    tx.put(b"k".to_vec(), b"v2".to_vec());
    assert_eq!(tx.get(b"k").expect("get"), Some(b"v2".to_vec()));
    tx.delete(b"k".to_vec());
    assert_eq!(tx.get(b"k").expect("get"), None);
    assert_eq!(db.get(b"k").expect("get"), Some(b"v1".to_vec()));

    tx.commit().expect("commit");
    assert_eq!(db.get(b"k").expect("get"), None);
}

#[test]
fn test_partitions_are_isolated() {
    let db = Db::in_memory().expect("open");
    let tickets = db.partition("tickets/");
    let credentials = db.partition("credentials/");

    let mut tx = db.begin();
    tickets.put(&mut tx, b"1", b"ticket".to_vec());
    credentials.put(&mut tx, b"1", b"cred".to_vec());
    // Sorts right after the `tickets/` range.
    tx.put(b"tickets0".to_vec(), b"other".to_vec());
    tx.commit().expect("commit");

    assert_eq!(tickets.get(b"1").expect("get"), Some(b"ticket".to_vec()));
    assert_eq!(credentials.get(b"1").expect("get"), Some(b"cred".to_vec()));
    assert_eq!(db.get(b"tickets/1").expect("get"), Some(b"ticket".to_vec()));

    let mut seen = Vec::new();
    tickets
        .iterate::<DbError, _>(|key, value| {
            seen.push((key.to_vec(), value.to_vec()));
            Ok(true)
        })
        .expect("iterate");
    assert_eq!(seen, vec![(b"1".to_vec(), b"ticket".to_vec())]);
}

#[test]
fn test_iterate_is_ordered_and_stops_early() {
    let db = Db::in_memory().expect("open");
    let part = db.partition("p/");
    let mut tx = db.begin();
    for i in (0..5u8).rev() {
        part.put(&mut tx, &[i], vec![i]);
    }
    tx.commit().expect("commit");

    let mut visited = Vec::new();
    part.iterate::<DbError, _>(|key, _| {
        visited.push(key.to_vec());
        Ok(visited.len() < 2)
    })
    .expect("iterate");
    assert_eq!(visited, vec![vec![0], vec![1]]);
}

#[test]
fn test_visitor_may_write() {
    let db = Db::in_memory().expect("open");
    let part = db.partition("p/");
    let mut tx = db.begin();
    part.put(&mut tx, b"a", b"1".to_vec());
    tx.commit().expect("commit");

    part.iterate::<DbError, _>(|key, _| {
        let mut tx = part.begin();
        part.put(&mut tx, &[key, b"-seen".as_slice()].concat(), b"1".to_vec());
        tx.commit()?;
        Ok(true)
    })
    .expect("iterate");
    assert!(part.get(b"a-seen").expect("get").is_some());
}

#[test]
fn test_file_database_survives_reopen() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("store").join("identity.db");

    {
        let db = Db::open_file(&path).expect("open");
        let mut tx = db.begin();
        tx.put(b"eventlog/nextIndex".to_vec(), b"3".to_vec());
        tx.commit().expect("commit");
    }

    let db = Db::open_file(&path).expect("reopen");
    assert_eq!(
        db.get(b"eventlog/nextIndex").expect("get"),
        Some(b"3".to_vec())
    );
}

#[test]
fn test_uncommitted_writes_are_not_persisted() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("identity.db");

    {
        let db = Db::open_file(&path).expect("open");
        let mut tx = db.begin();
        tx.put(b"kept".to_vec(), b"1".to_vec());
        tx.commit().expect("commit");
        let mut tx = db.begin();
        tx.put(b"lost".to_vec(), b"1".to_vec());
        drop(tx);
    }

    let db = Db::open_file(&path).expect("reopen");
    assert!(db.get(b"kept").expect("get").is_some());
    assert!(db.get(b"lost").expect("get").is_none());
}

#[test]
fn test_failed_commit_keeps_previous_state() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("identity.db");
    let db = Db::open_file(&path).expect("open");

    let mut tx = db.begin();
    tx.put(b"a".to_vec(), b"1".to_vec());
    tx.commit().expect("commit");

    let faults = fail_writes_of(&path, "b");
    let mut tx = db.begin();
    tx.put(b"a".to_vec(), b"2".to_vec());
    tx.put(b"b".to_vec(), b"2".to_vec());
    assert!(matches!(tx.commit(), Err(DbError::Sqlite(_))));

    assert_eq!(db.get(b"a").expect("get"), Some(b"1".to_vec()));
    assert_eq!(db.get(b"b").expect("get"), None);

    restore_writes(&faults);
    let mut tx = db.begin();
    tx.put(b"b".to_vec(), b"3".to_vec());
    tx.commit().expect("commit");
    assert_eq!(db.get(b"b").expect("get"), Some(b"3".to_vec()));
}

#[cfg(unix)]
#[test]
fn test_small_commit_does_not_rewrite_the_file() {
    use std::os::unix::fs::MetadataExt;

    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("identity.db");
    let db = Db::open_file(&path).expect("open");

    let log = db.partition("eventlog/");
    let mut tx = db.begin();
    for i in 0..2_000u32 {
        log.put(&mut tx, format!("{i:020}").as_bytes(), vec![0xab; 512]);
    }
    tx.commit().expect("commit");
    let inode = std::fs::metadata(&path).expect("metadata").ino();

    for next in 1..=20u32 {
        let mut tx = db.begin();
        log.put(&mut tx, b"nextIndex", next.to_string().into_bytes());
        tx.commit().expect("commit");
    }

    assert_eq!(std::fs::metadata(&path).expect("metadata").ino(), inode);
    assert_eq!(log.get(b"nextIndex").expect("get"), Some(b"20".to_vec()));
    assert!(log.get(b"00000000000000001999").expect("get").is_some());
}

#[test]
fn test_non_database_file_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("identity.db");
    std::fs::write(&path, vec![0x5a; 4096]).expect("write");

    assert!(matches!(Db::open_file(&path), Err(DbError::Sqlite(_))));
}

#[test]
fn test_unknown_schema_version_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("identity.db");
    drop(Db::open_file(&path).expect("open"));

    let conn = rusqlite::Connection::open(&path).expect("connection");
    conn.execute("UPDATE kv_meta SET schema_version = 99", [])
        .expect("update");
    drop(conn);

    assert!(matches!(
        Db::open_file(&path),
        Err(DbError::UnsupportedSchema { found: 99, .. })
    ));
}
