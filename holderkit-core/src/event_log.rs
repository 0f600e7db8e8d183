//! Durable, ordered log of ticket outcomes.
//!
//! Events are appended at sequential indices and consumed through a
//! persisted cursor, so every event is handed out exactly once and in
//! order, across restarts.

#![allow(clippy::significant_drop_tightening)]

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use holderkit_db::{Db, Partition, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{HolderError, HolderResult};
use crate::tickets::TicketType;

const EVENTLOG_PREFIX: &[u8] = b"eventlog/";
const LENGTH_KEY: &[u8] = b"length";
const NEXT_INDEX_KEY: &[u8] = b"nextIndex";

/// Outcome of a resolved ticket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Type of the ticket that produced the event.
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    /// Id of the ticket that produced the event.
    pub ticket_id: String,
    /// Handler payload, typically JSON.
    pub data: String,
    /// Handler error, if the ticket resolved with one.
    pub error: Option<String>,
}

impl Event {
    /// Returns `true` if the ticket resolved with an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Push delivery target for events.
///
/// `send` is called right after the event is persisted. Delivery is
/// fire-and-forget: nothing is replayed if the sender drops the event.
pub trait Sender: Send + Sync {
    /// Receives one event.
    fn send(&self, event: Event);
}

/// Append-only event sequence with a consumer cursor.
#[derive(Debug, Clone)]
pub struct EventLog {
    partition: Partition,
    append_lock: Arc<Mutex<()>>,
    cursor_lock: Arc<Mutex<()>>,
    poll_interval: Duration,
}

impl EventLog {
    /// Opens the event log namespace of `db`.
    #[must_use]
    pub fn new(db: &Db, poll_interval: Duration) -> Self {
        Self {
            partition: db.partition(EVENTLOG_PREFIX),
            append_lock: Arc::new(Mutex::new(())),
            cursor_lock: Arc::new(Mutex::new(())),
            poll_interval,
        }
    }

    /// Writes the empty log and a zero cursor if the log was never
    /// initialized. Existing state is left untouched.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the commit fails.
    pub fn init(&self) -> HolderResult<()> {
        let _append = self.lock_append()?;
        let _cursor = self.cursor_lock.lock()?;
        let mut tx = self.partition.begin();
        if self.partition.get_in(&tx, LENGTH_KEY)?.is_none() {
            self.partition.put(&mut tx, LENGTH_KEY, encode_counter(0));
        }
        if self.partition.get_in(&tx, NEXT_INDEX_KEY)?.is_none() {
            self.partition.put(&mut tx, NEXT_INDEX_KEY, encode_counter(0));
        }
        tx.commit()?;
        Ok(())
    }

    /// Appends one event at the next index.
    ///
    /// # Errors
    ///
    /// Returns a serialization or storage error.
    pub fn append(&self, event: &Event) -> HolderResult<()> {
        let _guard = self.lock_append()?;
        let mut tx = self.partition.begin();
        self.stage_append(&mut tx, std::slice::from_ref(event))?;
        tx.commit()?;
        Ok(())
    }

    /// Takes the append lock. Callers staging appends into their own
    /// transaction must hold it until that transaction is committed.
    pub(crate) fn lock_append(&self) -> HolderResult<MutexGuard<'_, ()>> {
        Ok(self.append_lock.lock()?)
    }

    /// Buffers `events` into `tx` at consecutive indices.
    pub(crate) fn stage_append(&self, tx: &mut Transaction, events: &[Event]) -> HolderResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut length = self.read_counter(Some(&*tx), LENGTH_KEY)?;
        for event in events {
            let value = serde_json::to_vec(event)?;
            self.partition.put(tx, &index_key(length), value);
            trace!(index = length, ticket_id = %event.ticket_id, "event staged");
            length += 1;
        }
        self.partition.put(tx, LENGTH_KEY, encode_counter(length));
        Ok(())
    }

    /// Number of events ever appended.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the counter is unreadable.
    pub fn len(&self) -> HolderResult<u64> {
        self.read_counter(None, LENGTH_KEY)
    }

    /// Returns `true` if no event was ever appended.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the counter is unreadable.
    pub fn is_empty(&self) -> HolderResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Index of the next event `get_next_event` will return.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the cursor is unreadable.
    pub fn cursor(&self) -> HolderResult<u64> {
        self.read_counter(None, NEXT_INDEX_KEY)
    }

    /// Reads the event at `index` without moving the cursor.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::NotFound`] if no event exists at `index`.
    pub fn get_event(&self, index: u64) -> HolderResult<Event> {
        let raw = self
            .partition
            .get(&index_key(index))?
            .ok_or_else(|| HolderError::not_found("event", index.to_string()))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Returns the event at the cursor and advances the cursor, or `None`
    /// if every appended event was already consumed.
    ///
    /// # Errors
    ///
    /// Returns a storage error; the cursor is only advanced once the new
    /// value is committed.
    pub fn try_next_event(&self) -> HolderResult<Option<Event>> {
        let _guard = self.cursor_lock.lock()?;
        let next = self.cursor()?;
        if next >= self.len()? {
            return Ok(None);
        }

        let event = self.get_event(next)?;
        let mut tx = self.partition.begin();
        self.partition
            .put(&mut tx, NEXT_INDEX_KEY, encode_counter(next + 1));
        tx.commit()?;

        debug!(index = next, ticket_id = %event.ticket_id, "event delivered");
        Ok(Some(event))
    }

    /// Waits for the next unconsumed event, polling the log every
    /// configured interval. Each poll runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns a storage error as soon as one occurs.
    pub async fn get_next_event(&self) -> HolderResult<Event> {
        loop {
            let log = self.clone();
            let next = tokio::task::spawn_blocking(move || log.try_next_event())
                .await
                .map_err(|e| HolderError::Internal(format!("event poll task failed: {e}")))??;
            if let Some(event) = next {
                return Ok(event);
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn read_counter(&self, tx: Option<&Transaction>, key: &[u8]) -> HolderResult<u64> {
        let raw = match tx {
            Some(tx) => self.partition.get_in(tx, key)?,
            None => self.partition.get(key)?,
        };
        raw.map_or(Ok(0), |raw| decode_counter(&raw))
    }
}

fn index_key(index: u64) -> Vec<u8> {
    format!("{index:020}").into_bytes()
}

fn encode_counter(value: u64) -> Vec<u8> {
    value.to_string().into_bytes()
}

fn decode_counter(raw: &[u8]) -> HolderResult<u64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| HolderError::Integrity("malformed event log counter".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(ticket_id: &str, error: Option<&str>) -> Event {
        Event {
            ticket_type: TicketType::RequestClaim,
            ticket_id: ticket_id.to_string(),
            data: "{}".to_string(),
            error: error.map(ToString::to_string),
        }
    }

    fn log(db: &Db) -> EventLog {
        let log = EventLog::new(db, Duration::from_millis(10));
        log.init().unwrap();
        log
    }

    #[test]
    fn test_events_are_delivered_in_order_once() {
        let log = log(&Db::in_memory().unwrap());
        for id in ["a", "b", "c"] {
            log.append(&event(id, None)).unwrap();
        }

        let delivered: Vec<String> = std::iter::from_fn(|| log.try_next_event().unwrap())
            .map(|e| e.ticket_id)
            .collect();
        assert_eq!(delivered, vec!["a", "b", "c"]);
        assert_eq!(log.cursor().unwrap(), 3);
        assert_eq!(log.len().unwrap(), 3);
        assert!(log.try_next_event().unwrap().is_none());
    }

    #[test]
    fn test_error_is_preserved() {
        let log = log(&Db::in_memory().unwrap());
        log.append(&event("x", Some("boom"))).unwrap();

        let delivered = log.try_next_event().unwrap().unwrap();
        assert!(delivered.is_error());
        assert_eq!(delivered.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_init_keeps_existing_state() {
        let db = Db::in_memory().unwrap();
        let first = log(&db);
        first.append(&event("a", None)).unwrap();
        first.append(&event("b", None)).unwrap();
        first.try_next_event().unwrap();

        let reopened = log(&db);
        assert_eq!(reopened.len().unwrap(), 2);
        assert_eq!(reopened.cursor().unwrap(), 1);
        assert_eq!(reopened.try_next_event().unwrap().unwrap().ticket_id, "b");
    }

    #[test]
    fn test_staged_appends_are_invisible_until_commit() {
        let db = Db::in_memory().unwrap();
        let log = log(&db);
        {
            let _guard = log.lock_append().unwrap();
            let mut tx = db.begin();
            log.stage_append(&mut tx, &[event("a", None), event("b", None)])
                .unwrap();
            assert_eq!(log.len().unwrap(), 0);
        }
        assert!(log.is_empty().unwrap());
        assert!(matches!(
            log.get_event(0),
            Err(HolderError::NotFound { kind: "event", .. })
        ));
    }

    #[test]
    fn test_persisted_event_shape() {
        let json = serde_json::to_value(event("t1", Some("bad"))).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "RequestClaim",
                "ticketId": "t1",
                "data": "{}",
                "error": "bad",
            })
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_get_next_event_waits_for_append() {
        let log = log(&Db::in_memory().unwrap());
        log.append(&event("first", None)).unwrap();
        assert_eq!(log.get_next_event().await.unwrap().ticket_id, "first");

        let waiter = {
            let log = log.clone();
            tokio::spawn(async move { log.get_next_event().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        log.append(&event("second", None)).unwrap();
        let delivered = tokio::time::timeout(Duration::from_secs(2), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(delivered.ticket_id, "second");
        assert_eq!(log.cursor().unwrap(), 2);
    }
}
