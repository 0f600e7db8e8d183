//! Persistent in-flight work items and the scheduler that drives them.
//!
//! A [`Ticket`] is created by a request operation (for example
//! [`Identity::request_claim`](crate::Identity::request_claim)), polled by
//! the [`Scheduler`] until its handler reports completion, and then kept as
//! history with a terminal status. Resolutions are delivered to the host as
//! [`Event`](crate::Event)s.
//!
//! Cancellation is recorded in a separate overlay of ticket ids instead of
//! on the ticket itself, so a cancel call never writes a record that an
//! in-flight handler is about to update. The scheduler reconciles the
//! overlay when it commits a cycle.

#![allow(clippy::significant_drop_tightening)]

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};

use holderkit_db::{Db, Partition, Transaction};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info};

use crate::error::{HolderError, HolderResult};

mod handlers;
mod scheduler;


#[cfg(test)]
pub(crate) use handlers::TestHandler;
pub use handlers::{ClaimPhase, HandlerContext, Progress, RequestClaimHandler, TicketHandler};
pub use scheduler::{CycleReport, Scheduler, SchedulerHandle, ShutdownSignal};

const TICKETS_PREFIX: &[u8] = b"tickets/";
const CANCEL_OVERLAY_KEY: &[u8] = b"cancelOverlay";

/// Lifecycle state of a ticket.
///
/// Only `Pending` tickets are ever scheduled or transitioned; the other
/// states are terminal.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum TicketStatus {
    /// Still being polled.
    Pending,
    /// Resolved successfully.
    Done,
    /// Resolved with an error.
    #[serde(rename = "Done with error")]
    #[strum(serialize = "Done with error")]
    DoneError,
    /// Canceled before resolving.
    Canceled,
}

impl TicketStatus {
    /// Returns `true` for every state other than `Pending`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Kind of work a ticket tracks.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum TicketType {
    /// Two-phase claim request to an issuer.
    RequestClaim,
    /// Scripted ticket used by scheduler tests.
    #[cfg(test)]
    #[serde(rename = "test ticket")]
    #[strum(serialize = "test ticket")]
    Test,
}

/// A persisted unit of asynchronous work.
#[allow(clippy::struct_field_names)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    /// Unique ticket id.
    pub id: String,
    /// Kind of work, matching the handler variant.
    #[serde(rename = "type")]
    pub ticket_type: TicketType,
    /// Lifecycle state.
    pub status: TicketStatus,
    /// Unix time (seconds) of the last poll that left the ticket pending;
    /// zero until the first such poll.
    pub last_checked: u64,
    /// Handler and its protocol sub-state.
    pub handler: TicketHandler,
}

impl Ticket {
    /// Creates a pending ticket for `handler`.
    #[must_use]
    pub fn new(id: impl Into<String>, handler: TicketHandler) -> Self {
        Self {
            id: id.into(),
            ticket_type: handler.ticket_type(),
            status: TicketStatus::Pending,
            last_checked: 0,
            handler,
        }
    }

    /// Returns `true` while the ticket is still scheduled.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.status == TicketStatus::Pending
    }
}

/// Store of tickets plus the cancellation overlay.
#[derive(Debug, Clone)]
pub struct TicketStore {
    db: Db,
    partition: Partition,
    lock: Arc<Mutex<()>>,
}

impl TicketStore {
    /// Opens the ticket namespace of `db`.
    #[must_use]
    pub fn new(db: &Db) -> Self {
        Self {
            db: db.clone(),
            partition: db.partition(TICKETS_PREFIX),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Writes an empty cancellation overlay if none exists yet.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the commit fails.
    pub fn init(&self) -> HolderResult<()> {
        let _guard = self.lock()?;
        let mut tx = self.db.begin();
        if tx.get(CANCEL_OVERLAY_KEY)?.is_none() {
            Self::stage_cancel_requests(&mut tx, &BTreeSet::new())?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Upserts `tickets` in one transaction.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::EmptyInput`] if `tickets` is empty, or a
    /// serialization or storage error.
    pub fn add(&self, tickets: &[Ticket]) -> HolderResult<()> {
        if tickets.is_empty() {
            return Err(HolderError::EmptyInput);
        }

        let _guard = self.lock()?;
        let mut tx = self.db.begin();
        for ticket in tickets {
            self.stage_update(&mut tx, ticket)?;
        }
        tx.commit()?;

        debug!(count = tickets.len(), "tickets added");
        Ok(())
    }

    /// Loads the ticket `id`.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::NotFound`] if no such ticket exists.
    pub fn get(&self, id: &str) -> HolderResult<Ticket> {
        let raw = self
            .partition
            .get(id.as_bytes())?
            .ok_or_else(|| HolderError::not_found("ticket", id))?;
        Ok(serde_json::from_slice(&raw)?)
    }

    /// Requests cancellation of ticket `id`.
    ///
    /// The request is reconciled by the next scheduler commit: a ticket
    /// that is still pending by then becomes `Canceled`, one that resolved
    /// in the meantime keeps its resolution. Canceling an already resolved
    /// ticket does nothing.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::NotFound`] if no such ticket exists.
    pub fn cancel(&self, id: &str) -> HolderResult<()> {
        let _guard = self.lock()?;
        let ticket = self.get(id)?;
        if ticket.status.is_terminal() {
            debug!(ticket_id = %id, status = %ticket.status, "ticket already resolved, cancel ignored");
            return Ok(());
        }

        let mut tx = self.db.begin();
        let mut requests = Self::cancel_requests_in(&tx)?;
        if requests.insert(id.to_string()) {
            Self::stage_cancel_requests(&mut tx, &requests)?;
            tx.commit()?;
            info!(ticket_id = %id, "ticket cancellation requested");
        }
        Ok(())
    }

    /// Returns a copy of every pending ticket.
    ///
    /// # Errors
    ///
    /// Returns a decoding or storage error.
    pub fn get_pending(&self) -> HolderResult<Vec<Ticket>> {
        let mut pending = Vec::new();
        self.iterate(|ticket| {
            if ticket.is_pending() {
                pending.push(ticket);
            }
            Ok(true)
        })?;
        Ok(pending)
    }

    /// Visits every ticket in id order. The visitor returns `Ok(false)` to
    /// stop.
    ///
    /// # Errors
    ///
    /// Returns the first visitor error, or a decoding or storage error.
    pub fn iterate<F>(&self, mut visit: F) -> HolderResult<()>
    where
        F: FnMut(Ticket) -> HolderResult<bool>,
    {
        self.partition
            .iterate(|_, value| visit(serde_json::from_slice(value)?))
    }

    /// Returns the ids with an unreconciled cancellation request.
    ///
    /// # Errors
    ///
    /// Returns a decoding or storage error.
    pub fn cancel_requests(&self) -> HolderResult<BTreeSet<String>> {
        self.db
            .get(CANCEL_OVERLAY_KEY)?
            .map_or_else(|| Ok(BTreeSet::new()), |raw| decode_overlay(&raw))
    }

    /// Takes the writer lock. Callers staging ticket writes into their own
    /// transaction must hold it until that transaction is committed.
    pub(crate) fn lock(&self) -> HolderResult<MutexGuard<'_, ()>> {
        Ok(self.lock.lock()?)
    }

    pub(crate) fn begin(&self) -> Transaction {
        self.db.begin()
    }

    pub(crate) fn get_in(&self, tx: &Transaction, id: &str) -> HolderResult<Option<Ticket>> {
        self.partition
            .get_in(tx, id.as_bytes())?
            .map(|raw| serde_json::from_slice(&raw))
            .transpose()
            .map_err(Into::into)
    }

    pub(crate) fn stage_update(&self, tx: &mut Transaction, ticket: &Ticket) -> HolderResult<()> {
        let value = serde_json::to_vec(ticket)?;
        self.partition.put(tx, ticket.id.as_bytes(), value);
        Ok(())
    }

    pub(crate) fn cancel_requests_in(tx: &Transaction) -> HolderResult<BTreeSet<String>> {
        tx.get(CANCEL_OVERLAY_KEY)?
            .map_or_else(|| Ok(BTreeSet::new()), |raw| decode_overlay(&raw))
    }

    pub(crate) fn stage_cancel_requests(
        tx: &mut Transaction,
        requests: &BTreeSet<String>,
    ) -> HolderResult<()> {
        tx.put(CANCEL_OVERLAY_KEY, serde_json::to_vec(requests)?);
        Ok(())
    }
}

fn decode_overlay(raw: &[u8]) -> HolderResult<BTreeSet<String>> {
    serde_json::from_slice(raw)
        .map_err(|e| HolderError::Integrity(format!("malformed cancellation overlay: {e}")))
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
