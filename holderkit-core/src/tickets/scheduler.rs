#![allow(clippy::significant_drop_tightening)]

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::handlers::{HandlerContext, Progress};
use super::{unix_now, Ticket, TicketStatus, TicketStore};
use crate::error::{HolderError, HolderResult};
use crate::event_log::{Event, EventLog, Sender};

/// Cooperative stop flag shared by the scheduler loop and its workers.
///
/// Triggering never aborts work in flight; it keeps new cycles and new
/// external calls from starting.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownSignal {
    /// Creates an untriggered signal.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Triggers the signal. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    /// Returns `true` once the signal was triggered.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once the signal is triggered.
    pub async fn triggered(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

/// Counts of one scheduler cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Tickets whose handler was polled. Tickets skipped because the
    /// scheduler is stopping are not counted.
    pub checked: usize,
    /// Tickets resolved `Done`.
    pub resolved: usize,
    /// Tickets resolved `Done with error`.
    pub failed: usize,
    /// Tickets moved to `Canceled`.
    pub canceled: usize,
}

/// Periodic driver of pending tickets.
///
/// Each cycle polls every pending ticket concurrently, waits for all of
/// them, and commits ticket updates, new events and cancellation
/// reconciliation in a single transaction. A failed commit leaves the
/// previous state in place and the same work is redone next cycle.
pub struct Scheduler {
    tickets: TicketStore,
    events: EventLog,
    ctx: Arc<HandlerContext>,
    sender: Option<Arc<dyn Sender>>,
    period: Duration,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("period", &self.period)
            .field("push", &self.sender.is_some())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Creates a scheduler over stores sharing one database.
    ///
    /// With a `sender`, every committed event is also pushed to it.
    #[must_use]
    pub fn new(
        tickets: TicketStore,
        events: EventLog,
        ctx: HandlerContext,
        sender: Option<Arc<dyn Sender>>,
        period: Duration,
    ) -> Self {
        Self {
            tickets,
            events,
            ctx: Arc::new(ctx),
            sender,
            period,
        }
    }

    /// Runs exactly one cycle. The commit runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns a storage or decoding error if pending tickets cannot be
    /// loaded or the cycle cannot be committed. Handler errors never
    /// surface here; they resolve their ticket instead.
    pub async fn run_cycle(&self) -> HolderResult<CycleReport> {
        let requested = self.tickets.cancel_requests()?;
        let (to_cancel, to_poll): (Vec<Ticket>, Vec<Ticket>) = self
            .tickets
            .get_pending()?
            .into_iter()
            .partition(|ticket| requested.contains(&ticket.id));
        if !to_poll.is_empty() || !to_cancel.is_empty() {
            debug!(
                pending = to_poll.len(),
                cancel_requested = to_cancel.len(),
                "checking pending tickets"
            );
        }

        let workers: Vec<(Ticket, JoinHandle<(Ticket, Progress)>)> = to_poll
            .into_iter()
            .map(|ticket| {
                let fallback = ticket.clone();
                let ctx = Arc::clone(&self.ctx);
                let handle = tokio::spawn(async move {
                    let mut ticket = ticket;
                    let progress = ticket.handler.is_done(&ctx).await;
                    (ticket, progress)
                });
                (fallback, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(workers.len());
        for (fallback, handle) in workers {
            match handle.await {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => {
                    error!(ticket_id = %fallback.id, error = %e, "ticket worker failed");
                    let error = HolderError::Internal(format!("ticket worker failed: {e}"));
                    outcomes.push((fallback, Progress::Resolved(Err(error))));
                }
            }
        }

        let mut report = CycleReport::default();
        let now = unix_now();
        let mut updates = Vec::with_capacity(outcomes.len());
        let mut events = Vec::new();
        for (mut ticket, progress) in outcomes {
            match progress {
                Progress::Skipped => continue,
                Progress::Pending => ticket.last_checked = now,
                Progress::Resolved(Ok(data)) => {
                    ticket.status = TicketStatus::Done;
                    report.resolved += 1;
                    info!(ticket_id = %ticket.id, ticket_type = %ticket.ticket_type, "ticket done");
                    events.push(resolution_event(&ticket, data, None));
                }
                Progress::Resolved(Err(e)) => {
                    ticket.status = TicketStatus::DoneError;
                    report.failed += 1;
                    warn!(ticket_id = %ticket.id, ticket_type = %ticket.ticket_type, error = %e, "ticket done with error");
                    events.push(resolution_event(&ticket, String::new(), Some(e.to_string())));
                }
            }
            report.checked += 1;
            updates.push(ticket);
        }

        let tickets = self.tickets.clone();
        let log = self.events.clone();
        let (canceled, events) = tokio::task::spawn_blocking(move || {
            commit_cycle(&tickets, &log, updates, &events).map(|canceled| (canceled, events))
        })
        .await
        .map_err(|e| HolderError::Internal(format!("cycle commit task failed: {e}")))??;
        report.canceled = canceled;

        if let Some(sender) = &self.sender {
            for event in events {
                sender.send(event);
            }
        }
        Ok(report)
    }

    /// Starts the periodic loop on the current tokio runtime.
    #[must_use]
    pub fn spawn(self) -> SchedulerHandle {
        let shutdown = self.ctx.shutdown().clone();
        let task = tokio::spawn(self.run());
        SchedulerHandle { shutdown, task }
    }

    async fn run(self) {
        let shutdown = self.ctx.shutdown().clone();
        info!(period = ?self.period, "scheduler started");

        while !shutdown.is_triggered() {
            match self.run_cycle().await {
                Ok(report) if report != CycleReport::default() => {
                    debug!(
                        checked = report.checked,
                        resolved = report.resolved,
                        failed = report.failed,
                        canceled = report.canceled,
                        "scheduler cycle committed"
                    );
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "scheduler cycle failed, retrying next period"),
            }

            tokio::select! {
                () = tokio::time::sleep(self.period) => {}
                () = shutdown.triggered() => break,
            }
        }

        info!("scheduler stopped");
    }
}

/// Handle to a spawned [`Scheduler`] loop.
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: ShutdownSignal,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop signal of the loop.
    #[must_use]
    pub const fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }

    /// Signals the loop to stop and waits for it. A cycle already in
    /// flight runs to completion first.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::Internal`] if the loop task panicked.
    pub async fn stop(self) -> HolderResult<()> {
        self.shutdown.trigger();
        self.task
            .await
            .map_err(|e| HolderError::Internal(format!("scheduler task failed: {e}")))
    }
}

/// Persists one cycle and drains the cancellation overlay. Returns the
/// number of tickets canceled.
fn commit_cycle(
    tickets: &TicketStore,
    log: &EventLog,
    updates: Vec<Ticket>,
    events: &[Event],
) -> HolderResult<usize> {
    let _tickets = tickets.lock()?;
    let _events = log.lock_append()?;
    let mut tx = tickets.begin();

    let mut requests = TicketStore::cancel_requests_in(&tx)?;
    let drain_overlay = !requests.is_empty();
    let mut canceled = 0;

    for mut ticket in updates {
        if requests.remove(&ticket.id) && ticket.is_pending() {
            ticket.status = TicketStatus::Canceled;
            canceled += 1;
            info!(ticket_id = %ticket.id, "ticket canceled");
        }
        tickets.stage_update(&mut tx, &ticket)?;
    }

    // Requests for tickets that were not polled this cycle.
    for id in requests {
        match tickets.get_in(&tx, &id)? {
            Some(mut ticket) if ticket.is_pending() => {
                ticket.status = TicketStatus::Canceled;
                tickets.stage_update(&mut tx, &ticket)?;
                canceled += 1;
                info!(ticket_id = %id, "ticket canceled");
            }
            Some(_) => debug!(ticket_id = %id, "ticket already resolved, cancel request dropped"),
            None => warn!(ticket_id = %id, "cancel request for unknown ticket dropped"),
        }
    }
    if drain_overlay {
        TicketStore::stage_cancel_requests(&mut tx, &BTreeSet::new())?;
    }

    log.stage_append(&mut tx, events)?;
    tx.commit()?;
    Ok(canceled)
}

fn resolution_event(ticket: &Ticket, data: String, error: Option<String>) -> Event {
    Event {
        ticket_type: ticket.ticket_type,
        ticket_id: ticket.id.clone(),
        data,
        error,
    }
}
