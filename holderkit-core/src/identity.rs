use std::fmt;
use std::sync::{Arc, Mutex};

use holderkit_db::Db;
use tracing::info;
use uuid::Uuid;

use crate::claim_store::ClaimStore;
use crate::config::{EventDelivery, IdentityConfig};
use crate::engine::HolderEngine;
use crate::error::{HolderError, HolderResult};
use crate::event_log::{Event, EventLog};
use crate::http_request::Request;
use crate::issuer::IssuerClient;
use crate::tickets::{
    HandlerContext, RequestClaimHandler, Scheduler, SchedulerHandle, ShutdownSignal, Ticket,
    TicketHandler, TicketStore,
};
use crate::verifier::VerifierClient;

/// A holder identity: requests credentials from issuers, keeps what they
/// issue, and presents it to verifiers.
///
/// Requests run asynchronously as tickets driven by a background
/// scheduler; their outcomes arrive as [`Event`]s, either pulled with
/// [`get_next_event`](Self::get_next_event) or pushed to the
/// [`Sender`](crate::Sender) given in [`EventDelivery::Push`].
///
/// State lives in the given [`Db`], so an identity reopened on the same
/// store resumes every pending request where it left off.
pub struct Identity {
    engine: Arc<dyn HolderEngine>,
    config: IdentityConfig,
    delivery: EventDelivery,
    tickets: TicketStore,
    events: EventLog,
    claims: ClaimStore,
    request: Request,
    scheduler: Mutex<Option<SchedulerHandle>>,
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("identifier", &self.engine.identifier())
            .field("config", &self.config)
            .field("delivery", &self.delivery)
            .finish_non_exhaustive()
    }
}

impl Identity {
    /// Opens the identity stored in `db` and starts its scheduler.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the store cannot be initialized.
    pub fn open(
        db: &Db,
        engine: Arc<dyn HolderEngine>,
        config: IdentityConfig,
        delivery: EventDelivery,
    ) -> HolderResult<Self> {
        let tickets = TicketStore::new(db);
        tickets.init()?;
        let events = EventLog::new(db, config.event_poll_interval);
        events.init()?;
        let claims = ClaimStore::new(db);
        let request = Request::new(config.http_timeout, config.http_max_retries);

        let ctx = HandlerContext::new(claims.clone(), request.clone(), ShutdownSignal::new());
        let scheduler = Scheduler::new(
            tickets.clone(),
            events.clone(),
            ctx,
            delivery.sender(),
            config.check_pending_period,
        )
        .spawn();

        info!(identifier = %engine.identifier(), "identity opened");
        Ok(Self {
            engine,
            config,
            delivery,
            tickets,
            events,
            claims,
            request,
            scheduler: Mutex::new(Some(scheduler)),
        })
    }

    /// Asks the issuer at `issuer_url` to issue a claim for `value`.
    ///
    /// Returns the pending ticket tracking the request; its outcome is
    /// delivered as an event carrying the stored credential key.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::InvalidInput`] if `value` is too long,
    /// [`HolderError::Network`] if the issuer cannot be reached, or a
    /// storage error.
    pub async fn request_claim(&self, issuer_url: &str, value: &str) -> HolderResult<Ticket> {
        if value.len() > self.config.max_claim_value_len {
            return Err(HolderError::InvalidInput(format!(
                "claim value longer than {} bytes",
                self.config.max_claim_value_len
            )));
        }

        let issuer = IssuerClient::new(issuer_url, self.request.clone());
        let request_id = issuer
            .request_claim(value, &self.engine.identifier())
            .await?;

        let ticket = Ticket::new(
            Uuid::new_v4().to_string(),
            TicketHandler::RequestClaim(RequestClaimHandler::new(request_id, issuer_url)),
        );
        self.tickets.add(std::slice::from_ref(&ticket))?;

        info!(ticket_id = %ticket.id, request_id, "claim requested");
        Ok(ticket)
    }

    /// Proves to the verifier at `verifier_url` that the credential stored
    /// under `credential_key` is valid.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::NotFound`] for an unknown key,
    /// [`HolderError::Engine`] if no proof can be built, or
    /// [`HolderError::VerifierRejected`] if the verifier refuses it.
    pub async fn prove_claim(&self, verifier_url: &str, credential_key: &str) -> HolderResult<()> {
        let credential = self.claims.get_by_id(credential_key)?;
        let validity = self.engine.build_credential_validity(&credential)?;
        VerifierClient::new(verifier_url, self.request.clone())
            .verify(&validity)
            .await
    }

    /// Requests cancellation of a pending ticket.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::NotFound`] if no such ticket exists.
    pub fn cancel_ticket(&self, ticket_id: &str) -> HolderResult<()> {
        self.tickets.cancel(ticket_id)
    }

    /// Waits for the next undelivered event.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::PullDeliveryDisabled`] when events are pushed
    /// to a sender, or a storage error.
    pub async fn get_next_event(&self) -> HolderResult<Event> {
        self.ensure_pull()?;
        self.events.get_next_event().await
    }

    /// Returns the next undelivered event, if any, without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::PullDeliveryDisabled`] when events are pushed
    /// to a sender, or a storage error.
    pub fn try_next_event(&self) -> HolderResult<Option<Event>> {
        self.ensure_pull()?;
        self.events.try_next_event()
    }

    /// The identity reference sent to issuers.
    #[must_use]
    pub fn identifier(&self) -> String {
        self.engine.identifier()
    }

    /// Ticket store of this identity.
    #[must_use]
    pub const fn tickets(&self) -> &TicketStore {
        &self.tickets
    }

    /// Credentials received by this identity.
    #[must_use]
    pub const fn claims(&self) -> &ClaimStore {
        &self.claims
    }

    /// Event log of this identity.
    #[must_use]
    pub const fn events(&self) -> &EventLog {
        &self.events
    }

    /// Runtime configuration.
    #[must_use]
    pub const fn config(&self) -> &IdentityConfig {
        &self.config
    }

    /// Stops the scheduler and waits for a cycle in flight to finish.
    /// Later calls return immediately.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::Internal`] if the scheduler task panicked.
    pub async fn stop(&self) -> HolderResult<()> {
        let handle = self.scheduler.lock()?.take();
        match handle {
            Some(handle) => {
                handle.stop().await?;
                info!(identifier = %self.engine.identifier(), "identity stopped");
                Ok(())
            }
            None => Ok(()),
        }
    }

    const fn ensure_pull(&self) -> HolderResult<()> {
        match self.delivery {
            EventDelivery::Pull => Ok(()),
            EventDelivery::Push(_) => Err(HolderError::PullDeliveryDisabled),
        }
    }
}

impl Drop for Identity {
    fn drop(&mut self) {
        if let Ok(scheduler) = self.scheduler.lock() {
            if let Some(handle) = scheduler.as_ref() {
                handle.shutdown().trigger();
            }
        }
    }
}
