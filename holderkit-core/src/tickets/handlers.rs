use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::scheduler::ShutdownSignal;
use super::TicketType;
use crate::claim_store::ClaimStore;
use crate::credential::{Claim, CredentialExistence};
use crate::error::{HolderError, HolderResult};
use crate::http_request::Request;
use crate::issuer::{ClaimStatus, CredentialStatus, IssuerClient};

/// Outcome of one handler poll.
#[derive(Debug)]
pub enum Progress {
    /// Not resolved yet; poll again next cycle.
    Pending,
    /// Not polled because the scheduler is stopping.
    Skipped,
    /// Resolved with an event payload or an error.
    Resolved(HolderResult<String>),
}

/// Capabilities a handler may use while polling.
///
/// Handed to every poll explicitly, so tickets never hold a reference back
/// to the identity that owns them.
#[derive(Debug, Clone)]
pub struct HandlerContext {
    claims: ClaimStore,
    request: Request,
    shutdown: ShutdownSignal,
}

impl HandlerContext {
    /// Bundles the handler capabilities.
    #[must_use]
    pub const fn new(claims: ClaimStore, request: Request, shutdown: ShutdownSignal) -> Self {
        Self {
            claims,
            request,
            shutdown,
        }
    }

    /// Store receiving issued credentials.
    #[must_use]
    pub const fn claims(&self) -> &ClaimStore {
        &self.claims
    }

    /// Shared HTTP client.
    #[must_use]
    pub const fn request(&self) -> &Request {
        &self.request
    }

    /// Stop signal of the owning scheduler.
    #[must_use]
    pub const fn shutdown(&self) -> &ShutdownSignal {
        &self.shutdown
    }
}

/// Per-type ticket logic, persisted with its sub-state under a `type` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TicketHandler {
    /// Two-phase claim request.
    RequestClaim(RequestClaimHandler),
    /// Scripted handler used by scheduler tests.
    #[cfg(test)]
    #[serde(rename = "test ticket")]
    Test(TestHandler),
}

impl TicketHandler {
    /// Ticket type this handler belongs to.
    #[must_use]
    pub const fn ticket_type(&self) -> TicketType {
        match self {
            Self::RequestClaim(_) => TicketType::RequestClaim,
            #[cfg(test)]
            Self::Test(_) => TicketType::Test,
        }
    }

    /// Polls the external state once, possibly advancing the handler's
    /// sub-state.
    ///
    /// Once the stop signal is observed, handlers that have not started
    /// their external call report [`Progress::Skipped`] without calling out.
    pub async fn is_done(&mut self, ctx: &HandlerContext) -> Progress {
        if ctx.shutdown.is_triggered() {
            return Progress::Skipped;
        }
        match self {
            Self::RequestClaim(handler) => handler.is_done(ctx).await,
            #[cfg(test)]
            Self::Test(handler) => handler.is_done().await,
        }
    }
}

/// Where a claim request is in the issuer protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum ClaimPhase {
    /// Waiting for the issuer to approve or reject the request.
    AwaitingApproval,
    /// Approved; waiting for the credential of `claim`.
    AwaitingCredential {
        /// Claim approved by the issuer.
        claim: Claim,
    },
}

/// Claim request tracked by issuer request id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestClaimHandler {
    /// Issuer-side request id.
    pub request_id: u64,
    /// Issuer base URL.
    pub base_url: String,
    /// Protocol sub-state.
    pub phase: ClaimPhase,
}

impl RequestClaimHandler {
    /// A handler for a freshly submitted request.
    #[must_use]
    pub fn new(request_id: u64, base_url: impl Into<String>) -> Self {
        Self {
            request_id,
            base_url: base_url.into(),
            phase: ClaimPhase::AwaitingApproval,
        }
    }

    async fn is_done(&mut self, ctx: &HandlerContext) -> Progress {
        let issuer = IssuerClient::new(&self.base_url, ctx.request.clone());
        match self.phase.clone() {
            ClaimPhase::AwaitingApproval => self.poll_approval(&issuer).await,
            ClaimPhase::AwaitingCredential { claim } => {
                self.poll_credential(&issuer, &ctx.claims, &claim).await
            }
        }
    }

    async fn poll_approval(&mut self, issuer: &IssuerClient) -> Progress {
        match issuer.claim_status(self.request_id).await {
            Ok(ClaimStatus::Pending) => Progress::Pending,
            Ok(ClaimStatus::Rejected) => {
                info!(request_id = self.request_id, "claim request rejected");
                Progress::Resolved(Ok(String::new()))
            }
            Ok(ClaimStatus::Approved(claim)) => {
                info!(request_id = self.request_id, "claim request approved");
                self.phase = ClaimPhase::AwaitingCredential { claim };
                Progress::Pending
            }
            Err(e) => Progress::Resolved(Err(e)),
        }
    }

    async fn poll_credential(
        &self,
        issuer: &IssuerClient,
        claims: &ClaimStore,
        claim: &Claim,
    ) -> Progress {
        match issuer.claim_credential(claim).await {
            Ok(CredentialStatus::NotYet) => {
                debug!(request_id = self.request_id, "credential not published yet");
                Progress::Pending
            }
            Ok(CredentialStatus::Ready(credential)) => {
                info!(request_id = self.request_id, "credential received");
                Progress::Resolved(store_credential(claims, claim, &credential))
            }
            Err(e) => Progress::Resolved(Err(e)),
        }
    }
}

/// Stores a delivered credential after checking it carries the approved
/// claim, returning the event payload with the store key.
fn store_credential(
    claims: &ClaimStore,
    claim: &Claim,
    credential: &CredentialExistence,
) -> HolderResult<String> {
    if credential.claim != *claim {
        warn!(approved = ?claim, received = ?credential.claim, "credential does not match approved claim");
        return Err(HolderError::Integrity(
            "received credential does not match the approved claim".to_string(),
        ));
    }

    let key = match claims.add_credential_existence(credential) {
        Ok(key) => key,
        // Stored by an earlier cycle whose commit did not land.
        Err(HolderError::AlreadyExists { key }) => {
            debug!(key = %key, "credential already stored");
            key
        }
        Err(e) => return Err(e),
    };
    Ok(serde_json::json!({ "key": key }).to_string())
}

/// Scripted handler for scheduler tests.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestHandler {
    /// Resolve on the first poll.
    pub say_done: bool,
    /// Error to resolve with; empty resolves successfully.
    pub err: String,
    /// Delay before answering a poll.
    #[serde(default)]
    pub delay_ms: u64,
}

#[cfg(test)]
impl TestHandler {
    async fn is_done(&self) -> Progress {
        if self.delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        }
        if self.say_done && self.err.is_empty() {
            Progress::Resolved(Ok("{}".to_string()))
        } else if self.say_done {
            Progress::Resolved(Err(HolderError::Internal(self.err.clone())))
        } else {
            Progress::Pending
        }
    }
}
