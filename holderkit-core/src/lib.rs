//! Client-side runtime of an identity holder.
//!
//! An [`Identity`] requests credentials from issuers without blocking the
//! caller: every request becomes a persisted [`Ticket`] that a background
//! [`Scheduler`] polls until the issuer answers. Issued credentials land in
//! the content-addressed [`ClaimStore`], and each resolution is recorded
//! once in the [`EventLog`] for the host to consume. All state lives in one
//! transactional [`holderkit_db::Db`], so work survives restarts.

mod claim_store;
pub use claim_store::ClaimStore;

mod config;
pub use config::*;

mod credential;
pub use credential::*;

mod engine;
pub use engine::HolderEngine;

mod error;
pub use error::*;

mod event_log;
pub use event_log::{Event, EventLog, Sender};

mod identity;
pub use identity::Identity;

mod issuer;
pub use issuer::{ClaimStatus, CredentialStatus, IssuerClient};

pub mod logger;

pub mod tickets;
pub use tickets::{Ticket, TicketStatus, TicketStore, TicketType};

mod verifier;
pub use verifier::VerifierClient;

mod http_request;
pub use http_request::Request;

pub use holderkit_db::Db;
