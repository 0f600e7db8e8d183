//! Common test utilities shared across integration tests.

#![allow(dead_code, missing_docs)]

use std::sync::Arc;
use std::time::Duration;

use holderkit_core::{
    CredentialExistence, CredentialValidity, Db, EventDelivery, HolderEngine, HolderError,
    HolderResult, Identity, IdentityConfig,
};
use serde_json::{json, Value};
use tracing_subscriber::EnvFilter;

pub const HOLDER_ID: &str = "1N7d2qVEJeqnYAWVi5Cq6PLj6GwxaW6FYcfmY2fps";
pub const ISSUER_ID: &str = "114HNY4C7NrKMQ3XZ7GPLdaQqAQ2TjxgFtLEq312nf";

/// Engine stand-in that wraps the credential in a dummy proof.
#[derive(Default)]
pub struct FakeEngine {
    pub fail: bool,
}

impl HolderEngine for FakeEngine {
    fn identifier(&self) -> String {
        HOLDER_ID.to_string()
    }

    fn build_credential_validity(
        &self,
        credential: &CredentialExistence,
    ) -> HolderResult<CredentialValidity> {
        if self.fail {
            return Err(HolderError::Engine("issuer state is stale".to_string()));
        }
        Ok(CredentialValidity {
            credential_existence: credential.clone(),
            proof: json!({ "idenState": credential.iden_state_data.iden_state }),
        })
    }
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(period: Duration) -> IdentityConfig {
    IdentityConfig::default()
        .with_check_pending_period(period)
        .with_event_poll_interval(Duration::from_millis(20))
        .with_http_timeout(Duration::from_secs(2))
        .with_http_max_retries(1)
}

pub fn open_identity(db: &Db, period: Duration, delivery: EventDelivery) -> Identity {
    Identity::open(db, Arc::new(FakeEngine::default()), config(period), delivery)
        .expect("identity opens")
}

/// Issuer `claim/credential` body for a ready credential over `claim_hex`.
pub fn ready_credential(claim_hex: &str) -> Value {
    json!({
        "status": "ready",
        "credential": {
            "id": ISSUER_ID,
            "idenStateData": {
                "blockTs": 1_583_931_881,
                "blockN": 2_326_694,
                "idenState": "0xaaada0c31752c0e794b64cd65260d8d7",
            },
            "mtpClaim": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "claim": claim_hex,
            "revocationsTreeRoot": "0x0000000000000000000000000000000000000000000000000000000000000000",
            "rootsTreeRoot": "0x85a781b1a8d7ba5b0c2c4c6d9a1e1c8b",
            "idenPubUrl": "http://127.0.0.1:1234/idenpublicdata/",
        }
    })
}
