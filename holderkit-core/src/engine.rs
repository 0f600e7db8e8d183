use crate::credential::{CredentialExistence, CredentialValidity};
use crate::error::HolderResult;

/// Cryptographic collaborator owning the identity's keys and merkle trees.
///
/// The runtime never interprets claims or proofs itself; it only asks the
/// engine for what it needs to talk to issuers and verifiers.
pub trait HolderEngine: Send + Sync {
    /// Stable reference to the identity, sent to issuers in claim requests.
    fn identifier(&self) -> String;

    /// Builds a proof that `credential` is still valid under the issuer's
    /// latest published state.
    ///
    /// # Errors
    ///
    /// Fails with [`HolderError::Engine`](crate::HolderError::Engine) on
    /// malformed or stale input.
    fn build_credential_validity(
        &self,
        credential: &CredentialExistence,
    ) -> HolderResult<CredentialValidity>;
}
