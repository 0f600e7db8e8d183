use holderkit_db::DbError;
use thiserror::Error;

/// Result type for `HolderKit` operations.
pub type HolderResult<T> = Result<T, HolderError>;

/// Error outputs from `HolderKit`
#[derive(Debug, Error)]
pub enum HolderError {
    /// The requested ticket, credential or event does not exist
    #[error("{kind}_not_found: {id}")]
    NotFound {
        /// Kind of record that was looked up.
        kind: &'static str,
        /// Identifier that was looked up.
        id: String,
    },
    /// A credential with the same content-derived key is already stored
    #[error("credential_already_exists: {key}")]
    AlreadyExists {
        /// Key of the stored credential.
        key: String,
    },
    /// An operation that needs at least one item received none
    #[error("empty_input")]
    EmptyInput,
    /// The presented input is not valid for the requested operation
    #[error("invalid_input: {0}")]
    InvalidInput(String),
    /// Network connection error with details
    #[error("network_error: {url} (status: {status:?}): {error}")]
    Network {
        /// Requested URL.
        url: String,
        /// HTTP status, when a response was received.
        status: Option<u16>,
        /// Error details.
        error: String,
    },
    /// Received or persisted data failed an integrity check
    #[error("integrity_error: {0}")]
    Integrity(String),
    /// Unexpected error serializing information
    #[error("serialization_error: {0}")]
    Serialization(String),
    /// Failure in the underlying key-value store
    #[error(transparent)]
    Storage(#[from] DbError),
    /// The holder engine failed to build a proof
    #[error("engine_error: {0}")]
    Engine(String),
    /// The verifier refused the presented credential
    #[error("verifier_rejected (status: {status}): {body}")]
    VerifierRejected {
        /// HTTP status returned by the verifier.
        status: u16,
        /// Response body returned by the verifier.
        body: String,
    },
    /// Events are delivered through a push sender on this identity
    #[error("pull_delivery_disabled")]
    PullDeliveryDisabled,
    /// Unexpected internal failure
    #[error("internal_error: {0}")]
    Internal(String),
}

impl HolderError {
    pub(crate) fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<serde_json::Error> for HolderError {
    fn from(error: serde_json::Error) -> Self {
        Self::Serialization(error.to_string())
    }
}

impl From<reqwest::Error> for HolderError {
    fn from(error: reqwest::Error) -> Self {
        Self::Network {
            url: error
                .url()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
            status: error.status().map(|s| s.as_u16()),
            error: error.to_string(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for HolderError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Self::Storage(DbError::LockPoisoned)
    }
}
