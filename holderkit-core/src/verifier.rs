use serde::Serialize;
use tracing::{debug, warn};

use crate::credential::CredentialValidity;
use crate::error::{HolderError, HolderResult};
use crate::http_request::Request;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReqVerify<'a> {
    credential_validity: &'a CredentialValidity,
}

/// Client for a verifier's `verify` endpoint.
#[derive(Debug, Clone)]
pub struct VerifierClient {
    base_url: String,
    request: Request,
}

impl VerifierClient {
    /// Creates a client for the verifier at `base_url`.
    #[must_use]
    pub fn new(base_url: &str, request: Request) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request,
        }
    }

    /// Presents `validity` to the verifier.
    ///
    /// Transient failures (timeouts, 429, 5xx) are retried with backoff.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::VerifierRejected`] with the response body if
    /// the verifier answers with a non-success status, or
    /// [`HolderError::Network`] if it cannot be reached.
    pub async fn verify(&self, validity: &CredentialValidity) -> HolderResult<()> {
        let url = format!("{}/verify", self.base_url);
        let builder = self.request.post(&url).json(&ReqVerify {
            credential_validity: validity,
        });
        let response = self.request.send_with_retries(builder).await?;

        let status = response.status();
        if status.is_success() {
            debug!(url = %url, "credential accepted by verifier");
            return Ok(());
        }

        let body = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("Unknown error"));
        warn!(url = %url, status = status.as_u16(), "credential rejected by verifier");
        Err(HolderError::VerifierRejected {
            status: status.as_u16(),
            body,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use mockito::{Matcher, Server};

    use super::*;
    use crate::credential::tests::sample_credential;

    fn validity() -> CredentialValidity {
        CredentialValidity {
            credential_existence: sample_credential(&[1, 2, 3]),
            proof: serde_json::json!({ "rootsTreeRoot": "0x01" }),
        }
    }

    #[tokio::test]
    async fn test_verify_accepted() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/verify")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "credentialValidity": { "proof": { "rootsTreeRoot": "0x01" } }
            })))
            .with_status(200)
            .create_async()
            .await;

        let verifier = VerifierClient::new(&server.url(), Request::new(Duration::from_secs(5), 0));
        verifier.verify(&validity()).await.unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_verify_rejected_carries_body() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/verify")
            .with_status(400)
            .with_body("stale issuer state")
            .create_async()
            .await;

        let verifier = VerifierClient::new(&server.url(), Request::new(Duration::from_secs(5), 2));
        match verifier.verify(&validity()).await {
            Err(HolderError::VerifierRejected { status, body }) => {
                assert_eq!(status, 400);
                assert_eq!(body, "stale issuer state");
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }
}
