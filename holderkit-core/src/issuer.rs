//! HTTP client for the issuer's claim endpoints.

use reqwest::Response;
use serde::{Deserialize, Serialize};

use crate::credential::{Claim, CredentialExistence};
use crate::error::{HolderError, HolderResult};
use crate::http_request::Request;

/// Issuer decision on a claim request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimStatus {
    /// Not decided yet.
    Pending,
    /// Approved; carries the claim the issuer will publish.
    Approved(Claim),
    /// Refused.
    Rejected,
}

/// Availability of the credential for an approved claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialStatus {
    /// The claim is not yet published in the issuer state.
    NotYet,
    /// The credential is ready.
    Ready(Box<CredentialExistence>),
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReqClaimRequest<'a> {
    value: &'a str,
    index: &'a str,
    holder_id: &'a str,
}

#[derive(Deserialize)]
struct ResClaimRequest {
    id: u64,
}

#[derive(Deserialize)]
struct ResClaimStatus {
    status: String,
    claim: Option<Claim>,
}

#[derive(Serialize)]
struct ReqClaimCredential<'a> {
    claim: &'a Claim,
}

#[derive(Deserialize)]
struct ResClaimCredential {
    status: String,
    credential: Option<CredentialExistence>,
}

/// Client for one issuer base URL.
///
/// Every call is a single attempt: ticket polls resolve on transport
/// errors rather than retrying in place.
#[derive(Debug, Clone)]
pub struct IssuerClient {
    base_url: String,
    request: Request,
}

impl IssuerClient {
    /// Creates a client for the issuer at `base_url`.
    #[must_use]
    pub fn new(base_url: &str, request: Request) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            request,
        }
    }

    /// Submits a claim request and returns the issuer's tracking id.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::Network`] on transport failure, non-success
    /// status or an unexpected body.
    pub async fn request_claim(&self, value: &str, holder_id: &str) -> HolderResult<u64> {
        let url = self.url("claim/request");
        let builder = self.request.post(&url).json(&ReqClaimRequest {
            value,
            index: value,
            holder_id,
        });
        let response = self.request.send_once(builder).await?;
        let body: ResClaimRequest = parse_json(&url, response).await?;
        Ok(body.id)
    }

    /// Polls the decision on request `id`.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::Network`] on transport failure, non-success
    /// status or an unexpected body.
    pub async fn claim_status(&self, id: u64) -> HolderResult<ClaimStatus> {
        let url = self.url(&format!("claim/status/{id}"));
        let response = self.request.send_once(self.request.get(&url)).await?;
        let body: ResClaimStatus = parse_json(&url, response).await?;

        match (body.status.as_str(), body.claim) {
            ("pending", _) => Ok(ClaimStatus::Pending),
            ("rejected", _) => Ok(ClaimStatus::Rejected),
            ("approved", Some(claim)) => Ok(ClaimStatus::Approved(claim)),
            ("approved", None) => Err(unexpected(&url, "approved status without claim")),
            (other, _) => Err(unexpected(&url, &format!("unknown claim status {other:?}"))),
        }
    }

    /// Asks for the credential of an approved `claim`.
    ///
    /// # Errors
    ///
    /// Returns [`HolderError::Network`] on transport failure, non-success
    /// status or an unexpected body.
    pub async fn claim_credential(&self, claim: &Claim) -> HolderResult<CredentialStatus> {
        let url = self.url("claim/credential");
        let builder = self.request.post(&url).json(&ReqClaimCredential { claim });
        let response = self.request.send_once(builder).await?;
        let body: ResClaimCredential = parse_json(&url, response).await?;

        match (body.status.as_str(), body.credential) {
            ("notYet", _) => Ok(CredentialStatus::NotYet),
            ("ready", Some(credential)) => Ok(CredentialStatus::Ready(Box::new(credential))),
            ("ready", None) => Err(unexpected(&url, "ready status without credential")),
            (other, _) => Err(unexpected(
                &url,
                &format!("unknown credential status {other:?}"),
            )),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }
}

async fn parse_json<T: for<'de> Deserialize<'de>>(url: &str, response: Response) -> HolderResult<T> {
    let status = response.status();
    if !status.is_success() {
        let error = response
            .text()
            .await
            .unwrap_or_else(|_| String::from("Unknown error"));
        return Err(HolderError::Network {
            url: url.to_string(),
            status: Some(status.as_u16()),
            error,
        });
    }

    let text = response.text().await?;
    serde_json::from_str(&text)
        .map_err(|e| unexpected(url, &format!("failed to parse issuer response: {e}")))
}

fn unexpected(url: &str, error: &str) -> HolderError {
    HolderError::Network {
        url: url.to_string(),
        status: None,
        error: error.to_string(),
    }
}
