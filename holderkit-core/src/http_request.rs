//! HTTP transport shared by issuer polls and verifier submissions.
//!
//! Issuer polls go out exactly once: a failed poll resolves its ticket and
//! the scheduler decides what happens next. Verifier submissions are
//! interactive, so transient failures (rate limits, 5xx, timeouts, refused
//! connections) are retried with exponential backoff.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use tracing::debug;

use crate::error::{HolderError, HolderResult};

const RETRY_MIN_DELAY: Duration = Duration::from_millis(200);
const RETRY_MAX_DELAY: Duration = Duration::from_secs(2);

/// HTTP client with the holder's timeout, user agent and retry budget.
#[derive(Debug, Clone)]
pub struct Request {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: u32,
}

impl Request {
    /// Creates a client whose calls time out after `timeout` and whose
    /// retried calls are attempted at most `max_retries` extra times.
    #[must_use]
    pub fn new(timeout: Duration, max_retries: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
            max_retries,
        }
    }

    pub(crate) fn get(&self, url: &str) -> RequestBuilder {
        self.builder(Method::GET, url)
    }

    pub(crate) fn post(&self, url: &str) -> RequestBuilder {
        self.builder(Method::POST, url)
    }

    fn builder(&self, method: Method, url: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .timeout(self.timeout)
            .header(
                reqwest::header::USER_AGENT,
                concat!("holderkit-core/", env!("CARGO_PKG_VERSION")),
            )
    }

    /// Sends `builder` once. Any response, whatever its status, is returned
    /// to the caller; only transport failures and transient statuses
    /// become errors.
    pub(crate) async fn send_once(&self, builder: RequestBuilder) -> HolderResult<Response> {
        let request = build(builder)?;
        attempt(&self.client, request)
            .await
            .map_err(|failure| failure.error)
    }

    /// Sends `builder`, retrying transient failures up to the configured
    /// budget.
    pub(crate) async fn send_with_retries(&self, builder: RequestBuilder) -> HolderResult<Response> {
        let request = build(builder)?;
        let backoff = ExponentialBuilder::default()
            .with_min_delay(RETRY_MIN_DELAY)
            .with_max_delay(RETRY_MAX_DELAY)
            .with_max_times(usize::try_from(self.max_retries).unwrap_or(usize::MAX));

        (|| async {
            let replay = request.try_clone().ok_or_else(|| Failure {
                error: network(request.url().as_str(), None, "request body cannot be replayed"),
                transient: false,
            })?;
            attempt(&self.client, replay).await
        })
        .retry(backoff)
        .when(Failure::is_transient)
        .notify(|failure, delay| {
            debug!(error = %failure.error, ?delay, "transient http failure, retrying");
        })
        .await
        .map_err(|failure| failure.error)
    }
}

/// A failed attempt and whether it is worth repeating.
#[derive(Debug)]
struct Failure {
    error: HolderError,
    transient: bool,
}

impl Failure {
    const fn is_transient(&self) -> bool {
        self.transient
    }
}

fn build(builder: RequestBuilder) -> HolderResult<reqwest::Request> {
    builder.build().map_err(|e| {
        let url = e.url().map_or("<unknown>", reqwest::Url::as_str);
        network(url, None, &format!("invalid request: {e}"))
    })
}

async fn attempt(client: &reqwest::Client, request: reqwest::Request) -> Result<Response, Failure> {
    let url = request.url().to_string();
    match client.execute(request).await {
        Ok(response) if is_transient_status(response.status()) => {
            let status = response.status();
            Err(Failure {
                error: network(&url, Some(status.as_u16()), &format!("server answered {status}")),
                transient: true,
            })
        }
        Ok(response) => Ok(response),
        Err(e) => Err(Failure {
            transient: e.is_timeout() || e.is_connect(),
            error: network(&url, None, &e.to_string()),
        }),
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn network(url: &str, status: Option<u16>, error: &str) -> HolderError {
    HolderError::Network {
        url: url.to_string(),
        status,
        error: error.to_string(),
    }
}
