//! Runtime configuration for an [`Identity`](crate::Identity).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::event_log::Sender;

/// Default scheduler period.
pub const DEFAULT_CHECK_PENDING_PERIOD: Duration = Duration::from_secs(10);
/// Default polling interval of [`EventLog::get_next_event`](crate::EventLog::get_next_event).
pub const DEFAULT_EVENT_POLL_INTERVAL: Duration = Duration::from_secs(1);
/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(5);
/// Default number of retries for idempotent non-poll requests (total attempts = 4).
pub const DEFAULT_HTTP_MAX_RETRIES: u32 = 3;
/// Default maximum length of a claim request value.
pub const DEFAULT_MAX_CLAIM_VALUE_LEN: usize = 16;

/// Tunables of one identity runtime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityConfig {
    /// Period of the pending-ticket scheduler.
    pub check_pending_period: Duration,
    /// How often a blocked `get_next_event` re-checks the log.
    pub event_poll_interval: Duration,
    /// Timeout applied to every HTTP request.
    pub http_timeout: Duration,
    /// Retries for idempotent requests outside ticket polling.
    pub http_max_retries: u32,
    /// Maximum accepted length of a claim request value.
    pub max_claim_value_len: usize,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            check_pending_period: DEFAULT_CHECK_PENDING_PERIOD,
            event_poll_interval: DEFAULT_EVENT_POLL_INTERVAL,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
            http_max_retries: DEFAULT_HTTP_MAX_RETRIES,
            max_claim_value_len: DEFAULT_MAX_CLAIM_VALUE_LEN,
        }
    }
}

impl IdentityConfig {
    /// Sets the scheduler period.
    #[must_use]
    pub const fn with_check_pending_period(mut self, period: Duration) -> Self {
        self.check_pending_period = period;
        self
    }

    /// Sets the event polling interval.
    #[must_use]
    pub const fn with_event_poll_interval(mut self, interval: Duration) -> Self {
        self.event_poll_interval = interval;
        self
    }

    /// Sets the HTTP request timeout.
    #[must_use]
    pub const fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Sets the retry budget for idempotent requests.
    #[must_use]
    pub const fn with_http_max_retries(mut self, retries: u32) -> Self {
        self.http_max_retries = retries;
        self
    }

    /// Sets the maximum claim request value length.
    #[must_use]
    pub const fn with_max_claim_value_len(mut self, len: usize) -> Self {
        self.max_claim_value_len = len;
        self
    }
}

/// How resolved-ticket events reach the host application.
///
/// The two modes are mutually exclusive for one identity instance.
#[derive(Clone, Default)]
pub enum EventDelivery {
    /// The host pulls events with `get_next_event`.
    #[default]
    Pull,
    /// Every event is handed to the sender right after it is persisted.
    Push(Arc<dyn Sender>),
}

impl EventDelivery {
    /// Returns the push sender, if any.
    #[must_use]
    pub fn sender(&self) -> Option<Arc<dyn Sender>> {
        match self {
            Self::Pull => None,
            Self::Push(sender) => Some(Arc::clone(sender)),
        }
    }
}

impl fmt::Debug for EventDelivery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pull => f.write_str("Pull"),
            Self::Push(_) => f.write_str("Push(..)"),
        }
    }
}
