use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    /// Transport failure, 408, or 5xx: network-class, retried with
    /// backoff up to the configured budget.
    #[error("network error: {0}")]
    Network(String),

    /// Stream-level failure (idle timeout, ended before `final`, server
    /// error event). Retried like a network failure.
    #[error("stream error: {0}")]
    Stream(String),

    /// Non-retriable 4xx other than 408/429.
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// 429 with the server's requested delay. Consumed internally by the
    /// throttle loop; never surfaced to callers.
    #[error("rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("AI calls are blocked by privacy settings")]
    PrivacyBlocked,

    #[error("operation cancelled")]
    Cancelled,

    #[error("response parse error: {0}")]
    Parse(String),
}

impl GateError {
    /// Network-class errors get the backoff-retry treatment; everything
    /// else either has its own loop (429, auth) or is terminal.
    pub fn is_retriable(&self) -> bool {
        matches!(self, GateError::Network(_) | GateError::Stream(_))
    }
}

impl From<GateError> for mailmind_core::MailmindError {
    fn from(e: GateError) -> Self {
        use mailmind_core::MailmindError as M;
        match e {
            GateError::PrivacyBlocked => M::PrivacyBlocked,
            GateError::Cancelled => M::Cancelled,
            GateError::Auth(msg) => M::Auth(msg),
            GateError::Parse(msg) => M::Parse(msg),
            other => M::LlmNetwork(other.to_string()),
        }
    }
}
