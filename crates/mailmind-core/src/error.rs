use thiserror::Error;

/// Error taxonomy for the public API surface. The per-crate errors
/// (store, gate, patcher, ...) convert into this at the facade; `kind()`
/// is the stable code string the embedding UI keys off.
#[derive(Debug, Error)]
pub enum MailmindError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Response parse error: {0}")]
    Parse(String),

    #[error("LLM network error: {0}")]
    LlmNetwork(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("AI calls are blocked by privacy settings")]
    PrivacyBlocked,

    #[error("Patch error: {0}")]
    Patch(String),

    #[error("Mail client error: {0}")]
    Mail(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MailmindError {
    /// Stable error-kind string for UI dispatch and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            MailmindError::Config(_) => "config_error",
            MailmindError::Storage(_) => "storage_error",
            MailmindError::Parse(_) => "parse_error",
            MailmindError::LlmNetwork(_) => "llm_network_error",
            MailmindError::Auth(_) => "auth_error",
            MailmindError::Cancelled => "cancelled",
            MailmindError::PrivacyBlocked => "privacy_blocked",
            MailmindError::Patch(_) => "patch_error",
            MailmindError::Mail(_) => "mail_error",
            MailmindError::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, MailmindError>;
