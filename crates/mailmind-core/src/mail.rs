//! Collaborator interfaces consumed by the core. The embedding client
//! supplies implementations at construction time; the core never reaches
//! for a global.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Fingerprint, MessageHeader};

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail client error: {0}")]
    Client(String),

    #[error("message not found: {0}")]
    NotFound(String),
}

/// The mail client's native folder/message surface, reduced to what the
/// core needs. Display/move/tag events arrive through the facade's event
/// entry points rather than through this trait.
#[async_trait]
pub trait MailClient: Send + Sync {
    /// Headers of every message currently in the inbox.
    async fn list_inbox(&self) -> Result<Vec<MessageHeader>, MailError>;

    /// Resolve a fingerprint back to a live header. `None` when the
    /// message has been moved or deleted since the fingerprint was taken.
    async fn find_header(&self, fp: &Fingerprint) -> Result<Option<MessageHeader>, MailError>;

    /// Full plain-text body for a message.
    async fn get_body(&self, header: &MessageHeader) -> Result<String, MailError>;

    /// Move a message to another folder.
    async fn move_message(&self, header: &MessageHeader, folder: &str) -> Result<(), MailError>;

    /// Replace the tag set on a message.
    async fn set_tags(&self, header: &MessageHeader, tags: &[String]) -> Result<(), MailError>;

    /// Whether the message is internal/self-sent (authored by one of the
    /// user's own identities). Internal messages never get cached actions.
    fn is_internal(&self, header: &MessageHeader) -> bool;

    /// Whether the user has already replied to the message.
    async fn is_replied(&self, header: &MessageHeader) -> Result<bool, MailError>;

    /// Display name of the account owner, for check-in prompts.
    fn user_name(&self) -> String;
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("not signed in")]
    NotSignedIn,

    #[error("authentication failed: {0}")]
    Failed(String),
}

/// Bearer-credential supplier.
#[async_trait]
pub trait Auth: Send + Sync {
    async fn access_token(&self) -> Result<String, AuthError>;

    /// Interactive or silent re-authentication; returns a fresh token.
    async fn reauthenticate(&self) -> Result<String, AuthError>;

    /// Whether a response status is an auth failure for this provider.
    fn is_auth_status(&self, status: u16) -> bool {
        matches!(status, 401 | 403)
    }

    async fn signed_in(&self) -> bool;
}

/// Privacy opt-out flag. Checked before every outbound LLM call.
#[async_trait]
pub trait Privacy: Send + Sync {
    async fn ai_blocked(&self) -> bool;
}

/// Chat-window surface: the check-in orchestrator asks whether chat is
/// open before reaching out, and opens it when it does.
#[async_trait]
pub trait ChatWindow: Send + Sync {
    async fn is_open(&self) -> bool;
    async fn open(&self);

    /// Recent visible chat turns, oldest first, for check-in context.
    async fn recent_history(&self, turns: usize) -> Vec<String>;
}

/// Throttle-status hook. The gate calls `throttle_started` when it enters
/// the 429 loop and `throttle_ended` when the call resolves either way.
pub trait StatusSink: Send + Sync {
    fn throttle_started(&self);
    fn throttle_ended(&self);
}

/// No-op sink for embeddings that don't surface throttle state.
pub struct NullStatusSink;

impl StatusSink for NullStatusSink {
    fn throttle_started(&self) {}
    fn throttle_ended(&self) {}
}
