use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// A single message in a chat request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// Tool definition sent with a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: serde_json::Value,
}

/// A tool call extracted from a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Result of executing one tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutcome {
    /// Text returned to the LLM.
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: message.into(),
            is_error: true,
        }
    }
}

/// Executes tool calls for `chat_with_tools`. Implementations are scoped
/// per caller so each tool run sees only its own context.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    fn definitions(&self) -> Vec<ToolDefinition>;
    async fn execute(&self, call: &ToolCall) -> ToolOutcome;
}

/// Tool progress notifications surfaced from a streamed response.
#[derive(Debug, Clone)]
pub enum ToolEvent {
    Started { name: String },
    Completed { name: String },
    Failed { name: String, message: String },
}

pub type ToolEventHook = Arc<dyn Fn(ToolEvent) + Send + Sync>;

/// Per-call options.
#[derive(Clone, Default)]
pub struct ChatOptions {
    /// Skip the global worker semaphore. Reserved for fast-path UI
    /// requests, recursive tool-loop turns, and background KB updates.
    pub ignore_semaphore: bool,
    /// Strip tool definitions from the request.
    pub disable_tools: bool,
    pub cancel: CancellationToken,
    /// Observer for tool progress events in streamed responses.
    pub on_tool_event: Option<ToolEventHook>,
}

impl std::fmt::Debug for ChatOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatOptions")
            .field("ignore_semaphore", &self.ignore_semaphore)
            .field("disable_tools", &self.disable_tools)
            .field("on_tool_event", &self.on_tool_event.is_some())
            .finish()
    }
}

/// Final assistant payload, identical for buffered and streamed responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmReply {
    pub content: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub stop_reason: String,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}
