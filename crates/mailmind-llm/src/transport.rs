use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use tracing::{debug, warn};

use crate::types::ToolDefinition;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Status { status: u16, message: String },

    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: f64 },
}

/// One outbound completion request. `messages` is the raw JSON message
/// list so the tool loop can include structured tool_use / tool_result
/// blocks that plain string messages can't represent.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub model: String,
    pub messages: Vec<serde_json::Value>,
    pub tools: Vec<ToolDefinition>,
    pub bearer: String,
}

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// The two response channels a completion endpoint may answer with.
pub enum TransportBody {
    /// Buffered JSON object containing the final assistant payload.
    Json(serde_json::Value),
    /// Server-sent event stream; the gate's stream reader consumes it.
    EventStream(ByteStream),
}

/// POSTs a structured message list to the completion endpoint. Opaque to
/// the rest of the core; tests substitute a stub.
#[async_trait]
pub trait LlmTransport: Send + Sync {
    async fn send(&self, req: &TransportRequest) -> Result<TransportBody, TransportError>;
}

const CHAT_PATH: &str = "/v1/agent/chat";
/// 429 delay applied when the server names none.
const DEFAULT_RETRY_AFTER_SECS: f64 = 5.0;

pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl LlmTransport for HttpTransport {
    async fn send(&self, req: &TransportRequest) -> Result<TransportBody, TransportError> {
        let url = format!("{}{CHAT_PATH}", self.base_url);
        let body = serde_json::json!({
            "model": req.model,
            "messages": req.messages,
            "tools": req.tools,
        });

        debug!(model = %req.model, messages = req.messages.len(), "sending completion request");

        let resp = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", req.bearer))
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        if status == 429 {
            let retry = retry_after_seconds(resp).await;
            return Err(TransportError::RateLimited {
                retry_after_seconds: retry,
            });
        }

        if !resp.status().is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(status, body = %text, "completion API error");
            return Err(TransportError::Status {
                status,
                message: text,
            });
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.starts_with("text/event-stream") {
            let stream = resp
                .bytes_stream()
                .map(|r| r.map_err(|e| TransportError::Http(e.to_string())));
            Ok(TransportBody::EventStream(Box::pin(stream)))
        } else {
            let json = resp
                .json::<serde_json::Value>()
                .await
                .map_err(|e| TransportError::Http(e.to_string()))?;
            Ok(TransportBody::Json(json))
        }
    }
}

/// The server announces its requested delay either in the Retry-After
/// header or as `retry_after_seconds` in the 429 body.
async fn retry_after_seconds(resp: reqwest::Response) -> f64 {
    if let Some(secs) = resp
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok())
    {
        return secs;
    }
    match resp.json::<serde_json::Value>().await {
        Ok(body) => body
            .get("retry_after_seconds")
            .and_then(|v| v.as_f64())
            .unwrap_or(DEFAULT_RETRY_AFTER_SECS),
        Err(_) => DEFAULT_RETRY_AFTER_SECS,
    }
}
