use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use mailmind_core::config::{
    LlmConfig, STREAM_IDLE_TIMEOUT_SECS, THROTTLE_BACKOFF_FACTOR, THROTTLE_SLEEP_CAP_MS,
};
use mailmind_core::mail::{Auth, Privacy, StatusSink};

use crate::error::GateError;
use crate::stream::read_event_stream;
use crate::transport::{LlmTransport, TransportBody, TransportError, TransportRequest};
use crate::types::{
    ChatMessage, ChatOptions, LlmReply, ToolCall, ToolDefinition, ToolEvent, ToolExecutor,
};

/// Tool-loop turns before the gate gives up on the conversation.
const MAX_TOOL_TURNS: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RetryMode {
    Standard,
    /// Recursive tool-loop turns: re-sending would re-commit tool effects.
    Disabled,
}

/// Gates every outbound LLM call behind the global worker budget, the
/// privacy veto, and the retry/throttle/re-auth policies. One instance is
/// shared by the whole core.
pub struct LlmGate {
    transport: Arc<dyn LlmTransport>,
    auth: Arc<dyn Auth>,
    privacy: Arc<dyn Privacy>,
    status: Arc<dyn StatusSink>,
    semaphore: Arc<Semaphore>,
    model: String,
    max_retries: u32,
    retry_base_ms: u64,
    idle_timeout: Duration,
}

impl LlmGate {
    pub fn new(
        transport: Arc<dyn LlmTransport>,
        auth: Arc<dyn Auth>,
        privacy: Arc<dyn Privacy>,
        status: Arc<dyn StatusSink>,
        cfg: &LlmConfig,
    ) -> Self {
        Self {
            transport,
            auth,
            privacy,
            status,
            semaphore: Arc::new(Semaphore::new(cfg.max_workers)),
            model: cfg.model.clone(),
            max_retries: cfg.max_retries,
            retry_base_ms: cfg.retry_base_ms,
            idle_timeout: Duration::from_secs(STREAM_IDLE_TIMEOUT_SECS),
        }
    }

    /// Single-shot call returning just the assistant text.
    pub async fn chat(
        &self,
        messages: Vec<ChatMessage>,
        opts: ChatOptions,
    ) -> Result<String, GateError> {
        Ok(self.chat_raw(messages, opts).await?.content)
    }

    /// Single-shot call returning the full reply object.
    pub async fn chat_raw(
        &self,
        messages: Vec<ChatMessage>,
        opts: ChatOptions,
    ) -> Result<LlmReply, GateError> {
        let raw = to_raw_messages(&messages);
        self.call(raw, Vec::new(), &opts, RetryMode::Standard).await
    }

    /// Multi-turn tool loop: the reply's tool calls are executed through
    /// `executor` and their results fed back until the model stops asking.
    /// Recursive turns bypass the semaphore (the outer caller may hold the
    /// last permit) and disable retry.
    pub async fn chat_with_tools(
        &self,
        messages: Vec<ChatMessage>,
        executor: Arc<dyn ToolExecutor>,
        opts: ChatOptions,
    ) -> Result<LlmReply, GateError> {
        let tools = if opts.disable_tools {
            Vec::new()
        } else {
            executor.definitions()
        };
        let mut raw = to_raw_messages(&messages);

        for turn in 0..MAX_TOOL_TURNS {
            let (turn_opts, retry) = if turn == 0 {
                (opts.clone(), RetryMode::Standard)
            } else {
                let mut o = opts.clone();
                o.ignore_semaphore = true;
                (o, RetryMode::Disabled)
            };

            let reply = self.call(raw.clone(), tools.clone(), &turn_opts, retry).await?;

            if reply.tool_calls.is_empty() || reply.stop_reason != "tool_use" {
                debug!(turn, "tool loop complete");
                return Ok(reply);
            }

            // Assistant turn: any text plus the tool_use blocks.
            let mut assistant_content = Vec::new();
            if !reply.content.is_empty() {
                assistant_content.push(serde_json::json!({
                    "type": "text",
                    "text": reply.content,
                }));
            }
            for call in &reply.tool_calls {
                assistant_content.push(serde_json::json!({
                    "type": "tool_use",
                    "id": call.id,
                    "name": call.name,
                    "input": call.input,
                }));
            }
            raw.push(serde_json::json!({
                "role": "assistant",
                "content": assistant_content,
            }));

            // Execute each call and feed the results back as a user turn.
            let mut result_content = Vec::new();
            for call in &reply.tool_calls {
                self.emit_tool_event(&opts, ToolEvent::Started {
                    name: call.name.clone(),
                });
                let outcome = executor.execute(call).await;
                let event = if outcome.is_error {
                    ToolEvent::Failed {
                        name: call.name.clone(),
                        message: outcome.content.clone(),
                    }
                } else {
                    ToolEvent::Completed {
                        name: call.name.clone(),
                    }
                };
                self.emit_tool_event(&opts, event);
                result_content.push(serde_json::json!({
                    "type": "tool_result",
                    "tool_use_id": call.id,
                    "content": outcome.content,
                    "is_error": outcome.is_error,
                }));
            }
            raw.push(serde_json::json!({
                "role": "user",
                "content": result_content,
            }));
        }

        warn!(max_turns = MAX_TOOL_TURNS, "tool loop hit maximum turns");
        Err(GateError::Parse(format!(
            "tool loop exceeded {MAX_TOOL_TURNS} turns without a final reply"
        )))
    }

    fn emit_tool_event(&self, opts: &ChatOptions, event: ToolEvent) {
        if let Some(hook) = opts.on_tool_event.as_ref() {
            hook(event);
        }
    }

    async fn call(
        &self,
        messages: Vec<serde_json::Value>,
        tools: Vec<ToolDefinition>,
        opts: &ChatOptions,
        retry: RetryMode,
    ) -> Result<LlmReply, GateError> {
        // Privacy veto first: no permit, no token fetch, no traffic.
        if self.privacy.ai_blocked().await {
            return Err(GateError::PrivacyBlocked);
        }

        let _permit = if opts.ignore_semaphore {
            None
        } else {
            let acquired = tokio::select! {
                p = self.semaphore.clone().acquire_owned() => {
                    p.expect("llm gate semaphore is never closed")
                }
                _ = opts.cancel.cancelled() => return Err(GateError::Cancelled),
            };
            Some(acquired)
        };

        self.send_with_retry(messages, tools, opts, retry).await
    }

    async fn send_with_retry(
        &self,
        messages: Vec<serde_json::Value>,
        tools: Vec<ToolDefinition>,
        opts: &ChatOptions,
        retry: RetryMode,
    ) -> Result<LlmReply, GateError> {
        let mut bearer = self
            .auth
            .access_token()
            .await
            .map_err(|e| GateError::Auth(e.to_string()))?;

        let mut attempts: u32 = 0;
        let mut throttle_attempt: u32 = 0;
        let mut throttled = false;
        let mut reauthed = false;

        let result = loop {
            if opts.cancel.is_cancelled() {
                break Err(GateError::Cancelled);
            }

            let req = TransportRequest {
                model: self.model.clone(),
                messages: messages.clone(),
                tools: tools.clone(),
                bearer: bearer.clone(),
            };

            // Cancellation drops the in-flight send, aborting the HTTP
            // attempt.
            let outcome = tokio::select! {
                r = self.attempt(&req, opts) => r,
                _ = opts.cancel.cancelled() => break Err(GateError::Cancelled),
            };

            match outcome {
                Ok(reply) => break Ok(reply),

                Err(GateError::RateLimited { retry_after_ms }) => {
                    if !throttled {
                        throttled = true;
                        self.status.throttle_started();
                    }
                    throttle_attempt += 1;
                    let factor = THROTTLE_BACKOFF_FACTOR.powi(throttle_attempt as i32 - 1);
                    let sleep_ms =
                        ((retry_after_ms as f64) * factor).min(THROTTLE_SLEEP_CAP_MS as f64);
                    info!(
                        attempt = throttle_attempt,
                        sleep_ms = sleep_ms as u64,
                        "throttled by server, waiting"
                    );
                    if self.sleep_or_cancel(Duration::from_millis(sleep_ms as u64), opts).await {
                        break Err(GateError::Cancelled);
                    }
                }

                Err(GateError::Auth(msg)) if !reauthed => {
                    reauthed = true;
                    warn!("auth failure, attempting re-authentication");
                    bearer = match self.auth.reauthenticate().await {
                        Ok(token) => token,
                        Err(e) => break Err(GateError::Auth(e.to_string())),
                    };
                    debug!(prior = %msg, "re-auth succeeded, retrying once");
                }

                Err(e)
                    if retry == RetryMode::Standard
                        && e.is_retriable()
                        && attempts < self.max_retries =>
                {
                    attempts += 1;
                    let backoff = self.backoff_delay(attempts);
                    warn!(
                        attempt = attempts,
                        max = self.max_retries,
                        delay_ms = backoff.as_millis() as u64,
                        error = %e,
                        "retrying after network-class failure"
                    );
                    if self.sleep_or_cancel(backoff, opts).await {
                        break Err(GateError::Cancelled);
                    }
                }

                Err(e) => break Err(e),
            }
        };

        if throttled {
            self.status.throttle_ended();
        }
        result
    }

    /// One transport round: send, then consume whichever response channel
    /// the server picked.
    async fn attempt(
        &self,
        req: &TransportRequest,
        opts: &ChatOptions,
    ) -> Result<LlmReply, GateError> {
        match self.transport.send(req).await {
            Ok(TransportBody::Json(value)) => parse_reply(value),
            Ok(TransportBody::EventStream(stream)) => {
                let value =
                    read_event_stream(stream, self.idle_timeout, opts.on_tool_event.clone())
                        .await?;
                parse_reply(value)
            }
            Err(TransportError::RateLimited {
                retry_after_seconds,
            }) => Err(GateError::RateLimited {
                retry_after_ms: (retry_after_seconds * 1000.0) as u64,
            }),
            Err(TransportError::Status { status, message }) => {
                if self.auth.is_auth_status(status) {
                    Err(GateError::Auth(format!("status {status}: {message}")))
                } else if status == 408 || status >= 500 {
                    Err(GateError::Network(format!("status {status}: {message}")))
                } else {
                    Err(GateError::Api { status, message })
                }
            }
            Err(TransportError::Http(msg)) => Err(GateError::Network(msg)),
        }
    }

    /// Exponential backoff with up to 10% jitter.
    fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.retry_base_ms as f64 * 2f64.powi(attempt as i32 - 1);
        let jitter = 1.0 + fastrand::f64() * 0.1;
        Duration::from_millis((base * jitter) as u64)
    }

    /// Returns true when cancelled during the sleep.
    async fn sleep_or_cancel(&self, delay: Duration, opts: &ChatOptions) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(delay) => false,
            _ = opts.cancel.cancelled() => true,
        }
    }
}

fn to_raw_messages(messages: &[ChatMessage]) -> Vec<serde_json::Value> {
    messages
        .iter()
        .map(|m| serde_json::json!({ "role": m.role, "content": m.content }))
        .collect()
}

/// Shape the final payload (from either channel) into an [`LlmReply`].
fn parse_reply(value: serde_json::Value) -> Result<LlmReply, GateError> {
    let obj = value
        .as_object()
        .ok_or_else(|| GateError::Parse("final payload is not an object".to_string()))?;

    let content = obj
        .get("content")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let model = obj
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();
    let stop_reason = obj
        .get("stop_reason")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string();

    let mut tool_calls = Vec::new();
    if let Some(calls) = obj.get("tool_calls").and_then(|v| v.as_array()) {
        for call in calls {
            let id = call.get("id").and_then(|v| v.as_str());
            let name = call.get("name").and_then(|v| v.as_str());
            if let (Some(id), Some(name)) = (id, name) {
                tool_calls.push(ToolCall {
                    id: id.to_string(),
                    name: name.to_string(),
                    input: call.get("input").cloned().unwrap_or(serde_json::json!({})),
                });
            }
        }
    }

    Ok(LlmReply {
        content,
        model,
        stop_reason,
        tool_calls,
    })
}
