//! Event-stream reader. Consumes an SSE byte stream of
//! `keepalive | tool_started | tool_completed | tool_failed | final |
//! error` events and yields the `final` payload. Any event resets the
//! idle timer; a stream that ends before `final` is an error.

use std::time::Duration;

use futures_util::StreamExt;
use tracing::{debug, warn};

use crate::error::GateError;
use crate::transport::ByteStream;
use crate::types::{ToolEvent, ToolEventHook};

/// Parse a single SSE line: `event: <type>` or `data: <json>`.
pub fn parse_sse_line(line: &str) -> Option<SseParsed> {
    if let Some(event_type) = line.strip_prefix("event: ") {
        Some(SseParsed::Event(event_type.to_string()))
    } else {
        line.strip_prefix("data: ")
            .map(|data| SseParsed::Data(data.to_string()))
    }
}

#[derive(Debug)]
pub enum SseParsed {
    Event(String),
    Data(String),
}

/// Drive the stream to its `final` event and return that event's payload.
pub async fn read_event_stream(
    mut stream: ByteStream,
    idle_timeout: Duration,
    on_tool: Option<ToolEventHook>,
) -> Result<serde_json::Value, GateError> {
    let mut current_event = String::new();
    let mut line_buf = String::new();

    loop {
        let next = tokio::time::timeout(idle_timeout, stream.next())
            .await
            .map_err(|_| {
                GateError::Stream(format!(
                    "no bytes for {}s on event stream",
                    idle_timeout.as_secs()
                ))
            })?;

        let Some(chunk) = next else {
            return Err(GateError::Stream(
                "stream ended before final event".to_string(),
            ));
        };
        let chunk = chunk.map_err(|e| GateError::Network(e.to_string()))?;

        let text = match std::str::from_utf8(&chunk) {
            Ok(t) => t,
            Err(_) => continue,
        };

        // Multiple SSE lines per chunk; keep the incomplete last line
        // buffered for the next chunk.
        line_buf.push_str(text);
        let lines: Vec<&str> = line_buf.split('\n').collect();
        let (complete, remainder) = lines.split_at(lines.len() - 1);
        let remainder = remainder.first().unwrap_or(&"").to_string();

        for line in complete {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let Some(parsed) = parse_sse_line(line) else {
                continue;
            };
            match parsed {
                SseParsed::Event(ev) => current_event = ev,
                SseParsed::Data(data) => match current_event.as_str() {
                    "keepalive" => {
                        debug!("stream keepalive");
                    }
                    "tool_started" | "tool_completed" | "tool_failed" => {
                        if let Some(event) = parse_tool_event(&current_event, &data) {
                            if let Some(hook) = on_tool.as_ref() {
                                hook(event);
                            }
                        }
                    }
                    "final" => {
                        return serde_json::from_str(&data)
                            .map_err(|e| GateError::Parse(format!("bad final payload: {e}")));
                    }
                    "error" => {
                        warn!(data = %data, "stream error event");
                        return Err(GateError::Stream(data));
                    }
                    other => {
                        debug!(event = other, "unhandled stream event");
                    }
                },
            }
        }

        line_buf = remainder;
    }
}

fn parse_tool_event(event_type: &str, data: &str) -> Option<ToolEvent> {
    let payload: serde_json::Value = serde_json::from_str(data).ok()?;
    let name = payload.get("name")?.as_str()?.to_string();
    match event_type {
        "tool_started" => Some(ToolEvent::Started { name }),
        "tool_completed" => Some(ToolEvent::Completed { name }),
        "tool_failed" => Some(ToolEvent::Failed {
            name,
            message: payload
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or_default()
                .to_string(),
        }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use bytes::Bytes;

    use crate::transport::TransportError;

    fn byte_stream(chunks: Vec<&str>) -> ByteStream {
        let items: Vec<Result<Bytes, TransportError>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        Box::pin(futures_util::stream::iter(items))
    }

    #[tokio::test]
    async fn final_event_yields_payload() {
        let stream = byte_stream(vec![
            "event: keepalive\ndata: {}\n\n",
            "event: final\ndata: {\"content\":\"hi\",\"stop_reason\":\"end\"}\n\n",
        ]);
        let payload = read_event_stream(stream, Duration::from_secs(60), None)
            .await
            .unwrap();
        assert_eq!(payload["content"], "hi");
    }

    #[tokio::test]
    async fn line_split_across_chunks() {
        let stream = byte_stream(vec![
            "event: fin",
            "al\ndata: {\"cont",
            "ent\":\"joined\"}\n\n",
        ]);
        let payload = read_event_stream(stream, Duration::from_secs(60), None)
            .await
            .unwrap();
        assert_eq!(payload["content"], "joined");
    }

    #[tokio::test]
    async fn tool_events_reach_hook() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let hook: ToolEventHook = {
            let seen = seen.clone();
            Arc::new(move |ev: ToolEvent| {
                let label = match ev {
                    ToolEvent::Started { name } => format!("start:{name}"),
                    ToolEvent::Completed { name } => format!("done:{name}"),
                    ToolEvent::Failed { name, .. } => format!("fail:{name}"),
                };
                seen.lock().unwrap().push(label);
            })
        };
        let stream = byte_stream(vec![
            "event: tool_started\ndata: {\"name\":\"lookup\"}\n\n",
            "event: tool_completed\ndata: {\"name\":\"lookup\"}\n\n",
            "event: final\ndata: {\"content\":\"done\"}\n\n",
        ]);
        read_event_stream(stream, Duration::from_secs(60), Some(hook))
            .await
            .unwrap();
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["start:lookup".to_string(), "done:lookup".to_string()]
        );
    }

    #[tokio::test]
    async fn ended_without_final_is_error() {
        let stream = byte_stream(vec!["event: keepalive\ndata: {}\n\n"]);
        let err = read_event_stream(stream, Duration::from_secs(60), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Stream(_)));
    }

    #[tokio::test]
    async fn error_event_fails_the_read() {
        let stream = byte_stream(vec!["event: error\ndata: upstream exploded\n\n"]);
        let err = read_event_stream(stream, Duration::from_secs(60), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Stream(m) if m.contains("exploded")));
    }

    #[tokio::test]
    async fn idle_timeout_fires() {
        let pending: ByteStream = Box::pin(futures_util::stream::pending());
        let err = read_event_stream(pending, Duration::from_millis(20), None)
            .await
            .unwrap_err();
        assert!(matches!(err, GateError::Stream(m) if m.contains("no bytes")));
    }
}
