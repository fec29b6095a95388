//! The LLM call gate: a global concurrency budget, retry with
//! backoff, an indefinite 429 throttle loop, one re-auth round, privacy
//! veto, cancellation, and a response channel that transparently consumes
//! either buffered JSON or an event stream.

pub mod error;
pub mod gate;
pub mod stream;
pub mod transport;
pub mod types;

pub use error::GateError;
pub use gate::LlmGate;
pub use transport::{HttpTransport, LlmTransport, TransportBody, TransportError, TransportRequest};
pub use types::{ChatMessage, ChatOptions, LlmReply, Role, ToolCall, ToolDefinition, ToolEvent, ToolExecutor, ToolOutcome};
