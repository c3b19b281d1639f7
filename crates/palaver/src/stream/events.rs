use std::sync::Arc;

use crate::models::tool::ToolCall;

/// Provider-independent representation of one increment of a streaming
/// response. Events are ephemeral: they are delivered to the caller's
/// callback in order and never stored; only the final assistant message and
/// the conversation state persist.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    ContentDelta(String),
    ThinkingDelta(String),
    /// A reasoning span closed: the accumulated text plus any opaque
    /// signature/redaction metadata the provider attached to it.
    ThinkingSummary {
        text: String,
        signature: Option<String>,
        redacted_data: Option<String>,
    },
    /// A tool call's argument buffer became complete. Emitted exactly once
    /// per call.
    ToolCall(ToolCall),
    ToolResult {
        tool_call_id: String,
        name: String,
        content: String,
        error: Option<String>,
    },
    Usage {
        input_tokens: i32,
        output_tokens: i32,
    },
    Done,
}

/// Per-event callback supplied via `MessageOptions`. Invoked in-line, in
/// event order, on the calling task. Returning an error aborts the round and
/// closes the in-flight request.
pub type EventCallback = Arc<dyn Fn(&StreamEvent) -> anyhow::Result<()> + Send + Sync>;
