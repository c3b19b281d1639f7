use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{ChatError, ChatResult};
use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }
}

/// One streaming request's inputs, rendered by an adapter into its wire body.
#[derive(Debug, Clone, Copy)]
pub struct ChatRequest<'a> {
    pub system: &'a str,
    pub messages: &'a [Message],
    pub tools: &'a [Tool],
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub response_format: Option<ResponseFormat>,
}

/// Response-format hint passed through to providers that support one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseFormat {
    Text,
    Json,
}

/// Provider-agnostic low-level signal, produced by `ProviderAdapter::classify`
/// from one raw stream event. The shared normalizer consumes these; the
/// provider-specific event tags never escape the adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum RawSignal {
    TextDelta(String),
    ThinkingDelta(String),
    ThinkingSignature(String),
    RedactedThinking(String),
    /// A new tool call opened. `arguments` is populated when the provider
    /// supplies the complete arguments up front; otherwise fragments follow.
    ToolCallStart {
        index: usize,
        id: Option<String>,
        name: String,
        arguments: Option<Value>,
    },
    /// A fragment of a pending call's argument JSON.
    ToolCallFragment { index: usize, fragment: String },
    /// The provider closed the block at `index` (a tool call or a thinking
    /// span, whichever is open there).
    BlockStop { index: usize },
    Usage {
        input_tokens: i32,
        output_tokens: i32,
    },
    Done,
    /// Event tag the canonical model does not know. Never an error; surfaced
    /// to the stream observer.
    Ignored,
}

pub type RawEventStream = Pin<Box<dyn Stream<Item = ChatResult<Value>> + Send>>;

/// Capability set one provider family must supply. The round loop, event
/// accumulation, and tool orchestration are shared; everything
/// provider-specific lives behind these four calls.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Short provider family name, used in logs and structural errors
    fn name(&self) -> &str;

    /// The model this adapter targets
    fn model(&self) -> &str;

    /// Render the canonical history into this provider's wire request body.
    /// Fails with `ChatError::Conversion` before any network call when a
    /// message violates the family's structural invariants.
    fn render_wire(&self, request: &ChatRequest<'_>) -> ChatResult<Value>;

    /// Open a streaming request and return the deframed raw event source.
    /// A rejected sampling parameter maps to `ChatError::UnsupportedParameter`
    /// so the orchestrator can rebuild and retry once.
    async fn open_stream(&self, body: Value, cancel: CancellationToken)
        -> ChatResult<RawEventStream>;

    /// Map one raw stream event to zero or more canonical signals. In-band
    /// provider errors surface as `ChatError::Transport`.
    fn classify(&self, raw: &Value) -> ChatResult<Vec<RawSignal>>;
}

impl ChatRequest<'_> {
    /// Shared guard: a message with zero content pieces, or nothing but blank
    /// text, must never reach a provider.
    pub fn ensure_renderable(&self, provider: &str) -> ChatResult<()> {
        for message in self.messages {
            ensure_message_renderable(provider, message)?;
        }
        Ok(())
    }
}

/// Static per-model output-token ceilings, keyed by model-name prefix.
/// First match wins, so longer prefixes sort first. Unrecognized models get
/// a conservative default rather than an error.
const MODEL_TOKEN_CEILINGS: &[(&str, i32)] = &[
    ("claude-3-5", 8192),
    ("claude-3", 4096),
    ("claude", 8192),
    ("gpt-4o", 16384),
    ("gpt-4", 8192),
    ("o1", 32768),
    ("gemini-1.5", 8192),
    ("gemini", 8192),
];

pub const DEFAULT_TOKEN_CEILING: i32 = 4096;

pub fn max_output_tokens(model: &str) -> i32 {
    MODEL_TOKEN_CEILINGS
        .iter()
        .find(|(prefix, _)| model.starts_with(prefix))
        .map(|(_, ceiling)| *ceiling)
        .unwrap_or(DEFAULT_TOKEN_CEILING)
}

pub(crate) fn ensure_message_renderable(provider: &str, message: &Message) -> ChatResult<()> {
    if message.content.is_empty() {
        return Err(ChatError::Conversion(format!(
            "{provider}: refusing to render a message with no content"
        )));
    }
    let all_blank_text = message.content.iter().all(|c| match c.as_text() {
        Some(text) => text.trim().is_empty(),
        None => false,
    });
    if all_blank_text {
        return Err(ChatError::Conversion(format!(
            "{provider}: refusing to render a message with only blank text"
        )));
    }
    if message.role == crate::models::role::Role::Tool
        && !message.has_tool_results()
        && !message.has_text()
    {
        return Err(ChatError::Conversion(format!(
            "{provider}: tool message carries neither tool results nor text"
        )));
    }
    Ok(())
}
