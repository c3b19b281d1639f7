use std::sync::Arc;

use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::conversation::{Conversation, TokenUsage};
use crate::errors::{ChatError, ChatResult, ToolResult};
use crate::models::message::Message;
use crate::models::tool::Tool;
use crate::observer::{NoopObserver, StreamObserver};
use crate::providers::base::{
    max_output_tokens, ChatRequest, ProviderAdapter, RawSignal, ResponseFormat,
};
use crate::registry::{ToolHandler, ToolRegistry};
use crate::stream::events::{EventCallback, StreamEvent};
use crate::stream::normalizer::{RoundOutcome, StreamNormalizer};

/// Hard ceiling on tool-execution rounds within one `message` call. Hitting
/// it is a caller-visible error, never a silent truncation: an exchange that
/// wants more than this many rounds indicates a tool or model defect.
pub const MAX_TOOL_ROUNDS: usize = 10;

/// Per-call options for `Chat::message`
#[derive(Default, Clone)]
pub struct MessageOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    pub response_format: Option<ResponseFormat>,
    pub on_event: Option<EventCallback>,
}

/// One logical conversation against one provider: the conversation state, the
/// tool registry, and the round loop that drives a user message through
/// streaming rounds and tool execution to a final assistant message.
///
/// A chat is driven by one in-flight `message` call at a time, but the shared
/// state tolerates concurrent auxiliary calls (`history`, `token_usage`,
/// `list_tools`) from other tasks while a call is streaming.
pub struct Chat {
    provider: Arc<dyn ProviderAdapter>,
    conversation: Conversation,
    tools: ToolRegistry,
    observer: Arc<dyn StreamObserver>,
}

impl Chat {
    pub fn new<S: Into<String>>(
        provider: Arc<dyn ProviderAdapter>,
        system_prompt: S,
        initial_messages: Vec<Message>,
    ) -> Self {
        Self {
            provider,
            conversation: Conversation::new(system_prompt, initial_messages),
            tools: ToolRegistry::new(),
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn StreamObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Drive one user message to a final assistant message, looping through
    /// tool-execution rounds as the model requests them.
    ///
    /// Each completed round is appended to the conversation atomically; a
    /// round that fails appends nothing, so on any error the history reflects
    /// exactly the rounds that completed and the same logical message may be
    /// retried safely.
    pub async fn message(
        &self,
        cancel: CancellationToken,
        message: Message,
        options: MessageOptions,
    ) -> ChatResult<Message> {
        if message.content.is_empty() {
            return Err(ChatError::Conversion(
                "refusing to send a message with no content".to_string(),
            ));
        }

        let (system, mut history) = self.conversation.snapshot();
        history.push(message.clone());
        // The user message rides with the first completed round's append so a
        // snapshot never observes a question without its answer.
        let mut pending = vec![message];
        let mut temperature = options.temperature;

        for round in 0..MAX_TOOL_ROUNDS {
            if cancel.is_cancelled() {
                return Err(ChatError::Cancelled);
            }
            let tools = self.tools.definitions();
            let outcome = self
                .run_round(&system, &history, &tools, &mut temperature, &options, &cancel)
                .await?;
            tracing::debug!(
                round,
                tool_calls = outcome.tool_calls.len(),
                "streaming round complete"
            );

            if outcome.tool_calls.is_empty() {
                pending.push(outcome.message.clone());
                self.conversation
                    .append(std::mem::take(&mut pending), &outcome.usage);
                return Ok(outcome.message);
            }

            // Handlers run sequentially, in finalization order, so result
            // ordering matches call ordering for providers that require it.
            let mut results = Message::tool();
            for call in &outcome.tool_calls {
                if cancel.is_cancelled() {
                    return Err(ChatError::Cancelled);
                }
                let executed = self
                    .tools
                    .execute(&call.name, call.arguments.clone(), cancel.clone())
                    .await;
                let (content, error) = match executed {
                    Ok(content) => (content, None),
                    Err(error) => {
                        // Handler failures and unknown tools do not abort the
                        // round; the model sees them as structured results.
                        let message = error.to_string();
                        tracing::warn!(tool = %call.name, %message, "tool call failed");
                        (json!({"error": message}).to_string(), Some(message))
                    }
                };
                if let Some(callback) = &options.on_event {
                    let event = StreamEvent::ToolResult {
                        tool_call_id: call.id.clone(),
                        name: call.name.clone(),
                        content: content.clone(),
                        error: error.clone(),
                    };
                    callback(&event).map_err(|e| ChatError::CallbackAborted(e.to_string()))?;
                }
                results = results.with_tool_result(
                    call.id.clone(),
                    call.name.clone(),
                    content,
                    error,
                );
            }

            pending.push(outcome.message.clone());
            pending.push(results.clone());
            history.push(outcome.message);
            history.push(results);
            self.conversation
                .append(std::mem::take(&mut pending), &outcome.usage);
        }

        Err(ChatError::RoundLimitExceeded(MAX_TOOL_ROUNDS))
    }

    async fn run_round(
        &self,
        system: &str,
        history: &[Message],
        tools: &[Tool],
        temperature: &mut Option<f32>,
        options: &MessageOptions,
        cancel: &CancellationToken,
    ) -> ChatResult<RoundOutcome> {
        let request = ChatRequest {
            system,
            messages: history,
            tools,
            temperature: *temperature,
            max_tokens: options.max_tokens,
            response_format: options.response_format,
        };
        let body = self.provider.render_wire(&request)?;

        let mut stream = match self.provider.open_stream(body, cancel.clone()).await {
            Ok(stream) => stream,
            Err(ChatError::UnsupportedParameter(message)) if temperature.is_some() => {
                // The one documented transient condition: rebuild without the
                // rejected sampling parameter and re-issue once.
                tracing::warn!(%message, "retrying request without temperature");
                *temperature = None;
                let request = ChatRequest {
                    temperature: None,
                    ..request
                };
                let body = self.provider.render_wire(&request)?;
                self.provider.open_stream(body, cancel.clone()).await?
            }
            Err(error) => return Err(error),
        };

        let callback = options.on_event.clone();
        let mut emit = move |event: StreamEvent| -> ChatResult<()> {
            if let Some(callback) = &callback {
                callback(&event).map_err(|e| ChatError::CallbackAborted(e.to_string()))?;
            }
            Ok(())
        };

        let mut normalizer = StreamNormalizer::new();
        while let Some(raw) = stream.next().await {
            if cancel.is_cancelled() {
                return Err(ChatError::Cancelled);
            }
            let raw = raw?;
            for signal in self.provider.classify(&raw)? {
                if signal == RawSignal::Ignored {
                    self.observer.on_unrecognized(self.provider.name(), &raw);
                    continue;
                }
                // An emit error drops the stream on return, which closes the
                // in-flight request rather than letting it finalize silently.
                normalizer.absorb(signal, &mut emit)?;
            }
        }
        normalizer.finish(&mut emit)
    }

    /// The system prompt and an independent copy of the history
    pub fn history(&self) -> (String, Vec<Message>) {
        self.conversation.snapshot()
    }

    pub fn token_usage(&self) -> TokenUsage {
        self.conversation.token_usage()
    }

    pub fn register_tool(&self, tool: Tool, handler: Arc<dyn ToolHandler>) -> ToolResult<()> {
        self.tools.register(tool, handler)
    }

    pub fn deregister_tool(&self, name: &str) {
        self.tools.deregister(name)
    }

    /// Registered tool names in registration order
    pub fn list_tools(&self) -> Vec<String> {
        self.tools.names()
    }

    /// Static output-token ceiling for this chat's model
    pub fn max_tokens(&self) -> i32 {
        max_output_tokens(self.provider.model())
    }
}
