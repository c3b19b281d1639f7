use std::collections::BTreeMap;

use serde_json::Value;

use super::events::StreamEvent;
use crate::errors::ChatResult;
use crate::models::content::{Content, ThinkingContent};
use crate::models::message::Message;
use crate::models::tool::ToolCall;
use crate::providers::base::{RawSignal, Usage};

/// Everything one streaming round produced: the assembled assistant message,
/// the finalized tool calls in finalization order, and the round's usage.
#[derive(Debug, Clone)]
pub struct RoundOutcome {
    pub message: Message,
    pub tool_calls: Vec<ToolCall>,
    pub usage: Usage,
}

/// A tool call whose argument buffer is still accumulating, keyed by the
/// provider's own call index. Cleared on finalization.
#[derive(Debug)]
struct PendingToolCall {
    id: Option<String>,
    name: String,
    buffer: String,
}

/// The shared per-round state machine. Adapters translate their raw event
/// tags into `RawSignal`s; this accumulator turns those into canonical
/// `StreamEvent`s and, at end of stream, the round's assistant message.
///
/// Guarantees: fragmented tool-call arguments converge to exactly one
/// `ToolCall` event whether they arrive whole or split; a thinking span
/// yields exactly one summary when it closes; zero-valued usage observations
/// never overwrite non-zero ones; an empty text buffer produces no blank
/// text content.
pub struct StreamNormalizer {
    content: String,
    thinking: String,
    thinking_signature: Option<String>,
    redacted_thinking: Option<String>,
    in_thinking: bool,
    closed_thinking: Vec<ThinkingContent>,
    pending: BTreeMap<usize, PendingToolCall>,
    finalized: Vec<ToolCall>,
    input_tokens: i32,
    output_tokens: i32,
}

type Emit<'a> = dyn FnMut(StreamEvent) -> ChatResult<()> + 'a;

impl StreamNormalizer {
    pub fn new() -> Self {
        Self {
            content: String::new(),
            thinking: String::new(),
            thinking_signature: None,
            redacted_thinking: None,
            in_thinking: false,
            closed_thinking: Vec::new(),
            pending: BTreeMap::new(),
            finalized: Vec::new(),
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    pub fn absorb(&mut self, signal: RawSignal, emit: &mut Emit<'_>) -> ChatResult<()> {
        match signal {
            RawSignal::TextDelta(text) => {
                if text.is_empty() {
                    return Ok(());
                }
                // Ordinary content while still "in thinking" closes the span.
                self.close_thinking(emit)?;
                self.content.push_str(&text);
                emit(StreamEvent::ContentDelta(text))?;
            }
            RawSignal::ThinkingDelta(text) => {
                self.in_thinking = true;
                self.thinking.push_str(&text);
                emit(StreamEvent::ThinkingDelta(text))?;
            }
            RawSignal::ThinkingSignature(fragment) => {
                self.in_thinking = true;
                self.thinking_signature
                    .get_or_insert_with(String::new)
                    .push_str(&fragment);
            }
            RawSignal::RedactedThinking(data) => {
                self.in_thinking = true;
                self.redacted_thinking
                    .get_or_insert_with(String::new)
                    .push_str(&data);
            }
            RawSignal::ToolCallStart {
                index,
                id,
                name,
                arguments,
            } => {
                self.close_thinking(emit)?;
                match arguments {
                    // Arguments supplied up front finalize immediately.
                    Some(arguments) => self.finalize_call(id, name, arguments, emit)?,
                    None => {
                        self.pending.insert(
                            index,
                            PendingToolCall {
                                id,
                                name,
                                buffer: String::new(),
                            },
                        );
                    }
                }
            }
            RawSignal::ToolCallFragment { index, fragment } => {
                let Some(pending) = self.pending.get_mut(&index) else {
                    tracing::warn!(index, "argument fragment for unknown tool call");
                    return Ok(());
                };
                pending.buffer.push_str(&fragment);
                // A proper prefix of a JSON object never parses, so the buffer
                // becoming valid means the arguments are complete.
                if let Ok(arguments) = serde_json::from_str::<Value>(&pending.buffer) {
                    let pending = self.pending.remove(&index).unwrap();
                    self.finalize_call(pending.id, pending.name, arguments, emit)?;
                }
            }
            RawSignal::BlockStop { index } => {
                if let Some(pending) = self.pending.remove(&index) {
                    match parse_call_buffer(&pending.buffer) {
                        Some(arguments) => {
                            self.finalize_call(pending.id, pending.name, arguments, emit)?
                        }
                        None => tracing::warn!(
                            index,
                            name = %pending.name,
                            "dropping tool call with malformed argument buffer"
                        ),
                    }
                } else if self.in_thinking {
                    self.close_thinking(emit)?;
                }
            }
            RawSignal::Usage {
                input_tokens,
                output_tokens,
            } => {
                // Usage may arrive split across events; merge field-wise and
                // let zero observations stand aside for non-zero ones.
                self.input_tokens = self.input_tokens.max(input_tokens);
                self.output_tokens = self.output_tokens.max(output_tokens);
            }
            RawSignal::Done | RawSignal::Ignored => {}
        }
        Ok(())
    }

    /// Consume the normalizer at end of stream: close any open thinking span,
    /// finalize leftover pending calls whose buffers are complete, emit the
    /// round's usage and the terminal event, and assemble the assistant
    /// message from the accumulated buffers.
    pub fn finish(mut self, emit: &mut Emit<'_>) -> ChatResult<RoundOutcome> {
        self.close_thinking(emit)?;

        let leftover: Vec<usize> = self.pending.keys().copied().collect();
        for index in leftover {
            let pending = self.pending.remove(&index).unwrap();
            match parse_call_buffer(&pending.buffer) {
                Some(arguments) => self.finalize_call(pending.id, pending.name, arguments, emit)?,
                None => tracing::warn!(
                    index,
                    name = %pending.name,
                    "stream ended with incomplete tool call arguments"
                ),
            }
        }

        let usage = if self.input_tokens > 0 || self.output_tokens > 0 {
            emit(StreamEvent::Usage {
                input_tokens: self.input_tokens,
                output_tokens: self.output_tokens,
            })?;
            Usage::new(
                Some(self.input_tokens),
                Some(self.output_tokens),
                Some(self.input_tokens + self.output_tokens),
            )
        } else {
            Usage::default()
        };
        emit(StreamEvent::Done)?;

        let mut message = Message::assistant();
        for thinking in self.closed_thinking {
            message = message.with_content(Content::Thinking(thinking));
        }
        if !self.content.is_empty() {
            message = message.with_text(self.content);
        }
        for call in &self.finalized {
            message = message.with_tool_call(call.id.clone(), call.name.clone(), call.arguments.clone());
        }

        Ok(RoundOutcome {
            message,
            tool_calls: self.finalized,
            usage,
        })
    }

    fn finalize_call(
        &mut self,
        id: Option<String>,
        name: String,
        arguments: Value,
        emit: &mut Emit<'_>,
    ) -> ChatResult<()> {
        let id = id.unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4()));
        let call = ToolCall::new(id, name, arguments);
        emit(StreamEvent::ToolCall(call.clone()))?;
        self.finalized.push(call);
        Ok(())
    }

    fn close_thinking(&mut self, emit: &mut Emit<'_>) -> ChatResult<()> {
        if !self.in_thinking {
            return Ok(());
        }
        self.in_thinking = false;
        if self.thinking.is_empty()
            && self.thinking_signature.is_none()
            && self.redacted_thinking.is_none()
        {
            return Ok(());
        }
        let thinking = ThinkingContent {
            text: std::mem::take(&mut self.thinking),
            signature: self.thinking_signature.take(),
            redacted_data: self.redacted_thinking.take(),
        };
        emit(StreamEvent::ThinkingSummary {
            text: thinking.text.clone(),
            signature: thinking.signature.clone(),
            redacted_data: thinking.redacted_data.clone(),
        })?;
        self.closed_thinking.push(thinking);
        Ok(())
    }
}

impl Default for StreamNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

/// An empty buffer means the provider closed a call with no arguments.
fn parse_call_buffer(buffer: &str) -> Option<Value> {
    if buffer.trim().is_empty() {
        return Some(Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(buffer).ok()
}
