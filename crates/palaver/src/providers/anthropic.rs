use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::base::{
    ensure_message_renderable, max_output_tokens, ChatRequest, ProviderAdapter, RawEventStream,
    RawSignal,
};
use super::configs::AnthropicConfig;
use super::sse;
use super::utils::classify_http_failure;
use crate::errors::{ChatError, ChatResult};
use crate::models::content::Content;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::Tool;

pub const ANTHROPIC_API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicConfig) -> ChatResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;
        Ok(Self { client, config })
    }
}

/// Convert canonical messages to Anthropic's messages specification.
///
/// Family invariants: tool results are packaged as a user-role wire message
/// whose blocks are tool_result blocks only, with no free text alongside;
/// assistant messages may carry text, thinking, and tool_use blocks but never
/// tool_result blocks.
pub fn messages_to_anthropic_spec(messages: &[Message]) -> ChatResult<Vec<Value>> {
    let mut spec = Vec::new();

    for message in messages {
        ensure_message_renderable("anthropic", message)?;
        match message.role {
            Role::System => {
                return Err(ChatError::Conversion(
                    "anthropic: system text belongs in the system parameter, not the message log"
                        .to_string(),
                ));
            }
            Role::User => {
                if message.has_tool_results() || message.has_tool_calls() {
                    return Err(ChatError::Conversion(
                        "anthropic: tool calls and results never ride in plain user messages"
                            .to_string(),
                    ));
                }
                let blocks: Vec<Value> = message
                    .content
                    .iter()
                    .filter_map(|content| match content {
                        Content::Text(text) => Some(json!({"type": "text", "text": text.text})),
                        Content::SystemReminder(reminder) => {
                            Some(json!({"type": "text", "text": reminder.text}))
                        }
                        _ => None,
                    })
                    .collect();
                spec.push(json!({"role": "user", "content": blocks}));
            }
            Role::Assistant => {
                let mut blocks = Vec::new();
                for content in &message.content {
                    match content {
                        Content::Thinking(thinking) => {
                            if !thinking.text.is_empty() || thinking.signature.is_some() {
                                let mut block = json!({
                                    "type": "thinking",
                                    "thinking": thinking.text,
                                });
                                if let Some(signature) = &thinking.signature {
                                    block["signature"] = json!(signature);
                                }
                                blocks.push(block);
                            }
                            if let Some(data) = &thinking.redacted_data {
                                blocks.push(json!({"type": "redacted_thinking", "data": data}));
                            }
                        }
                        Content::Text(text) => {
                            blocks.push(json!({"type": "text", "text": text.text}));
                        }
                        Content::ToolCall(call) => {
                            blocks.push(json!({
                                "type": "tool_use",
                                "id": call.id,
                                "name": call.name,
                                "input": call.arguments,
                            }));
                        }
                        Content::ToolResult(_) => {
                            return Err(ChatError::Conversion(
                                "anthropic: assistant message must not contain tool results"
                                    .to_string(),
                            ));
                        }
                        Content::SystemReminder(reminder) => {
                            blocks.push(json!({"type": "text", "text": reminder.text}));
                        }
                    }
                }
                spec.push(json!({"role": "assistant", "content": blocks}));
            }
            Role::Tool => {
                if message.has_text() {
                    return Err(ChatError::Conversion(
                        "anthropic: tool-result message must not carry free text".to_string(),
                    ));
                }
                let blocks: Vec<Value> = message
                    .tool_results()
                    .iter()
                    .map(|result| {
                        let mut block = json!({
                            "type": "tool_result",
                            "tool_use_id": result.tool_call_id,
                            "content": result.content,
                        });
                        if result.error.is_some() {
                            block["is_error"] = json!(true);
                        }
                        block
                    })
                    .collect();
                if blocks.is_empty() {
                    return Err(ChatError::Conversion(
                        "anthropic: tool message has no tool results".to_string(),
                    ));
                }
                spec.push(json!({"role": "user", "content": blocks}));
            }
        }
    }

    Ok(spec)
}

/// Convert canonical tools to Anthropic's tool specification
pub fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "input_schema": tool.input_schema,
            })
        })
        .collect()
}

/// Reconstruct canonical messages from Anthropic wire messages. A user-role
/// wire message made of tool_result blocks only maps back to a canonical
/// tool message; tool names are recovered from the originating tool_use ids.
pub fn anthropic_spec_to_messages(spec: &[Value]) -> ChatResult<Vec<Message>> {
    let mut messages = Vec::new();
    let mut call_names: HashMap<String, String> = HashMap::new();

    for wire in spec {
        let role = wire["role"].as_str().unwrap_or_default();
        let blocks = wire["content"].as_array().cloned().unwrap_or_default();
        let all_tool_results = !blocks.is_empty()
            && blocks
                .iter()
                .all(|b| b["type"].as_str() == Some("tool_result"));

        if role == "user" && all_tool_results {
            let mut message = Message::tool();
            for block in &blocks {
                let id = block["tool_use_id"].as_str().unwrap_or_default();
                let content = block["content"].as_str().unwrap_or_default().to_string();
                let error = if block["is_error"].as_bool().unwrap_or(false) {
                    serde_json::from_str::<Value>(&content)
                        .ok()
                        .and_then(|v| v["error"].as_str().map(String::from))
                        .or_else(|| Some(content.clone()))
                } else {
                    None
                };
                let name = call_names.get(id).cloned().unwrap_or_default();
                message = message.with_tool_result(id, name, content, error);
            }
            messages.push(message);
            continue;
        }

        let mut message = match role {
            "user" => Message::user(),
            "assistant" => Message::assistant(),
            other => {
                return Err(ChatError::Conversion(format!(
                    "anthropic: unknown wire role '{other}'"
                )))
            }
        };
        for block in &blocks {
            match block["type"].as_str().unwrap_or_default() {
                "text" => message = message.with_text(block["text"].as_str().unwrap_or_default()),
                "thinking" => {
                    message = message.with_thinking(
                        block["thinking"].as_str().unwrap_or_default(),
                        block["signature"].as_str().map(String::from),
                        None,
                    )
                }
                "redacted_thinking" => {
                    message = message.with_thinking(
                        "",
                        None,
                        block["data"].as_str().map(String::from),
                    )
                }
                "tool_use" => {
                    let id = block["id"].as_str().unwrap_or_default();
                    let name = block["name"].as_str().unwrap_or_default();
                    call_names.insert(id.to_string(), name.to_string());
                    message = message.with_tool_call(id, name, block["input"].clone());
                }
                other => {
                    return Err(ChatError::Conversion(format!(
                        "anthropic: unknown content block '{other}'"
                    )))
                }
            }
        }
        messages.push(message);
    }

    Ok(messages)
}

#[async_trait]
impl ProviderAdapter for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn render_wire(&self, request: &ChatRequest<'_>) -> ChatResult<Value> {
        let max_tokens = request
            .max_tokens
            .unwrap_or_else(|| max_output_tokens(&self.config.model));
        let mut payload = json!({
            "model": self.config.model,
            "max_tokens": max_tokens,
            "stream": true,
            "messages": messages_to_anthropic_spec(request.messages)?,
        });
        let body = payload.as_object_mut().unwrap();
        if !request.system.is_empty() {
            body.insert("system".to_string(), json!(request.system));
        }
        if !request.tools.is_empty() {
            body.insert(
                "tools".to_string(),
                json!(tools_to_anthropic_spec(request.tools)),
            );
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        // This family has no response-format switch; the hint is advisory.
        Ok(payload)
    }

    async fn open_stream(
        &self,
        body: Value,
        cancel: CancellationToken,
    ) -> ChatResult<RawEventStream> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_failure("anthropic", status, &text));
        }
        Ok(sse::event_stream(response, cancel))
    }

    fn classify(&self, raw: &Value) -> ChatResult<Vec<RawSignal>> {
        let index = raw["index"].as_u64().unwrap_or(0) as usize;
        let signals = match raw["type"].as_str().unwrap_or_default() {
            "message_start" => {
                let usage = &raw["message"]["usage"];
                vec![RawSignal::Usage {
                    input_tokens: usage["input_tokens"].as_i64().unwrap_or(0) as i32,
                    output_tokens: usage["output_tokens"].as_i64().unwrap_or(0) as i32,
                }]
            }
            "content_block_start" => {
                let block = &raw["content_block"];
                match block["type"].as_str().unwrap_or_default() {
                    "tool_use" => {
                        // Input may be fully present up front or arrive as
                        // input_json_delta fragments; an empty object means
                        // fragments follow.
                        let arguments = match &block["input"] {
                            Value::Object(map) if !map.is_empty() => {
                                Some(Value::Object(map.clone()))
                            }
                            _ => None,
                        };
                        vec![RawSignal::ToolCallStart {
                            index,
                            id: block["id"].as_str().map(String::from),
                            name: block["name"].as_str().unwrap_or_default().to_string(),
                            arguments,
                        }]
                    }
                    "redacted_thinking" => vec![RawSignal::RedactedThinking(
                        block["data"].as_str().unwrap_or_default().to_string(),
                    )],
                    "text" | "thinking" => vec![],
                    _ => vec![RawSignal::Ignored],
                }
            }
            "content_block_delta" => {
                let delta = &raw["delta"];
                match delta["type"].as_str().unwrap_or_default() {
                    "text_delta" => vec![RawSignal::TextDelta(
                        delta["text"].as_str().unwrap_or_default().to_string(),
                    )],
                    "thinking_delta" => vec![RawSignal::ThinkingDelta(
                        delta["thinking"].as_str().unwrap_or_default().to_string(),
                    )],
                    "signature_delta" => vec![RawSignal::ThinkingSignature(
                        delta["signature"].as_str().unwrap_or_default().to_string(),
                    )],
                    "input_json_delta" => vec![RawSignal::ToolCallFragment {
                        index,
                        fragment: delta["partial_json"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string(),
                    }],
                    _ => vec![RawSignal::Ignored],
                }
            }
            "content_block_stop" => vec![RawSignal::BlockStop { index }],
            "message_delta" => {
                let usage = &raw["usage"];
                vec![RawSignal::Usage {
                    input_tokens: usage["input_tokens"].as_i64().unwrap_or(0) as i32,
                    output_tokens: usage["output_tokens"].as_i64().unwrap_or(0) as i32,
                }]
            }
            "message_stop" => vec![RawSignal::Done],
            "ping" => vec![],
            "error" => {
                return Err(ChatError::Transport(format!(
                    "anthropic API error: {}",
                    raw["error"]
                )))
            }
            _ => vec![RawSignal::Ignored],
        };
        Ok(signals)
    }
}
