use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::base::{
    ensure_message_renderable, ChatRequest, ProviderAdapter, RawEventStream, RawSignal,
    ResponseFormat,
};
use super::configs::OpenAiConfig;
use super::sse;
use super::utils::{classify_http_failure, sanitize_function_name};
use crate::errors::{ChatError, ChatResult};
use crate::models::content::Content;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::Tool;

pub struct OpenAiProvider {
    client: Client,
    config: OpenAiConfig,
}

impl OpenAiProvider {
    pub fn new(config: OpenAiConfig) -> ChatResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;
        Ok(Self { client, config })
    }
}

/// Convert canonical messages to OpenAI's API message specification.
///
/// Family invariants: each tool result becomes its own wire message with the
/// dedicated "tool" role and the originating call id; an assistant message
/// carries optional text plus zero or more tool_calls, but neither is an
/// error.
pub fn messages_to_openai_spec(messages: &[Message]) -> ChatResult<Vec<Value>> {
    let mut spec = Vec::new();

    for message in messages {
        ensure_message_renderable("openai", message)?;
        match message.role {
            Role::System => {
                spec.push(json!({"role": "system", "content": flat_text(message)}));
            }
            Role::User => {
                if message.has_tool_results() || message.has_tool_calls() {
                    return Err(ChatError::Conversion(
                        "openai: tool calls and results never ride in user messages".to_string(),
                    ));
                }
                spec.push(json!({"role": "user", "content": flat_text(message)}));
            }
            Role::Assistant => {
                if message.has_tool_results() {
                    return Err(ChatError::Conversion(
                        "openai: assistant message must not contain tool results".to_string(),
                    ));
                }
                let mut converted = Map::new();
                converted.insert("role".to_string(), json!("assistant"));
                let text = flat_text(message);
                if !text.is_empty() {
                    converted.insert("content".to_string(), json!(text));
                }
                let tool_calls: Vec<Value> = message
                    .tool_calls()
                    .iter()
                    .map(|call| {
                        json!({
                            "id": call.id,
                            "type": "function",
                            "function": {
                                "name": sanitize_function_name(&call.name),
                                "arguments": call.arguments.to_string(),
                            }
                        })
                    })
                    .collect();
                if !tool_calls.is_empty() {
                    converted.insert("tool_calls".to_string(), json!(tool_calls));
                }
                if !converted.contains_key("content") && !converted.contains_key("tool_calls") {
                    return Err(ChatError::Conversion(
                        "openai: assistant message carries neither text nor tool calls"
                            .to_string(),
                    ));
                }
                spec.push(Value::Object(converted));
            }
            Role::Tool => {
                let results = message.tool_results();
                if results.is_empty() {
                    return Err(ChatError::Conversion(
                        "openai: tool message has no tool results".to_string(),
                    ));
                }
                for result in results {
                    spec.push(json!({
                        "role": "tool",
                        "tool_call_id": result.tool_call_id,
                        "name": result.name,
                        "content": result.content,
                    }));
                }
            }
        }
    }

    Ok(spec)
}

/// Convert canonical tools to OpenAI's API tool specification
pub fn tools_to_openai_spec(tools: &[Tool]) -> ChatResult<Vec<Value>> {
    let mut tool_names = std::collections::HashSet::new();
    let mut result = Vec::new();

    for tool in tools {
        if !tool_names.insert(&tool.name) {
            return Err(ChatError::Conversion(format!(
                "openai: duplicate tool name: {}",
                tool.name
            )));
        }
        result.push(json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            }
        }));
    }

    Ok(result)
}

/// Reconstruct canonical messages from OpenAI wire messages. Consecutive
/// tool-role wire messages regroup into one canonical tool message.
pub fn openai_spec_to_messages(spec: &[Value]) -> ChatResult<Vec<Message>> {
    let mut messages: Vec<Message> = Vec::new();

    for wire in spec {
        let role = wire["role"].as_str().unwrap_or_default();
        match role {
            "system" => {
                messages
                    .push(Message::system().with_text(wire["content"].as_str().unwrap_or_default()));
            }
            "user" => {
                messages
                    .push(Message::user().with_text(wire["content"].as_str().unwrap_or_default()));
            }
            "assistant" => {
                let mut message = Message::assistant();
                if let Some(text) = wire["content"].as_str() {
                    message = message.with_text(text);
                }
                if let Some(calls) = wire["tool_calls"].as_array() {
                    for call in calls {
                        let arguments_raw = call["function"]["arguments"].as_str().unwrap_or("{}");
                        let arguments: Value =
                            serde_json::from_str(arguments_raw).map_err(|e| {
                                ChatError::Conversion(format!(
                                    "openai: tool call arguments are not valid JSON: {e}"
                                ))
                            })?;
                        message = message.with_tool_call(
                            call["id"].as_str().unwrap_or_default(),
                            call["function"]["name"].as_str().unwrap_or_default(),
                            arguments,
                        );
                    }
                }
                messages.push(message);
            }
            "tool" => {
                let content = wire["content"].as_str().unwrap_or_default().to_string();
                let error = serde_json::from_str::<Value>(&content)
                    .ok()
                    .and_then(|v| v["error"].as_str().map(String::from));
                let result = Content::tool_result(
                    wire["tool_call_id"].as_str().unwrap_or_default(),
                    wire["name"].as_str().unwrap_or_default(),
                    content,
                    error,
                );
                match messages.last_mut() {
                    Some(last) if last.role == Role::Tool => {
                        last.content.push(result);
                    }
                    _ => messages.push(Message::tool().with_content(result)),
                }
            }
            other => {
                return Err(ChatError::Conversion(format!(
                    "openai: unknown wire role '{other}'"
                )))
            }
        }
    }

    Ok(messages)
}

fn flat_text(message: &Message) -> String {
    message
        .content
        .iter()
        .filter_map(|c| match c {
            Content::Text(text) => Some(text.text.as_str()),
            Content::SystemReminder(reminder) => Some(reminder.text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("")
}

#[async_trait]
impl ProviderAdapter for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn render_wire(&self, request: &ChatRequest<'_>) -> ChatResult<Value> {
        let mut messages = Vec::new();
        if !request.system.is_empty() {
            messages.push(json!({"role": "system", "content": request.system}));
        }
        messages.extend(messages_to_openai_spec(request.messages)?);

        let mut payload = json!({
            "model": self.config.model,
            "messages": messages,
            "stream": true,
            "stream_options": {"include_usage": true},
        });
        let body = payload.as_object_mut().unwrap();
        if !request.tools.is_empty() {
            body.insert("tools".to_string(), json!(tools_to_openai_spec(request.tools)?));
        }
        if let Some(temperature) = request.temperature {
            body.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            body.insert("max_tokens".to_string(), json!(max_tokens));
        }
        if request.response_format == Some(ResponseFormat::Json) {
            body.insert("response_format".to_string(), json!({"type": "json_object"}));
        }
        Ok(payload)
    }

    async fn open_stream(
        &self,
        body: Value,
        cancel: CancellationToken,
    ) -> ChatResult<RawEventStream> {
        let url = format!(
            "{}/v1/chat/completions",
            self.config.host.trim_end_matches('/')
        );
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_failure("openai", status, &text));
        }
        Ok(sse::event_stream(response, cancel))
    }

    fn classify(&self, raw: &Value) -> ChatResult<Vec<RawSignal>> {
        if let Some(error) = raw.get("error") {
            return Err(ChatError::Transport(format!("openai API error: {error}")));
        }

        let mut signals = Vec::new();
        let mut recognized = false;

        if let Some(choices) = raw.get("choices").and_then(|v| v.as_array()) {
            recognized = true;
            for choice in choices {
                let delta = &choice["delta"];
                if let Some(text) = delta["content"].as_str() {
                    if !text.is_empty() {
                        signals.push(RawSignal::TextDelta(text.to_string()));
                    }
                }
                // DeepSeek-style reasoning rides next to content in this family.
                if let Some(reasoning) = delta["reasoning_content"].as_str() {
                    if !reasoning.is_empty() {
                        signals.push(RawSignal::ThinkingDelta(reasoning.to_string()));
                    }
                }
                if let Some(tool_calls) = delta["tool_calls"].as_array() {
                    for (position, call) in tool_calls.iter().enumerate() {
                        let index =
                            call["index"].as_u64().map(|i| i as usize).unwrap_or(position);
                        if let Some(name) = call["function"]["name"].as_str() {
                            if !name.is_empty() {
                                signals.push(RawSignal::ToolCallStart {
                                    index,
                                    id: call["id"].as_str().map(String::from),
                                    name: name.to_string(),
                                    arguments: None,
                                });
                            }
                        }
                        if let Some(fragment) = call["function"]["arguments"].as_str() {
                            if !fragment.is_empty() {
                                signals.push(RawSignal::ToolCallFragment {
                                    index,
                                    fragment: fragment.to_string(),
                                });
                            }
                        }
                    }
                }
                if choice["finish_reason"].as_str().is_some() {
                    signals.push(RawSignal::Done);
                }
            }
        }

        if let Some(usage) = raw.get("usage").filter(|v| v.is_object()) {
            recognized = true;
            let input = usage["prompt_tokens"].as_i64().unwrap_or(0) as i32;
            let output = usage["completion_tokens"].as_i64().unwrap_or(0) as i32;
            signals.push(RawSignal::Usage {
                input_tokens: input,
                output_tokens: output,
            });
        }

        if !recognized {
            return Ok(vec![RawSignal::Ignored]);
        }
        Ok(signals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_messages_to_openai_spec() -> ChatResult<()> {
        let message = Message::user().with_text("Hello");
        let spec = messages_to_openai_spec(&[message])?;

        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["role"], "user");
        assert_eq!(spec[0]["content"], "Hello");
        Ok(())
    }

    #[test]
    fn test_messages_to_openai_spec_complex() -> ChatResult<()> {
        let messages = vec![
            Message::assistant().with_text("Hello!"),
            Message::user().with_text("How are you?"),
            Message::assistant().with_tool_call(
                "tool1",
                "example",
                json!({"param1": "value1"}),
            ),
            Message::tool().with_tool_result("tool1", "example", "Result", None),
        ];

        let spec = messages_to_openai_spec(&messages)?;

        assert_eq!(spec.len(), 4);
        assert_eq!(spec[0]["role"], "assistant");
        assert_eq!(spec[0]["content"], "Hello!");
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(spec[2]["role"], "assistant");
        assert!(spec[2]["tool_calls"].is_array());
        assert_eq!(
            spec[2]["tool_calls"][0]["function"]["arguments"],
            json!({"param1": "value1"}).to_string()
        );
        assert_eq!(spec[3]["role"], "tool");
        assert_eq!(spec[3]["content"], "Result");
        assert_eq!(spec[3]["tool_call_id"], spec[2]["tool_calls"][0]["id"]);
        Ok(())
    }

    #[test]
    fn tool_message_fans_out_one_wire_message_per_result() -> ChatResult<()> {
        let message = Message::tool()
            .with_tool_result("call_1", "first", "one", None)
            .with_tool_result("call_2", "second", "two", None);
        let spec = messages_to_openai_spec(&[message])?;

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["tool_call_id"], "call_1");
        assert_eq!(spec[1]["tool_call_id"], "call_2");
        Ok(())
    }

    #[test]
    fn empty_and_blank_messages_fail_conversion() {
        assert!(messages_to_openai_spec(&[Message::user()]).is_err());
        assert!(messages_to_openai_spec(&[Message::user().with_text("  ")]).is_err());
        let empty_tool = Message::tool().with_tool_call("x", "y", json!({}));
        assert!(messages_to_openai_spec(&[empty_tool]).is_err());
    }

    #[test]
    fn assistant_with_tool_result_is_a_structural_error() {
        let message =
            Message::assistant().with_tool_result("call_1", "example", "Result", None);
        let err = messages_to_openai_spec(&[message]).unwrap_err();
        assert!(err.to_string().contains("assistant message"));
    }

    #[test]
    fn test_tools_to_openai_spec() -> ChatResult<()> {
        let tool = Tool::new(
            "test_tool",
            "A test tool",
            json!({
                "type": "object",
                "properties": {
                    "input": {"type": "string", "description": "Test parameter"}
                },
                "required": ["input"]
            }),
        );

        let spec = tools_to_openai_spec(&[tool])?;
        assert_eq!(spec.len(), 1);
        assert_eq!(spec[0]["type"], "function");
        assert_eq!(spec[0]["function"]["name"], "test_tool");
        Ok(())
    }

    #[test]
    fn test_tools_to_openai_spec_duplicate() {
        let tool = Tool::new("test_tool", "Test tool", json!({"type": "object"}));
        let result = tools_to_openai_spec(&[tool.clone(), tool]);
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("duplicate tool name"));
    }

    #[test]
    fn round_trip_reconstructs_equivalent_messages() -> ChatResult<()> {
        let original = vec![
            Message::user().with_text("What's the weather?"),
            Message::assistant()
                .with_text("Checking.")
                .with_tool_call("call_1", "get_weather", json!({"location": "SF"})),
            Message::tool()
                .with_tool_result("call_1", "get_weather", "sunny", None)
                .with_tool_result("call_1", "get_weather", r#"{"error": "flaky"}"#, Some("flaky".to_string())),
            Message::assistant().with_text("It's sunny."),
        ];

        let wire = messages_to_openai_spec(&original)?;
        let reconstructed = openai_spec_to_messages(&wire)?;

        assert_eq!(reconstructed.len(), original.len());
        for (a, b) in original.iter().zip(&reconstructed) {
            assert_eq!(a.role, b.role);
            assert_eq!(a.content, b.content);
        }
        Ok(())
    }

    #[test]
    fn classify_splits_content_tool_fragments_and_usage() -> ChatResult<()> {
        let provider = OpenAiProvider::new(OpenAiConfig {
            host: "http://localhost".to_string(),
            api_key: "test".to_string(),
            model: "gpt-4o".to_string(),
        })?;

        let chunk = json!({
            "choices": [{
                "index": 0,
                "delta": {
                    "tool_calls": [{
                        "index": 0,
                        "id": "call_123",
                        "function": {"name": "get_weather", "arguments": "{\"loc"}
                    }]
                }
            }]
        });
        let signals = provider.classify(&chunk)?;
        assert_eq!(signals.len(), 2);
        assert!(matches!(signals[0], RawSignal::ToolCallStart { index: 0, .. }));
        assert!(matches!(signals[1], RawSignal::ToolCallFragment { index: 0, .. }));

        let last = json!({
            "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}],
            "usage": {"prompt_tokens": 20, "completion_tokens": 15, "total_tokens": 35}
        });
        let signals = provider.classify(&last)?;
        assert!(signals.contains(&RawSignal::Done));
        assert!(signals.contains(&RawSignal::Usage {
            input_tokens: 20,
            output_tokens: 15
        }));

        let unknown = json!({"ping": true});
        assert_eq!(provider.classify(&unknown)?, vec![RawSignal::Ignored]);
        Ok(())
    }

    #[test]
    fn classify_surfaces_in_band_errors() -> ChatResult<()> {
        let provider = OpenAiProvider::new(OpenAiConfig {
            host: "http://localhost".to_string(),
            api_key: "test".to_string(),
            model: "gpt-4o".to_string(),
        })?;
        let err = provider
            .classify(&json!({"error": {"message": "overloaded"}}))
            .unwrap_err();
        assert!(matches!(err, ChatError::Transport(_)));
        Ok(())
    }

    #[test]
    fn render_wire_includes_sampling_and_format_options() -> ChatResult<()> {
        let provider = OpenAiProvider::new(OpenAiConfig {
            host: "http://localhost".to_string(),
            api_key: "test".to_string(),
            model: "gpt-4o".to_string(),
        })?;
        let messages = vec![Message::user().with_text("hi")];
        let tools = vec![Tool::new("echo", "Echo", json!({"type": "object"}))];
        let body = provider.render_wire(&ChatRequest {
            system: "You are helpful.",
            messages: &messages,
            tools: &tools,
            temperature: Some(0.5),
            max_tokens: Some(256),
            response_format: Some(ResponseFormat::Json),
        })?;

        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["temperature"], 0.5);
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["response_format"]["type"], "json_object");
        assert_eq!(body["tools"][0]["function"]["name"], "echo");
        Ok(())
    }
}
