use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;

use super::base::{
    ensure_message_renderable, ChatRequest, ProviderAdapter, RawEventStream, RawSignal,
    ResponseFormat,
};
use super::configs::GoogleConfig;
use super::sse;
use super::utils::classify_http_failure;
use crate::errors::{ChatError, ChatResult};
use crate::models::content::Content;
use crate::models::message::Message;
use crate::models::role::Role;
use crate::models::tool::Tool;

pub struct GoogleProvider {
    client: Client,
    config: GoogleConfig,
}

impl GoogleProvider {
    pub fn new(config: GoogleConfig) -> ChatResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;
        Ok(Self { client, config })
    }
}

/// Convert canonical messages to Gemini's contents specification.
///
/// Family invariant: tool calls and results are typed parts embedded directly
/// in content, not separate roles. The wire carries no call ids; pairing is
/// by function name.
pub fn messages_to_google_spec(messages: &[Message]) -> ChatResult<Vec<Value>> {
    let mut spec = Vec::new();

    for message in messages {
        ensure_message_renderable("google", message)?;
        match message.role {
            Role::System => {
                return Err(ChatError::Conversion(
                    "google: system text belongs in systemInstruction, not the contents"
                        .to_string(),
                ));
            }
            Role::User => {
                if message.has_tool_results() || message.has_tool_calls() {
                    return Err(ChatError::Conversion(
                        "google: tool calls and results never ride in plain user messages"
                            .to_string(),
                    ));
                }
                let parts: Vec<Value> = message
                    .content
                    .iter()
                    .filter_map(|content| match content {
                        Content::Text(text) => Some(json!({"text": text.text})),
                        Content::SystemReminder(reminder) => {
                            Some(json!({"text": reminder.text}))
                        }
                        _ => None,
                    })
                    .collect();
                spec.push(json!({"role": "user", "parts": parts}));
            }
            Role::Assistant => {
                let mut parts = Vec::new();
                for content in &message.content {
                    match content {
                        Content::Thinking(thinking) => {
                            if thinking.text.is_empty() {
                                continue;
                            }
                            let mut part = Map::new();
                            part.insert("text".to_string(), json!(thinking.text));
                            part.insert("thought".to_string(), json!(true));
                            if let Some(signature) = &thinking.signature {
                                part.insert("thoughtSignature".to_string(), json!(signature));
                            }
                            parts.push(Value::Object(part));
                        }
                        Content::Text(text) => parts.push(json!({"text": text.text})),
                        Content::ToolCall(call) => parts.push(json!({
                            "functionCall": {"name": call.name, "args": call.arguments}
                        })),
                        Content::ToolResult(_) => {
                            return Err(ChatError::Conversion(
                                "google: assistant message must not contain tool results"
                                    .to_string(),
                            ));
                        }
                        Content::SystemReminder(reminder) => {
                            parts.push(json!({"text": reminder.text}))
                        }
                    }
                }
                spec.push(json!({"role": "model", "parts": parts}));
            }
            Role::Tool => {
                let results = message.tool_results();
                if results.is_empty() {
                    return Err(ChatError::Conversion(
                        "google: tool message has no tool results".to_string(),
                    ));
                }
                let parts: Vec<Value> = results
                    .iter()
                    .map(|result| {
                        let mut response = Map::new();
                        response.insert("content".to_string(), json!(result.content));
                        if let Some(error) = &result.error {
                            response.insert("error".to_string(), json!(error));
                        }
                        json!({
                            "functionResponse": {"name": result.name, "response": response}
                        })
                    })
                    .collect();
                spec.push(json!({"role": "user", "parts": parts}));
            }
        }
    }

    Ok(spec)
}

/// Convert canonical tools to Gemini's functionDeclarations specification
pub fn tools_to_google_spec(tools: &[Tool]) -> Vec<Value> {
    tools
        .iter()
        .map(|tool| {
            json!({
                "name": tool.name,
                "description": tool.description,
                "parameters": tool.input_schema,
            })
        })
        .collect()
}

/// Reconstruct canonical messages from Gemini contents. The wire carries no
/// call ids, so reconstructed tool calls get minted ids and reconstructed
/// results keep an empty id; equivalence for this family is modulo ids.
pub fn google_spec_to_messages(spec: &[Value]) -> ChatResult<Vec<Message>> {
    let mut messages = Vec::new();

    for wire in spec {
        let role = wire["role"].as_str().unwrap_or_default();
        let parts = wire["parts"].as_array().cloned().unwrap_or_default();
        let is_tool_turn = parts.iter().any(|p| p.get("functionResponse").is_some());

        if is_tool_turn {
            let mut message = Message::tool();
            for part in &parts {
                let Some(response) = part.get("functionResponse") else {
                    continue;
                };
                let payload = &response["response"];
                message = message.with_tool_result(
                    "",
                    response["name"].as_str().unwrap_or_default(),
                    payload["content"].as_str().unwrap_or_default(),
                    payload["error"].as_str().map(String::from),
                );
            }
            messages.push(message);
            continue;
        }

        let mut message = match role {
            "user" => Message::user(),
            "model" => Message::assistant(),
            other => {
                return Err(ChatError::Conversion(format!(
                    "google: unknown wire role '{other}'"
                )))
            }
        };
        for part in &parts {
            if let Some(call) = part.get("functionCall") {
                message = message.with_tool_call(
                    format!("call_{}", uuid::Uuid::new_v4()),
                    call["name"].as_str().unwrap_or_default(),
                    call["args"].clone(),
                );
            } else if part["thought"].as_bool().unwrap_or(false) {
                message = message.with_thinking(
                    part["text"].as_str().unwrap_or_default(),
                    part["thoughtSignature"].as_str().map(String::from),
                    None,
                );
            } else if let Some(text) = part["text"].as_str() {
                message = message.with_text(text);
            }
        }
        messages.push(message);
    }

    Ok(messages)
}

#[async_trait]
impl ProviderAdapter for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn model(&self) -> &str {
        &self.config.model
    }

    fn render_wire(&self, request: &ChatRequest<'_>) -> ChatResult<Value> {
        let mut payload = json!({
            "contents": messages_to_google_spec(request.messages)?,
        });
        let body = payload.as_object_mut().unwrap();
        if !request.system.is_empty() {
            body.insert(
                "systemInstruction".to_string(),
                json!({"parts": [{"text": request.system}]}),
            );
        }
        if !request.tools.is_empty() {
            body.insert(
                "tools".to_string(),
                json!([{"functionDeclarations": tools_to_google_spec(request.tools)}]),
            );
        }
        let mut generation = Map::new();
        if let Some(temperature) = request.temperature {
            generation.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if request.response_format == Some(ResponseFormat::Json) {
            generation.insert("responseMimeType".to_string(), json!("application/json"));
        }
        if !generation.is_empty() {
            body.insert("generationConfig".to_string(), Value::Object(generation));
        }
        Ok(payload)
    }

    async fn open_stream(
        &self,
        body: Value,
        cancel: CancellationToken,
    ) -> ChatResult<RawEventStream> {
        let url = format!(
            "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
            self.config.host.trim_end_matches('/'),
            self.config.model,
        );
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_http_failure("google", status, &text));
        }
        Ok(sse::event_stream(response, cancel))
    }

    fn classify(&self, raw: &Value) -> ChatResult<Vec<RawSignal>> {
        if let Some(error) = raw.get("error") {
            return Err(ChatError::Transport(format!("google API error: {error}")));
        }

        let mut signals = Vec::new();
        let mut recognized = false;

        if let Some(candidates) = raw.get("candidates").and_then(|v| v.as_array()) {
            recognized = true;
            for candidate in candidates {
                let parts = candidate["content"]["parts"]
                    .as_array()
                    .cloned()
                    .unwrap_or_default();
                for (index, part) in parts.iter().enumerate() {
                    if let Some(call) = part.get("functionCall") {
                        // Arguments always arrive complete; pairing ids are
                        // minted downstream.
                        signals.push(RawSignal::ToolCallStart {
                            index,
                            id: None,
                            name: call["name"].as_str().unwrap_or_default().to_string(),
                            arguments: Some(
                                call.get("args").cloned().unwrap_or_else(|| json!({})),
                            ),
                        });
                    } else if part["thought"].as_bool().unwrap_or(false) {
                        if let Some(text) = part["text"].as_str() {
                            if !text.is_empty() {
                                signals.push(RawSignal::ThinkingDelta(text.to_string()));
                            }
                        }
                        if let Some(signature) = part["thoughtSignature"].as_str() {
                            signals.push(RawSignal::ThinkingSignature(signature.to_string()));
                        }
                    } else if let Some(text) = part["text"].as_str() {
                        if !text.is_empty() {
                            signals.push(RawSignal::TextDelta(text.to_string()));
                        }
                    }
                }
                if candidate["finishReason"].as_str().is_some() {
                    signals.push(RawSignal::Done);
                }
            }
        }

        if let Some(usage) = raw.get("usageMetadata") {
            recognized = true;
            signals.push(RawSignal::Usage {
                input_tokens: usage["promptTokenCount"].as_i64().unwrap_or(0) as i32,
                output_tokens: usage["candidatesTokenCount"].as_i64().unwrap_or(0) as i32,
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

    fn provider() -> GoogleProvider {
        GoogleProvider::new(GoogleConfig {
            host: "http://localhost".to_string(),
            api_key: "test".to_string(),
            model: "gemini-1.5-pro".to_string(),
        })
        .unwrap()
    }

    #[test]
    fn calls_and_results_are_typed_parts_in_content() -> ChatResult<()> {
        let messages = vec![
            Message::assistant().with_tool_call("call_1", "get_weather", json!({"location": "SF"})),
            Message::tool().with_tool_result("call_1", "get_weather", "sunny", None),
        ];
        let spec = messages_to_google_spec(&messages)?;

        assert_eq!(spec.len(), 2);
        assert_eq!(spec[0]["role"], "model");
        assert_eq!(spec[0]["parts"][0]["functionCall"]["name"], "get_weather");
        assert_eq!(spec[1]["role"], "user");
        assert_eq!(
            spec[1]["parts"][0]["functionResponse"]["response"]["content"],
            "sunny"
        );
        Ok(())
    }

    #[test]
    fn empty_and_blank_messages_fail_conversion() {
        assert!(messages_to_google_spec(&[Message::user()]).is_err());
        assert!(messages_to_google_spec(&[Message::user().with_text("\t")]).is_err());
        let empty_tool = Message::tool().with_tool_call("x", "y", json!({}));
        assert!(messages_to_google_spec(&[empty_tool]).is_err());
    }

    #[test]
    fn round_trip_is_equivalent_modulo_call_ids() -> ChatResult<()> {
        let original = vec![
            Message::user().with_text("What's the weather?"),
            Message::assistant()
                .with_text("Checking.")
                .with_tool_call("call_1", "get_weather", json!({"location": "SF"})),
            Message::tool().with_tool_result(
                "call_1",
                "get_weather",
                r#"{"error": "offline"}"#,
                Some("offline".to_string()),
            ),
            Message::assistant().with_text("Offline, sorry."),
        ];

        let wire = messages_to_google_spec(&original)?;
        let reconstructed = google_spec_to_messages(&wire)?;

        assert_eq!(reconstructed.len(), original.len());
        for (a, b) in original.iter().zip(&reconstructed) {
            assert_eq!(a.role, b.role);
            assert_eq!(a.content.len(), b.content.len());
        }
        let call = reconstructed[1].tool_calls()[0];
        assert_eq!(call.name, "get_weather");
        assert_eq!(call.arguments, json!({"location": "SF"}));
        let result = reconstructed[2].tool_results()[0];
        assert_eq!(result.name, "get_weather");
        assert_eq!(result.error.as_deref(), Some("offline"));
        Ok(())
    }

    #[test]
    fn classify_maps_parts_finish_and_usage() -> ChatResult<()> {
        let provider = provider();
        let chunk = json!({
            "candidates": [{
                "content": {"role": "model", "parts": [
                    {"text": "thinking about it", "thought": true},
                    {"text": "Here you go: "},
                    {"functionCall": {"name": "get_weather", "args": {"location": "SF"}}}
                ]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3}
        });

        let signals = provider.classify(&chunk)?;
        assert_eq!(signals.len(), 5);
        assert!(matches!(signals[0], RawSignal::ThinkingDelta(_)));
        assert!(matches!(signals[1], RawSignal::TextDelta(_)));
        assert!(matches!(
            signals[2],
            RawSignal::ToolCallStart {
                arguments: Some(_),
                ..
            }
        ));
        assert_eq!(signals[3], RawSignal::Done);
        assert_eq!(
            signals[4],
            RawSignal::Usage {
                input_tokens: 7,
                output_tokens: 3
            }
        );
        Ok(())
    }

    #[test]
    fn render_wire_places_system_and_generation_config() -> ChatResult<()> {
        let provider = provider();
        let messages = vec![Message::user().with_text("hi")];
        let body = provider.render_wire(&ChatRequest {
            system: "Be terse.",
            messages: &messages,
            tools: &[],
            temperature: Some(0.25),
            max_tokens: Some(128),
            response_format: Some(ResponseFormat::Json),
        })?;

        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "Be terse.");
        assert_eq!(body["generationConfig"]["temperature"], 0.25);
        assert_eq!(body["generationConfig"]["maxOutputTokens"], 128);
        assert_eq!(
            body["generationConfig"]["responseMimeType"],
            "application/json"
        );
        Ok(())
    }
}
