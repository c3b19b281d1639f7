use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use super::base::{ChatRequest, ProviderAdapter, RawEventStream, RawSignal};
use crate::errors::{ChatError, ChatResult};

/// A scripted adapter for testing the orchestrator without a network: each
/// `open_stream` call replays the next canned list of raw events, and every
/// rendered request body is recorded for assertions.
pub struct MockAdapter {
    scripts: Mutex<VecDeque<Vec<Value>>>,
    open_failures: Mutex<VecDeque<ChatError>>,
    requests: Mutex<Vec<Value>>,
    model: String,
}

impl MockAdapter {
    pub fn new(scripts: Vec<Vec<Value>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            open_failures: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            model: "mock-model".to_string(),
        }
    }

    /// Queue an error to be returned by the next `open_stream` call instead
    /// of a stream.
    pub fn fail_next_open(&self, error: ChatError) {
        self.open_failures.lock().unwrap().push_back(error);
    }

    /// Request bodies seen so far, in order
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn name(&self) -> &str {
        "mock"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn render_wire(&self, request: &ChatRequest<'_>) -> ChatResult<Value> {
        request.ensure_renderable("mock")?;
        Ok(json!({
            "system": request.system,
            "messages": request.messages,
            "tools": request.tools.iter().map(|t| t.name.clone()).collect::<Vec<_>>(),
            "temperature": request.temperature,
            "max_tokens": request.max_tokens,
        }))
    }

    async fn open_stream(
        &self,
        body: Value,
        _cancel: CancellationToken,
    ) -> ChatResult<RawEventStream> {
        self.requests.lock().unwrap().push(body);
        if let Some(error) = self.open_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let events = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatError::Transport("mock script exhausted".to_string()))?;
        let items: Vec<ChatResult<Value>> = events.into_iter().map(Ok).collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }

    fn classify(&self, raw: &Value) -> ChatResult<Vec<RawSignal>> {
        let signal = match raw["signal"].as_str().unwrap_or_default() {
            "text" => RawSignal::TextDelta(raw["text"].as_str().unwrap_or_default().to_string()),
            "thinking" => {
                RawSignal::ThinkingDelta(raw["text"].as_str().unwrap_or_default().to_string())
            }
            "signature" => {
                RawSignal::ThinkingSignature(raw["text"].as_str().unwrap_or_default().to_string())
            }
            "tool_start" => RawSignal::ToolCallStart {
                index: raw["index"].as_u64().unwrap_or(0) as usize,
                id: raw["id"].as_str().map(String::from),
                name: raw["name"].as_str().unwrap_or_default().to_string(),
                arguments: raw.get("arguments").cloned(),
            },
            "tool_fragment" => RawSignal::ToolCallFragment {
                index: raw["index"].as_u64().unwrap_or(0) as usize,
                fragment: raw["fragment"].as_str().unwrap_or_default().to_string(),
            },
            "block_stop" => RawSignal::BlockStop {
                index: raw["index"].as_u64().unwrap_or(0) as usize,
            },
            "usage" => RawSignal::Usage {
                input_tokens: raw["input"].as_i64().unwrap_or(0) as i32,
                output_tokens: raw["output"].as_i64().unwrap_or(0) as i32,
            },
            "done" => RawSignal::Done,
            "error" => {
                return Err(ChatError::Transport(
                    raw["message"].as_str().unwrap_or("mock error").to_string(),
                ))
            }
            _ => RawSignal::Ignored,
        };
        Ok(vec![signal])
    }
}
