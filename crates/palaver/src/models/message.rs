use chrono::Utc;
use serde_json::Value;

use super::content::Content;
use super::role::Role;

/// A message to or from an LLM
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Message {
    pub role: Role,
    pub created: i64,
    pub content: Vec<Content>,
}

impl Message {
    fn new(role: Role) -> Self {
        Message {
            role,
            created: Utc::now().timestamp(),
            content: Vec::new(),
        }
    }

    /// Create a new user message with the current timestamp
    pub fn user() -> Self {
        Message::new(Role::User)
    }

    /// Create a new assistant message with the current timestamp
    pub fn assistant() -> Self {
        Message::new(Role::Assistant)
    }

    /// Create a new tool message with the current timestamp
    pub fn tool() -> Self {
        Message::new(Role::Tool)
    }

    /// Create a new system message with the current timestamp
    pub fn system() -> Self {
        Message::new(Role::System)
    }

    /// Add any Content to the message
    pub fn with_content(mut self, content: Content) -> Self {
        self.content.push(content);
        self
    }

    /// Add text content to the message
    pub fn with_text<S: Into<String>>(self, text: S) -> Self {
        self.with_content(Content::text(text))
    }

    /// Add a tool call to the message
    pub fn with_tool_call<I, N>(self, id: I, name: N, arguments: Value) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        self.with_content(Content::tool_call(id, name, arguments))
    }

    /// Add a tool result to the message
    pub fn with_tool_result<I, N, C>(
        self,
        tool_call_id: I,
        name: N,
        content: C,
        error: Option<String>,
    ) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        C: Into<String>,
    {
        self.with_content(Content::tool_result(tool_call_id, name, content, error))
    }

    /// Add a thinking span to the message
    pub fn with_thinking<S: Into<String>>(
        self,
        text: S,
        signature: Option<String>,
        redacted_data: Option<String>,
    ) -> Self {
        self.with_content(Content::thinking(text, signature, redacted_data))
    }

    /// Concatenated text across all text content pieces
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| c.as_text())
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn tool_calls(&self) -> Vec<&super::content::ToolCallContent> {
        self.content.iter().filter_map(|c| c.as_tool_call()).collect()
    }

    pub fn tool_results(&self) -> Vec<&super::content::ToolResultContent> {
        self.content
            .iter()
            .filter_map(|c| c.as_tool_result())
            .collect()
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content.iter().any(|c| c.as_tool_call().is_some())
    }

    pub fn has_tool_results(&self) -> bool {
        self.content.iter().any(|c| c.as_tool_result().is_some())
    }

    pub fn has_text(&self) -> bool {
        self.content.iter().any(|c| c.as_text().is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builders_preserve_content_order() {
        let message = Message::assistant()
            .with_thinking("planning", Some("sig".into()), None)
            .with_text("Let me check the weather.")
            .with_tool_call("call_1", "get_weather", json!({"location": "SF"}));

        assert_eq!(message.role, Role::Assistant);
        assert_eq!(message.content.len(), 3);
        assert!(message.content[0].as_thinking().is_some());
        assert_eq!(message.text(), "Let me check the weather.");
        assert_eq!(message.tool_calls().len(), 1);
        assert_eq!(message.tool_calls()[0].name, "get_weather");
    }

    #[test]
    fn tool_message_accessors() {
        let message =
            Message::tool().with_tool_result("call_1", "get_weather", "sunny", None);
        assert!(message.has_tool_results());
        assert!(!message.has_tool_calls());
        assert_eq!(message.tool_results()[0].tool_call_id, "call_1");
        assert!(message.tool_results()[0].error.is_none());
    }

    #[test]
    fn serde_round_trip() {
        let message = Message::user().with_text("hello");
        let serialized = serde_json::to_string(&message).unwrap();
        let deserialized: Message = serde_json::from_str(&serialized).unwrap();
        assert_eq!(message, deserialized);
    }
}
