use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallContent {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultContent {
    pub tool_call_id: String,
    pub name: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThinkingContent {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redacted_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemReminderContent {
    pub text: String,
}

/// One piece of a message. Exactly one variant is populated; a message with
/// zero content pieces is invalid and is rejected at conversion time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text(TextContent),
    ToolCall(ToolCallContent),
    ToolResult(ToolResultContent),
    Thinking(ThinkingContent),
    SystemReminder(SystemReminderContent),
}

impl Content {
    pub fn text<S: Into<String>>(text: S) -> Self {
        Content::Text(TextContent { text: text.into() })
    }

    pub fn tool_call<I, N>(id: I, name: N, arguments: Value) -> Self
    where
        I: Into<String>,
        N: Into<String>,
    {
        Content::ToolCall(ToolCallContent {
            id: id.into(),
            name: name.into(),
            arguments,
        })
    }

    pub fn tool_result<I, N, C>(tool_call_id: I, name: N, content: C, error: Option<String>) -> Self
    where
        I: Into<String>,
        N: Into<String>,
        C: Into<String>,
    {
        Content::ToolResult(ToolResultContent {
            tool_call_id: tool_call_id.into(),
            name: name.into(),
            content: content.into(),
            error,
        })
    }

    pub fn thinking<S: Into<String>>(
        text: S,
        signature: Option<String>,
        redacted_data: Option<String>,
    ) -> Self {
        Content::Thinking(ThinkingContent {
            text: text.into(),
            signature,
            redacted_data,
        })
    }

    pub fn system_reminder<S: Into<String>>(text: S) -> Self {
        Content::SystemReminder(SystemReminderContent { text: text.into() })
    }

    /// Get the text if this is a Text variant
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Content::Text(text) => Some(&text.text),
            _ => None,
        }
    }

    pub fn as_tool_call(&self) -> Option<&ToolCallContent> {
        match self {
            Content::ToolCall(call) => Some(call),
            _ => None,
        }
    }

    pub fn as_tool_result(&self) -> Option<&ToolResultContent> {
        match self {
            Content::ToolResult(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_thinking(&self) -> Option<&ThinkingContent> {
        match self {
            Content::Thinking(thinking) => Some(thinking),
            _ => None,
        }
    }
}
