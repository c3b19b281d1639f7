use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by a `Chat::message` call.
///
/// Every variant except `UnsupportedParameter` is fatal to the current call.
/// `UnsupportedParameter` is consumed internally: the request is rebuilt once
/// without the offending sampling parameter and re-issued, and only surfaces
/// if the retry itself fails.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ChatError {
    #[error("structural conversion error: {0}")]
    Conversion(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("model rejected a sampling parameter: {0}")]
    UnsupportedParameter(String),

    #[error("event callback aborted the stream: {0}")]
    CallbackAborted(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("tool round limit of {0} exceeded")]
    RoundLimitExceeded(usize),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        ChatError::Transport(err.to_string())
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

/// Errors produced by tool registration and execution. Execution failures are
/// recovered locally: the orchestrator folds them into a tool-result payload
/// and the conversation continues.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Invalid tool name: {0}")]
    InvalidName(String),

    #[error("Tool execution failed: {0}")]
    Execution(String),
}

pub type ToolResult<T> = Result<T, ToolError>;
