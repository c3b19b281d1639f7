use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::errors::{ToolError, ToolResult};
use crate::models::tool::Tool;
use crate::providers::utils::is_valid_function_name;

/// Handler invoked when a model calls a registered tool. The cancellation
/// token is the one threaded through the whole exchange, so a cancelled
/// `message` call also cancels in-flight tool execution.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, arguments: Value, cancel: CancellationToken) -> ToolResult<String>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> ToolHandler for FnHandler<F>
where
    F: Fn(Value) -> ToolResult<String> + Send + Sync,
{
    async fn call(&self, arguments: Value, _cancel: CancellationToken) -> ToolResult<String> {
        (self.0)(arguments)
    }
}

/// Wrap a plain synchronous function as a tool handler.
pub fn tool_fn<F>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(Value) -> ToolResult<String> + Send + Sync + 'static,
{
    Arc::new(FnHandler(f))
}

struct RegisteredTool {
    tool: Tool,
    handler: Arc<dyn ToolHandler>,
}

/// Name-keyed collection of callable tools. Registration order is preserved
/// so tool listings, and the order tools are advertised to a provider, are
/// deterministic. Re-registering a name replaces the handler in place.
#[derive(Default)]
pub struct ToolRegistry {
    entries: Mutex<Vec<RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, tool: Tool, handler: Arc<dyn ToolHandler>) -> ToolResult<()> {
        if !is_valid_function_name(&tool.name) {
            return Err(ToolError::InvalidName(format!(
                "'{}' must match [a-zA-Z0-9_-]+",
                tool.name
            )));
        }
        let mut entries = self.entries.lock().unwrap();
        if let Some(existing) = entries.iter_mut().find(|e| e.tool.name == tool.name) {
            existing.tool = tool;
            existing.handler = handler;
        } else {
            entries.push(RegisteredTool { tool, handler });
        }
        Ok(())
    }

    pub fn deregister(&self, name: &str) {
        self.entries
            .lock()
            .unwrap()
            .retain(|e| e.tool.name != name);
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.tool.name.clone())
            .collect()
    }

    /// Tool definitions in registration order, as advertised on the wire
    pub fn definitions(&self) -> Vec<Tool> {
        self.entries
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.tool.clone())
            .collect()
    }

    /// Look up and invoke a handler. The lock is released before the handler
    /// runs, so a slow tool cannot block registration or listing.
    pub async fn execute(
        &self,
        name: &str,
        arguments: Value,
        cancel: CancellationToken,
    ) -> ToolResult<String> {
        let handler = {
            let entries = self.entries.lock().unwrap();
            entries
                .iter()
                .find(|e| e.tool.name == name)
                .map(|e| e.handler.clone())
        };
        match handler {
            Some(handler) => handler.call(arguments, cancel).await,
            None => Err(ToolError::NotFound(name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_tool(name: &str) -> Tool {
        Tool::new(
            name,
            "Echoes back the input",
            json!({"type": "object", "properties": {"message": {"type": "string"}}, "required": ["message"]}),
        )
    }

    #[tokio::test]
    async fn registration_order_is_preserved() {
        let registry = ToolRegistry::new();
        for name in ["charlie", "alpha", "bravo"] {
            registry
                .register(echo_tool(name), tool_fn(|_| Ok(String::new())))
                .unwrap();
        }
        assert_eq!(registry.names(), vec!["charlie", "alpha", "bravo"]);
    }

    #[tokio::test]
    async fn reregistering_replaces_handler_without_moving() {
        let registry = ToolRegistry::new();
        registry
            .register(echo_tool("alpha"), tool_fn(|_| Ok("old".to_string())))
            .unwrap();
        registry
            .register(echo_tool("bravo"), tool_fn(|_| Ok("bravo".to_string())))
            .unwrap();
        registry
            .register(echo_tool("alpha"), tool_fn(|_| Ok("new".to_string())))
            .unwrap();

        assert_eq!(registry.names(), vec!["alpha", "bravo"]);
        let result = registry
            .execute("alpha", json!({}), CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, "new");
    }

    #[tokio::test]
    async fn unknown_tool_returns_typed_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .execute("missing", json!({}), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::NotFound("missing".to_string()));
    }

    #[tokio::test]
    async fn invalid_name_is_rejected_at_registration() {
        let registry = ToolRegistry::new();
        let err = registry
            .register(echo_tool("bad name"), tool_fn(|_| Ok(String::new())))
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidName(_)));
    }

    #[tokio::test]
    async fn deregister_removes_entry() {
        let registry = ToolRegistry::new();
        registry
            .register(echo_tool("alpha"), tool_fn(|_| Ok(String::new())))
            .unwrap();
        registry.deregister("alpha");
        assert!(registry.names().is_empty());
    }
}
