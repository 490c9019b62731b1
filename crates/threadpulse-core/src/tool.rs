//! Tools the chat model may call from the agentic loop.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use threadpulse_provider::ToolDef;

/// Text handed back to the model as a tool result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutput {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Name, description and JSON schema advertised to the model.
    fn definition(&self) -> ToolDef;

    /// `Err` is reserved for failures of the tool itself; problems the model
    /// should read about go in an error [`ToolOutput`].
    async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput>;
}

/// Tools keyed by their advertised name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolExecutor>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn ToolExecutor>) {
        let name = tool.definition().name;
        self.tools.insert(name, tool);
    }

    /// Definitions sorted by name, so requests are stable.
    pub fn tool_defs(&self) -> Vec<ToolDef> {
        let mut defs: Vec<ToolDef> = self.tools.values().map(|t| t.definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run a tool by name. An unknown name is reported back to the model
    /// rather than failing the turn.
    pub async fn execute(&self, name: &str, input: serde_json::Value) -> Result<ToolOutput> {
        match self.tools.get(name) {
            Some(tool) => tool.execute(input).await,
            None => {
                tracing::warn!("Model requested unknown tool {name}");
                Ok(ToolOutput::error(format!("Unknown tool: {name}")))
            }
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl ToolExecutor for EchoTool {
        fn definition(&self) -> ToolDef {
            ToolDef {
                name: "echo".into(),
                description: "Echo input".into(),
                input_schema: serde_json::json!({
                    "type": "object",
                    "properties": {
                        "text": {"type": "string"}
                    },
                    "required": ["text"]
                }),
            }
        }

        async fn execute(&self, input: serde_json::Value) -> Result<ToolOutput> {
            Ok(ToolOutput::ok(input["text"].as_str().unwrap_or("")))
        }
    }

    #[test]
    fn registry_register_and_list() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let defs = registry.tool_defs();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].name, "echo");
        assert!(registry.contains("echo"));
    }

    #[tokio::test]
    async fn registry_execute_known_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let result = registry
            .execute("echo", serde_json::json!({"text": "hello"}))
            .await
            .unwrap();
        assert_eq!(result, ToolOutput::ok("hello"));
    }

    #[tokio::test]
    async fn unknown_tool_is_reported_to_the_model() {
        let registry = ToolRegistry::new();
        let result = registry
            .execute("nonexistent", serde_json::json!({}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.content, "Unknown tool: nonexistent");
    }
}
