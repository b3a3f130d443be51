//! Tool handler trait, the tool registry and argument helpers.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};
use crate::mcp::progress::ProgressEmitter;
use crate::mcp::protocol::{ContentBlock, Tool, ToolResult};

/// Per-invocation context handed to a tool.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Progress side channel; disabled when the caller sent no token.
    pub progress: ProgressEmitter,
    /// Cancelled when the caller goes away or asks to stop.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(progress: ProgressEmitter, cancel: CancellationToken) -> Self {
        Self { progress, cancel }
    }

    /// Fail fast if the invocation has been cancelled.
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(Error::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Handler for MCP tool calls.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Get the tool definition.
    fn definition(&self) -> Tool;

    /// Execute the tool. Arguments have already been checked against the input schema.
    async fn execute(&self, arguments: HashMap<String, Value>, ctx: ToolContext)
        -> Result<ToolResult>;
}

/// Registry of tool handlers, fixed for the life of the process.
#[derive(Default)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool handler. Names are unique; a second handler with a taken name is refused.
    pub fn register<T: ToolHandler + 'static>(&mut self, handler: T) -> Result<()> {
        self.register_arc(Arc::new(handler))
    }

    pub fn register_arc(&mut self, handler: Arc<dyn ToolHandler>) -> Result<()> {
        let tool = handler.definition();
        if self.tools.contains_key(&tool.name) {
            return Err(Error::Config(format!("duplicate tool name: {}", tool.name)));
        }
        self.tools.insert(tool.name, handler);
        Ok(())
    }

    /// All tool definitions, ordered by name.
    pub fn list_tools(&self) -> Vec<Tool> {
        self.tools.values().map(|h| h.definition()).collect()
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn tool_count(&self) -> usize {
        self.tools.len()
    }
}

/// Check arguments against a JSON-schema-like object.
///
/// Only `required` and primitive `type` constraints on top-level properties
/// are enforced.
pub fn validate_arguments(schema: &Value, args: &HashMap<String, Value>) -> Result<()> {
    if let Some(required) = schema.get("required").and_then(Value::as_array) {
        for name in required.iter().filter_map(Value::as_str) {
            match args.get(name) {
                None | Some(Value::Null) => {
                    return Err(Error::InvalidArguments(format!(
                        "missing required argument: {}",
                        name
                    )))
                }
                Some(_) => {}
            }
        }
    }

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(());
    };

    for (name, value) in args {
        let Some(expected) = properties
            .get(name)
            .and_then(|p| p.get("type"))
            .and_then(Value::as_str)
        else {
            continue;
        };
        if value.is_null() {
            continue;
        }
        if !matches_type(expected, value) {
            return Err(Error::InvalidArguments(format!(
                "argument '{}' must be of type {}",
                name, expected
            )));
        }
    }

    Ok(())
}

fn matches_type(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        _ => true,
    }
}

/// Helper macro for creating tool input schemas.
#[macro_export]
macro_rules! tool_schema {
    (required: [$($req:expr),* $(,)?], $($json:tt)+) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $($json)+
            },
            "required": [$($req),*]
        })
    };
    ($($json:tt)+) => {
        serde_json::json!({
            "type": "object",
            "properties": {
                $($json)+
            }
        })
    };
}

/// Helper to create a text content block.
pub fn text_content(text: impl Into<String>) -> ContentBlock {
    ContentBlock::Text { text: text.into() }
}

/// Helper to create a successful tool result.
pub fn success_result(text: impl Into<String>) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        structured_content: None,
        is_error: false,
    }
}

/// Successful result with a typed payload alongside the text.
pub fn structured_result(text: impl Into<String>, structured: Value) -> ToolResult {
    ToolResult {
        content: vec![text_content(text)],
        structured_content: Some(structured),
        is_error: false,
    }
}

/// Helper to extract a required string argument.
pub fn get_string_arg(args: &HashMap<String, Value>, name: &str) -> Result<String> {
    args.get(name)
        .and_then(|v| v.as_str())
        .map(String::from)
        .ok_or_else(|| Error::InvalidArguments(format!("missing required argument: {}", name)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoTool {
        name: String,
    }

    #[async_trait]
    impl ToolHandler for EchoTool {
        fn definition(&self) -> Tool {
            Tool {
                name: self.name.clone(),
                description: format!("Test tool: {}", self.name),
                input_schema: tool_schema!(required: ["input"], "input": { "type": "string" }),
                output_schema: None,
            }
        }

        async fn execute(
            &self,
            args: HashMap<String, Value>,
            ctx: ToolContext,
        ) -> Result<ToolResult> {
            ctx.check_cancelled()?;
            let input = get_string_arg(&args, "input")?;
            Ok(success_result(format!("Executed {} with: {}", self.name, input)))
        }
    }

    fn args(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_registry_registration() {
        let mut registry = ToolRegistry::new();
        registry
            .register(EchoTool {
                name: "echo".to_string(),
            })
            .unwrap();

        assert_eq!(registry.tool_count(), 1);
        assert!(registry.has_tool("echo"));
        assert!(!registry.has_tool("nonexistent"));
    }

    #[test]
    fn test_registry_refuses_duplicate_name() {
        let mut registry = ToolRegistry::new();
        registry
            .register(EchoTool {
                name: "echo".to_string(),
            })
            .unwrap();

        let err = registry
            .register(EchoTool {
                name: "echo".to_string(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("echo")));
        assert_eq!(registry.tool_count(), 1);
    }

    #[test]
    fn test_registry_lists_in_name_order() {
        let mut registry = ToolRegistry::new();
        registry
            .register(EchoTool {
                name: "tool_b".to_string(),
            })
            .unwrap();
        registry
            .register(EchoTool {
                name: "tool_a".to_string(),
            })
            .unwrap();

        let names: Vec<_> = registry.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["tool_a", "tool_b"]);
    }

    #[tokio::test]
    async fn test_tool_execution() {
        let mut registry = ToolRegistry::new();
        registry
            .register(EchoTool {
                name: "echo".to_string(),
            })
            .unwrap();

        let tool = registry.get_tool("echo").unwrap();
        let result = tool
            .execute(args(&[("input", json!("hello"))]), ToolContext::default())
            .await
            .unwrap();
        assert!(!result.is_error);

        let ContentBlock::Text { text } = &result.content[0];
        assert!(text.contains("Executed echo with: hello"));
    }

    #[tokio::test]
    async fn test_cancelled_context() {
        let tool = EchoTool {
            name: "echo".to_string(),
        };
        let ctx = ToolContext::default();
        ctx.cancel.cancel();

        let result = tool.execute(args(&[("input", json!("x"))]), ctx).await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn test_validate_required() {
        let schema = tool_schema!(
            required: ["hero1", "hero2"],
            "hero1": { "type": "string" },
            "hero2": { "type": "string" }
        );

        assert!(validate_arguments(
            &schema,
            &args(&[("hero1", json!("Thor")), ("hero2", json!("Loki"))])
        )
        .is_ok());

        let missing = validate_arguments(&schema, &args(&[("hero1", json!("Thor"))]));
        assert!(matches!(missing, Err(Error::InvalidArguments(ref m)) if m.contains("hero2")));

        let null = validate_arguments(
            &schema,
            &args(&[("hero1", json!("Thor")), ("hero2", Value::Null)]),
        );
        assert!(null.is_err());
    }

    #[test]
    fn test_validate_types() {
        let schema = tool_schema!(
            "name": { "type": "string" },
            "count": { "type": "integer" },
            "ratio": { "type": "number" },
            "flag": { "type": "boolean" }
        );

        assert!(validate_arguments(
            &schema,
            &args(&[
                ("name", json!("x")),
                ("count", json!(3)),
                ("ratio", json!(0.5)),
                ("flag", json!(true)),
                ("extra", json!({"free": "form"})),
            ])
        )
        .is_ok());

        assert!(validate_arguments(&schema, &args(&[("name", json!(42))])).is_err());
        assert!(validate_arguments(&schema, &args(&[("count", json!(1.5))])).is_err());
        assert!(validate_arguments(&schema, &args(&[("flag", json!("yes"))])).is_err());
    }

    #[test]
    fn test_get_string_arg() {
        let args = args(&[("name", json!("value")), ("number", json!(1))]);

        assert_eq!(get_string_arg(&args, "name").unwrap(), "value");
        assert!(matches!(
            get_string_arg(&args, "missing"),
            Err(Error::InvalidArguments(_))
        ));
        assert!(get_string_arg(&args, "number").is_err());
    }

    #[test]
    fn test_result_helpers() {
        let plain = success_result("Success!");
        assert!(!plain.is_error);
        assert!(plain.structured_content.is_none());

        let structured = structured_result("Hulk: 40", json!({"hero": "Hulk", "power": 40}));
        assert_eq!(structured.structured_content.unwrap()["power"], 40);
    }
}
