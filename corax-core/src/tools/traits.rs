//! Tool trait and the registry contract.

use async_trait::async_trait;
use serde_json::{Map, Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Execution context handed to every tool invocation.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    /// Cooperative cancellation; long-running tools must return promptly
    /// once this fires.
    pub cancel: CancellationToken,
}

impl ToolContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

/// JSON-schema-style primitive types for tool arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ArgType {
    pub fn as_schema_str(&self) -> &'static str {
        match self {
            ArgType::String => "string",
            ArgType::Number => "number",
            ArgType::Integer => "integer",
            ArgType::Boolean => "boolean",
            ArgType::Array => "array",
            ArgType::Object => "object",
        }
    }

    /// Best-effort mapping from a schema type string.
    pub fn from_schema_str(value: &str) -> Self {
        match value {
            "number" => ArgType::Number,
            "integer" => ArgType::Integer,
            "boolean" => ArgType::Boolean,
            "array" => ArgType::Array,
            "object" => ArgType::Object,
            _ => ArgType::String,
        }
    }
}

/// One declared tool argument.
#[derive(Debug, Clone)]
pub struct ToolArgument {
    pub name: String,
    pub description: String,
    pub required: bool,
    pub arg_type: ArgType,
    /// Nested schema for object/array arguments.
    pub properties_schema: Option<Value>,
}

impl ToolArgument {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        required: bool,
        arg_type: ArgType,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            required,
            arg_type,
            properties_schema: None,
        }
    }

    pub fn with_properties_schema(mut self, schema: Value) -> Self {
        self.properties_schema = Some(schema);
        self
    }
}

/// Build the JSON-schema `parameters` object providers expect.
pub fn arguments_to_schema(arguments: &[ToolArgument]) -> Value {
    let mut properties = Map::new();
    let mut required = Vec::new();
    for argument in arguments {
        let mut property = match &argument.properties_schema {
            Some(schema) => schema.clone(),
            None => json!({ "type": argument.arg_type.as_schema_str() }),
        };
        if let Some(object) = property.as_object_mut() {
            object
                .entry("description")
                .or_insert_with(|| json!(argument.description));
            object
                .entry("type")
                .or_insert_with(|| json!(argument.arg_type.as_schema_str()));
        }
        properties.insert(argument.name.clone(), property);
        if argument.required {
            required.push(json!(argument.name));
        }
    }
    json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// What a tool hands back. Domain failures live in `error`; at most one of
/// `text` and `error` is non-empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ToolOutput {
    pub text: String,
    /// Base64-encoded images, in order.
    pub images: Vec<String>,
    pub error: String,
}

impl ToolOutput {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Self::default()
        }
    }

    pub fn with_images(mut self, images: Vec<String>) -> Self {
        self.images = images;
        self
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}

/// A callable tool exposed to the model.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// Must stay byte-stable across iterations; dynamic status goes
    /// through [`ToolStateProvider`] so prompt caches survive.
    fn description(&self) -> &str;

    fn arguments(&self) -> Vec<ToolArgument>;

    async fn execute(&self, ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput;

    /// Privileged tools suspend the driver until an external decision.
    fn requires_approval(&self, _args: &Map<String, Value>) -> bool {
        false
    }
}

/// Dynamic status surfaced to the model through per-iteration situation
/// messages (never through tool descriptions).
pub trait ToolStateProvider: Send + Sync {
    /// Non-empty state string, or `None` when there is nothing to report.
    fn tool_state(&self) -> Option<String>;
}

/// A provider of tools: built-ins, an MCP bridge, or a composite of both.
#[async_trait]
pub trait ToolManager: Send + Sync {
    /// Current name → tool map.
    fn tools(&self) -> HashMap<String, Arc<dyn Tool>>;

    /// Dispatch by name. An unknown tool is a domain error, not a
    /// transport failure: the output carries "tool X not found".
    async fn call_tool(&self, ctx: &ToolContext, name: &str, args: &Map<String, Value>)
    -> ToolOutput;

    /// Register an additional tool with this manager.
    fn register_tool(&self, tool: Arc<dyn Tool>);

    /// State-provider facet, when implemented.
    fn as_state_provider(&self) -> Option<&dyn ToolStateProvider> {
        None
    }
}

/// Output text used for dispatches to names nobody registered.
pub fn unknown_tool_error(name: &str) -> String {
    format!("tool {name} not found")
}
