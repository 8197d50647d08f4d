//! Adapters presenting remote MCP tools through the local tool contract.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::tools::{
    ArgType, Tool, ToolArgument, ToolContext, ToolManager, ToolOutput, ToolStateProvider,
    unknown_tool_error,
};

use super::client::McpClient;
use super::types::McpToolInfo;

/// One remote tool behind the local [`Tool`] trait.
pub struct McpToolAdapter {
    client: Arc<McpClient>,
    info: McpToolInfo,
    /// Remote description prefixed with the server name, precomputed so
    /// `description()` can hand out a stable borrow.
    description: String,
}

impl McpToolAdapter {
    pub fn new(client: Arc<McpClient>, info: McpToolInfo) -> Self {
        let description = if info.description.is_empty() {
            format!("(MCP server: {})", info.server)
        } else {
            format!("{} (MCP server: {})", info.description, info.server)
        };
        Self {
            client,
            info,
            description,
        }
    }

    /// Best-effort conversion of a remote JSON schema into local argument
    /// declarations.
    fn schema_to_arguments(schema: &Value) -> Vec<ToolArgument> {
        let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
            return Vec::new();
        };
        let required: Vec<&str> = schema
            .get("required")
            .and_then(Value::as_array)
            .map(|entries| entries.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default();

        let mut names: Vec<&String> = properties.keys().collect();
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let property = &properties[name];
                let arg_type = property
                    .get("type")
                    .and_then(Value::as_str)
                    .map(ArgType::from_schema_str)
                    .unwrap_or(ArgType::String);
                let description = property
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let mut argument = ToolArgument::new(
                    name.clone(),
                    description,
                    required.contains(&name.as_str()),
                    arg_type,
                );
                if matches!(arg_type, ArgType::Object | ArgType::Array) {
                    argument = argument.with_properties_schema(property.clone());
                }
                argument
            })
            .collect()
    }

    /// Flatten a CallToolResult-style value into tool output text.
    fn format_result(value: &Value) -> ToolOutput {
        let is_error = value
            .get("isError")
            .or_else(|| value.get("is_error"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let mut texts = Vec::new();
        let mut images = Vec::new();
        if let Some(content) = value.get("content").and_then(Value::as_array) {
            for block in content {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    texts.push(text.to_string());
                } else if let Some(data) = block.get("data").and_then(Value::as_str) {
                    images.push(data.to_string());
                }
            }
        }
        let text = if texts.is_empty() {
            value.to_string()
        } else {
            texts.join("\n")
        };

        if is_error {
            ToolOutput::error(text)
        } else {
            ToolOutput::success(text).with_images(images)
        }
    }
}

#[async_trait]
impl Tool for McpToolAdapter {
    fn name(&self) -> &str {
        &self.info.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        Self::schema_to_arguments(&self.info.input_schema)
    }

    async fn execute(&self, ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput {
        let call = self.client.call_tool(&self.info.name, args);
        let result = tokio::select! {
            _ = ctx.cancel.cancelled() => return ToolOutput::error("cancelled".to_string()),
            result = call => result,
        };
        match result {
            Ok(value) => Self::format_result(&value),
            Err(error) => ToolOutput::error(format!("{error:#}")),
        }
    }
}

/// Tool manager exposing every discovered MCP tool. Rebuilt adapters are
/// cached and refreshed together with the client's tool lists.
pub struct McpToolManager {
    client: Arc<McpClient>,
    adapters: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl McpToolManager {
    pub fn new(client: Arc<McpClient>) -> Self {
        let manager = Self {
            client,
            adapters: RwLock::new(HashMap::new()),
        };
        manager.rebuild();
        manager
    }

    /// Re-derive adapters from the client's current tool lists. Call after
    /// adding, removing, or refreshing servers.
    pub fn rebuild(&self) {
        let mut adapters: HashMap<String, Arc<dyn Tool>> = HashMap::new();
        for info in self.client.tools() {
            let name = info.name.clone();
            if adapters.contains_key(&name) {
                debug!(tool = name.as_str(), "duplicate MCP tool name; keeping first server");
                continue;
            }
            adapters.insert(
                name,
                Arc::new(McpToolAdapter::new(self.client.clone(), info)),
            );
        }
        *self.adapters.write() = adapters;
    }
}

#[async_trait]
impl ToolManager for McpToolManager {
    fn tools(&self) -> HashMap<String, Arc<dyn Tool>> {
        self.adapters.read().clone()
    }

    async fn call_tool(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: &Map<String, Value>,
    ) -> ToolOutput {
        let adapter = self.adapters.read().get(name).cloned();
        match adapter {
            Some(adapter) => adapter.execute(ctx, args).await,
            None => ToolOutput::error(unknown_tool_error(name)),
        }
    }

    fn register_tool(&self, tool: Arc<dyn Tool>) {
        warn!(
            tool = tool.name(),
            "MCP manager does not accept local registrations; tool ignored"
        );
    }

    fn as_state_provider(&self) -> Option<&dyn ToolStateProvider> {
        Some(self)
    }
}

impl ToolStateProvider for McpToolManager {
    fn tool_state(&self) -> Option<String> {
        let status = self.client.status();
        if status.server_count == 0 {
            return None;
        }
        Some(format!(
            "MCP servers: {} connected ({}), {} tools available",
            status.server_count,
            status.servers.join(", "),
            status.tool_count
        ))
    }
}
