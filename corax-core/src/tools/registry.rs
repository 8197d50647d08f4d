//! Tool managers: a simple local registry and the composite aggregator.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::traits::{
    Tool, ToolContext, ToolManager, ToolOutput, ToolStateProvider, unknown_tool_error,
};

/// In-process registry holding locally constructed tools.
#[derive(Default)]
pub struct LocalToolManager {
    tools: RwLock<HashMap<String, Arc<dyn Tool>>>,
}

impl LocalToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tools(tools: Vec<Arc<dyn Tool>>) -> Self {
        let manager = Self::new();
        for tool in tools {
            manager.register_tool(tool);
        }
        manager
    }
}

#[async_trait]
impl ToolManager for LocalToolManager {
    fn tools(&self) -> HashMap<String, Arc<dyn Tool>> {
        self.tools.read().clone()
    }

    async fn call_tool(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: &Map<String, Value>,
    ) -> ToolOutput {
        let tool = self.tools.read().get(name).cloned();
        match tool {
            Some(tool) => tool.execute(ctx, args).await,
            None => ToolOutput::error(unknown_tool_error(name)),
        }
    }

    fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.tools.write().insert(tool.name().to_string(), tool);
    }
}

/// Aggregates several managers behind one name map.
///
/// On name collisions the last manager wins; the registry itself is silent
/// about it, callers that care should compare maps and log.
pub struct CompositeToolManager {
    managers: Vec<Arc<dyn ToolManager>>,
    /// Receives tools registered directly against the composite.
    local: Arc<LocalToolManager>,
}

impl CompositeToolManager {
    pub fn new(managers: Vec<Arc<dyn ToolManager>>) -> Self {
        Self {
            managers,
            local: Arc::new(LocalToolManager::new()),
        }
    }

    fn manager_for(&self, name: &str) -> Option<Arc<dyn ToolManager>> {
        // Later managers shadow earlier ones, mirroring the merged map.
        if self.local.tools.read().contains_key(name) {
            return Some(self.local.clone() as Arc<dyn ToolManager>);
        }
        self.managers
            .iter()
            .rev()
            .find(|manager| manager.tools().contains_key(name))
            .cloned()
    }
}

#[async_trait]
impl ToolManager for CompositeToolManager {
    fn tools(&self) -> HashMap<String, Arc<dyn Tool>> {
        let mut merged = HashMap::new();
        for manager in &self.managers {
            merged.extend(manager.tools());
        }
        merged.extend(self.local.tools());
        merged
    }

    async fn call_tool(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: &Map<String, Value>,
    ) -> ToolOutput {
        match self.manager_for(name) {
            Some(manager) => manager.call_tool(ctx, name, args).await,
            None => ToolOutput::error(unknown_tool_error(name)),
        }
    }

    fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.local.register_tool(tool);
    }

    fn as_state_provider(&self) -> Option<&dyn ToolStateProvider> {
        Some(self)
    }
}

impl ToolStateProvider for CompositeToolManager {
    /// Concatenate the non-empty state strings of every child, newline
    /// separated.
    fn tool_state(&self) -> Option<String> {
        let mut parts = Vec::new();
        for manager in &self.managers {
            if let Some(provider) = manager.as_state_provider()
                && let Some(state) = provider.tool_state()
                && !state.is_empty()
            {
                parts.push(state);
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::traits::ToolArgument;

    struct EchoTool {
        name: &'static str,
        reply: &'static str,
    }

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            self.name
        }

        fn description(&self) -> &str {
            "echoes a fixed reply"
        }

        fn arguments(&self) -> Vec<ToolArgument> {
            Vec::new()
        }

        async fn execute(&self, _ctx: &ToolContext, _args: &Map<String, Value>) -> ToolOutput {
            ToolOutput::success(self.reply)
        }
    }

    struct StaticState(&'static str);

    #[async_trait]
    impl ToolManager for StaticState {
        fn tools(&self) -> HashMap<String, Arc<dyn Tool>> {
            HashMap::new()
        }

        async fn call_tool(
            &self,
            _ctx: &ToolContext,
            name: &str,
            _args: &Map<String, Value>,
        ) -> ToolOutput {
            ToolOutput::error(unknown_tool_error(name))
        }

        fn register_tool(&self, _tool: Arc<dyn Tool>) {}

        fn as_state_provider(&self) -> Option<&dyn ToolStateProvider> {
            Some(self)
        }
    }

    impl ToolStateProvider for StaticState {
        fn tool_state(&self) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn unknown_tool_is_a_domain_error() {
        let manager = LocalToolManager::new();
        let output = manager
            .call_tool(&ToolContext::default(), "missing", &Map::new())
            .await;
        assert_eq!(output.error, "tool missing not found");
    }

    #[tokio::test]
    async fn composite_last_writer_wins() {
        let first = Arc::new(LocalToolManager::new());
        first.register_tool(Arc::new(EchoTool {
            name: "echo",
            reply: "first",
        }));
        let second = Arc::new(LocalToolManager::new());
        second.register_tool(Arc::new(EchoTool {
            name: "echo",
            reply: "second",
        }));

        let composite = CompositeToolManager::new(vec![first, second]);
        let output = composite
            .call_tool(&ToolContext::default(), "echo", &Map::new())
            .await;
        assert_eq!(output.text, "second");
        assert_eq!(composite.tools().len(), 1);
    }

    #[tokio::test]
    async fn composite_concatenates_child_states() {
        let composite = CompositeToolManager::new(vec![
            Arc::new(StaticState("Web cache: 2 entries")),
            Arc::new(StaticState("Todo list: 3 items")),
        ]);
        assert_eq!(
            composite.tool_state().as_deref(),
            Some("Web cache: 2 entries\nTodo list: 3 items")
        );
    }
}
