//! MCP client configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::constants::defaults;

/// Top-level MCP configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpConfig {
    /// Enable MCP functionality.
    #[serde(default)]
    pub enabled: bool,

    /// Configured MCP servers.
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,

    /// Request timeout in seconds for tool calls and discovery.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            servers: Vec::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    defaults::MCP_REQUEST_TIMEOUT_SECS
}

/// A single MCP server entry.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct McpServerConfig {
    /// Unique server name; embedded in adapted tool descriptions.
    pub name: String,

    /// Transport used to reach the server.
    pub transport: McpTransportConfig,

    /// Optional allowlist restricting which remote tools are registered.
    /// Empty means all discovered tools are exposed.
    #[serde(default)]
    pub tool_allowlist: Vec<String>,

    #[serde(default = "default_server_enabled")]
    pub enabled: bool,
}

fn default_server_enabled() -> bool {
    true
}

/// Supported MCP transports.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum McpTransportConfig {
    /// Local subprocess speaking JSON-RPC over stdio.
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    /// Streamable HTTP (server-sent events).
    Http { url: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdio_transport_parses_from_toml() {
        let config: McpConfig = toml::from_str(
            r#"
            enabled = true

            [[servers]]
            name = "docs"
            tool_allowlist = ["search"]

            [servers.transport]
            type = "stdio"
            command = "mcp-docs"
            args = ["--quiet"]
            "#,
        )
        .expect("mcp config should parse");
        assert!(config.enabled);
        assert_eq!(config.servers.len(), 1);
        match &config.servers[0].transport {
            McpTransportConfig::Stdio { command, args, .. } => {
                assert_eq!(command, "mcp-docs");
                assert_eq!(args, &["--quiet".to_string()]);
            }
            other => panic!("unexpected transport: {other:?}"),
        }
    }
}
