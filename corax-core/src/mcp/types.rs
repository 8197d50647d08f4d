//! Core MCP data types exposed to the rest of the crate.

use serde_json::Value;

/// A tool discovered on an MCP server.
#[derive(Debug, Clone)]
pub struct McpToolInfo {
    pub name: String,
    pub description: String,
    pub server: String,
    pub input_schema: Value,
}

/// Summary of a resource exposed by a server.
#[derive(Debug, Clone)]
pub struct McpResourceInfo {
    pub server: String,
    pub uri: String,
    pub name: String,
    pub description: Option<String>,
    pub mime_type: Option<String>,
}

/// Resource contents fetched from a server.
#[derive(Debug, Clone)]
pub struct McpResourceData {
    pub server: String,
    pub uri: String,
    /// Raw contents entries as returned by the server.
    pub contents: Vec<Value>,
}

/// Snapshot of the MCP client at runtime.
#[derive(Debug, Clone, Default)]
pub struct McpStatus {
    pub server_count: usize,
    pub tool_count: usize,
    pub servers: Vec<String>,
}
