//! Model Context Protocol bridge: client lifecycle, discovery, and the
//! adapters that surface remote tools through the local registry.

pub mod adapter;
pub mod client;
pub mod types;

pub use adapter::{McpToolAdapter, McpToolManager};
pub use client::McpClient;
pub use types::{McpResourceData, McpResourceInfo, McpStatus, McpToolInfo};
