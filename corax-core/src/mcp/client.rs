//! MCP client: per-server lifecycle, discovery, and call forwarding.
//!
//! One [`McpClient`] manages every configured server. The server map sits
//! behind a lock; RPCs run on a cloned connection handle so no lock is
//! held across I/O.

use anyhow::{Context, Result, anyhow, bail};
use parking_lot::RwLock;
use rmcp::handler::client::ClientHandler;
use rmcp::model::{
    CallToolRequestParams, ClientCapabilities, ClientInfo, Implementation,
    ReadResourceRequestParams,
};
use rmcp::service::{self, RoleClient, RunningService};
use rmcp::transport::TokioChildProcess;
use rmcp::transport::StreamableHttpClientTransport;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{McpConfig, McpServerConfig, McpTransportConfig};

use super::types::{McpResourceData, McpResourceInfo, McpStatus, McpToolInfo};

#[derive(Clone)]
struct CoraxClientHandler {
    info: ClientInfo,
}

impl ClientHandler for CoraxClientHandler {
    fn get_info(&self) -> ClientInfo {
        self.info.clone()
    }
}

fn client_initialize_params() -> ClientInfo {
    ClientInfo::new(
        ClientCapabilities::default(),
        Implementation::new("corax", env!("CARGO_PKG_VERSION")),
    )
    .with_protocol_version(rmcp::model::ProtocolVersion::V_2024_11_05)
}

/// One live server connection plus its cached tool list.
struct ServerConnection {
    name: String,
    service: RunningService<RoleClient, CoraxClientHandler>,
    tool_allowlist: Vec<String>,
    tools: RwLock<Vec<McpToolInfo>>,
}

impl ServerConnection {
    fn allows_tool(&self, tool_name: &str) -> bool {
        self.tool_allowlist.is_empty()
            || self
                .tool_allowlist
                .iter()
                .any(|allowed| allowed == tool_name)
    }
}

pub struct McpClient {
    request_timeout: Duration,
    servers: RwLock<HashMap<String, Arc<ServerConnection>>>,
}

impl McpClient {
    pub fn new(config: &McpConfig) -> Self {
        Self {
            request_timeout: Duration::from_secs(config.request_timeout_secs),
            servers: RwLock::new(HashMap::new()),
        }
    }

    /// Connect all enabled servers from the configuration. Individual
    /// failures are logged and skipped so one broken server does not take
    /// the whole bridge down.
    pub async fn initialize(&self, config: &McpConfig) -> Result<()> {
        if !config.enabled {
            info!("MCP support is disabled in configuration");
            return Ok(());
        }
        for server in &config.servers {
            if !server.enabled {
                debug!(server = server.name.as_str(), "server disabled; skipping");
                continue;
            }
            if let Err(err) = self.add_server(server).await {
                error!(
                    server = server.name.as_str(),
                    error = %err,
                    "failed to initialize MCP server"
                );
            }
        }
        Ok(())
    }

    /// Start a server connection, handshake, and fetch its tools.
    pub async fn add_server(&self, config: &McpServerConfig) -> Result<()> {
        if self.servers.read().contains_key(&config.name) {
            bail!("MCP server '{}' is already registered", config.name);
        }

        let handler = CoraxClientHandler {
            info: client_initialize_params(),
        };
        let service = match &config.transport {
            McpTransportConfig::Stdio { command, args, env } => {
                let mut cmd = Command::new(command);
                cmd.args(args);
                for (key, value) in env {
                    cmd.env(key, value);
                }
                let transport = TokioChildProcess::new(cmd).with_context(|| {
                    format!("failed to spawn MCP server process '{command}'")
                })?;
                timeout(self.request_timeout, service::serve_client(handler, transport))
                    .await
                    .with_context(|| {
                        format!("timed out establishing stdio transport to '{}'", config.name)
                    })??
            }
            McpTransportConfig::Http { url } => {
                let transport = StreamableHttpClientTransport::from_uri(url.clone());
                timeout(self.request_timeout, service::serve_client(handler, transport))
                    .await
                    .with_context(|| {
                        format!("timed out establishing http transport to '{}'", config.name)
                    })??
            }
        };

        let connection = Arc::new(ServerConnection {
            name: config.name.clone(),
            service,
            tool_allowlist: config.tool_allowlist.clone(),
            tools: RwLock::new(Vec::new()),
        });
        self.fetch_tools(&connection).await?;

        info!(
            server = config.name.as_str(),
            tools = connection.tools.read().len(),
            "MCP server initialized"
        );
        self.servers
            .write()
            .insert(config.name.clone(), connection);
        Ok(())
    }

    /// Close a server and forget its tools.
    pub async fn remove_server(&self, name: &str) -> Result<()> {
        let Some(connection) = self.servers.write().remove(name) else {
            bail!("MCP server '{name}' is not registered");
        };
        connection.service.cancellation_token().cancel();
        info!(server = name, "MCP server removed");
        Ok(())
    }

    /// Drop and re-fetch the tool list of every live server.
    pub async fn refresh_tools(&self) -> Result<()> {
        let connections: Vec<Arc<ServerConnection>> =
            self.servers.read().values().cloned().collect();
        for connection in connections {
            if let Err(err) = self.fetch_tools(&connection).await {
                warn!(
                    server = connection.name.as_str(),
                    error = %err,
                    "failed to refresh tools"
                );
            }
        }
        Ok(())
    }

    async fn fetch_tools(&self, connection: &Arc<ServerConnection>) -> Result<()> {
        let listed = timeout(
            self.request_timeout,
            connection.service.peer().list_all_tools(),
        )
        .await
        .with_context(|| format!("timed out listing tools on '{}'", connection.name))?
        .with_context(|| format!("failed to list tools on '{}'", connection.name))?;

        let mut tools = Vec::new();
        for tool in listed {
            let info = McpToolInfo {
                name: tool.name.to_string(),
                description: tool
                    .description
                    .as_ref()
                    .map(|d| d.to_string())
                    .unwrap_or_default(),
                server: connection.name.clone(),
                input_schema: serde_json::to_value(tool.input_schema.as_ref())
                    .unwrap_or(Value::Null),
            };
            if !connection.allows_tool(&info.name) {
                debug!(
                    server = connection.name.as_str(),
                    tool = info.name.as_str(),
                    "tool excluded by allowlist"
                );
                continue;
            }
            tools.push(info);
        }
        *connection.tools.write() = tools;
        Ok(())
    }

    /// Every discovered tool across all servers.
    pub fn tools(&self) -> Vec<McpToolInfo> {
        self.servers
            .read()
            .values()
            .flat_map(|connection| connection.tools.read().clone())
            .collect()
    }

    fn connection_for_tool(&self, tool_name: &str) -> Option<Arc<ServerConnection>> {
        self.servers
            .read()
            .values()
            .find(|connection| {
                connection
                    .tools
                    .read()
                    .iter()
                    .any(|tool| tool.name == tool_name)
            })
            .cloned()
    }

    /// Forward a tool call to the server that owns it.
    pub async fn call_tool(&self, tool_name: &str, args: &Map<String, Value>) -> Result<Value> {
        let connection = self
            .connection_for_tool(tool_name)
            .ok_or_else(|| anyhow!("no MCP server provides tool '{tool_name}'"))?;

        let params = CallToolRequestParams::new(tool_name.to_string()).with_arguments(args.clone());
        let result = timeout(self.request_timeout, connection.service.call_tool(params))
            .await
            .with_context(|| format!("MCP tool '{tool_name}' timed out"))?
            .with_context(|| {
                format!(
                    "MCP tool '{tool_name}' failed on server '{}'",
                    connection.name
                )
            })?;
        serde_json::to_value(&result).context("failed to serialize MCP tool result")
    }

    /// List resources from every server.
    pub async fn list_resources(&self) -> Result<Vec<McpResourceInfo>> {
        let connections: Vec<Arc<ServerConnection>> =
            self.servers.read().values().cloned().collect();
        let mut resources = Vec::new();
        for connection in connections {
            let listed = timeout(
                self.request_timeout,
                connection.service.peer().list_all_resources(),
            )
            .await
            .with_context(|| format!("timed out listing resources on '{}'", connection.name))?
            .with_context(|| format!("failed to list resources on '{}'", connection.name))?;
            for resource in listed {
                let raw = serde_json::to_value(&resource).unwrap_or(Value::Null);
                resources.push(McpResourceInfo {
                    server: connection.name.clone(),
                    uri: raw
                        .get("uri")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    name: raw
                        .get("name")
                        .and_then(Value::as_str)
                        .unwrap_or_default()
                        .to_string(),
                    description: raw
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    mime_type: raw
                        .get("mimeType")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                });
            }
        }
        Ok(resources)
    }

    /// Read a resource from the named server.
    pub async fn read_resource(&self, server: &str, uri: &str) -> Result<McpResourceData> {
        let connection = self
            .servers
            .read()
            .get(server)
            .cloned()
            .ok_or_else(|| anyhow!("MCP server '{server}' is not registered"))?;

        let params = ReadResourceRequestParams::new(uri.to_string());
        let result = timeout(
            self.request_timeout,
            connection.service.peer().read_resource(params),
        )
        .await
        .with_context(|| format!("timed out reading resource '{uri}'"))?
        .with_context(|| format!("failed to read resource '{uri}' from '{server}'"))?;

        let raw = serde_json::to_value(&result).context("failed to serialize resource result")?;
        let contents = raw
            .get("contents")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(McpResourceData {
            server: server.to_string(),
            uri: uri.to_string(),
            contents,
        })
    }

    pub fn status(&self) -> McpStatus {
        let servers = self.servers.read();
        let mut names: Vec<String> = servers.keys().cloned().collect();
        names.sort();
        McpStatus {
            server_count: servers.len(),
            tool_count: servers
                .values()
                .map(|connection| connection.tools.read().len())
                .sum(),
            servers: names,
        }
    }
}
