//! Full-file configuration parsing.

use std::path::Path;

use corax_core::config::{CoraxConfig, McpTransportConfig};

#[test]
fn representative_config_file_parses_end_to_end() {
    let raw = r#"
[agent]
max_iterations = 12
compaction_trigger_ratio = 0.8
enable_thinking = false

[provider]
name = "ollama"
model = "qwen2.5-coder:14b"
base_url = "http://127.0.0.1:11434"

[provider.cache]
session_id = "workstation-1"
prompt_caching_enabled = true
response_cache_enabled = true
response_cache_capacity = 16

[filesystem]
allowed_directories = ["/opt/shared-docs"]
blacklist = [".env", "*.key"]
validate_extensions = ["rs"]
validate_command = ["cargo", "check", "--quiet"]

[shell]
whitelist = ["git status", "cargo check", "ls"]
timeout_secs = 90

[mcp]
enabled = true
request_timeout_secs = 20

[[mcp.servers]]
name = "docs"
tool_allowlist = ["search", "fetch"]

[mcp.servers.transport]
type = "stdio"
command = "mcp-docs"
args = ["--quiet"]

[[mcp.servers]]
name = "tracker"

[mcp.servers.transport]
type = "http"
url = "https://tracker.internal/mcp"
"#;

    let dir = tempfile::TempDir::new().expect("temp dir");
    let path = dir.path().join("corax.toml");
    std::fs::write(&path, raw).expect("write config");

    let config = CoraxConfig::load(&path).expect("config parses");

    assert_eq!(config.agent.max_iterations, 12);
    assert!(!config.agent.enable_thinking);
    // Unset fields keep their defaults.
    assert_eq!(config.agent.compaction_keep_pairs, 5);

    assert_eq!(config.provider.name, "ollama");
    assert_eq!(config.provider.model.as_deref(), Some("qwen2.5-coder:14b"));
    assert_eq!(
        config.provider.cache.session_id.as_deref(),
        Some("workstation-1")
    );
    assert!(config.provider.cache.response_cache_enabled);
    assert_eq!(config.provider.cache.response_cache_capacity, 16);

    assert_eq!(config.filesystem.allowed_directories, ["/opt/shared-docs"]);
    assert_eq!(config.filesystem.validate_command[0], "cargo");

    assert_eq!(config.shell.timeout_secs, 90);
    assert!(config.shell.whitelist.contains(&"git status".to_string()));

    assert!(config.mcp.enabled);
    assert_eq!(config.mcp.request_timeout_secs, 20);
    assert_eq!(config.mcp.servers.len(), 2);
    match &config.mcp.servers[0].transport {
        McpTransportConfig::Stdio { command, args, .. } => {
            assert_eq!(command, "mcp-docs");
            assert_eq!(args, &["--quiet".to_string()]);
        }
        other => panic!("unexpected transport: {other:?}"),
    }
    match &config.mcp.servers[1].transport {
        McpTransportConfig::Http { url } => {
            assert_eq!(url, "https://tracker.internal/mcp");
        }
        other => panic!("unexpected transport: {other:?}"),
    }
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let config = CoraxConfig::load(Path::new("/nonexistent/corax.toml")).expect("defaults");
    assert_eq!(config.provider.name, "anthropic");
    assert!(!config.mcp.enabled);
}
