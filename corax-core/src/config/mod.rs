//! Configuration loader and schema.
//!
//! Everything is driven by `corax.toml` with environment overrides; the
//! defaults here keep the agent usable with an empty file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

pub mod constants;
pub mod mcp;
pub mod policies;

pub use mcp::{McpConfig, McpServerConfig, McpTransportConfig};
pub use policies::{FilesystemPolicyConfig, ShellPolicyConfig};

use constants::{defaults, env_vars, models};

/// Top-level configuration for an agent session.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CoraxConfig {
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub filesystem: FilesystemPolicyConfig,
    #[serde(default)]
    pub shell: ShellPolicyConfig,
    #[serde(default)]
    pub mcp: McpConfig,
}

impl CoraxConfig {
    /// Load configuration from the given file, falling back to defaults
    /// when the file does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Locate `corax.toml` in the working directory and load it.
    pub fn load_from_workspace(workspace: &Path) -> Result<Self> {
        Self::load(&workspace.join("corax.toml"))
    }
}

/// Iteration-driver tuning.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentConfig {
    /// Maximum ReAct iterations per user turn.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// How many recent transcript messages are offered per provider call.
    #[serde(default = "default_context_tail")]
    pub context_tail_messages: usize,

    /// Context-window utilization ratio that triggers compaction.
    #[serde(default = "default_compaction_trigger")]
    pub compaction_trigger_ratio: f64,

    /// Complete tool-call/result pairs kept verbatim by compaction.
    #[serde(default = "default_compaction_keep_pairs")]
    pub compaction_keep_pairs: usize,

    /// Ask providers for streamed thinking when they support it.
    #[serde(default = "default_enable_thinking")]
    pub enable_thinking: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            context_tail_messages: default_context_tail(),
            compaction_trigger_ratio: default_compaction_trigger(),
            compaction_keep_pairs: default_compaction_keep_pairs(),
            enable_thinking: default_enable_thinking(),
        }
    }
}

fn default_max_iterations() -> usize {
    defaults::MAX_ITERATIONS
}

fn default_context_tail() -> usize {
    defaults::CONTEXT_TAIL_MESSAGES
}

fn default_compaction_trigger() -> f64 {
    defaults::COMPACTION_TRIGGER_RATIO
}

fn default_compaction_keep_pairs() -> usize {
    defaults::COMPACTION_KEEP_PAIRS
}

fn default_enable_thinking() -> bool {
    true
}

/// Provider selection and connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProviderConfig {
    /// Provider id: "anthropic", "openai", or "ollama".
    #[serde(default = "default_provider_name")]
    pub name: String,

    /// Model identifier; provider default when empty.
    #[serde(default)]
    pub model: Option<String>,

    /// Base URL override; provider default when empty.
    #[serde(default)]
    pub base_url: Option<String>,

    /// Maximum tokens the model may emit per call.
    #[serde(default = "default_max_output_tokens")]
    pub max_output_tokens: u32,

    /// Prompt-cache hints forwarded to providers that honor them.
    #[serde(default)]
    pub cache: CacheHintsConfig,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            model: None,
            base_url: None,
            max_output_tokens: default_max_output_tokens(),
            cache: CacheHintsConfig::default(),
        }
    }
}

impl ProviderConfig {
    /// Resolve the API key for the configured provider from the environment.
    pub fn resolve_api_key(&self) -> Option<String> {
        let var = match self.name.as_str() {
            models::anthropic::PROVIDER => env_vars::ANTHROPIC_API_KEY,
            models::openai::PROVIDER => env_vars::OPENAI_API_KEY,
            _ => return None,
        };
        env::var(var).ok().filter(|key| !key.trim().is_empty())
    }
}

fn default_provider_name() -> String {
    models::anthropic::PROVIDER.to_string()
}

fn default_max_output_tokens() -> u32 {
    8_192
}

/// Prompt-cache hints shared with providers that implement caching.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheHintsConfig {
    /// Session identifier used to scope cache entries.
    #[serde(default)]
    pub session_id: Option<String>,

    /// Whether prompt caching should be requested at all.
    #[serde(default = "default_prompt_caching_enabled")]
    pub prompt_caching_enabled: bool,

    /// Opaque provider policy hint (e.g. a TTL preference).
    #[serde(default)]
    pub policy_hint: Option<String>,

    /// Cache identical baseline requests locally instead of re-asking the
    /// provider.
    #[serde(default)]
    pub response_cache_enabled: bool,

    #[serde(default = "default_response_cache_capacity")]
    pub response_cache_capacity: usize,

    #[serde(default = "default_response_cache_ttl_secs")]
    pub response_cache_ttl_secs: u64,
}

impl Default for CacheHintsConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            prompt_caching_enabled: default_prompt_caching_enabled(),
            policy_hint: None,
            response_cache_enabled: false,
            response_cache_capacity: default_response_cache_capacity(),
            response_cache_ttl_secs: default_response_cache_ttl_secs(),
        }
    }
}

fn default_response_cache_capacity() -> usize {
    64
}

fn default_response_cache_ttl_secs() -> u64 {
    300
}

fn default_prompt_caching_enabled() -> bool {
    true
}

/// Expand a possibly relative directory entry against the workspace root.
pub fn resolve_config_dir(workspace: &Path, entry: &str) -> PathBuf {
    let candidate = PathBuf::from(entry);
    if candidate.is_absolute() {
        candidate
    } else {
        workspace.join(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config: CoraxConfig = toml::from_str("").expect("empty config should parse");
        assert_eq!(config.agent.max_iterations, defaults::MAX_ITERATIONS);
        assert_eq!(config.provider.name, models::anthropic::PROVIDER);
        assert!(config.provider.cache.prompt_caching_enabled);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config: CoraxConfig = toml::from_str(
            r#"
            [agent]
            max_iterations = 5

            [provider]
            name = "ollama"
            "#,
        )
        .expect("config should parse");
        assert_eq!(config.agent.max_iterations, 5);
        assert_eq!(
            config.agent.context_tail_messages,
            defaults::CONTEXT_TAIL_MESSAGES
        );
        assert_eq!(config.provider.name, "ollama");
    }
}
