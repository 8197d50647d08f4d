//! Concrete provider adapters and the helpers they share.

use anyhow::{Result, bail};
use sha2::{Digest, Sha256};
use std::env;
use std::sync::Arc;

use crate::config::ProviderConfig;
use crate::config::constants::models;
use crate::message::{Message, TokenUsage};

use super::provider::{ChatProvider, ToolChoice};

pub mod anthropic;
pub mod ollama;
pub mod openai;
pub(crate) mod retry;

pub use anthropic::AnthropicProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAiProvider;

/// Build the configured provider adapter, wrapped in the local response
/// cache when enabled.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn ChatProvider>> {
    let provider: Arc<dyn ChatProvider> = match config.name.as_str() {
        models::anthropic::PROVIDER => Arc::new(AnthropicProvider::from_config(config)),
        models::openai::PROVIDER => Arc::new(OpenAiProvider::from_config(config)),
        models::ollama::PROVIDER => Arc::new(OllamaProvider::from_config(config)),
        other => bail!("unknown provider '{other}'"),
    };
    if config.cache.response_cache_enabled {
        return Ok(Arc::new(super::cache::CachedChatProvider::new(
            provider,
            config.cache.response_cache_capacity,
            std::time::Duration::from_secs(config.cache.response_cache_ttl_secs),
        )));
    }
    Ok(provider)
}

/// Pick the configured model or fall back to the provider default.
pub(crate) fn resolve_model(configured: Option<&str>, default_model: &str) -> String {
    configured
        .map(str::trim)
        .filter(|model| !model.is_empty())
        .unwrap_or(default_model)
        .to_string()
}

/// Resolve the base URL: explicit config wins, then the env override,
/// then the provider default. Trailing slashes are stripped.
pub(crate) fn override_base_url(
    default_url: &str,
    configured: Option<&str>,
    env_var: Option<&str>,
) -> String {
    let sanitize = |value: &str| -> Option<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.trim_end_matches('/').to_string())
        }
    };

    configured
        .and_then(sanitize)
        .or_else(|| {
            env_var
                .and_then(|var| env::var(var).ok())
                .and_then(|value| sanitize(&value))
        })
        .unwrap_or_else(|| default_url.trim_end_matches('/').to_string())
}

/// Deterministic fingerprint of a request for the optional local cache.
pub(crate) fn request_cache_key(
    provider: &str,
    model: &str,
    messages: &[Message],
    choice: Option<&ToolChoice>,
) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update([0]);
    hasher.update(model.as_bytes());
    hasher.update([0]);
    // Hash semantic content only; ids and timestamps vary per run and
    // would defeat the cache.
    for message in messages {
        hasher.update(kind_tag(message).as_bytes());
        hasher.update([0]);
        hasher.update(message.content.as_bytes());
        hasher.update([0]);
        for invocation in message.invocations() {
            hasher.update(invocation.name.as_bytes());
            hasher.update(serde_json::to_vec(&invocation.arguments)?);
        }
        if let Some((result, error)) = message.tool_outcome() {
            hasher.update(result.as_bytes());
            hasher.update([0]);
            hasher.update(error.as_bytes());
        }
        hasher.update([0xff]);
    }
    let choice_tag = match choice {
        None => "-",
        Some(ToolChoice::Auto) => "auto",
        Some(ToolChoice::Any) => "any",
        Some(ToolChoice::None) => "none",
        Some(ToolChoice::Specific(name)) => name.as_str(),
    };
    hasher.update(choice_tag.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

fn kind_tag(message: &Message) -> &'static str {
    use crate::message::MessageKind;
    match message.kind {
        MessageKind::User => "user",
        MessageKind::Assistant => "assistant",
        MessageKind::System => "system",
        MessageKind::Reasoning => "reasoning",
        MessageKind::ToolCall(_) => "tool_call",
        MessageKind::ToolResult { .. } => "tool_result",
        MessageKind::ToolCallBatch(_) => "tool_call_batch",
    }
}

/// Interior-mutable slot for the usage reported by the most recent call.
#[derive(Default)]
pub(crate) struct UsageCell {
    inner: parking_lot::RwLock<Option<TokenUsage>>,
}

impl UsageCell {
    pub fn store(&self, usage: TokenUsage) {
        *self.inner.write() = Some(usage);
    }

    pub fn load(&self) -> Option<TokenUsage> {
        *self.inner.read()
    }
}

/// Incremental splitter turning a byte stream into complete lines,
/// used for both SSE (`data: ...`) and newline-delimited JSON streams.
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: String,
}

impl LineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(position) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=position).collect();
            lines.push(line.trim_end_matches(['\n', '\r']).to_string());
        }
        lines
    }

    /// Whatever is left after the stream ends.
    pub fn finish(self) -> Option<String> {
        let rest = self.pending.trim();
        if rest.is_empty() {
            None
        } else {
            Some(rest.to_string())
        }
    }
}

/// Extract the JSON payload from an SSE `data:` line. Returns `None` for
/// comments, empty keep-alives, and the `[DONE]` sentinel.
pub(crate) fn sse_data(line: &str) -> Option<&str> {
    let payload = line.strip_prefix("data:")?.trim();
    if payload.is_empty() || payload == "[DONE]" {
        return None;
    }
    Some(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_buffer_reassembles_split_chunks() {
        let mut buffer = LineBuffer::default();
        assert!(buffer.push(b"data: {\"a\"").is_empty());
        let lines = buffer.push(b": 1}\n\ndata: [DONE]\n");
        assert_eq!(lines, vec!["data: {\"a\": 1}", "", "data: [DONE]"]);
    }

    #[test]
    fn sse_data_filters_sentinels() {
        assert_eq!(sse_data("data: {\"x\":1}"), Some("{\"x\":1}"));
        assert_eq!(sse_data("data: [DONE]"), None);
        assert_eq!(sse_data(": keep-alive"), None);
        assert_eq!(sse_data(""), None);
    }

    #[test]
    fn cache_key_is_stable_and_choice_sensitive() {
        let messages = vec![Message::user("hello")];
        let a = request_cache_key("openai", "gpt-4.1", &messages, Some(&ToolChoice::Auto))
            .expect("key");
        let b = request_cache_key("openai", "gpt-4.1", &messages, Some(&ToolChoice::Auto))
            .expect("key");
        let c = request_cache_key("openai", "gpt-4.1", &messages, Some(&ToolChoice::Any))
            .expect("key");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn base_url_override_prefers_explicit_config() {
        let url = override_base_url("https://api.example.com/v1", Some("http://local:9999/"), None);
        assert_eq!(url, "http://local:9999");
    }
}
