//! Provider capability surface.
//!
//! Each capability is a separate facet rather than one omnibus trait:
//! callers hold a `dyn ChatProvider` and probe for tool calling, structured
//! output, or cache keys with the `as_*` accessors. Adapters implement only
//! what their backend actually supports.

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::CacheHintsConfig;
use crate::config::constants::defaults;
use crate::message::{Message, TokenUsage};
use crate::tools::ToolManager;

/// Constraint on whether and which tool the model must use.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ToolChoice {
    /// The model decides.
    #[default]
    Auto,
    /// The model must call some tool.
    Any,
    /// The model must call the named tool.
    Specific(String),
    /// Tool use disabled for this call.
    None,
}

/// Send-only sink for incremental thinking fragments.
///
/// The sink is lossy: a slow consumer never back-pressures the network
/// reader, fragments are dropped when the buffer is full. An empty string
/// marks end-of-thinking.
#[derive(Clone)]
pub struct ThinkingSink {
    tx: mpsc::Sender<String>,
}

impl ThinkingSink {
    /// Create a sink and its single consumer with the default capacity.
    pub fn channel() -> (Self, mpsc::Receiver<String>) {
        Self::channel_with_capacity(defaults::THINKING_SINK_CAPACITY)
    }

    pub fn channel_with_capacity(capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    /// Offer a fragment; dropped silently when the buffer is full or the
    /// consumer is gone.
    pub fn push(&self, fragment: &str) {
        if fragment.is_empty() {
            return;
        }
        let _ = self.tx.try_send(fragment.to_string());
    }

    /// Signal end-of-thinking with the empty-string sentinel.
    pub fn finish(&self) {
        let _ = self.tx.try_send(String::new());
    }
}

/// Transport-level provider failures. Domain errors never take this path;
/// they ride in tool-result payloads instead.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("authentication failed: {message}")]
    Authentication { message: String },
    #[error("rate limit exceeded")]
    RateLimit { retry_after: Option<String> },
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },
    #[error("network error: {message}")]
    Network { message: String },
    #[error("provider error: {message}")]
    Provider {
        message: String,
        status: Option<u16>,
    },
    #[error("cancelled")]
    Cancelled,
}

impl LlmError {
    /// Classify an HTTP status + body into a typed error. Providers wrap
    /// their errors in near-identical JSON envelopes; pull the message and
    /// code out when present so the surfaced text stays readable.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|parsed| {
                let error = parsed.get("error")?;
                let message = error
                    .get("message")
                    .and_then(Value::as_str)
                    .or_else(|| error.as_str())?;
                let code = error
                    .get("code")
                    .or_else(|| error.get("type"))
                    .and_then(Value::as_str);
                Some(match code {
                    Some(code) => format!("{message} ({code})"),
                    None => message.to_string(),
                })
            })
            .unwrap_or_else(|| body.trim().to_string());
        let message = if detail.is_empty() {
            format!("HTTP {status}")
        } else {
            format!("HTTP {status}: {detail}")
        };
        match status {
            401 | 403 => LlmError::Authentication { message },
            429 => LlmError::RateLimit { retry_after: None },
            400 | 404 | 409 | 422 => LlmError::InvalidRequest { message },
            _ => LlmError::Provider {
                message,
                status: Some(status),
            },
        }
    }
}

impl From<reqwest::Error> for LlmError {
    fn from(error: reqwest::Error) -> Self {
        LlmError::Network {
            message: error.to_string(),
        }
    }
}

/// Baseline chat capability plus probes for the optional facets.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Provider id (e.g. "anthropic", "openai", "ollama").
    fn name(&self) -> &str;

    /// Model identifier used on the wire.
    fn model_id(&self) -> &str;

    /// One conversational turn without tool constraints.
    async fn chat(
        &self,
        messages: &[Message],
        enable_thinking: bool,
        thinking_sink: Option<ThinkingSink>,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError>;

    /// Whether the model accepts image content.
    fn supports_vision(&self) -> bool {
        false
    }

    /// Whether the provider surfaces pre-answer thinking.
    fn supports_thinking(&self) -> bool {
        false
    }

    /// Providers that truncate context server-side make local compaction
    /// unnecessary.
    fn supports_server_side_truncation(&self) -> bool {
        false
    }

    /// Input-side context window for the configured model.
    fn max_context_tokens(&self) -> usize {
        defaults::CONTEXT_WINDOW_TOKENS
    }

    /// Usage reported by the most recent call.
    fn last_token_usage(&self) -> Option<TokenUsage> {
        None
    }

    /// Session-scoped cache hints this provider was configured with.
    fn cache_hints(&self) -> Option<&CacheHintsConfig> {
        None
    }

    /// Tool-calling facet, when implemented.
    fn as_tool_calling(&self) -> Option<&dyn ToolCallingProvider> {
        None
    }

    /// Structured-output facet, when implemented.
    fn as_structured(&self) -> Option<&dyn StructuredProvider> {
        None
    }

    /// Cache-key facet, when implemented.
    fn as_cache_key(&self) -> Option<&dyn CacheKeyProvider> {
        None
    }
}

/// Tool-calling capability.
#[async_trait]
pub trait ToolCallingProvider: ChatProvider {
    /// Install the registry whose tools are advertised on every call.
    fn set_tool_manager(&self, manager: Arc<dyn ToolManager>);

    /// One turn under a tool-choice constraint. Returns an Assistant
    /// message, a ToolCall, or a ToolCallBatch depending on what the
    /// model emitted.
    async fn chat_with_tool_choice(
        &self,
        messages: &[Message],
        choice: ToolChoice,
        enable_thinking: bool,
        thinking_sink: Option<ThinkingSink>,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError>;
}

/// Structured-output capability: the response is forced to match a JSON
/// schema. The strategy (native schema mode, forced single tool, or a
/// provider-specific format) is the adapter's business.
#[async_trait]
pub trait StructuredProvider: ChatProvider {
    async fn chat_with_structure(
        &self,
        messages: &[Message],
        schema: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError>;
}

/// Deterministic request fingerprint for an optional local response cache.
pub trait CacheKeyProvider: ChatProvider {
    fn make_cache_key(
        &self,
        messages: &[Message],
        choice: Option<&ToolChoice>,
    ) -> anyhow::Result<String>;
}

/// Deserialize a structured response into a caller type.
pub async fn chat_structured<T: serde::de::DeserializeOwned>(
    provider: &dyn StructuredProvider,
    messages: &[Message],
    schema: &Value,
    cancel: &CancellationToken,
) -> Result<T, LlmError> {
    let value = provider.chat_with_structure(messages, schema, cancel).await?;
    serde_json::from_value(value).map_err(|error| LlmError::Provider {
        message: format!("structured response did not match schema: {error}"),
        status: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thinking_sink_drops_on_full_without_blocking() {
        let (sink, mut rx) = ThinkingSink::channel_with_capacity(2);
        sink.push("one");
        sink.push("two");
        sink.push("three"); // dropped
        sink.finish(); // dropped too; buffer still full
        assert_eq!(rx.try_recv().ok().as_deref(), Some("one"));
        assert_eq!(rx.try_recv().ok().as_deref(), Some("two"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn error_body_envelopes_are_unwrapped() {
        let openai_style = LlmError::from_status(
            400,
            r#"{"error":{"message":"model overloaded","type":"server_error"}}"#,
        );
        assert!(
            openai_style
                .to_string()
                .contains("model overloaded (server_error)")
        );

        let ollama_style = LlmError::from_status(404, r#"{"error":"model not found"}"#);
        assert!(ollama_style.to_string().contains("model not found"));

        let plain = LlmError::from_status(500, "upstream exploded");
        assert!(plain.to_string().contains("HTTP 500: upstream exploded"));
    }

    #[test]
    fn status_classification() {
        assert!(matches!(
            LlmError::from_status(401, ""),
            LlmError::Authentication { .. }
        ));
        assert!(matches!(
            LlmError::from_status(429, ""),
            LlmError::RateLimit { .. }
        ));
        assert!(matches!(
            LlmError::from_status(400, "bad"),
            LlmError::InvalidRequest { .. }
        ));
        assert!(matches!(
            LlmError::from_status(500, "boom"),
            LlmError::Provider {
                status: Some(500),
                ..
            }
        ));
    }
}
