//! Typed conversation records.
//!
//! Every entry in a transcript is a [`Message`]. Tool calls, tool results,
//! and batches are specialized kinds rather than separate types so the
//! transcript stays an ordered, homogeneous sequence; correlation between a
//! call and its result is by id, never by reference.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Metadata key under which adapters preserve an opaque thinking signature.
pub const METADATA_THINKING_SIGNATURE: &str = "thinking_signature";

static MESSAGE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Generate a process-unique, time-seeded message id.
///
/// The millisecond prefix keeps ids sortable across sessions; the sequence
/// suffix keeps them unique within one.
pub fn next_message_id() -> String {
    let seq = MESSAGE_SEQ.fetch_add(1, Ordering::Relaxed);
    format!("msg-{}-{}", Utc::now().timestamp_millis(), seq)
}

/// One tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    /// Call id correlating the eventual result. For a standalone
    /// `ToolCall` message this equals the message id.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl ToolInvocation {
    pub fn new(id: String, name: String, arguments: Map<String, Value>) -> Self {
        Self {
            id,
            name,
            arguments,
        }
    }
}

/// Message kinds. Tool-related kinds carry their specialized payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    User,
    Assistant,
    System,
    /// Display-only reasoning trace; stripped before provider requests
    /// and never persisted.
    Reasoning,
    ToolCall(ToolInvocation),
    ToolResult {
        /// Successful output; empty when `error` is set.
        #[serde(default)]
        result: String,
        /// Domain error visible to the model; empty on success.
        #[serde(default)]
        error: String,
    },
    /// Two or more tool calls emitted by a single model turn.
    ToolCallBatch(Vec<ToolInvocation>),
}

/// Where a message came from, driving cleanup and compaction behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    #[default]
    Default,
    /// Ephemeral per-iteration context; purged before the next model call.
    Situation,
    /// Compaction output; replaces the transcript prefix it summarizes.
    Summary,
}

/// Token accounting for a single provider call, attached to the message
/// the call produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TokenUsage {
    pub input: u64,
    pub output: u64,
    pub total: u64,
    pub cached: u64,
    pub cache_creation: u64,
}

impl TokenUsage {
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input,
            output,
            total: input + output,
            cached: 0,
            cache_creation: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0 && self.cached == 0 && self.cache_creation == 0
    }
}

/// A single transcript record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    /// Pre-answer reasoning returned by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thinking: Option<String>,
    /// Base64-encoded images, in order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub source: MessageSource,
    /// Opaque to the core; adapters round-trip provider-specific values
    /// (e.g. thinking signatures) through here.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,
    #[serde(default, skip_serializing_if = "TokenUsage::is_empty")]
    pub token_usage: TokenUsage,
}

impl Message {
    fn base(kind: MessageKind, content: String) -> Self {
        Self {
            id: next_message_id(),
            kind,
            content,
            thinking: None,
            images: None,
            timestamp: Utc::now(),
            source: MessageSource::Default,
            metadata: HashMap::new(),
            token_usage: TokenUsage::default(),
        }
    }

    /// Create a user message.
    #[inline]
    pub fn user(content: impl Into<String>) -> Self {
        Self::base(MessageKind::User, content.into())
    }

    /// Create a user message carrying images.
    pub fn user_with_images(content: impl Into<String>, images: Vec<String>) -> Self {
        let mut message = Self::user(content);
        if !images.is_empty() {
            message.images = Some(images);
        }
        message
    }

    /// Create an assistant message.
    #[inline]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::base(MessageKind::Assistant, content.into())
    }

    /// Create a system message.
    #[inline]
    pub fn system(content: impl Into<String>) -> Self {
        Self::base(MessageKind::System, content.into())
    }

    /// Create a display-only reasoning message.
    #[inline]
    pub fn reasoning(content: impl Into<String>) -> Self {
        Self::base(MessageKind::Reasoning, content.into())
    }

    /// Create a tool call. The message id doubles as the call id.
    pub fn tool_call(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self::tool_call_with_id(next_message_id(), name, arguments)
    }

    /// Create a tool call with a provider-supplied call id.
    pub fn tool_call_with_id(
        id: impl Into<String>,
        name: impl Into<String>,
        arguments: Map<String, Value>,
    ) -> Self {
        let id = id.into();
        let mut message = Self::base(
            MessageKind::ToolCall(ToolInvocation::new(id.clone(), name.into(), arguments)),
            String::new(),
        );
        message.id = id;
        message
    }

    /// Create a successful tool result correlated to `call_id`.
    pub fn tool_result(call_id: impl Into<String>, result: impl Into<String>) -> Self {
        let mut message = Self::base(
            MessageKind::ToolResult {
                result: result.into(),
                error: String::new(),
            },
            String::new(),
        );
        message.id = call_id.into();
        message
    }

    /// Create a failed tool result correlated to `call_id`.
    pub fn tool_error(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let mut message = Self::base(
            MessageKind::ToolResult {
                result: String::new(),
                error: error.into(),
            },
            String::new(),
        );
        message.id = call_id.into();
        message
    }

    /// Create a batch wrapping calls emitted by one model turn.
    /// Callers must pass at least two invocations; a single call should be
    /// a plain `ToolCall` message.
    pub fn tool_call_batch(calls: Vec<ToolInvocation>) -> Self {
        debug_assert!(calls.len() >= 2, "a batch wraps two or more calls");
        Self::base(MessageKind::ToolCallBatch(calls), String::new())
    }

    /// Attach a source tag.
    pub fn with_source(mut self, source: MessageSource) -> Self {
        self.source = source;
        self
    }

    /// Attach thinking text when non-empty.
    pub fn with_thinking(mut self, thinking: Option<String>) -> Self {
        self.thinking = thinking.filter(|t| !t.is_empty());
        self
    }

    /// Attach images when non-empty.
    pub fn with_images(mut self, images: Vec<String>) -> Self {
        if !images.is_empty() {
            self.images = Some(images);
        }
        self
    }

    /// Insert a metadata entry.
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Overwrite the token usage tuple.
    pub fn set_token_usage(&mut self, usage: TokenUsage) {
        self.token_usage = usage;
    }

    pub fn is_user(&self) -> bool {
        matches!(self.kind, MessageKind::User)
    }

    pub fn is_assistant(&self) -> bool {
        matches!(self.kind, MessageKind::Assistant)
    }

    pub fn is_system(&self) -> bool {
        matches!(self.kind, MessageKind::System)
    }

    pub fn is_reasoning(&self) -> bool {
        matches!(self.kind, MessageKind::Reasoning)
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self.kind, MessageKind::ToolCall(_))
    }

    pub fn is_tool_result(&self) -> bool {
        matches!(self.kind, MessageKind::ToolResult { .. })
    }

    pub fn is_tool_call_batch(&self) -> bool {
        matches!(self.kind, MessageKind::ToolCallBatch(_))
    }

    /// The invocation when this is a standalone tool call.
    pub fn invocation(&self) -> Option<&ToolInvocation> {
        match &self.kind {
            MessageKind::ToolCall(invocation) => Some(invocation),
            _ => None,
        }
    }

    /// All invocations this message carries: one for a `ToolCall`, each
    /// member for a batch, none otherwise.
    pub fn invocations(&self) -> &[ToolInvocation] {
        match &self.kind {
            MessageKind::ToolCall(invocation) => std::slice::from_ref(invocation),
            MessageKind::ToolCallBatch(calls) => calls,
            _ => &[],
        }
    }

    /// The result/error pair when this is a tool result.
    pub fn tool_outcome(&self) -> Option<(&str, &str)> {
        match &self.kind {
            MessageKind::ToolResult { result, error } => Some((result, error)),
            _ => None,
        }
    }

    pub fn has_images(&self) -> bool {
        self.images.as_ref().is_some_and(|imgs| !imgs.is_empty())
    }

    /// Rough token estimate for budgeting before a provider reports
    /// exact usage.
    pub fn estimate_tokens(&self) -> usize {
        let mut count = 4; // role overhead
        count += crate::utils::tokens::estimate_token_count(&self.content);
        if let Some(thinking) = &self.thinking {
            count += crate::utils::tokens::estimate_token_count(thinking);
        }
        for invocation in self.invocations() {
            count += 20;
            count += crate::utils::tokens::estimate_token_count(&invocation.name);
            count += crate::utils::tokens::estimate_token_count(
                &Value::Object(invocation.arguments.clone()).to_string(),
            );
        }
        if let Some((result, error)) = self.tool_outcome() {
            count += crate::utils::tokens::estimate_token_count(result);
            count += crate::utils::tokens::estimate_token_count(error);
        }
        // Images dominate whatever text rides along.
        count += self.images.as_ref().map_or(0, |images| images.len() * 1_000);
        count
    }

    /// One-line preview for status displays.
    pub fn truncated(&self, max_chars: usize) -> String {
        let text = match &self.kind {
            MessageKind::ToolCall(invocation) => format!("[tool:{}]", invocation.name),
            MessageKind::ToolCallBatch(calls) => format!("[batch of {} tool calls]", calls.len()),
            MessageKind::ToolResult { result, error } => {
                if error.is_empty() {
                    result.clone()
                } else {
                    format!("error: {error}")
                }
            }
            _ => self.content.clone(),
        };
        let single_line = text.split_whitespace().collect::<Vec<_>>().join(" ");
        if single_line.chars().count() <= max_chars {
            single_line
        } else {
            let truncated: String = single_line.chars().take(max_chars.saturating_sub(1)).collect();
            format!("{truncated}…")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn message_ids_are_unique_and_monotonic() {
        let a = Message::user("a");
        let b = Message::user("b");
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn tool_call_id_doubles_as_call_id() {
        let mut args = Map::new();
        args.insert("path".to_string(), json!("a.txt"));
        let call = Message::tool_call("read_file", args);
        let invocation = call.invocation().expect("tool call has an invocation");
        assert_eq!(invocation.id, call.id);
    }

    #[test]
    fn tool_result_reuses_originating_id() {
        let call = Message::tool_call("read_file", Map::new());
        let result = Message::tool_result(call.id.clone(), "contents");
        assert_eq!(result.id, call.id);
        let (ok, err) = result.tool_outcome().expect("result payload");
        assert_eq!(ok, "contents");
        assert!(err.is_empty());
    }

    #[test]
    fn truncated_collapses_whitespace() {
        let message = Message::assistant("line one\nline   two");
        assert_eq!(message.truncated(40), "line one line two");
        assert_eq!(message.truncated(8), "line on…");
    }

    #[test]
    fn batch_exposes_all_invocations() {
        let calls = vec![
            ToolInvocation::new("c1".into(), "read_file".into(), Map::new()),
            ToolInvocation::new("c2".into(), "list_files".into(), Map::new()),
        ];
        let batch = Message::tool_call_batch(calls);
        assert_eq!(batch.invocations().len(), 2);
        assert!(batch.is_tool_call_batch());
    }

    #[test]
    fn token_estimate_scales_with_content() {
        let short = Message::user("hi").estimate_tokens();
        let long = Message::user("a".repeat(4_000)).estimate_tokens();
        assert!(long > short + 900);

        let with_image =
            Message::user_with_images("hi", vec!["data".into()]).estimate_tokens();
        assert!(with_image >= short + 1_000);
    }

    #[test]
    fn metadata_round_trips_through_serde() {
        let message = Message::assistant("ok").with_metadata(
            METADATA_THINKING_SIGNATURE,
            json!("sig-abc"),
        );
        let encoded = serde_json::to_string(&message).expect("serialize");
        let decoded: Message = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(
            decoded.metadata.get(METADATA_THINKING_SIGNATURE),
            Some(&json!("sig-abc"))
        );
    }
}
