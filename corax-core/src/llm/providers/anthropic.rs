//! Anthropic Messages API adapter.
//!
//! Always streams. Thinking blocks are forwarded to the sink as they
//! arrive and their opaque signatures are preserved in message metadata so
//! later turns can replay them losslessly. When prompt caching is enabled
//! the last tool definition carries an ephemeral cache marker, caching the
//! whole tool list for the session.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::Client as HttpClient;
use serde_json::{Map, Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::constants::{env_vars, models, tools as tool_names, urls};
use crate::config::{CacheHintsConfig, ProviderConfig};
use crate::message::{
    METADATA_THINKING_SIGNATURE, Message, MessageKind, TokenUsage, ToolInvocation,
};
use crate::tools::{ToolManager, arguments_to_schema};

use super::super::provider::{
    CacheKeyProvider, ChatProvider, LlmError, StructuredProvider, ThinkingSink,
    ToolCallingProvider, ToolChoice,
};
use super::super::sanitize::ToolNameSanitizer;
use super::retry::send_with_retries;
use super::{LineBuffer, UsageCell, override_base_url, request_cache_key, resolve_model, sse_data};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const PROMPT_CACHE_BETA: &str = "prompt-caching-2024-07-31";
const THINKING_BUDGET_TOKENS: u32 = 4_096;
const CONTEXT_WINDOW: usize = 200_000;

pub struct AnthropicProvider {
    api_key: String,
    http_client: HttpClient,
    base_url: String,
    model: String,
    max_output_tokens: u32,
    cache_hints: CacheHintsConfig,
    tool_manager: RwLock<Option<Arc<dyn ToolManager>>>,
    sanitizer: Mutex<ToolNameSanitizer>,
    last_usage: UsageCell,
}

impl AnthropicProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_settings(
            api_key,
            models::anthropic::DEFAULT_MODEL.to_string(),
            None,
            8_192,
            CacheHintsConfig::default(),
        )
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::with_settings(
            config.resolve_api_key().unwrap_or_default(),
            resolve_model(config.model.as_deref(), models::anthropic::DEFAULT_MODEL),
            config.base_url.clone(),
            config.max_output_tokens,
            config.cache.clone(),
        )
    }

    fn with_settings(
        api_key: String,
        model: String,
        base_url: Option<String>,
        max_output_tokens: u32,
        cache_hints: CacheHintsConfig,
    ) -> Self {
        Self {
            api_key,
            http_client: HttpClient::new(),
            base_url: override_base_url(
                urls::ANTHROPIC_API_BASE,
                base_url.as_deref(),
                Some(env_vars::ANTHROPIC_BASE_URL),
            ),
            model,
            max_output_tokens,
            cache_hints,
            tool_manager: RwLock::new(None),
            sanitizer: Mutex::new(ToolNameSanitizer::new()),
            last_usage: UsageCell::default(),
        }
    }

    fn prompt_cache_enabled(&self) -> bool {
        self.cache_hints.prompt_caching_enabled
    }

    /// Translate core messages into Anthropic wire messages, hoisting
    /// system content into the out-of-band `system` parameter.
    fn build_messages(&self, messages: &[Message]) -> (Option<String>, Vec<Value>) {
        let mut system_parts: Vec<String> = Vec::new();
        let mut wire: Vec<Value> = Vec::new();
        let mut sanitizer = self.sanitizer.lock();

        for message in messages {
            match &message.kind {
                MessageKind::System => {
                    if !message.content.is_empty() {
                        system_parts.push(message.content.clone());
                    }
                }
                MessageKind::Reasoning => {}
                MessageKind::User => {
                    let mut blocks = Vec::new();
                    if !message.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": message.content }));
                    }
                    for image in message.images.iter().flatten() {
                        blocks.push(image_block(image));
                    }
                    if !blocks.is_empty() {
                        push_merged(&mut wire, "user", blocks);
                    }
                }
                MessageKind::Assistant => {
                    let mut blocks = Vec::new();
                    if let Some(block) = thinking_block(message) {
                        blocks.push(block);
                    }
                    if !message.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": message.content }));
                    }
                    if !blocks.is_empty() {
                        push_merged(&mut wire, "assistant", blocks);
                    }
                }
                MessageKind::ToolCall(_) | MessageKind::ToolCallBatch(_) => {
                    let mut blocks = Vec::new();
                    if let Some(block) = thinking_block(message) {
                        blocks.push(block);
                    }
                    if !message.content.is_empty() {
                        blocks.push(json!({ "type": "text", "text": message.content }));
                    }
                    for invocation in message.invocations() {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": invocation.id,
                            "name": sanitizer.sanitize(&invocation.name),
                            "input": Value::Object(invocation.arguments.clone()),
                        }));
                    }
                    push_merged(&mut wire, "assistant", blocks);
                }
                MessageKind::ToolResult { result, error } => {
                    let is_error = !error.is_empty();
                    let text = if is_error { error } else { result };
                    let mut content = vec![json!({ "type": "text", "text": text })];
                    for image in message.images.iter().flatten() {
                        content.push(image_block(image));
                    }
                    let block = json!({
                        "type": "tool_result",
                        "tool_use_id": message.id,
                        "content": content,
                        "is_error": is_error,
                    });
                    push_merged(&mut wire, "user", vec![block]);
                }
            }
        }

        let system = if system_parts.is_empty() {
            None
        } else {
            Some(system_parts.join("\n\n"))
        };
        (system, wire)
    }

    /// Tool definitions in a stable order, with the ephemeral cache marker
    /// on the last entry when prompt caching is on.
    fn build_tools(&self) -> Option<Vec<Value>> {
        let manager = self.tool_manager.read().clone()?;
        let tools = manager.tools();
        if tools.is_empty() {
            return None;
        }
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();

        let mut sanitizer = self.sanitizer.lock();
        let mut definitions: Vec<Value> = names
            .iter()
            .filter_map(|name| tools.get(name))
            .map(|tool| {
                json!({
                    "name": sanitizer.sanitize(tool.name()),
                    "description": tool.description(),
                    "input_schema": arguments_to_schema(&tool.arguments()),
                })
            })
            .collect();

        if self.prompt_cache_enabled()
            && let Some(last) = definitions.last_mut()
            && let Some(object) = last.as_object_mut()
        {
            object.insert("cache_control".to_string(), json!({ "type": "ephemeral" }));
        }
        Some(definitions)
    }

    fn build_body(
        &self,
        messages: &[Message],
        tools: Option<Vec<Value>>,
        choice: Option<&ToolChoice>,
        enable_thinking: bool,
    ) -> Value {
        let (system, wire_messages) = self.build_messages(messages);
        let mut body = json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "messages": wire_messages,
            "stream": true,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if let Some(session_id) = &self.cache_hints.session_id {
            body["metadata"] = json!({ "user_id": session_id });
        }
        if let Some(tools) = tools {
            body["tools"] = Value::Array(tools);
            if let Some(choice) = choice {
                let choice_value = match choice {
                    ToolChoice::Auto => json!({ "type": "auto" }),
                    ToolChoice::Any => json!({ "type": "any" }),
                    ToolChoice::Specific(name) => json!({
                        "type": "tool",
                        "name": self.sanitizer.lock().sanitize(name),
                    }),
                    ToolChoice::None => Value::Null,
                };
                if !choice_value.is_null() {
                    body["tool_choice"] = choice_value;
                }
            }
        }
        if enable_thinking {
            body["thinking"] = json!({
                "type": "enabled",
                "budget_tokens": THINKING_BUDGET_TOKENS,
            });
        }
        body
    }

    async fn dispatch(
        &self,
        body: Value,
        thinking_sink: Option<&ThinkingSink>,
        cancel: &CancellationToken,
    ) -> Result<StreamedResponse, LlmError> {
        let url = format!("{}/messages", self.base_url);
        let response = send_with_retries(
            || {
                let mut request = self
                    .http_client
                    .post(&url)
                    .header("x-api-key", &self.api_key)
                    .header("anthropic-version", ANTHROPIC_VERSION)
                    .header("content-type", "application/json");
                if self.prompt_cache_enabled() {
                    request = request.header("anthropic-beta", PROMPT_CACHE_BETA);
                }
                request.json(&body)
            },
            cancel,
        )
        .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), &body));
        }

        let mut accumulated = StreamedResponse::default();
        let mut buffer = LineBuffer::default();
        let mut stream = response.bytes_stream();

        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                chunk = stream.next() => chunk,
            };
            let Some(chunk) = chunk else { break };
            let chunk = chunk?;
            for line in buffer.push(&chunk) {
                let Some(payload) = sse_data(&line) else {
                    continue;
                };
                let event: Value = match serde_json::from_str(payload) {
                    Ok(event) => event,
                    Err(error) => {
                        warn!(%error, "skipping unparseable stream event");
                        continue;
                    }
                };
                self.handle_event(&event, &mut accumulated, thinking_sink)?;
            }
        }
        Ok(accumulated)
    }

    fn handle_event(
        &self,
        event: &Value,
        accumulated: &mut StreamedResponse,
        thinking_sink: Option<&ThinkingSink>,
    ) -> Result<(), LlmError> {
        match event.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(usage) = event.pointer("/message/usage") {
                    accumulated.usage.input = usage
                        .get("input_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    accumulated.usage.cached = usage
                        .get("cache_read_input_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    accumulated.usage.cache_creation = usage
                        .get("cache_creation_input_tokens")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                }
            }
            Some("content_block_start") => {
                let block = event.get("content_block");
                match block.and_then(|b| b.get("type")).and_then(Value::as_str) {
                    Some("tool_use") => {
                        accumulated.tool_uses.push(PendingToolUse {
                            id: block
                                .and_then(|b| b.get("id"))
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            name: block
                                .and_then(|b| b.get("name"))
                                .and_then(Value::as_str)
                                .unwrap_or_default()
                                .to_string(),
                            input_json: String::new(),
                        });
                    }
                    Some("thinking") => accumulated.in_thinking_block = true,
                    _ => {}
                }
            }
            Some("content_block_delta") => {
                let delta = event.get("delta");
                match delta.and_then(|d| d.get("type")).and_then(Value::as_str) {
                    Some("text_delta") => {
                        if let Some(text) = delta.and_then(|d| d.get("text")).and_then(Value::as_str)
                        {
                            accumulated.text.push_str(text);
                        }
                    }
                    Some("thinking_delta") => {
                        if let Some(fragment) = delta
                            .and_then(|d| d.get("thinking"))
                            .and_then(Value::as_str)
                        {
                            accumulated.thinking.push_str(fragment);
                            if let Some(sink) = thinking_sink {
                                sink.push(fragment);
                            }
                        }
                    }
                    Some("signature_delta") => {
                        if let Some(signature) = delta
                            .and_then(|d| d.get("signature"))
                            .and_then(Value::as_str)
                        {
                            accumulated.signature.push_str(signature);
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(partial) = delta
                            .and_then(|d| d.get("partial_json"))
                            .and_then(Value::as_str)
                            && let Some(pending) = accumulated.tool_uses.last_mut()
                        {
                            pending.input_json.push_str(partial);
                        }
                    }
                    _ => {}
                }
            }
            Some("content_block_stop") => {
                if accumulated.in_thinking_block {
                    accumulated.in_thinking_block = false;
                    if let Some(sink) = thinking_sink {
                        sink.finish();
                    }
                }
            }
            Some("message_delta") => {
                if let Some(output) = event
                    .pointer("/usage/output_tokens")
                    .and_then(Value::as_u64)
                {
                    accumulated.usage.output = output;
                }
            }
            Some("error") => {
                let message = event
                    .pointer("/error/message")
                    .and_then(Value::as_str)
                    .unwrap_or("stream error")
                    .to_string();
                return Err(LlmError::Provider {
                    message,
                    status: None,
                });
            }
            _ => {}
        }
        Ok(())
    }

    /// Convert the accumulated stream into a core message.
    fn into_message(&self, mut accumulated: StreamedResponse) -> Message {
        accumulated.usage.total = accumulated.usage.input + accumulated.usage.output;
        self.last_usage.store(accumulated.usage);

        let sanitizer = self.sanitizer.lock();
        let invocations: Vec<ToolInvocation> = accumulated
            .tool_uses
            .iter()
            .map(|pending| {
                let arguments = if pending.input_json.trim().is_empty() {
                    Map::new()
                } else {
                    serde_json::from_str::<Value>(&pending.input_json)
                        .ok()
                        .and_then(|value| value.as_object().cloned())
                        .unwrap_or_default()
                };
                ToolInvocation::new(
                    pending.id.clone(),
                    sanitizer.unsanitize(&pending.name),
                    arguments,
                )
            })
            .collect();
        drop(sanitizer);

        let thinking = (!accumulated.thinking.is_empty()).then(|| accumulated.thinking.clone());
        let mut message = match invocations.len() {
            0 => Message::assistant(accumulated.text.clone()),
            1 => {
                let invocation = invocations.into_iter().next().expect("one invocation");
                let mut call = Message::tool_call_with_id(
                    invocation.id.clone(),
                    invocation.name,
                    invocation.arguments,
                );
                call.content = accumulated.text.clone();
                call
            }
            _ => {
                let mut batch = Message::tool_call_batch(invocations);
                batch.content = accumulated.text.clone();
                batch
            }
        };
        message = message.with_thinking(thinking);
        if !accumulated.signature.is_empty() {
            message = message.with_metadata(
                METADATA_THINKING_SIGNATURE,
                Value::String(accumulated.signature.clone()),
            );
        }
        message.set_token_usage(accumulated.usage);
        debug!(
            input_tokens = accumulated.usage.input,
            output_tokens = accumulated.usage.output,
            cached_tokens = accumulated.usage.cached,
            "anthropic call complete"
        );
        message
    }
}

/// Incremental state gathered from the SSE stream.
#[derive(Default)]
struct StreamedResponse {
    text: String,
    thinking: String,
    signature: String,
    tool_uses: Vec<PendingToolUse>,
    usage: TokenUsage,
    in_thinking_block: bool,
}

struct PendingToolUse {
    id: String,
    name: String,
    input_json: String,
}

fn image_block(base64_data: &str) -> Value {
    json!({
        "type": "image",
        "source": {
            "type": "base64",
            "media_type": "image/jpeg",
            "data": base64_data,
        },
    })
}

/// Replay a preserved thinking block, signature included, so multi-turn
/// tool use stays valid.
fn thinking_block(message: &Message) -> Option<Value> {
    let thinking = message.thinking.as_ref()?;
    let signature = message
        .metadata
        .get(METADATA_THINKING_SIGNATURE)
        .and_then(Value::as_str)?;
    Some(json!({
        "type": "thinking",
        "thinking": thinking,
        "signature": signature,
    }))
}

/// Append blocks, merging into the previous wire message when the role
/// matches (the API wants alternating roles).
fn push_merged(wire: &mut Vec<Value>, role: &str, blocks: Vec<Value>) {
    if blocks.is_empty() {
        return;
    }
    if let Some(last) = wire.last_mut()
        && last.get("role").and_then(Value::as_str) == Some(role)
        && let Some(content) = last.get_mut("content").and_then(Value::as_array_mut)
    {
        content.extend(blocks);
        return;
    }
    wire.push(json!({ "role": role, "content": blocks }));
}

#[async_trait]
impl ChatProvider for AnthropicProvider {
    fn name(&self) -> &str {
        models::anthropic::PROVIDER
    }

    fn model_id(&self) -> &str {
        &self.model
    }

    async fn chat(
        &self,
        messages: &[Message],
        enable_thinking: bool,
        thinking_sink: Option<ThinkingSink>,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError> {
        let body = self.build_body(messages, None, None, enable_thinking);
        let accumulated = self.dispatch(body, thinking_sink.as_ref(), cancel).await?;
        Ok(self.into_message(accumulated))
    }

    fn supports_vision(&self) -> bool {
        true
    }

    fn supports_thinking(&self) -> bool {
        true
    }

    fn max_context_tokens(&self) -> usize {
        CONTEXT_WINDOW
    }

    fn last_token_usage(&self) -> Option<TokenUsage> {
        self.last_usage.load()
    }

    fn cache_hints(&self) -> Option<&CacheHintsConfig> {
        Some(&self.cache_hints)
    }

    fn as_tool_calling(&self) -> Option<&dyn ToolCallingProvider> {
        Some(self)
    }

    fn as_structured(&self) -> Option<&dyn StructuredProvider> {
        Some(self)
    }

    fn as_cache_key(&self) -> Option<&dyn CacheKeyProvider> {
        Some(self)
    }
}

#[async_trait]
impl ToolCallingProvider for AnthropicProvider {
    fn set_tool_manager(&self, manager: Arc<dyn ToolManager>) {
        *self.tool_manager.write() = Some(manager);
    }

    async fn chat_with_tool_choice(
        &self,
        messages: &[Message],
        choice: ToolChoice,
        enable_thinking: bool,
        thinking_sink: Option<ThinkingSink>,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError> {
        let tools = if choice == ToolChoice::None {
            None
        } else {
            self.build_tools()
        };
        let body = self.build_body(messages, tools, Some(&choice), enable_thinking);
        let accumulated = self.dispatch(body, thinking_sink.as_ref(), cancel).await?;
        Ok(self.into_message(accumulated))
    }
}

#[async_trait]
impl StructuredProvider for AnthropicProvider {
    /// Structured output through a synthesized single tool forced via tool
    /// choice; the tool input is the structured value.
    async fn chat_with_structure(
        &self,
        messages: &[Message],
        schema: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError> {
        let tools = vec![json!({
            "name": tool_names::STRUCTURED_RESPOND,
            "description": "Provide the final answer in the required structure.",
            "input_schema": schema,
        })];
        let mut body = self.build_body(messages, Some(tools), None, false);
        body["tool_choice"] = json!({
            "type": "tool",
            "name": tool_names::STRUCTURED_RESPOND,
        });

        let accumulated = self.dispatch(body, None, cancel).await?;
        let message = self.into_message(accumulated);
        match message.invocations().first() {
            Some(invocation) => Ok(Value::Object(invocation.arguments.clone())),
            None => Err(LlmError::Provider {
                message: "model did not produce a structured response".to_string(),
                status: None,
            }),
        }
    }
}

impl CacheKeyProvider for AnthropicProvider {
    fn make_cache_key(
        &self,
        messages: &[Message],
        choice: Option<&ToolChoice>,
    ) -> anyhow::Result<String> {
        request_cache_key(self.name(), &self.model, messages, choice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> AnthropicProvider {
        AnthropicProvider::with_settings(
            "test-key".to_string(),
            models::anthropic::DEFAULT_MODEL.to_string(),
            Some("http://localhost:0".to_string()),
            1024,
            CacheHintsConfig::default(),
        )
    }

    #[test]
    fn system_messages_are_hoisted() {
        let provider = provider();
        let messages = vec![
            Message::system("you are a coding agent"),
            Message::user("hello"),
        ];
        let (system, wire) = provider.build_messages(&messages);
        assert_eq!(system.as_deref(), Some("you are a coding agent"));
        assert_eq!(wire.len(), 1);
        assert_eq!(wire[0]["role"], "user");
    }

    #[test]
    fn tool_results_become_user_tool_result_blocks() {
        let provider = provider();
        let call = Message::tool_call_with_id("toolu_1", "read_file", Map::new());
        let result = Message::tool_result("toolu_1", "file contents");
        let (_, wire) = provider.build_messages(&[call, result]);
        assert_eq!(wire.len(), 2);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["content"][0]["type"], "tool_use");
        assert_eq!(wire[1]["role"], "user");
        assert_eq!(wire[1]["content"][0]["type"], "tool_result");
        assert_eq!(wire[1]["content"][0]["tool_use_id"], "toolu_1");
        assert_eq!(wire[1]["content"][0]["is_error"], false);
    }

    #[test]
    fn consecutive_same_role_messages_merge() {
        let provider = provider();
        let messages = vec![Message::user("one"), Message::user("two")];
        let (_, wire) = provider.build_messages(&messages);
        assert_eq!(wire.len(), 1);
        assert_eq!(
            wire[0]["content"]
                .as_array()
                .map(|blocks| blocks.len())
                .unwrap_or(0),
            2
        );
    }

    #[test]
    fn stream_events_accumulate_text_and_tools() {
        let provider = provider();
        let mut accumulated = StreamedResponse::default();
        let events = [
            json!({"type": "message_start", "message": {"usage": {"input_tokens": 10, "cache_read_input_tokens": 4, "cache_creation_input_tokens": 2}}}),
            json!({"type": "content_block_start", "content_block": {"type": "tool_use", "id": "toolu_9", "name": "read_file"}}),
            json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": "{\"path\":"}}),
            json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": "\"a.txt\"}"}}),
            json!({"type": "message_delta", "usage": {"output_tokens": 7}}),
        ];
        for event in &events {
            provider
                .handle_event(event, &mut accumulated, None)
                .expect("event handled");
        }
        let message = provider.into_message(accumulated);
        let invocation = message.invocation().expect("tool call");
        assert_eq!(invocation.name, "read_file");
        assert_eq!(invocation.arguments["path"], "a.txt");
        assert_eq!(message.token_usage.input, 10);
        assert_eq!(message.token_usage.output, 7);
        assert_eq!(message.token_usage.cached, 4);
        assert_eq!(message.token_usage.cache_creation, 2);
    }

    #[test]
    fn thinking_signature_round_trips_into_replay_block() {
        let provider = provider();
        let mut accumulated = StreamedResponse::default();
        let events = [
            json!({"type": "content_block_start", "content_block": {"type": "thinking"}}),
            json!({"type": "content_block_delta", "delta": {"type": "thinking_delta", "thinking": "let me see"}}),
            json!({"type": "content_block_delta", "delta": {"type": "signature_delta", "signature": "sig-1"}}),
            json!({"type": "content_block_stop"}),
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "answer"}}),
        ];
        for event in &events {
            provider
                .handle_event(event, &mut accumulated, None)
                .expect("event handled");
        }
        let message = provider.into_message(accumulated);
        assert_eq!(message.thinking.as_deref(), Some("let me see"));

        let (_, wire) = provider.build_messages(&[message]);
        assert_eq!(wire[0]["content"][0]["type"], "thinking");
        assert_eq!(wire[0]["content"][0]["signature"], "sig-1");
    }

    #[test]
    fn two_tool_uses_become_a_batch() {
        let provider = provider();
        let accumulated = StreamedResponse {
            tool_uses: vec![
                PendingToolUse {
                    id: "toolu_1".into(),
                    name: "read_file".into(),
                    input_json: "{}".into(),
                },
                PendingToolUse {
                    id: "toolu_2".into(),
                    name: "list_files".into(),
                    input_json: String::new(),
                },
            ],
            ..StreamedResponse::default()
        };
        let message = provider.into_message(accumulated);
        assert!(message.is_tool_call_batch());
        assert_eq!(message.invocations().len(), 2);
    }
}
