//! OpenAI Chat Completions adapter.
//!
//! Prefers streaming. Some accounts reject streaming for reasoning models
//! ("organization must be verified to stream"); on that rejection the
//! adapter remembers the fact and re-issues the identical request
//! non-streaming. Both paths feed the same accumulator so responses parse
//! identically either way.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::Client as HttpClient;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::constants::{env_vars, message_roles, models, urls};
use crate::config::{CacheHintsConfig, ProviderConfig};
use crate::message::{Message, MessageKind, TokenUsage, ToolInvocation};
use crate::tools::{ToolManager, arguments_to_schema};

use super::super::provider::{
    CacheKeyProvider, ChatProvider, LlmError, StructuredProvider, ThinkingSink,
    ToolCallingProvider, ToolChoice,
};
use super::super::sanitize::ToolNameSanitizer;
use super::retry::send_with_retries;
use super::{LineBuffer, UsageCell, override_base_url, request_cache_key, resolve_model, sse_data};

const CONTEXT_WINDOW: usize = 128_000;

/// Models that expose reasoning and use `max_completion_tokens`.
fn is_reasoning_model(model: &str) -> bool {
    model.starts_with("o1") || model.starts_with("o3") || model.starts_with("o4")
}

pub struct OpenAiProvider {
    api_key: String,
    http_client: HttpClient,
    base_url: String,
    model: String,
    max_output_tokens: u32,
    cache_hints: CacheHintsConfig,
    /// Set after the backend rejects a streaming request; later calls go
    /// straight to non-streaming.
    streaming_rejected: AtomicBool,
    tool_manager: RwLock<Option<Arc<dyn ToolManager>>>,
    sanitizer: Mutex<ToolNameSanitizer>,
    last_usage: UsageCell,
}

impl OpenAiProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_settings(
            api_key,
            models::openai::DEFAULT_MODEL.to_string(),
            None,
            8_192,
            CacheHintsConfig::default(),
        )
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::with_settings(
            config.resolve_api_key().unwrap_or_default(),
            resolve_model(config.model.as_deref(), models::openai::DEFAULT_MODEL),
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
                urls::OPENAI_API_BASE,
                base_url.as_deref(),
                Some(env_vars::OPENAI_BASE_URL),
            ),
            model,
            max_output_tokens,
            cache_hints,
            streaming_rejected: AtomicBool::new(false),
            tool_manager: RwLock::new(None),
            sanitizer: Mutex::new(ToolNameSanitizer::new()),
            last_usage: UsageCell::default(),
        }
    }

    fn build_messages(&self, messages: &[Message]) -> Vec<Value> {
        let mut sanitizer = self.sanitizer.lock();
        let mut wire = Vec::new();
        for message in messages {
            match &message.kind {
                MessageKind::Reasoning => {}
                MessageKind::System => {
                    wire.push(json!({
                        "role": message_roles::SYSTEM,
                        "content": message.content,
                    }));
                }
                MessageKind::User => {
                    if message.has_images() {
                        let mut parts = Vec::new();
                        if !message.content.is_empty() {
                            parts.push(json!({ "type": "text", "text": message.content }));
                        }
                        for image in message.images.iter().flatten() {
                            parts.push(json!({
                                "type": "image_url",
                                "image_url": { "url": format!("data:image/jpeg;base64,{image}") },
                            }));
                        }
                        wire.push(json!({ "role": message_roles::USER, "content": parts }));
                    } else {
                        wire.push(json!({
                            "role": message_roles::USER,
                            "content": message.content,
                        }));
                    }
                }
                MessageKind::Assistant => {
                    wire.push(json!({
                        "role": message_roles::ASSISTANT,
                        "content": message.content,
                    }));
                }
                MessageKind::ToolCall(_) | MessageKind::ToolCallBatch(_) => {
                    let tool_calls: Vec<Value> = message
                        .invocations()
                        .iter()
                        .map(|invocation| {
                            json!({
                                "id": invocation.id,
                                "type": "function",
                                "function": {
                                    "name": sanitizer.sanitize(&invocation.name),
                                    "arguments": Value::Object(invocation.arguments.clone())
                                        .to_string(),
                                },
                            })
                        })
                        .collect();
                    let content = if message.content.is_empty() {
                        Value::Null
                    } else {
                        Value::String(message.content.clone())
                    };
                    wire.push(json!({
                        "role": message_roles::ASSISTANT,
                        "content": content,
                        "tool_calls": tool_calls,
                    }));
                }
                MessageKind::ToolResult { result, error } => {
                    let content = if error.is_empty() { result } else { error };
                    wire.push(json!({
                        "role": message_roles::TOOL,
                        "tool_call_id": message.id,
                        "content": content,
                    }));
                }
            }
        }
        wire
    }

    fn build_tools(&self) -> Option<Vec<Value>> {
        let manager = self.tool_manager.read().clone()?;
        let tools = manager.tools();
        if tools.is_empty() {
            return None;
        }
        let mut names: Vec<String> = tools.keys().cloned().collect();
        names.sort();
        let mut sanitizer = self.sanitizer.lock();
        Some(
            names
                .iter()
                .filter_map(|name| tools.get(name))
                .map(|tool| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": sanitizer.sanitize(tool.name()),
                            "description": tool.description(),
                            "parameters": arguments_to_schema(&tool.arguments()),
                        },
                    })
                })
                .collect(),
        )
    }

    fn build_body(
        &self,
        messages: &[Message],
        tools: Option<Vec<Value>>,
        choice: Option<&ToolChoice>,
        enable_thinking: bool,
        stream: bool,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.build_messages(messages),
        });
        if is_reasoning_model(&self.model) {
            body["max_completion_tokens"] = json!(self.max_output_tokens);
            if enable_thinking {
                body["reasoning_effort"] = json!("medium");
            }
        } else {
            body["max_tokens"] = json!(self.max_output_tokens);
        }
        if let Some(session_id) = &self.cache_hints.session_id {
            body["user"] = json!(session_id);
        }
        if let Some(tools) = tools {
            body["tools"] = Value::Array(tools);
            if let Some(choice) = choice {
                body["tool_choice"] = match choice {
                    ToolChoice::Auto => json!("auto"),
                    ToolChoice::Any => json!("required"),
                    ToolChoice::None => json!("none"),
                    ToolChoice::Specific(name) => json!({
                        "type": "function",
                        "function": { "name": self.sanitizer.lock().sanitize(name) },
                    }),
                };
            }
        }
        if stream {
            body["stream"] = json!(true);
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    /// Whether an error response is the "streaming not permitted" signal
    /// rather than a genuine request failure.
    fn is_streaming_rejection(status: u16, body: &str) -> bool {
        if status != 400 && status != 403 {
            return false;
        }
        let lowered = body.to_ascii_lowercase();
        lowered.contains("stream")
            && (lowered.contains("must be verified")
                || lowered.contains("not supported")
                || lowered.contains("unsupported")
                || lowered.contains("not allowed"))
    }

    async fn dispatch(
        &self,
        mut body: Value,
        thinking_sink: Option<&ThinkingSink>,
        cancel: &CancellationToken,
    ) -> Result<Accumulator, LlmError> {
        let stream_allowed = !self.streaming_rejected.load(Ordering::Relaxed);
        if !stream_allowed
            && let Some(object) = body.as_object_mut()
        {
            object.remove("stream");
            object.remove("stream_options");
        }

        let response = self.send(&body, cancel).await?;
        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            if stream_allowed && Self::is_streaming_rejection(status.as_u16(), &error_body) {
                info!("streaming rejected by backend; retrying non-streaming");
                self.streaming_rejected.store(true, Ordering::Relaxed);
                if let Some(object) = body.as_object_mut() {
                    object.remove("stream");
                    object.remove("stream_options");
                }
                let retry = self.send(&body, cancel).await?;
                let retry_status = retry.status();
                if !retry_status.is_success() {
                    let retry_body = retry.text().await.unwrap_or_default();
                    return Err(LlmError::from_status(retry_status.as_u16(), &retry_body));
                }
                return self.read_unified(retry, false, thinking_sink, cancel).await;
            }
            return Err(LlmError::from_status(status.as_u16(), &error_body));
        }

        let streaming = body.get("stream").and_then(Value::as_bool).unwrap_or(false);
        self.read_unified(response, streaming, thinking_sink, cancel)
            .await
    }

    async fn send(
        &self,
        body: &Value,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        send_with_retries(
            || {
                self.http_client
                    .post(&url)
                    .bearer_auth(&self.api_key)
                    .header("content-type", "application/json")
                    .json(body)
            },
            cancel,
        )
        .await
    }

    /// Drain a response, streaming or not, through the shared accumulator.
    async fn read_unified(
        &self,
        response: reqwest::Response,
        streaming: bool,
        thinking_sink: Option<&ThinkingSink>,
        cancel: &CancellationToken,
    ) -> Result<Accumulator, LlmError> {
        let mut accumulator = Accumulator::default();
        if streaming {
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
                    match serde_json::from_str::<Value>(payload) {
                        Ok(chunk) => accumulator.apply_chunk(&chunk, thinking_sink),
                        Err(error) => warn!(%error, "skipping unparseable stream chunk"),
                    }
                }
            }
            if let Some(sink) = thinking_sink
                && accumulator.saw_reasoning
            {
                sink.finish();
            }
        } else {
            let value: Value = tokio::select! {
                _ = cancel.cancelled() => return Err(LlmError::Cancelled),
                value = response.json() => value?,
            };
            accumulator.apply_complete(&value, thinking_sink);
        }
        Ok(accumulator)
    }

    fn into_message(&self, accumulator: Accumulator) -> Message {
        let usage = accumulator.usage();
        self.last_usage.store(usage);

        let sanitizer = self.sanitizer.lock();
        let invocations: Vec<ToolInvocation> = accumulator
            .tool_calls
            .iter()
            .map(|pending| {
                let arguments = serde_json::from_str::<Value>(&pending.arguments)
                    .ok()
                    .and_then(|value| value.as_object().cloned())
                    .unwrap_or_default();
                ToolInvocation::new(
                    pending.id.clone(),
                    sanitizer.unsanitize(&pending.name),
                    arguments,
                )
            })
            .collect();
        drop(sanitizer);

        let thinking = (!accumulator.reasoning.is_empty()).then(|| accumulator.reasoning.clone());
        let mut message = match invocations.len() {
            0 => Message::assistant(accumulator.content.clone()),
            1 => {
                let invocation = invocations.into_iter().next().expect("one invocation");
                let mut call = Message::tool_call_with_id(
                    invocation.id.clone(),
                    invocation.name,
                    invocation.arguments,
                );
                call.content = accumulator.content.clone();
                call
            }
            _ => {
                let mut batch = Message::tool_call_batch(invocations);
                batch.content = accumulator.content.clone();
                batch
            }
        };
        message = message.with_thinking(thinking);
        message.set_token_usage(usage);
        debug!(
            input_tokens = usage.input,
            output_tokens = usage.output,
            "openai call complete"
        );
        message
    }
}

/// Parse state shared by the streaming and non-streaming paths.
#[derive(Default)]
struct Accumulator {
    content: String,
    reasoning: String,
    tool_calls: Vec<PendingToolCall>,
    prompt_tokens: u64,
    completion_tokens: u64,
    cached_tokens: u64,
    saw_reasoning: bool,
}

#[derive(Default)]
struct PendingToolCall {
    id: String,
    name: String,
    arguments: String,
}

impl Accumulator {
    /// Apply one streaming chunk.
    fn apply_chunk(&mut self, chunk: &Value, thinking_sink: Option<&ThinkingSink>) {
        if let Some(delta) = chunk.pointer("/choices/0/delta") {
            self.apply_delta(delta, thinking_sink);
        }
        self.apply_usage(chunk.get("usage"));
    }

    /// Apply a full non-streaming response.
    fn apply_complete(&mut self, value: &Value, thinking_sink: Option<&ThinkingSink>) {
        if let Some(message) = value.pointer("/choices/0/message") {
            self.apply_delta(message, thinking_sink);
            if self.saw_reasoning
                && let Some(sink) = thinking_sink
            {
                sink.finish();
            }
        }
        self.apply_usage(value.get("usage"));
    }

    /// Message and delta objects share field names; one merge handles both.
    fn apply_delta(&mut self, delta: &Value, thinking_sink: Option<&ThinkingSink>) {
        if let Some(content) = delta.get("content").and_then(Value::as_str) {
            self.content.push_str(content);
        }
        if let Some(reasoning) = delta
            .get("reasoning_content")
            .and_then(Value::as_str)
            .filter(|fragment| !fragment.is_empty())
        {
            self.reasoning.push_str(reasoning);
            self.saw_reasoning = true;
            if let Some(sink) = thinking_sink {
                sink.push(reasoning);
            }
        }
        if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
            for entry in tool_calls {
                let index = entry
                    .get("index")
                    .and_then(Value::as_u64)
                    .map(|index| index as usize)
                    .unwrap_or(self.tool_calls.len());
                while self.tool_calls.len() <= index {
                    self.tool_calls.push(PendingToolCall::default());
                }
                let pending = &mut self.tool_calls[index];
                if let Some(id) = entry.get("id").and_then(Value::as_str) {
                    pending.id = id.to_string();
                }
                if let Some(name) = entry.pointer("/function/name").and_then(Value::as_str) {
                    pending.name.push_str(name);
                }
                if let Some(arguments) = entry
                    .pointer("/function/arguments")
                    .and_then(Value::as_str)
                {
                    pending.arguments.push_str(arguments);
                }
            }
        }
    }

    fn apply_usage(&mut self, usage: Option<&Value>) {
        let Some(usage) = usage else { return };
        if let Some(prompt) = usage.get("prompt_tokens").and_then(Value::as_u64) {
            self.prompt_tokens = prompt;
        }
        if let Some(completion) = usage.get("completion_tokens").and_then(Value::as_u64) {
            self.completion_tokens = completion;
        }
        if let Some(cached) = usage
            .pointer("/prompt_tokens_details/cached_tokens")
            .and_then(Value::as_u64)
        {
            self.cached_tokens = cached;
        }
    }

    fn usage(&self) -> TokenUsage {
        TokenUsage {
            input: self.prompt_tokens,
            output: self.completion_tokens,
            total: self.prompt_tokens + self.completion_tokens,
            cached: self.cached_tokens,
            cache_creation: 0,
        }
    }
}

#[async_trait]
impl ChatProvider for OpenAiProvider {
    fn name(&self) -> &str {
        models::openai::PROVIDER
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
        let body = self.build_body(messages, None, None, enable_thinking, true);
        let accumulator = self.dispatch(body, thinking_sink.as_ref(), cancel).await?;
        Ok(self.into_message(accumulator))
    }

    fn supports_vision(&self) -> bool {
        !is_reasoning_model(&self.model)
    }

    fn supports_thinking(&self) -> bool {
        is_reasoning_model(&self.model)
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
impl ToolCallingProvider for OpenAiProvider {
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
        let body = self.build_body(messages, tools, Some(&choice), enable_thinking, true);
        let accumulator = self.dispatch(body, thinking_sink.as_ref(), cancel).await?;
        Ok(self.into_message(accumulator))
    }
}

#[async_trait]
impl StructuredProvider for OpenAiProvider {
    /// Structured output through the native JSON-schema response format.
    async fn chat_with_structure(
        &self,
        messages: &[Message],
        schema: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError> {
        let mut body = self.build_body(messages, None, None, false, false);
        body["response_format"] = json!({
            "type": "json_schema",
            "json_schema": {
                "name": "response",
                "schema": schema,
                "strict": true,
            },
        });
        let accumulator = self.dispatch(body, None, cancel).await?;
        let message = self.into_message(accumulator);
        serde_json::from_str(&message.content).map_err(|error| LlmError::Provider {
            message: format!("structured response was not valid JSON: {error}"),
            status: None,
        })
    }
}

impl CacheKeyProvider for OpenAiProvider {
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
    use serde_json::Map;

    fn provider() -> OpenAiProvider {
        OpenAiProvider::with_settings(
            "test-key".to_string(),
            "gpt-4.1".to_string(),
            Some("http://localhost:0".to_string()),
            1024,
            CacheHintsConfig::default(),
        )
    }

    #[test]
    fn tool_results_use_the_tool_role() {
        let provider = provider();
        let call = Message::tool_call_with_id("call_1", "read_file", Map::new());
        let result = Message::tool_result("call_1", "contents");
        let wire = provider.build_messages(&[call, result]);
        assert_eq!(wire[0]["role"], "assistant");
        assert_eq!(wire[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(wire[1]["role"], "tool");
        assert_eq!(wire[1]["tool_call_id"], "call_1");
    }

    #[test]
    fn streaming_rejection_detection() {
        assert!(OpenAiProvider::is_streaming_rejection(
            400,
            r#"{"error":{"message":"Your organization must be verified to stream this model"}}"#
        ));
        assert!(OpenAiProvider::is_streaming_rejection(
            400,
            r#"{"error":{"message":"stream is not supported for this model"}}"#
        ));
        assert!(!OpenAiProvider::is_streaming_rejection(
            400,
            r#"{"error":{"message":"invalid request"}}"#
        ));
        assert!(!OpenAiProvider::is_streaming_rejection(500, "stream unsupported"));
    }

    #[test]
    fn chunked_tool_call_arguments_accumulate_by_index() {
        let mut accumulator = Accumulator::default();
        let chunks = [
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "id": "call_a", "function": {"name": "edit_file", "arguments": "{\"path\""}}
            ]}}]}),
            json!({"choices": [{"delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": ": \"a.txt\"}"}}
            ]}}]}),
            json!({"usage": {"prompt_tokens": 12, "completion_tokens": 3,
                "prompt_tokens_details": {"cached_tokens": 5}}}),
        ];
        for chunk in &chunks {
            accumulator.apply_chunk(chunk, None);
        }
        assert_eq!(accumulator.tool_calls.len(), 1);
        assert_eq!(accumulator.tool_calls[0].arguments, "{\"path\": \"a.txt\"}");
        let usage = accumulator.usage();
        assert_eq!(usage.input, 12);
        assert_eq!(usage.cached, 5);
    }

    #[test]
    fn non_streaming_response_parses_with_same_logic() {
        let mut accumulator = Accumulator::default();
        let response = json!({
            "choices": [{"message": {
                "content": "done",
                "reasoning_content": "because",
                "tool_calls": [
                    {"id": "call_1", "function": {"name": "read_file", "arguments": "{}"}},
                    {"id": "call_2", "function": {"name": "list_files", "arguments": "{}"}}
                ]
            }}],
            "usage": {"prompt_tokens": 20, "completion_tokens": 9}
        });
        accumulator.apply_complete(&response, None);
        assert_eq!(accumulator.content, "done");
        assert_eq!(accumulator.reasoning, "because");
        assert_eq!(accumulator.tool_calls.len(), 2);

        let provider = provider();
        let message = provider.into_message(accumulator);
        assert!(message.is_tool_call_batch());
        assert_eq!(message.thinking.as_deref(), Some("because"));
        assert_eq!(message.token_usage.total, 29);
    }
}
