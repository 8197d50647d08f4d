//! Ollama adapter for local open-source models.
//!
//! Speaks the `/api/chat` newline-delimited JSON stream. Back-ends differ
//! on when tool calls appear: some emit them mid-stream, others only on
//! the final chunk, so every chunk's `tool_calls` list is merged. The
//! structured-output path uses the native `format` field carrying a JSON
//! schema.

use async_trait::async_trait;
use futures::StreamExt;
use parking_lot::{Mutex, RwLock};
use reqwest::Client as HttpClient;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::ProviderConfig;
use crate::config::constants::{env_vars, message_roles, models, urls};
use crate::message::{Message, MessageKind, TokenUsage, ToolInvocation, next_message_id};
use crate::tools::{ToolManager, arguments_to_schema};

use super::super::provider::{
    CacheKeyProvider, ChatProvider, LlmError, StructuredProvider, ThinkingSink,
    ToolCallingProvider, ToolChoice,
};
use super::super::sanitize::ToolNameSanitizer;
use super::retry::send_with_retries;
use super::{LineBuffer, UsageCell, override_base_url, request_cache_key, resolve_model};

const CONTEXT_WINDOW: usize = 32_768;

pub struct OllamaProvider {
    http_client: HttpClient,
    base_url: String,
    model: String,
    max_output_tokens: u32,
    tool_manager: RwLock<Option<Arc<dyn ToolManager>>>,
    sanitizer: Mutex<ToolNameSanitizer>,
    last_usage: UsageCell,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self::with_settings(models::ollama::DEFAULT_MODEL.to_string(), None, 8_192)
    }

    pub fn from_config(config: &ProviderConfig) -> Self {
        Self::with_settings(
            resolve_model(config.model.as_deref(), models::ollama::DEFAULT_MODEL),
            config.base_url.clone(),
            config.max_output_tokens,
        )
    }

    fn with_settings(model: String, base_url: Option<String>, max_output_tokens: u32) -> Self {
        Self {
            http_client: HttpClient::new(),
            base_url: override_base_url(
                urls::OLLAMA_API_BASE,
                base_url.as_deref(),
                Some(env_vars::OLLAMA_BASE_URL),
            ),
            model,
            max_output_tokens,
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
                MessageKind::System => wire.push(json!({
                    "role": message_roles::SYSTEM,
                    "content": message.content,
                })),
                MessageKind::User => {
                    let mut entry = json!({
                        "role": message_roles::USER,
                        "content": message.content,
                    });
                    if let Some(images) = &message.images
                        && !images.is_empty()
                    {
                        entry["images"] = json!(images);
                    }
                    wire.push(entry);
                }
                MessageKind::Assistant => wire.push(json!({
                    "role": message_roles::ASSISTANT,
                    "content": message.content,
                })),
                MessageKind::ToolCall(_) | MessageKind::ToolCallBatch(_) => {
                    let tool_calls: Vec<Value> = message
                        .invocations()
                        .iter()
                        .map(|invocation| {
                            json!({
                                "function": {
                                    "name": sanitizer.sanitize(&invocation.name),
                                    "arguments": Value::Object(invocation.arguments.clone()),
                                },
                            })
                        })
                        .collect();
                    wire.push(json!({
                        "role": message_roles::ASSISTANT,
                        "content": message.content,
                        "tool_calls": tool_calls,
                    }));
                }
                MessageKind::ToolResult { result, error } => {
                    let content = if error.is_empty() { result } else { error };
                    wire.push(json!({
                        "role": message_roles::TOOL,
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
        enable_thinking: bool,
        format: Option<&Value>,
    ) -> Value {
        let mut body = json!({
            "model": self.model,
            "messages": self.build_messages(messages),
            "stream": true,
            "options": { "num_predict": self.max_output_tokens },
        });
        if let Some(tools) = tools {
            body["tools"] = Value::Array(tools);
        }
        if enable_thinking {
            body["think"] = json!(true);
        }
        if let Some(format) = format {
            body["format"] = format.clone();
        }
        body
    }

    async fn dispatch(
        &self,
        body: Value,
        thinking_sink: Option<&ThinkingSink>,
        cancel: &CancellationToken,
    ) -> Result<StreamedChat, LlmError> {
        let url = format!("{}/api/chat", self.base_url);
        let response =
            send_with_retries(|| self.http_client.post(&url).json(&body), cancel).await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status(status.as_u16(), &body));
        }

        let mut accumulated = StreamedChat::default();
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
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<Value>(&line) {
                    Ok(parsed) => accumulated.apply_chunk(&parsed, thinking_sink),
                    Err(error) => warn!(%error, "skipping unparseable chat chunk"),
                }
            }
        }
        if let Some(rest) = buffer.finish()
            && let Ok(parsed) = serde_json::from_str::<Value>(&rest)
        {
            accumulated.apply_chunk(&parsed, thinking_sink);
        }
        if accumulated.saw_thinking
            && let Some(sink) = thinking_sink
        {
            sink.finish();
        }
        Ok(accumulated)
    }

    fn into_message(&self, accumulated: StreamedChat) -> Message {
        let usage = TokenUsage::new(accumulated.prompt_tokens, accumulated.eval_tokens);
        self.last_usage.store(usage);

        let sanitizer = self.sanitizer.lock();
        // Local back-ends do not assign call ids; generate correlatable ones.
        let invocations: Vec<ToolInvocation> = accumulated
            .tool_calls
            .iter()
            .map(|call| {
                let name = call
                    .pointer("/function/name")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let arguments = call
                    .pointer("/function/arguments")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                ToolInvocation::new(next_message_id(), sanitizer.unsanitize(name), arguments)
            })
            .collect();
        drop(sanitizer);

        let thinking = (!accumulated.thinking.is_empty()).then(|| accumulated.thinking.clone());
        let mut message = match invocations.len() {
            0 => Message::assistant(accumulated.content.clone()),
            1 => {
                let invocation = invocations.into_iter().next().expect("one invocation");
                let mut call = Message::tool_call_with_id(
                    invocation.id.clone(),
                    invocation.name,
                    invocation.arguments,
                );
                call.content = accumulated.content.clone();
                call
            }
            _ => {
                let mut batch = Message::tool_call_batch(invocations);
                batch.content = accumulated.content.clone();
                batch
            }
        };
        message = message.with_thinking(thinking);
        message.set_token_usage(usage);
        debug!(
            input_tokens = usage.input,
            output_tokens = usage.output,
            "ollama call complete"
        );
        message
    }
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulated state from the newline-delimited chunk stream.
#[derive(Default)]
struct StreamedChat {
    content: String,
    thinking: String,
    /// Raw `tool_calls` entries merged across every chunk.
    tool_calls: Vec<Value>,
    prompt_tokens: u64,
    eval_tokens: u64,
    saw_thinking: bool,
}

impl StreamedChat {
    fn apply_chunk(&mut self, chunk: &Value, thinking_sink: Option<&ThinkingSink>) {
        if let Some(message) = chunk.get("message") {
            if let Some(content) = message.get("content").and_then(Value::as_str) {
                self.content.push_str(content);
            }
            if let Some(fragment) = message
                .get("thinking")
                .and_then(Value::as_str)
                .filter(|fragment| !fragment.is_empty())
            {
                self.thinking.push_str(fragment);
                self.saw_thinking = true;
                if let Some(sink) = thinking_sink {
                    sink.push(fragment);
                }
            }
            if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
                self.tool_calls.extend(calls.iter().cloned());
            }
        }
        if let Some(prompt) = chunk.get("prompt_eval_count").and_then(Value::as_u64) {
            self.prompt_tokens = prompt;
        }
        if let Some(eval) = chunk.get("eval_count").and_then(Value::as_u64) {
            self.eval_tokens = eval;
        }
    }
}

#[async_trait]
impl ChatProvider for OllamaProvider {
    fn name(&self) -> &str {
        models::ollama::PROVIDER
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
        let body = self.build_body(messages, None, enable_thinking, None);
        let accumulated = self.dispatch(body, thinking_sink.as_ref(), cancel).await?;
        Ok(self.into_message(accumulated))
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
impl ToolCallingProvider for OllamaProvider {
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
        // The chat endpoint has no tool_choice field; None is emulated by
        // omitting the tool list, Any/Specific are advisory only.
        let tools = if choice == ToolChoice::None {
            None
        } else {
            self.build_tools()
        };
        let body = self.build_body(messages, tools, enable_thinking, None);
        let accumulated = self.dispatch(body, thinking_sink.as_ref(), cancel).await?;
        Ok(self.into_message(accumulated))
    }
}

#[async_trait]
impl StructuredProvider for OllamaProvider {
    /// Structured output through the native `format` JSON-schema field.
    async fn chat_with_structure(
        &self,
        messages: &[Message],
        schema: &Value,
        cancel: &CancellationToken,
    ) -> Result<Value, LlmError> {
        let body = self.build_body(messages, None, false, Some(schema));
        let accumulated = self.dispatch(body, None, cancel).await?;
        let message = self.into_message(accumulated);
        serde_json::from_str(&message.content).map_err(|error| LlmError::Provider {
            message: format!("structured response was not valid JSON: {error}"),
            status: None,
        })
    }
}

impl CacheKeyProvider for OllamaProvider {
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

    fn provider() -> OllamaProvider {
        OllamaProvider::with_settings(
            "qwen2.5-coder:7b".to_string(),
            Some("http://localhost:0".to_string()),
            512,
        )
    }

    #[test]
    fn tool_calls_merge_across_chunks() {
        let mut accumulated = StreamedChat::default();
        let chunks = [
            json!({"message": {"content": "", "tool_calls": [
                {"function": {"name": "read_file", "arguments": {"path": "a.txt"}}}
            ]}}),
            json!({"message": {"content": "and"}}),
            json!({"message": {"tool_calls": [
                {"function": {"name": "list_files", "arguments": {}}}
            ]}, "done": true, "prompt_eval_count": 15, "eval_count": 6}),
        ];
        for chunk in &chunks {
            accumulated.apply_chunk(chunk, None);
        }
        assert_eq!(accumulated.tool_calls.len(), 2);
        assert_eq!(accumulated.prompt_tokens, 15);

        let provider = provider();
        let message = provider.into_message(accumulated);
        assert!(message.is_tool_call_batch());
        let invocations = message.invocations();
        assert_eq!(invocations[0].name, "read_file");
        assert_eq!(invocations[0].arguments["path"], "a.txt");
        assert_eq!(invocations[1].name, "list_files");
        assert_ne!(invocations[0].id, invocations[1].id);
    }

    #[test]
    fn single_tool_call_is_a_plain_tool_call_message() {
        let mut accumulated = StreamedChat::default();
        accumulated.apply_chunk(
            &json!({"message": {"tool_calls": [
                {"function": {"name": "edit_file", "arguments": {"path": "b.rs"}}}
            ]}, "done": true}),
            None,
        );
        let provider = provider();
        let message = provider.into_message(accumulated);
        assert!(message.is_tool_call());
        assert_eq!(message.invocation().map(|inv| inv.name.as_str()), Some("edit_file"));
    }

    #[test]
    fn thinking_fragments_reach_the_sink() {
        let (sink, mut rx) = ThinkingSink::channel();
        let mut accumulated = StreamedChat::default();
        accumulated.apply_chunk(
            &json!({"message": {"thinking": "hmm ", "content": ""}}),
            Some(&sink),
        );
        accumulated.apply_chunk(
            &json!({"message": {"thinking": "okay", "content": "answer"}}),
            Some(&sink),
        );
        assert_eq!(rx.try_recv().ok().as_deref(), Some("hmm "));
        assert_eq!(rx.try_recv().ok().as_deref(), Some("okay"));
        assert_eq!(accumulated.content, "answer");
    }

    #[test]
    fn tool_result_role_maps_to_tool() {
        let provider = provider();
        let result = Message::tool_result("id-1", "output");
        let wire = provider.build_messages(&[result]);
        assert_eq!(wire[0]["role"], "tool");
        assert_eq!(wire[0]["content"], "output");
    }
}
