//! Threshold-triggered transcript compaction.
//!
//! When the last provider call's context utilization crosses the
//! threshold, everything before the last N complete tool-call/result pairs
//! is summarized by the provider itself and replaced with a single
//! Summary message. The retained tail keeps its pairing invariant: the
//! boundary is pulled back until no kept result references a summarized
//! call.

use anyhow::{Context, Result};
use std::fmt::Write as _;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::llm::provider::ChatProvider;
use crate::message::{Message, MessageKind, MessageSource};

use super::Transcript;

const SUMMARY_INSTRUCTIONS: &str = "Summarize the conversation so far. Preserve decisions, \
    file paths, commands, tool outcomes, and open questions. Keep it concise but actionable.";

/// Tool results above this length are clipped in the summary prompt; the
/// summary call must not itself blow the context window.
const MAX_RESULT_CHARS: usize = 2_000;

fn clip(text: &str) -> &str {
    match text.char_indices().nth(MAX_RESULT_CHARS) {
        Some((boundary, _)) => &text[..boundary],
        None => text,
    }
}

impl Transcript {
    /// Context-window utilization of the most recent call, 0.0 when no
    /// call has happened yet.
    pub fn utilization(&self, max_context_tokens: usize) -> f64 {
        if max_context_tokens == 0 {
            return 0.0;
        }
        let Some(usage) = self.last_call_usage() else {
            return 0.0;
        };
        (usage.input + usage.output) as f64 / max_context_tokens as f64
    }

    /// Compact when utilization is at or above `threshold`. Returns true
    /// when a summary replaced the prefix.
    pub async fn compact_if_needed(
        &mut self,
        provider: &dyn ChatProvider,
        threshold: f64,
        keep_pairs: usize,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let max_context = provider.max_context_tokens();
        let utilization = self.utilization(max_context);
        if utilization < threshold {
            return Ok(false);
        }

        let boundary = self.compaction_boundary(keep_pairs);
        if boundary == 0 {
            debug!("compaction triggered but nothing precedes the retained tail");
            return Ok(false);
        }

        info!(
            utilization = format!("{:.2}", utilization),
            summarized = boundary,
            retained = self.messages.len() - boundary,
            "compacting transcript"
        );

        let prompt = build_summary_prompt(&self.messages[..boundary]);
        let response = provider
            .chat(&[Message::user(prompt)], false, None, cancel)
            .await
            .context("failed to generate compaction summary")?;

        let summary = Message::system(format!(
            "Previous conversation summary:\n{}",
            response.content.trim()
        ))
        .with_source(MessageSource::Summary);

        let tail = self.messages.split_off(boundary);
        self.messages = std::iter::once(summary).chain(tail).collect();
        Ok(true)
    }

    /// Index of the first message retained verbatim: the call-side message
    /// of the `keep_pairs`-th complete pair from the end, pulled back far
    /// enough that no retained result loses its call.
    fn compaction_boundary(&self, keep_pairs: usize) -> usize {
        let completed = self.completed_call_ids();
        let mut counted = 0usize;
        let mut boundary = self.messages.len();

        for (index, message) in self.messages.iter().enumerate().rev() {
            let call_side = matches!(
                message.kind,
                MessageKind::ToolCall(_) | MessageKind::ToolCallBatch(_)
            );
            if call_side && Self::call_side_complete(message, &completed) {
                counted += 1;
                boundary = index;
                if counted == keep_pairs {
                    break;
                }
            }
        }

        if counted == 0 {
            // No pairs yet: retain a short plain tail instead.
            return self.messages.len().saturating_sub(2 * keep_pairs.max(1));
        }

        // Keep every call whose result survived into the tail.
        loop {
            let mut new_boundary = boundary;
            for message in &self.messages[boundary..] {
                if !message.is_tool_result() {
                    continue;
                }
                if let Some(call_index) = self.messages.iter().position(|candidate| {
                    candidate
                        .invocations()
                        .iter()
                        .any(|invocation| invocation.id == message.id)
                }) && call_index < new_boundary
                {
                    new_boundary = call_index;
                }
            }
            if new_boundary == boundary {
                break;
            }
            boundary = new_boundary;
        }
        boundary
    }
}

fn build_summary_prompt(messages: &[Message]) -> String {
    let mut formatted = String::new();
    let _ = writeln!(&mut formatted, "{SUMMARY_INSTRUCTIONS}");

    for message in messages {
        match &message.kind {
            MessageKind::Reasoning => continue,
            MessageKind::ToolCall(invocation) => {
                let _ = writeln!(
                    &mut formatted,
                    "\n[tool call]\n{}({})",
                    invocation.name,
                    serde_json::Value::Object(invocation.arguments.clone())
                );
            }
            MessageKind::ToolCallBatch(calls) => {
                let _ = writeln!(&mut formatted, "\n[tool call batch]");
                for invocation in calls {
                    let _ = writeln!(
                        &mut formatted,
                        "{}({})",
                        invocation.name,
                        serde_json::Value::Object(invocation.arguments.clone())
                    );
                }
            }
            MessageKind::ToolResult { result, error } => {
                let text = if error.is_empty() { result } else { error };
                if !text.trim().is_empty() {
                    let _ = writeln!(&mut formatted, "\n[tool result]\n{}", clip(text.trim()));
                }
            }
            MessageKind::User => {
                if !message.content.trim().is_empty() {
                    let _ = writeln!(&mut formatted, "\n[user]\n{}", message.content.trim());
                }
            }
            MessageKind::Assistant => {
                if !message.content.trim().is_empty() {
                    let _ = writeln!(&mut formatted, "\n[assistant]\n{}", message.content.trim());
                }
            }
            MessageKind::System => {
                if !message.content.trim().is_empty() {
                    let _ = writeln!(&mut formatted, "\n[system]\n{}", message.content.trim());
                }
            }
        }
    }
    formatted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::provider::{LlmError, ThinkingSink};
    use crate::message::TokenUsage;
    use async_trait::async_trait;
    use serde_json::Map;

    struct SummarizingProvider;

    #[async_trait]
    impl ChatProvider for SummarizingProvider {
        fn name(&self) -> &str {
            "mock"
        }

        fn model_id(&self) -> &str {
            "mock-model"
        }

        async fn chat(
            &self,
            _messages: &[Message],
            _enable_thinking: bool,
            _thinking_sink: Option<ThinkingSink>,
            _cancel: &CancellationToken,
        ) -> Result<Message, LlmError> {
            Ok(Message::assistant("condensed history"))
        }

        fn max_context_tokens(&self) -> usize {
            1_000
        }
    }

    fn transcript_with_pairs(pairs: usize) -> Transcript {
        let mut transcript = Transcript::new();
        transcript.append(Message::user("start"));
        for index in 0..pairs {
            let call = Message::tool_call(format!("tool_{index}"), Map::new());
            let result = Message::tool_result(call.id.clone(), format!("result {index}"));
            transcript.append(call);
            transcript.append(result);
        }
        let mut last = Message::assistant("progress");
        last.set_token_usage(TokenUsage::new(900, 50));
        transcript.append(last);
        transcript
    }

    #[tokio::test]
    async fn below_threshold_is_a_no_op() {
        let mut transcript = transcript_with_pairs(4);
        // 950 / 1000 = 0.95; threshold above it.
        let compacted = transcript
            .compact_if_needed(&SummarizingProvider, 0.99, 2, &CancellationToken::new())
            .await
            .expect("compaction check");
        assert!(!compacted);
    }

    #[tokio::test]
    async fn compaction_preserves_last_pairs_and_pairing() {
        let mut transcript = transcript_with_pairs(4);
        let before = transcript.len();
        let compacted = transcript
            .compact_if_needed(&SummarizingProvider, 0.85, 2, &CancellationToken::new())
            .await
            .expect("compaction runs");
        assert!(compacted);
        assert!(transcript.len() < before);

        let messages = transcript.messages();
        assert_eq!(messages[0].source, MessageSource::Summary);
        assert!(messages[0].content.contains("condensed history"));

        // Exactly the last two pairs survive.
        let call_count = messages
            .iter()
            .filter(|message| message.is_tool_call())
            .count();
        assert_eq!(call_count, 2);

        // No orphan results.
        for message in messages {
            if message.is_tool_result() {
                assert!(
                    messages.iter().any(|candidate| candidate
                        .invocations()
                        .iter()
                        .any(|invocation| invocation.id == message.id)),
                    "result without call after compaction"
                );
            }
        }
    }

    #[tokio::test]
    async fn utilization_without_usage_is_zero() {
        let transcript = Transcript::new();
        assert_eq!(transcript.utilization(1_000), 0.0);
    }

    #[test]
    fn oversized_tool_results_are_clipped_in_the_prompt() {
        let mut transcript = Transcript::new();
        let call = Message::tool_call("read_file", Map::new());
        let id = call.id.clone();
        transcript.append(call);
        transcript.append(Message::tool_result(id, "x".repeat(50_000)));

        let prompt = build_summary_prompt(transcript.messages());
        assert!(prompt.len() < 10_000);
    }

    #[test]
    fn summary_prompt_includes_tool_traffic() {
        let mut transcript = Transcript::new();
        transcript.append(Message::user("change foo"));
        let mut args = Map::new();
        args.insert("path".to_string(), serde_json::json!("a.txt"));
        let call = Message::tool_call("read_file", args);
        let id = call.id.clone();
        transcript.append(call);
        transcript.append(Message::tool_result(id, "contents"));

        let prompt = build_summary_prompt(transcript.messages());
        assert!(prompt.contains("[user]"));
        assert!(prompt.contains("read_file"));
        assert!(prompt.contains("[tool result]"));
    }
}
