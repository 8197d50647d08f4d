//! Ordered, append-only conversation store.
//!
//! The transcript is owned by the iteration driver; everything else reads
//! message copies. Selection and cleanup never reorder messages, and every
//! operation preserves the tool-call/tool-result pairing invariant: a
//! retained result always has its originating call retained too.

use std::collections::HashSet;

use anyhow::Result;
use async_trait::async_trait;

use crate::message::{Message, MessageKind, MessageSource};

pub mod compaction;
pub mod history;

pub use history::FileHistoryRepository;

/// Persistence collaborator. Reasoning messages are display-only and are
/// stripped before they reach an implementation.
#[async_trait]
pub trait MessageHistoryRepository: Send + Sync {
    async fn save(&self, messages: &[Message]) -> Result<()>;
    async fn load(&self) -> Result<Vec<Message>>;
}

/// Append-only sequence of conversation messages.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Remove every message with the given source. Returns how many were
    /// dropped.
    pub fn purge_by_source(&mut self, source: MessageSource) -> usize {
        let before = self.messages.len();
        self.messages.retain(|message| message.source != source);
        before - self.messages.len()
    }

    /// Sum of input + output tokens across all messages.
    pub fn total_tokens(&self) -> u64 {
        self.messages
            .iter()
            .map(|message| message.token_usage.input + message.token_usage.output)
            .sum()
    }

    /// Token usage of the most recent provider call, if any message
    /// carries one.
    pub fn last_call_usage(&self) -> Option<crate::message::TokenUsage> {
        self.messages
            .iter()
            .rev()
            .find(|message| !message.token_usage.is_empty())
            .map(|message| message.token_usage)
    }

    /// Call ids that have a matching result somewhere in the transcript.
    fn completed_call_ids(&self) -> HashSet<&str> {
        let mut call_ids: HashSet<&str> = HashSet::new();
        for message in &self.messages {
            for invocation in message.invocations() {
                call_ids.insert(invocation.id.as_str());
            }
        }
        self.messages
            .iter()
            .filter(|message| message.is_tool_result())
            .map(|message| message.id.as_str())
            .filter(|id| call_ids.contains(id))
            .collect()
    }

    /// Whether every invocation this call-side message carries has a
    /// matching result.
    fn call_side_complete(message: &Message, completed: &HashSet<&str>) -> bool {
        let invocations = message.invocations();
        !invocations.is_empty()
            && invocations
                .iter()
                .all(|invocation| completed.contains(invocation.id.as_str()))
    }

    /// Return at most `k` of the most recent messages, keeping both halves
    /// of every retained tool-call/result pair or neither.
    ///
    /// Two passes: first mark every call id with a matching result, then
    /// walk newest to oldest skipping orphan halves until `k` messages are
    /// kept. A final sweep drops results whose call-side message fell past
    /// the cutoff.
    pub fn select_tail(&self, k: usize) -> Vec<Message> {
        if k == 0 {
            return Vec::new();
        }
        let completed = self.completed_call_ids();

        let mut kept_rev: Vec<&Message> = Vec::new();
        for message in self.messages.iter().rev() {
            if kept_rev.len() >= k {
                break;
            }
            match &message.kind {
                MessageKind::ToolCall(_) | MessageKind::ToolCallBatch(_) => {
                    if !Self::call_side_complete(message, &completed) {
                        continue;
                    }
                }
                MessageKind::ToolResult { .. } => {
                    if !completed.contains(message.id.as_str()) {
                        continue;
                    }
                }
                _ => {}
            }
            kept_rev.push(message);
        }

        let mut kept: Vec<Message> = kept_rev.into_iter().rev().cloned().collect();

        // The cutoff may have separated a result from its older call.
        let kept_call_ids: HashSet<String> = kept
            .iter()
            .flat_map(|message| message.invocations().iter().map(|inv| inv.id.clone()))
            .collect();
        kept.retain(|message| {
            !message.is_tool_result() || kept_call_ids.contains(message.id.as_str())
        });
        kept
    }

    /// Mandatory pre-request cleanup, idempotent:
    /// images survive only on the most recent user message and the very
    /// last tool result, and situation messages from prior iterations are
    /// purged. Order is preserved.
    pub fn cleanup_mandatory(&mut self) {
        let last_user = self
            .messages
            .iter()
            .rposition(|message| message.is_user());
        let last_tool_result = self
            .messages
            .iter()
            .rposition(|message| message.is_tool_result());

        for (index, message) in self.messages.iter_mut().enumerate() {
            let keep = Some(index) == last_user || Some(index) == last_tool_result;
            if !keep {
                message.images = None;
            }
        }

        self.purge_by_source(MessageSource::Situation);
    }

    /// Provider-facing view: reasoning messages are display-only and are
    /// excluded from requests.
    pub fn request_messages(&self) -> Vec<Message> {
        self.messages
            .iter()
            .filter(|message| !message.is_reasoning())
            .cloned()
            .collect()
    }

    /// Persist through the injected repository, eliding reasoning records.
    pub async fn save(&self, repository: &dyn MessageHistoryRepository) -> Result<()> {
        let persisted: Vec<Message> = self
            .messages
            .iter()
            .filter(|message| !message.is_reasoning())
            .cloned()
            .collect();
        repository.save(&persisted).await
    }

    /// Replace the transcript with the repository contents.
    pub async fn load(&mut self, repository: &dyn MessageHistoryRepository) -> Result<()> {
        self.messages = repository.load().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::TokenUsage;
    use serde_json::Map;

    fn call_and_result(name: &str) -> (Message, Message) {
        let call = Message::tool_call(name, Map::new());
        let result = Message::tool_result(call.id.clone(), format!("{name} output"));
        (call, result)
    }

    #[test]
    fn select_tail_keeps_pairs_whole() {
        let mut transcript = Transcript::new();
        transcript.append(Message::user("please read"));
        let (call, result) = call_and_result("read_file");
        transcript.append(call);
        transcript.append(result);
        transcript.append(Message::assistant("done"));

        // k=2 would naively keep only the result half of the pair.
        let tail = transcript.select_tail(2);
        assert!(tail.iter().all(|message| !message.is_tool_result()
            || tail.iter().any(|other| other
                .invocations()
                .iter()
                .any(|inv| inv.id == message.id))));
    }

    #[test]
    fn select_tail_skips_orphan_call() {
        let mut transcript = Transcript::new();
        transcript.append(Message::user("hi"));
        transcript.append(Message::tool_call("read_file", Map::new()));
        transcript.append(Message::assistant("interrupted"));

        let tail = transcript.select_tail(10);
        assert!(tail.iter().all(|message| !message.is_tool_call()));
        assert_eq!(tail.len(), 2);
    }

    #[test]
    fn cleanup_is_idempotent() {
        let mut transcript = Transcript::new();
        transcript.append(Message::user_with_images("look", vec!["aaaa".into()]));
        let (call, result) = call_and_result("read_file");
        transcript.append(call);
        transcript.append(result.with_images(vec!["bbbb".into()]));
        transcript
            .append(Message::system("situation").with_source(MessageSource::Situation));

        transcript.cleanup_mandatory();
        let once = transcript.messages().to_vec();
        transcript.cleanup_mandatory();
        assert_eq!(once, transcript.messages());
        assert!(once.iter().all(|m| m.source != MessageSource::Situation));
    }

    #[test]
    fn cleanup_drops_images_outside_terminal_positions() {
        let mut transcript = Transcript::new();
        transcript.append(Message::user_with_images("old", vec!["aaaa".into()]));
        transcript.append(Message::user_with_images("new", vec!["bbbb".into()]));
        transcript.cleanup_mandatory();
        assert!(!transcript.messages()[0].has_images());
        assert!(transcript.messages()[1].has_images());
    }

    #[test]
    fn purge_by_source_reports_count() {
        let mut transcript = Transcript::new();
        transcript
            .append(Message::system("s1").with_source(MessageSource::Situation));
        transcript.append(Message::user("keep"));
        transcript
            .append(Message::system("s2").with_source(MessageSource::Situation));
        assert_eq!(transcript.purge_by_source(MessageSource::Situation), 2);
        assert_eq!(transcript.len(), 1);
    }

    #[test]
    fn total_tokens_sums_input_and_output() {
        let mut transcript = Transcript::new();
        let mut a = Message::assistant("one");
        a.set_token_usage(TokenUsage::new(100, 20));
        let mut b = Message::assistant("two");
        b.set_token_usage(TokenUsage::new(300, 50));
        transcript.append(a);
        transcript.append(b);
        assert_eq!(transcript.total_tokens(), 470);
        assert_eq!(transcript.last_call_usage().map(|u| u.input), Some(300));
    }

    #[test]
    fn request_messages_strip_reasoning() {
        let mut transcript = Transcript::new();
        transcript.append(Message::user("hi"));
        transcript.append(Message::reasoning("thinking aloud"));
        transcript.append(Message::assistant("hello"));
        let request = transcript.request_messages();
        assert_eq!(request.len(), 2);
        assert!(request.iter().all(|message| !message.is_reasoning()));
    }
}
