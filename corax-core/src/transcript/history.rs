//! File-backed message history.
//!
//! One JSON document per line, append-friendly and diffable. Reasoning
//! messages never reach this layer; the transcript strips them before
//! saving.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

use crate::message::Message;

use super::MessageHistoryRepository;

/// Stores the transcript as JSON lines at a fixed path.
pub struct FileHistoryRepository {
    path: PathBuf,
}

impl FileHistoryRepository {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

#[async_trait]
impl MessageHistoryRepository for FileHistoryRepository {
    async fn save(&self, messages: &[Message]) -> Result<()> {
        let mut encoded = String::new();
        for message in messages {
            encoded.push_str(
                &serde_json::to_string(message).context("failed to encode message")?,
            );
            encoded.push('\n');
        }
        if let Some(parent) = self.path.parent()
            && !parent.exists()
        {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&self.path, encoded)
            .await
            .with_context(|| format!("failed to write history to {}", self.path.display()))?;
        debug!(
            path = %self.path.display(),
            messages = messages.len(),
            "history saved"
        );
        Ok(())
    }

    async fn load(&self) -> Result<Vec<Message>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read history from {}", self.path.display()))?;
        let mut messages = Vec::new();
        for (index, line) in raw.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let message: Message = serde_json::from_str(line).with_context(|| {
                format!(
                    "failed to decode history line {} in {}",
                    index + 1,
                    self.path.display()
                )
            })?;
            messages.push(message);
        }
        Ok(messages)
    }
}
