//! Optional local response cache.
//!
//! Keyed by the provider's request fingerprint ([`CacheKeyProvider`]);
//! entries expire by TTL and the map is capacity-bounded, evicting the
//! oldest entry under a mutex. Only baseline `chat` calls are cached -
//! tool-calling turns depend on live workspace state and always go to the
//! provider.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::message::{Message, TokenUsage};

use super::provider::{
    CacheKeyProvider, ChatProvider, LlmError, StructuredProvider, ThinkingSink,
    ToolCallingProvider,
};

struct CacheEntry {
    message: Message,
    inserted_at: Instant,
}

/// TTL + capacity bounded store of provider responses.
pub struct ResponseCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    capacity: usize,
    ttl: Duration,
}

impl ResponseCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn get(&self, key: &str) -> Option<Message> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() <= self.ttl => {
                Some(entry.message.clone())
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, message: Message) {
        let mut entries = self.entries.lock();
        if entries.len() >= self.capacity && !entries.contains_key(&key) {
            // Evict the oldest entry to stay within capacity.
            if let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone())
            {
                entries.remove(&oldest);
            }
        }
        entries.insert(
            key,
            CacheEntry {
                message,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Decorator caching baseline chat responses of the wrapped provider.
pub struct CachedChatProvider {
    inner: Arc<dyn ChatProvider>,
    cache: ResponseCache,
}

impl CachedChatProvider {
    pub fn new(inner: Arc<dyn ChatProvider>, capacity: usize, ttl: Duration) -> Self {
        Self {
            inner,
            cache: ResponseCache::new(capacity, ttl),
        }
    }

    fn cache_key(&self, messages: &[Message]) -> Option<String> {
        self.inner
            .as_cache_key()
            .and_then(|provider| provider.make_cache_key(messages, None).ok())
    }
}

#[async_trait]
impl ChatProvider for CachedChatProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model_id(&self) -> &str {
        self.inner.model_id()
    }

    async fn chat(
        &self,
        messages: &[Message],
        enable_thinking: bool,
        thinking_sink: Option<ThinkingSink>,
        cancel: &CancellationToken,
    ) -> Result<Message, LlmError> {
        let key = self.cache_key(messages);
        if let Some(key) = &key
            && let Some(cached) = self.cache.get(key)
        {
            debug!(key = key.as_str(), "response cache hit");
            return Ok(cached);
        }
        let response = self
            .inner
            .chat(messages, enable_thinking, thinking_sink, cancel)
            .await?;
        if let Some(key) = key {
            self.cache.put(key, response.clone());
        }
        Ok(response)
    }

    fn supports_vision(&self) -> bool {
        self.inner.supports_vision()
    }

    fn supports_thinking(&self) -> bool {
        self.inner.supports_thinking()
    }

    fn supports_server_side_truncation(&self) -> bool {
        self.inner.supports_server_side_truncation()
    }

    fn max_context_tokens(&self) -> usize {
        self.inner.max_context_tokens()
    }

    fn last_token_usage(&self) -> Option<TokenUsage> {
        self.inner.last_token_usage()
    }

    fn as_tool_calling(&self) -> Option<&dyn ToolCallingProvider> {
        self.inner.as_tool_calling()
    }

    fn as_structured(&self) -> Option<&dyn StructuredProvider> {
        self.inner.as_structured()
    }

    fn as_cache_key(&self) -> Option<&dyn CacheKeyProvider> {
        self.inner.as_cache_key()
    }
}
