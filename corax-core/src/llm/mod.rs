//! LLM provider abstraction and the concrete adapters.

pub mod cache;
pub mod provider;
pub mod providers;
pub mod sanitize;

pub use cache::{CachedChatProvider, ResponseCache};
pub use provider::{
    CacheKeyProvider, ChatProvider, LlmError, StructuredProvider, ThinkingSink,
    ToolCallingProvider, ToolChoice, chat_structured,
};
pub use providers::create_provider;
pub use sanitize::ToolNameSanitizer;
