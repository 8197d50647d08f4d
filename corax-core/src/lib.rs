//! # corax-core - Runtime for the corax coding agent
//!
//! `corax-core` powers the corax terminal coding agent. It provides the
//! reusable building blocks for multi-provider LLM orchestration, tool
//! execution, and configurable safety policies.
//!
//! ## Highlights
//!
//! - **Provider Abstraction**: capability-probed LLM interface with adapters
//!   for Anthropic (streaming + thinking + prompt caching), OpenAI
//!   (reasoning models with a non-streaming fallback), and Ollama (local
//!   models with native structured output).
//! - **Conversation Engine**: an append-only transcript with tool-call /
//!   tool-result pairing invariants, per-message token accounting, and
//!   threshold-triggered compaction through the provider itself.
//! - **Tool System**: trait-driven registry aggregating built-in tools
//!   (filesystem, shell) with tools discovered from MCP servers, plus
//!   dynamic tool-state reporting that never disturbs prompt caching.
//! - **Safety**: workspace boundary enforcement, read-before-write
//!   discipline with staleness detection, command deny patterns, and a
//!   human-in-the-loop approval gate for non-whitelisted shell commands.
//!
//! ## Architecture Overview
//!
//! - `config/`: TOML-backed configuration with environment overrides.
//! - `message/`: typed conversation records and token accounting.
//! - `transcript/`: ordered message store, selection, cleanup, compaction.
//! - `llm/`: provider capability traits and the three concrete adapters.
//! - `tools/`: Tool trait, composite registry, filesystem and shell tools.
//! - `mcp/`: Model Context Protocol client bridge and tool adapters.
//! - `agent/`: the bounded ReAct iteration driver.

pub mod agent;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod message;
pub mod tools;
pub mod transcript;
pub mod utils;

pub use agent::driver::{AgentDriver, DriverStatus, RunOutcome};
pub use config::CoraxConfig;
pub use message::{Message, MessageKind, MessageSource, TokenUsage};
pub use transcript::Transcript;
