//! Centralized constants: tool names, provider defaults, URLs, env vars.

/// Canonical tool names exposed to the model.
pub mod tools {
    pub const READ_FILE: &str = "read_file";
    pub const WRITE_FILE: &str = "write_file";
    pub const EDIT_FILE: &str = "edit_file";
    pub const MULTI_EDIT_FILE: &str = "multi_edit_file";
    pub const LIST_FILES: &str = "list_files";
    pub const RUN_SHELL_COMMAND: &str = "run_shell_command";

    /// Synthetic single-tool name used to force structured output on
    /// providers without a native JSON-schema mode.
    pub const STRUCTURED_RESPOND: &str = "respond";
}

/// Wire-level message role strings shared by the OpenAI-compatible adapters.
pub mod message_roles {
    pub const SYSTEM: &str = "system";
    pub const USER: &str = "user";
    pub const ASSISTANT: &str = "assistant";
    pub const TOOL: &str = "tool";
}

/// Provider identifiers and default models.
pub mod models {
    pub mod anthropic {
        pub const PROVIDER: &str = "anthropic";
        pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
    }

    pub mod openai {
        pub const PROVIDER: &str = "openai";
        pub const DEFAULT_MODEL: &str = "gpt-4.1";
    }

    pub mod ollama {
        pub const PROVIDER: &str = "ollama";
        pub const DEFAULT_MODEL: &str = "qwen2.5-coder:7b";
    }
}

/// Provider API endpoints.
pub mod urls {
    pub const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com/v1";
    pub const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
    pub const OLLAMA_API_BASE: &str = "http://localhost:11434";
}

/// Environment variable names honored by the config loader.
pub mod env_vars {
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
    pub const ANTHROPIC_BASE_URL: &str = "ANTHROPIC_BASE_URL";
    pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";
    pub const OPENAI_BASE_URL: &str = "OPENAI_BASE_URL";
    pub const OLLAMA_BASE_URL: &str = "OLLAMA_BASE_URL";
    pub const SHELL_ALLOW_LIST: &str = "CORAX_SHELL_ALLOW_LIST";
}

/// Driver and tool defaults.
pub mod defaults {
    /// Maximum ReAct iterations per `run` call.
    pub const MAX_ITERATIONS: usize = 30;

    /// How many recent messages are offered to the provider per call.
    pub const CONTEXT_TAIL_MESSAGES: usize = 120;

    /// Context-window utilization that triggers compaction.
    pub const COMPACTION_TRIGGER_RATIO: f64 = 0.85;

    /// Complete tool-call/result pairs preserved verbatim by compaction.
    pub const COMPACTION_KEEP_PAIRS: usize = 5;

    /// Shell command timeout in seconds.
    pub const SHELL_TIMEOUT_SECS: u64 = 120;

    /// Hard cap on any shell timeout override.
    pub const SHELL_TIMEOUT_MAX_SECS: u64 = 600;

    /// MCP request timeout in seconds.
    pub const MCP_REQUEST_TIMEOUT_SECS: u64 = 30;

    /// Fallback context window when a provider does not report one.
    pub const CONTEXT_WINDOW_TOKENS: usize = 128_000;

    /// Buffered fragments in a thinking sink before drop-on-full.
    pub const THINKING_SINK_CAPACITY: usize = 100;
}

/// Sentinel substring a tool result may carry to hint the loop to conclude.
pub const VALIDATION_SUCCESS_SENTINEL: &str = "All validation checks passed";
