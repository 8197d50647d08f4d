//! Filesystem and shell safety policies.

use serde::{Deserialize, Serialize};
use std::env;

use super::constants::{defaults, env_vars};

/// Filesystem access policy for the file tools.
///
/// The working directory is always allowed and does not need to be listed.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesystemPolicyConfig {
    /// Additional absolute directories the tools may touch.
    #[serde(default)]
    pub allowed_directories: Vec<String>,

    /// Glob patterns (matched against basename and full path) that are
    /// never readable or writable, even inside allowed directories.
    #[serde(default = "default_blacklist")]
    pub blacklist: Vec<String>,

    /// Extensions covered by the post-write validator.
    #[serde(default)]
    pub validate_extensions: Vec<String>,

    /// Command (program + args) run against the containing directory
    /// after a matching write. Empty disables validation.
    #[serde(default)]
    pub validate_command: Vec<String>,
}

impl Default for FilesystemPolicyConfig {
    fn default() -> Self {
        Self {
            allowed_directories: Vec::new(),
            blacklist: default_blacklist(),
            validate_extensions: Vec::new(),
            validate_command: Vec::new(),
        }
    }
}

fn default_blacklist() -> Vec<String> {
    [
        ".env",
        ".env.*",
        "*.pem",
        "*.key",
        "id_rsa",
        "id_ed25519",
        "*.sqlite",
        "*.db",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Shell tool policy: whitelisted prefixes run without approval, everything
/// else suspends the driver for a human decision.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShellPolicyConfig {
    /// Command prefixes that never require approval. A prefix matches only
    /// at a word boundary: "git" matches "git" and "git status", never
    /// "github-push".
    #[serde(default = "default_whitelist")]
    pub whitelist: Vec<String>,

    /// Command timeout in seconds.
    #[serde(default = "default_shell_timeout")]
    pub timeout_secs: u64,
}

impl Default for ShellPolicyConfig {
    fn default() -> Self {
        Self {
            whitelist: default_whitelist(),
            timeout_secs: default_shell_timeout(),
        }
    }
}

impl ShellPolicyConfig {
    /// Whitelist merged with the comma-separated env override.
    pub fn effective_whitelist(&self) -> Vec<String> {
        let mut combined: Vec<String> = self
            .whitelist
            .iter()
            .map(|entry| entry.trim().to_string())
            .filter(|entry| !entry.is_empty())
            .collect();
        if let Ok(extra) = env::var(env_vars::SHELL_ALLOW_LIST) {
            combined.extend(
                extra
                    .split(',')
                    .map(|item| item.trim().to_string())
                    .filter(|item| !item.is_empty()),
            );
        }
        combined
    }

    /// Timeout clamped to the hard cap.
    pub fn effective_timeout_secs(&self) -> u64 {
        self.timeout_secs.min(defaults::SHELL_TIMEOUT_MAX_SECS)
    }
}

fn default_whitelist() -> Vec<String> {
    [
        "ls", "cat", "head", "tail", "grep", "rg", "find", "wc", "git status", "git diff",
        "git log", "cargo check", "cargo fmt",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_shell_timeout() -> u64 {
    defaults::SHELL_TIMEOUT_SECS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shell_timeout_is_capped() {
        let policy = ShellPolicyConfig {
            timeout_secs: 4_000,
            ..ShellPolicyConfig::default()
        };
        assert_eq!(
            policy.effective_timeout_secs(),
            defaults::SHELL_TIMEOUT_MAX_SECS
        );
    }

    #[test]
    fn default_blacklist_covers_secrets() {
        let policy = FilesystemPolicyConfig::default();
        assert!(policy.blacklist.iter().any(|glob| glob == ".env"));
        assert!(policy.blacklist.iter().any(|glob| glob == "*.pem"));
    }
}
