//! Shell command tool with dangerous-pattern refusal and a whitelist
//! that separates pre-authorized commands from approval-gated ones.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::ShellPolicyConfig;
use crate::config::constants::{defaults, tools as tool_names};

use super::args::{optional_u64, required_str};
use super::traits::{ArgType, Tool, ToolArgument, ToolContext, ToolOutput};

/// Commands matching any of these are refused outright; no approval can
/// override them.
static DANGEROUS_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        // Recursive delete of the filesystem root.
        r"rm\s+-[a-zA-Z]*r[a-zA-Z]*\s+/(\s|$|\*)",
        r"rm\s+-[a-zA-Z]*r[a-zA-Z]*\s+--no-preserve-root",
        // Fork bomb.
        r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\}\s*;\s*:",
        // Raw writes to block devices.
        r"dd\s+[^|;]*of=/dev/(sd|hd|nvme|vd|disk)",
        r">\s*/dev/(sd|hd|nvme|vd|disk)",
        r"mkfs(\.\w+)?\s",
        // World-writable root.
        r"chmod\s+(-[a-zA-Z]+\s+)*777\s+/(\s|$)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("dangerous pattern must compile"))
    .collect()
});

/// Read-only verbs allowed to mention system directories.
const READ_ONLY_VERBS: &[&str] = &["cat", "less", "head", "tail", "grep", "ls", "stat", "file"];

const SYSTEM_DIR_PREFIXES: &[&str] = &[
    "/etc", "/usr", "/bin", "/sbin", "/boot", "/sys", "/proc", "/dev", "/var", "/lib",
];

/// Whether `command` matches the whitelist entry at a word boundary:
/// equal, or the entry followed by whitespace.
pub fn whitelist_matches(entry: &str, command: &str) -> bool {
    let entry = entry.trim();
    let command = command.trim();
    if entry.is_empty() {
        return false;
    }
    command == entry
        || command
            .strip_prefix(entry)
            .is_some_and(|rest| rest.starts_with(char::is_whitespace))
}

/// First dangerous pattern hit, if any.
pub fn dangerous_match(command: &str) -> Option<&'static Regex> {
    DANGEROUS_PATTERNS
        .iter()
        .find(|pattern| pattern.is_match(command))
}

fn touches_system_dir(command: &str) -> bool {
    command.split_whitespace().any(|token| {
        let token = token.trim_start_matches(['>', '<']);
        SYSTEM_DIR_PREFIXES.iter().any(|prefix| {
            token == *prefix
                || token
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    })
}

fn starts_with_read_only_verb(command: &str) -> bool {
    command
        .split_whitespace()
        .next()
        .is_some_and(|verb| READ_ONLY_VERBS.contains(&verb))
}

/// Shell executor. The only privileged tool: commands outside the
/// whitelist suspend the driver until resumed or cancelled.
pub struct ShellTool {
    workspace_root: PathBuf,
    whitelist: Vec<String>,
    default_timeout_secs: u64,
}

impl ShellTool {
    pub fn new(workspace_root: PathBuf, policy: &ShellPolicyConfig) -> Self {
        Self {
            workspace_root,
            whitelist: policy.effective_whitelist(),
            default_timeout_secs: policy.effective_timeout_secs(),
        }
    }

    /// Whether the command runs without approval.
    pub fn is_whitelisted(&self, command: &str) -> bool {
        self.whitelist
            .iter()
            .any(|entry| whitelist_matches(entry, command))
    }

    /// Resolve an optional working-directory override; it must stay
    /// inside the workspace.
    fn resolve_working_dir(&self, dir: Option<&str>) -> Result<PathBuf, String> {
        let Some(dir) = dir else {
            return Ok(self.workspace_root.clone());
        };
        let candidate = std::path::Path::new(dir);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            self.workspace_root.join(candidate)
        };
        let normalized = crate::tools::fs::path_policy::normalize(&joined);
        if normalized != self.workspace_root && !normalized.starts_with(&self.workspace_root) {
            return Err(format!(
                "working directory {dir} is outside the workspace"
            ));
        }
        Ok(normalized)
    }

    /// Hard policy check, independent of the whitelist.
    fn refusal(&self, command: &str) -> Option<String> {
        if dangerous_match(command).is_some() {
            return Some(format!("dangerous command blocked: {command}"));
        }
        if touches_system_dir(command) && !starts_with_read_only_verb(command) {
            return Some(format!(
                "command touches a system directory and is not a read-only operation: {command}"
            ));
        }
        None
    }

    async fn run(
        &self,
        ctx: &ToolContext,
        command: &str,
        working_dir: Option<&str>,
        timeout_secs: Option<u64>,
    ) -> ToolOutput {
        if let Some(refusal) = self.refusal(command) {
            warn!(%command, "refused shell command");
            return ToolOutput::error(refusal);
        }
        let work_dir = match self.resolve_working_dir(working_dir) {
            Ok(dir) => dir,
            Err(error) => return ToolOutput::error(error),
        };

        let timeout_value = timeout_secs
            .unwrap_or(self.default_timeout_secs)
            .clamp(1, defaults::SHELL_TIMEOUT_MAX_SECS);
        debug!(%command, timeout_secs = timeout_value, "executing shell command");

        let mut child = Command::new("sh");
        child
            .arg("-c")
            .arg(command)
            .current_dir(&work_dir)
            .env("PAGER", "cat")
            .env("GIT_PAGER", "cat")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let execution = timeout(Duration::from_secs(timeout_value), child.output());
        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return ToolOutput::error("cancelled".to_string());
            }
            result = execution => result,
        };

        let output = match output {
            Ok(Ok(output)) => output,
            Ok(Err(error)) => {
                return ToolOutput::error(format!("failed to execute command: {error}"));
            }
            Err(_) => {
                return ToolOutput::error(format!(
                    "command timed out after {timeout_value}s: {command}"
                ));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            ToolOutput::success(combined)
        } else {
            let code = output.status.code().unwrap_or(-1);
            ToolOutput::error(format!("command exited with code {code}\n{combined}"))
        }
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        tool_names::RUN_SHELL_COMMAND
    }

    fn description(&self) -> &str {
        "Run a shell command in the workspace directory and return its combined stdout and \
         stderr. Non-whitelisted commands require approval; destructive commands are refused."
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new("command", "Shell command to execute", true, ArgType::String),
            ToolArgument::new(
                "working_dir",
                "Directory to run in, relative to the workspace",
                false,
                ArgType::String,
            ),
            ToolArgument::new(
                "timeout_secs",
                "Timeout override in seconds (capped at 600)",
                false,
                ArgType::Integer,
            ),
        ]
    }

    async fn execute(&self, ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput {
        let command = match required_str(args, "command") {
            Ok(command) => command,
            Err(error) => return ToolOutput::error(error),
        };
        let working_dir = args.get("working_dir").and_then(Value::as_str);
        let timeout_secs = optional_u64(args, "timeout_secs");
        self.run(ctx, command, working_dir, timeout_secs).await
    }

    fn requires_approval(&self, args: &Map<String, Value>) -> bool {
        let Some(command) = args.get("command").and_then(Value::as_str) else {
            return false;
        };
        // Dangerous commands are refused at execution, not approved.
        if dangerous_match(command).is_some() {
            return false;
        }
        !self.is_whitelisted(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tool() -> ShellTool {
        ShellTool::new(
            std::env::temp_dir(),
            &ShellPolicyConfig {
                whitelist: vec!["git".to_string(), "cargo check".to_string()],
                timeout_secs: 5,
            },
        )
    }

    #[test]
    fn whitelist_matches_at_word_boundary_only() {
        assert!(whitelist_matches("git", "git"));
        assert!(whitelist_matches("git", "git status"));
        assert!(!whitelist_matches("git", "github-push"));
        assert!(!whitelist_matches("git", "gitfoo"));
    }

    #[test]
    fn approval_follows_whitelist() {
        let tool = tool();
        let mut args = Map::new();
        args.insert("command".to_string(), json!("git status"));
        assert!(!tool.requires_approval(&args));
        args.insert("command".to_string(), json!("echo hello"));
        assert!(tool.requires_approval(&args));
    }

    #[test]
    fn dangerous_commands_are_detected() {
        assert!(dangerous_match("rm -rf /").is_some());
        assert!(dangerous_match("rm -rf /*").is_some());
        assert!(dangerous_match(":(){ :|:& };:").is_some());
        assert!(dangerous_match("dd if=/dev/zero of=/dev/sda").is_some());
        assert!(dangerous_match("chmod -R 777 /").is_some());
        assert!(dangerous_match("rm -rf ./target").is_none());
        assert!(dangerous_match("cargo build").is_none());
    }

    #[tokio::test]
    async fn dangerous_command_is_refused_before_spawning() {
        let tool = tool();
        let output = tool.run(&ToolContext::default(), "rm -rf /", None, None).await;
        assert_eq!(output.error, "dangerous command blocked: rm -rf /");
    }

    #[tokio::test]
    async fn system_dir_writes_are_refused() {
        let tool = tool();
        let output = tool
            .run(&ToolContext::default(), "touch /etc/corax-test", None, None)
            .await;
        assert!(output.error.contains("system directory"));

        let read = tool
            .run(&ToolContext::default(), "cat /etc/hostname", None, None)
            .await;
        assert!(!read.error.contains("system directory"));
    }

    #[tokio::test]
    async fn echo_captures_stdout() {
        let tool = tool();
        let output = tool.run(&ToolContext::default(), "echo hello", None, None).await;
        assert_eq!(output.text, "hello\n");
        assert!(!output.is_error());
    }

    #[tokio::test]
    async fn working_dir_override_stays_inside_the_workspace() {
        let dir = tempfile::TempDir::new().expect("workspace");
        std::fs::create_dir(dir.path().join("sub")).expect("subdir");
        let tool = ShellTool::new(
            dir.path().to_path_buf(),
            &ShellPolicyConfig {
                whitelist: Vec::new(),
                timeout_secs: 5,
            },
        );

        let output = tool
            .run(&ToolContext::default(), "pwd", Some("sub"), None)
            .await;
        assert!(output.text.trim_end().ends_with("/sub"), "{}", output.text);

        let escape = tool
            .run(&ToolContext::default(), "pwd", Some("../.."), None)
            .await;
        assert!(escape.error.contains("outside the workspace"));
    }

    #[tokio::test]
    async fn nonzero_exit_is_a_domain_error() {
        let tool = tool();
        let output = tool.run(&ToolContext::default(), "exit 3", None, None).await;
        assert!(output.error.contains("exited with code 3"));
    }

    #[tokio::test]
    async fn cancellation_interrupts_execution() {
        let tool = tool();
        let ctx = ToolContext::default();
        ctx.cancel.cancel();
        let output = tool.run(&ctx, "sleep 5", None, None).await;
        assert_eq!(output.error, "cancelled");
    }
}
