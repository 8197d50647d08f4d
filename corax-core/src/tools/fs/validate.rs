//! Post-write validation via an external command.
//!
//! After a successful write or edit of a matching source file, the
//! configured command runs against the containing directory (a static
//! check, a dry-run build, a linter). The summary is informational: it
//! rides along in the tool result and never rolls the write back.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::WriteValidator;

const VALIDATOR_TIMEOUT_SECS: u64 = 120;
const MAX_REPORT_LINES: usize = 20;

/// Runs one external command per write to validate the result.
pub struct CommandValidator {
    extensions: Vec<String>,
    command: Vec<String>,
}

impl CommandValidator {
    /// `command` is program + args, executed with the written file's
    /// directory as working directory.
    pub fn new(extensions: Vec<String>, command: Vec<String>) -> Result<Self> {
        if command.is_empty() {
            bail!("validator command must not be empty");
        }
        Ok(Self {
            extensions: extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            command,
        })
    }

    /// Validator for Rust sources: type-check without producing artifacts.
    pub fn cargo_check() -> Self {
        Self {
            extensions: vec!["rs".to_string()],
            command: ["cargo", "check", "--quiet", "--message-format", "short"]
                .iter()
                .map(|part| part.to_string())
                .collect(),
        }
    }

    fn summarize(success: bool, output: &str) -> String {
        if success {
            return "All validation checks passed".to_string();
        }
        let mut lines: Vec<&str> = output
            .lines()
            .filter(|line| !line.trim().is_empty())
            .take(MAX_REPORT_LINES)
            .collect();
        if lines.is_empty() {
            lines.push("validator exited with a failure and no output");
        }
        format!("Validation found issues:\n{}", lines.join("\n"))
    }
}

#[async_trait]
impl WriteValidator for CommandValidator {
    fn handles(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let lowered = ext.to_ascii_lowercase();
                self.extensions.iter().any(|known| *known == lowered)
            })
            .unwrap_or(false)
    }

    async fn validate(&self, dir: &Path) -> Result<String> {
        let program = &self.command[0];
        let mut cmd = Command::new(program);
        cmd.args(&self.command[1..])
            .current_dir(dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = timeout(Duration::from_secs(VALIDATOR_TIMEOUT_SECS), cmd.output())
            .await
            .with_context(|| format!("validator '{program}' timed out"))?
            .with_context(|| format!("failed to run validator '{program}'"))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        Ok(Self::summarize(output.status.success(), &combined))
    }
}

/// Build the validator described by the filesystem policy, if any.
pub fn validator_from_config(
    extensions: &[String],
    command: &[String],
) -> Result<Option<CommandValidator>> {
    if command.is_empty() {
        return Ok(None);
    }
    CommandValidator::new(extensions.to_vec(), command.to_vec()).map(Some)
}
