//! Filesystem tools: read, write, edit, multi-edit, list.
//!
//! All five tools share one [`FsState`]: the compiled path policy, the
//! read-before-write stamps, and the per-file edit-failure counters that
//! feed the tool-state report. Writes and edits run their precondition
//! checks and the mutation under the same writer lock so an external
//! change between check and write cannot slip through.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, warn};

use crate::config::FilesystemPolicyConfig;
use crate::config::constants::tools as tool_names;
use crate::utils::image_processing::{is_image_path, load_and_fit};

use super::args::{optional_bool, optional_str, optional_usize, required_str};
use super::registry::LocalToolManager;
use super::traits::{
    ArgType, Tool, ToolArgument, ToolContext, ToolManager, ToolOutput, ToolStateProvider,
};

pub mod edit;
pub mod path_policy;
pub mod validate;

use edit::apply_edit;
use path_policy::PathPolicy;

/// Post-write validation hook. Failures are informational: they ride along
/// in the result text and never roll back the write.
#[async_trait]
pub trait WriteValidator: Send + Sync {
    /// Whether this validator covers the given source file.
    fn handles(&self, path: &Path) -> bool;

    /// Run the check against the file's containing directory and return a
    /// one-paragraph summary.
    async fn validate(&self, dir: &Path) -> anyhow::Result<String>;
}

/// Shared state behind the filesystem tools.
pub struct FsState {
    policy: PathPolicy,
    last_read_at: RwLock<HashMap<PathBuf, SystemTime>>,
    edit_failures: RwLock<HashMap<PathBuf, u32>>,
    validator: Option<Arc<dyn WriteValidator>>,
}

impl FsState {
    pub fn new(workspace_root: PathBuf, config: &FilesystemPolicyConfig) -> Self {
        Self {
            policy: PathPolicy::new(workspace_root, config),
            last_read_at: RwLock::new(HashMap::new()),
            edit_failures: RwLock::new(HashMap::new()),
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn WriteValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let resolved = self.policy.resolve(path)?;
        // Symlinks must not lead outside the allow set.
        if resolved.exists() {
            let real = std::fs::canonicalize(&resolved)
                .map_err(|error| format!("failed to resolve {}: {error}", resolved.display()))?;
            if !self.policy.is_path_allowed(&real) {
                return Err(format!(
                    "path {} resolves outside the allowed directories",
                    resolved.display()
                ));
            }
            if self.policy.is_blacklisted(&real) {
                return Err(format!(
                    "path {} is blocked by the filesystem blacklist",
                    resolved.display()
                ));
            }
        }
        Ok(resolved)
    }

    fn stamp_read(&self, path: &Path) {
        self.last_read_at
            .write()
            .insert(path.to_path_buf(), SystemTime::now());
    }

    /// Read-before-write precondition for an existing file. Caller must
    /// already hold the stamps writer lock when mutating afterwards.
    fn check_writable(
        path: &Path,
        stamps: &HashMap<PathBuf, SystemTime>,
    ) -> Result<(), String> {
        if !path.exists() {
            return Ok(());
        }
        let Some(read_at) = stamps.get(path) else {
            return Err(format!(
                "file {} was not read before write; read it first",
                path.display()
            ));
        };
        let modified = std::fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|error| format!("failed to stat {}: {error}", path.display()))?;
        if modified > *read_at {
            return Err(format!(
                "file {} was modified after last read; re-read it before editing",
                path.display()
            ));
        }
        Ok(())
    }

    /// Perform the check-then-write critical section under the writer
    /// lock, stamping the file on success.
    fn guarded_write(&self, path: &Path, content: &str) -> Result<(), String> {
        let mut stamps = self.last_read_at.write();
        Self::check_writable(path, &stamps)?;
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent)
                .map_err(|error| format!("failed to create {}: {error}", parent.display()))?;
        }
        std::fs::write(path, content)
            .map_err(|error| format!("failed to write {}: {error}", path.display()))?;
        stamps.insert(path.to_path_buf(), SystemTime::now());
        Ok(())
    }

    fn record_edit_failure(&self, path: &Path) {
        let mut failures = self.edit_failures.write();
        *failures.entry(path.to_path_buf()).or_insert(0) += 1;
    }

    fn clear_edit_failures(&self, path: &Path) {
        self.edit_failures.write().remove(path);
    }

    /// Filenames with pending edit failures, for the situation report.
    pub fn edit_failure_report(&self) -> Option<String> {
        let failures = self.edit_failures.read();
        if failures.is_empty() {
            return None;
        }
        let mut names: Vec<String> = failures
            .keys()
            .map(|path| {
                path.file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| path.display().to_string())
            })
            .collect();
        names.sort();
        Some(format!(
            "Edit failures requiring re-read: {}",
            names.join(", ")
        ))
    }

    async fn run_validator(&self, path: &Path) -> Option<String> {
        let validator = self.validator.as_ref()?;
        if !validator.handles(path) {
            return None;
        }
        let dir = path.parent()?;
        match validator.validate(dir).await {
            Ok(summary) if !summary.trim().is_empty() => Some(summary),
            Ok(_) => None,
            Err(error) => {
                warn!(path = %path.display(), %error, "post-write validation failed to run");
                Some(format!("validation could not run: {error}"))
            }
        }
    }

    // ---- operations ----

    async fn read(&self, path_arg: &str, offset: Option<usize>, limit: Option<usize>) -> ToolOutput {
        let path = match self.resolve(path_arg) {
            Ok(path) => path,
            Err(error) => return ToolOutput::error(error),
        };
        if path.is_dir() {
            return ToolOutput::error(format!(
                "{path_arg} is a directory; use {} instead",
                tool_names::LIST_FILES
            ));
        }
        if !path.exists() {
            return ToolOutput::error(format!("file {path_arg} does not exist"));
        }

        if is_image_path(&path) {
            return match load_and_fit(&path) {
                Ok(image) => {
                    self.stamp_read(&path);
                    ToolOutput::success(image.caption(Path::new(path_arg)))
                        .with_images(vec![image.base64_data])
                }
                Err(error) => ToolOutput::error(format!("failed to read image: {error:#}")),
            };
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(error) => {
                return ToolOutput::error(format!("failed to read {path_arg}: {error}"));
            }
        };
        self.stamp_read(&path);

        let start = offset.unwrap_or(1).max(1);
        let mut output = String::new();
        let mut emitted = 0usize;
        for (index, line) in content.lines().enumerate() {
            let line_number = index + 1;
            if line_number < start {
                continue;
            }
            if let Some(limit) = limit
                && emitted >= limit
            {
                break;
            }
            output.push_str(&format!("{line_number:>6}\t{line}\n"));
            emitted += 1;
        }
        if output.is_empty() {
            output = "(empty file)".to_string();
        }
        ToolOutput::success(output)
    }

    async fn write(&self, path_arg: &str, content: &str) -> ToolOutput {
        let path = match self.resolve(path_arg) {
            Ok(path) => path,
            Err(error) => return ToolOutput::error(error),
        };
        if let Err(error) = self.guarded_write(&path, content) {
            return ToolOutput::error(error);
        }
        debug!(path = %path.display(), bytes = content.len(), "wrote file");

        let mut text = format!("Successfully wrote {path_arg} ({} bytes)", content.len());
        if let Some(summary) = self.run_validator(&path).await {
            text.push_str("\n\n");
            text.push_str(&summary);
        }
        ToolOutput::success(text)
    }

    async fn edit(
        &self,
        path_arg: &str,
        old: &str,
        new: &str,
        replace_all: bool,
    ) -> ToolOutput {
        let path = match self.resolve(path_arg) {
            Ok(path) => path,
            Err(error) => return ToolOutput::error(error),
        };
        if !path.exists() {
            return ToolOutput::error(format!("file {path_arg} does not exist"));
        }

        let result = {
            let mut stamps = self.last_read_at.write();
            if let Err(error) = Self::check_writable(&path, &stamps) {
                return ToolOutput::error(error);
            }
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(error) => {
                    return ToolOutput::error(format!("failed to read {path_arg}: {error}"));
                }
            };
            match apply_edit(&content, old, new, replace_all) {
                Ok(applied) => {
                    if let Err(error) = std::fs::write(&path, &applied.content) {
                        return ToolOutput::error(format!(
                            "failed to write {path_arg}: {error}"
                        ));
                    }
                    stamps.insert(path.clone(), SystemTime::now());
                    Ok(applied.replacements)
                }
                Err(error) => Err(error),
            }
        };

        match result {
            Ok(replacements) => {
                self.clear_edit_failures(&path);
                let mut text = if replacements == 1 {
                    format!("Successfully edited {path_arg}")
                } else {
                    format!("Successfully edited {path_arg} ({replacements} replacements)")
                };
                if let Some(summary) = self.run_validator(&path).await {
                    text.push_str("\n\n");
                    text.push_str(&summary);
                }
                ToolOutput::success(text)
            }
            Err(error) => {
                if matches!(error, edit::EditError::NotFound) {
                    self.record_edit_failure(&path);
                }
                ToolOutput::error(format!("{error} (file: {path_arg})"))
            }
        }
    }

    async fn multi_edit(&self, edits: &[Value]) -> ToolOutput {
        if edits.is_empty() {
            return ToolOutput::error("edits array is empty".to_string());
        }
        let mut outcomes: Vec<String> = Vec::new();
        for (index, entry) in edits.iter().enumerate() {
            let Some(object) = entry.as_object() else {
                return ToolOutput::error(format!(
                    "edit {} is not an object; {}",
                    index + 1,
                    outcomes_summary(&outcomes)
                ));
            };
            let path = match required_str(object, "file_path") {
                Ok(path) => path,
                Err(error) => {
                    return ToolOutput::error(format!(
                        "edit {}: {error}; {}",
                        index + 1,
                        outcomes_summary(&outcomes)
                    ));
                }
            };
            let old = match required_str(object, "old_string") {
                Ok(old) => old,
                Err(error) => {
                    return ToolOutput::error(format!(
                        "edit {}: {error}; {}",
                        index + 1,
                        outcomes_summary(&outcomes)
                    ));
                }
            };
            let new = optional_str(object, "new_string").unwrap_or_default();
            let replace_all = optional_bool(object, "replace_all").unwrap_or(false);

            let output = self.edit(path, old, new, replace_all).await;
            if output.is_error() {
                // Prior edits stay applied; report how far we got.
                return ToolOutput::error(format!(
                    "edit {} of {} failed: {}; {}",
                    index + 1,
                    edits.len(),
                    output.error,
                    outcomes_summary(&outcomes)
                ));
            }
            outcomes.push(format!("edit {}: {}", index + 1, output.text));
        }
        ToolOutput::success(format!(
            "Applied {} edits\n{}",
            edits.len(),
            outcomes.join("\n")
        ))
    }

    async fn list(&self, path_arg: &str, ignore: &[String]) -> ToolOutput {
        let path = match self.resolve(path_arg) {
            Ok(path) => path,
            Err(error) => return ToolOutput::error(error),
        };
        if !path.is_dir() {
            return ToolOutput::error(format!("{path_arg} is not a directory"));
        }
        let ignore_patterns: Vec<glob::Pattern> = ignore
            .iter()
            .filter_map(|pattern| glob::Pattern::new(pattern).ok())
            .collect();

        let mut entries = match std::fs::read_dir(&path) {
            Ok(entries) => entries
                .filter_map(|entry| entry.ok())
                .collect::<Vec<std::fs::DirEntry>>(),
            Err(error) => {
                return ToolOutput::error(format!("failed to list {path_arg}: {error}"));
            }
        };
        entries.sort_by_key(|entry| entry.file_name());

        let mut lines = Vec::new();
        for entry in entries {
            let name = entry.file_name().to_string_lossy().into_owned();
            if ignore_patterns.iter().any(|pattern| pattern.matches(&name)) {
                continue;
            }
            let is_dir = entry.file_type().map(|kind| kind.is_dir()).unwrap_or(false);
            lines.push(if is_dir { format!("{name}/") } else { name });
        }
        if lines.is_empty() {
            ToolOutput::success("(empty directory)".to_string())
        } else {
            ToolOutput::success(lines.join("\n"))
        }
    }
}

fn outcomes_summary(outcomes: &[String]) -> String {
    if outcomes.is_empty() {
        "no prior edits applied".to_string()
    } else {
        format!("prior edits remain applied: {}", outcomes.join("; "))
    }
}

// ---- the five tool fronts ----

macro_rules! fs_tool {
    ($name:ident) => {
        pub struct $name {
            state: Arc<FsState>,
        }

        impl $name {
            pub fn new(state: Arc<FsState>) -> Self {
                Self { state }
            }
        }
    };
}

fs_tool!(ReadFileTool);
fs_tool!(WriteFileTool);
fs_tool!(EditFileTool);
fs_tool!(MultiEditFileTool);
fs_tool!(ListFilesTool);

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        tool_names::READ_FILE
    }

    fn description(&self) -> &str {
        "Read a file from the workspace. Returns numbered lines; supports an optional 1-based \
         offset and line limit. Image files are returned as downscaled JPEG attachments."
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new("path", "File path, relative to the workspace or absolute within allowed directories", true, ArgType::String),
            ToolArgument::new("offset", "1-based line number to start from", false, ArgType::Integer),
            ToolArgument::new("limit", "Maximum number of lines to return", false, ArgType::Integer),
        ]
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput {
        let path = match required_str(args, "path") {
            Ok(path) => path,
            Err(error) => return ToolOutput::error(error),
        };
        let offset = optional_usize(args, "offset");
        let limit = optional_usize(args, "limit");
        self.state.read(path, offset, limit).await
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        tool_names::WRITE_FILE
    }

    fn description(&self) -> &str {
        "Write a file in the workspace, creating parent directories as needed. Overwriting an \
         existing file requires reading it first."
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new("path", "Destination file path", true, ArgType::String),
            ToolArgument::new("content", "Full file content to write", true, ArgType::String),
        ]
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput {
        let path = match required_str(args, "path") {
            Ok(path) => path,
            Err(error) => return ToolOutput::error(error),
        };
        let content = match required_str(args, "content") {
            Ok(content) => content,
            Err(error) => return ToolOutput::error(error),
        };
        self.state.write(path, content).await
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        tool_names::EDIT_FILE
    }

    fn description(&self) -> &str {
        "Replace an exact string in a file. old_string must match uniquely unless replace_all \
         is set; indentation differences between tabs and four spaces are normalized once."
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new("path", "File to edit", true, ArgType::String),
            ToolArgument::new("old_string", "Exact text to replace", true, ArgType::String),
            ToolArgument::new("new_string", "Replacement text", true, ArgType::String),
            ToolArgument::new("replace_all", "Replace every occurrence", false, ArgType::Boolean),
        ]
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput {
        let path = match required_str(args, "path") {
            Ok(path) => path,
            Err(error) => return ToolOutput::error(error),
        };
        let old = match required_str(args, "old_string") {
            Ok(old) => old,
            Err(error) => return ToolOutput::error(error),
        };
        let new = optional_str(args, "new_string").unwrap_or_default();
        let replace_all = optional_bool(args, "replace_all").unwrap_or(false);
        self.state.edit(path, old, new, replace_all).await
    }
}

#[async_trait]
impl Tool for MultiEditFileTool {
    fn name(&self) -> &str {
        tool_names::MULTI_EDIT_FILE
    }

    fn description(&self) -> &str {
        "Apply a sequence of edits in order. Each edit sees the file state left by the previous \
         one; on failure, prior edits remain applied."
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new(
                "edits",
                "Array of {file_path, old_string, new_string, replace_all?} objects",
                true,
                ArgType::Array,
            )
            .with_properties_schema(serde_json::json!({
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "file_path": { "type": "string" },
                        "old_string": { "type": "string" },
                        "new_string": { "type": "string" },
                        "replace_all": { "type": "boolean" }
                    },
                    "required": ["file_path", "old_string", "new_string"]
                }
            })),
        ]
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput {
        let Some(edits) = args.get("edits").and_then(|value| value.as_array()) else {
            return ToolOutput::error("missing required parameter edits".to_string());
        };
        self.state.multi_edit(edits).await
    }
}

#[async_trait]
impl Tool for ListFilesTool {
    fn name(&self) -> &str {
        tool_names::LIST_FILES
    }

    fn description(&self) -> &str {
        "List one directory level. Directories are suffixed with '/'; an optional ignore list \
         of glob patterns filters entries by basename."
    }

    fn arguments(&self) -> Vec<ToolArgument> {
        vec![
            ToolArgument::new("path", "Directory to list; workspace root when omitted", false, ArgType::String),
            ToolArgument::new("ignore", "Glob patterns to skip", false, ArgType::Array)
                .with_properties_schema(serde_json::json!({
                    "type": "array",
                    "items": { "type": "string" }
                })),
        ]
    }

    async fn execute(&self, _ctx: &ToolContext, args: &Map<String, Value>) -> ToolOutput {
        let path = optional_str(args, "path").unwrap_or(".");
        let ignore: Vec<String> = args
            .get("ignore")
            .and_then(|value| value.as_array())
            .map(|patterns| {
                patterns
                    .iter()
                    .filter_map(|pattern| pattern.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        self.state.list(path, &ignore).await
    }
}

/// Tool provider bundling the five filesystem tools over one shared state,
/// exporting edit failures as tool state.
pub struct FilesystemToolProvider {
    state: Arc<FsState>,
    inner: LocalToolManager,
}

impl FilesystemToolProvider {
    pub fn new(workspace_root: PathBuf, config: &FilesystemPolicyConfig) -> Self {
        Self::with_state(Arc::new(FsState::new(workspace_root, config)))
    }

    pub fn with_state(state: Arc<FsState>) -> Self {
        let inner = LocalToolManager::new();
        inner.register_tool(Arc::new(ReadFileTool::new(state.clone())));
        inner.register_tool(Arc::new(WriteFileTool::new(state.clone())));
        inner.register_tool(Arc::new(EditFileTool::new(state.clone())));
        inner.register_tool(Arc::new(MultiEditFileTool::new(state.clone())));
        inner.register_tool(Arc::new(ListFilesTool::new(state.clone())));
        Self { state, inner }
    }

    pub fn state(&self) -> Arc<FsState> {
        self.state.clone()
    }
}

#[async_trait]
impl ToolManager for FilesystemToolProvider {
    fn tools(&self) -> HashMap<String, Arc<dyn Tool>> {
        self.inner.tools()
    }

    async fn call_tool(
        &self,
        ctx: &ToolContext,
        name: &str,
        args: &Map<String, Value>,
    ) -> ToolOutput {
        self.inner.call_tool(ctx, name, args).await
    }

    fn register_tool(&self, tool: Arc<dyn Tool>) {
        self.inner.register_tool(tool);
    }

    fn as_state_provider(&self) -> Option<&dyn ToolStateProvider> {
        Some(self)
    }
}

impl ToolStateProvider for FilesystemToolProvider {
    fn tool_state(&self) -> Option<String> {
        self.state.edit_failure_report()
    }
}
