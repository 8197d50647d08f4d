//! Tool system: trait contracts, registries, and the built-in tools.

pub mod fs;
pub mod registry;
pub mod shell;
pub mod traits;

pub use fs::{FilesystemToolProvider, FsState, WriteValidator};
pub use registry::{CompositeToolManager, LocalToolManager};
pub use shell::ShellTool;
pub use traits::{
    ArgType, Tool, ToolArgument, ToolContext, ToolManager, ToolOutput, ToolStateProvider,
    arguments_to_schema, unknown_tool_error,
};

/// Argument extraction helpers shared by the built-in tools.
pub(crate) mod args {
    use serde_json::{Map, Value};

    pub fn required_str<'a>(args: &'a Map<String, Value>, key: &str) -> Result<&'a str, String> {
        match args.get(key).and_then(Value::as_str) {
            Some(value) if !value.is_empty() => Ok(value),
            Some(_) => Err(format!("required parameter {key} is empty")),
            None => Err(format!("missing required parameter {key}")),
        }
    }

    pub fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
        args.get(key).and_then(Value::as_str)
    }

    pub fn optional_bool(args: &Map<String, Value>, key: &str) -> Option<bool> {
        args.get(key).and_then(Value::as_bool)
    }

    pub fn optional_usize(args: &Map<String, Value>, key: &str) -> Option<usize> {
        args.get(key)
            .and_then(Value::as_u64)
            .map(|value| value as usize)
    }

    pub fn optional_u64(args: &Map<String, Value>, key: &str) -> Option<u64> {
        args.get(key).and_then(Value::as_u64)
    }
}
