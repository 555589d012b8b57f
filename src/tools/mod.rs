//! Tool definitions and registry for the agent-facing tool surface.
//!
//! This module defines the `Tool` trait and a registry for the fixed set of
//! tools an agent may call during a run. Every tool receives arguments that
//! are resolved through the sandbox path layer before any filesystem access,
//! and returns either a structured JSON result or a structured error — tool
//! failures are data the agent can read and react to, never panics or
//! harness-fatal errors.

pub mod file;
pub mod glob;
pub mod grep;
pub mod pytest;
pub mod python;
pub mod sql;

pub use file::{FileReadTool, FileWriteTool};
pub use glob::GlobFindTool;
pub use grep::GrepSearchTool;
pub use pytest::RunPytestsTool;
pub use python::PythonExpressionTool;
pub use sql::SqlQueryTool;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::config::HarnessConfig;
use crate::sandbox::PathError;

/// Machine-readable classification carried on every tool failure.
///
/// These are the only kinds that cross the agent boundary; the wire shape is
/// `{"error": {"kind": "...", "message": "..."}}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolErrorKind {
    /// Path rejected by the sandbox resolver before any I/O.
    PathError,
    /// Target file or directory does not exist.
    NotFoundError,
    /// A file operation hit a directory that must be enumerated first.
    IsADirectoryError,
    /// File exceeds the configured read cap.
    FileTooLargeError,
    /// The call exceeded its wall-clock bound.
    ToolTimeoutError,
    /// Malformed or non-read-only SQL.
    QueryError,
    /// Expression evaluation failed; message carries the underlying error.
    EvaluationError,
    /// Any other recoverable execution failure.
    ToolExecutionError,
}

impl std::fmt::Display for ToolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ToolErrorKind::PathError => "PathError",
            ToolErrorKind::NotFoundError => "NotFoundError",
            ToolErrorKind::IsADirectoryError => "IsADirectoryError",
            ToolErrorKind::FileTooLargeError => "FileTooLargeError",
            ToolErrorKind::ToolTimeoutError => "ToolTimeoutError",
            ToolErrorKind::QueryError => "QueryError",
            ToolErrorKind::EvaluationError => "EvaluationError",
            ToolErrorKind::ToolExecutionError => "ToolExecutionError",
        };
        write!(f, "{name}")
    }
}

/// A structured tool failure delivered to the agent as data.
#[derive(Debug, Clone, Error, PartialEq, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct ToolError {
    /// Classification the agent can branch on.
    pub kind: ToolErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl ToolError {
    /// Creates an error of the given kind.
    pub fn new(kind: ToolErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for `NotFoundError`.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::NotFoundError, message)
    }

    /// Shorthand for `IsADirectoryError`.
    pub fn is_a_directory(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::IsADirectoryError, message)
    }

    /// Shorthand for `ToolExecutionError`.
    pub fn execution(message: impl Into<String>) -> Self {
        Self::new(ToolErrorKind::ToolExecutionError, message)
    }

    /// Shorthand for `ToolTimeoutError`.
    pub fn timeout(bound: Duration) -> Self {
        Self::new(
            ToolErrorKind::ToolTimeoutError,
            format!("Tool call exceeded {}s bound", bound.as_secs()),
        )
    }

    /// Serializes to the wire shape handed back to the agent.
    pub fn to_wire(&self) -> Value {
        serde_json::json!({
            "error": {
                "kind": self.kind.to_string(),
                "message": self.message,
            }
        })
    }
}

impl From<PathError> for ToolError {
    fn from(err: PathError) -> Self {
        Self::new(ToolErrorKind::PathError, err.to_string())
    }
}

/// Context for tool execution: confinement root plus resource bounds.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Sandbox root all paths resolve against.
    pub sandbox_root: PathBuf,
    /// Maximum file size `file_read` returns.
    pub max_file_bytes: u64,
    /// Byte budget for captured subprocess output.
    pub output_byte_budget: usize,
    /// Wall-clock bound for subprocess-backed tools.
    pub subprocess_timeout: Duration,
    /// Test command for `run_pytests` (argv form).
    pub test_command: Vec<String>,
}

impl ToolContext {
    /// Builds a context for one sandbox from the harness configuration.
    pub fn new(sandbox_root: impl Into<PathBuf>, config: &HarnessConfig) -> Self {
        Self {
            sandbox_root: sandbox_root.into(),
            max_file_bytes: config.max_file_bytes,
            output_byte_budget: config.output_byte_budget,
            subprocess_timeout: config.tool_timeout,
            test_command: config.test_command.clone(),
        }
    }
}

/// Trait for tools the agent can invoke.
///
/// Implementations must be pure with respect to everything outside the
/// sandbox: all filesystem access goes through [`crate::sandbox::resolve`],
/// and failures come back as [`ToolError`] values, never panics.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the unique name of the tool.
    fn name(&self) -> &str;

    /// Returns a description of what the tool does.
    fn description(&self) -> &str;

    /// Returns the JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Executes the tool with the given arguments and context.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError>;
}

/// Registry for the tools exposed to a run.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Creates a new empty tool registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Creates a registry with the full default tool surface.
    pub fn with_default_tools() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(GlobFindTool::new()));
        registry.register(Arc::new(GrepSearchTool::new()));
        registry.register(Arc::new(FileReadTool::new()));
        registry.register(Arc::new(FileWriteTool::new()));
        registry.register(Arc::new(RunPytestsTool::new()));
        registry.register(Arc::new(SqlQueryTool::new()));
        registry.register(Arc::new(PythonExpressionTool::new()));
        registry
    }

    /// Creates a registry restricted to the named tools.
    pub fn with_tools(names: &[&str]) -> Self {
        let full = Self::with_default_tools();
        let mut registry = Self::new();
        for name in names {
            if let Some(tool) = full.get(name) {
                registry.register(tool);
            }
        }
        registry
    }

    /// Registers a tool.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Gets a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Lists all registered tool names, sorted.
    pub fn list_tools(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns true if no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Generates a JSON schema array for all registered tools, suitable for
    /// LLM function calling.
    pub fn to_json_schema(&self) -> Value {
        let names = self.list_tools();
        let tools: Vec<Value> = names
            .iter()
            .filter_map(|name| self.tools.get(*name))
            .map(|tool| {
                serde_json::json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "input_schema": tool.parameters_schema(),
                })
            })
            .collect();
        Value::Array(tools)
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Trims text to `limit` bytes, keeping head and tail halves.
pub(crate) fn trim_output(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let head = limit / 2;
    let tail = limit - head;
    let head_end = floor_char_boundary(text, head);
    let tail_start = floor_char_boundary(text, text.len() - tail);
    format!("{}\n...\n{}", &text[..head_end], &text[tail_start..])
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_error_wire_shape() {
        let err = ToolError::not_found("missing.txt");
        let wire = err.to_wire();
        assert_eq!(wire["error"]["kind"], "NotFoundError");
        assert_eq!(wire["error"]["message"], "missing.txt");
    }

    #[test]
    fn test_path_error_conversion() {
        let err: ToolError = PathError::EscapesSandbox("../x".into()).into();
        assert_eq!(err.kind, ToolErrorKind::PathError);
    }

    #[test]
    fn test_registry_default_tools() {
        let registry = ToolRegistry::with_default_tools();
        assert!(registry.get("glob_find").is_some());
        assert!(registry.get("grep_search").is_some());
        assert!(registry.get("file_read").is_some());
        assert!(registry.get("file_write").is_some());
        assert!(registry.get("run_pytests").is_some());
        assert!(registry.get("sql_query").is_some());
        assert!(registry.get("python_expression").is_some());
    }

    #[test]
    fn test_registry_restricted() {
        let registry = ToolRegistry::with_tools(&["file_read", "glob_find"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("sql_query").is_none());
    }

    #[test]
    fn test_registry_schema_export() {
        let registry = ToolRegistry::with_tools(&["file_read"]);
        let schema = registry.to_json_schema();
        let arr = schema.as_array().expect("schema should be an array");
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["name"], "file_read");
        assert!(arr[0]["input_schema"].is_object());
    }

    #[test]
    fn test_trim_output_short() {
        assert_eq!(trim_output("hello", 10), "hello");
    }

    #[test]
    fn test_trim_output_long() {
        let text = "a".repeat(100);
        let trimmed = trim_output(&text, 20);
        assert!(trimmed.len() < 40);
        assert!(trimmed.contains("..."));
    }
}
