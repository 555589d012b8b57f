//! File read and write tools.
//!
//! `file_read` returns full file content as text and enforces a byte cap:
//! an oversized file fails with `FileTooLargeError` rather than silently
//! truncating, so the agent can decide to grep instead. `file_write` creates
//! parent directories as needed. Both resolve through the sandbox layer
//! before touching disk.

use std::fs;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use super::{Tool, ToolContext, ToolError, ToolErrorKind};
use crate::sandbox;

#[derive(Debug, Deserialize)]
struct FileReadParams {
    path: String,
}

#[derive(Debug, Deserialize)]
struct FileWriteParams {
    path: String,
    content: String,
}

/// Tool for reading a text file from the sandbox.
pub struct FileReadTool;

impl FileReadTool {
    /// Creates a new FileReadTool instance.
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileReadTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileReadTool {
    fn name(&self) -> &str {
        "file_read"
    }

    fn description(&self) -> &str {
        "Read a text file from the sandbox. Fails with FileTooLargeError if the file exceeds the configured size cap."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Sandbox-relative file path" }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: FileReadParams = serde_json::from_value(args)
            .map_err(|e| ToolError::execution(format!("Invalid parameters: {e}")))?;

        let resolved = sandbox::resolve(&ctx.sandbox_root, &params.path)?;
        let metadata = fs::metadata(&resolved).map_err(|_| {
            ToolError::not_found(format!("No such file in sandbox: {}", params.path))
        })?;
        if metadata.is_dir() {
            return Err(ToolError::is_a_directory(format!(
                "'{}' is a directory",
                params.path
            )));
        }
        if metadata.len() > ctx.max_file_bytes {
            return Err(ToolError::new(
                ToolErrorKind::FileTooLargeError,
                format!(
                    "File '{}' is {} bytes; cap is {}",
                    params.path,
                    metadata.len(),
                    ctx.max_file_bytes
                ),
            ));
        }

        let content = fs::read_to_string(&resolved)
            .map_err(|e| ToolError::execution(format!("Failed to read '{}': {e}", params.path)))?;
        Ok(serde_json::json!({ "content": content }))
    }
}

/// Tool for writing a sandbox file, creating parent folders if needed.
pub struct FileWriteTool;

impl FileWriteTool {
    /// Creates a new FileWriteTool instance.
    pub fn new() -> Self {
        Self
    }
}

impl Default for FileWriteTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for FileWriteTool {
    fn name(&self) -> &str {
        "file_write"
    }

    fn description(&self) -> &str {
        "Write content to a sandbox file, creating parent folders if needed."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": { "type": "string", "description": "Sandbox-relative file path" },
                "content": { "type": "string" }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: FileWriteParams = serde_json::from_value(args)
            .map_err(|e| ToolError::execution(format!("Invalid parameters: {e}")))?;

        let resolved = sandbox::resolve(&ctx.sandbox_root, &params.path)?;
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                ToolError::execution(format!("Failed to create parents for '{}': {e}", params.path))
            })?;
        }
        fs::write(&resolved, &params.content)
            .map_err(|e| ToolError::execution(format!("Failed to write '{}': {e}", params.path)))?;
        Ok(serde_json::json!({ "ok": true }))
    }
}
