//! Regex search over sandbox files.
//!
//! `grep_search` applies a regular expression per physical line, so `^` and
//! `$` anchor to line start and end exactly: `^SECRET=` matches `SECRET=x`
//! but not ` SECRET=x` or `export SECRET=x`. There is no implicit multiline
//! mode. The path may contain glob metacharacters, in which case every
//! matching file is searched.

use std::fs;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde::Deserialize;
use serde_json::Value;

use super::{glob, Tool, ToolContext, ToolError};
use crate::sandbox;

/// Longest line text returned per match.
const MAX_LINE_CHARS: usize = 256;

#[derive(Debug, Default, Deserialize)]
struct GrepFlags {
    #[serde(default)]
    ignore_case: bool,
}

#[derive(Debug, Deserialize)]
struct GrepSearchParams {
    pattern: String,
    path: String,
    #[serde(default)]
    flags: GrepFlags,
}

/// Tool returning `{file, line_number, line_text}` for every matching line.
pub struct GrepSearchTool;

impl GrepSearchTool {
    /// Creates a new GrepSearchTool instance.
    pub fn new() -> Self {
        Self
    }
}

impl Default for GrepSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

fn has_glob_meta(path: &str) -> bool {
    path.contains(['*', '?', '['])
}

fn cap_line(line: &str) -> String {
    if line.chars().count() <= MAX_LINE_CHARS {
        line.to_string()
    } else {
        line.chars().take(MAX_LINE_CHARS).collect()
    }
}

#[async_trait]
impl Tool for GrepSearchTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search for lines matching a regex within a sandbox file. The regex is applied per line; ^ and $ anchor to line boundaries. The path may be a glob, in which case all matching files are searched. Supports an ignore_case flag."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Regular expression applied to each line"
                },
                "path": {
                    "type": "string",
                    "description": "Sandbox-relative file path, or a glob over files"
                },
                "flags": {
                    "type": "object",
                    "properties": {
                        "ignore_case": { "type": "boolean" }
                    },
                    "additionalProperties": false,
                    "default": {}
                }
            },
            "required": ["pattern", "path"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: GrepSearchParams = serde_json::from_value(args)
            .map_err(|e| ToolError::execution(format!("Invalid parameters: {e}")))?;

        let regex = RegexBuilder::new(&params.pattern)
            .case_insensitive(params.flags.ignore_case)
            .build()
            .map_err(|e| ToolError::execution(format!("Bad regex '{}': {e}", params.pattern)))?;

        // Either a glob over files or a single concrete path.
        let relative_files: Vec<String> = if has_glob_meta(&params.path) {
            glob::find_matches(ctx, &params.path, &[])?
        } else {
            let resolved = sandbox::resolve(&ctx.sandbox_root, &params.path)?;
            if !resolved.exists() {
                return Err(ToolError::not_found(format!(
                    "No such file in sandbox: {}",
                    params.path
                )));
            }
            if resolved.is_dir() {
                return Err(ToolError::is_a_directory(format!(
                    "'{}' is a directory; enumerate it first (glob_find)",
                    params.path
                )));
            }
            let rel = resolved
                .strip_prefix(&ctx.sandbox_root)
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .unwrap_or_else(|_| params.path.clone());
            vec![rel]
        };

        let mut matches = Vec::new();
        for rel in &relative_files {
            let absolute = ctx.sandbox_root.join(rel);
            let Ok(text) = fs::read_to_string(&absolute) else {
                continue; // binary or vanished file; skip like grep -I would
            };
            for (idx, line) in text.lines().enumerate() {
                if regex.is_match(line) {
                    matches.push(serde_json::json!({
                        "file": rel,
                        "line_number": idx + 1,
                        "line_text": cap_line(line),
                    }));
                }
            }
        }

        Ok(serde_json::json!({ "matches": matches }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::sandbox::SandboxInstance;
    use crate::tools::ToolErrorKind;

    fn ctx_for(sandbox: &SandboxInstance) -> ToolContext {
        ToolContext::new(sandbox.root(), &HarnessConfig::new())
    }

    async fn run(sandbox: &SandboxInstance, args: Value) -> Result<Value, ToolError> {
        GrepSearchTool::new().execute(args, &ctx_for(sandbox)).await
    }

    #[tokio::test]
    async fn test_anchored_match_is_exact() {
        let mut sandbox = SandboxInstance::create().unwrap();
        sandbox
            .write_file(
                ".env",
                "SECRET=x\n#SECRET=x\n SECRET=x\nexport SECRET=x\n",
            )
            .unwrap();
        let result = run(
            &sandbox,
            serde_json::json!({"pattern": "^SECRET=", "path": ".env"}),
        )
        .await
        .unwrap();
        let matches = result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0]["line_number"], 1);
        assert_eq!(matches[0]["line_text"], "SECRET=x");
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_ignore_case_flag() {
        let mut sandbox = SandboxInstance::create().unwrap();
        sandbox.write_file("log.txt", "Error: boom\nok\n").unwrap();
        let result = run(
            &sandbox,
            serde_json::json!({
                "pattern": "^error",
                "path": "log.txt",
                "flags": {"ignore_case": true}
            }),
        )
        .await
        .unwrap();
        assert_eq!(result["matches"].as_array().unwrap().len(), 1);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_missing_path_is_not_found() {
        let mut sandbox = SandboxInstance::create().unwrap();
        let err = run(
            &sandbox,
            serde_json::json!({"pattern": "x", "path": "nope.txt"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::NotFoundError);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_directory_path_is_rejected() {
        let mut sandbox = SandboxInstance::create().unwrap();
        sandbox.write_file("logs/access.log", "line\n").unwrap();
        let err = run(
            &sandbox,
            serde_json::json!({"pattern": "x", "path": "logs"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::IsADirectoryError);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_glob_path_searches_all_matches() {
        let mut sandbox = SandboxInstance::create().unwrap();
        sandbox.write_file("a/one.cfg", "key=1\n").unwrap();
        sandbox.write_file("b/two.cfg", "key=2\nother\n").unwrap();
        let result = run(
            &sandbox,
            serde_json::json!({"pattern": "^key=", "path": "*.cfg"}),
        )
        .await
        .unwrap();
        let matches = result["matches"].as_array().unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0]["file"], "a/one.cfg");
        assert_eq!(matches[1]["file"], "b/two.cfg");
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_line_numbers_in_file_order() {
        let mut sandbox = SandboxInstance::create().unwrap();
        sandbox
            .write_file("f.txt", "match\nskip\nmatch\n")
            .unwrap();
        let result = run(
            &sandbox,
            serde_json::json!({"pattern": "^match$", "path": "f.txt"}),
        )
        .await
        .unwrap();
        let matches = result["matches"].as_array().unwrap();
        assert_eq!(matches[0]["line_number"], 1);
        assert_eq!(matches[1]["line_number"], 3);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_bad_regex_is_execution_error() {
        let mut sandbox = SandboxInstance::create().unwrap();
        sandbox.write_file("f.txt", "x\n").unwrap();
        let err = run(
            &sandbox,
            serde_json::json!({"pattern": "(unclosed", "path": "f.txt"}),
        )
        .await
        .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ToolExecutionError);
        sandbox.teardown().unwrap();
    }
}
