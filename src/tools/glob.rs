//! Glob matching over the sandbox tree.
//!
//! `glob_find` walks the sandbox and returns every regular file whose
//! sandbox-relative path matches the pattern and none of the exclude rules.
//! Matching follows shell-glob semantics with `**` for recursive descent;
//! like `fnmatch`, a plain `*` is allowed to cross path separators, so a
//! bare `*.env*` finds dotfiles at any depth while `tests/**` excludes the
//! whole subtree.

use async_trait::async_trait;
use glob::{MatchOptions, Pattern};
use serde::Deserialize;
use serde_json::Value;
use walkdir::WalkDir;

use super::{Tool, ToolContext, ToolError, ToolErrorKind};
use crate::sandbox;

#[derive(Debug, Deserialize)]
struct GlobFindParams {
    pattern: String,
    #[serde(default)]
    exclude: Vec<String>,
}

/// Tool returning sorted sandbox-relative paths matching a glob pattern.
pub struct GlobFindTool;

impl GlobFindTool {
    /// Creates a new GlobFindTool instance.
    pub fn new() -> Self {
        Self
    }
}

impl Default for GlobFindTool {
    fn default() -> Self {
        Self::new()
    }
}

fn match_options() -> MatchOptions {
    MatchOptions {
        case_sensitive: true,
        require_literal_separator: false,
        require_literal_leading_dot: false,
    }
}

fn compile(pattern: &str) -> Result<Pattern, ToolError> {
    Pattern::new(pattern)
        .map_err(|e| ToolError::new(ToolErrorKind::ToolExecutionError, format!("Bad glob pattern '{pattern}': {e}")))
}

/// Collects matching sandbox-relative paths: deduplicated, sorted.
pub(crate) fn find_matches(
    ctx: &ToolContext,
    raw_pattern: &str,
    exclude: &[String],
) -> Result<Vec<String>, ToolError> {
    // Normalize the pattern the way paths are normalized, so an agent may
    // spell the sandbox root explicitly. Containment rejections are real
    // errors; a pattern cannot be allowed to walk outside the root.
    let resolved = sandbox::resolve(&ctx.sandbox_root, raw_pattern)?;
    let relative_pattern = resolved
        .strip_prefix(&ctx.sandbox_root)
        .map(|p| p.to_string_lossy().replace('\\', "/"))
        .unwrap_or_default();

    let want_directories = raw_pattern.ends_with('/');
    let effective = if relative_pattern.is_empty() {
        "*".to_string()
    } else {
        relative_pattern
    };

    let pattern = compile(&effective)?;
    let exclusions = exclude
        .iter()
        .map(|rule| compile(rule))
        .collect::<Result<Vec<_>, _>>()?;

    let options = match_options();
    let mut matches: Vec<String> = Vec::new();
    for entry in WalkDir::new(&ctx.sandbox_root)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        let is_match_type = if want_directories {
            entry.file_type().is_dir() && entry.path() != ctx.sandbox_root
        } else {
            entry.file_type().is_file()
        };
        if !is_match_type {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(&ctx.sandbox_root) else {
            continue;
        };
        let rel = rel.to_string_lossy().replace('\\', "/");
        if !pattern.matches_with(&rel, options) {
            continue;
        }
        if exclusions.iter().any(|rule| rule.matches_with(&rel, options)) {
            continue;
        }
        matches.push(rel);
    }

    matches.sort();
    matches.dedup();
    Ok(matches)
}

#[async_trait]
impl Tool for GlobFindTool {
    fn name(&self) -> &str {
        "glob_find"
    }

    fn description(&self) -> &str {
        "Run a glob search relative to the sandbox root. Supports ** for recursive descent and an exclude list with the same glob semantics. Returns sorted relative paths of regular files."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Glob pattern, e.g. '*.env*' or 'src/**/*.py'"
                },
                "exclude": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Glob rules; any match removes the path",
                    "default": []
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: GlobFindParams = serde_json::from_value(args)
            .map_err(|e| ToolError::execution(format!("Invalid parameters: {e}")))?;
        let paths = find_matches(ctx, &params.pattern, &params.exclude)?;
        Ok(serde_json::json!({ "paths": paths }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::sandbox::SandboxInstance;

    fn seeded_sandbox() -> SandboxInstance {
        let sandbox = SandboxInstance::create().unwrap();
        sandbox.write_file(".env", "SECRET=abc\n").unwrap();
        sandbox
            .write_file("tests/.env.fixture", "SECRET=xyz\n")
            .unwrap();
        sandbox
            .write_file("config/.env.production", "SECRET=prod\n")
            .unwrap();
        sandbox.write_file("README.txt", "readme\n").unwrap();
        sandbox
    }

    fn ctx_for(sandbox: &SandboxInstance) -> ToolContext {
        ToolContext::new(sandbox.root(), &HarnessConfig::new())
    }

    #[tokio::test]
    async fn test_glob_find_basic() {
        let mut sandbox = seeded_sandbox();
        let ctx = ctx_for(&sandbox);
        let result = GlobFindTool::new()
            .execute(serde_json::json!({"pattern": "*.env*"}), &ctx)
            .await
            .unwrap();
        let paths: Vec<String> =
            serde_json::from_value(result["paths"].clone()).unwrap();
        assert!(paths.contains(&".env".to_string()));
        assert!(paths.contains(&"tests/.env.fixture".to_string()));
        assert!(paths.contains(&"config/.env.production".to_string()));
        assert!(!paths.contains(&"README.txt".to_string()));
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_glob_find_exclude_subtree() {
        let mut sandbox = seeded_sandbox();
        let ctx = ctx_for(&sandbox);
        let result = GlobFindTool::new()
            .execute(
                serde_json::json!({"pattern": "*.env*", "exclude": ["tests/**"]}),
                &ctx,
            )
            .await
            .unwrap();
        let paths: Vec<String> =
            serde_json::from_value(result["paths"].clone()).unwrap();
        assert!(!paths.iter().any(|p| p.starts_with("tests")));
        assert!(paths.contains(&".env".to_string()));
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_glob_find_sorted_and_deduplicated() {
        let mut sandbox = seeded_sandbox();
        let ctx = ctx_for(&sandbox);
        let paths = find_matches(&ctx, "*.env*", &[]).unwrap();
        let mut sorted = paths.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(paths, sorted);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_glob_find_empty_pattern_lists_all_files() {
        let mut sandbox = seeded_sandbox();
        let ctx = ctx_for(&sandbox);
        let paths = find_matches(&ctx, "", &[]).unwrap();
        assert_eq!(paths.len(), 4);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_glob_find_directories_with_trailing_separator() {
        let mut sandbox = seeded_sandbox();
        let ctx = ctx_for(&sandbox);
        let paths = find_matches(&ctx, "tests/", &[]).unwrap();
        assert_eq!(paths, vec!["tests".to_string()]);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_glob_find_escaping_pattern_rejected() {
        let mut sandbox = seeded_sandbox();
        let ctx = ctx_for(&sandbox);
        let err = find_matches(&ctx, "../**", &[]).unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::PathError);
        sandbox.teardown().unwrap();
    }
}
