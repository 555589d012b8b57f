//! Bounded test-suite execution inside the sandbox.
//!
//! `run_pytests` executes the fixture's test command as a subprocess with a
//! hard wall-clock timeout and a byte budget on captured output. A non-zero
//! exit code is a normal result the agent can inspect, not a harness error.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use super::{trim_output, Tool, ToolContext, ToolError};

/// Tool that runs the fixture's test suite and reports pass/fail counts.
pub struct RunPytestsTool;

impl RunPytestsTool {
    /// Creates a new RunPytestsTool instance.
    pub fn new() -> Self {
        Self
    }
}

impl Default for RunPytestsTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of one bounded test-suite subprocess.
#[derive(Debug)]
pub struct TestRun {
    pub exit_code: i32,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `command` in `cwd` with the given bounds. Shared with patch grading,
/// which reruns the suite on a fresh fixture copy.
pub(crate) async fn run_test_command(
    command: &[String],
    cwd: &std::path::Path,
    bound: Duration,
    output_budget: usize,
) -> Result<TestRun, ToolError> {
    let (program, args) = command
        .split_first()
        .ok_or_else(|| ToolError::execution("Empty test command"))?;

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .env("PYTHONDONTWRITEBYTECODE", "1")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output();

    let output = timeout(bound, child)
        .await
        .map_err(|_| ToolError::timeout(bound))?
        .map_err(|e| ToolError::execution(format!("Failed to spawn '{program}': {e}")))?;

    let stdout = trim_output(&String::from_utf8_lossy(&output.stdout), output_budget);
    let stderr = trim_output(&String::from_utf8_lossy(&output.stderr), output_budget);
    let exit_code = output.status.code().unwrap_or(-1);
    let (tests_passed, tests_failed) = parse_summary(&stdout);

    debug!(exit_code, tests_passed, tests_failed, "Test command finished");
    Ok(TestRun {
        exit_code,
        tests_passed,
        tests_failed,
        stdout,
        stderr,
    })
}

/// Parses pytest's summary line for passed/failed counts.
///
/// Works on lines like `3 passed in 0.02s` or `1 failed, 2 passed in 0.04s`.
/// Returns zeros when no summary is present (e.g. a collection error).
pub(crate) fn parse_summary(stdout: &str) -> (u32, u32) {
    let mut passed = 0;
    let mut failed = 0;
    for line in stdout.lines() {
        if !line.contains("passed") && !line.contains("failed") {
            continue;
        }
        let normalized = line.replace(',', " ");
        let tokens: Vec<&str> = normalized.split_whitespace().collect();
        for window in tokens.windows(2) {
            if let Ok(count) = window[0].parse::<u32>() {
                match window[1] {
                    "passed" => passed = count,
                    "failed" => failed = count,
                    _ => {}
                }
            }
        }
    }
    (passed, failed)
}

#[async_trait]
impl Tool for RunPytestsTool {
    fn name(&self) -> &str {
        "run_pytests"
    }

    fn description(&self) -> &str {
        "Execute the fixture's test suite within the sandbox. Returns the exit code, pass/fail counts and captured output. A non-zero exit code is a normal result."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {},
            "required": []
        })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let run = run_test_command(
            &ctx.test_command,
            &ctx.sandbox_root,
            ctx.subprocess_timeout,
            ctx.output_byte_budget,
        )
        .await?;

        Ok(serde_json::json!({
            "exit_code": run.exit_code,
            "tests_passed": run.tests_passed,
            "tests_failed": run.tests_failed,
            "captured_output": format!("{}\n{}", run.stdout, run.stderr).trim().to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HarnessConfig;
    use crate::sandbox::SandboxInstance;
    use crate::tools::ToolErrorKind;

    #[test]
    fn test_parse_summary_all_passed() {
        assert_eq!(parse_summary("3 passed in 0.02s\n"), (3, 0));
    }

    #[test]
    fn test_parse_summary_mixed() {
        assert_eq!(parse_summary("1 failed, 2 passed in 0.04s\n"), (2, 1));
    }

    #[test]
    fn test_parse_summary_failed_only() {
        assert_eq!(parse_summary("4 failed in 0.10s\n"), (0, 4));
    }

    #[test]
    fn test_parse_summary_no_summary() {
        assert_eq!(parse_summary("collection error\n"), (0, 0));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_normal_result() {
        let mut sandbox = SandboxInstance::create().unwrap();
        let mut config = HarnessConfig::new();
        // `false` exits 1 without needing pytest installed.
        config.test_command = vec!["false".to_string()];
        let ctx = ToolContext::new(sandbox.root(), &config);
        let result = RunPytestsTool::new()
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap();
        assert_eq!(result["exit_code"], 1);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_timeout_yields_tool_timeout_error() {
        let mut sandbox = SandboxInstance::create().unwrap();
        let mut config = HarnessConfig::new();
        config.test_command = vec!["sleep".to_string(), "5".to_string()];
        config.tool_timeout = Duration::from_millis(50);
        let ctx = ToolContext::new(sandbox.root(), &config);
        let err = RunPytestsTool::new()
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ToolTimeoutError);
        sandbox.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_missing_program_is_execution_error() {
        let mut sandbox = SandboxInstance::create().unwrap();
        let mut config = HarnessConfig::new();
        config.test_command = vec!["definitely-not-a-real-binary".to_string()];
        let ctx = ToolContext::new(sandbox.root(), &config);
        let err = RunPytestsTool::new()
            .execute(serde_json::json!({}), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::ToolExecutionError);
        sandbox.teardown().unwrap();
    }
}
