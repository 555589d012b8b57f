//! Restricted Python expression evaluation.
//!
//! `python_expression` evaluates a single expression in an isolated
//! `python3 -I` subprocess. A guard preamble replaces the builtins with a
//! fixed allow-list (no `__import__`, no file or network access) and applies
//! CPU-time and address-space rlimits before compiling the expression in
//! `eval` mode, so import statements are a syntax error by construction. The
//! computed value is serialized to a JSON primitive; anything the expression
//! raises comes back as an `EvaluationError` carrying the message.

use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;

use super::{trim_output, Tool, ToolContext, ToolError, ToolErrorKind};

/// Guard preamble run inside `python3 -I`. Reads the expression from stdin,
/// evaluates it under the allow-list and prints a one-line JSON envelope.
const GUARD_SCRIPT: &str = r#"
import builtins, json, math, resource, sys

resource.setrlimit(resource.RLIMIT_CPU, (5, 5))
resource.setrlimit(resource.RLIMIT_AS, (256 * 1024 * 1024, 256 * 1024 * 1024))

ALLOWED = (
    "abs", "min", "max", "sum", "len", "range", "round",
    "int", "float", "str", "bool", "list", "dict", "tuple", "set",
    "sorted", "enumerate", "zip", "map", "filter", "all", "any", "repr",
)
env = {"__builtins__": {name: getattr(builtins, name) for name in ALLOWED}, "math": math}

source = sys.stdin.read()
try:
    value = eval(compile(source, "<expression>", "eval"), env, {})
    if isinstance(value, (set, tuple, range, zip, map, filter, enumerate)):
        value = list(value)
    payload = {"result": value}
    json.dumps(payload)
except SyntaxError as exc:
    payload = {"error": "SyntaxError: %s" % exc.msg}
except TypeError as exc:
    if "not JSON serializable" in str(exc):
        payload = {"result": repr(value)}
    else:
        payload = {"error": "TypeError: %s" % exc}
except Exception as exc:
    payload = {"error": "%s: %s" % (type(exc).__name__, exc)}
print(json.dumps(payload))
"#;

#[derive(Debug, Deserialize)]
struct PythonExpressionParams {
    expression: String,
}

/// Tool evaluating one expression under a restricted interpreter.
pub struct PythonExpressionTool;

impl PythonExpressionTool {
    /// Creates a new PythonExpressionTool instance.
    pub fn new() -> Self {
        Self
    }
}

impl Default for PythonExpressionTool {
    fn default() -> Self {
        Self::new()
    }
}

fn evaluation_error(message: impl Into<String>) -> ToolError {
    ToolError::new(ToolErrorKind::EvaluationError, message)
}

#[async_trait]
impl Tool for PythonExpressionTool {
    fn name(&self) -> &str {
        "python_expression"
    }

    fn description(&self) -> &str {
        "Evaluate a single Python expression under a restricted context: a fixed allow-list of builtins plus math, no imports, no file or network access, bounded CPU time and memory. Returns the computed value as a JSON primitive."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "A single expression, e.g. 'sorted(counts.items())' or 'sum(range(10))'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> Result<Value, ToolError> {
        let params: PythonExpressionParams = serde_json::from_value(args)
            .map_err(|e| ToolError::execution(format!("Invalid parameters: {e}")))?;

        let mut child = Command::new("python3")
            .args(["-I", "-S", "-c", GUARD_SCRIPT])
            .current_dir(&ctx.sandbox_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::execution(format!("Failed to spawn python3: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(params.expression.as_bytes())
                .await
                .map_err(|e| ToolError::execution(format!("Failed to feed expression: {e}")))?;
        }

        let output = timeout(ctx.subprocess_timeout, child.wait_with_output())
            .await
            .map_err(|_| ToolError::timeout(ctx.subprocess_timeout))?
            .map_err(|e| ToolError::execution(format!("python3 failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let line = stdout
            .lines()
            .next_back()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| {
                let stderr = trim_output(
                    &String::from_utf8_lossy(&output.stderr),
                    ctx.output_byte_budget,
                );
                evaluation_error(format!("Interpreter produced no result: {stderr}"))
            })?;

        let payload: Value = serde_json::from_str(line)
            .map_err(|e| evaluation_error(format!("Unreadable interpreter output: {e}")))?;
        if let Some(message) = payload.get("error").and_then(Value::as_str) {
            return Err(evaluation_error(message));
        }
        let result = payload
            .get("result")
            .cloned()
            .ok_or_else(|| evaluation_error("Interpreter returned neither result nor error"))?;
        Ok(serde_json::json!({ "result": result }))
    }
}
