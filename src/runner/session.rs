//! Per-run tool session and transcript.
//!
//! The session is the harness side of the tool boundary: the agent issues
//! one call at a time, the session executes it with a wall-clock bound and
//! appends an immutable [`ToolCall`] to the transcript. Errors — including
//! timeouts — come back as data the agent can react to; the run continues.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::timeout;
use tracing::debug;

use crate::config::HarnessConfig;
use crate::tools::{ToolContext, ToolError, ToolRegistry};

/// Result-or-error of one tool call, as delivered to the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolOutcome {
    /// Structured result payload.
    Result(Value),
    /// Structured error payload.
    Error(ToolError),
}

impl ToolOutcome {
    /// Returns true for the error variant.
    pub fn is_error(&self) -> bool {
        matches!(self, ToolOutcome::Error(_))
    }

    /// Wire value handed to the agent.
    pub fn to_wire(&self) -> Value {
        match self {
            ToolOutcome::Result(value) => serde_json::json!({ "result": value }),
            ToolOutcome::Error(err) => err.to_wire(),
        }
    }
}

/// One recorded tool invocation. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name as invoked.
    pub name: String,
    /// Arguments as received.
    pub arguments: Value,
    /// Result or structured error.
    pub outcome: ToolOutcome,
    /// Wall-clock duration of the call.
    pub elapsed: Duration,
    /// Serialized size of the outcome, in bytes.
    pub output_bytes: u64,
    /// When the call started.
    pub started_at: DateTime<Utc>,
}

/// Tool surface plus transcript for a single run.
pub struct ToolSession {
    registry: ToolRegistry,
    ctx: ToolContext,
    call_timeout: Duration,
    max_steps: u32,
    steps_used: u32,
    transcript: Vec<ToolCall>,
}

impl ToolSession {
    /// Creates a session over `registry` bound to one sandbox.
    pub fn new(registry: ToolRegistry, ctx: ToolContext, config: &HarnessConfig) -> Self {
        Self {
            registry,
            ctx,
            call_timeout: config.tool_timeout,
            max_steps: config.max_steps,
            steps_used: 0,
            transcript: Vec::new(),
        }
    }

    /// Exposes the tool schemas for the model-calling layer.
    pub fn tool_schemas(&self) -> Value {
        self.registry.to_json_schema()
    }

    /// Number of tool calls issued so far.
    pub fn steps_used(&self) -> u32 {
        self.steps_used
    }

    /// Invokes a tool, records the call, and returns the wire value for the
    /// agent. Never returns an Err: failures are data.
    pub async fn invoke(&mut self, name: &str, arguments: Value) -> Value {
        let started_at = Utc::now();
        let clock = Instant::now();

        let outcome = self.execute_bounded(name, arguments.clone()).await;

        let elapsed = clock.elapsed();
        let wire = outcome.to_wire();
        let output_bytes = serde_json::to_vec(&wire).map(|b| b.len() as u64).unwrap_or(0);
        debug!(
            tool = name,
            elapsed_ms = elapsed.as_millis() as u64,
            output_bytes,
            error = outcome.is_error(),
            "Tool call finished"
        );
        self.transcript.push(ToolCall {
            name: name.to_string(),
            arguments,
            outcome,
            elapsed,
            output_bytes,
            started_at,
        });
        wire
    }

    async fn execute_bounded(&mut self, name: &str, arguments: Value) -> ToolOutcome {
        if self.steps_used >= self.max_steps {
            return ToolOutcome::Error(ToolError::execution(format!(
                "Step budget of {} tool calls exhausted",
                self.max_steps
            )));
        }
        self.steps_used += 1;

        let Some(tool) = self.registry.get(name) else {
            return ToolOutcome::Error(ToolError::execution(format!("Unknown tool: {name}")));
        };

        match timeout(self.call_timeout, tool.execute(arguments, &self.ctx)).await {
            Ok(Ok(value)) => ToolOutcome::Result(value),
            Ok(Err(err)) => ToolOutcome::Error(err),
            Err(_) => ToolOutcome::Error(ToolError::timeout(self.call_timeout)),
        }
    }

    /// Consumes the session, yielding the transcript in call order.
    pub fn into_transcript(self) -> Vec<ToolCall> {
        self.transcript
    }

    /// Read access to the transcript so far.
    pub fn transcript(&self) -> &[ToolCall] {
        &self.transcript
    }
}
