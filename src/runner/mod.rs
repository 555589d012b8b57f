//! Run orchestration: tool sessions, run records and the aggregator.
//!
//! A run is one full agent-loop execution against a fresh sandbox, ending in
//! exactly one grade. Runs share no mutable state: each owns its sandbox,
//! its transcript and its counters, which is what lets the aggregator
//! execute them sequentially or concurrently with bit-identical statistics.

pub mod aggregator;
pub mod record;
pub mod session;

pub use aggregator::{RunAggregator, CancelFlag};
pub use record::{AggregateReport, CostBreakdown, RunRecord, TokenUsage};
pub use session::{ToolCall, ToolOutcome, ToolSession};

use async_trait::async_trait;
use thiserror::Error;

use crate::sandbox::SandboxError;

/// Failure modes of a single run. All of them are recorded as failed run
/// records; none of them stop the aggregation loop.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("Run exceeded its wall-clock budget")]
    BudgetExceeded,

    #[error("Fixture build failed: {0}")]
    Fixture(String),

    #[error("Agent loop failed: {0}")]
    Agent(String),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),
}

/// Final output of one agent-loop invocation.
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    /// Raw text the agent emitted as its final answer, envelope included.
    pub raw_output: String,
    /// Token counters reported by the model-calling layer. Opaque to the
    /// harness; folded into the run record as-is.
    pub usage: TokenUsage,
}

/// The external agent loop. The harness hands it a prompt and a tool
/// session and gets back raw output; everything about models, retries and
/// reasoning lives on the other side of this boundary.
#[async_trait]
pub trait AgentLoop: Send + Sync {
    /// Drives one agent episode. Tool calls go through `session`, which
    /// records the transcript and enforces call bounds.
    async fn run(&self, prompt: &str, session: &mut ToolSession) -> Result<AgentOutcome, RunError>;
}
