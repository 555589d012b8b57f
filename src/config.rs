//! Configuration for evaluation runs.
//!
//! A [`HarnessConfig`] is an explicit value threaded into every run. Nothing
//! in the harness reads process-global mutable state, so concurrent runs
//! cannot corrupt each other's budgets or counters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Denominator for per-token pricing (prices are USD per million tokens).
pub const TOKEN_COST_DENOMINATOR: f64 = 1_000_000.0;

/// Configuration shared by all runs of an evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    /// Wall-clock timeout applied to each individual tool call.
    pub tool_timeout: Duration,
    /// Overall wall-clock budget for a single run.
    pub run_timeout: Duration,
    /// Maximum number of tool calls a single run may issue.
    pub max_steps: u32,
    /// Maximum file size `file_read` will return, in bytes.
    pub max_file_bytes: u64,
    /// Byte budget for captured subprocess output (stdout + stderr each).
    pub output_byte_budget: usize,
    /// Command used by `run_pytests` (argv form).
    pub test_command: Vec<String>,
    /// Number of runs executed concurrently (1 = sequential).
    pub parallelism: usize,
    /// Pricing for the model driving the agent, if known.
    pub pricing: Option<ModelPricing>,
}

impl HarnessConfig {
    /// Creates a configuration with defaults suitable for the bundled tasks.
    pub fn new() -> Self {
        Self {
            tool_timeout: Duration::from_secs(30),
            run_timeout: Duration::from_secs(300),
            max_steps: 8,
            max_file_bytes: 256 * 1024,
            output_byte_budget: 8192,
            test_command: vec![
                "pytest".to_string(),
                "-q".to_string(),
                "-p".to_string(),
                "no:cacheprovider".to_string(),
            ],
            parallelism: 1,
            pricing: None,
        }
    }

    /// Sets the per-call tool timeout.
    pub fn with_tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    /// Sets the overall per-run budget.
    pub fn with_run_timeout(mut self, timeout: Duration) -> Self {
        self.run_timeout = timeout;
        self
    }

    /// Sets the tool-call step budget.
    pub fn with_max_steps(mut self, steps: u32) -> Self {
        self.max_steps = steps;
        self
    }

    /// Sets the `file_read` size cap.
    pub fn with_max_file_bytes(mut self, bytes: u64) -> Self {
        self.max_file_bytes = bytes;
        self
    }

    /// Sets the number of concurrent runs.
    pub fn with_parallelism(mut self, workers: usize) -> Self {
        self.parallelism = workers.max(1);
        self
    }

    /// Sets the pricing table used for cost counters.
    pub fn with_pricing(mut self, pricing: ModelPricing) -> Self {
        self.pricing = Some(pricing);
        self
    }
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-model token pricing, USD per million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Cost per million input tokens.
    pub input: f64,
    /// Cost per million output tokens.
    pub output: f64,
}

impl ModelPricing {
    /// Looks up pricing for a known model name.
    pub fn for_model(model: &str) -> Option<Self> {
        match model {
            "claude-3-haiku-20240307" => Some(Self {
                input: 0.25,
                output: 1.25,
            }),
            "claude-3-5-haiku-20241022" | "claude-3-5-haiku-latest" => Some(Self {
                input: 0.8,
                output: 4.0,
            }),
            _ => None,
        }
    }

    /// Computes (input_cost, output_cost, total) for a token count pair.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> (f64, f64, f64) {
        let input_cost = input_tokens as f64 / TOKEN_COST_DENOMINATOR * self.input;
        let output_cost = output_tokens as f64 / TOKEN_COST_DENOMINATOR * self.output;
        (input_cost, output_cost, input_cost + output_cost)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HarnessConfig::new();
        assert_eq!(config.tool_timeout, Duration::from_secs(30));
        assert_eq!(config.parallelism, 1);
        assert_eq!(config.test_command[0], "pytest");
        assert!(config.pricing.is_none());
    }

    #[test]
    fn test_config_builder() {
        let config = HarnessConfig::new()
            .with_tool_timeout(Duration::from_secs(5))
            .with_max_steps(3)
            .with_parallelism(4);
        assert_eq!(config.tool_timeout, Duration::from_secs(5));
        assert_eq!(config.max_steps, 3);
        assert_eq!(config.parallelism, 4);
    }

    #[test]
    fn test_parallelism_floor() {
        let config = HarnessConfig::new().with_parallelism(0);
        assert_eq!(config.parallelism, 1);
    }

    #[test]
    fn test_known_pricing() {
        let pricing = ModelPricing::for_model("claude-3-5-haiku-latest").unwrap();
        let (input, output, total) = pricing.cost(1_000_000, 500_000);
        assert!((input - 0.8).abs() < 1e-9);
        assert!((output - 2.0).abs() < 1e-9);
        assert!((total - 2.8).abs() < 1e-9);
    }

    #[test]
    fn test_unknown_pricing() {
        assert!(ModelPricing::for_model("mystery-model").is_none());
    }
}
