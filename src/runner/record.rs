//! Run records and the aggregate report.
//!
//! A [`RunRecord`] is immutable once its run completes. The
//! [`AggregateReport`] is derived: every statistic is recomputed purely as a
//! function of the recorded runs, never mutated independently of them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::session::ToolCall;
use crate::config::ModelPricing;
use crate::envelope::Envelope;
use crate::grading::GradeResult;

/// Token counters supplied by the agent-calling layer. Opaque to grading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input/prompt tokens.
    pub input_tokens: u64,
    /// Output/completion tokens.
    pub output_tokens: u64,
}

impl TokenUsage {
    /// Creates new token usage stats.
    pub fn new(input: u64, output: u64) -> Self {
        Self {
            input_tokens: input,
            output_tokens: output,
        }
    }

    /// Returns total tokens used.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// Dollar cost derived from token usage and the configured pricing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostBreakdown {
    pub input: f64,
    pub output: f64,
    pub total: f64,
}

impl CostBreakdown {
    /// Computes costs for `usage`, or zeros when pricing is unknown.
    pub fn compute(usage: TokenUsage, pricing: Option<ModelPricing>) -> Self {
        match pricing {
            Some(pricing) => {
                let (input, output, total) =
                    pricing.cost(usage.input_tokens, usage.output_tokens);
                Self {
                    input,
                    output,
                    total,
                }
            }
            None => Self::default(),
        }
    }
}

/// Complete record of one run. One per run index; immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    /// Zero-based run index within the aggregation.
    pub index: usize,
    /// Unique identifier for the run.
    pub run_id: String,
    /// Tool calls in call order.
    pub transcript: Vec<ToolCall>,
    /// Raw agent output the envelope was extracted from.
    pub raw_output: String,
    /// Validated envelope, if extraction succeeded.
    pub envelope: Option<Envelope>,
    /// Extraction/validation failure, kept with the raw text for debugging.
    pub parse_error: Option<String>,
    /// Run-level failure (budget exceeded, fixture crash, agent error).
    pub error: Option<String>,
    /// The harness's judgment for this run.
    pub grade: GradeResult,
    /// Token counters for this run.
    pub usage: TokenUsage,
    /// Cost derived from the counters.
    pub cost: CostBreakdown,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// When the run completed.
    pub completed_at: DateTime<Utc>,
}

impl RunRecord {
    /// Creates a zero-reward record for a run that failed before grading.
    pub fn failed(index: usize, run_id: impl Into<String>, error: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            index,
            run_id: run_id.into(),
            transcript: Vec::new(),
            raw_output: String::new(),
            envelope: None,
            parse_error: None,
            error: Some(error.into()),
            grade: GradeResult::new(false, 0.0, BTreeMap::new()),
            usage: TokenUsage::default(),
            cost: CostBreakdown::default(),
            started_at: now,
            completed_at: now,
        }
    }
}

/// Statistics over N runs of one task. Derived from the records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregateReport {
    /// Task the runs belong to.
    pub task: String,
    /// All recorded runs, in index order.
    pub runs: Vec<RunRecord>,
    /// Count of runs whose grade passed.
    pub pass_count: usize,
    /// Number of recorded runs.
    pub run_count: usize,
    /// `pass_count / run_count` (0 when empty).
    pub pass_rate: f64,
    /// Mean reward over all recorded runs (0 when empty).
    pub avg_reward: f64,
    /// Summed token counters.
    pub total_usage: TokenUsage,
    /// Summed costs.
    pub total_cost: CostBreakdown,
}

impl AggregateReport {
    /// Recomputes every field from `records`. The only constructor.
    pub fn from_records(task: impl Into<String>, records: Vec<RunRecord>) -> Self {
        let run_count = records.len();
        let pass_count = records.iter().filter(|r| r.grade.passed).count();
        let pass_rate = if run_count > 0 {
            pass_count as f64 / run_count as f64
        } else {
            0.0
        };
        let avg_reward = if run_count > 0 {
            records.iter().map(|r| r.grade.reward).sum::<f64>() / run_count as f64
        } else {
            0.0
        };
        let total_usage = TokenUsage {
            input_tokens: records.iter().map(|r| r.usage.input_tokens).sum(),
            output_tokens: records.iter().map(|r| r.usage.output_tokens).sum(),
        };
        let total_cost = CostBreakdown {
            input: records.iter().map(|r| r.cost.input).sum(),
            output: records.iter().map(|r| r.cost.output).sum(),
            total: records.iter().map(|r| r.cost.total).sum(),
        };

        Self {
            task: task.into(),
            runs: records,
            pass_count,
            run_count,
            pass_rate,
            avg_reward,
            total_usage,
            total_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_with(index: usize, passed: bool, reward: f64) -> RunRecord {
        let mut record = RunRecord::failed(index, format!("run-{index}"), "seed");
        record.error = None;
        record.grade = GradeResult::new(passed, reward, BTreeMap::new());
        record.usage = TokenUsage::new(100, 50);
        record
    }

    #[test]
    fn test_token_usage_total() {
        assert_eq!(TokenUsage::new(1000, 500).total(), 1500);
    }

    #[test]
    fn test_cost_without_pricing_is_zero() {
        let cost = CostBreakdown::compute(TokenUsage::new(1000, 1000), None);
        assert_eq!(cost, CostBreakdown::default());
    }

    #[test]
    fn test_cost_with_pricing() {
        let pricing = ModelPricing {
            input: 1.0,
            output: 2.0,
        };
        let cost = CostBreakdown::compute(TokenUsage::new(1_000_000, 1_000_000), Some(pricing));
        assert!((cost.input - 1.0).abs() < 1e-9);
        assert!((cost.output - 2.0).abs() < 1e-9);
        assert!((cost.total - 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_report_recomputed_from_records() {
        let records = vec![
            record_with(0, true, 1.0),
            record_with(1, false, 0.5),
            record_with(2, false, 0.0),
        ];
        let report = AggregateReport::from_records("demo", records);
        assert_eq!(report.run_count, 3);
        assert_eq!(report.pass_count, 1);
        assert!((report.pass_rate - 1.0 / 3.0).abs() < 1e-12);
        assert!((report.avg_reward - 0.5).abs() < 1e-12);
        assert_eq!(report.total_usage.input_tokens, 300);
    }

    #[test]
    fn test_report_empty() {
        let report = AggregateReport::from_records("demo", Vec::new());
        assert_eq!(report.run_count, 0);
        assert_eq!(report.pass_rate, 0.0);
        assert_eq!(report.avg_reward, 0.0);
    }

    #[test]
    fn test_pass_count_matches_records_invariant() {
        let records = vec![record_with(0, true, 1.0), record_with(1, true, 1.0)];
        let report = AggregateReport::from_records("demo", records);
        let recounted = report.runs.iter().filter(|r| r.grade.passed).count();
        assert_eq!(report.pass_count, recounted);
    }
}
