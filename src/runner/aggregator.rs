//! The multi-run aggregator.
//!
//! `run_n` drives N independent runs of one task and folds the records into
//! an [`AggregateReport`]. Partial failure is isolated per run: a timeout,
//! an errored fixture build or an unparsable envelope becomes a zero-reward
//! record and the loop keeps going. Every sandbox is torn down before the
//! next index proceeds, whatever happened. Cancellation flushes the records
//! completed so far into a partial report instead of discarding them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::record::{AggregateReport, CostBreakdown, RunRecord};
use super::session::ToolSession;
use super::AgentLoop;
use crate::config::HarnessConfig;
use crate::envelope;
use crate::grading::{GradeResult, Grader as _};
use crate::sandbox::SandboxInstance;
use crate::tasks::TaskSpec;
use crate::tools::{ToolContext, ToolRegistry};

/// Shared cancellation flag; setting it stops the aggregator at the next
/// run boundary while keeping all completed records.
pub type CancelFlag = Arc<AtomicBool>;

/// Drives N runs of a task through an external agent loop.
pub struct RunAggregator {
    config: HarnessConfig,
    agent: Arc<dyn AgentLoop>,
}

impl RunAggregator {
    /// Creates an aggregator for the given agent loop.
    pub fn new(config: HarnessConfig, agent: Arc<dyn AgentLoop>) -> Self {
        Self { config, agent }
    }

    /// Runs `n` independent repetitions of `task` and aggregates them.
    pub async fn run_n(&self, task: &TaskSpec, n: usize) -> AggregateReport {
        self.run_n_with_cancel(task, n, &CancelFlag::default()).await
    }

    /// Like [`Self::run_n`], stopping early at a run boundary once `cancel`
    /// is set. Completed records are always flushed into the report.
    pub async fn run_n_with_cancel(
        &self,
        task: &TaskSpec,
        n: usize,
        cancel: &CancelFlag,
    ) -> AggregateReport {
        info!(task = task.name, runs = n, "Starting aggregation");
        let mut records: Vec<RunRecord> = Vec::with_capacity(n);

        let chunk_size = self.config.parallelism.max(1);
        let mut next_index = 0;
        while next_index < n {
            if cancel.load(Ordering::SeqCst) {
                warn!(
                    task = task.name,
                    completed = records.len(),
                    "Aggregation cancelled; flushing partial report"
                );
                break;
            }

            let end = (next_index + chunk_size).min(n);
            let chunk = (next_index..end)
                .map(|index| self.run_one(task, index))
                .collect::<Vec<_>>();
            // Records land in index order regardless of completion order,
            // so concurrent execution aggregates bit-identically.
            records.extend(join_all(chunk).await);
            next_index = end;
        }

        AggregateReport::from_records(task.name, records)
    }

    /// Executes one run: fresh sandbox, agent episode, parse, grade,
    /// guaranteed teardown. Never fails; failures become failed records.
    async fn run_one(&self, task: &TaskSpec, index: usize) -> RunRecord {
        let run_id = format!("{}-{}-{}", task.name, index, Uuid::new_v4());
        let started_at = Utc::now();

        let mut sandbox = match SandboxInstance::create() {
            Ok(sandbox) => sandbox,
            Err(e) => {
                warn!(run = %run_id, error = %e, "Sandbox creation failed");
                return RunRecord::failed(index, run_id, e.to_string());
            }
        };

        // Fixture-builder crashes abort only this run.
        let instance = match task.build_instance(&sandbox, index as u64, &self.config) {
            Ok(instance) => instance,
            Err(e) => {
                warn!(run = %run_id, error = %e, "Fixture build failed");
                let _ = sandbox.teardown();
                return RunRecord::failed(index, run_id, format!("Fixture build failed: {e}"));
            }
        };

        let registry = ToolRegistry::with_tools(task.tools);
        let ctx = ToolContext::new(sandbox.root(), &self.config);
        let mut session = ToolSession::new(registry, ctx, &self.config);

        let episode = timeout(
            self.config.run_timeout,
            self.agent.run(&instance.prompt, &mut session),
        )
        .await;
        let transcript_len = session.steps_used();
        debug!(run = %run_id, steps = transcript_len, "Agent episode finished");

        let mut record = match episode {
            Err(_) => {
                // Overall budget exceeded: terminate the run, keep the
                // transcript, grade as zero.
                let mut record = RunRecord::failed(index, run_id.clone(), "Run budget exceeded");
                record.transcript = session.into_transcript();
                record
            }
            Ok(Err(e)) => {
                let mut record = RunRecord::failed(index, run_id.clone(), e.to_string());
                record.transcript = session.into_transcript();
                record
            }
            Ok(Ok(outcome)) => {
                let mut record = RunRecord::failed(index, run_id.clone(), "");
                record.error = None;
                record.transcript = session.into_transcript();
                record.raw_output = outcome.raw_output.clone();
                record.usage = outcome.usage;
                record.cost = CostBreakdown::compute(outcome.usage, self.config.pricing);

                match envelope::extract(&outcome.raw_output, task.answer_schema) {
                    Ok(parsed) => {
                        record.grade = instance.grader.grade(&parsed, sandbox.root()).await;
                        record.envelope = Some(parsed);
                    }
                    Err(e) => {
                        record.parse_error = Some(e.to_string());
                        record.grade = GradeResult::failed("invalid_envelope");
                    }
                }
                record
            }
        };

        record.index = index;
        record.started_at = started_at;
        record.completed_at = Utc::now();

        if let Err(e) = sandbox.teardown() {
            warn!(run = %run_id, error = %e, "Sandbox teardown failed");
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::{AgentOutcome, RunError, TokenUsage};
    use crate::tasks;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Agent stub that inspects the sandbox with real tools, then replies
    /// with a fixed output template.
    struct ScriptedAgent {
        output: String,
        delay: Duration,
    }

    impl ScriptedAgent {
        fn new(output: impl Into<String>) -> Self {
            Self {
                output: output.into(),
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl AgentLoop for ScriptedAgent {
        async fn run(
            &self,
            _prompt: &str,
            session: &mut ToolSession,
        ) -> Result<AgentOutcome, RunError> {
            session
                .invoke("glob_find", serde_json::json!({"pattern": "*"}))
                .await;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(AgentOutcome {
                raw_output: self.output.clone(),
                usage: TokenUsage::new(100, 20),
            })
        }
    }

    struct FailingAgent;

    #[async_trait]
    impl AgentLoop for FailingAgent {
        async fn run(
            &self,
            _prompt: &str,
            _session: &mut ToolSession,
        ) -> Result<AgentOutcome, RunError> {
            Err(RunError::Agent("model API unreachable".to_string()))
        }
    }

    fn config() -> HarnessConfig {
        HarnessConfig::new().with_run_timeout(Duration::from_secs(10))
    }

    #[tokio::test]
    async fn test_run_count_matches_even_when_runs_fail() {
        let task = tasks::get_task("fs_find_env").unwrap();
        let aggregator = RunAggregator::new(config(), Arc::new(FailingAgent));
        let report = aggregator.run_n(&task, 3).await;
        assert_eq!(report.run_count, 3);
        assert_eq!(report.pass_count, 0);
        assert!(report.runs.iter().all(|r| r.error.is_some()));
        assert!(report.runs.iter().all(|r| !r.grade.passed));
    }

    #[tokio::test]
    async fn test_unparsable_envelope_is_recorded_not_fatal() {
        let task = tasks::get_task("fs_find_env").unwrap();
        let agent = ScriptedAgent::new("no json to see here");
        let aggregator = RunAggregator::new(config(), Arc::new(agent));
        let report = aggregator.run_n(&task, 2).await;
        assert_eq!(report.run_count, 2);
        for record in &report.runs {
            assert!(record.parse_error.is_some());
            assert_eq!(record.grade.reward, 0.0);
            assert!(!record.transcript.is_empty());
        }
    }

    #[tokio::test]
    async fn test_run_budget_enforced_with_cleanup() {
        let task = tasks::get_task("fs_find_env").unwrap();
        let agent = ScriptedAgent {
            output: String::new(),
            delay: Duration::from_secs(5),
        };
        let config = HarnessConfig::new().with_run_timeout(Duration::from_millis(100));
        let aggregator = RunAggregator::new(config, Arc::new(agent));
        let report = aggregator.run_n(&task, 1).await;
        assert_eq!(report.run_count, 1);
        let record = &report.runs[0];
        assert_eq!(record.error.as_deref(), Some("Run budget exceeded"));
        assert!(!record.grade.passed);
        // The transcript survives the forced termination.
        assert!(!record.transcript.is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_flushes_partial_report() {
        let task = tasks::get_task("fs_find_env").unwrap();
        let aggregator = RunAggregator::new(config(), Arc::new(FailingAgent));
        let cancel: CancelFlag = Arc::default();
        cancel.store(true, Ordering::SeqCst);
        let report = aggregator.run_n_with_cancel(&task, 10, &cancel).await;
        assert_eq!(report.run_count, 0);
    }

    #[tokio::test]
    async fn test_sequential_and_concurrent_agree() {
        let task = tasks::get_task("fs_find_env").unwrap();
        let output = r#"{"passed": true, "checks": {}, "answer": {"paths": []}, "notes": ""}"#;

        let sequential = RunAggregator::new(
            config().with_parallelism(1),
            Arc::new(ScriptedAgent::new(output)),
        );
        let concurrent = RunAggregator::new(
            config().with_parallelism(4),
            Arc::new(ScriptedAgent::new(output)),
        );

        let a = sequential.run_n(&task, 4).await;
        let b = concurrent.run_n(&task, 4).await;
        assert_eq!(a.pass_count, b.pass_count);
        assert_eq!(a.avg_reward, b.avg_reward);
        assert_eq!(a.total_usage, b.total_usage);
        let rewards_a: Vec<f64> = a.runs.iter().map(|r| r.grade.reward).collect();
        let rewards_b: Vec<f64> = b.runs.iter().map(|r| r.grade.reward).collect();
        assert_eq!(rewards_a, rewards_b);
    }

    #[tokio::test]
    async fn test_indices_are_in_order() {
        let task = tasks::get_task("fs_find_env").unwrap();
        let aggregator = RunAggregator::new(
            config().with_parallelism(3),
            Arc::new(FailingAgent),
        );
        let report = aggregator.run_n(&task, 7).await;
        let indices: Vec<usize> = report.runs.iter().map(|r| r.index).collect();
        assert_eq!(indices, (0..7).collect::<Vec<_>>());
    }
}
