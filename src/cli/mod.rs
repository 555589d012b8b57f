//! Command-line interface for taskbench.
//!
//! Thin surface over the library: list the registered tasks or drive an
//! aggregation and print the per-task summary table. The model-calling
//! agent loop is an external collaborator wired in through
//! [`crate::runner::AgentLoop`]; the built-in loop is a no-op stand-in that
//! exercises fixtures, sandboxing and grading end to end.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::{HarnessConfig, ModelPricing};
use crate::runner::{
    AgentLoop, AgentOutcome, AggregateReport, CancelFlag, RunAggregator, RunError, ToolSession,
};
use crate::tasks;

/// Sandboxed tool-execution and grading harness for agent evaluation.
#[derive(Debug, Parser)]
#[command(name = "taskbench", version, about)]
pub struct Cli {
    /// Log level when RUST_LOG is not set.
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run N repetitions of one task (or all tasks) and print a summary.
    Run {
        /// Task name; all registered tasks when omitted.
        #[arg(long)]
        task: Option<String>,

        /// Number of runs per task.
        #[arg(long, default_value_t = 10)]
        runs: usize,

        /// Concurrent runs (1 = sequential).
        #[arg(long, default_value_t = 1)]
        parallel: usize,

        /// Per-run wall-clock budget in seconds.
        #[arg(long, default_value_t = 300)]
        run_timeout: u64,

        /// Model name used only to look up pricing for cost totals.
        #[arg(long)]
        model: Option<String>,
    },

    /// List registered tasks with their tool surfaces.
    ListTasks,
}

/// Parses CLI arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Stand-in agent loop: issues no tool calls and submits no answer. Every
/// run records an envelope failure, which exercises the full pipeline
/// without a model backend.
struct NoopAgent;

#[async_trait]
impl AgentLoop for NoopAgent {
    async fn run(
        &self,
        _prompt: &str,
        _session: &mut ToolSession,
    ) -> Result<AgentOutcome, RunError> {
        Ok(AgentOutcome::default())
    }
}

/// Runs the parsed command.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::ListTasks => {
            for task in tasks::all_tasks() {
                println!("{:<20} tools: {}", task.name, task.tools.join(", "));
            }
            Ok(())
        }
        Commands::Run {
            task,
            runs,
            parallel,
            run_timeout,
            model,
        } => {
            let selected = match task {
                Some(name) => vec![tasks::get_task(&name)
                    .ok_or_else(|| anyhow::anyhow!("Unknown task: {name}"))?],
                None => tasks::all_tasks(),
            };

            let mut config = HarnessConfig::new()
                .with_parallelism(parallel)
                .with_run_timeout(Duration::from_secs(run_timeout));
            if let Some(model) = model.as_deref() {
                match ModelPricing::for_model(model) {
                    Some(pricing) => config = config.with_pricing(pricing),
                    None => warn!(model, "No pricing known; costs will be zero"),
                }
            }

            let cancel = CancelFlag::default();
            install_interrupt_handler(&cancel);

            let aggregator = RunAggregator::new(config, Arc::new(NoopAgent));
            let mut reports = Vec::new();
            for task in &selected {
                info!(task = task.name, runs, "Evaluating");
                reports.push(aggregator.run_n_with_cancel(task, runs, &cancel).await);
            }

            print_summary(&reports);
            Ok(())
        }
    }
}

fn install_interrupt_handler(cancel: &CancelFlag) {
    let cancel = Arc::clone(cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; finishing in-flight runs and flushing partial results");
            cancel.store(true, Ordering::SeqCst);
        }
    });
}

/// Renders the aggregate table the way the reporting layer consumes it:
/// pass counts, pass rate, average reward and resource totals per task.
fn print_summary(reports: &[AggregateReport]) {
    println!(
        "{:<20} {:>7} {:>7} {:>10} {:>11} {:>10} {:>11} {:>11}",
        "Task", "Passed", "Failed", "Pass Rate", "Avg Reward", "Tokens In", "Tokens Out", "Cost ($)"
    );
    let mut tokens_in = 0;
    let mut tokens_out = 0;
    let mut cost_total = 0.0;
    for report in reports {
        println!(
            "{:<20} {:>7} {:>7} {:>9.1}% {:>11.2} {:>10} {:>11} {:>11.4}",
            report.task,
            report.pass_count,
            report.run_count - report.pass_count,
            report.pass_rate * 100.0,
            report.avg_reward,
            report.total_usage.input_tokens,
            report.total_usage.output_tokens,
            report.total_cost.total,
        );
        tokens_in += report.total_usage.input_tokens;
        tokens_out += report.total_usage.output_tokens;
        cost_total += report.total_cost.total;
    }
    println!("Total tokens: in={tokens_in} out={tokens_out}");
    println!("Total cost: ${cost_total:.4}");
}
