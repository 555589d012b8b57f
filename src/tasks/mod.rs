//! Task registry and fixture builders.
//!
//! A [`TaskSpec`] bundles everything the aggregator needs to run one task:
//! the prompt template, the tool surface, the declared answer schema and a
//! fixture builder that seeds a sandbox and returns the matching grader.
//! Variants are picked deterministically from the run index, so a given
//! index always produces the same fixture and ground truth.

pub mod fs_find_env;
pub mod logs_top5xx;
pub mod sql_q2_revenue;
pub mod swe;

use std::sync::Arc;

use rand::{RngExt, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::config::HarnessConfig;
use crate::envelope::AnswerSchema;
use crate::grading::Grader;
use crate::sandbox::{SandboxError, SandboxInstance};

/// Builder callback: seeds the sandbox, returns the grader and variant id.
type BuilderFn =
    fn(&SandboxInstance, u64, &HarnessConfig) -> Result<(Arc<dyn Grader>, u32), SandboxError>;

/// Everything needed to run and grade one task.
#[derive(Clone)]
pub struct TaskSpec {
    /// Stable task name.
    pub name: &'static str,
    /// Tools exposed to the agent for this task.
    pub tools: &'static [&'static str],
    /// Shape the envelope's `answer` must validate against.
    pub answer_schema: AnswerSchema,
    prompt_template: &'static str,
    builder: BuilderFn,
}

/// A seeded fixture: rendered prompt plus the grader holding ground truth.
pub struct TaskInstance {
    /// Prompt with the sandbox layout substituted in.
    pub prompt: String,
    /// Grader for this instance.
    pub grader: Arc<dyn Grader>,
    /// Which fixture variant was seeded.
    pub variant: u32,
}

impl TaskSpec {
    /// Seeds `sandbox` for run `seed` and renders the prompt.
    pub fn build_instance(
        &self,
        sandbox: &SandboxInstance,
        seed: u64,
        config: &HarnessConfig,
    ) -> Result<TaskInstance, SandboxError> {
        let (grader, variant) = (self.builder)(sandbox, seed, config)?;
        let layout = sandbox.render_layout();
        let prompt = self.prompt_template.replace("{layout_hint}", &layout);
        Ok(TaskInstance {
            prompt,
            grader,
            variant,
        })
    }
}

/// Deterministic variant pick for a run seed: always in `1..=variants`.
pub(crate) fn pick_variant(seed: u64, variants: u32) -> u32 {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.random_range(1..=variants)
}

/// All registered tasks, in presentation order.
pub fn all_tasks() -> Vec<TaskSpec> {
    vec![
        TaskSpec {
            name: "fs_find_env",
            tools: &["glob_find", "grep_search", "file_read"],
            answer_schema: AnswerSchema::Paths,
            prompt_template: fs_find_env::PROMPT,
            builder: fs_find_env::build,
        },
        TaskSpec {
            name: "swe_slugify_fix",
            tools: &["file_read", "run_pytests"],
            answer_schema: AnswerSchema::Patch,
            prompt_template: swe::SLUGIFY_PROMPT,
            builder: swe::build_slugify,
        },
        TaskSpec {
            name: "swe_dict_merge_fix",
            tools: &["file_read", "file_write", "run_pytests"],
            answer_schema: AnswerSchema::Patch,
            prompt_template: swe::DICT_MERGE_PROMPT,
            builder: swe::build_dict_merge,
        },
        TaskSpec {
            name: "logs_top5xx",
            tools: &["file_read", "grep_search", "python_expression"],
            answer_schema: AnswerSchema::IpCount,
            prompt_template: logs_top5xx::PROMPT,
            builder: logs_top5xx::build,
        },
        TaskSpec {
            name: "sql_q2_revenue",
            tools: &["sql_query", "file_read", "python_expression"],
            answer_schema: AnswerSchema::CategoryRevenue,
            prompt_template: sql_q2_revenue::PROMPT,
            builder: sql_q2_revenue::build,
        },
    ]
}

/// Looks up a task by name.
pub fn get_task(name: &str) -> Option<TaskSpec> {
    all_tasks().into_iter().find(|task| task.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_contains_all_tasks() {
        let names: Vec<&str> = all_tasks().iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "fs_find_env",
                "swe_slugify_fix",
                "swe_dict_merge_fix",
                "logs_top5xx",
                "sql_q2_revenue"
            ]
        );
    }

    #[test]
    fn test_get_task() {
        assert!(get_task("fs_find_env").is_some());
        assert!(get_task("unknown_task").is_none());
    }

    #[test]
    fn test_pick_variant_deterministic() {
        for seed in 0..32 {
            assert_eq!(pick_variant(seed, 3), pick_variant(seed, 3));
        }
    }

    #[test]
    fn test_pick_variant_in_range() {
        for seed in 0..64 {
            let variant = pick_variant(seed, 3);
            assert!((1..=3).contains(&variant));
        }
    }

    #[test]
    fn test_build_instance_renders_layout() {
        let mut sandbox = SandboxInstance::create().unwrap();
        let task = get_task("fs_find_env").unwrap();
        let instance = task
            .build_instance(&sandbox, 0, &HarnessConfig::new())
            .unwrap();
        assert!(instance.prompt.contains("- README.txt"));
        assert!(!instance.prompt.contains("{layout_hint}"));
        sandbox.teardown().unwrap();
    }
}
