//! Filesystem discovery task: find the live `.env` files.
//!
//! The sandbox is seeded with a spread of environment files; only the ones
//! holding an active (uncommented) `SECRET=` entry outside test and notes
//! directories count. Graded as a sorted path set with F1 partial credit.

use std::sync::Arc;

use crate::config::HarnessConfig;
use crate::grading::{Grader, PathSetGrader};
use crate::sandbox::{SandboxError, SandboxInstance};

use super::pick_variant;

pub(crate) const PROMPT: &str = "\
You are inspecting a project snapshot for leaked configuration.

Find every environment file that currently holds an active SECRET entry.
Template, sample and backup-comment files do not count, and anything under
tests/ is fixture data to ignore.

Sandbox layout:
{layout_hint}

Submit a JSON envelope:
{\"passed\": bool, \"checks\": {}, \"answer\": {\"paths\": [sorted relative paths]}, \"notes\": \"\"}
";

/// Seeds one variant and returns the matching path-set grader.
pub(crate) fn build(
    sandbox: &SandboxInstance,
    seed: u64,
    _config: &HarnessConfig,
) -> Result<(Arc<dyn Grader>, u32), SandboxError> {
    let variant = pick_variant(seed, 3);

    // Common noise files present in every variant.
    sandbox.write_file("README.txt", "Sample project snapshot\n")?;
    sandbox.write_file("tests/.env.fixture", "SECRET=should_be_skipped\n")?;
    sandbox.write_file("tests/unit/.env.dev", "SECRET=not_counted\n")?;
    sandbox.write_file("notes/.env.template", "# SECRET=placeholder\n")?;
    sandbox.write_file("notes/.env.backup", "# SECRET=archived\n")?;

    let mut expected: Vec<String> = Vec::new();
    match variant {
        1 => {
            sandbox.write_file(".env", "# baseline env\nSECRET=root_key\n")?;
            sandbox.write_file("config/.env.production", "SECRET=prod_key\n")?;
            sandbox.write_file("config/.env.sample", "# SECRET=placeholder\n")?;
            expected.push(".env".to_string());
            expected.push("config/.env.production".to_string());
        }
        2 => {
            sandbox.write_file("services/payment/.env", "SECRET=pay_key\n")?;
            sandbox.write_file("services/payment/.env.backup", "SECRET=old_key\n")?;
            sandbox.write_file("services/payment/.env.example", "# SECRET=placeholder\n")?;
            expected.push("services/payment/.env".to_string());
            expected.push("services/payment/.env.backup".to_string());
        }
        _ => {
            sandbox.write_file("deploy/.env.staging", "# comment\nSECRET=stage_value\n")?;
            sandbox.write_file("deploy/.env.local", "SECRET=local_value\n")?;
            sandbox.write_file("deploy/.env.sample", "# SECRET=dummy\n")?;
            sandbox.write_file(
                "deploy/readme.txt",
                "Documenting staging secrets stay commented\n",
            )?;
            expected.push("deploy/.env.local".to_string());
            expected.push("deploy/.env.staging".to_string());
        }
    }
    expected.sort();

    Ok((Arc::new(PathSetGrader::new(expected)), variant))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::Envelope;
    use crate::grading::Grader as _;
    use std::collections::BTreeMap;

    fn build_variant(seed: u64) -> (SandboxInstance, Arc<dyn Grader>, u32) {
        let sandbox = SandboxInstance::create().unwrap();
        let (grader, variant) = build(&sandbox, seed, &HarnessConfig::new()).unwrap();
        (sandbox, grader, variant)
    }

    #[test]
    fn test_noise_files_always_present() {
        let (mut sandbox, _grader, _variant) = build_variant(0);
        assert!(sandbox.root().join("tests/.env.fixture").exists());
        assert!(sandbox.root().join("notes/.env.template").exists());
        sandbox.teardown().unwrap();
    }

    #[test]
    fn test_same_seed_same_variant() {
        let (mut a, _, variant_a) = build_variant(7);
        let (mut b, _, variant_b) = build_variant(7);
        assert_eq!(variant_a, variant_b);
        a.teardown().unwrap();
        b.teardown().unwrap();
    }

    #[tokio::test]
    async fn test_grading_rejects_fixture_paths() {
        // Whatever the variant, tests/.env.fixture is never expected.
        let (mut sandbox, grader, _variant) = build_variant(3);
        let envelope = Envelope {
            passed: true,
            checks: BTreeMap::new(),
            answer: serde_json::json!({"paths": ["tests/.env.fixture"]}),
            notes: String::new(),
        };
        let result = grader.grade(&envelope, sandbox.root()).await;
        assert!(!result.passed);
        assert_eq!(result.signals["precision"], 0.0);
        sandbox.teardown().unwrap();
    }
}
