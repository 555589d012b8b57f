//! Polymorphic per-task grading.
//!
//! Each task family implements [`Grader`]: a closed set of variants behind
//! one capability interface. New tasks are added by adding a variant, never
//! by branching on task name inside shared logic. The envelope's own
//! `passed` field is advisory; graders always recompute `passed` and
//! `reward` from the answer and, where applicable, the sandbox's end state.
//! A grading mismatch is a normal outcome, not an error — graders never
//! fail, they return zero-reward results.

pub mod analytics;
pub mod patch;
pub mod set_match;

pub use analytics::{AnalyticsGrader, ResultFields};
pub use patch::PatchGrader;
pub use set_match::PathSetGrader;

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;

/// Outcome of grading one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradeResult {
    /// The harness's own judgment, independent of the envelope's claim.
    pub passed: bool,
    /// Shaped reward in `[0, 1]`.
    pub reward: f64,
    /// Intermediate diagnostics (precision, recall, test counts, ...).
    pub signals: BTreeMap<String, f64>,
}

impl GradeResult {
    /// Creates a result, clamping the reward into `[0, 1]`.
    pub fn new(passed: bool, reward: f64, signals: BTreeMap<String, f64>) -> Self {
        Self {
            passed,
            reward: reward.clamp(0.0, 1.0),
            signals,
        }
    }

    /// A zero-reward failure with a single diagnostic signal set to 1.
    pub fn failed(signal: &str) -> Self {
        let mut signals = BTreeMap::new();
        signals.insert(signal.to_string(), 1.0);
        Self {
            passed: false,
            reward: 0.0,
            signals,
        }
    }
}

/// Capability interface all task variants implement.
#[async_trait]
pub trait Grader: Send + Sync {
    /// Grades one envelope against this task's ground truth and the
    /// sandbox's end state. Must be deterministic: identical inputs yield
    /// bit-identical results.
    async fn grade(&self, envelope: &Envelope, sandbox_root: &Path) -> GradeResult;
}

/// Precision, recall and F1 over predicted vs. expected set sizes.
///
/// Mirrors the usual conventions: an empty prediction against a non-empty
/// expectation scores 0; two empty sets score a perfect 1.
pub(crate) fn f1_score(true_positive: usize, predicted: usize, expected: usize) -> (f64, f64, f64) {
    if predicted == 0 && expected == 0 {
        return (1.0, 1.0, 1.0);
    }
    let precision = if predicted > 0 {
        true_positive as f64 / predicted as f64
    } else {
        0.0
    };
    let recall = if expected > 0 {
        true_positive as f64 / expected as f64
    } else {
        0.0
    };
    let f1 = if precision + recall > 0.0 {
        2.0 * precision * recall / (precision + recall)
    } else {
        0.0
    };
    (precision, recall, f1)
}
