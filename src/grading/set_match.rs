//! Set/list comparison grading for path-finding tasks.
//!
//! Reward is the F1 score of the submitted path set against ground truth.
//! Passing requires exact equality with the sorted expected list: a correct
//! set submitted out of order still earns full set-overlap reward but does
//! not pass.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::{f1_score, GradeResult, Grader};
use crate::envelope::Envelope;

/// Grader for tasks answering with `{"paths": [...]}`.
#[derive(Debug, Clone)]
pub struct PathSetGrader {
    expected: Vec<String>,
}

impl PathSetGrader {
    /// Creates a grader for the given ground-truth paths (stored sorted).
    pub fn new(expected: impl IntoIterator<Item = impl Into<String>>) -> Self {
        let mut expected: Vec<String> = expected.into_iter().map(Into::into).collect();
        expected.sort();
        Self { expected }
    }

    fn submitted_paths(answer: &Value) -> Vec<String> {
        answer
            .get("paths")
            .and_then(Value::as_array)
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Grader for PathSetGrader {
    async fn grade(&self, envelope: &Envelope, _sandbox_root: &Path) -> GradeResult {
        let submitted = Self::submitted_paths(&envelope.answer);

        let expected_set: BTreeSet<&str> = self.expected.iter().map(String::as_str).collect();
        let submitted_set: BTreeSet<&str> = submitted.iter().map(String::as_str).collect();
        let true_positive = expected_set.intersection(&submitted_set).count();

        let (precision, recall, f1) =
            f1_score(true_positive, submitted_set.len(), expected_set.len());

        // Pass demands the exact sorted listing, not just the right set.
        let passed = submitted == self.expected;

        let mut signals = BTreeMap::new();
        signals.insert("precision".to_string(), precision);
        signals.insert("recall".to_string(), recall);
        signals.insert("f1".to_string(), f1);
        signals.insert("submitted_count".to_string(), submitted.len() as f64);
        signals.insert("expected_count".to_string(), self.expected.len() as f64);

        GradeResult::new(passed, f1, signals)
    }
}
