//! Ordered-comparison grading for aggregation/analytics tasks.
//!
//! Ground truth is computed independently from the same source data by the
//! fixture builder. The submitted sequence is compared position by position:
//! reward is the fraction of positions where both the key and the numeric
//! value (under a small absolute tolerance) are correct, and passing
//! requires every position to match. Precision/recall over the key→value
//! pairs land in the signals for shaped-reward reporting.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;

use super::{f1_score, GradeResult, Grader};
use crate::envelope::Envelope;

/// Absolute tolerance for numeric comparison; absorbs rounding.
const NUMERIC_TOLERANCE: f64 = 0.01;

/// Field names of one result row, e.g. `("category", "revenue")`.
#[derive(Debug, Clone, Copy)]
pub struct ResultFields {
    /// String key field.
    pub key: &'static str,
    /// Numeric value field.
    pub value: &'static str,
}

impl ResultFields {
    /// Fields for revenue-by-category answers.
    pub const CATEGORY_REVENUE: Self = Self {
        key: "category",
        value: "revenue",
    };

    /// Fields for request-count-by-ip answers.
    pub const IP_COUNT: Self = Self {
        key: "ip",
        value: "count",
    };
}

/// Grader for tasks answering with `{"results": [{key, value}, ...]}`.
#[derive(Debug, Clone)]
pub struct AnalyticsGrader {
    fields: ResultFields,
    expected: Vec<(String, f64)>,
}

impl AnalyticsGrader {
    /// Creates a grader for an expected ordered sequence.
    pub fn new(fields: ResultFields, expected: Vec<(String, f64)>) -> Self {
        Self { fields, expected }
    }

    fn submitted_rows(&self, answer: &Value) -> Vec<(String, f64)> {
        answer
            .get("results")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|row| {
                        let key = row.get(self.fields.key)?.as_str()?.to_string();
                        let value = row.get(self.fields.value)?.as_f64()?;
                        Some((key, value))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn close(expected: f64, actual: f64) -> bool {
    (expected - actual).abs() <= NUMERIC_TOLERANCE
}

#[async_trait]
impl Grader for AnalyticsGrader {
    async fn grade(&self, envelope: &Envelope, _sandbox_root: &Path) -> GradeResult {
        let submitted = self.submitted_rows(&envelope.answer);

        // Positional credit: key and value both right, in the right slot.
        let positions_correct = self
            .expected
            .iter()
            .zip(submitted.iter())
            .filter(|((want_key, want_value), (got_key, got_value))| {
                want_key == got_key && close(*want_value, *got_value)
            })
            .count();
        let reward = if self.expected.is_empty() {
            if submitted.is_empty() {
                1.0
            } else {
                0.0
            }
        } else {
            positions_correct as f64 / self.expected.len() as f64
        };

        let passed = submitted.len() == self.expected.len()
            && positions_correct == self.expected.len();

        // Order-insensitive overlap for the shaped-reward diagnostics.
        let expected_map: BTreeMap<&str, f64> = self
            .expected
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        let true_positive = submitted
            .iter()
            .filter(|(key, value)| {
                expected_map
                    .get(key.as_str())
                    .is_some_and(|want| close(*want, *value))
            })
            .count();
        let (precision, recall, f1) =
            f1_score(true_positive, submitted.len(), self.expected.len());

        let mut signals = BTreeMap::new();
        signals.insert("precision".to_string(), precision);
        signals.insert("recall".to_string(), recall);
        signals.insert("f1".to_string(), f1);
        signals.insert("positions_correct".to_string(), positions_correct as f64);
        signals.insert("expected_count".to_string(), self.expected.len() as f64);

        GradeResult::new(passed, reward, signals)
    }
}
