//! Final-answer envelope extraction and validation.
//!
//! The envelope is the only contract between agent and grader: a JSON object
//! `{passed, checks, answer, notes}` embedded somewhere in the agent's final
//! free-form output. Extraction is deterministic: a quote- and escape-aware
//! bracket-depth scan selects the FIRST syntactically balanced top-level
//! object, so braces inside string literals never affect depth and any later
//! JSON in trailing prose is ignored. The selected substring must parse and
//! validate against the task's declared answer schema.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// The agent's validated final answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// The agent's own claim of success. Advisory only; grading recomputes.
    pub passed: bool,
    /// Per-check diagnostics reported by the agent. May be empty.
    pub checks: BTreeMap<String, bool>,
    /// Task-specific payload consumed by the grader.
    pub answer: Value,
    /// Free-form message for humans. May be empty.
    pub notes: String,
}

/// Shape the `answer` payload must validate against, declared per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSchema {
    /// `{"paths": ["relative/path", ...]}`
    Paths,
    /// `{"patch": "unified diff text"}`
    Patch,
    /// `{"results": [{"category": "...", "revenue": 1.0}, ...]}`
    CategoryRevenue,
    /// `{"results": [{"ip": "...", "count": 1}, ...]}`
    IpCount,
}

/// Extraction or validation failure. Terminates only the current run's
/// grading; the raw text is kept on the run record for debugging.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedEnvelope {
    #[error("No balanced JSON object found in output")]
    NoObject,

    #[error("Candidate object is not valid JSON: {0}")]
    InvalidJson(String),

    #[error("Envelope field '{field}' {problem}")]
    BadField { field: String, problem: String },
}

impl MalformedEnvelope {
    fn missing(field: &str) -> Self {
        Self::BadField {
            field: field.to_string(),
            problem: "is missing".to_string(),
        }
    }

    fn wrong_type(field: &str, expected: &str) -> Self {
        Self::BadField {
            field: field.to_string(),
            problem: format!("must be {expected}"),
        }
    }
}

/// Extracts and validates an [`Envelope`] from raw agent output.
pub fn extract(raw_text: &str, schema: AnswerSchema) -> Result<Envelope, MalformedEnvelope> {
    let candidate = first_balanced_object(raw_text).ok_or(MalformedEnvelope::NoObject)?;
    let value: Value = serde_json::from_str(candidate)
        .map_err(|e| MalformedEnvelope::InvalidJson(e.to_string()))?;
    validate(&value, schema)
}

/// Returns the substring spanning the first balanced top-level JSON object.
///
/// The scan tracks string literals and backslash escapes, so `{` and `}`
/// inside strings do not affect depth. Nested objects belong to the first
/// top-level one; a second object later in the text is never considered.
pub fn first_balanced_object(text: &str) -> Option<&str> {
    let mut depth: usize = 0;
    let mut start: Option<usize> = None;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in text.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' if start.is_some() => in_string = !in_string,
            '{' if !in_string => {
                if start.is_none() {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if !in_string => {
                if depth > 0 {
                    depth -= 1;
                    if depth == 0 {
                        let begin = start?;
                        return Some(&text[begin..=i]);
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn validate(value: &Value, schema: AnswerSchema) -> Result<Envelope, MalformedEnvelope> {
    let object = value
        .as_object()
        .ok_or_else(|| MalformedEnvelope::wrong_type("envelope", "an object"))?;

    let passed = object
        .get("passed")
        .ok_or_else(|| MalformedEnvelope::missing("passed"))?
        .as_bool()
        .ok_or_else(|| MalformedEnvelope::wrong_type("passed", "a boolean"))?;

    let checks_value = object
        .get("checks")
        .ok_or_else(|| MalformedEnvelope::missing("checks"))?;
    let checks_map = checks_value
        .as_object()
        .ok_or_else(|| MalformedEnvelope::wrong_type("checks", "an object"))?;
    let mut checks = BTreeMap::new();
    for (key, entry) in checks_map {
        let flag = entry
            .as_bool()
            .ok_or_else(|| MalformedEnvelope::wrong_type(&format!("checks.{key}"), "a boolean"))?;
        checks.insert(key.clone(), flag);
    }

    // notes tolerates absence and null; agents routinely omit it.
    let notes = match object.get("notes") {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(_) => return Err(MalformedEnvelope::wrong_type("notes", "a string")),
    };

    let answer = object
        .get("answer")
        .ok_or_else(|| MalformedEnvelope::missing("answer"))?
        .clone();
    validate_answer(&answer, schema)?;

    Ok(Envelope {
        passed,
        checks,
        answer,
        notes,
    })
}

fn validate_answer(answer: &Value, schema: AnswerSchema) -> Result<(), MalformedEnvelope> {
    let object = answer
        .as_object()
        .ok_or_else(|| MalformedEnvelope::wrong_type("answer", "an object"))?;

    match schema {
        AnswerSchema::Paths => {
            let paths = object
                .get("paths")
                .ok_or_else(|| MalformedEnvelope::missing("answer.paths"))?
                .as_array()
                .ok_or_else(|| MalformedEnvelope::wrong_type("answer.paths", "an array"))?;
            for entry in paths {
                if !entry.is_string() {
                    return Err(MalformedEnvelope::wrong_type(
                        "answer.paths",
                        "an array of strings",
                    ));
                }
            }
        }
        AnswerSchema::Patch => {
            let patch = object
                .get("patch")
                .ok_or_else(|| MalformedEnvelope::missing("answer.patch"))?;
            if !patch.is_string() {
                return Err(MalformedEnvelope::wrong_type("answer.patch", "a string"));
            }
        }
        AnswerSchema::CategoryRevenue => {
            validate_results(object, "category", "revenue", NumberKind::Float)?;
        }
        AnswerSchema::IpCount => {
            validate_results(object, "ip", "count", NumberKind::Integer)?;
        }
    }
    Ok(())
}

enum NumberKind {
    Integer,
    Float,
}

fn validate_results(
    object: &serde_json::Map<String, Value>,
    key_field: &str,
    value_field: &str,
    kind: NumberKind,
) -> Result<(), MalformedEnvelope> {
    let results = object
        .get("results")
        .ok_or_else(|| MalformedEnvelope::missing("answer.results"))?
        .as_array()
        .ok_or_else(|| MalformedEnvelope::wrong_type("answer.results", "an array"))?;

    for entry in results {
        let item = entry.as_object().ok_or_else(|| {
            MalformedEnvelope::wrong_type("answer.results", "an array of objects")
        })?;
        let field = format!("answer.results.{key_field}");
        if !item.get(key_field).is_some_and(Value::is_string) {
            return Err(MalformedEnvelope::wrong_type(&field, "a string"));
        }
        let field = format!("answer.results.{value_field}");
        match kind {
            NumberKind::Integer => {
                if !item.get(value_field).is_some_and(Value::is_i64) {
                    return Err(MalformedEnvelope::wrong_type(&field, "an integer"));
                }
            }
            NumberKind::Float => {
                if !item.get(value_field).is_some_and(Value::is_number) {
                    return Err(MalformedEnvelope::wrong_type(&field, "a number"));
                }
            }
        }
    }
    Ok(())
}
