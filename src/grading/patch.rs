//! Patch/code-fix grading.
//!
//! The submitted unified diff is applied to a fresh copy of the fixture —
//! never to the sandbox the agent worked in — and the fixture's test suite
//! is rerun there. Reward is the fraction of tests passing; a full pass
//! additionally requires the patch to have applied cleanly. Application is
//! context-fuzzy: hunks are located by their context at the declared line
//! first, then anywhere in the file, with a whitespace-insensitive fallback.
//! Any conflict rejects the patch with zero reward; nothing here can crash
//! the harness.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tempfile::TempDir;
use tracing::debug;
use walkdir::WalkDir;

use super::{GradeResult, Grader};
use crate::envelope::Envelope;
use crate::sandbox;
use crate::sandbox::instance::copy_dir_recursive;
use crate::tools::pytest::run_test_command;

/// A parsed unified diff: one entry per target file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePatch {
    /// Target path with `a/`/`b/` prefixes stripped.
    pub path: String,
    /// Hunks in file order.
    pub hunks: Vec<Hunk>,
}

/// One `@@`-delimited hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hunk {
    /// 1-indexed start line in the original file, from the `-` range.
    pub old_start: usize,
    /// Context, removal and addition lines in order.
    pub lines: Vec<HunkLine>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HunkLine {
    Context(String),
    Remove(String),
    Add(String),
}

/// Why a patch could not be applied.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PatchError {
    #[error("Patch contains no hunks")]
    Empty,

    #[error("Malformed hunk header: {0}")]
    BadHeader(String),

    #[error("Patch target '{0}' not found in fixture")]
    TargetMissing(String),

    #[error("Patch target '{0}' is ambiguous")]
    TargetAmbiguous(String),

    #[error("Hunk does not apply to '{path}': no matching context")]
    Conflict { path: String },

    #[error("IO failure while applying patch: {0}")]
    Io(String),
}

/// Parses unified-diff text into per-file patches.
///
/// Tolerates `diff --git` and `index` noise lines and git's `a/`/`b/` path
/// prefixes; `\ No newline at end of file` markers are ignored.
pub fn parse_patch(text: &str) -> Result<Vec<FilePatch>, PatchError> {
    let mut patches: Vec<FilePatch> = Vec::new();
    let mut current_path: Option<String> = None;

    for line in text.lines() {
        if let Some(rest) = line.strip_prefix("--- ") {
            // Prefer the +++ side; remember the - side as a fallback.
            current_path = Some(clean_header_path(rest));
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            let path = clean_header_path(rest);
            if path != "/dev/null" {
                current_path = Some(path);
            }
            patches.push(FilePatch {
                path: current_path.clone().unwrap_or_default(),
                hunks: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("@@") {
            let old_start = parse_hunk_header(rest)
                .ok_or_else(|| PatchError::BadHeader(line.to_string()))?;
            let target = match patches.last_mut() {
                Some(patch) => patch,
                None => {
                    // Header-less diff; fall back to the --- path if any.
                    patches.push(FilePatch {
                        path: current_path.clone().unwrap_or_default(),
                        hunks: Vec::new(),
                    });
                    patches.last_mut().expect("just pushed")
                }
            };
            target.hunks.push(Hunk {
                old_start,
                lines: Vec::new(),
            });
        } else if let Some(hunk) = patches.last_mut().and_then(|p| p.hunks.last_mut()) {
            if let Some(rest) = line.strip_prefix('+') {
                hunk.lines.push(HunkLine::Add(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('-') {
                hunk.lines.push(HunkLine::Remove(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix(' ') {
                hunk.lines.push(HunkLine::Context(rest.to_string()));
            } else if line.is_empty() {
                hunk.lines.push(HunkLine::Context(String::new()));
            }
            // `\ No newline...` and stray noise fall through untracked.
        }
    }

    patches.retain(|p| !p.hunks.is_empty());
    if patches.is_empty() {
        return Err(PatchError::Empty);
    }
    Ok(patches)
}

fn clean_header_path(raw: &str) -> String {
    // Strip a trailing timestamp ("\t2023-06-01 ...") and git prefixes.
    let path = raw.split('\t').next().unwrap_or(raw).trim();
    let path = path.strip_prefix("a/").or_else(|| path.strip_prefix("b/")).unwrap_or(path);
    path.to_string()
}

/// Parses the `-l[,n] +l[,n]` portion of a hunk header, returning the old
/// start line.
fn parse_hunk_header(rest: &str) -> Option<usize> {
    let rest = rest.trim_start();
    let old = rest.strip_prefix('-')?;
    let end = old.find(|c: char| !c.is_ascii_digit())?;
    old[..end].parse().ok()
}

/// Locates the file a patch path refers to inside `root`.
///
/// Exact relative paths win; otherwise a unique suffix match is accepted so
/// diffs written against `slugify.py` land on `project/slugify/slugify.py`.
fn resolve_target(root: &Path, path: &str) -> Result<PathBuf, PatchError> {
    let direct = sandbox::resolve(root, path)
        .map_err(|e| PatchError::Io(e.to_string()))?;
    if direct.is_file() {
        return Ok(direct);
    }

    let needle: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if needle.is_empty() {
        return Err(PatchError::TargetMissing(path.to_string()));
    }
    let mut candidates: Vec<PathBuf> = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| {
            let components: Vec<String> = e
                .path()
                .strip_prefix(root)
                .map(|p| {
                    p.components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            components.len() >= needle.len()
                && components[components.len() - needle.len()..]
                    .iter()
                    .zip(&needle)
                    .all(|(a, b)| a == b)
        })
        .map(|e| e.into_path())
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(PatchError::TargetMissing(path.to_string())),
        1 => Ok(candidates.remove(0)),
        _ => Err(PatchError::TargetAmbiguous(path.to_string())),
    }
}

/// Applies parsed patches under `root`, rejecting on any conflict.
pub fn apply_patch(root: &Path, patches: &[FilePatch]) -> Result<(), PatchError> {
    for patch in patches {
        let target = resolve_target(root, &patch.path)?;
        let original = fs::read_to_string(&target).map_err(|e| PatchError::Io(e.to_string()))?;
        let had_trailing_newline = original.ends_with('\n');
        let mut lines: Vec<String> = original.lines().map(str::to_string).collect();

        let mut offset: isize = 0;
        for hunk in &patch.hunks {
            offset = apply_hunk(&mut lines, hunk, offset, &patch.path)?;
        }

        let mut updated = lines.join("\n");
        if had_trailing_newline {
            updated.push('\n');
        }
        fs::write(&target, updated).map_err(|e| PatchError::Io(e.to_string()))?;
    }
    Ok(())
}

/// Applies one hunk, returning the updated line offset for later hunks.
fn apply_hunk(
    lines: &mut Vec<String>,
    hunk: &Hunk,
    offset: isize,
    path: &str,
) -> Result<isize, PatchError> {
    let old_block: Vec<&str> = hunk
        .lines
        .iter()
        .filter_map(|l| match l {
            HunkLine::Context(s) | HunkLine::Remove(s) => Some(s.as_str()),
            HunkLine::Add(_) => None,
        })
        .collect();
    let new_block: Vec<String> = hunk
        .lines
        .iter()
        .filter_map(|l| match l {
            HunkLine::Context(s) | HunkLine::Add(s) => Some(s.clone()),
            HunkLine::Remove(_) => None,
        })
        .collect();

    let declared = hunk.old_start.saturating_sub(1) as isize + offset;
    let declared = declared.max(0) as usize;

    let position = find_block(lines, &old_block, declared, false)
        .or_else(|| find_block(lines, &old_block, declared, true))
        .ok_or_else(|| PatchError::Conflict {
            path: path.to_string(),
        })?;

    lines.splice(position..position + old_block.len(), new_block.iter().cloned());
    Ok(offset + new_block.len() as isize - old_block.len() as isize)
}

/// Finds where `block` occurs in `lines`, preferring positions closest to
/// `near`. `fuzzy` compares with surrounding whitespace trimmed.
fn find_block(lines: &[String], block: &[&str], near: usize, fuzzy: bool) -> Option<usize> {
    if block.is_empty() {
        // Pure-insertion hunk; trust the declared position, clamped.
        return Some(near.min(lines.len()));
    }
    if lines.len() < block.len() {
        return None;
    }

    let matches_at = |pos: usize| {
        lines[pos..pos + block.len()].iter().zip(block).all(|(a, b)| {
            if fuzzy {
                a.trim() == b.trim()
            } else {
                a == b
            }
        })
    };

    let last = lines.len() - block.len();
    let mut best: Option<usize> = None;
    for pos in 0..=last {
        if matches_at(pos) {
            let better = match best {
                None => true,
                Some(found) => pos.abs_diff(near) < found.abs_diff(near),
            };
            if better {
                best = Some(pos);
            }
        }
    }
    best
}

/// Grader for tasks answering with `{"patch": "..."}`.
pub struct PatchGrader {
    /// Directory inside the sandbox holding the test project.
    project_dir: String,
    /// Test command rerun after application (argv form).
    test_command: Vec<String>,
    /// Expected total used when the summary line is missing.
    fallback_total: u32,
    /// Bound on the rerun subprocess.
    timeout: Duration,
    /// Byte budget for captured test output.
    output_budget: usize,
}

impl PatchGrader {
    /// Creates a grader rerunning `test_command` inside `project_dir`.
    pub fn new(
        project_dir: impl Into<String>,
        test_command: Vec<String>,
        fallback_total: u32,
    ) -> Self {
        Self {
            project_dir: project_dir.into(),
            test_command,
            fallback_total,
            timeout: Duration::from_secs(60),
            output_budget: 8192,
        }
    }

    /// Sets the rerun timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Grader for PatchGrader {
    async fn grade(&self, envelope: &Envelope, sandbox_root: &Path) -> GradeResult {
        let patch_text = match envelope.answer.get("patch").and_then(Value::as_str) {
            Some(text) if !text.trim().is_empty() => text,
            _ => return GradeResult::failed("empty_patch"),
        };

        let patches = match parse_patch(patch_text) {
            Ok(patches) => patches,
            Err(e) => {
                debug!(error = %e, "Patch failed to parse");
                return GradeResult::failed("patch_unparsable");
            }
        };

        // Fresh copy: grading never mutates the sandbox the agent saw.
        let scratch = match TempDir::with_prefix("taskbench-grade-") {
            Ok(dir) => dir,
            Err(_) => return GradeResult::failed("grading_io"),
        };
        if copy_dir_recursive(sandbox_root, scratch.path()).is_err() {
            return GradeResult::failed("grading_io");
        }

        if let Err(e) = apply_patch(scratch.path(), &patches) {
            debug!(error = %e, "Patch failed to apply");
            let mut result = GradeResult::failed("patch_conflict");
            result.signals.insert("applied".to_string(), 0.0);
            return result;
        }

        let project_root = scratch.path().join(&self.project_dir);
        let run = match run_test_command(
            &self.test_command,
            &project_root,
            self.timeout,
            self.output_budget,
        )
        .await
        {
            Ok(run) => run,
            Err(_) => return GradeResult::failed("test_rerun_failed"),
        };

        let mut total = run.tests_passed + run.tests_failed;
        if total == 0 {
            total = self.fallback_total;
        }
        let reward = if total > 0 {
            run.tests_passed as f64 / total as f64
        } else {
            0.0
        };
        let passed = run.exit_code == 0 && reward >= 1.0;

        let mut signals = BTreeMap::new();
        signals.insert("applied".to_string(), 1.0);
        signals.insert("tests_passed".to_string(), run.tests_passed as f64);
        signals.insert("tests_failed".to_string(), run.tests_failed as f64);
        signals.insert("tests_total".to_string(), total as f64);
        signals.insert("exit_code".to_string(), run.exit_code as f64);

        GradeResult::new(passed, reward, signals)
    }
}
