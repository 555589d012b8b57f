//! Lexical path confinement.
//!
//! [`resolve`] maps an agent-supplied path to an absolute path inside the
//! sandbox root, or rejects it before any disk I/O happens. Resolution is
//! purely lexical: the target does not need to exist. The only filesystem
//! access is a symlink check on the already-existing prefix of the resolved
//! path, so a link inside the sandbox cannot smuggle operations outside it.

use std::path::{Component, Path, PathBuf};

use thiserror::Error;

/// Placeholder spellings agents sometimes paste from the prompt; stripped
/// before resolution.
const ROOT_MARKERS: &[&str] = &["{TASKBENCH_SANDBOX}", "${TASKBENCH_SANDBOX}", "$TASKBENCH_SANDBOX"];

/// A path was rejected before touching the filesystem.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PathError {
    #[error("Path escapes sandbox: {0}")]
    EscapesSandbox(String),

    #[error("Absolute path outside sandbox: {0}")]
    OutsideRoot(String),

    #[error("Path contains invalid character")]
    InvalidCharacter,

    #[error("Symlink target escapes sandbox: {0}")]
    SymlinkEscape(String),
}

/// Resolves `raw` against `root`, confining the result to `root`.
///
/// Accepts the spellings agents produce in practice: backslash separators,
/// a literal sandbox-root prefix, `{TASKBENCH_SANDBOX}`-style placeholders,
/// and leading `/` or `./`. Rejects any path whose normalized form (after
/// processing `.` and `..` segments) leaves the root, and any path whose
/// existing prefix contains a symlink pointing outside the root.
pub fn resolve(root: &Path, raw: &str) -> Result<PathBuf, PathError> {
    let relative = normalize_input(root, raw)?;

    // Lexical normalization: `..` may never pop past the sandbox root.
    let mut segments: Vec<&str> = Vec::new();
    for component in Path::new(&relative).components() {
        match component {
            Component::Normal(part) => {
                let part = part.to_str().ok_or(PathError::InvalidCharacter)?;
                segments.push(part);
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if segments.pop().is_none() {
                    return Err(PathError::EscapesSandbox(raw.to_string()));
                }
            }
            Component::RootDir | Component::Prefix(_) => {
                // normalize_input stripped leading slashes already
                return Err(PathError::OutsideRoot(raw.to_string()));
            }
        }
    }

    let mut resolved = root.to_path_buf();
    for segment in &segments {
        resolved.push(segment);
    }

    check_symlink_containment(root, &resolved)?;
    Ok(resolved)
}

/// Converts a raw agent path into a root-relative string.
fn normalize_input(root: &Path, raw: &str) -> Result<String, PathError> {
    if raw.contains('\0') {
        return Err(PathError::InvalidCharacter);
    }

    let mut candidate = raw.trim().replace('\\', "/");
    for marker in ROOT_MARKERS {
        candidate = candidate.replace(marker, "");
    }

    // A literal absolute path is fine if it points into the sandbox. Other
    // absolute paths are treated as sloppy spellings of root-relative ones:
    // /etc/passwd becomes etc/passwd inside the sandbox.
    let root_str = root.to_string_lossy();
    if let Some(stripped) = candidate.strip_prefix(root_str.as_ref()) {
        candidate = stripped.to_string();
    }

    let mut candidate = candidate.trim_start_matches('/').to_string();
    while let Some(rest) = candidate.strip_prefix("./") {
        candidate = rest.to_string();
    }
    Ok(candidate)
}

/// Verifies that no existing component of `resolved` is a symlink leading
/// outside `root`. Missing components are fine; they cannot be links yet.
fn check_symlink_containment(root: &Path, resolved: &PathBuf) -> Result<(), PathError> {
    let mut prefix = PathBuf::new();
    for component in resolved.components() {
        prefix.push(component);
        if !prefix.starts_with(root) || prefix == *root {
            continue;
        }
        let Ok(metadata) = prefix.symlink_metadata() else {
            break; // first missing component; nothing beyond it exists
        };
        if metadata.file_type().is_symlink() {
            let target = prefix
                .canonicalize()
                .map_err(|_| PathError::SymlinkEscape(resolved.display().to_string()))?;
            let canonical_root = root.canonicalize().unwrap_or_else(|_| root.to_path_buf());
            if !target.starts_with(&canonical_root) {
                return Err(PathError::SymlinkEscape(resolved.display().to_string()));
            }
        }
    }
    Ok(())
}
