//! Per-run sandbox lifecycle.
//!
//! A [`SandboxInstance`] is an isolated directory tree seeded with fixture
//! content. Exactly one exists per run, it is never shared across runs, and
//! it is deleted when the run ends regardless of outcome.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Error types for sandbox lifecycle operations.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("Setup failed: {0}")]
    Setup(String),

    #[error("Teardown failed: {0}")]
    Teardown(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// An isolated directory tree owning all files touched during one run.
pub struct SandboxInstance {
    /// Unique identifier for this sandbox.
    pub id: String,
    dir: Option<TempDir>,
}

impl SandboxInstance {
    /// Creates a fresh, empty sandbox under the system temp directory.
    pub fn create() -> Result<Self, SandboxError> {
        let dir = TempDir::with_prefix("taskbench-")
            .map_err(|e| SandboxError::Setup(format!("Failed to create sandbox dir: {e}")))?;
        let id = format!("sandbox-{}", Uuid::new_v4());
        debug!(sandbox = %id, path = %dir.path().display(), "Sandbox created");
        Ok(Self { id, dir: Some(dir) })
    }

    /// Returns the confinement root for this sandbox.
    pub fn root(&self) -> &Path {
        self.dir
            .as_ref()
            .map(|d| d.path())
            .unwrap_or_else(|| Path::new(""))
    }

    /// Writes a file relative to the root, creating parent directories.
    pub fn write_file(&self, relative: &str, content: &str) -> Result<(), SandboxError> {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, content)?;
        Ok(())
    }

    /// Renders a sorted listing of every regular file, for prompt hints.
    pub fn render_layout(&self) -> String {
        let mut entries: Vec<String> = WalkDir::new(self.root())
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .filter_map(|e| {
                e.path()
                    .strip_prefix(self.root())
                    .ok()
                    .map(|p| format!("- {}", p.to_string_lossy().replace('\\', "/")))
            })
            .collect();
        entries.sort();
        if entries.is_empty() {
            "(empty sandbox)".to_string()
        } else {
            entries.join("\n")
        }
    }

    /// Copies the whole sandbox tree into `dst` (used by patch grading,
    /// which applies submissions to a fresh copy).
    pub fn copy_tree_to(&self, dst: &Path) -> Result<(), SandboxError> {
        copy_dir_recursive(self.root(), dst)?;
        Ok(())
    }

    /// Deletes the sandbox tree. Idempotent.
    pub fn teardown(&mut self) -> Result<(), SandboxError> {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().display().to_string();
            dir.close()
                .map_err(|e| SandboxError::Teardown(format!("{path}: {e}")))?;
            debug!(sandbox = %self.id, "Sandbox removed");
        }
        Ok(())
    }

    /// Returns true if the sandbox directory still exists.
    pub fn is_active(&self) -> bool {
        self.dir.is_some()
    }
}

impl Drop for SandboxInstance {
    fn drop(&mut self) {
        // TempDir removes the tree either way; the warning flags a run that
        // skipped its explicit teardown path.
        if self.dir.is_some() {
            warn!(sandbox = %self.id, "Sandbox dropped without explicit teardown");
        }
    }
}

/// Recursively copies a directory.
pub(crate) fn copy_dir_recursive(src: &Path, dst: &Path) -> std::io::Result<()> {
    if !dst.exists() {
        fs::create_dir_all(dst)?;
    }

    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let path = entry.path();
        let dest_path = dst.join(entry.file_name());

        if path.is_dir() {
            copy_dir_recursive(&path, &dest_path)?;
        } else {
            fs::copy(&path, &dest_path)?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_teardown() {
        let mut sandbox = SandboxInstance::create().unwrap();
        let root = sandbox.root().to_path_buf();
        assert!(root.exists());
        assert!(sandbox.is_active());

        sandbox.teardown().unwrap();
        assert!(!root.exists());
        assert!(!sandbox.is_active());

        // Idempotent
        sandbox.teardown().unwrap();
    }

    #[test]
    fn test_write_file_creates_parents() {
        let mut sandbox = SandboxInstance::create().unwrap();
        sandbox.write_file("a/b/c.txt", "hello").unwrap();
        let content = fs::read_to_string(sandbox.root().join("a/b/c.txt")).unwrap();
        assert_eq!(content, "hello");
        sandbox.teardown().unwrap();
    }

    #[test]
    fn test_render_layout_sorted() {
        let mut sandbox = SandboxInstance::create().unwrap();
        sandbox.write_file("b.txt", "").unwrap();
        sandbox.write_file("a/x.txt", "").unwrap();
        let layout = sandbox.render_layout();
        assert_eq!(layout, "- a/x.txt\n- b.txt");
        sandbox.teardown().unwrap();
    }

    #[test]
    fn test_render_layout_empty() {
        let mut sandbox = SandboxInstance::create().unwrap();
        assert_eq!(sandbox.render_layout(), "(empty sandbox)");
        sandbox.teardown().unwrap();
    }

    #[test]
    fn test_copy_tree() {
        let mut sandbox = SandboxInstance::create().unwrap();
        sandbox.write_file("project/src/lib.py", "x = 1\n").unwrap();
        let dst = TempDir::new().unwrap();
        sandbox.copy_tree_to(dst.path()).unwrap();
        assert!(dst.path().join("project/src/lib.py").exists());
        sandbox.teardown().unwrap();
    }
}
