//! Sandbox store: the only writable area for corrected sources and generated tests.
//!
//! Every write resolves its target to an absolute physical path (lexically
//! normalized, existing ancestors canonicalized) and refuses it unless that path
//! lies under the canonical sandbox root. A symlink as the final component is
//! always refused. There is no bypass.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, warn};

use crate::error::RepairError;

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    /// Open (creating if needed) the sandbox rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let lexical = absolute_normalized(root.as_ref())?;
        fs::create_dir_all(&lexical)
            .with_context(|| format!("create sandbox {}", lexical.display()))?;
        let root = lexical
            .canonicalize()
            .with_context(|| format!("canonicalize sandbox {}", lexical.display()))?;
        debug!(root = %root.display(), "sandbox ready");
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve `path` and check containment.
    ///
    /// Relative paths resolve against the process working directory. Symlinks
    /// in existing ancestors are followed before the check.
    pub fn resolve(&self, path: &Path) -> Result<PathBuf> {
        let lexical = absolute_normalized(path)?;
        let violation = |path: PathBuf| -> anyhow::Error {
            RepairError::SandboxViolation {
                path,
                root: self.root.clone(),
            }
            .into()
        };
        if fs::symlink_metadata(&lexical).is_ok_and(|meta| meta.file_type().is_symlink()) {
            return Err(violation(lexical));
        }
        let Ok(resolved) = physical_path(&lexical) else {
            return Err(violation(lexical));
        };
        if resolved.starts_with(&self.root) && resolved != self.root {
            return Ok(resolved);
        }
        Err(violation(resolved))
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.resolve(path).is_ok()
    }

    /// Default sandboxed location for a file name.
    ///
    /// Only the final component of `file_name` is used, so repeated passes over a
    /// file already in the sandbox land on the same path.
    pub fn default_path(&self, file_name: &Path) -> Result<PathBuf> {
        let name = file_name
            .file_name()
            .ok_or_else(|| anyhow!("no file name in {}", file_name.display()))?;
        Ok(self.root.join(name))
    }

    /// Write `contents` to `path` if it resolves inside the sandbox.
    ///
    /// Returns the resolved path. On a containment failure nothing is touched
    /// and the error carries [`RepairError::SandboxViolation`].
    pub fn write(&self, path: &Path, contents: &str) -> Result<PathBuf> {
        let resolved = match self.resolve(path) {
            Ok(resolved) => resolved,
            Err(err) => {
                warn!(
                    path = %path.display(),
                    root = %self.root.display(),
                    "refused write outside sandbox"
                );
                return Err(err);
            }
        };
        if let Some(parent) = resolved.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        fs::write(&resolved, contents)
            .with_context(|| format!("write {}", resolved.display()))?;
        debug!(path = %resolved.display(), bytes = contents.len(), "sandbox write");
        Ok(resolved)
    }
}

/// Read a UTF-8 source file, reporting a missing file as [`RepairError::MissingFile`].
pub fn read_source(path: &Path) -> Result<String> {
    if !path.is_file() {
        return Err(RepairError::MissingFile(path.to_path_buf()).into());
    }
    fs::read_to_string(path).with_context(|| format!("read {}", path.display()))
}

/// Absolute path with `.` and `..` folded lexically (no symlink resolution).
fn absolute_normalized(path: &Path) -> Result<PathBuf> {
    let absolute =
        std::path::absolute(path).with_context(|| format!("resolve {}", path.display()))?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::ParentDir => {
                normalized.pop();
            }
            Component::CurDir => {}
            other => normalized.push(other.as_os_str()),
        }
    }
    Ok(normalized)
}

/// Canonicalize the deepest existing ancestor of `lexical` and re-append the rest.
///
/// `lexical` must already be absolute and free of `.`/`..` components.
fn physical_path(lexical: &Path) -> Result<PathBuf> {
    let mut existing = lexical;
    let mut missing = Vec::new();
    while fs::symlink_metadata(existing).is_err() {
        let (Some(parent), Some(name)) = (existing.parent(), existing.file_name()) else {
            break;
        };
        missing.push(name);
        existing = parent;
    }
    let mut physical = existing
        .canonicalize()
        .with_context(|| format!("canonicalize {}", existing.display()))?;
    physical.extend(missing.iter().rev());
    Ok(physical)
}
