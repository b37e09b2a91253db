//! Eligible target files in a directory.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::debug;

/// List regular files directly inside `dir` that the pipeline should repair.
///
/// A file is eligible when its extension is in `extensions` and its name does
/// not start with `test_prefix`. Results are sorted. A missing or unreadable
/// directory is an error.
pub fn list_eligible_files(
    dir: &Path,
    extensions: &[String],
    test_prefix: &str,
) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).with_context(|| format!("read directory {}", dir.display()))?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.with_context(|| format!("read entry in {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        if name.starts_with(test_prefix) {
            continue;
        }
        let matches_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| extensions.iter().any(|allowed| allowed == ext));
        if matches_extension {
            files.push(path);
        }
    }
    files.sort();
    debug!(dir = %dir.display(), count = files.len(), "eligible files");
    Ok(files)
}
