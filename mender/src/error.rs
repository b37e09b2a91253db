//! Typed failure kinds carried through `anyhow` errors.
//!
//! Most functions return `anyhow::Result`. Where a caller has to branch on what
//! went wrong (sandbox redirects, degraded collaborator results), the failure is
//! raised as a [`RepairError`] and recovered with `downcast_ref`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RepairError {
    /// A read was attempted on a file that does not exist (or is not a regular file).
    #[error("file not found: {}", .0.display())]
    MissingFile(PathBuf),

    /// A resolved write path escapes the sandbox root. Nothing was written.
    #[error("write outside sandbox refused: {} is not under {}", path.display(), root.display())]
    SandboxViolation { path: PathBuf, root: PathBuf },

    /// The reasoning collaborator could not produce a response.
    #[error("collaborator failure: {0}")]
    CollaboratorFailure(String),

    /// The collaborator answered, but not in the expected structured shape.
    #[error("malformed structured response: {0}")]
    MalformedResponse(String),

    #[error("tool unavailable: {0}")]
    ToolUnavailable(String),

    #[error("tool timed out after {0:?}")]
    ToolTimeout(Duration),

    /// A log entry failed validation and was rejected before any I/O.
    #[error("invalid log entry: {0}")]
    InvalidLogEntry(String),
}

impl RepairError {
    /// True when `err` carries a [`RepairError::SandboxViolation`].
    pub fn is_sandbox_violation(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<RepairError>(),
            Some(RepairError::SandboxViolation { .. })
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sandbox_violation_is_detectable_through_anyhow() {
        let err = anyhow::Error::new(RepairError::SandboxViolation {
            path: PathBuf::from("/etc/passwd"),
            root: PathBuf::from("/work/sandbox"),
        })
        .context("write corrected file");

        assert!(RepairError::is_sandbox_violation(&err));
        assert!(format!("{err:#}").contains("/etc/passwd"));
    }

    #[test]
    fn other_kinds_are_not_sandbox_violations() {
        let err = anyhow::Error::new(RepairError::CollaboratorFailure("quota".to_string()));
        assert!(!RepairError::is_sandbox_violation(&err));
    }
}
