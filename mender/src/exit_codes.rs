//! Stable exit codes for the `mender` CLI.

/// At least one file passed, or there was nothing to process.
pub const OK: i32 = 0;
/// Every file failed, or the run could not start (bad directory, config, sandbox).
pub const FAILED: i32 = 1;
