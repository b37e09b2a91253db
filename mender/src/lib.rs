//! Automated code-repair pipeline.
//!
//! Every eligible source file in a target directory goes through an
//! Audit -> Fix -> Test/Judge loop with a bounded number of retries. All writes
//! are confined to a sandbox directory and every collaborator interaction is
//! recorded in a structured experiment log.
//!
//! - **[`core`]**: Pure logic (records, text cleanup, verdict rules, the
//!   per-file retry state machine). No I/O.
//! - **[`io`]**: Side effects (sandbox, experiment log, external tools, the
//!   reasoning collaborator, configuration). Isolated behind traits so agents
//!   can be tested with fakes.
//! - **[`agents`]**: The Auditor, Fixer and Judge roles.
//! - **[`orchestrator`]**: Drives the agents per file and aggregates results.

pub mod agents;
pub mod core;
pub mod error;
pub mod exit_codes;
pub mod io;
pub mod logging;
pub mod orchestrator;
#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
