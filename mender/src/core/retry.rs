//! Per-file retry state machine.
//!
//! A file moves `Pending -> Audited -> Fixed -> Testing`, then either stops
//! (`Passed` / `Exhausted`) or goes through `RetryFix` back to `Testing`. The
//! number of test/verdict rounds is capped at [`MAX_TEST_ROUNDS`]; a failure on
//! the final round is terminal and never retried.

use std::path::PathBuf;

use serde::Serialize;

/// Maximum number of test/verdict rounds per file.
pub const MAX_TEST_ROUNDS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    /// The Judge returned `PASS`.
    Passed,
    /// The final round failed.
    Exhausted,
    /// An unexpected error aborted this file's pipeline.
    Errored,
}

impl TerminalState {
    pub fn as_str(self) -> &'static str {
        match self {
            TerminalState::Passed => "PASSED",
            TerminalState::Exhausted => "EXHAUSTED",
            TerminalState::Errored => "ERRORED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileState {
    Pending,
    Audited,
    Fixed,
    Testing { round: u32 },
    RetryFix { round: u32 },
    Done { outcome: TerminalState },
}

/// What the orchestrator does after a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDecision {
    Stop(TerminalState),
    Retry,
}

/// Orchestrator-local bookkeeping for one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileTask {
    pub path: PathBuf,
    /// Test/verdict rounds consumed so far.
    pub iteration_count: u32,
    pub current_corrected_path: Option<PathBuf>,
    pub state: FileState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileTask {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            iteration_count: 0,
            current_corrected_path: None,
            state: FileState::Pending,
            error: None,
        }
    }

    pub fn terminal_state(&self) -> Option<TerminalState> {
        match self.state {
            FileState::Done { outcome } => Some(outcome),
            _ => None,
        }
    }

    pub fn passed(&self) -> bool {
        self.terminal_state() == Some(TerminalState::Passed)
    }

    pub fn mark_audited(&mut self) {
        self.state = FileState::Audited;
    }

    pub fn mark_fixed(&mut self, corrected: PathBuf) {
        self.current_corrected_path = Some(corrected);
        self.state = match self.state {
            FileState::RetryFix { round } => FileState::RetryFix { round },
            _ => FileState::Fixed,
        };
    }

    /// Start the next test round. Returns the 1-indexed round number.
    ///
    /// Returns `None` once the round budget is spent.
    pub fn begin_round(&mut self) -> Option<u32> {
        if self.iteration_count >= MAX_TEST_ROUNDS {
            return None;
        }
        self.iteration_count += 1;
        self.state = FileState::Testing {
            round: self.iteration_count,
        };
        Some(self.iteration_count)
    }

    /// Record the verdict of the current round and decide what happens next.
    pub fn finish_round(&mut self, passed: bool) -> RoundDecision {
        let decision = if passed {
            RoundDecision::Stop(TerminalState::Passed)
        } else if self.iteration_count >= MAX_TEST_ROUNDS {
            RoundDecision::Stop(TerminalState::Exhausted)
        } else {
            RoundDecision::Retry
        };
        self.state = match decision {
            RoundDecision::Stop(outcome) => FileState::Done { outcome },
            RoundDecision::Retry => FileState::RetryFix {
                round: self.iteration_count,
            },
        };
        decision
    }

    pub fn mark_errored(&mut self, message: String) {
        self.error = Some(message);
        self.state = FileState::Done {
            outcome: TerminalState::Errored,
        };
    }
}
