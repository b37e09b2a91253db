//! Shared data model for the repair pipeline.
//!
//! These types define the contracts between the Auditor, Fixer, and Judge. They
//! carry no I/O and serialize to the shapes the reasoning collaborator is asked
//! to produce.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Category of a detected problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    SyntaxError,
    LogicError,
    StyleIssue,
    MissingDocstring,
    DesignFlaw,
    SemanticError,
    TestFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

/// A single problem found by the Auditor or synthesized by the Judge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: u32,
    #[serde(default)]
    pub file: String,
    #[serde(rename = "type", alias = "kind")]
    pub kind: IssueKind,
    pub severity: Severity,
    #[serde(default)]
    pub line: Option<u32>,
    pub description: String,
    #[serde(default)]
    pub suggestion: String,
    #[serde(default)]
    pub intent_analysis: String,
}

/// Structured audit result for one file. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub issues: Vec<Issue>,
    pub quality_score_before: f64,
    pub summary: String,
    pub semantic_analysis: String,
}

impl AnalysisReport {
    /// Degraded report for an input that could not be read.
    pub fn file_not_found() -> Self {
        Self {
            issues: Vec::new(),
            quality_score_before: 0.0,
            summary: "File not found".to_string(),
            semantic_analysis: String::new(),
        }
    }
}

/// Root-cause analysis of a failure trace, produced during a retry pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    #[serde(alias = "error_type")]
    pub error_kind: String,
    pub root_cause: String,
    #[serde(default)]
    pub affected_lines: BTreeSet<u32>,
    pub fix_strategy: String,
}

impl Diagnostic {
    /// Placeholder used when the collaborator cannot diagnose the trace.
    pub fn unavailable() -> Self {
        Self {
            error_kind: "Unknown".to_string(),
            root_cause: "collaborator unavailable".to_string(),
            affected_lines: BTreeSet::new(),
            fix_strategy: "manual analysis required".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum VerdictOutcome {
    Pass,
    Fail,
}

impl VerdictOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            VerdictOutcome::Pass => "PASS",
            VerdictOutcome::Fail => "FAIL",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NextAction {
    Done,
    Retry,
}

/// The Judge's decision for one test round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    #[serde(alias = "verdict")]
    pub outcome: VerdictOutcome,
    #[serde(alias = "pylint_score_after", default)]
    pub quality_score_after: f64,
    pub tests_passed: bool,
    #[serde(default)]
    pub details: String,
    pub next_action: NextAction,
}

/// Input to the Fixer: either an audit report or the Judge's failure feedback.
///
/// `error_logs` selects the Fixer mode: present means a retry pass driven by a
/// failure trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    pub issues: Vec<Issue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_analysis: Option<String>,
    #[serde(default)]
    pub error_logs: Option<String>,
}

impl Feedback {
    pub fn from_report(report: &AnalysisReport) -> Self {
        Self {
            issues: report.issues.clone(),
            summary: Some(report.summary.clone()),
            semantic_analysis: Some(report.semantic_analysis.clone()),
            error_logs: None,
        }
    }

    pub fn passed() -> Self {
        Self {
            summary: Some("All passed".to_string()),
            ..Self::default()
        }
    }

    pub fn failed(issue: Issue, error_logs: Option<String>) -> Self {
        Self {
            issues: vec![issue],
            error_logs,
            ..Self::default()
        }
    }

    pub fn no_file() -> Self {
        Self {
            error_logs: Some("No file specified".to_string()),
            ..Self::default()
        }
    }
}
