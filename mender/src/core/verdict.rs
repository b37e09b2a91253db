//! Deterministic verdict rules shared by the Judge.

use crate::core::types::{Feedback, Issue, IssueKind, NextAction, Severity, Verdict, VerdictOutcome};

/// Verdict used when the collaborator cannot render one.
///
/// `PASS` iff the tests passed and the score did not regress; `next_action`
/// mirrors `tests_passed`.
pub fn fallback_verdict(score_before: f64, score_after: f64, tests_passed: bool) -> Verdict {
    let outcome = if tests_passed && score_after >= score_before {
        VerdictOutcome::Pass
    } else {
        VerdictOutcome::Fail
    };
    Verdict {
        outcome,
        quality_score_after: score_after,
        tests_passed,
        details: "Automatic decision (collaborator unavailable)".to_string(),
        next_action: if tests_passed {
            NextAction::Done
        } else {
            NextAction::Retry
        },
    }
}

/// Map a verdict to the Judge's `(passed, feedback)` return contract.
///
/// On failure the feedback carries one synthetic `test_failure` issue and, when
/// the dynamic tests themselves failed, their raw output as `error_logs`.
pub fn feedback_for_verdict(
    file: &str,
    verdict: &Verdict,
    tests_passed: bool,
    test_output: &str,
) -> (bool, Feedback) {
    if verdict.outcome == VerdictOutcome::Pass {
        return (true, Feedback::passed());
    }
    let details = if verdict.details.trim().is_empty() {
        "Tests failed".to_string()
    } else {
        verdict.details.clone()
    };
    let issue = Issue {
        id: 1,
        file: file.to_string(),
        kind: IssueKind::TestFailure,
        severity: Severity::Critical,
        line: None,
        description: details,
        suggestion: "Fix based on test errors".to_string(),
        intent_analysis: String::new(),
    };
    let error_logs = (!tests_passed).then(|| test_output.to_string());
    (false, Feedback::failed(issue, error_logs))
}
