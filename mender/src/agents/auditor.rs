//! Auditor: structured issue report plus baseline quality score for one file.

use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::text::truncate_chars;
use crate::core::types::{AnalysisReport, Issue, IssueKind, Severity};
use crate::io::experiment_log::{Action, ExperimentLog, LogRecord, Status, details};
use crate::io::prompt::PromptEngine;
use crate::io::reasoner::Reasoner;
use crate::io::sandbox::read_source;
use crate::io::tools::{LintReport, StaticAnalyzer};

use super::{
    AUDITOR_AGENT, ExcerptLimits, NamedSource, consult, insert_collaborator_error, parse_structured,
};

const AUDITOR_SYSTEM_PROMPT: &str = "You are a senior code auditor. Judge code by the \
intent its names and signatures express, not only by what it currently does. \
Answer with strict JSON only.";

const MAX_FALLBACK_ISSUES: usize = 5;
const FALLBACK_DESCRIPTION_CHARS: usize = 100;

/// Collaborator answer before the measured score is attached.
#[derive(Debug, Deserialize)]
struct AuditResponse {
    #[serde(default)]
    issues: Vec<Issue>,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    semantic_analysis: String,
}

pub struct Auditor<'a, R, A> {
    reasoner: &'a R,
    analyzer: &'a A,
    log: &'a ExperimentLog,
    prompts: &'a PromptEngine,
    limits: ExcerptLimits,
}

impl<'a, R: Reasoner, A: StaticAnalyzer> Auditor<'a, R, A> {
    pub fn new(
        reasoner: &'a R,
        analyzer: &'a A,
        log: &'a ExperimentLog,
        prompts: &'a PromptEngine,
        limits: ExcerptLimits,
    ) -> Self {
        Self {
            reasoner,
            analyzer,
            log,
            prompts,
            limits,
        }
    }

    /// Audit `path`. Appends exactly one `ANALYSIS` log entry.
    ///
    /// An unreadable file yields [`AnalysisReport::file_not_found`]. Collaborator
    /// and tool failures degrade to a report built from static analysis alone.
    /// Only a failed log write is returned as an error.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn analyze(&self, path: &Path) -> Result<AnalysisReport> {
        let source = match read_source(path) {
            Ok(source) => source,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "cannot read file, returning degraded report");
                return self.log_missing(path);
            }
        };
        let named = NamedSource::new(path, &source)?;

        let lint = self.analyzer.run(path).unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "static analysis failed");
            LintReport::unavailable(&format!("{err:#}"))
        });
        info!(score = lint.score, "baseline quality score");

        let diagnostics = truncate_chars(&lint.messages, self.limits.diagnostic_chars);
        let prompt = self.prompts.render_audit(named.view(), lint.score, diagnostics)?;

        let (output_response, outcome) = consult(
            self.reasoner,
            AUDITOR_SYSTEM_PROMPT,
            &prompt,
            parse_structured::<AuditResponse>,
        );
        let (report, failure) = match outcome {
            Ok(response) => (complete_report(response, &named.file_name, lint.score), None),
            Err(reason) => {
                warn!(reason = %reason, "audit response unusable, using static analysis fallback");
                (fallback_report(&named.file_name, &lint), Some(reason))
            }
        };

        let mut entry = details(&prompt, &output_response);
        entry.insert("file_analyzed".to_string(), Value::from(path.display().to_string()));
        entry.insert("quality_score_before".to_string(), Value::from(lint.score));
        entry.insert(
            "diagnostics_excerpt".to_string(),
            Value::from(truncate_chars(&lint.messages, self.limits.log_chars)),
        );
        insert_collaborator_error(&mut entry, failure.as_deref());
        self.log.append(LogRecord {
            agent: AUDITOR_AGENT,
            model_identifier: self.reasoner.model_identifier(),
            action: Action::Analysis,
            details: entry,
            status: Status::from_success(failure.is_none()),
        })?;

        info!(issues = report.issues.len(), "audit complete");
        Ok(report)
    }

    fn log_missing(&self, path: &Path) -> Result<AnalysisReport> {
        let report = AnalysisReport::file_not_found();
        let mut entry = details(&format!("Analyze {}", path.display()), &report.summary);
        entry.insert("file_analyzed".to_string(), Value::from(path.display().to_string()));
        entry.insert("quality_score_before".to_string(), Value::from(0.0));
        insert_collaborator_error(&mut entry, None);
        self.log.append(LogRecord {
            agent: AUDITOR_AGENT,
            model_identifier: self.reasoner.model_identifier(),
            action: Action::Analysis,
            details: entry,
            status: Status::Failure,
        })?;
        Ok(report)
    }
}

fn complete_report(response: AuditResponse, file_name: &str, score: f64) -> AnalysisReport {
    let mut issues = response.issues;
    for issue in &mut issues {
        if issue.file.is_empty() {
            issue.file = file_name.to_string();
        }
    }
    let summary = response
        .summary
        .filter(|summary| !summary.trim().is_empty())
        .unwrap_or_else(|| format!("{} issue(s) detected", issues.len()));
    AnalysisReport {
        issues,
        quality_score_before: score.clamp(0.0, 10.0),
        summary,
        semantic_analysis: response.semantic_analysis,
    }
}

/// Report synthesized from static-analysis messages alone.
fn fallback_report(file_name: &str, lint: &LintReport) -> AnalysisReport {
    let mut issues: Vec<Issue> = lint
        .messages
        .lines()
        .map(str::trim)
        .filter(|line| line.contains(':') && line.chars().count() > 10)
        .take(MAX_FALLBACK_ISSUES)
        .zip(1..)
        .map(|(line, id)| Issue {
            id,
            file: file_name.to_string(),
            kind: IssueKind::StyleIssue,
            severity: Severity::Info,
            line: None,
            description: truncate_chars(line, FALLBACK_DESCRIPTION_CHARS).to_string(),
            suggestion: "See static analysis output for details".to_string(),
            intent_analysis: String::new(),
        })
        .collect();
    if issues.is_empty() {
        issues.push(Issue {
            id: 1,
            file: file_name.to_string(),
            kind: IssueKind::StyleIssue,
            severity: Severity::Info,
            line: None,
            description: "Manual review required (no structured analysis available)".to_string(),
            suggestion: "Review the file by hand".to_string(),
            intent_analysis: String::new(),
        });
    }
    AnalysisReport {
        issues,
        quality_score_before: lint.score,
        summary: format!("Static analysis only ({:.2}/10)", lint.score),
        semantic_analysis: "Not available (collaborator unavailable)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptedAnalyzer, ScriptedReasoner, TestWorkspace};

    const LINT_OUTPUT: &str = "************* Module calc\n\
        calc.py:1:0: C0114: Missing module docstring\n\
        calc.py:2:4: W0612: Unused variable 'x'\n\
        \n\
        Your code has been rated at 4.00/10";

    fn analyzer() -> ScriptedAnalyzer {
        ScriptedAnalyzer::constant(4.0, LINT_OUTPUT)
    }

    fn auditor<'a>(
        ws: &'a TestWorkspace,
        reasoner: &'a ScriptedReasoner,
        analyzer: &'a ScriptedAnalyzer,
    ) -> Auditor<'a, ScriptedReasoner, ScriptedAnalyzer> {
        Auditor::new(reasoner, analyzer, &ws.log, &ws.prompts, ExcerptLimits::default())
    }

    #[test]
    fn missing_file_returns_degraded_report_and_logs_once() {
        let ws = TestWorkspace::new();
        let reasoner = ScriptedReasoner::new(Vec::<&str>::new());
        let analyzer = analyzer();
        let auditor = auditor(&ws, &reasoner, &analyzer);

        let report = auditor.analyze(&ws.target_dir().join("nope.py")).expect("analyze");

        assert_eq!(report, AnalysisReport::file_not_found());
        assert_eq!(reasoner.calls(), 0);
        assert_eq!(analyzer.runs(), 0);
        let entries = ws.log.entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, Action::Analysis);
        assert_eq!(entries[0].status, Status::Failure);
        assert_eq!(entries[0].details["output_response"], "File not found");
    }

    #[test]
    fn collaborator_report_gets_measured_score_and_default_summary() {
        let ws = TestWorkspace::new();
        let path = ws.write_target("calc.py", "def add(a, b):\n    return a - b\n");
        let reasoner = ScriptedReasoner::new([r#"```json
{"issues": [{"id": 1, "type": "semantic_error", "severity": "critical", "line": 2,
  "description": "add subtracts", "suggestion": "use +", "intent_analysis": "name says add"}],
 "semantic_analysis": "add does not add"}
```"#]);
        let analyzer = analyzer();
        let auditor = auditor(&ws, &reasoner, &analyzer);

        let report = auditor.analyze(&path).expect("analyze");

        assert_eq!(report.quality_score_before, 4.0);
        assert_eq!(report.summary, "1 issue(s) detected");
        assert_eq!(report.issues[0].kind, IssueKind::SemanticError);
        assert_eq!(report.issues[0].file, "calc.py");
        let entries = ws.log.entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, Status::Success);
        assert_eq!(entries[0].details["collaborator_error"], Value::Null);
    }

    #[test]
    fn collaborator_failure_falls_back_to_lint_messages() {
        let ws = TestWorkspace::new();
        let path = ws.write_target("calc.py", "x = 1\n");
        let reasoner = ScriptedReasoner::failing();
        let analyzer = analyzer();
        let auditor = auditor(&ws, &reasoner, &analyzer);

        let report = auditor.analyze(&path).expect("analyze");

        assert_eq!(report.quality_score_before, 4.0);
        assert_eq!(report.issues.len(), 2);
        assert!(report.issues.iter().all(|issue| {
            issue.kind == IssueKind::StyleIssue && issue.severity == Severity::Info
        }));
        assert!(report.issues[0].description.starts_with("calc.py:1:0: C0114"));
        let entries = ws.log.entries().expect("entries");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, Status::Failure);
    }

    #[test]
    fn malformed_response_uses_fallback_with_manual_review_issue() {
        let ws = TestWorkspace::new();
        let path = ws.write_target("calc.py", "x = 1\n");
        let reasoner = ScriptedReasoner::new(["Looks fine to me!"]);
        let analyzer = ScriptedAnalyzer::constant(10.0, "no messages");
        let auditor = auditor(&ws, &reasoner, &analyzer);

        let report = auditor.analyze(&path).expect("analyze");

        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].description.starts_with("Manual review required"));
        let entries = ws.log.entries().expect("entries");
        assert_eq!(entries[0].status, Status::Failure);
        assert_eq!(entries[0].details["output_response"], "Looks fine to me!");
    }

    #[test]
    fn diagnostics_are_truncated_before_logging() {
        let ws = TestWorkspace::new();
        let path = ws.write_target("calc.py", "x = 1\n");
        let long = format!("calc.py:1:0: {}", "W".repeat(2000));
        let reasoner = ScriptedReasoner::new([r#"{"issues": [], "summary": "clean"}"#]);
        let analyzer = ScriptedAnalyzer::constant(9.0, &long);
        let limits = ExcerptLimits {
            diagnostic_chars: 50,
            log_chars: 20,
            trace_chars: 20,
        };
        let auditor = Auditor::new(&reasoner, &analyzer, &ws.log, &ws.prompts, limits);

        auditor.analyze(&path).expect("analyze");

        let entries = ws.log.entries().expect("entries");
        let excerpt = entries[0].details["diagnostics_excerpt"].as_str().expect("excerpt");
        assert_eq!(excerpt.chars().count(), 20);
        let prompt = entries[0].details["input_prompt"].as_str().expect("prompt");
        assert!(!prompt.contains(&"W".repeat(100)));
    }
}
