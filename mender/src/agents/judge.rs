//! Judge: intent-based test generation, score recheck, test execution, verdict.
//!
//! The file under judgement is an explicit argument, and the per-run caches
//! live in a [`RunMemo`] owned by the caller, so the Judge itself holds no
//! mutable state.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::core::text::truncate_chars;
use crate::core::types::{Feedback, Verdict};
use crate::core::verdict::{fallback_verdict, feedback_for_verdict};
use crate::io::experiment_log::{Action, Details, ExperimentLog, LogRecord, Status, details};
use crate::io::prompt::{PromptEngine, VerdictInputs};
use crate::io::reasoner::Reasoner;
use crate::io::sandbox::{Sandbox, read_source};
use crate::io::tools::{LintReport, StaticAnalyzer, TestRun, TestRunner};

use super::{
    ExcerptLimits, JUDGE_AGENT, NamedSource, code_response, consult, insert_collaborator_error,
    parse_structured,
};

const TEST_GENERATION_SYSTEM_PROMPT: &str = "You are a test engineer. Write tests for what \
the code is supposed to do, judged from its names and signatures, so that plausible bugs \
fail them. Return the complete test module only.";

const VERDICT_SYSTEM_PROMPT: &str = "You are the final judge of an automated repair. Decide \
PASS or FAIL from the measured scores and test results. Answer with strict JSON only.";

const NO_TESTS_OUTPUT: &str = "No tests generated";

/// Per-run memoization: generated test modules and last measured score per file.
///
/// Owned by one orchestration run and reset at its start.
#[derive(Debug, Default)]
pub struct RunMemo {
    generated_tests: HashMap<PathBuf, PathBuf>,
    last_scores: HashMap<PathBuf, f64>,
}

impl RunMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.generated_tests.clear();
        self.last_scores.clear();
    }

    pub fn generated_test(&self, path: &Path) -> Option<&Path> {
        self.generated_tests.get(path).map(PathBuf::as_path)
    }

    /// Previous score for `path` (0.0 on the first pass).
    pub fn last_score(&self, path: &Path) -> f64 {
        self.last_scores.get(path).copied().unwrap_or(0.0)
    }

    /// Record `score` and return the previous one.
    fn replace_score(&mut self, path: &Path, score: f64) -> f64 {
        self.last_scores
            .insert(path.to_path_buf(), score)
            .unwrap_or(0.0)
    }
}

/// Result of one test/verdict round.
#[derive(Debug, Clone, PartialEq)]
pub struct JudgeOutcome {
    pub passed: bool,
    pub feedback: Feedback,
    /// Absent when the round ended before a verdict was rendered.
    pub verdict: Option<Verdict>,
}

impl JudgeOutcome {
    fn without_verdict(feedback: Feedback) -> Self {
        Self {
            passed: false,
            feedback,
            verdict: None,
        }
    }
}

pub struct Judge<'a, R, A, T> {
    reasoner: &'a R,
    analyzer: &'a A,
    tests: &'a T,
    log: &'a ExperimentLog,
    prompts: &'a PromptEngine,
    sandbox: &'a Sandbox,
    limits: ExcerptLimits,
    test_prefix: &'a str,
}

impl<'a, R: Reasoner, A: StaticAnalyzer, T: TestRunner> Judge<'a, R, A, T> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        reasoner: &'a R,
        analyzer: &'a A,
        tests: &'a T,
        log: &'a ExperimentLog,
        prompts: &'a PromptEngine,
        sandbox: &'a Sandbox,
        limits: ExcerptLimits,
        test_prefix: &'a str,
    ) -> Self {
        Self {
            reasoner,
            analyzer,
            tests,
            log,
            prompts,
            sandbox,
            limits,
            test_prefix,
        }
    }

    /// Run one test/verdict round on `current`.
    ///
    /// Without a current file the round fails with `error_logs = "No file
    /// specified"` and no tool is touched.
    #[instrument(skip_all, fields(path = ?current))]
    pub fn run_tests(&self, memo: &mut RunMemo, current: Option<&Path>) -> Result<JudgeOutcome> {
        let Some(path) = current else {
            return Ok(JudgeOutcome::without_verdict(Feedback::no_file()));
        };
        if !path.is_file() {
            warn!("file to judge does not exist");
            return Ok(JudgeOutcome::without_verdict(Feedback {
                error_logs: Some(format!("{} not found", path.display())),
                ..Feedback::default()
            }));
        }
        let source = read_source(path)?;
        let named = NamedSource::new(path, &source)?;

        let test_module = self.test_module(memo, path, &named)?;

        let lint = self.analyzer.run(path).unwrap_or_else(|err| {
            warn!(err = %format!("{err:#}"), "static analysis failed");
            LintReport::unavailable(&format!("{err:#}"))
        });
        let score_after = lint.score;
        let score_before = memo.replace_score(path, score_after);
        info!(score_before, score_after, "quality score recheck");

        let run = match test_module.as_deref().filter(|test| test.is_file()) {
            Some(test) => self.tests.run(test).unwrap_or_else(|err| {
                warn!(err = %format!("{err:#}"), "test execution failed");
                TestRun::unavailable(&format!("{err:#}"))
            }),
            None => {
                info!("no generated tests, validating on static analysis only");
                TestRun {
                    passed: true,
                    output: NO_TESTS_OUTPUT.to_string(),
                }
            }
        };
        info!(tests_passed = run.passed, "dynamic tests finished");

        let verdict = self.verdict(path, &named, score_before, score_after, &run)?;
        let (passed, feedback) =
            feedback_for_verdict(&named.file_name, &verdict, run.passed, &run.output);
        info!(verdict = verdict.outcome.as_str(), "round judged");
        Ok(JudgeOutcome {
            passed,
            feedback,
            verdict: Some(verdict),
        })
    }

    /// Cached test module for `path`, generating one if needed.
    ///
    /// A failed generation is logged and not cached.
    fn test_module(
        &self,
        memo: &mut RunMemo,
        path: &Path,
        named: &NamedSource<'_>,
    ) -> Result<Option<PathBuf>> {
        if let Some(cached) = memo.generated_test(path) {
            return Ok(Some(cached.to_path_buf()));
        }

        let module_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&named.file_name);
        let test_path = path.with_file_name(format!("{}{}", self.test_prefix, named.file_name));
        let prompt = self.prompts.render_test_generation(named.view(), module_name)?;

        let (output_response, outcome) =
            consult(self.reasoner, TEST_GENERATION_SYSTEM_PROMPT, &prompt, |response| {
                let code = code_response(response)?;
                self.sandbox.write(&test_path, &code)
            });
        let (generated, failure) = match outcome {
            Ok(written) => {
                info!(test = %written.display(), "generated test module");
                (Some(written), None)
            }
            Err(reason) => {
                warn!(reason = %reason, "test generation failed");
                (None, Some(reason))
            }
        };

        let mut entry = details(&prompt, &output_response);
        entry.insert("file_tested".to_string(), Value::from(path.display().to_string()));
        entry.insert(
            "test_file_generated".to_string(),
            generated
                .as_ref()
                .map_or(Value::Null, |test| Value::from(test.display().to_string())),
        );
        insert_collaborator_error(&mut entry, failure.as_deref());
        self.append(Action::Generation, entry, failure.is_none())?;

        if let Some(test) = &generated {
            memo.generated_tests.insert(path.to_path_buf(), test.clone());
        }
        Ok(generated)
    }

    fn verdict(
        &self,
        path: &Path,
        named: &NamedSource<'_>,
        score_before: f64,
        score_after: f64,
        run: &TestRun,
    ) -> Result<Verdict> {
        let prompt = self.prompts.render_verdict(&VerdictInputs {
            file_name: &named.file_name,
            score_before,
            score_after,
            tests_passed: run.passed,
            test_output: truncate_chars(&run.output, self.limits.trace_chars),
        })?;

        let (output_response, outcome) =
            consult(self.reasoner, VERDICT_SYSTEM_PROMPT, &prompt, parse_structured::<Verdict>);
        let (verdict, failure) = match outcome {
            Ok(mut verdict) => {
                verdict.quality_score_after = score_after;
                verdict.tests_passed = run.passed;
                (verdict, None)
            }
            Err(reason) => {
                warn!(reason = %reason, "verdict unavailable, applying fallback rule");
                (fallback_verdict(score_before, score_after, run.passed), Some(reason))
            }
        };

        let mut entry = details(&prompt, &output_response);
        entry.insert("file_judged".to_string(), Value::from(path.display().to_string()));
        entry.insert("score_before".to_string(), Value::from(score_before));
        entry.insert("score_after".to_string(), Value::from(score_after));
        entry.insert("tests_passed".to_string(), Value::from(run.passed));
        entry.insert("verdict".to_string(), Value::from(verdict.outcome.as_str()));
        insert_collaborator_error(&mut entry, failure.as_deref());
        self.append(Action::Analysis, entry, failure.is_none())?;
        Ok(verdict)
    }

    fn append(&self, action: Action, entry: Details, ok: bool) -> Result<()> {
        self.log.append(LogRecord {
            agent: JUDGE_AGENT,
            model_identifier: self.reasoner.model_identifier(),
            action,
            details: entry,
            status: Status::from_success(ok),
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{IssueKind, VerdictOutcome};
    use crate::test_support::{
        Reply, ScriptedAnalyzer, ScriptedReasoner, ScriptedTestRunner, TestWorkspace,
    };
    use std::fs;

    const SOURCE: &str = "def add(a, b):\n    return a + b\n";
    const TESTS: &str = "from calc import add\n\ndef test_add():\n    assert add(1, 2) == 3\n";
    const PASS: &str = concat!(
        r#"{"outcome": "PASS", "quality_score_after": 99, "tests_passed": true, "#,
        r#""details": "ok", "next_action": "DONE"}"#
    );

    fn judge<'a>(
        ws: &'a TestWorkspace,
        reasoner: &'a ScriptedReasoner,
        analyzer: &'a ScriptedAnalyzer,
        tests: &'a ScriptedTestRunner,
    ) -> Judge<'a, ScriptedReasoner, ScriptedAnalyzer, ScriptedTestRunner> {
        Judge::new(
            reasoner,
            analyzer,
            tests,
            &ws.log,
            &ws.prompts,
            &ws.sandbox,
            ExcerptLimits::default(),
            "test_",
        )
    }

    fn sandboxed(ws: &TestWorkspace) -> PathBuf {
        ws.sandbox
            .write(&ws.sandbox.root().join("calc.py"), SOURCE)
            .expect("seed sandbox")
    }

    #[test]
    fn no_current_file_touches_nothing() {
        let ws = TestWorkspace::new();
        let reasoner = ScriptedReasoner::failing();
        let analyzer = ScriptedAnalyzer::constant(5.0, "");
        let tests = ScriptedTestRunner::passing();
        let mut memo = RunMemo::new();

        let outcome = judge(&ws, &reasoner, &analyzer, &tests)
            .run_tests(&mut memo, None)
            .expect("run");

        assert!(!outcome.passed);
        assert_eq!(outcome.feedback, Feedback::no_file());
        assert!(outcome.feedback.issues.is_empty());
        assert_eq!(reasoner.calls(), 0);
        assert_eq!(analyzer.runs(), 0);
        assert_eq!(tests.runs(), 0);
        assert!(ws.log.entries().expect("entries").is_empty());
    }

    #[test]
    fn passing_round_generates_tests_and_overrides_echoed_score() {
        let ws = TestWorkspace::new();
        let path = sandboxed(&ws);
        let reasoner = ScriptedReasoner::new([TESTS, PASS]);
        let analyzer = ScriptedAnalyzer::constant(8.0, "rated at 8.00/10");
        let tests = ScriptedTestRunner::passing();
        let mut memo = RunMemo::new();

        let outcome = judge(&ws, &reasoner, &analyzer, &tests)
            .run_tests(&mut memo, Some(&path))
            .expect("run");

        assert!(outcome.passed);
        assert_eq!(outcome.feedback, Feedback::passed());
        let verdict = outcome.verdict.expect("verdict");
        assert_eq!(verdict.quality_score_after, 8.0);

        let test_path = ws.sandbox.root().join("test_calc.py");
        assert_eq!(fs::read_to_string(&test_path).expect("read tests"), TESTS);
        assert_eq!(memo.generated_test(&path), Some(test_path.as_path()));
        assert_eq!(memo.last_score(&path), 8.0);
        assert_eq!(tests.targets(), vec![test_path]);

        let actions: Vec<_> = ws
            .log
            .entries()
            .expect("entries")
            .iter()
            .map(|entry| entry.action)
            .collect();
        assert_eq!(actions, vec![Action::Generation, Action::Analysis]);
    }

    #[test]
    fn failing_tests_produce_retry_feedback_with_trace() {
        let ws = TestWorkspace::new();
        let path = sandboxed(&ws);
        let reasoner = ScriptedReasoner::with_replies(vec![
            Reply::Text(TESTS.to_string()),
            Reply::Fail("quota".to_string()),
        ]);
        let analyzer = ScriptedAnalyzer::constant(9.0, "");
        let tests = ScriptedTestRunner::failing("E   assert -1 == 3");
        let mut memo = RunMemo::new();

        let outcome = judge(&ws, &reasoner, &analyzer, &tests)
            .run_tests(&mut memo, Some(&path))
            .expect("run");

        assert!(!outcome.passed);
        assert_eq!(outcome.verdict.as_ref().map(|v| v.outcome), Some(VerdictOutcome::Fail));
        assert_eq!(outcome.feedback.issues.len(), 1);
        assert_eq!(outcome.feedback.issues[0].kind, IssueKind::TestFailure);
        assert_eq!(outcome.feedback.issues[0].file, "calc.py");
        assert_eq!(outcome.feedback.error_logs.as_deref(), Some("E   assert -1 == 3"));
        let entries = ws.log.entries().expect("entries");
        assert_eq!(entries[1].status, Status::Failure);
        assert_eq!(entries[1].details["verdict"], "FAIL");
    }

    #[test]
    fn generated_tests_are_cached_but_failures_are_not() {
        let ws = TestWorkspace::new();
        let path = sandboxed(&ws);
        // Round 1: generation fails, verdict falls back. Round 2: generation succeeds.
        // Round 3: cached, only the verdict is requested.
        let reasoner = ScriptedReasoner::with_replies(vec![
            Reply::Fail("quota".to_string()),
            Reply::Fail("quota".to_string()),
            Reply::Text(TESTS.to_string()),
            Reply::Text(PASS.to_string()),
            Reply::Text(PASS.to_string()),
        ]);
        let analyzer = ScriptedAnalyzer::constant(7.0, "");
        let tests = ScriptedTestRunner::passing();
        let judge = judge(&ws, &reasoner, &analyzer, &tests);
        let mut memo = RunMemo::new();

        let first = judge.run_tests(&mut memo, Some(&path)).expect("round 1");
        assert!(memo.generated_test(&path).is_none());
        assert_eq!(tests.runs(), 0);
        // No tests: vacuously passed, and 7.0 >= 0.0 on the first pass.
        assert!(first.passed);

        judge.run_tests(&mut memo, Some(&path)).expect("round 2");
        assert!(memo.generated_test(&path).is_some());

        judge.run_tests(&mut memo, Some(&path)).expect("round 3");
        assert_eq!(reasoner.calls(), 5);
        assert_eq!(tests.runs(), 2);

        let generations = ws
            .log
            .entries()
            .expect("entries")
            .into_iter()
            .filter(|entry| entry.action == Action::Generation)
            .count();
        assert_eq!(generations, 2);
    }

    #[test]
    fn fallback_compares_against_previous_round_score() {
        let ws = TestWorkspace::new();
        let path = sandboxed(&ws);
        let reasoner = ScriptedReasoner::failing();
        let analyzer = ScriptedAnalyzer::sequence([8.0, 6.0]);
        let tests = ScriptedTestRunner::passing();
        let judge = judge(&ws, &reasoner, &analyzer, &tests);
        let mut memo = RunMemo::new();

        assert!(judge.run_tests(&mut memo, Some(&path)).expect("round 1").passed);
        let second = judge.run_tests(&mut memo, Some(&path)).expect("round 2");

        assert!(!second.passed);
        assert_eq!(second.feedback.error_logs, None);
        assert_eq!(memo.last_score(&path), 6.0);
    }

    #[test]
    fn reset_clears_run_state() {
        let mut memo = RunMemo::new();
        memo.replace_score(Path::new("a.py"), 5.0);
        memo.generated_tests
            .insert(PathBuf::from("a.py"), PathBuf::from("test_a.py"));

        memo.reset();

        assert_eq!(memo.last_score(Path::new("a.py")), 0.0);
        assert!(memo.generated_test(Path::new("a.py")).is_none());
    }

    #[test]
    fn missing_current_file_fails_without_tools() {
        let ws = TestWorkspace::new();
        let reasoner = ScriptedReasoner::failing();
        let analyzer = ScriptedAnalyzer::constant(5.0, "");
        let tests = ScriptedTestRunner::passing();
        let mut memo = RunMemo::new();
        let gone = ws.sandbox.root().join("gone.py");

        let outcome = judge(&ws, &reasoner, &analyzer, &tests)
            .run_tests(&mut memo, Some(&gone))
            .expect("run");

        assert!(!outcome.passed);
        assert!(outcome.feedback.error_logs.expect("error logs").ends_with("not found"));
        assert_eq!(analyzer.runs(), 0);
    }
}
