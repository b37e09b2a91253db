//! End-to-end pipeline runs over a scratch workspace with scripted collaborators.
//!
//! Verifies sandbox confinement, experiment log contents, and the retry cap
//! across the Auditor -> Fixer -> Judge loop.

use std::fs;

use mender::agents::ExcerptLimits;
use mender::core::retry::TerminalState;
use mender::io::experiment_log::{Action, Status};
use mender::orchestrator::{Orchestrator, Workbench};
use mender::test_support::{
    Reply, ScriptedAnalyzer, ScriptedReasoner, ScriptedTestRunner, TestWorkspace,
};

const BUGGY: &str = "def add(a, b):\n    return a - b\n";
const FIXED: &str = "def add(a, b):\n    return a + b\n";
const TESTS: &str = "from calc import add\n\n\ndef test_add():\n    assert add(1, 2) == 3\n";
const AUDIT: &str = r#"```json
{
  "issues": [
    {"id": 1, "type": "logic_error", "severity": "critical", "line": 2,
     "description": "add subtracts", "suggestion": "use +",
     "intent_analysis": "name says addition"}
  ],
  "summary": "1 logic error",
  "semantic_analysis": "add() should add"
}
```"#;
const PASS: &str =
    r#"{"outcome": "PASS", "tests_passed": true, "details": "all good", "next_action": "DONE"}"#;

fn bench<'a>(
    ws: &'a TestWorkspace,
    reasoner: &'a ScriptedReasoner,
    analyzer: &'a ScriptedAnalyzer,
    tests: &'a ScriptedTestRunner,
) -> Workbench<'a, ScriptedReasoner, ScriptedAnalyzer, ScriptedTestRunner> {
    Workbench {
        reasoner,
        analyzer,
        tests,
        log: &ws.log,
        prompts: &ws.prompts,
        sandbox: &ws.sandbox,
        limits: ExcerptLimits::default(),
        test_prefix: "test_",
    }
}

#[test]
fn repaired_file_lands_in_sandbox_and_passes() {
    let ws = TestWorkspace::new();
    let original = ws.write_target("calc.py", BUGGY);
    let fenced_fix = format!("```python\n{FIXED}```");
    let reasoner = ScriptedReasoner::new([AUDIT, fenced_fix.as_str(), TESTS, PASS]);
    let analyzer = ScriptedAnalyzer::sequence([4.0, 8.0]);
    let tests = ScriptedTestRunner::passing();

    let mut orchestrator = Orchestrator::new(bench(&ws, &reasoner, &analyzer, &tests));
    let report = orchestrator.run(&[original.clone()], |_| {});

    assert_eq!(report.files[0].outcome(), TerminalState::Passed);
    assert_eq!(report.files[0].final_score, Some(8.0));

    // The target directory is never written.
    assert_eq!(fs::read_to_string(&original).expect("read original"), BUGGY);
    let sandbox = ws.sandbox.root();
    assert_eq!(fs::read_to_string(sandbox.join("calc.py")).expect("read fixed"), FIXED);
    assert!(sandbox.join("test_calc.py").is_file());
    assert_eq!(tests.targets(), vec![sandbox.join("test_calc.py")]);

    let entries = ws.log.entries().expect("entries");
    let actions: Vec<_> = entries
        .iter()
        .map(|entry| (entry.agent.as_str(), entry.action))
        .collect();
    assert_eq!(
        actions,
        vec![
            ("Auditor_Agent", Action::Analysis),
            ("Fixer_Agent", Action::Fix),
            ("Judge_Agent", Action::Generation),
            ("Judge_Agent", Action::Analysis),
        ]
    );
    assert!(entries.iter().all(|entry| entry.status == Status::Success));
    assert!(entries.iter().all(|entry| entry.model_identifier == "scripted-model"));
    assert_eq!(entries[0].details["quality_score_before"], 4.0);
    assert_eq!(entries[3].details["score_before"], 0.0);
    assert_eq!(entries[3].details["score_after"], 8.0);
}

#[test]
fn collaborator_outage_falls_back_to_static_analysis() {
    let ws = TestWorkspace::new();
    let original = ws.write_target("calc.py", BUGGY);
    let reasoner = ScriptedReasoner::with_replies(vec![Reply::Fail("quota exceeded".to_string())]);
    let analyzer = ScriptedAnalyzer::constant(5.0, "calc.py:2:0: W0101: suspicious subtraction");
    let tests = ScriptedTestRunner::failing("E   assert -1 == 3");

    let mut orchestrator = Orchestrator::new(bench(&ws, &reasoner, &analyzer, &tests));
    let report = orchestrator.run(&[original], |_| {});

    // No test module could be generated, so the round is judged on the score
    // alone by the deterministic fallback rule.
    let file = &report.files[0];
    assert_eq!(file.outcome(), TerminalState::Passed);
    assert_eq!(file.task.iteration_count, 1);
    assert_eq!(tests.runs(), 0);

    // Identity fix: the sandbox copy is the unmodified source.
    assert_eq!(
        fs::read_to_string(ws.sandbox.root().join("calc.py")).expect("read sandbox copy"),
        BUGGY
    );
    assert!(!ws.sandbox.root().join("test_calc.py").exists());

    let entries = ws.log.entries().expect("entries");
    let actions: Vec<_> = entries.iter().map(|entry| entry.action).collect();
    assert_eq!(
        actions,
        vec![Action::Analysis, Action::Fix, Action::Generation, Action::Analysis]
    );
    assert!(entries.iter().all(|entry| entry.status == Status::Failure));
    for entry in &entries {
        let err = entry.details["collaborator_error"].as_str().expect("collaborator_error");
        assert!(err.contains("quota exceeded") || err.contains("no scripted reply"), "{err}");
    }
}

#[test]
fn failing_tests_are_retried_until_the_cap() {
    let ws = TestWorkspace::new();
    let original = ws.write_target("calc.py", BUGGY);
    let fail = concat!(
        r#"{"outcome": "FAIL", "tests_passed": false, "#,
        r#""details": "still subtracts", "next_action": "RETRY"}"#
    );
    let diagnosis = concat!(
        r#"{"error_type": "AssertionError", "root_cause": "uses -", "#,
        r#""affected_lines": [2], "fix_strategy": "use +"}"#
    );
    let reasoner = ScriptedReasoner::new([
        AUDIT, BUGGY, TESTS, fail, diagnosis, BUGGY, fail, diagnosis, BUGGY, fail,
    ]);
    let analyzer = ScriptedAnalyzer::constant(6.0, "");
    let tests = ScriptedTestRunner::failing("E   assert -1 == 3");

    let mut orchestrator = Orchestrator::new(bench(&ws, &reasoner, &analyzer, &tests));
    let report = orchestrator.run(&[original], |_| {});

    let file = &report.files[0];
    assert_eq!(file.outcome(), TerminalState::Exhausted);
    assert_eq!(file.task.iteration_count, 3);
    assert_eq!(tests.runs(), 3);
    assert!(!report.succeeded());

    let entries = ws.log.entries().expect("entries");
    let count = |action| entries.iter().filter(|entry| entry.action == action).count();
    assert_eq!(count(Action::Analysis), 4);
    assert_eq!(count(Action::Generation), 1);
    assert_eq!(count(Action::Debug), 2);
    assert_eq!(count(Action::Fix), 3);
    // Every retry overwrote the same sandboxed file.
    let files: Vec<_> = fs::read_dir(ws.sandbox.root())
        .expect("read sandbox")
        .map(|entry| entry.expect("entry").file_name())
        .collect();
    assert_eq!(files.len(), 2);
}
