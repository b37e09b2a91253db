//! Test-only helpers: scripted collaborators and a scratch workspace.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use tempfile::TempDir;

use crate::error::RepairError;
use crate::io::experiment_log::ExperimentLog;
use crate::io::prompt::PromptEngine;
use crate::io::reasoner::Reasoner;
use crate::io::sandbox::Sandbox;
use crate::io::tools::{LintReport, StaticAnalyzer, TestRun, TestRunner};

/// One scripted collaborator answer.
#[derive(Debug, Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
}

/// Reasoner that replays a fixed script, then fails once it runs out.
pub struct ScriptedReasoner {
    replies: RefCell<VecDeque<Reply>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedReasoner {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::with_replies(replies.into_iter().map(|text| Reply::Text(text.into())).collect())
    }

    pub fn with_replies(replies: Vec<Reply>) -> Self {
        Self {
            replies: RefCell::new(replies.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    /// A collaborator that is always down.
    pub fn failing() -> Self {
        Self::with_replies(Vec::new())
    }

    pub fn calls(&self) -> usize {
        self.prompts.borrow().len()
    }

    /// User prompts received so far, in order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Reasoner for ScriptedReasoner {
    fn model_identifier(&self) -> &str {
        "scripted-model"
    }

    fn call(&self, _system_prompt: &str, user_prompt: &str) -> Result<String> {
        self.prompts.borrow_mut().push(user_prompt.to_string());
        match self.replies.borrow_mut().pop_front() {
            Some(Reply::Text(text)) => Ok(text),
            Some(Reply::Fail(reason)) => Err(RepairError::CollaboratorFailure(reason).into()),
            None => Err(RepairError::CollaboratorFailure("no scripted reply".to_string()).into()),
        }
    }
}

/// Static analyzer returning scripted scores; the last score repeats.
pub struct ScriptedAnalyzer {
    scores: RefCell<VecDeque<f64>>,
    messages: Option<String>,
    runs: RefCell<usize>,
}

impl ScriptedAnalyzer {
    pub fn constant(score: f64, messages: &str) -> Self {
        Self {
            scores: RefCell::new(VecDeque::from([score])),
            messages: Some(messages.to_string()),
            runs: RefCell::new(0),
        }
    }

    /// Successive scores, with messages in the usual `rated at` form.
    pub fn sequence<I: IntoIterator<Item = f64>>(scores: I) -> Self {
        Self {
            scores: RefCell::new(scores.into_iter().collect()),
            messages: None,
            runs: RefCell::new(0),
        }
    }

    pub fn runs(&self) -> usize {
        *self.runs.borrow()
    }
}

impl StaticAnalyzer for ScriptedAnalyzer {
    fn run(&self, _path: &Path) -> Result<LintReport> {
        *self.runs.borrow_mut() += 1;
        let mut scores = self.scores.borrow_mut();
        let score = if scores.len() > 1 {
            scores.pop_front().unwrap_or_default()
        } else {
            scores.front().copied().unwrap_or_default()
        };
        let messages = self
            .messages
            .clone()
            .unwrap_or_else(|| format!("Your code has been rated at {score:.2}/10"));
        Ok(LintReport { score, messages })
    }
}

/// Test runner returning scripted results; the last result repeats.
pub struct ScriptedTestRunner {
    results: RefCell<VecDeque<TestRun>>,
    targets: RefCell<Vec<PathBuf>>,
}

impl ScriptedTestRunner {
    pub fn with_results(results: Vec<TestRun>) -> Self {
        Self {
            results: RefCell::new(results.into()),
            targets: RefCell::new(Vec::new()),
        }
    }

    pub fn passing() -> Self {
        Self::with_results(vec![TestRun {
            passed: true,
            output: "1 passed".to_string(),
        }])
    }

    pub fn failing(output: &str) -> Self {
        Self::with_results(vec![TestRun {
            passed: false,
            output: output.to_string(),
        }])
    }

    pub fn runs(&self) -> usize {
        self.targets.borrow().len()
    }

    pub fn targets(&self) -> Vec<PathBuf> {
        self.targets.borrow().clone()
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, target: &Path) -> Result<TestRun> {
        self.targets.borrow_mut().push(target.to_path_buf());
        let mut results = self.results.borrow_mut();
        let result = if results.len() > 1 {
            results.pop_front()
        } else {
            results.front().cloned()
        };
        Ok(result.unwrap_or_else(|| TestRun {
            passed: true,
            output: String::new(),
        }))
    }
}

/// Scratch layout: `target/` for inputs, `sandbox/`, and `logs/experiment_data.json`.
pub struct TestWorkspace {
    _temp: TempDir,
    root: PathBuf,
    pub sandbox: Sandbox,
    pub log: ExperimentLog,
    pub prompts: PromptEngine,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        fs::create_dir_all(root.join("target")).expect("create target dir");
        let sandbox = Sandbox::open(root.join("sandbox")).expect("open sandbox");
        let log = ExperimentLog::open(root.join("logs/experiment_data.json")).expect("open log");
        Self {
            _temp: temp,
            root,
            sandbox,
            log,
            prompts: PromptEngine::new(),
        }
    }

    pub fn target_dir(&self) -> PathBuf {
        self.root.join("target")
    }

    pub fn write_target(&self, name: &str, contents: &str) -> PathBuf {
        let path = self.target_dir().join(name);
        fs::write(&path, contents).expect("write target file");
        path
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}
