//! Static-analysis and dynamic-test tool adapters.
//!
//! Both tools degrade instead of failing: a timeout or a missing executable
//! becomes a zero score or a failed test run with an explanatory message.

use std::path::Path;
use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::error::RepairError;
use crate::io::config::ToolConfig;
use crate::io::process::{ProcessLimits, ProcessOutput, run_command};

static SCORE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)rated at\s+(-?\d+(?:\.\d+)?)\s*/\s*10").expect("score regex should compile")
});

/// Result of one static-analysis run.
#[derive(Debug, Clone, PartialEq)]
pub struct LintReport {
    /// Quality score in [0, 10].
    pub score: f64,
    pub messages: String,
}

impl LintReport {
    pub fn timeout() -> Self {
        Self {
            score: 0.0,
            messages: "Timeout".to_string(),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            score: 0.0,
            messages: format!("static analysis tool unavailable: {reason}"),
        }
    }
}

/// Result of one dynamic test run. A failing run is a normal outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct TestRun {
    pub passed: bool,
    pub output: String,
}

impl TestRun {
    pub fn timeout() -> Self {
        Self {
            passed: false,
            output: "Timeout".to_string(),
        }
    }

    pub fn unavailable(reason: &str) -> Self {
        Self {
            passed: false,
            output: format!("test tool unavailable: {reason}"),
        }
    }
}

pub trait StaticAnalyzer {
    fn run(&self, path: &Path) -> Result<LintReport>;
}

pub trait TestRunner {
    fn run(&self, target: &Path) -> Result<TestRun>;
}

/// Extract the last `rated at X/10` figure, clamped to [0, 10].
pub fn parse_score(output: &str) -> Option<f64> {
    SCORE_RE
        .captures_iter(output)
        .last()
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .map(|score| score.clamp(0.0, 10.0))
}

#[derive(Debug, Clone)]
pub struct CommandAnalyzer {
    command: Vec<String>,
    limits: ProcessLimits,
}

impl CommandAnalyzer {
    pub fn new(config: &ToolConfig, limits: ProcessLimits) -> Self {
        Self {
            command: config.command.clone(),
            limits,
        }
    }
}

impl StaticAnalyzer for CommandAnalyzer {
    #[instrument(skip_all, fields(path = %path.display()))]
    fn run(&self, path: &Path) -> Result<LintReport> {
        let output = match run_tool(&self.command, path, self.limits) {
            Ok(output) => output,
            Err(err) => return degrade(err, LintReport::timeout, LintReport::unavailable),
        };
        let messages = output.combined_text();
        // Lint tools exit non-zero whenever they report messages; only the score matters.
        let score = parse_score(&messages).unwrap_or(0.0);
        debug!(score, "static analysis finished");
        Ok(LintReport { score, messages })
    }
}

#[derive(Debug, Clone)]
pub struct CommandTestRunner {
    command: Vec<String>,
    limits: ProcessLimits,
}

impl CommandTestRunner {
    pub fn new(config: &ToolConfig, limits: ProcessLimits) -> Self {
        Self {
            command: config.command.clone(),
            limits,
        }
    }
}

impl TestRunner for CommandTestRunner {
    #[instrument(skip_all, fields(target = %target.display()))]
    fn run(&self, target: &Path) -> Result<TestRun> {
        let output = match run_tool(&self.command, target, self.limits) {
            Ok(output) => output,
            Err(err) => return degrade(err, TestRun::timeout, TestRun::unavailable),
        };
        let passed = output.success();
        debug!(passed, "tests finished");
        Ok(TestRun {
            passed,
            output: output.combined_text(),
        })
    }
}

/// Run the tool on `target`. A timeout is [`RepairError::ToolTimeout`].
fn run_tool(command: &[String], target: &Path, limits: ProcessLimits) -> Result<ProcessOutput> {
    let mut argv = command.to_vec();
    argv.push(target.display().to_string());
    let output = run_command(&argv, None, limits)?;
    if output.timed_out {
        return Err(RepairError::ToolTimeout(limits.timeout).into());
    }
    Ok(output)
}

/// Turn a tool timeout or missing tool into its degraded result.
fn degrade<T>(
    err: anyhow::Error,
    on_timeout: impl FnOnce() -> T,
    on_unavailable: impl FnOnce(&str) -> T,
) -> Result<T> {
    match err.downcast_ref::<RepairError>() {
        Some(RepairError::ToolTimeout(after)) => {
            warn!(timeout_secs = after.as_secs(), "tool timed out");
            Ok(on_timeout())
        }
        Some(RepairError::ToolUnavailable(reason)) => {
            warn!(reason = %reason, "tool unavailable");
            Ok(on_unavailable(reason))
        }
        _ => Err(err),
    }
}
