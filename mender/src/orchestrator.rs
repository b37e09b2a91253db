//! Per-file repair loop and batch aggregation.
//!
//! Each file goes Audit -> Fix -> {Test -> Verdict -> (stop | Fix again)} for
//! at most [`MAX_TEST_ROUNDS`] rounds. Files are processed sequentially. An
//! error inside one file's pipeline marks that file `ERRORED` and the batch
//! moves on.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use tracing::{error, info, info_span, warn};

use crate::agents::ExcerptLimits;
use crate::agents::auditor::Auditor;
use crate::agents::fixer::Fixer;
use crate::agents::judge::{Judge, RunMemo};
use crate::core::retry::{FileTask, MAX_TEST_ROUNDS, RoundDecision, TerminalState};
use crate::core::types::Feedback;
use crate::io::experiment_log::ExperimentLog;
use crate::io::prompt::PromptEngine;
use crate::io::reasoner::Reasoner;
use crate::io::sandbox::Sandbox;
use crate::io::tools::{StaticAnalyzer, TestRunner};

/// Everything the agents of one run share.
pub struct Workbench<'a, R, A, T> {
    pub reasoner: &'a R,
    pub analyzer: &'a A,
    pub tests: &'a T,
    pub log: &'a ExperimentLog,
    pub prompts: &'a PromptEngine,
    pub sandbox: &'a Sandbox,
    pub limits: ExcerptLimits,
    pub test_prefix: &'a str,
}

/// Outcome of one file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileReport {
    pub task: FileTask,
    /// Quality score measured in the last judged round.
    pub final_score: Option<f64>,
}

impl FileReport {
    pub fn passed(&self) -> bool {
        self.task.passed()
    }

    pub fn outcome(&self) -> TerminalState {
        self.task
            .terminal_state()
            .unwrap_or(TerminalState::Errored)
    }
}

/// Aggregate result of a batch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunReport {
    pub files: Vec<FileReport>,
}

impl RunReport {
    pub fn passed(&self) -> usize {
        self.files.iter().filter(|file| file.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.files.len() - self.passed()
    }

    /// Success iff at least one file passed or there was nothing to process.
    pub fn succeeded(&self) -> bool {
        self.files.is_empty() || self.passed() > 0
    }
}

/// Progress notifications for the CLI.
#[derive(Debug, Clone, Copy)]
pub enum Progress<'r> {
    Started {
        index: usize,
        total: usize,
        path: &'r Path,
    },
    Round {
        path: &'r Path,
        round: u32,
        passed: bool,
        score: Option<f64>,
    },
    Finished {
        index: usize,
        total: usize,
        report: &'r FileReport,
    },
}

pub struct Orchestrator<'a, R, A, T> {
    auditor: Auditor<'a, R, A>,
    fixer: Fixer<'a, R>,
    judge: Judge<'a, R, A, T>,
    memo: RunMemo,
}

impl<'a, R: Reasoner, A: StaticAnalyzer, T: TestRunner> Orchestrator<'a, R, A, T> {
    pub fn new(bench: Workbench<'a, R, A, T>) -> Self {
        Self {
            auditor: Auditor::new(
                bench.reasoner,
                bench.analyzer,
                bench.log,
                bench.prompts,
                bench.limits,
            ),
            fixer: Fixer::new(
                bench.reasoner,
                bench.log,
                bench.prompts,
                bench.sandbox,
                bench.limits,
            ),
            judge: Judge::new(
                bench.reasoner,
                bench.analyzer,
                bench.tests,
                bench.log,
                bench.prompts,
                bench.sandbox,
                bench.limits,
                bench.test_prefix,
            ),
            memo: RunMemo::new(),
        }
    }

    /// Process `files` in order. Never fails; per-file errors are recorded.
    pub fn run<F: FnMut(Progress<'_>)>(
        &mut self,
        files: &[PathBuf],
        mut on_progress: F,
    ) -> RunReport {
        self.memo.reset();
        let total = files.len();
        let mut report = RunReport::default();
        for (index, path) in files.iter().enumerate() {
            on_progress(Progress::Started {
                index: index + 1,
                total,
                path,
            });
            let file = self.process_file(path, &mut on_progress);
            on_progress(Progress::Finished {
                index: index + 1,
                total,
                report: &file,
            });
            report.files.push(file);
        }
        info!(
            total,
            passed = report.passed(),
            failed = report.failed(),
            "run complete"
        );
        report
    }

    /// Run one file's pipeline inside a failure boundary.
    pub fn process_file<F: FnMut(Progress<'_>)>(
        &mut self,
        path: &Path,
        on_progress: &mut F,
    ) -> FileReport {
        let _span = info_span!("file", path = %path.display()).entered();
        let mut task = FileTask::new(path);
        let mut final_score = None;

        if let Err(err) = self.drive(&mut task, &mut final_score, on_progress) {
            error!(err = %format!("{err:#}"), "file pipeline aborted");
            task.mark_errored(format!("{err:#}"));
        }

        info!(outcome = ?task.terminal_state(), rounds = task.iteration_count, "file done");
        FileReport { task, final_score }
    }

    fn drive<F: FnMut(Progress<'_>)>(
        &mut self,
        task: &mut FileTask,
        final_score: &mut Option<f64>,
        on_progress: &mut F,
    ) -> Result<()> {
        let report = self.auditor.analyze(&task.path)?;
        task.mark_audited();

        let corrected = self.fixer.fix(&task.path, &Feedback::from_report(&report))?;
        task.mark_fixed(corrected);

        loop {
            let round = task
                .begin_round()
                .ok_or_else(|| anyhow!("round budget of {MAX_TEST_ROUNDS} already spent"))?;
            let current = task
                .current_corrected_path
                .clone()
                .ok_or_else(|| anyhow!("no corrected file to judge"))?;

            let outcome = self.judge.run_tests(&mut self.memo, Some(&current))?;
            let score = outcome.verdict.as_ref().map(|verdict| verdict.quality_score_after);
            if score.is_some() {
                *final_score = score;
            }
            on_progress(Progress::Round {
                path: &task.path,
                round,
                passed: outcome.passed,
                score,
            });

            match task.finish_round(outcome.passed) {
                RoundDecision::Stop(TerminalState::Passed) => {
                    info!(round, "file passed");
                    return Ok(());
                }
                RoundDecision::Stop(outcome) => {
                    warn!(round, ?outcome, "round budget exhausted");
                    return Ok(());
                }
                RoundDecision::Retry => {
                    info!(round, "verdict FAIL, retrying fix");
                    let corrected = self.fixer.fix(&current, &outcome.feedback)?;
                    task.mark_fixed(corrected);
                }
            }
        }
    }
}
