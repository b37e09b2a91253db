//! Automated code-repair CLI.
//!
//! Repairs every eligible source file in `--target-dir`, writing corrected
//! files and generated tests only under the configured sandbox and recording
//! every collaborator exchange in the experiment log.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use clap::Parser;
use mender::agents::ExcerptLimits;
use mender::exit_codes;
use mender::io::config::{DEFAULT_CONFIG_PATH, MenderConfig, load_config};
use mender::io::discovery::list_eligible_files;
use mender::io::experiment_log::ExperimentLog;
use mender::io::prompt::PromptEngine;
use mender::io::reasoner::CommandReasoner;
use mender::io::sandbox::Sandbox;
use mender::io::tools::{CommandAnalyzer, CommandTestRunner};
use mender::logging;
use mender::orchestrator::{Orchestrator, Progress, RunReport, Workbench};
use tracing::info;

#[derive(Parser)]
#[command(
    name = "mender",
    version,
    about = "Audit, fix and test every source file in a directory"
)]
struct Cli {
    /// Directory holding the files to repair.
    #[arg(long = "target-dir", alias = "target_dir")]
    target_dir: PathBuf,
    /// TOML configuration file; defaults apply when it does not exist.
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::FAILED);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(&cli.config)?;
    if !cli.target_dir.is_dir() {
        bail!("target directory {} does not exist", cli.target_dir.display());
    }

    let files = list_eligible_files(&cli.target_dir, &config.extensions, &config.test_prefix)?;
    if files.is_empty() {
        println!("No eligible files in {}", cli.target_dir.display());
        return Ok(exit_codes::OK);
    }
    info!(count = files.len(), dir = %cli.target_dir.display(), "starting run");

    let report = repair(&config, &files)?;
    print_summary(&report);
    Ok(if report.succeeded() {
        exit_codes::OK
    } else {
        exit_codes::FAILED
    })
}

fn repair(config: &MenderConfig, files: &[PathBuf]) -> Result<RunReport> {
    let sandbox = Sandbox::open(&config.sandbox_dir)?;
    let log = ExperimentLog::open(&config.log_path)?;
    let prompts = PromptEngine::new();
    let reasoner = CommandReasoner::new(&config.reasoner, config.reasoner_limits());
    let analyzer = CommandAnalyzer::new(&config.lint, config.lint_limits());
    let tests = CommandTestRunner::new(&config.tests, config.test_limits());

    let mut orchestrator = Orchestrator::new(Workbench {
        reasoner: &reasoner,
        analyzer: &analyzer,
        tests: &tests,
        log: &log,
        prompts: &prompts,
        sandbox: &sandbox,
        limits: ExcerptLimits::from_config(config),
        test_prefix: &config.test_prefix,
    });
    Ok(orchestrator.run(files, print_progress))
}

fn print_progress(event: Progress<'_>) {
    match event {
        Progress::Started { index, total, path } => {
            println!("[{index}/{total}] {}", display_name(path));
        }
        Progress::Round {
            round,
            passed,
            score,
            ..
        } => {
            let verdict = if passed { "PASS" } else { "FAIL" };
            match score {
                Some(score) => println!("  round {round}: {verdict} (score {score:.2}/10)"),
                None => println!("  round {round}: {verdict}"),
            }
        }
        Progress::Finished { report, .. } => {
            let outcome = report.outcome().as_str();
            match &report.task.error {
                Some(err) => println!("  -> {outcome}: {err}"),
                None => println!("  -> {outcome} after {} round(s)", report.task.iteration_count),
            }
        }
    }
}

fn print_summary(report: &RunReport) {
    println!();
    println!(
        "Processed {} file(s): {} passed, {} failed",
        report.files.len(),
        report.passed(),
        report.failed()
    );
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}
