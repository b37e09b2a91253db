//! Fixer: rewrites a file from an audit report or from a failure trace.
//!
//! Mode selection is pure data. Feedback carrying `error_logs` is a retry: the
//! trace is first diagnosed (`DEBUG`) and the diagnosis then drives the rewrite
//! (`FIX`). Otherwise the audit issues drive a single `FIX`. When the
//! collaborator fails, the rewrite is the unmodified input.

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::core::text::truncate_chars;
use crate::core::types::{Diagnostic, Feedback};
use crate::io::experiment_log::{Action, Details, ExperimentLog, LogRecord, Status, details};
use crate::io::prompt::PromptEngine;
use crate::io::reasoner::Reasoner;
use crate::io::sandbox::{Sandbox, read_source};

use super::{
    ExcerptLimits, FIXER_AGENT, NamedSource, code_response, consult, insert_collaborator_error,
    parse_structured,
};

const FIXER_SYSTEM_PROMPT: &str = "You are an expert software engineer. Rewrite the file so \
every function does what its name promises. Return the complete file only, with no \
explanation and no fenced block.";

const DEBUG_SYSTEM_PROMPT: &str = "You are a debugging expert. Read the failure trace and the \
source, find the root cause, and answer with strict JSON only.";

const RETRY_SYSTEM_PROMPT: &str = "You are an expert software engineer. Apply the given \
diagnosis to the source. Return the complete corrected file only, with no explanation and \
no fenced block.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixMode {
    FirstFix,
    Retry,
}

impl FixMode {
    pub fn select(feedback: &Feedback) -> Self {
        if feedback.error_logs.is_some() {
            FixMode::Retry
        } else {
            FixMode::FirstFix
        }
    }
}

pub struct Fixer<'a, R> {
    reasoner: &'a R,
    log: &'a ExperimentLog,
    prompts: &'a PromptEngine,
    sandbox: &'a Sandbox,
    limits: ExcerptLimits,
}

impl<'a, R: Reasoner> Fixer<'a, R> {
    pub fn new(
        reasoner: &'a R,
        log: &'a ExperimentLog,
        prompts: &'a PromptEngine,
        sandbox: &'a Sandbox,
        limits: ExcerptLimits,
    ) -> Self {
        Self {
            reasoner,
            log,
            prompts,
            sandbox,
            limits,
        }
    }

    /// Rewrite `path` according to `feedback` and return the sandboxed result path.
    ///
    /// A missing input is [`MissingFile`](crate::error::RepairError::MissingFile).
    /// Collaborator failures never surface; the file is then written back unchanged.
    #[instrument(skip_all, fields(path = %path.display()))]
    pub fn fix(&self, path: &Path, feedback: &Feedback) -> Result<PathBuf> {
        let source = read_source(path)?;
        let named = NamedSource::new(path, &source)?;

        let corrected = match (FixMode::select(feedback), feedback.error_logs.as_deref()) {
            (FixMode::Retry, Some(trace)) => {
                info!("retry fix: diagnosing failure trace");
                let diagnostic = self.diagnose(path, &named, trace)?;
                self.fix_with_diagnostic(path, &named, &diagnostic, trace)?
            }
            _ => {
                info!(issues = feedback.issues.len(), "first fix");
                self.fix_with_issues(path, &named, feedback)?
            }
        };

        self.write_corrected(path, &corrected)
    }

    /// Debug phase. Falls back to [`Diagnostic::unavailable`].
    fn diagnose(&self, path: &Path, named: &NamedSource<'_>, trace: &str) -> Result<Diagnostic> {
        let prompt = self.prompts.render_debug(named.view(), trace)?;
        let (output_response, outcome) = consult(
            self.reasoner,
            DEBUG_SYSTEM_PROMPT,
            &prompt,
            parse_structured::<Diagnostic>,
        );
        let (diagnostic, failure) = match outcome {
            Ok(diagnostic) => (diagnostic, None),
            Err(reason) => {
                warn!(reason = %reason, "diagnosis unavailable");
                (Diagnostic::unavailable(), Some(reason))
            }
        };
        debug!(
            error_kind = %diagnostic.error_kind,
            root_cause = %diagnostic.root_cause,
            "diagnosis"
        );

        let mut entry = details(&prompt, &output_response);
        entry.insert("file_debugged".to_string(), Value::from(path.display().to_string()));
        entry.insert(
            "trace_excerpt".to_string(),
            Value::from(truncate_chars(trace, self.limits.log_chars)),
        );
        entry.insert("diagnostic".to_string(), serde_json::to_value(&diagnostic)?);
        insert_collaborator_error(&mut entry, failure.as_deref());
        self.append(Action::Debug, entry, failure.is_none())?;
        Ok(diagnostic)
    }

    fn fix_with_diagnostic(
        &self,
        path: &Path,
        named: &NamedSource<'_>,
        diagnostic: &Diagnostic,
        trace: &str,
    ) -> Result<String> {
        let excerpt = truncate_chars(trace, self.limits.trace_chars);
        let prompt = self.prompts.render_retry_fix(named.view(), diagnostic, excerpt)?;
        let mut extra = Details::new();
        extra.insert("diagnostic_used".to_string(), serde_json::to_value(diagnostic)?);
        self.rewrite(path, named, RETRY_SYSTEM_PROMPT, &prompt, true, extra)
    }

    fn fix_with_issues(
        &self,
        path: &Path,
        named: &NamedSource<'_>,
        feedback: &Feedback,
    ) -> Result<String> {
        let prompt = self.prompts.render_first_fix(named.view(), feedback)?;
        let ids: Vec<u32> = feedback.issues.iter().map(|issue| issue.id).collect();
        let mut extra = Details::new();
        extra.insert("issues_addressed".to_string(), Value::from(ids));
        self.rewrite(path, named, FIXER_SYSTEM_PROMPT, &prompt, false, extra)
    }

    /// Fix phase shared by both modes. Returns the input unchanged on failure.
    fn rewrite(
        &self,
        path: &Path,
        named: &NamedSource<'_>,
        system_prompt: &str,
        prompt: &str,
        is_retry: bool,
        extra: Details,
    ) -> Result<String> {
        let (output_response, outcome) =
            consult(self.reasoner, system_prompt, prompt, code_response);
        let (corrected, failure) = match outcome {
            Ok(code) => (code, None),
            Err(reason) => {
                warn!(reason = %reason, "rewrite unavailable, keeping source unchanged");
                (named.source.to_string(), Some(reason))
            }
        };

        let mut entry = details(prompt, &output_response);
        entry.insert("file_fixed".to_string(), Value::from(path.display().to_string()));
        entry.insert("is_retry".to_string(), Value::from(is_retry));
        entry.extend(extra);
        entry.insert(
            "code_length_before".to_string(),
            Value::from(named.source.chars().count()),
        );
        entry.insert("code_length_after".to_string(), Value::from(corrected.chars().count()));
        insert_collaborator_error(&mut entry, failure.as_deref());
        self.append(Action::Fix, entry, failure.is_none())?;
        Ok(corrected)
    }

    /// Write under the sandbox, keeping the file name so repeated passes overwrite.
    ///
    /// A failed direct write is retried at the default sandboxed location.
    fn write_corrected(&self, path: &Path, code: &str) -> Result<PathBuf> {
        let default = self.sandbox.default_path(path)?;
        let target = if self.sandbox.contains(path) {
            path.to_path_buf()
        } else {
            default.clone()
        };
        match self.sandbox.write(&target, code) {
            Ok(written) => {
                info!(path = %written.display(), "corrected file written");
                Ok(written)
            }
            Err(err) if target != default => {
                warn!(
                    target = %target.display(),
                    err = %format!("{err:#}"),
                    "direct write failed, retrying at default sandbox location"
                );
                self.sandbox.write(&default, code)
            }
            Err(err) => Err(err),
        }
    }

    fn append(&self, action: Action, entry: Details, ok: bool) -> Result<()> {
        self.log.append(LogRecord {
            agent: FIXER_AGENT,
            model_identifier: self.reasoner.model_identifier(),
            action,
            details: entry,
            status: Status::from_success(ok),
        })?;
        Ok(())
    }
}
