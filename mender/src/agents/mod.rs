//! The three repair roles: Auditor, Fixer, Judge.
//!
//! Agents convert every collaborator or tool failure into a degraded,
//! well-formed result and record each collaborator interaction in the
//! experiment log. The only errors they return are infrastructure failures.

use std::path::Path;

use anyhow::{Result, anyhow};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::core::text::{clean_code_response, extract_fenced};
use crate::error::RepairError;
use crate::io::config::MenderConfig;
use crate::io::experiment_log::Details;
use crate::io::prompt::SourceView;
use crate::io::reasoner::Reasoner;

pub mod auditor;
pub mod fixer;
pub mod judge;

pub const AUDITOR_AGENT: &str = "Auditor_Agent";
pub const FIXER_AGENT: &str = "Fixer_Agent";
pub const JUDGE_AGENT: &str = "Judge_Agent";

/// Character budgets applied to text sent to the collaborator or logged.
#[derive(Debug, Clone, Copy)]
pub struct ExcerptLimits {
    pub diagnostic_chars: usize,
    pub log_chars: usize,
    pub trace_chars: usize,
}

impl ExcerptLimits {
    pub fn from_config(config: &MenderConfig) -> Self {
        Self {
            diagnostic_chars: config.diagnostic_excerpt_chars,
            log_chars: config.log_excerpt_chars,
            trace_chars: config.trace_excerpt_chars,
        }
    }
}

impl Default for ExcerptLimits {
    fn default() -> Self {
        Self::from_config(&MenderConfig::default())
    }
}

/// Parse a structured collaborator response, tolerating one surrounding fence.
pub(crate) fn parse_structured<T: DeserializeOwned>(response: &str) -> Result<T> {
    let body = extract_fenced(response);
    serde_json::from_str(&body)
        .map_err(|err| RepairError::MalformedResponse(err.to_string()).into())
}

/// Clean a code response, treating an empty result as malformed.
pub(crate) fn code_response(response: &str) -> Result<String> {
    clean_code_response(response).ok_or_else(|| {
        RepairError::MalformedResponse("response contained no code".to_string()).into()
    })
}

/// Call the collaborator and interpret its answer.
///
/// Returns the text to log as `output_response` (the response, or the failure
/// reason) and either the interpreted value or a printable failure reason.
pub(crate) fn consult<R: Reasoner, T>(
    reasoner: &R,
    system_prompt: &str,
    prompt: &str,
    interpret: impl FnOnce(&str) -> Result<T>,
) -> (String, std::result::Result<T, String>) {
    match reasoner.call(system_prompt, prompt) {
        Ok(response) => {
            let outcome = interpret(&response).map_err(|err| format!("{err:#}"));
            (response, outcome)
        }
        Err(err) => {
            let reason = format!("{err:#}");
            (reason.clone(), Err(reason))
        }
    }
}

/// A source file with the name and fence language derived from its path.
pub(crate) struct NamedSource<'a> {
    pub file_name: String,
    pub language: String,
    pub source: &'a str,
}

impl<'a> NamedSource<'a> {
    pub fn new(path: &Path, source: &'a str) -> Result<Self> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| anyhow!("no file name in {}", path.display()))?
            .to_string();
        let language = path
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or_default()
            .to_string();
        Ok(Self {
            file_name,
            language,
            source,
        })
    }

    pub fn view(&self) -> SourceView<'_> {
        SourceView {
            file_name: &self.file_name,
            language: &self.language,
            source: self.source,
        }
    }
}

/// Record the collaborator failure (if any) under `collaborator_error`.
pub(crate) fn insert_collaborator_error(details: &mut Details, error: Option<&str>) {
    let value = error.map_or(Value::Null, Value::from);
    details.insert("collaborator_error".to_string(), value);
}
