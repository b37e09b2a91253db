//! Append-only experiment log (`logs/experiment_data.json`).
//!
//! Each collaborator interaction becomes one entry. Entries are validated against
//! the embedded v1 schema before any file I/O, so a malformed entry never touches
//! the log. Appends rewrite the whole JSON array; there must be a single writer.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use chrono::Utc;
use jsonschema::{Validator, validator_for};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::RepairError;

const LOG_ENTRY_SCHEMA: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/../schemas/experiment_log/v1.schema.json"
));

/// What kind of collaborator interaction an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Action {
    Analysis,
    Generation,
    Debug,
    Fix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Success,
    Failure,
}

impl Status {
    pub fn from_success(ok: bool) -> Self {
        if ok {
            Status::Success
        } else {
            Status::Failure
        }
    }
}

/// Free-form entry details. Must carry `input_prompt` and `output_response`.
pub type Details = Map<String, Value>;

/// Start a details record with the two required keys.
pub fn details(input_prompt: &str, output_response: &str) -> Details {
    let mut map = Map::new();
    map.insert("input_prompt".to_string(), Value::from(input_prompt));
    map.insert("output_response".to_string(), Value::from(output_response));
    map
}

/// A persisted log entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub timestamp: String,
    pub agent: String,
    pub model_identifier: String,
    pub action: Action,
    pub details: Details,
    pub status: Status,
}

/// Caller-supplied part of an entry; id and timestamp are assigned on append.
#[derive(Debug, Clone)]
pub struct LogRecord<'a> {
    pub agent: &'a str,
    pub model_identifier: &'a str,
    pub action: Action,
    pub details: Details,
    pub status: Status,
}

pub struct ExperimentLog {
    path: PathBuf,
    validator: Validator,
}

impl ExperimentLog {
    /// Prepare a log at `path`. The file is created on first append.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let schema: Value =
            serde_json::from_str(LOG_ENTRY_SCHEMA).context("parse experiment log schema")?;
        let validator =
            validator_for(&schema).map_err(|err| anyhow!("invalid log schema: {}", err))?;
        Ok(Self {
            path: path.into(),
            validator,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Validate and append one entry. Returns the entry as written.
    pub fn append(&self, record: LogRecord<'_>) -> Result<LogEntry> {
        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now().to_rfc3339(),
            agent: record.agent.to_string(),
            model_identifier: record.model_identifier.to_string(),
            action: record.action,
            details: record.details,
            status: record.status,
        };
        let value = serde_json::to_value(&entry).context("serialize log entry")?;
        self.validate(&value)?;

        let mut entries = load_raw_entries(&self.path);
        entries.push(value);
        write_entries(&self.path, &entries)?;
        debug!(
            id = %entry.id,
            agent = %entry.agent,
            action = ?entry.action,
            status = ?entry.status,
            total = entries.len(),
            "appended log entry"
        );
        Ok(entry)
    }

    /// Read back all entries. A missing or corrupt log reads as empty.
    pub fn entries(&self) -> Result<Vec<LogEntry>> {
        load_raw_entries(&self.path)
            .into_iter()
            .map(|value| serde_json::from_value(value).context("parse log entry"))
            .collect()
    }

    fn validate(&self, value: &Value) -> Result<()> {
        if self.validator.is_valid(value) {
            return Ok(());
        }
        let messages = self
            .validator
            .iter_errors(value)
            .map(|err| err.to_string())
            .collect::<Vec<_>>();
        Err(RepairError::InvalidLogEntry(messages.join("; ")).into())
    }
}

fn load_raw_entries(path: &Path) -> Vec<Value> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return Vec::new(),
    };
    if contents.trim().is_empty() {
        return Vec::new();
    }
    match serde_json::from_str::<Value>(&contents) {
        Ok(Value::Array(entries)) => entries,
        Ok(_) => {
            warn!(path = %path.display(), "experiment log is not an array, starting fresh");
            Vec::new()
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "experiment log is corrupt, starting fresh");
            Vec::new()
        }
    }
}

/// Atomically replace the log (temp file + rename).
fn write_entries(path: &Path, entries: &[Value]) -> Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)
            .with_context(|| format!("create log directory {}", parent.display()))?;
    }
    let mut buf = serde_json::to_string_pretty(entries).context("serialize experiment log")?;
    buf.push('\n');
    let tmp_path = path.with_extension("json.tmp");
    fs::write(&tmp_path, buf)
        .with_context(|| format!("write temp log {}", tmp_path.display()))?;
    fs::rename(&tmp_path, path).with_context(|| format!("replace log {}", path.display()))?;
    Ok(())
}
