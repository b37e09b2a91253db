//! Pipeline configuration (`mender.toml`).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::io::process::ProcessLimits;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "mender.toml";

/// Pipeline configuration (TOML).
///
/// Missing fields fall back to defaults; a missing file is the all-default config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MenderConfig {
    /// Only writable directory; receives corrected sources and generated tests.
    pub sandbox_dir: PathBuf,

    /// Experiment log location (JSON array).
    pub log_path: PathBuf,

    /// Files starting with this prefix are never processed as targets.
    pub test_prefix: String,

    /// Eligible file extensions, without the dot.
    pub extensions: Vec<String>,

    /// Characters of static-analysis output included in the audit request.
    pub diagnostic_excerpt_chars: usize,

    /// Characters of static-analysis output or failure traces copied into log details.
    pub log_excerpt_chars: usize,

    /// Characters of failure trace in the retry-fix request and of test output in
    /// the verdict request.
    pub trace_excerpt_chars: usize,

    /// Bytes of stdout/stderr kept per child process.
    pub output_limit_bytes: usize,

    pub reasoner: ReasonerConfig,
    pub lint: ToolConfig,
    pub tests: ToolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ReasonerConfig {
    /// Command that reads a prompt on stdin and prints the response on stdout.
    pub command: Vec<String>,
    /// Identifier recorded in every log entry.
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ReasonerConfig {
    fn default() -> Self {
        Self {
            command: ["codex", "exec", "--skip-git-repo-check", "-"]
                .map(String::from)
                .to_vec(),
            model: "codex".to_string(),
            timeout_secs: 300,
        }
    }
}

/// External tool invocation; the target path is appended as the last argument.
///
/// A `[lint]` or `[tests]` table replaces the default invocation as a whole.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolConfig {
    pub command: Vec<String>,
    pub timeout_secs: u64,
}

impl ToolConfig {
    pub fn lint_default() -> Self {
        Self {
            command: [
                "python3",
                "-m",
                "pylint",
                "--output-format=text",
                "--disable=C0114,C0115,C0116",
            ]
            .map(String::from)
            .to_vec(),
            timeout_secs: 60,
        }
    }

    pub fn tests_default() -> Self {
        Self {
            command: ["python3", "-m", "pytest", "-v", "--tb=short"]
                .map(String::from)
                .to_vec(),
            timeout_secs: 120,
        }
    }
}

impl Default for MenderConfig {
    fn default() -> Self {
        Self {
            sandbox_dir: PathBuf::from("sandbox"),
            log_path: PathBuf::from("logs/experiment_data.json"),
            test_prefix: "test_".to_string(),
            extensions: vec!["py".to_string()],
            diagnostic_excerpt_chars: 1000,
            log_excerpt_chars: 500,
            trace_excerpt_chars: 500,
            output_limit_bytes: 100_000,
            reasoner: ReasonerConfig::default(),
            lint: ToolConfig::lint_default(),
            tests: ToolConfig::tests_default(),
        }
    }
}

impl MenderConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sandbox_dir.as_os_str().is_empty() {
            return Err(anyhow!("sandbox_dir must be non-empty"));
        }
        if self.log_path.as_os_str().is_empty() {
            return Err(anyhow!("log_path must be non-empty"));
        }
        if self.test_prefix.is_empty() {
            return Err(anyhow!("test_prefix must be non-empty"));
        }
        if self.extensions.is_empty() {
            return Err(anyhow!("extensions must list at least one extension"));
        }
        for (name, value) in [
            ("diagnostic_excerpt_chars", self.diagnostic_excerpt_chars),
            ("log_excerpt_chars", self.log_excerpt_chars),
            ("trace_excerpt_chars", self.trace_excerpt_chars),
            ("output_limit_bytes", self.output_limit_bytes),
        ] {
            if value == 0 {
                return Err(anyhow!("{name} must be > 0"));
            }
        }
        validate_command("reasoner", &self.reasoner.command, self.reasoner.timeout_secs)?;
        validate_command("lint", &self.lint.command, self.lint.timeout_secs)?;
        validate_command("tests", &self.tests.command, self.tests.timeout_secs)?;
        Ok(())
    }

    pub fn reasoner_limits(&self) -> ProcessLimits {
        self.limits(self.reasoner.timeout_secs)
    }

    pub fn lint_limits(&self) -> ProcessLimits {
        self.limits(self.lint.timeout_secs)
    }

    pub fn test_limits(&self) -> ProcessLimits {
        self.limits(self.tests.timeout_secs)
    }

    fn limits(&self, timeout_secs: u64) -> ProcessLimits {
        ProcessLimits {
            timeout: Duration::from_secs(timeout_secs),
            output_limit_bytes: self.output_limit_bytes,
        }
    }
}

fn validate_command(table: &str, command: &[String], timeout_secs: u64) -> Result<()> {
    if command.is_empty() || command[0].trim().is_empty() {
        return Err(anyhow!("{table}.command must be a non-empty array"));
    }
    if timeout_secs == 0 {
        return Err(anyhow!("{table}.timeout_secs must be > 0"));
    }
    Ok(())
}

/// Parse config text, filling anything unspecified with defaults.
pub fn parse_config(contents: &str) -> Result<MenderConfig> {
    let cfg: MenderConfig = toml::from_str(contents).context("parse config toml")?;
    cfg.validate()?;
    Ok(cfg)
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `MenderConfig::default()`.
pub fn load_config(path: &Path) -> Result<MenderConfig> {
    if !path.exists() {
        let cfg = MenderConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("load {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, MenderConfig::default());
    }

    #[test]
    fn defaults_match_documented_budgets() {
        let cfg = MenderConfig::default();
        assert_eq!(cfg.lint_limits().timeout, Duration::from_secs(60));
        assert_eq!(cfg.test_limits().timeout, Duration::from_secs(120));
        assert_eq!(cfg.diagnostic_excerpt_chars, 1000);
        assert_eq!(cfg.test_prefix, "test_");
    }

    #[test]
    fn tool_tables_replace_defaults_and_leave_others_alone() {
        let cfg = parse_config(
            r#"
sandbox_dir = "out"

[tests]
command = ["pytest", "-q"]
timeout_secs = 30
"#,
        )
        .expect("parse");

        assert_eq!(cfg.sandbox_dir, PathBuf::from("out"));
        assert_eq!(cfg.tests.command, vec!["pytest", "-q"]);
        assert_eq!(cfg.test_limits().timeout, Duration::from_secs(30));
        assert_eq!(cfg.lint, ToolConfig::lint_default());
        assert_eq!(cfg.reasoner, ReasonerConfig::default());
    }

    #[test]
    fn partial_reasoner_table_keeps_remaining_defaults() {
        let cfg = parse_config("[reasoner]\nmodel = \"local-llm\"\n").expect("parse");
        assert_eq!(cfg.reasoner.model, "local-llm");
        assert_eq!(cfg.reasoner.timeout_secs, 300);
    }

    #[test]
    fn rejects_empty_commands_and_zero_limits() {
        assert!(parse_config("[reasoner]\ncommand = []\n").is_err());
        assert!(parse_config("[tests]\ncommand = [\"pytest\"]\ntimeout_secs = 0\n").is_err());
        assert!(parse_config("trace_excerpt_chars = 0\n").is_err());
    }
}
