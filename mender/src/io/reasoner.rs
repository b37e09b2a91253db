//! Reasoning collaborator: `call(system, user) -> text`.

use anyhow::Result;
use tracing::{debug, instrument, warn};

use crate::error::RepairError;
use crate::io::config::ReasonerConfig;
use crate::io::process::{ProcessLimits, run_command};

/// A fallible text-in, text-out reasoning service.
///
/// Failures are reported as [`RepairError::CollaboratorFailure`] so callers can
/// degrade instead of aborting.
pub trait Reasoner {
    /// Recorded as `model_identifier` in every log entry.
    fn model_identifier(&self) -> &str;

    fn call(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}

/// Reasoner backed by a CLI that reads the prompt on stdin and answers on stdout.
#[derive(Debug, Clone)]
pub struct CommandReasoner {
    command: Vec<String>,
    model: String,
    limits: ProcessLimits,
}

impl CommandReasoner {
    pub fn new(config: &ReasonerConfig, limits: ProcessLimits) -> Self {
        Self {
            command: config.command.clone(),
            model: config.model.clone(),
            limits,
        }
    }
}

impl Reasoner for CommandReasoner {
    fn model_identifier(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model))]
    fn call(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let input = format!("{system_prompt}\n\n{user_prompt}");
        let output = match run_command(&self.command, Some(input.as_bytes()), self.limits) {
            Ok(output) => output,
            Err(err) => {
                warn!(err = %err, "reasoner could not be started");
                return Err(RepairError::CollaboratorFailure(format!("{err:#}")).into());
            }
        };

        if output.timed_out {
            return Err(RepairError::CollaboratorFailure(format!(
                "timed out after {}s",
                self.limits.timeout.as_secs()
            ))
            .into());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RepairError::CollaboratorFailure(format!(
                "exited with {:?}: {}",
                output.status.code(),
                stderr.trim()
            ))
            .into());
        }

        let response = output.stdout_text();
        if response.trim().is_empty() {
            return Err(RepairError::CollaboratorFailure("empty response".to_string()).into());
        }
        debug!(chars = response.len(), "reasoner responded");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn reasoner(script: &str) -> CommandReasoner {
        let config = ReasonerConfig {
            command: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
            model: "scripted".to_string(),
            timeout_secs: 5,
        };
        CommandReasoner::new(
            &config,
            ProcessLimits {
                timeout: Duration::from_secs(5),
                output_limit_bytes: 4096,
            },
        )
    }

    fn is_collaborator_failure(err: &anyhow::Error) -> bool {
        matches!(
            err.downcast_ref::<RepairError>(),
            Some(RepairError::CollaboratorFailure(_))
        )
    }

    #[test]
    fn prompt_is_sent_on_stdin() {
        let reasoner = reasoner("cat");
        let response = reasoner.call("system", "user").expect("call");
        assert_eq!(response, "system\n\nuser");
        assert_eq!(reasoner.model_identifier(), "scripted");
    }

    #[test]
    fn non_zero_exit_is_collaborator_failure() {
        let err = reasoner("echo quota >&2; exit 2").call("s", "u").unwrap_err();
        assert!(is_collaborator_failure(&err));
        assert!(err.to_string().contains("quota"));
    }

    #[test]
    fn empty_response_is_collaborator_failure() {
        let err = reasoner("cat >/dev/null; echo '   '").call("s", "u").unwrap_err();
        assert!(is_collaborator_failure(&err));
    }

    #[test]
    fn missing_command_is_collaborator_failure() {
        let config = ReasonerConfig {
            command: vec!["definitely-not-a-real-reasoner".to_string()],
            ..ReasonerConfig::default()
        };
        let reasoner = CommandReasoner::new(
            &config,
            ProcessLimits {
                timeout: Duration::from_secs(1),
                output_limit_bytes: 16,
            },
        );
        let err = reasoner.call("s", "u").unwrap_err();
        assert!(is_collaborator_failure(&err));
    }
}
