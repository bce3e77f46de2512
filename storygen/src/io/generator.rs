//! Generation client abstraction.
//!
//! The [`Generator`] trait is the only seam between story orchestration and the
//! text model. Tests use scripted generators that return predetermined outputs
//! without spawning processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::error::TransportError;
use crate::io::config::GeneratorConfig;
use crate::io::process::run_command_with_timeout;
use crate::io::prompt::Prompt;

/// Abstraction over text generation backends.
pub trait Generator {
    /// Send the system and user turns, returning the model's raw text.
    fn generate(&self, prompt: &Prompt) -> Result<String, TransportError>;
}

impl<G: Generator + ?Sized> Generator for &G {
    fn generate(&self, prompt: &Prompt) -> Result<String, TransportError> {
        (**self).generate(prompt)
    }
}

/// Generator that runs a local model command per request.
///
/// The system turn, a blank line and the user turn are written to stdin; stdout
/// is the completion.
#[derive(Debug, Clone)]
pub struct CommandGenerator {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandGenerator {
    pub fn new(config: &GeneratorConfig) -> Self {
        Self {
            command: config.command.clone(),
            timeout: config.timeout(),
            output_limit_bytes: config.output_limit_bytes,
        }
    }

    fn run(&self, prompt: &Prompt) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("generator command is empty"))?;
        info!(%program, prompt_bytes = prompt.len(), "starting generation");

        let mut cmd = Command::new(program);
        cmd.args(args);
        let input = render_stdin(prompt);
        let output = run_command_with_timeout(
            cmd,
            Some(input.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .with_context(|| format!("run generator {program}"))?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "generation timed out");
            return Err(anyhow!("generator timed out after {:?}", self.timeout));
        }
        if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "generator failed");
            return Err(anyhow!(
                "generator exited with status {:?}: {}",
                output.status.code(),
                output.stderr_tail()
            ));
        }
        if output.stdout_truncated > 0 {
            return Err(anyhow!(
                "generator output exceeded {} bytes",
                self.output_limit_bytes
            ));
        }

        let text = String::from_utf8(output.stdout).context("generator output is not UTF-8")?;
        debug!(bytes = text.len(), "generation completed");
        Ok(text)
    }
}

impl Generator for CommandGenerator {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs()))]
    fn generate(&self, prompt: &Prompt) -> Result<String, TransportError> {
        self.run(prompt).map_err(TransportError::from)
    }
}

fn render_stdin(prompt: &Prompt) -> String {
    format!("{}\n\n{}\n", prompt.system.trim_end(), prompt.user.trim())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn generator(command: &[&str]) -> CommandGenerator {
        CommandGenerator::new(&GeneratorConfig {
            command: command.iter().map(|s| s.to_string()).collect(),
            timeout_secs: 5,
            output_limit_bytes: 10_000,
        })
    }

    fn prompt() -> Prompt {
        Prompt {
            system: "You write stories.".to_string(),
            user: "Create the story with this theme: pirates".to_string(),
        }
    }

    #[test]
    fn stdout_is_returned_as_raw_text() {
        let text = generator(&["cat"]).generate(&prompt()).expect("generate");
        assert_eq!(
            text,
            "You write stories.\n\nCreate the story with this theme: pirates\n"
        );
    }

    #[test]
    fn non_zero_exit_is_transport_error() {
        let err = generator(&["sh", "-c", "echo boom >&2; exit 3"])
            .generate(&prompt())
            .unwrap_err();
        assert!(err.message.contains("status Some(3)"));
        assert!(err.message.contains("boom"));
    }

    #[test]
    fn missing_program_is_transport_error() {
        let err = generator(&["storygen-no-such-model-binary"])
            .generate(&prompt())
            .unwrap_err();
        assert!(err.message.contains("run generator"));
    }

    #[test]
    fn oversized_output_is_transport_error() {
        let generator = CommandGenerator::new(&GeneratorConfig {
            command: vec!["cat".to_string()],
            timeout_secs: 5,
            output_limit_bytes: 8,
        });
        let err = generator.generate(&prompt()).unwrap_err();
        assert!(err.message.contains("exceeded 8 bytes"));
    }
}
