//! Subprocess execution behind a mockable trait.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Output;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, instrument};

#[cfg(any(test, feature = "test-util"))]
mod scripted;
#[cfg(any(test, feature = "test-util"))]
pub use scripted::ScriptedRunner;

const INSTALL_HINT: &str = "Please ensure it is installed and in your PATH.";

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("'{program}' command not found. {hint}")]
    NotFound { program: String, hint: String },

    #[error("Failed to execute '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

impl CommandError {
    pub fn not_found(program: &str) -> Self {
        CommandError::NotFound {
            program: program.to_string(),
            hint: INSTALL_HINT.to_string(),
        }
    }

    fn from_io(program: &str, err: std::io::Error) -> Self {
        if err.kind() == ErrorKind::NotFound {
            Self::not_found(program)
        } else {
            CommandError::Spawn {
                program: program.to_string(),
                source: err,
            }
        }
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// None when the process was killed by a signal
    pub status_code: Option<i32>,
    pub success: bool,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            status_code: Some(0),
            success: true,
        }
    }

    pub fn failed(status_code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            status_code: Some(status_code),
            success: false,
        }
    }
}

impl From<Output> for CommandOutput {
    fn from(output: Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            status_code: output.status.code(),
            success: output.status.success(),
        }
    }
}

/// Trait for running external commands (allows mocking in tests)
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `program` directly with `args`
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError>;

    /// Run a full command line through the platform shell, so pipes and redirects work
    async fn run_shell(&self, command_line: &str) -> Result<CommandOutput, CommandError>;
}

/// Runs real processes with tokio
#[derive(Debug, Clone, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    #[instrument(skip(self))]
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        debug!("Executing {} {:?}", program, args);

        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| CommandError::from_io(program, e))?;

        let output = CommandOutput::from(output);
        if !output.success {
            debug!("{} exited with {:?}: {}", program, output.status_code, output.stderr);
        }
        Ok(output)
    }

    #[instrument(skip(self))]
    async fn run_shell(&self, command_line: &str) -> Result<CommandOutput, CommandError> {
        let (shell, flag) = if cfg!(windows) { ("cmd", "/C") } else { ("sh", "-c") };
        self.run(shell, &[flag, command_line]).await
    }
}

/// Fail fast when a required binary is not on PATH
pub fn require_binary(name: &str, hint: &str) -> Result<PathBuf, CommandError> {
    which::which(name).map_err(|_| CommandError::NotFound {
        program: name.to_string(),
        hint: hint.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_runner() {
        let runner = ScriptedRunner::new()
            .with_response("xsv -h", CommandOutput::ok("Usage: xsv <command>"))
            .with_response("uv", CommandOutput::ok("shape: (3, 2)"));

        let output = runner.run("xsv", &["-h"]).await.unwrap();
        assert!(output.success);
        assert_eq!(output.stdout, "Usage: xsv <command>");

        let output = runner
            .run("uv", &["run", "--with", "polars", "/tmp/x.py"])
            .await
            .unwrap();
        assert_eq!(output.stdout, "shape: (3, 2)");

        let err = runner.run_shell("mmdc -i a.mmd").await.unwrap_err();
        assert!(matches!(err, CommandError::NotFound { ref program, .. } if program == "mmdc"));
        assert_eq!(runner.calls().len(), 3);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_system_runner_reports_failure_and_stderr() {
        let runner = SystemRunner::new();
        let output = runner
            .run_shell("echo partial; echo 'bad input' >&2; exit 1")
            .await
            .unwrap();

        assert!(!output.success);
        assert_eq!(output.status_code, Some(1));
        assert_eq!(output.stdout.trim(), "partial");
        assert_eq!(output.stderr.trim(), "bad input");
    }

    #[tokio::test]
    async fn test_system_runner_missing_binary() {
        let err = SystemRunner::new()
            .run("definitely-not-a-real-binary-sfa", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::NotFound { .. }));
        assert!(err.to_string().contains("definitely-not-a-real-binary-sfa"));
    }

    #[test]
    fn test_require_binary() {
        let err = require_binary("definitely-not-a-real-binary-sfa", "Install it first.").unwrap_err();
        assert_eq!(
            err.to_string(),
            "'definitely-not-a-real-binary-sfa' command not found. Install it first."
        );
    }
}
