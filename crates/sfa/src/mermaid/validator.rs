use async_trait::async_trait;
use std::io::Write;
use tempfile::Builder;

use super::MermaidError;
use crate::process::{CommandRunner, SystemRunner};

const UNKNOWN_ERROR: &str = "Unknown validation error (no stderr).";

#[derive(Debug, Clone, PartialEq)]
pub enum Validation {
    Valid,
    /// Carries the validator's error text, which is handed to the model
    Invalid(String),
}

#[async_trait]
pub trait DiagramValidator: Send + Sync {
    async fn validate(&self, code: &str) -> Result<Validation, MermaidError>;
}

/// Validates by rendering with the Mermaid CLI
pub struct MmdcValidator<R: CommandRunner = SystemRunner> {
    runner: R,
}

impl MmdcValidator<SystemRunner> {
    pub fn new() -> Self {
        Self::with_runner(SystemRunner::new())
    }
}

impl Default for MmdcValidator<SystemRunner> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: CommandRunner> MmdcValidator<R> {
    pub fn with_runner(runner: R) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl<R: CommandRunner> DiagramValidator for MmdcValidator<R> {
    #[tracing::instrument(skip_all)]
    async fn validate(&self, code: &str) -> Result<Validation, MermaidError> {
        // Both files are removed when the handles drop
        let mut input = Builder::new().prefix("sfa-").suffix(".mmd").tempfile()?;
        input.write_all(code.as_bytes())?;
        input.flush()?;
        let output = Builder::new().prefix("sfa-").suffix(".svg").tempfile()?;

        let input_path = input.path().to_string_lossy().into_owned();
        let output_path = output.path().to_string_lossy().into_owned();
        let result = self
            .runner
            .run("mmdc", &["-i", &input_path, "-o", &output_path, "--quiet"])
            .await?;

        if result.success {
            tracing::info!("Validation successful");
            return Ok(Validation::Valid);
        }

        let stderr = result.stderr.trim();
        let stdout = result.stdout.trim();
        let message = if !stderr.is_empty() {
            stderr
        } else if !stdout.is_empty() {
            stdout
        } else {
            UNKNOWN_ERROR
        };
        tracing::info!(
            "Validation failed: {}",
            message.chars().take(200).collect::<String>()
        );
        Ok(Validation::Invalid(message.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, ScriptedRunner};

    #[tokio::test]
    async fn test_valid_diagram() {
        let validator =
            MmdcValidator::with_runner(ScriptedRunner::new().with_response("mmdc", CommandOutput::ok("")));
        assert_eq!(
            validator.validate("graph TD\n  A --> B").await.unwrap(),
            Validation::Valid
        );
    }

    #[tokio::test]
    async fn test_invalid_diagram_surfaces_stderr() {
        let runner = ScriptedRunner::new().with_response(
            "mmdc",
            CommandOutput::failed(1, "Error: Parse error on line 2:\n...A -- B\n"),
        );
        let validator = MmdcValidator::with_runner(runner);

        match validator.validate("graph TD\n  A -- B").await.unwrap() {
            Validation::Invalid(message) => {
                assert_eq!(message, "Error: Parse error on line 2:\n...A -- B")
            }
            Validation::Valid => panic!("Expected invalid diagram"),
        }
    }

    #[tokio::test]
    async fn test_falls_back_to_stdout_then_placeholder() {
        let mut on_stdout = CommandOutput::failed(1, "");
        on_stdout.stdout = "Syntax error in graph".to_string();
        let validator =
            MmdcValidator::with_runner(ScriptedRunner::new().with_response("mmdc", on_stdout));
        assert_eq!(
            validator.validate("graph").await.unwrap(),
            Validation::Invalid("Syntax error in graph".to_string())
        );

        let validator = MmdcValidator::with_runner(
            ScriptedRunner::new().with_response("mmdc", CommandOutput::failed(1, "  ")),
        );
        assert_eq!(
            validator.validate("graph").await.unwrap(),
            Validation::Invalid(UNKNOWN_ERROR.to_string())
        );
    }

    #[tokio::test]
    async fn test_missing_mmdc() {
        let validator = MmdcValidator::with_runner(ScriptedRunner::new());
        let err = validator.validate("graph TD").await.unwrap_err();
        assert!(matches!(err, MermaidError::ValidatorMissing));
    }

    #[tokio::test]
    async fn test_passes_temp_paths_to_mmdc() {
        let runner = ScriptedRunner::new().with_response("mmdc", CommandOutput::ok(""));
        let validator = MmdcValidator::with_runner(runner);
        validator.validate("pie").await.unwrap();

        let calls = validator.runner.calls();
        let args: Vec<&str> = calls[0].split_whitespace().collect();
        assert_eq!(args[0], "mmdc");
        assert_eq!(args[1], "-i");
        assert!(args[2].ends_with(".mmd"));
        assert!(args[4].ends_with(".svg"));
        assert_eq!(args[5], "--quiet");
        assert!(!std::path::Path::new(args[2]).exists());
    }
}
