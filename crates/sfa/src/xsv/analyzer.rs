use serde_json::json;
use std::path::{Path, PathBuf};

use super::tool::XsvTool;
use super::XsvError;
use crate::extract::sanitize_command;
use crate::models::message::Message;
use crate::process::{CommandRunner, SystemRunner};
use crate::prompt_template::{load_prompt, XSV_COMMAND};
use crate::providers::base::{CompletionParams, Provider};
use crate::retry::{is_transient, RetryPolicy};
use crate::usage::TokenTally;

const COMMAND_MAX_TOKENS: i32 = 200;

#[derive(Debug, Clone, PartialEq)]
pub enum V1Outcome {
    /// The model produced no command
    GenerationFailed,
    ExecutionFailed { command: String, stderr: String },
    /// Output went to a file through a shell redirect
    Written { command: String, path: PathBuf },
    Output { command: String, stdout: String },
    NoOutput { command: String },
}

impl V1Outcome {
    pub fn is_success(&self) -> bool {
        !matches!(
            self,
            V1Outcome::GenerationFailed | V1Outcome::ExecutionFailed { .. }
        )
    }
}

/// Append `> path` unless the command already redirects
pub fn with_redirect(command: &str, output_file: &Path) -> String {
    if command.contains('>') {
        return command.to_string();
    }
    let path = output_file.display().to_string();
    if path.contains(' ') {
        format!("{} > \"{}\"", command, path)
    } else {
        format!("{} > {}", command, path)
    }
}

/// One-shot translator: a single model call, then a single xsv run
pub struct XsvAnalyzer<R: CommandRunner = SystemRunner> {
    provider: Box<dyn Provider>,
    tool: XsvTool<R>,
    retry: RetryPolicy,
    tally: TokenTally,
}

impl<R: CommandRunner> XsvAnalyzer<R> {
    pub fn new(provider: Box<dyn Provider>, tool: XsvTool<R>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            tool,
            retry,
            tally: TokenTally::new(),
        }
    }

    pub fn usage(&self) -> &TokenTally {
        &self.tally
    }

    /// Translate the query into a command line, or None when the model gives nothing usable
    pub async fn generate_command(
        &self,
        query: &str,
        csv_path: &Path,
    ) -> Result<Option<String>, XsvError> {
        let prompt = load_prompt(
            XSV_COMMAND,
            &json!({
                "user_query": query,
                "csv_file_path": csv_path.display().to_string(),
            }),
        )?;
        let messages = [Message::user().with_text(prompt)];
        let params = CompletionParams::new(COMMAND_MAX_TOKENS);

        tracing::info!("Generating xsv command with {}", self.provider.model());
        let result = self
            .retry
            .run("xsv command generation", is_transient, |_| {
                let messages = &messages;
                let params = &params;
                async move {
                    let (reply, usage) = self.provider.complete("", messages, &[], params).await?;
                    self.tally.record(&usage);
                    Ok(reply.text())
                }
            })
            .await;

        match result {
            Ok(text) => {
                let command = sanitize_command(&text);
                if command.is_empty() {
                    tracing::warn!("The model returned an empty command");
                    Ok(None)
                } else {
                    Ok(Some(command))
                }
            }
            Err(err) => {
                tracing::error!("Error generating xsv command: {}", err);
                Ok(None)
            }
        }
    }

    pub async fn run(
        &self,
        query: &str,
        csv_path: &Path,
        output_file: Option<&Path>,
    ) -> Result<V1Outcome, XsvError> {
        let Some(command) = self.generate_command(query, csv_path).await? else {
            return Ok(V1Outcome::GenerationFailed);
        };

        let command = match output_file {
            Some(path) => with_redirect(&command, path),
            None => command,
        };

        let execution = self.tool.run_command(&command).await;
        if !execution.success {
            return Ok(V1Outcome::ExecutionFailed {
                command,
                stderr: execution.stderr,
            });
        }

        Ok(match output_file {
            Some(path) => V1Outcome::Written {
                command,
                path: path.to_path_buf(),
            },
            None if !execution.stdout.is_empty() => V1Outcome::Output {
                command,
                stdout: execution.stdout,
            },
            None => V1Outcome::NoOutput { command },
        })
    }
}
