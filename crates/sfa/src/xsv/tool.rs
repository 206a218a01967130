use serde_json::json;
use std::sync::OnceLock;

use super::{
    XsvError, DEFAULT_TRUNCATION_CHARS, MAX_TRUNCATION_CHARS, MIN_TRUNCATION_CHARS,
    TRUNCATION_MARKER,
};
use crate::models::tool::Tool;
use crate::process::{CommandRunner, SystemRunner};

pub const HELP_TOOL_NAME: &str = "get_xsv_subcommand_help";

/// Result of running one xsv command line
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XsvExecution {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// The character limit applied when stdout was cut short
    pub truncated_at: Option<usize>,
}

/// Cap `stdout` at the effective limit, returning the limit when it was applied
///
/// A requested limit is clamped to 100..=10000; without one the default of 4000 applies.
pub fn truncate_output(stdout: &str, requested: Option<i64>) -> (String, Option<usize>) {
    let limit = match requested {
        Some(requested) => {
            requested.clamp(MIN_TRUNCATION_CHARS as i64, MAX_TRUNCATION_CHARS as i64) as usize
        }
        None => DEFAULT_TRUNCATION_CHARS,
    };

    if stdout.chars().count() <= limit {
        return (stdout.to_string(), None);
    }

    let keep = limit.saturating_sub(TRUNCATION_MARKER.chars().count());
    let mut truncated: String = stdout.chars().take(keep).collect();
    truncated.push_str(TRUNCATION_MARKER);
    tracing::info!("xsv output truncated to {} chars", limit);
    (truncated, Some(limit))
}

/// The tool definition offered to the model during command planning
pub fn help_tool() -> Tool {
    Tool::new(
        HELP_TOOL_NAME,
        "Fetches the help documentation for a specific xsv subcommand \
         (e.g., 'stats', 'slice', 'search', 'count', 'headers', 'frequency', 'join', 'select', 'sort', 'split'). \
         Use this if you need more details about a subcommand's options or usage, \
         especially if the main `xsv -h` output is insufficient for the user's query.",
        json!({
            "type": "object",
            "properties": {
                "subcommand_name": {
                    "type": "string",
                    "description": "The name of the xsv subcommand to get help for (e.g., 'stats', 'count'). Must be a single word."
                }
            },
            "required": ["subcommand_name"]
        }),
    )
}

/// Wrapper around the `xsv` binary
pub struct XsvTool<R: CommandRunner = SystemRunner> {
    runner: R,
    main_help: OnceLock<String>,
}

impl Default for XsvTool<SystemRunner> {
    fn default() -> Self {
        Self::new(SystemRunner::new())
    }
}

impl<R: CommandRunner> XsvTool<R> {
    pub fn new(runner: R) -> Self {
        Self {
            runner,
            main_help: OnceLock::new(),
        }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// `xsv -h`, fetched once per tool
    pub async fn main_help(&self) -> Result<String, XsvError> {
        if let Some(help) = self.main_help.get() {
            return Ok(help.clone());
        }

        tracing::info!("Fetching `xsv -h` output");
        let output = self.runner.run("xsv", &["-h"]).await?;
        if !output.success {
            let stderr = output.stderr.trim();
            return Err(XsvError::HelpFailed {
                status: output.status_code,
                stderr: if stderr.is_empty() {
                    "No stderr output.".to_string()
                } else {
                    stderr.to_string()
                },
            });
        }

        let help = output.stdout.trim().to_string();
        Ok(self.main_help.get_or_init(|| help).clone())
    }

    /// Help text for one subcommand; problems come back as text for the model to read
    #[tracing::instrument(skip(self))]
    pub async fn subcommand_help(&self, name: &str) -> String {
        if name.is_empty() || name.contains(char::is_whitespace) {
            let message = format!("Invalid subcommand_name: '{}'. Must be a single word.", name);
            tracing::warn!("{}", message);
            return message;
        }

        match self.runner.run("xsv", &[name, "-h"]).await {
            Ok(output) if output.success => {
                let help = output.stdout.trim();
                if help.is_empty() {
                    format!("No help output for 'xsv {} -h'.", name)
                } else {
                    help.to_string()
                }
            }
            Ok(output) => {
                let stderr = output.stderr.trim();
                let stderr = if stderr.is_empty() {
                    format!("No stderr output. Command 'xsv {} -h' failed.", name)
                } else {
                    stderr.to_string()
                };
                tracing::warn!("Error fetching help for 'xsv {} -h': {}", name, stderr);
                format!("Error: Could not get help for 'xsv {}'. Stderr: {}", name, stderr)
            }
            Err(e) => {
                tracing::error!("{}", e);
                format!("Error: {}", e)
            }
        }
    }

    /// Run a command line through the shell without truncating its output
    #[tracing::instrument(skip(self))]
    pub async fn run_command(&self, command: &str) -> XsvExecution {
        tracing::info!("Executing xsv command: '{}'", command);
        match self.runner.run_shell(command).await {
            Ok(output) => {
                if !output.success {
                    tracing::warn!(
                        "xsv command failed with exit code {:?}. Stderr: {}",
                        output.status_code,
                        if output.stderr.trim().is_empty() { "(empty)" } else { output.stderr.trim() }
                    );
                }
                XsvExecution {
                    success: output.success,
                    stdout: output.stdout.trim().to_string(),
                    stderr: output.stderr.trim().to_string(),
                    truncated_at: None,
                }
            }
            Err(e) => {
                let stderr = format!("Unexpected error executing xsv command '{}': {}", command, e);
                tracing::error!("{}", stderr);
                XsvExecution {
                    success: false,
                    stderr,
                    ..Default::default()
                }
            }
        }
    }

    /// Run a command line and cap stdout at the requested length
    pub async fn execute(&self, command: &str, requested_truncation: Option<i64>) -> XsvExecution {
        let mut execution = self.run_command(command).await;
        if execution.success && !execution.stdout.is_empty() {
            let (stdout, truncated_at) = truncate_output(&execution.stdout, requested_truncation);
            execution.stdout = stdout;
            execution.truncated_at = truncated_at;
        }
        execution
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, ScriptedRunner};

    #[test]
    fn test_truncate_output_default_limit() {
        let short = "a,b\n1,2";
        assert_eq!(truncate_output(short, None), (short.to_string(), None));

        let long = "x".repeat(5000);
        let (truncated, applied) = truncate_output(&long, None);
        assert_eq!(applied, Some(4000));
        assert_eq!(truncated.chars().count(), 4000);
        assert!(truncated.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn test_truncate_output_clamps_requests() {
        let long = "é".repeat(20_000);

        let (truncated, applied) = truncate_output(&long, Some(5));
        assert_eq!(applied, Some(100));
        assert_eq!(truncated.chars().count(), 100);

        let (_, applied) = truncate_output(&long, Some(50_000));
        assert_eq!(applied, Some(10_000));

        let (_, applied) = truncate_output(&long, Some(-3));
        assert_eq!(applied, Some(100));
    }

    #[test]
    fn test_output_at_limit_is_kept() {
        let exact = "y".repeat(100);
        assert_eq!(truncate_output(&exact, Some(100)), (exact.clone(), None));
    }

    #[tokio::test]
    async fn test_main_help_is_cached() {
        let tool = XsvTool::new(
            ScriptedRunner::new().with_response("xsv -h", CommandOutput::ok("Usage:\n    xsv <command>\n")),
        );

        assert_eq!(tool.main_help().await.unwrap(), "Usage:\n    xsv <command>");
        assert_eq!(tool.main_help().await.unwrap(), "Usage:\n    xsv <command>");
        assert_eq!(tool.runner().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_main_help_failures() {
        let missing = XsvTool::new(ScriptedRunner::new());
        assert!(matches!(
            missing.main_help().await,
            Err(XsvError::NotInstalled(_))
        ));

        let broken = XsvTool::new(
            ScriptedRunner::new().with_response("xsv -h", CommandOutput::failed(2, "")),
        );
        match broken.main_help().await {
            Err(XsvError::HelpFailed { status, stderr }) => {
                assert_eq!(status, Some(2));
                assert_eq!(stderr, "No stderr output.");
            }
            other => panic!("Expected HelpFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_subcommand_help() {
        let tool = XsvTool::new(
            ScriptedRunner::new()
                .with_response("xsv stats -h", CommandOutput::ok("Usage: xsv stats [options]\n"))
                .with_response("xsv split -h", CommandOutput::ok(""))
                .with_response("xsv nope -h", CommandOutput::failed(1, "Unknown command")),
        );

        assert_eq!(tool.subcommand_help("stats").await, "Usage: xsv stats [options]");
        assert_eq!(
            tool.subcommand_help("split").await,
            "No help output for 'xsv split -h'."
        );
        assert_eq!(
            tool.subcommand_help("nope").await,
            "Error: Could not get help for 'xsv nope'. Stderr: Unknown command"
        );
        assert_eq!(
            tool.subcommand_help("two words").await,
            "Invalid subcommand_name: 'two words'. Must be a single word."
        );
        assert!(tool.subcommand_help("").await.starts_with("Invalid subcommand_name"));
        assert_eq!(tool.runner().calls().len(), 3);
    }

    #[tokio::test]
    async fn test_execute_failure_surfaces_stderr() {
        let tool = XsvTool::new(ScriptedRunner::new().with_response(
            "xsv select nope data.csv",
            CommandOutput::failed(1, "Selector name 'nope' does not exist\n"),
        ));

        let execution = tool.execute("xsv select nope data.csv", None).await;

        assert!(!execution.success);
        assert_eq!(execution.stderr, "Selector name 'nope' does not exist");
        assert_eq!(execution.truncated_at, None);
    }

    #[tokio::test]
    async fn test_execute_truncates_successful_output() {
        let tool = XsvTool::new(ScriptedRunner::new().with_response(
            "xsv cat rows big.csv",
            CommandOutput::ok("z".repeat(300)),
        ));

        let execution = tool.execute("xsv cat rows big.csv", Some(150)).await;

        assert!(execution.success);
        assert_eq!(execution.truncated_at, Some(150));
        assert_eq!(execution.stdout.chars().count(), 150);
    }

    #[tokio::test]
    async fn test_execute_spawn_error() {
        let tool = XsvTool::new(ScriptedRunner::new());
        let execution = tool.execute("xsv count a.csv", None).await;
        assert!(!execution.success);
        assert!(execution.stderr.starts_with("Unexpected error executing xsv command"));
    }
}
