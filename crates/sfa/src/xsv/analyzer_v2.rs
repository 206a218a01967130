use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use super::tool::{help_tool, XsvExecution, XsvTool, HELP_TOOL_NAME};
use super::{
    XsvError, DEFAULT_MAX_TURNS, DEFAULT_TRUNCATION_CHARS, MAX_TRUNCATION_CHARS,
    MIN_TRUNCATION_CHARS, TRUNCATION_MARKER,
};
use crate::delimiter::{
    detect_delimiter, display_delimiter, unescape_delimiter, DEFAULT_SAMPLE_LINES,
};
use crate::encoding::ensure_utf8_file;
use crate::errors::AgentResult;
use crate::extract::strip_json_fence;
use crate::models::message::{Message, ToolRequest};
use crate::process::{CommandRunner, SystemRunner};
use crate::prompt_template::{load_prompt, XSV_SYNTHESIS, XSV_SYSTEM};
use crate::providers::base::{CompletionParams, Provider};
use crate::retry::{is_transient, RetryPolicy};
use crate::usage::TokenTally;

const LOOP_MAX_TOKENS: i32 = 400;
const SYNTHESIS_MAX_TOKENS: i32 = 300;
const TEMPERATURE: f32 = 0.1;

pub const NO_DATA_ANSWER: &str =
    "No data was returned by the xsv command. This likely means no matching data was found.";

const EMPTY_REPLY_CORRECTION: &str = "Your response content was not a string or was empty. \
     Please provide the xsv command as a JSON object or use a tool.";
const NOT_JSON_CORRECTION: &str = "Your response was not in the expected JSON format. \
     Please provide the xsv command as a JSON object with 'xsv_command' and optionally \
     'preferred_output_truncation_length', or an 'error' field.";

#[derive(Debug, Clone)]
pub struct V2Request {
    pub query: String,
    pub file: PathBuf,
    /// User supplied delimiter, possibly escaped like `\t`
    pub delimiter: Option<String>,
    pub output_file: Option<PathBuf>,
}

/// A command the model settled on, and what running it produced
#[derive(Debug, Clone, PartialEq)]
pub struct V2Run {
    pub command: String,
    pub preferred_truncation: Option<i64>,
    pub execution: XsvExecution,
    pub answer: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum V2Outcome {
    /// The model answered with `{"error": ..}`
    LlmDeclined(String),
    ApiFailed(String),
    TurnLimit,
    Completed(V2Run),
}

/// The model's final answer when it stops calling tools
#[derive(Debug, Deserialize)]
struct CommandPlan {
    #[serde(default)]
    xsv_command: Option<Value>,
    #[serde(default)]
    preferred_output_truncation_length: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, PartialEq)]
enum PlanDecision {
    Declined(String),
    Command {
        command: String,
        preferred_truncation: Option<i64>,
    },
}

/// Validate a parsed reply; the Err text is fed back to the model
fn interpret_plan(reply: Value) -> Result<PlanDecision, String> {
    let missing_keys = || "LLM JSON response missing 'xsv_command' or 'error' key.".to_string();
    let plan: CommandPlan = serde_json::from_value(reply).map_err(|_| missing_keys())?;

    if let Some(error) = plan.error {
        let reason = match error {
            Value::String(reason) => reason,
            other => other.to_string(),
        };
        return Ok(PlanDecision::Declined(reason));
    }

    let Some(command) = plan.xsv_command else {
        return Err(missing_keys());
    };
    let command = match command.as_str().map(str::trim) {
        Some(command) if command.starts_with("xsv") => command.to_string(),
        _ => {
            return Err("LLM provided an invalid 'xsv_command' format or content \
                        (must be string starting with 'xsv')."
                .to_string())
        }
    };

    let preferred_truncation = match plan.preferred_output_truncation_length {
        None | Some(Value::Null) => None,
        Some(value) => match value.as_i64() {
            Some(length) => {
                if !(MIN_TRUNCATION_CHARS as i64..=MAX_TRUNCATION_CHARS as i64).contains(&length) {
                    tracing::warn!(
                        "Out-of-bounds preferred_output_truncation_length {}, it will be clamped",
                        length
                    );
                }
                Some(length)
            }
            None => {
                tracing::warn!(
                    "Ignoring non-integer preferred_output_truncation_length: {}",
                    value
                );
                None
            }
        },
    };

    Ok(PlanDecision::Command {
        command,
        preferred_truncation,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Plain-text record of one run, in the shape matching how it ended
pub fn render_report(query: &str, run: &V2Run) -> String {
    let execution = &run.execution;
    let mut report = format!("User Query: {}\n", query);

    if !execution.success {
        let _ = writeln!(report, "XSV Command Attempted: {}", run.command);
        report.push_str("XSV Command Execution Failed.\n");
        if !execution.stdout.is_empty() {
            let _ = writeln!(report, "XSV stdout (partial/error):\n{}", execution.stdout);
        }
        if !execution.stderr.is_empty() {
            let _ = writeln!(report, "XSV stderr:\n{}", execution.stderr);
        }
        return report;
    }

    let _ = writeln!(report, "XSV Command: {}", run.command);
    match &run.answer {
        Some(answer) => {
            if run.preferred_truncation.is_some() || execution.truncated_at.is_some() {
                let _ = writeln!(
                    report,
                    "AI Suggested Truncation: {}",
                    run.preferred_truncation
                        .map_or("N/A".to_string(), |n| n.to_string())
                );
                let _ = writeln!(
                    report,
                    "Actual Truncation Applied At: {}",
                    execution
                        .truncated_at
                        .map_or("Not Truncated or Default".to_string(), |n| n.to_string())
                );
            }
            let _ = write!(report, "\nXSV Output:\n{}\n\n", execution.stdout);
            if !execution.stderr.is_empty() {
                let _ = write!(report, "XSV Stderr:\n{}\n\n", execution.stderr);
            }
            let _ = writeln!(report, "Synthesized Answer:\n{}", answer);
        }
        None => {
            if execution.stdout.is_empty() {
                report.push_str("XSV Output: No output produced.\n");
            } else {
                let _ = write!(report, "\nXSV Output:\n{}\n\n", execution.stdout);
            }
            if !execution.stderr.is_empty() {
                let _ = writeln!(report, "XSV Stderr:\n{}", execution.stderr);
            }
            if execution.stdout.is_empty() {
                report.push_str("Synthesized Answer: Could not be generated (no xsv output).\n");
            } else {
                report.push_str("Synthesized Answer: Could not be generated.\n");
            }
        }
    }
    report
}

/// Multi-turn planner that can look up subcommand help before committing to a command
pub struct XsvAnalyzerV2<R: CommandRunner = SystemRunner> {
    provider: Box<dyn Provider>,
    tool: XsvTool<R>,
    retry: RetryPolicy,
    max_turns: u32,
    tally: TokenTally,
}

impl<R: CommandRunner> XsvAnalyzerV2<R> {
    pub fn new(provider: Box<dyn Provider>, tool: XsvTool<R>, retry: RetryPolicy) -> Self {
        Self {
            provider,
            tool,
            retry,
            max_turns: DEFAULT_MAX_TURNS,
            tally: TokenTally::new(),
        }
    }

    pub fn with_max_turns(mut self, max_turns: u32) -> Self {
        self.max_turns = max_turns;
        self
    }

    pub fn usage(&self) -> &TokenTally {
        &self.tally
    }

    pub async fn run(&self, request: &V2Request) -> Result<V2Outcome, XsvError> {
        let main_help = self.tool.main_help().await?;

        let encoding = ensure_utf8_file(&request.file)?;
        let file = encoding.path_to_process;

        let delimiter = match &request.delimiter {
            Some(raw) => unescape_delimiter(raw)?,
            None => detect_delimiter(&file, DEFAULT_SAMPLE_LINES, ','),
        };
        let delimiter_display = display_delimiter(delimiter);
        tracing::info!("Using delimiter '{}'", delimiter_display);

        let file_path = file.display().to_string();
        let system = load_prompt(
            XSV_SYSTEM,
            &json!({
                "file_name": file_name(&file),
                "file_path": file_path,
                "delimiter_display": delimiter_display,
                "max_chars": MAX_TRUNCATION_CHARS,
                "default_chars": DEFAULT_TRUNCATION_CHARS,
                "min_chars": MIN_TRUNCATION_CHARS,
                "truncation_marker": TRUNCATION_MARKER,
                "main_help": main_help,
            }),
        )?;
        let first_turn = format!(
            "User query: \"{}\"\nFile to analyze: '{}'\nEffective delimiter to use: '{}'",
            request.query, file_path, delimiter_display
        );

        let (command, preferred_truncation) = match self.converse(&system, first_turn).await {
            Ok(plan) => plan,
            Err(outcome) => return Ok(outcome),
        };

        let execution = self.tool.execute(&command, preferred_truncation).await;
        let answer = if execution.success {
            self.synthesize(&request.query, &execution, &file_name(&request.file))
                .await?
        } else {
            tracing::warn!("Skipping answer synthesis because the xsv command failed");
            None
        };

        let run = V2Run {
            command,
            preferred_truncation,
            execution,
            answer,
        };

        if let Some(path) = &request.output_file {
            match std::fs::write(path, render_report(&request.query, &run)) {
                Ok(()) => tracing::info!("Run details saved to '{}'", path.display()),
                Err(e) => tracing::error!("Error writing to output file '{}': {}", path.display(), e),
            }
        }

        Ok(V2Outcome::Completed(run))
    }

    /// Converse until the model commits to a command; any other ending is the Err outcome
    async fn converse(
        &self,
        system: &str,
        first_turn: String,
    ) -> Result<(String, Option<i64>), V2Outcome> {
        let tools = [help_tool()];
        let params = CompletionParams::new(LOOP_MAX_TOKENS).with_temperature(TEMPERATURE);
        let mut messages = vec![Message::user().with_text(first_turn)];
        let mut consecutive_failures = 0;

        for turn in 1..=self.max_turns {
            tracing::info!("Interaction turn {}/{}", turn, self.max_turns);

            let reply = match self.provider.complete(system, &messages, &tools, &params).await {
                Ok((reply, usage)) => {
                    self.tally.record(&usage);
                    consecutive_failures = 0;
                    reply
                }
                Err(e) if is_transient(&e) => {
                    consecutive_failures += 1;
                    tracing::warn!("API error on turn {}: {}", turn, e);
                    if consecutive_failures >= self.retry.max_attempts {
                        return Err(V2Outcome::ApiFailed(e.to_string()));
                    }
                    tokio::time::sleep(self.retry.wait).await;
                    continue;
                }
                Err(e) => return Err(V2Outcome::ApiFailed(e.to_string())),
            };

            if reply.has_tool_request() {
                let mut responses = Message::user();
                for request in reply.tool_requests() {
                    let result = self.dispatch_tool(request).await;
                    responses = responses.with_tool_response(request.id.clone(), result);
                }
                messages.push(reply);
                messages.push(responses);
                continue;
            }

            let text = reply.text();
            messages.push(reply);
            if text.trim().is_empty() {
                tracing::warn!("Empty reply when a command was expected");
                messages.push(Message::user().with_text(EMPTY_REPLY_CORRECTION));
                continue;
            }

            let parsed = match serde_json::from_str::<Value>(strip_json_fence(&text)) {
                Ok(parsed) => parsed,
                Err(_) => {
                    tracing::warn!("Reply was not valid JSON: {}", text);
                    messages.push(Message::user().with_text(NOT_JSON_CORRECTION));
                    continue;
                }
            };

            match interpret_plan(parsed) {
                Ok(PlanDecision::Declined(reason)) => {
                    tracing::warn!("Model declined: {}", reason);
                    return Err(V2Outcome::LlmDeclined(reason));
                }
                Ok(PlanDecision::Command {
                    command,
                    preferred_truncation,
                }) => {
                    tracing::info!("Model provided final xsv command: '{}'", command);
                    return Ok((command, preferred_truncation));
                }
                Err(problem) => {
                    tracing::warn!("Error processing JSON reply: {}", problem);
                    messages.push(Message::user().with_text(format!(
                        "There was an issue with your JSON response: {}. Please correct it.",
                        problem.trim_end_matches('.')
                    )));
                }
            }
        }

        tracing::error!("Max interaction turns reached without an xsv command");
        Err(V2Outcome::TurnLimit)
    }

    async fn dispatch_tool(&self, request: &ToolRequest) -> AgentResult<String> {
        let call = request.tool_call.clone()?;
        tracing::info!("Tool call {} with {}", call.name, call.arguments);

        if call.name != HELP_TOOL_NAME {
            return Ok(format!("Error: Tool '{}' is not available.", call.name));
        }
        match call.arguments.get("subcommand_name").and_then(Value::as_str) {
            Some(name) if !name.is_empty() => Ok(self.tool.subcommand_help(name).await),
            _ => Ok("Error: 'subcommand_name' not provided in tool call arguments.".to_string()),
        }
    }

    /// Turn the command output into a short answer to the query
    pub async fn synthesize(
        &self,
        query: &str,
        execution: &XsvExecution,
        file_name: &str,
    ) -> Result<Option<String>, XsvError> {
        if execution.stdout.trim().is_empty() {
            return Ok(Some(NO_DATA_ANSWER.to_string()));
        }

        let truncated_at = execution
            .truncated_at
            .filter(|_| execution.stdout.contains(TRUNCATION_MARKER));
        let system = load_prompt(
            XSV_SYNTHESIS,
            &json!({
                "truncation_marker": TRUNCATION_MARKER,
                "user_query": query,
                "file_name": file_name,
                "truncated_at": truncated_at,
            }),
        )?;
        let messages = [Message::user()
            .with_text(format!("XSV command output:\n\n{}", execution.stdout))];
        let params = CompletionParams::new(SYNTHESIS_MAX_TOKENS).with_temperature(TEMPERATURE);

        match self.provider.complete(&system, &messages, &[], &params).await {
            Ok((reply, usage)) => {
                self.tally.record(&usage);
                let answer = reply.text().trim().to_string();
                Ok((!answer.is_empty()).then_some(answer))
            }
            Err(e) => {
                tracing::error!("Error synthesizing answer: {}", e);
                Ok(None)
            }
        }
    }
}
