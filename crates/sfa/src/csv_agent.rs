//! Tool-calling agent that explores a CSV file and answers with a Polars script.

use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use thiserror::Error;

use crate::delimiter::{detect_delimiter, split_record, DEFAULT_SAMPLE_LINES};
use crate::models::message::{Message, ToolRequest};
use crate::models::tool::{Tool, ToolCall};
use crate::process::{CommandRunner, SystemRunner};
use crate::prompt_template::{load_prompt, CSV_AGENT};
use crate::providers::base::{CompletionParams, Provider};
use crate::retry::{is_transient, RetryPolicy};
use crate::usage::TokenTally;

pub const DEFAULT_MODEL: &str = "o3-mini";
pub const DEFAULT_COMPUTE: u32 = 10;
pub const UV_INSTALL_HINT: &str = "Install uv from https://docs.astral.sh/uv/ to run Polars scripts.";

#[derive(Error, Debug)]
pub enum CsvAgentError {
    #[error("Maximum compute loops reached: {compute}/{compute}")]
    ComputeExhausted { compute: u32 },

    #[error("No function call in the model response")]
    NoToolCall,

    #[error("Model request failed: {0}")]
    Api(#[source] anyhow::Error),

    #[error("Failed to render prompt: {0}")]
    Prompt(#[from] tera::Error),
}

#[derive(Debug, Deserialize)]
pub struct ListColumnsArgs {
    pub reasoning: String,
    pub csv_path: String,
}

#[derive(Debug, Deserialize)]
pub struct SampleCsvArgs {
    pub reasoning: String,
    pub csv_path: String,
    pub row_count: usize,
}

#[derive(Debug, Deserialize)]
pub struct PolarsCodeArgs {
    pub reasoning: String,
    pub polars_python_code: String,
}

#[derive(Debug)]
enum CsvTool {
    ListColumns(ListColumnsArgs),
    SampleCsv(SampleCsvArgs),
    RunTestCode(PolarsCodeArgs),
    RunFinalCode(PolarsCodeArgs),
}

impl CsvTool {
    fn parse(call: &ToolCall) -> Result<Self, String> {
        fn args<T: serde::de::DeserializeOwned>(call: &ToolCall) -> Result<T, String> {
            serde_json::from_value(call.arguments.clone()).map_err(|e| e.to_string())
        }

        match call.name.as_str() {
            "list_columns" => args(call).map(CsvTool::ListColumns),
            "sample_csv" => args(call).map(CsvTool::SampleCsv),
            "run_test_polars_code" => args(call).map(CsvTool::RunTestCode),
            "run_final_polars_code" => args(call).map(CsvTool::RunFinalCode),
            other => Err(format!("Unknown tool call: {}", other)),
        }
    }

    fn reasoning(&self) -> &str {
        match self {
            CsvTool::ListColumns(args) => &args.reasoning,
            CsvTool::SampleCsv(args) => &args.reasoning,
            CsvTool::RunTestCode(args) | CsvTool::RunFinalCode(args) => &args.reasoning,
        }
    }
}

pub fn tools() -> Vec<Tool> {
    let reasoning = |description: &str| json!({"type": "string", "description": description});
    let csv_path = json!({"type": "string", "description": "Path to the CSV file"});

    vec![
        Tool::new(
            "list_columns",
            "Returns list of available columns in the CSV file",
            json!({
                "type": "object",
                "properties": {
                    "reasoning": reasoning("Why we need to list columns relative to user request"),
                    "csv_path": csv_path,
                },
                "required": ["reasoning", "csv_path"]
            }),
        ),
        Tool::new(
            "sample_csv",
            "Returns sample rows from the CSV file",
            json!({
                "type": "object",
                "properties": {
                    "reasoning": reasoning("Why we need to sample this data"),
                    "csv_path": csv_path,
                    "row_count": {
                        "type": "integer",
                        "description": "Number of rows to sample aim for 3-5 rows"
                    },
                },
                "required": ["reasoning", "csv_path", "row_count"]
            }),
        ),
        Tool::new(
            "run_test_polars_code",
            "Tests Polars Python code and returns results (only visible to agent)",
            json!({
                "type": "object",
                "properties": {
                    "reasoning": reasoning("Why we're testing this specific code"),
                    "polars_python_code": {
                        "type": "string",
                        "description": "The Complete Polars Python code to test"
                    },
                },
                "required": ["reasoning", "polars_python_code"]
            }),
        ),
        Tool::new(
            "run_final_polars_code",
            "Runs the final validated Polars code and shows results to user",
            json!({
                "type": "object",
                "properties": {
                    "reasoning": reasoning("Final explanation of how code satisfies user request"),
                    "polars_python_code": {
                        "type": "string",
                        "description": "The complete validated Polars Python code to run"
                    },
                },
                "required": ["reasoning", "polars_python_code"]
            }),
        ),
    ]
}

/// Header fields of the file, split on its sniffed delimiter
pub fn list_columns(csv_path: &Path) -> std::io::Result<Vec<String>> {
    let delimiter = detect_delimiter(csv_path, DEFAULT_SAMPLE_LINES, ',');
    let mut header = String::new();
    BufReader::new(File::open(csv_path)?).read_line(&mut header)?;
    let header = header.trim_end_matches(['\r', '\n']);
    if header.is_empty() {
        return Ok(Vec::new());
    }
    Ok(split_record(header, delimiter))
}

/// The header line plus the first `row_count` records, as raw text
pub fn sample_csv(csv_path: &Path, row_count: usize) -> std::io::Result<String> {
    let lines = BufReader::new(File::open(csv_path)?)
        .lines()
        .take(row_count + 1)
        .collect::<std::io::Result<Vec<_>>>()?;
    Ok(lines.join("\n"))
}

/// The final script and what it printed
#[derive(Debug, Clone, PartialEq)]
pub struct CsvAgentRun {
    pub code: String,
    pub output: String,
    pub iterations: u32,
}

pub struct CsvAgent<R: CommandRunner = SystemRunner> {
    provider: Box<dyn Provider>,
    runner: R,
    retry: RetryPolicy,
    tally: TokenTally,
}

impl<R: CommandRunner> CsvAgent<R> {
    pub fn new(provider: Box<dyn Provider>, runner: R, retry: RetryPolicy) -> Self {
        Self {
            provider,
            runner,
            retry,
            tally: TokenTally::new(),
        }
    }

    pub fn usage(&self) -> &TokenTally {
        &self.tally
    }

    pub async fn run(
        &self,
        user_request: &str,
        csv_path: &Path,
        compute: u32,
    ) -> Result<CsvAgentRun, CsvAgentError> {
        let prompt = load_prompt(
            CSV_AGENT,
            &json!({
                "user_request": user_request,
                "csv_file_path": csv_path.display().to_string(),
            }),
        )?;
        let tools = tools();
        let params = CompletionParams::default().requiring_tool();
        let mut messages = vec![Message::user().with_text(prompt)];

        for iteration in 1..=compute {
            tracing::info!("Agent loop {}/{}", iteration, compute);

            let reply = self
                .retry
                .run("CSV agent request", is_transient, |_| {
                    let messages = &messages;
                    let tools = &tools;
                    let params = &params;
                    async move {
                        let (reply, usage) =
                            self.provider.complete("", messages, tools, params).await?;
                        self.tally.record(&usage);
                        Ok(reply)
                    }
                })
                .await
                .map_err(CsvAgentError::Api)?;

            let request = reply
                .tool_requests()
                .first()
                .map(|request| (*request).clone())
                .ok_or(CsvAgentError::NoToolCall)?;

            messages.push(
                Message::assistant().with_tool_request(request.id.clone(), request.tool_call.clone()),
            );

            let (content, finished) = self.dispatch(&request).await;
            messages.push(Message::user().with_tool_response(request.id.clone(), Ok(content.to_string())));

            if let Some((code, output)) = finished {
                return Ok(CsvAgentRun {
                    code,
                    output,
                    iterations: iteration,
                });
            }
        }

        tracing::warn!("Reached maximum compute loops without final code");
        Err(CsvAgentError::ComputeExhausted { compute })
    }

    /// Run one tool call; the second value is set once the final script has run
    async fn dispatch(&self, request: &ToolRequest) -> (Value, Option<(String, String)>) {
        let call = match &request.tool_call {
            Ok(call) => call,
            Err(e) => {
                let message = format!("Argument validation failed: {}", e);
                tracing::warn!("{}", message);
                return (json!({"error": message}), None);
            }
        };
        tracing::info!("Function call: {}({})", call.name, call.arguments);

        let tool = match CsvTool::parse(call) {
            Ok(tool) => tool,
            Err(e) => {
                let message = format!("Argument validation failed for {}: {}", call.name, e);
                tracing::warn!("{}", message);
                return (json!({"error": message}), None);
            }
        };
        tracing::info!("{} reasoning: {}", call.name, tool.reasoning());

        let result = match &tool {
            CsvTool::ListColumns(args) => list_columns(Path::new(&args.csv_path))
                .map(|columns| json!(columns).to_string())
                .map_err(|e| format!("Error listing columns: {}", e)),
            CsvTool::SampleCsv(args) => sample_csv(Path::new(&args.csv_path), args.row_count)
                .map_err(|e| format!("Error sampling CSV: {}", e)),
            CsvTool::RunTestCode(args) | CsvTool::RunFinalCode(args) => {
                self.run_polars(&args.polars_python_code).await
            }
        };

        match (result, tool) {
            (Ok(output), CsvTool::RunFinalCode(args)) => {
                let content = json!({"result": output});
                (content, Some((args.polars_python_code, output)))
            }
            (Ok(output), _) => {
                tracing::debug!("Function call result:\n{}", output);
                (json!({"result": output}), None)
            }
            (Err(message), _) => {
                tracing::warn!("{}", message);
                (json!({"error": message}), None)
            }
        }
    }

    /// Write the script to a temp file and run it with `uv run --with polars`
    async fn run_polars(&self, code: &str) -> Result<String, String> {
        let mut script = tempfile::Builder::new()
            .prefix("polars_code_")
            .suffix(".py")
            .tempfile()
            .map_err(|e| format!("Error creating script file: {}", e))?;
        script
            .write_all(code.as_bytes())
            .and_then(|_| script.flush())
            .map_err(|e| format!("Error writing script file: {}", e))?;

        let path = script.path().display().to_string();
        let output = self
            .runner
            .run("uv", &["run", "--with", "polars", &path])
            .await
            .map_err(|e| e.to_string())?;
        Ok(format!("{}{}", output.stdout, output.stderr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::AgentError;
    use crate::models::message::MessageContent;
    use crate::process::{CommandOutput, ScriptedRunner};
    use crate::providers::mock::MockProvider;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write_csv(contents: &str) -> (TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("users.csv");
        std::fs::write(&path, contents).unwrap();
        (dir, path)
    }

    fn call(name: &str, arguments: Value) -> Message {
        Message::assistant().with_tool_request(format!("call_{}", name), Ok(ToolCall::new(name, arguments)))
    }

    fn agent(provider: MockProvider, runner: ScriptedRunner) -> CsvAgent<ScriptedRunner> {
        CsvAgent::new(Box::new(provider), runner, RetryPolicy::new(1, Duration::ZERO))
    }

    fn tool_payloads(messages: &[Message]) -> Vec<Value> {
        messages
            .iter()
            .flat_map(|message| message.content.iter())
            .filter_map(MessageContent::as_tool_response)
            .filter_map(|response| response.tool_result.as_ref().ok())
            .filter_map(|content| serde_json::from_str(content).ok())
            .collect()
    }

    #[test]
    fn test_list_columns_and_sample() {
        let (_dir, path) = write_csv("id;\"last; first\";age\n1;\"Doe; Jane\";30\n2;\"Roe; Rick\";41\n");

        assert_eq!(list_columns(&path).unwrap(), vec!["id", "last; first", "age"]);
        assert_eq!(
            sample_csv(&path, 1).unwrap(),
            "id;\"last; first\";age\n1;\"Doe; Jane\";30"
        );
        assert!(list_columns(Path::new("/no/such/file.csv")).is_err());
    }

    #[test]
    fn test_parse_tool_arguments() {
        let parsed = CsvTool::parse(&ToolCall::new(
            "sample_csv",
            json!({"reasoning": "look", "csv_path": "a.csv", "row_count": 3}),
        ));
        assert!(matches!(parsed, Ok(CsvTool::SampleCsv(SampleCsvArgs { row_count: 3, .. }))));

        let missing = CsvTool::parse(&ToolCall::new("list_columns", json!({"reasoning": "look"})));
        assert!(missing.unwrap_err().contains("csv_path"));

        let unknown = CsvTool::parse(&ToolCall::new("drop_table", json!({})));
        assert_eq!(unknown.unwrap_err(), "Unknown tool call: drop_table");
    }

    #[tokio::test]
    async fn test_run_to_final_code() {
        let (_dir, path) = write_csv("name,age\nada,36\ngrace,45\n");
        let csv_path = path.display().to_string();
        let provider = MockProvider::new(vec![
            call("list_columns", json!({"reasoning": "see columns", "csv_path": csv_path})),
            call(
                "run_test_polars_code",
                json!({"reasoning": "try it", "polars_python_code": "print(1)"}),
            ),
            call(
                "run_final_polars_code",
                json!({"reasoning": "done", "polars_python_code": "print(40.5)"}),
            ),
        ]);
        let runner = ScriptedRunner::new().with_response("uv", CommandOutput::ok("40.5\n"));
        let agent = agent(provider.clone(), runner);

        let run = agent.run("average age", &path, 10).await.unwrap();

        assert_eq!(run.code, "print(40.5)");
        assert_eq!(run.output, "40.5\n");
        assert_eq!(run.iterations, 3);
        assert_eq!(agent.usage().total(), 45);

        let requests = provider.requests();
        let payloads = tool_payloads(&requests[2]);
        assert_eq!(payloads[0], json!({"result": "[\"name\",\"age\"]"}));
        assert_eq!(payloads[1], json!({"result": "40.5\n"}));
        assert_eq!(agent.runner.calls().len(), 2);
        assert!(agent.runner.calls()[0].starts_with("uv run --with polars "));
    }

    #[tokio::test]
    async fn test_validation_errors_are_reported_to_model() {
        let (_dir, path) = write_csv("a,b\n1,2\n");
        let provider = MockProvider::new(vec![
            call("sample_csv", json!({"reasoning": "peek"})),
            Message::assistant().with_tool_request(
                "call_bad",
                Err(AgentError::InvalidParameters("not json".into())),
            ),
            call("run_final_polars_code", json!({"reasoning": "go", "polars_python_code": "x"})),
        ]);
        let agent = agent(
            provider.clone(),
            ScriptedRunner::new().with_response("uv", CommandOutput::failed(1, "NameError: x")),
        );

        let run = agent.run("?", &path, 5).await.unwrap();
        assert_eq!(run.output, "NameError: x");

        let payloads = tool_payloads(&provider.requests()[2]);
        let first = payloads[0]["error"].as_str().unwrap();
        assert!(first.starts_with("Argument validation failed for sample_csv:"));
        assert_eq!(
            payloads[1],
            json!({"error": "Argument validation failed: Invalid parameters: not json"})
        );
    }

    #[tokio::test]
    async fn test_missing_uv_then_compute_exhausted() {
        let (_dir, path) = write_csv("a\n1\n");
        let provider = MockProvider::new(vec![
            call("run_test_polars_code", json!({"reasoning": "r", "polars_python_code": "x"})),
            call("run_final_polars_code", json!({"reasoning": "r", "polars_python_code": "x"})),
        ]);
        let agent = agent(provider.clone(), ScriptedRunner::new());

        let err = agent.run("?", &path, 2).await.unwrap_err();
        assert!(matches!(err, CsvAgentError::ComputeExhausted { compute: 2 }));

        let payloads = tool_payloads(&provider.requests()[1]);
        let error = payloads[0]["error"].as_str().unwrap();
        assert!(error.starts_with("'uv' command not found."));
    }

    #[tokio::test]
    async fn test_reply_without_tool_call_is_an_error() {
        let (_dir, path) = write_csv("a\n1\n");
        let agent = agent(
            MockProvider::new(vec![Message::assistant().with_text("Here is your answer")]),
            ScriptedRunner::new(),
        );
        assert!(matches!(
            agent.run("?", &path, 3).await,
            Err(CsvAgentError::NoToolCall)
        ));
    }

    #[test]
    fn test_tool_names_are_valid() {
        let names: Vec<_> = tools().into_iter().map(|tool| tool.name).collect();
        assert_eq!(
            names,
            vec!["list_columns", "sample_csv", "run_test_polars_code", "run_final_polars_code"]
        );
    }
}
