use anyhow::Result;
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Mutex;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sfa::csv_agent::CsvAgent;
use sfa::mermaid::{DiagramValidator, FixOutcome, MermaidError, MermaidFixer, Validation};
use sfa::process::{CommandOutput, ScriptedRunner};
use sfa::providers::base::Provider;
use sfa::providers::configs::{AnthropicProviderConfig, OpenAiProviderConfig, ProviderConfig};
use sfa::providers::factory::get_provider;
use sfa::retry::RetryPolicy;
use sfa::xsv::{V2Outcome, V2Request, XsvAnalyzerV2, XsvTool};

fn openai(server: &MockServer, model: &str) -> Result<Box<dyn Provider>> {
    get_provider(ProviderConfig::OpenAi(OpenAiProviderConfig {
        host: server.uri(),
        api_key: "test_api_key".to_string(),
        model: model.to_string(),
    }))
}

fn no_wait() -> RetryPolicy {
    RetryPolicy::new(3, Duration::ZERO)
}

fn openai_text(text: &str) -> Value {
    json!({
        "choices": [{"message": {"role": "assistant", "content": text}}],
        "usage": {"prompt_tokens": 100, "completion_tokens": 20, "total_tokens": 120}
    })
}

fn openai_tool_call(id: &str, name: &str, arguments: Value) -> Value {
    json!({
        "choices": [{
            "message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": arguments.to_string()}
                }]
            }
        }],
        "usage": {"prompt_tokens": 50, "completion_tokens": 10, "total_tokens": 60}
    })
}

/// Mount replies that are served once each, in order
async fn mount_sequence(server: &MockServer, route: &str, replies: Vec<Value>) {
    for reply in replies {
        Mock::given(method("POST"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(reply))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }
}

#[tokio::test]
async fn test_xsv_v2_end_to_end_over_openai() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir()?;
    let csv = dir.path().join("sales.csv");
    std::fs::write(&csv, "region|amount\nnorth|10\nsouth|32\n")?;
    let command = format!("xsv count -d '|' {}", csv.display());

    mount_sequence(
        &server,
        "/v1/chat/completions",
        vec![
            openai_tool_call("call_1", "get_xsv_subcommand_help", json!({"subcommand_name": "count"})),
            openai_text(&json!({"xsv_command": command}).to_string()),
            openai_text("The file has 2 sales records."),
        ],
    )
    .await;

    let runner = ScriptedRunner::new()
        .with_response("xsv -h", CommandOutput::ok("Usage:\n    xsv <command>"))
        .with_response("xsv count -h", CommandOutput::ok("Count the rows in CSV data."))
        .with_response(&command, CommandOutput::ok("2\n"));
    let analyzer = XsvAnalyzerV2::new(openai(&server, "gpt-4o-mini")?, XsvTool::new(runner), no_wait());

    let report = dir.path().join("report.txt");
    let outcome = analyzer
        .run(&V2Request {
            query: "how many sales are there?".to_string(),
            file: csv.clone(),
            delimiter: None,
            output_file: Some(report.clone()),
        })
        .await?;

    let V2Outcome::Completed(run) = outcome else {
        panic!("Expected a completed run, got {:?}", outcome);
    };
    assert_eq!(run.execution.stdout, "2");
    assert_eq!(run.answer.as_deref(), Some("The file has 2 sales records."));
    assert_eq!(analyzer.usage().input(), 250);
    assert_eq!(analyzer.usage().output(), 50);

    let report = std::fs::read_to_string(report)?;
    assert!(report.starts_with("User Query: how many sales are there?\n"));
    assert!(report.ends_with("Synthesized Answer:\nThe file has 2 sales records.\n"));

    let requests = server.received_requests().await.unwrap_or_default();
    assert_eq!(requests.len(), 3);
    let second: Value = serde_json::from_slice(&requests[1].body)?;
    let tool_message = second["messages"]
        .as_array()
        .and_then(|messages| messages.iter().find(|m| m["role"] == "tool"))
        .cloned()
        .unwrap_or_default();
    assert_eq!(tool_message["tool_call_id"], "call_1");
    assert_eq!(tool_message["content"], "Count the rows in CSV data.");
    Ok(())
}

#[tokio::test]
async fn test_csv_agent_end_to_end_over_openai() -> Result<()> {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir()?;
    let csv = dir.path().join("users.csv");
    std::fs::write(&csv, "name,age\nada,36\ngrace,45\n")?;
    let csv_path = csv.display().to_string();

    mount_sequence(
        &server,
        "/v1/chat/completions",
        vec![
            openai_tool_call(
                "call_1",
                "list_columns",
                json!({"reasoning": "find the age column", "csv_path": csv_path}),
            ),
            openai_tool_call(
                "call_2",
                "run_final_polars_code",
                json!({"reasoning": "mean of age", "polars_python_code": "print(40.5)"}),
            ),
        ],
    )
    .await;

    let agent = CsvAgent::new(
        openai(&server, "o3-mini")?,
        ScriptedRunner::new().with_response("uv", CommandOutput::ok("40.5\n")),
        no_wait(),
    );

    let run = agent.run("What is the average age?", &csv, 10).await?;
    assert_eq!(run.output, "40.5\n");
    assert_eq!(run.iterations, 2);

    let requests = server.received_requests().await.unwrap_or_default();
    let first: Value = serde_json::from_slice(&requests[0].body)?;
    assert_eq!(first["tool_choice"], "required");
    assert!(first.get("temperature").is_none());
    Ok(())
}

/// Accepts a diagram once it contains an arrow
struct ArrowValidator {
    calls: Mutex<u32>,
}

#[async_trait]
impl DiagramValidator for ArrowValidator {
    async fn validate(&self, code: &str) -> Result<Validation, MermaidError> {
        if let Ok(mut calls) = self.calls.lock() {
            *calls += 1;
        }
        if code.contains("-->") {
            Ok(Validation::Valid)
        } else {
            Ok(Validation::Invalid("Parse error on line 2: expecting '-->'".to_string()))
        }
    }
}

#[tokio::test]
async fn test_mermaid_fixer_over_anthropic() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .and(body_partial_json(json!({"max_tokens": 2048})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "content": [{
                "type": "text",
                "text": "Here you go:\n```mermaid\ngraph TD\n    A --> B\n```"
            }],
            "usage": {"input_tokens": 80, "output_tokens": 15}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let provider = get_provider(ProviderConfig::Anthropic(AnthropicProviderConfig {
        host: server.uri(),
        api_key: "test_api_key".to_string(),
        model: "claude-3-5-sonnet-20240620".to_string(),
    }))?;
    let fixer = MermaidFixer::new(
        provider,
        Box::new(ArrowValidator {
            calls: Mutex::new(0),
        }),
        no_wait(),
    )
    .with_iteration_pause(Duration::ZERO);

    let outcome = fixer.run("graph TD\n    A - B", 5).await?;

    assert_eq!(
        outcome,
        FixOutcome::Fixed {
            code: "graph TD\n    A --> B".to_string(),
            iterations: 2
        }
    );
    assert_eq!(fixer.usage().total(), 95);
    Ok(())
}

#[tokio::test]
async fn test_rate_limit_is_retried_then_reported() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(429))
        .expect(3)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir()?;
    let csv = dir.path().join("a.csv");
    std::fs::write(&csv, "a,b\n1,2\n")?;

    let runner = ScriptedRunner::new().with_response("xsv -h", CommandOutput::ok("Usage"));
    let analyzer = XsvAnalyzerV2::new(openai(&server, "gpt-4o-mini")?, XsvTool::new(runner), no_wait());

    let outcome = analyzer
        .run(&V2Request {
            query: "anything".to_string(),
            file: csv,
            delimiter: Some(",".to_string()),
            output_file: None,
        })
        .await?;

    assert!(matches!(outcome, V2Outcome::ApiFailed(_)));
    assert!(analyzer.usage().is_empty());
    Ok(())
}
