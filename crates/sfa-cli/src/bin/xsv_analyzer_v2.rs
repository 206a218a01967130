use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use sfa::providers::factory::ProviderType;
use sfa::retry::RetryPolicy;
use sfa::xsv::{V2Outcome, V2Request, XsvAnalyzerV2, XsvTool, DEFAULT_MAX_TURNS};
use sfa_cli::args::{build_provider, load_settings, CliProviderVariant};
use sfa_cli::{logging, render};

/// Answer questions about a CSV file by planning and running xsv commands
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// The question to answer
    user_query: String,

    /// Path to the CSV (or other delimited) file
    #[arg(short, long)]
    file: PathBuf,

    /// Maximum model turns before giving up
    #[arg(short = 't', long, default_value_t = DEFAULT_MAX_TURNS)]
    max_turns: u32,

    #[arg(short, long, default_value = "gpt-4o-mini")]
    model: String,

    /// Provider override; inferred from the model name otherwise
    #[arg(short, long, value_enum)]
    provider: Option<CliProviderVariant>,

    /// Save the query, command, output and answer to this file
    #[arg(short, long)]
    output_file: Option<PathBuf>,

    /// Field delimiter, e.g. ';' or '\t'; sniffed from the file when omitted
    #[arg(short, long)]
    delimiter: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let provider_type = cli
        .provider
        .map(ProviderType::from)
        .unwrap_or_else(|| ProviderType::infer_from_model(&cli.model));
    let settings = load_settings()?;
    let provider = build_provider(provider_type, Some(cli.model.clone()), &settings)?;

    let analyzer = XsvAnalyzerV2::new(
        provider,
        XsvTool::default(),
        RetryPolicy::from(&settings.retry),
    )
    .with_max_turns(cli.max_turns);

    let request = V2Request {
        query: cli.user_query.clone(),
        file: cli.file.clone(),
        delimiter: cli.delimiter.clone(),
        output_file: cli.output_file.clone(),
    };
    let outcome = render::with_spinner("Working on your question", analyzer.run(&request))
        .await
        .context("xsv analysis could not start")?;

    let succeeded = match &outcome {
        V2Outcome::LlmDeclined(reason) => {
            render::warning(&format!("Could not generate xsv command. Reason: {}", reason));
            true
        }
        V2Outcome::ApiFailed(error) => {
            render::failure(&format!("API retries exhausted: {}", error));
            false
        }
        V2Outcome::TurnLimit => {
            render::failure("Max interaction turns reached, but no xsv command was generated.");
            false
        }
        V2Outcome::Completed(run) => {
            render::print_block(&run.command, Some("Bash"), "xsv command");
            let execution = &run.execution;
            if !execution.stdout.is_empty() {
                let language = render::looks_like_csv(&execution.stdout).then_some("CSV");
                render::print_block(&execution.stdout, language, "xsv stdout");
            }
            if !execution.stderr.is_empty() {
                render::print_block(&execution.stderr, None, "xsv stderr");
            }

            if !execution.success {
                render::failure("Skipping answer synthesis because the xsv command failed.");
                false
            } else if let Some(answer) = &run.answer {
                render::heading("Answer");
                println!("{}", answer);
                true
            } else {
                render::warning("Could not synthesize an answer from the xsv output.");
                true
            }
        }
    };

    render::print_usage(analyzer.usage());

    if !succeeded {
        std::process::exit(1);
    }
    Ok(())
}
