use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use sfa::retry::RetryPolicy;
use sfa::xsv::{V1Outcome, XsvAnalyzer, XsvTool};
use sfa_cli::args::{build_provider, load_settings, CliProviderVariant};
use sfa_cli::{logging, render};

/// Translate a question about a CSV file into an xsv command and run it
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// What you want to know about the file
    query: String,

    /// Path to the CSV file
    #[arg(short = 'f', long)]
    csv_file: PathBuf,

    #[arg(short = 'p', long, value_enum)]
    llm_provider: CliProviderVariant,

    /// Write the command's output to this file instead of the terminal
    #[arg(short, long)]
    output_file: Option<PathBuf>,

    /// Model to use instead of the provider default
    #[arg(short, long)]
    model_name: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if !cli.csv_file.is_file() {
        bail!("CSV file not found at {}", cli.csv_file.display());
    }

    let settings = load_settings()?;
    let provider = build_provider(cli.llm_provider.into(), cli.model_name.clone(), &settings)?;
    let analyzer = XsvAnalyzer::new(
        provider,
        XsvTool::default(),
        RetryPolicy::from(&settings.retry),
    );

    let outcome = render::with_spinner(
        "Generating xsv command",
        analyzer.run(&cli.query, &cli.csv_file, cli.output_file.as_deref()),
    )
    .await?;

    match &outcome {
        V1Outcome::GenerationFailed => render::failure("Failed to generate xsv command."),
        V1Outcome::ExecutionFailed { command, stderr } => {
            render::print_block(command, Some("Bash"), "xsv command");
            render::failure(&format!("Error executing xsv command:\n{}", stderr));
        }
        V1Outcome::Written { command, path } => {
            render::print_block(command, Some("Bash"), "xsv command");
            render::success(&format!("Output successfully written to {}", path.display()));
        }
        V1Outcome::Output { command, stdout } => {
            render::print_block(command, Some("Bash"), "xsv command");
            let language = render::looks_like_csv(stdout).then_some("CSV");
            render::print_block(stdout, language, "xsv output");
        }
        V1Outcome::NoOutput { command } => {
            render::print_block(command, Some("Bash"), "xsv command");
            render::warning("Command executed successfully but produced no output.");
        }
    }

    render::print_usage(analyzer.usage());

    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
