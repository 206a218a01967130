use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;

use sfa::csv_agent::{CsvAgent, DEFAULT_COMPUTE, DEFAULT_MODEL, UV_INSTALL_HINT};
use sfa::process::{require_binary, SystemRunner};
use sfa::retry::RetryPolicy;
use sfa_cli::args::{build_provider, load_settings, CliProviderVariant};
use sfa_cli::{logging, render};

/// Explore a CSV file with an LLM and run the Polars script it settles on
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to input CSV file
    #[arg(short, long)]
    input: PathBuf,

    /// The user's request
    #[arg(short, long)]
    prompt: String,

    /// Maximum number of agent loops
    #[arg(short, long, default_value_t = DEFAULT_COMPUTE)]
    compute: u32,

    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, value_enum, default_value_t = CliProviderVariant::Openai)]
    provider: CliProviderVariant,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if !cli.input.is_file() {
        bail!("CSV file not found at {}", cli.input.display());
    }
    require_binary("uv", UV_INSTALL_HINT)?;

    let settings = load_settings()?;
    let provider = build_provider(cli.provider.into(), Some(cli.model.clone()), &settings)?;
    let agent = CsvAgent::new(provider, SystemRunner::new(), RetryPolicy::from(&settings.retry));

    let result = render::with_spinner(
        "Exploring the data",
        agent.run(&cli.prompt, &cli.input, cli.compute),
    )
    .await;

    render::print_usage(agent.usage());

    let run = result?;
    render::print_block(&run.code, Some("Python"), "Final Polars code");
    render::print_block(&run.output, None, "Result");
    render::success(&format!("Finished after {} agent loop(s)", run.iterations));
    Ok(())
}
