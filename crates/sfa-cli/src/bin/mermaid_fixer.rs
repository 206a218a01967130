use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use std::io::{IsTerminal, Read};
use std::path::PathBuf;

use sfa::mermaid::{
    FixOutcome, MermaidFixer, MmdcValidator, DEFAULT_MAX_ITERATIONS, DEFAULT_MODEL,
    MMDC_INSTALL_HINT,
};
use sfa::process::require_binary;
use sfa::retry::RetryPolicy;
use sfa_cli::args::{build_provider, load_settings, CliProviderVariant};
use sfa_cli::{logging, render};

/// Fixes broken MermaidJS code using mmdc validation and an LLM
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Mermaid code string
    #[arg(short, long, conflicts_with = "input")]
    code: Option<String>,

    /// Path to the input Mermaid file (.mmd)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Path to save the fixed Mermaid file
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Maximum fixing iterations
    #[arg(long, default_value_t = DEFAULT_MAX_ITERATIONS)]
    max_iterations: u32,

    /// Model to request fixes from
    #[arg(short, long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(short, long, value_enum, default_value_t = CliProviderVariant::Anthropic)]
    provider: CliProviderVariant,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn read_input(cli: &Cli) -> Result<String> {
    if let Some(code) = &cli.code {
        return Ok(code.clone());
    }
    if let Some(path) = &cli.input {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Could not read input file {}", path.display()));
    }
    if !std::io::stdin().is_terminal() {
        tracing::info!("Reading Mermaid code from stdin");
        let mut code = String::new();
        std::io::stdin()
            .read_to_string(&mut code)
            .context("Could not read Mermaid code from stdin")?;
        return Ok(code);
    }

    let _ = Cli::command().print_help();
    bail!("No input provided. Use --code, --input, or pipe code via stdin.")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let initial_code = read_input(&cli)?;
    if initial_code.trim().is_empty() {
        bail!("Input code is empty.");
    }

    require_binary("mmdc", MMDC_INSTALL_HINT)?;
    let settings = load_settings()?;
    let provider = build_provider(cli.provider.into(), Some(cli.model.clone()), &settings)?;

    let fixer = MermaidFixer::new(
        provider,
        Box::new(MmdcValidator::new()),
        RetryPolicy::from(&settings.retry),
    );

    render::heading("Mermaid Fixer");
    render::print_block(initial_code.trim(), None, "Initial code");

    let outcome = render::with_spinner(
        "Validating and fixing",
        fixer.run(&initial_code, cli.max_iterations),
    )
    .await?;

    render::print_usage(fixer.usage());

    match &outcome {
        FixOutcome::Fixed { iterations, .. } => {
            render::success(&format!("Mermaid code is valid after {} iteration(s)", iterations))
        }
        FixOutcome::Stalled { .. } => {
            render::warning("The model returned unchanged code; this result was not validated")
        }
        FixOutcome::Exhausted { last_code } => {
            render::print_block(last_code, None, "Last attempted code");
            bail!("Failed to fix Mermaid code within {} iterations", cli.max_iterations);
        }
        FixOutcome::AiFailed => bail!("Could not get a usable fix from the model"),
        FixOutcome::ValidatorMissing => bail!("'mmdc' command not found. {}", MMDC_INSTALL_HINT),
    }

    if let Some(code) = outcome.final_code() {
        render::heading("Final Mermaid Code");
        println!("{}", code);

        if let Some(path) = &cli.output {
            match std::fs::write(path, code) {
                Ok(()) => render::success(&format!("Fixed code saved to {}", path.display())),
                Err(e) => render::failure(&format!(
                    "Could not write output file {}: {}",
                    path.display(),
                    e
                )),
            }
        }
    }

    Ok(())
}
