use anyhow::{Context, Result};
use clap::Parser;
use serde_json::Value;
use std::path::PathBuf;

use sfa::report::render_modes_report;
use sfa_cli::{logging, render};

/// Render a custom-modes JSON file as an HTML table
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Custom modes JSON file
    #[arg(short, long)]
    input: PathBuf,

    /// Where to write the HTML report
    #[arg(short, long)]
    output: PathBuf,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    let raw = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("JSON file not found at {}", cli.input.display()))?;
    let data: Value = serde_json::from_str(&raw)
        .with_context(|| format!("Error parsing JSON file {}", cli.input.display()))?;

    let html = render_modes_report(&data).context("Could not render the report")?;
    std::fs::write(&cli.output, html)
        .with_context(|| format!("Error writing to file {}", cli.output.display()))?;

    render::success(&format!("Successfully generated report: {}", cli.output.display()));
    Ok(())
}
