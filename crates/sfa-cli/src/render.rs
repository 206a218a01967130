use bat::WrappingMode;
use console::style;
use sfa::usage::TokenTally;
use std::future::Future;
use tracing::level_filters::LevelFilter;

pub fn heading(text: &str) {
    println!("\n{}", style(text).bold().magenta());
}

pub fn success(text: &str) {
    println!("{} {}", style("✔").green(), style(text).green());
}

pub fn warning(text: &str) {
    println!("{} {}", style("!").yellow(), style(text).yellow());
}

pub fn failure(text: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), text);
}

/// Print a titled block through bat, or as plain text when bat cannot highlight it
pub fn print_block(content: &str, language: Option<&str>, title: &str) {
    let mut printer = bat::PrettyPrinter::new();
    printer
        .input(bat::Input::from_bytes(content.as_bytes()).name(title))
        .grid(true)
        .header(true)
        .wrapping_mode(WrappingMode::Character);
    if let Some(language) = language {
        printer.language(language);
    }

    if !matches!(printer.print(), Ok(true)) {
        println!("{}", style(title).bold());
        println!("{}", content);
    }
}

/// Rough check for delimiter-separated output worth highlighting as CSV
pub fn looks_like_csv(text: &str) -> bool {
    let mut lines = text.lines().filter(|line| !line.trim().is_empty());
    match (lines.next(), lines.next()) {
        (Some(first), Some(second)) => {
            [',', '\t', ';', '|'].iter().any(|delimiter| {
                let columns = first.matches(*delimiter).count();
                columns > 0 && second.matches(*delimiter).count() == columns
            })
        }
        _ => false,
    }
}

pub fn print_usage(tally: &TokenTally) {
    heading("Token Usage");
    if tally.is_empty() {
        println!("{}", style("No token usage recorded.").dim());
        return;
    }
    println!("  {:<16}{:>10}", "Input tokens", tally.input());
    println!("  {:<16}{:>10}", "Output tokens", tally.output());
    println!(
        "  {:<16}{:>10}",
        style("Total tokens").bold(),
        style(tally.total()).bold()
    );
}

/// Show a spinner on interactive terminals while `work` runs
/// Spinner frames and log lines share stderr, so the spinner only runs when logging is quiet
fn spinner_allowed(attended: bool, max_level: LevelFilter) -> bool {
    attended && max_level < LevelFilter::INFO
}

pub async fn with_spinner<F: Future>(message: &str, work: F) -> F::Output {
    if !spinner_allowed(console::user_attended_stderr(), LevelFilter::current()) {
        return work.await;
    }
    let spin = cliclack::spinner();
    spin.start(message);
    let output = work.await;
    spin.stop("");
    output
}
