//! Delimiter sniffing for CSV-like files.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Candidates in tie-break order
const CANDIDATES: [char; 4] = [',', '\t', ';', '|'];
pub const DEFAULT_SAMPLE_LINES: usize = 5;

#[derive(Error, Debug, PartialEq)]
pub enum DelimiterError {
    #[error("Delimiter must be a single character (or an escape like \\t), got '{0}'")]
    Invalid(String),
}

/// Count `delimiter` outside double-quoted spans
fn count_unquoted(line: &str, delimiter: char) -> usize {
    let mut in_quotes = false;
    let mut count = 0;
    for c in line.chars() {
        if c == '"' {
            in_quotes = !in_quotes;
        } else if c == delimiter && !in_quotes {
            count += 1;
        }
    }
    count
}

/// Most common per-line count of `delimiter` and the share of lines that have it
fn consistency(lines: &[&str], delimiter: char) -> (usize, f64) {
    let mut frequencies: HashMap<usize, usize> = HashMap::new();
    for line in lines {
        *frequencies.entry(count_unquoted(line, delimiter)).or_insert(0) += 1;
    }
    let (mode, hits) = frequencies
        .into_iter()
        .max_by(|(count_a, hits_a), (count_b, hits_b)| {
            hits_a.cmp(hits_b).then(count_a.cmp(count_b))
        })
        .unwrap_or((0, 0));
    (mode, hits as f64 / lines.len() as f64)
}

/// Guess the delimiter of a text sample, or None when no candidate is consistent enough
pub fn sniff_delimiter(sample: &str) -> Option<char> {
    let lines: Vec<&str> = sample.lines().filter(|line| !line.trim().is_empty()).collect();
    if lines.is_empty() {
        return None;
    }

    let scores: Vec<(char, usize, f64)> = CANDIDATES
        .iter()
        .map(|&delimiter| {
            let (mode, share) = consistency(&lines, delimiter);
            (delimiter, mode, share)
        })
        .collect();

    // Relax the required share from 100% to 90% one point at a time
    for step in 0..=10 {
        let threshold = 1.0 - step as f64 / 100.0;
        if let Some(&(delimiter, _, _)) = scores
            .iter()
            .find(|(_, mode, share)| *mode > 0 && *share + f64::EPSILON >= threshold)
        {
            return Some(delimiter);
        }
    }
    None
}

/// Sniff the delimiter from the first `sample_lines` lines of a file, falling back to `default`
pub fn detect_delimiter(path: &Path, sample_lines: usize, default: char) -> char {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            tracing::error!(
                "Could not open '{}': {}. Using default delimiter {:?}",
                path.display(),
                e,
                default
            );
            return default;
        }
    };

    let mut sample = String::new();
    for line in BufReader::new(file).lines().take(sample_lines) {
        match line {
            Ok(line) => {
                sample.push_str(&line);
                sample.push('\n');
            }
            Err(e) => {
                tracing::error!(
                    "Error reading '{}': {}. Using default delimiter {:?}",
                    path.display(),
                    e,
                    default
                );
                return default;
            }
        }
    }

    if sample.is_empty() {
        tracing::warn!(
            "File '{}' is empty. Using default delimiter {:?}",
            path.display(),
            default
        );
        return default;
    }

    match sniff_delimiter(&sample) {
        Some(delimiter) => {
            tracing::info!("Detected delimiter {:?} for '{}'", delimiter, path.display());
            delimiter
        }
        None => {
            tracing::warn!(
                "Could not detect a delimiter for '{}'. Using default {:?}",
                path.display(),
                default
            );
            default
        }
    }
}

/// Turn a user-typed delimiter such as `\t` into the character it names
pub fn unescape_delimiter(raw: &str) -> Result<char, DelimiterError> {
    let mut chars = raw.chars();
    let unescaped = match (chars.next(), chars.next(), chars.next()) {
        (Some('\\'), Some(escaped), None) => match escaped {
            't' => '\t',
            'n' => '\n',
            'r' => '\r',
            '0' => '\0',
            other => other,
        },
        (Some(c), None, None) => c,
        _ => return Err(DelimiterError::Invalid(raw.to_string())),
    };
    Ok(unescaped)
}

/// Printable form of a delimiter, e.g. `\t` for tab
pub fn display_delimiter(delimiter: char) -> String {
    delimiter.escape_default().to_string()
}

/// Split one record on `delimiter`, honouring double quotes and `""` escapes
pub fn split_record(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.trim_end_matches(['\r', '\n']).chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            c if c == delimiter && !in_quotes => fields.push(std::mem::take(&mut field)),
            c => field.push(c),
        }
    }
    fields.push(field);
    fields
}
