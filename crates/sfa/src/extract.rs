//! Pulling usable payloads out of free-form model replies.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref MERMAID_BLOCK: Regex = Regex::new(r"(?i)```mermaid\s*([\s\S]*?)\s*```").unwrap();
    static ref CONVERSATIONAL: Regex =
        Regex::new(r"(?i)(here is|sure,|apologies|sorry|fixed code|hope this helps)").unwrap();
    static ref JSON_FENCE: Regex = Regex::new(r"(?i)^```(?:json)?\s*([\s\S]*?)\s*```$").unwrap();
}

const DIAGRAM_KEYWORDS: &[&str] = &[
    "graph",
    "sequencediagram",
    "classdiagram",
    "statediagram",
    "gantt",
    "pie",
    "flowchart",
    "erdiagram",
    "journey",
    "requirementdiagram",
    "gitgraph",
];

/// The contents of the first ```mermaid block, or the whole reply if it already looks like bare code
pub fn extract_mermaid_code(text: &str) -> Option<String> {
    if let Some(captures) = MERMAID_BLOCK.captures(text) {
        return captures.get(1).map(|m| m.as_str().trim().to_string());
    }

    let trimmed = text.trim();
    let lowered = trimmed.to_lowercase();
    let likely_code = DIAGRAM_KEYWORDS
        .iter()
        .any(|keyword| lowered.starts_with(keyword));
    if !likely_code || CONVERSATIONAL.is_match(trimmed) {
        return None;
    }
    if trimmed.contains("<corrected_code>") || trimmed.contains("<prompt>") {
        return None;
    }

    tracing::warn!("No ```mermaid block found, falling back to the raw reply");
    Some(trimmed.to_string())
}

/// Reduce a model reply to the bare shell command it contains
pub fn sanitize_command(text: &str) -> String {
    let mut command = text.trim();
    if command.len() >= 6 && command.starts_with("```") && command.ends_with("```") {
        command = command[3..command.len() - 3].trim();
        for tag in ["bash", "sh"] {
            if let Some(rest) = command.strip_prefix(tag) {
                if rest.is_empty() || rest.starts_with(char::is_whitespace) {
                    command = rest.trim();
                    break;
                }
            }
        }
    }
    command.to_string()
}

/// Unwrap a ```json fence so the body can be handed to serde
pub fn strip_json_fence(text: &str) -> &str {
    let trimmed = text.trim();
    match JSON_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(body) => body.as_str(),
        None => trimmed,
    }
}
