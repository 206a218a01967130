//! HTML overview of an editor custom-modes file.

use serde_json::{json, Value};

use crate::prompt_template::load_prompt;

const MODES_REPORT: &str = include_str!("templates/modes_report.html");
const MISSING_MODES_ROW: &str = r#"            <tr><td colspan="6">Error: "customModes" key not found or is not a list in the JSON data.</td></tr>"#;

/// Escape the five HTML-significant characters
///
/// `tera::escape_html` also rewrites `/` as `&#x2F;`, which would change `fileRegex` patterns in the report.
pub fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            other => escaped.push(other),
        }
    }
    escaped
}

fn format_group(group: &Value) -> String {
    match group {
        Value::String(name) => escape_html(name),
        Value::Array(pair) if pair.len() == 2 && pair[0].is_string() => {
            let name = escape_html(pair[0].as_str().unwrap_or_default());
            let mut constraints = Vec::new();
            if let Value::Object(details) = &pair[1] {
                if let Some(regex) = details.get("fileRegex") {
                    constraints.push(format!(
                        "fileRegex: <code>{}</code>",
                        escape_html(&value_text(regex))
                    ));
                }
                if let Some(description) = details.get("description") {
                    constraints.push(format!("({})", escape_html(&value_text(description))));
                }
            }
            if constraints.is_empty() {
                name
            } else {
                format!("{} [{}]", name, constraints.join(", "))
            }
        }
        other => format!("<code>{}</code>", escape_html(&other.to_string())),
    }
}

fn format_groups(groups: Option<&Value>) -> String {
    match groups.and_then(Value::as_array) {
        Some(groups) if !groups.is_empty() => groups
            .iter()
            .map(format_group)
            .collect::<Vec<_>>()
            .join("<br>"),
        _ => "None".to_string(),
    }
}

/// Strings as-is, anything else as JSON
fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

fn field<'a>(mode: &'a Value, key: &str) -> Option<String> {
    mode.get(key)
        .filter(|value| !value.is_null())
        .map(value_text)
}

fn render_row(mode: &Value) -> String {
    let name = escape_html(&field(mode, "name").unwrap_or_else(|| "N/A".to_string()));
    let slug = escape_html(&field(mode, "slug").unwrap_or_else(|| "N/A".to_string()));
    let role = match field(mode, "roleDefinition").filter(|text| !text.is_empty()) {
        Some(text) => format!("<pre>{}</pre>", escape_html(&text)),
        None => "N/A".to_string(),
    };
    let behavior = match field(mode, "customInstructions").filter(|text| !text.is_empty()) {
        Some(text) => format!("<pre>{}</pre>", escape_html(&text)),
        None => "*(Uses Role Definition)*".to_string(),
    };
    let groups = format_groups(mode.get("groups"));
    let source = escape_html(&field(mode, "source").unwrap_or_else(|| "N/A".to_string()));

    format!(
        "            <tr>\n\
         \x20               <td>{name}</td>\n\
         \x20               <td><code>{slug}</code></td>\n\
         \x20               <td>{role}</td>\n\
         \x20               <td>{behavior}</td>\n\
         \x20               <td>{groups}</td>\n\
         \x20               <td>{source}</td>\n\
         \x20           </tr>"
    )
}

/// Render the whole report page for a parsed custom-modes document
pub fn render_modes_report(data: &Value) -> Result<String, tera::Error> {
    let rows = match data.get("customModes").and_then(Value::as_array) {
        Some(modes) => modes.iter().map(render_row).collect::<Vec<_>>().join("\n"),
        None => {
            tracing::warn!("\"customModes\" key missing or not a list");
            MISSING_MODES_ROW.to_string()
        }
    };
    load_prompt(MODES_REPORT, &json!({ "rows": rows }))
}
