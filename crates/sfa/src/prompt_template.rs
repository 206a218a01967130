use serde::Serialize;
use tera::{Context, Error as TeraError, Tera};

pub const MERMAID_FIX: &str = include_str!("prompts/mermaid_fix.md");
pub const XSV_COMMAND: &str = include_str!("prompts/xsv_command.md");
pub const XSV_SYSTEM: &str = include_str!("prompts/xsv_system.md");
pub const XSV_SYNTHESIS: &str = include_str!("prompts/xsv_synthesis.md");
pub const CSV_AGENT: &str = include_str!("prompts/csv_agent.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered.trim().to_string())
}
