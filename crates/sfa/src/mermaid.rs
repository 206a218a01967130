//! Mermaid diagram repair: validate with `mmdc`, ask a model for a fix, repeat.

pub mod fixer;
pub mod validator;

use thiserror::Error;

use crate::process::CommandError;

pub use fixer::{FixOutcome, MermaidFixer};
pub use validator::{DiagramValidator, MmdcValidator, Validation};

pub const DEFAULT_MODEL: &str = "claude-3-5-sonnet-20240620";
pub const DEFAULT_MAX_ITERATIONS: u32 = 5;
pub const MMDC_INSTALL_HINT: &str =
    "Please install Mermaid CLI: npm install -g @mermaid-js/mermaid-cli";

#[derive(Error, Debug)]
pub enum MermaidError {
    #[error("'mmdc' command not found. Please install Mermaid CLI: npm install -g @mermaid-js/mermaid-cli")]
    ValidatorMissing,

    #[error("Validation failed to run: {0}")]
    Command(CommandError),

    #[error("Could not prepare temporary diagram files: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to render the fixer prompt: {0}")]
    Prompt(#[from] tera::Error),
}

impl From<CommandError> for MermaidError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::NotFound { .. } => MermaidError::ValidatorMissing,
            other => MermaidError::Command(other),
        }
    }
}
