//! Natural-language questions about CSV files, answered with `xsv`.

pub mod analyzer;
pub mod analyzer_v2;
pub mod tool;

use thiserror::Error;

use crate::delimiter::DelimiterError;
use crate::encoding::EncodingError;
use crate::process::CommandError;

pub use analyzer::{V1Outcome, XsvAnalyzer};
pub use analyzer_v2::{render_report, V2Outcome, V2Request, V2Run, XsvAnalyzerV2, NO_DATA_ANSWER};
pub use tool::{truncate_output, XsvExecution, XsvTool};

pub const DEFAULT_TRUNCATION_CHARS: usize = 4000;
pub const MIN_TRUNCATION_CHARS: usize = 100;
pub const MAX_TRUNCATION_CHARS: usize = 10_000;
pub const TRUNCATION_MARKER: &str = "... [Output truncated]";
pub const DEFAULT_MAX_TURNS: u32 = 15;
pub const XSV_INSTALL_HINT: &str = "Please ensure it is installed and in your system's PATH.";

#[derive(Error, Debug)]
pub enum XsvError {
    #[error(transparent)]
    NotInstalled(#[from] CommandError),

    #[error("`xsv -h` failed with exit code {status:?}: {stderr}")]
    HelpFailed { status: Option<i32>, stderr: String },

    #[error(transparent)]
    Encoding(#[from] EncodingError),

    #[error(transparent)]
    Delimiter(#[from] DelimiterError),

    #[error("Failed to render prompt: {0}")]
    Prompt(#[from] tera::Error),
}
