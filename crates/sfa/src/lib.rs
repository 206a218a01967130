pub mod config;
pub mod csv_agent;
pub mod delimiter;
pub mod encoding;
pub mod errors;
pub mod extract;
pub mod mermaid;
pub mod models;
pub mod process;
pub mod prompt_template;
pub mod providers;
pub mod report;
pub mod retry;
pub mod usage;
pub mod xsv;
