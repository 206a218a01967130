use std::sync::atomic::{AtomicU64, Ordering};

use crate::providers::base::Usage;

/// Running token totals for one agent run
#[derive(Debug, Default)]
pub struct TokenTally {
    input: AtomicU64,
    output: AtomicU64,
}

impl TokenTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, usage: &Usage) {
        let input = usage.input_tokens.unwrap_or(0).max(0) as u64;
        let output = usage.output_tokens.unwrap_or(0).max(0) as u64;
        self.input.fetch_add(input, Ordering::Relaxed);
        self.output.fetch_add(output, Ordering::Relaxed);
        tracing::debug!(input, output, "Recorded token usage");
    }

    pub fn input(&self) -> u64 {
        self.input.load(Ordering::Relaxed)
    }

    pub fn output(&self) -> u64 {
        self.output.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.input() + self.output()
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}
