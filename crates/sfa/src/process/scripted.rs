use super::{CommandError, CommandOutput, CommandRunner};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Runner that replays canned outputs, for tests
///
/// Lookups try the full command line first, then the program name alone.
/// Anything unknown behaves like a missing binary.
#[derive(Default)]
pub struct ScriptedRunner {
    responses: HashMap<String, CommandOutput>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_response(mut self, command: &str, output: CommandOutput) -> Self {
        self.responses.insert(command.to_string(), output);
        self
    }

    /// Every command line run so far, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .map(|calls| calls.clone())
            .unwrap_or_default()
    }

    fn respond(&self, command_line: String) -> Result<CommandOutput, CommandError> {
        let program = command_line
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command_line.clone());
        }
        self.responses
            .get(&command_line)
            .or_else(|| self.responses.get(&program))
            .cloned()
            .ok_or_else(|| CommandError::not_found(&program))
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        let mut command_line = program.to_string();
        for arg in args {
            command_line.push(' ');
            command_line.push_str(arg);
        }
        self.respond(command_line)
    }

    async fn run_shell(&self, command_line: &str) -> Result<CommandOutput, CommandError> {
        self.respond(command_line.to_string())
    }
}
