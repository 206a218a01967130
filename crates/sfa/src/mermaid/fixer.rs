use anyhow::anyhow;
use serde_json::json;
use std::time::Duration;

use super::validator::{DiagramValidator, Validation};
use super::MermaidError;
use crate::extract::extract_mermaid_code;
use crate::models::message::Message;
use crate::prompt_template::{load_prompt, MERMAID_FIX};
use crate::providers::base::{CompletionParams, Provider};
use crate::retry::{always, RetryPolicy};
use crate::usage::TokenTally;

const FIX_MAX_TOKENS: i32 = 2048;
const DEFAULT_ITERATION_PAUSE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    /// The diagram validated after `iterations` rounds
    Fixed { code: String, iterations: u32 },
    /// The model returned the code unchanged; best effort, never validated
    Stalled { code: String },
    /// Iterations ran out while the diagram was still invalid
    Exhausted { last_code: String },
    /// The model gave no usable fix within the retry budget
    AiFailed,
    /// `mmdc` is not installed
    ValidatorMissing,
}

impl FixOutcome {
    /// Code worth showing and saving
    pub fn final_code(&self) -> Option<&str> {
        match self {
            FixOutcome::Fixed { code, .. } | FixOutcome::Stalled { code } => Some(code),
            _ => None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.final_code().is_some()
    }
}

pub struct MermaidFixer {
    provider: Box<dyn Provider>,
    validator: Box<dyn DiagramValidator>,
    retry: RetryPolicy,
    iteration_pause: Duration,
    tally: TokenTally,
}

impl MermaidFixer {
    pub fn new(
        provider: Box<dyn Provider>,
        validator: Box<dyn DiagramValidator>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            validator,
            retry,
            iteration_pause: DEFAULT_ITERATION_PAUSE,
            tally: TokenTally::new(),
        }
    }

    pub fn with_iteration_pause(mut self, pause: Duration) -> Self {
        self.iteration_pause = pause;
        self
    }

    pub fn usage(&self) -> &TokenTally {
        &self.tally
    }

    /// Ask the model for a corrected diagram, retrying unusable replies
    pub async fn get_ai_fix(
        &self,
        code: &str,
        error: &str,
    ) -> Result<Option<String>, MermaidError> {
        let prompt = load_prompt(
            MERMAID_FIX,
            &json!({"current_code": code, "error_message": error}),
        )?;
        let messages = [Message::user().with_text(prompt)];
        let params = CompletionParams::new(FIX_MAX_TOKENS);

        let result = self
            .retry
            .run("Mermaid fix request", always, |attempt| {
                let messages = &messages;
                let params = &params;
                async move {
                    tracing::info!(
                        "Requesting AI fix (attempt {}/{})",
                        attempt,
                        self.retry.max_attempts
                    );
                    let (reply, usage) = self.provider.complete("", messages, &[], params).await?;
                    self.tally.record(&usage);

                    let text = reply.text();
                    extract_mermaid_code(&text).ok_or_else(|| {
                        let snippet: String = text.chars().take(500).collect();
                        anyhow!("could not extract Mermaid code from reply: {}", snippet)
                    })
                }
            })
            .await;

        match result {
            Ok(fix) => Ok(Some(fix)),
            Err(err) => {
                tracing::error!("Failed to get a valid fix from the model: {}", err);
                Ok(None)
            }
        }
    }

    /// Validate and repair until the diagram passes or `max_iterations` is spent
    pub async fn run(
        &self,
        initial_code: &str,
        max_iterations: u32,
    ) -> Result<FixOutcome, MermaidError> {
        let mut current = initial_code.trim().to_string();

        for iteration in 1..=max_iterations {
            tracing::info!("Iteration {}/{}", iteration, max_iterations);

            let error = match self.validator.validate(&current).await {
                Ok(Validation::Valid) => {
                    return Ok(FixOutcome::Fixed {
                        code: current,
                        iterations: iteration,
                    })
                }
                Ok(Validation::Invalid(error)) => error,
                Err(MermaidError::ValidatorMissing) => return Ok(FixOutcome::ValidatorMissing),
                Err(err) => return Err(err),
            };

            let Some(fix) = self.get_ai_fix(&current, &error).await? else {
                return Ok(FixOutcome::AiFailed);
            };

            let fix = fix.trim();
            if fix == current {
                tracing::warn!("Model returned the same code, stopping to avoid a loop");
                return Ok(FixOutcome::Stalled { code: current });
            }

            current = fix.to_string();
            tracing::info!("Adopted the suggested fix, validating again");
            tokio::time::sleep(self.iteration_pause).await;
        }

        tracing::error!("Failed to fix Mermaid code within {} iterations", max_iterations);
        Ok(FixOutcome::Exhausted { last_code: current })
    }
}
