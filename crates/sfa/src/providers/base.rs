use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::message::Message;
use crate::models::tool::Tool;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Usage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

impl Usage {
    pub fn new(
        input_tokens: Option<i32>,
        output_tokens: Option<i32>,
        total_tokens: Option<i32>,
    ) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens,
        }
    }

    /// Build usage from input/output counts, deriving the total when both are known
    pub fn from_counts(input_tokens: Option<i32>, output_tokens: Option<i32>) -> Self {
        let total_tokens = match (input_tokens, output_tokens) {
            (Some(input), Some(output)) => Some(input + output),
            _ => None,
        };
        Self::new(input_tokens, output_tokens, total_tokens)
    }
}

/// Per-call generation settings
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompletionParams {
    pub temperature: Option<f32>,
    pub max_tokens: Option<i32>,
    /// Force the model to answer with a tool call
    pub require_tool: bool,
}

impl CompletionParams {
    pub fn new(max_tokens: i32) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            ..Default::default()
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn requiring_tool(mut self) -> Self {
        self.require_tool = true;
        self
    }
}

/// Base trait for AI providers (OpenAI, Anthropic, Google)
#[async_trait]
pub trait Provider: Send + Sync {
    /// The model this provider sends requests to
    fn model(&self) -> &str;

    /// Generate the next message using the configured model and the given parameters
    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        params: &CompletionParams,
    ) -> Result<(Message, Usage)>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_usage_from_counts() {
        let usage = Usage::from_counts(Some(10), Some(20));
        assert_eq!(usage.total_tokens, Some(30));

        let usage = Usage::from_counts(Some(10), None);
        assert_eq!(usage.total_tokens, None);
    }

    #[test]
    fn test_usage_serialization() -> Result<()> {
        let usage = Usage::new(Some(10), Some(20), Some(30));
        let json_value = serde_json::to_value(&usage)?;
        assert_eq!(json_value["input_tokens"], json!(10));
        assert_eq!(json_value["output_tokens"], json!(20));
        assert_eq!(json_value["total_tokens"], json!(30));
        Ok(())
    }

    #[test]
    fn test_completion_params_builder() {
        let params = CompletionParams::new(400).with_temperature(0.1);
        assert_eq!(params.max_tokens, Some(400));
        assert_eq!(params.temperature, Some(0.1));
        assert!(!params.require_tool);
        assert!(CompletionParams::default().requiring_tool().require_tool);
    }
}
