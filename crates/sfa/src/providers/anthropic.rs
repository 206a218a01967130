use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;

use super::base::{CompletionParams, Provider, Usage};
use super::configs::AnthropicProviderConfig;
use super::errors::ProviderError;
use super::utils::{handle_response, parse_tool_call, role_name};
use crate::models::message::{Message, MessageContent};
use crate::models::tool::Tool;

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: i32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    config: AnthropicProviderConfig,
}

impl AnthropicProvider {
    pub fn new(config: AnthropicProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let usage = &data["usage"];
        let input_tokens = usage["input_tokens"].as_i64().map(|v| v as i32);
        let output_tokens = usage["output_tokens"].as_i64().map(|v| v as i32);
        Usage::from_counts(input_tokens, output_tokens)
    }

    /// Anthropic wants alternating turns, so consecutive messages from one role are merged
    fn messages_to_anthropic_spec(messages: &[Message]) -> Vec<Value> {
        let mut anthropic_messages: Vec<Value> = Vec::new();

        for message in messages {
            let mut blocks = Vec::new();
            for content in &message.content {
                match content {
                    MessageContent::Text(text) => {
                        if !text.text.is_empty() {
                            blocks.push(json!({"type": "text", "text": text.text}));
                        }
                    }
                    MessageContent::ToolRequest(request) => match &request.tool_call {
                        Ok(tool_call) => blocks.push(json!({
                            "type": "tool_use",
                            "id": request.id,
                            "name": tool_call.name,
                            "input": tool_call.arguments,
                        })),
                        Err(e) => blocks.push(json!({
                            "type": "text",
                            "text": format!("Error: {}", e),
                        })),
                    },
                    MessageContent::ToolResponse(response) => {
                        let (content, is_error) = match &response.tool_result {
                            Ok(result) => (result.clone(), false),
                            Err(e) => (
                                format!("The tool call returned the following error:\n{}", e),
                                true,
                            ),
                        };
                        blocks.push(json!({
                            "type": "tool_result",
                            "tool_use_id": response.id,
                            "content": content,
                            "is_error": is_error,
                        }));
                    }
                }
            }
            if blocks.is_empty() {
                continue;
            }

            let role = role_name(message.role);
            let same_role = anthropic_messages
                .last()
                .is_some_and(|last| last["role"] == role);
            if same_role {
                if let Some(existing) = anthropic_messages
                    .last_mut()
                    .and_then(|last| last["content"].as_array_mut())
                {
                    existing.extend(blocks);
                }
            } else {
                anthropic_messages.push(json!({
                    "role": role,
                    "content": blocks,
                }));
            }
        }

        anthropic_messages
    }

    fn tools_to_anthropic_spec(tools: &[Tool]) -> Vec<Value> {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "input_schema": tool.input_schema,
                })
            })
            .collect()
    }

    fn response_to_message(response: &Value) -> Result<Message, ProviderError> {
        let blocks = response["content"].as_array().ok_or_else(|| {
            ProviderError::MalformedResponse("Invalid response format from Anthropic API".into())
        })?;

        let mut message = Message::assistant();
        for block in blocks {
            match block["type"].as_str() {
                Some("text") => {
                    message = message.with_text(block["text"].as_str().unwrap_or_default());
                }
                Some("tool_use") => {
                    let id = block["id"].as_str().unwrap_or_default().to_string();
                    let name = block["name"].as_str().unwrap_or_default();
                    let input = block["input"].to_string();
                    let tool_call = parse_tool_call(&id, name, &input);
                    message = message.with_tool_request(id, tool_call);
                }
                other => tracing::debug!("Skipping Anthropic content block {:?}", other),
            }
        }
        Ok(message)
    }

    #[tracing::instrument(skip_all, fields(model = %self.config.model))]
    async fn post(&self, payload: Value) -> Result<Value, ProviderError> {
        let url = format!("{}/v1/messages", self.config.host.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        handle_response(response).await
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn complete(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[Tool],
        params: &CompletionParams,
    ) -> Result<(Message, Usage)> {
        let mut payload = json!({
            "model": self.config.model,
            "messages": Self::messages_to_anthropic_spec(messages),
            "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS)
        });

        if !system.is_empty() {
            payload["system"] = json!(system);
        }
        if !tools.is_empty() {
            payload["tools"] = json!(Self::tools_to_anthropic_spec(tools));
            if params.require_tool {
                payload["tool_choice"] = json!({"type": "any"});
            }
        }
        if let Some(temp) = params.temperature {
            payload["temperature"] = json!(temp);
        }

        let response = self.post(payload).await?;

        let message = Self::response_to_message(&response)?;
        let usage = Self::get_usage(&response);

        Ok((message, usage))
    }
}
