use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

use super::base::{CompletionParams, Provider, Usage};
use super::configs::GoogleProviderConfig;
use super::errors::ProviderError;
use super::utils::{handle_response, is_valid_function_name};
use crate::errors::AgentError;
use crate::models::message::{Message, MessageContent};
use crate::models::role::Role;
use crate::models::tool::{create_call_id, Tool, ToolCall};

pub struct GoogleProvider {
    client: Client,
    config: GoogleProviderConfig,
}

impl GoogleProvider {
    pub fn new(config: GoogleProviderConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(600)) // 10 minutes timeout
            .build()?;

        Ok(Self { client, config })
    }

    fn get_usage(data: &Value) -> Usage {
        let usage = &data["usageMetadata"];
        let input_tokens = usage["promptTokenCount"].as_i64().map(|v| v as i32);
        let output_tokens = usage["candidatesTokenCount"].as_i64().map(|v| v as i32);
        match usage["totalTokenCount"].as_i64() {
            Some(total) => Usage::new(input_tokens, output_tokens, Some(total as i32)),
            None => Usage::from_counts(input_tokens, output_tokens),
        }
    }

    /// Gemini keys function responses by name, so ids are resolved against earlier requests
    fn messages_to_google_spec(messages: &[Message]) -> Vec<Value> {
        let mut names_by_id: HashMap<&str, &str> = HashMap::new();
        for message in messages {
            for request in message.tool_requests() {
                if let Ok(tool_call) = &request.tool_call {
                    names_by_id.insert(&request.id, &tool_call.name);
                }
            }
        }

        let mut contents: Vec<Value> = Vec::new();
        for message in messages {
            let role = match message.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            let mut parts = Vec::new();
            for content in &message.content {
                match content {
                    MessageContent::Text(text) => {
                        if !text.text.is_empty() {
                            parts.push(json!({"text": text.text}));
                        }
                    }
                    MessageContent::ToolRequest(request) => match &request.tool_call {
                        Ok(tool_call) => parts.push(json!({
                            "functionCall": {
                                "name": tool_call.name,
                                "args": tool_call.arguments,
                            }
                        })),
                        Err(e) => parts.push(json!({"text": format!("Error: {}", e)})),
                    },
                    MessageContent::ToolResponse(response) => {
                        let name = names_by_id
                            .get(response.id.as_str())
                            .copied()
                            .unwrap_or("unknown_tool");
                        let payload = match &response.tool_result {
                            Ok(result) => json!({"result": result}),
                            Err(e) => json!({"error": e.to_string()}),
                        };
                        parts.push(json!({
                            "functionResponse": {
                                "name": name,
                                "response": payload,
                            }
                        }));
                    }
                }
            }
            if parts.is_empty() {
                continue;
            }

            let same_role = contents.last().is_some_and(|last| last["role"] == role);
            if same_role {
                if let Some(existing) = contents
                    .last_mut()
                    .and_then(|last| last["parts"].as_array_mut())
                {
                    existing.extend(parts);
                }
            } else {
                contents.push(json!({"role": role, "parts": parts}));
            }
        }
        contents
    }

    fn response_to_message(response: &Value) -> Result<Message, ProviderError> {
        let candidate = response["candidates"]
            .get(0)
            .ok_or_else(|| ProviderError::MalformedResponse("no candidates in response".into()))?;

        let mut message = Message::assistant();
        let parts = candidate["content"]["parts"].as_array();
        for part in parts.into_iter().flatten() {
            if let Some(text) = part["text"].as_str() {
                message = message.with_text(text);
            } else if let Some(call) = part.get("functionCall") {
                let name = call["name"].as_str().unwrap_or_default();
                let tool_call = if is_valid_function_name(name) {
                    let args = match &call["args"] {
                        Value::Null => json!({}),
                        args => args.clone(),
                    };
                    Ok(ToolCall::new(name, args))
                } else {
                    Err(AgentError::InvalidToolName(name.to_string()))
                };
                message = message.with_tool_request(create_call_id(), tool_call);
            }
        }
        Ok(message)
    }

    #[tracing::instrument(skip_all, fields(model = %self.config.model))]
    async fn post(&self, payload: Value) -> Result<Value, ProviderError> {
        let model = self
            .config
            .model
            .strip_prefix("gemini/")
            .unwrap_or(&self.config.model);
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.config.host.trim_end_matches('/'),
            model
        );

        let response = self
            .client
            .post(&url)
            .query(&[("key", self.config.api_key.as_str())])
            .json(&payload)
            .send()
            .await?;

        handle_response(response).await
    }
}

#[async_trait]
impl Provider for GoogleProvider {
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
            "contents": Self::messages_to_google_spec(messages),
        });

        if !system.is_empty() {
            payload["systemInstruction"] = json!({"parts": [{"text": system}]});
        }
        if !tools.is_empty() {
            let declarations: Vec<Value> = tools
                .iter()
                .map(|tool| {
                    json!({
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.input_schema,
                    })
                })
                .collect();
            payload["tools"] = json!([{"functionDeclarations": declarations}]);
            if params.require_tool {
                payload["toolConfig"] = json!({"functionCallingConfig": {"mode": "ANY"}});
            }
        }

        let mut generation_config = serde_json::Map::new();
        if let Some(tokens) = params.max_tokens {
            generation_config.insert("maxOutputTokens".to_string(), json!(tokens));
        }
        if let Some(temp) = params.temperature {
            generation_config.insert("temperature".to_string(), json!(temp));
        }
        if !generation_config.is_empty() {
            payload["generationConfig"] = Value::Object(generation_config);
        }

        let response = self.post(payload).await?;

        let message = Self::response_to_message(&response)?;
        let usage = Self::get_usage(&response);

        Ok((message, usage))
    }
}
