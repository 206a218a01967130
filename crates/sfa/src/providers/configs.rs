use super::factory::ProviderType;
use crate::config::{required_env, ConfigError, Settings};

/// Unified enum to wrap different provider configurations
pub enum ProviderConfig {
    OpenAi(OpenAiProviderConfig),
    Anthropic(AnthropicProviderConfig),
    Google(GoogleProviderConfig),
}

pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

pub struct GoogleProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

impl ProviderConfig {
    /// Resolve the api key for `provider_type` from its vendor environment variable
    ///
    /// Falls back to the provider's default model when `model` is None.
    pub fn from_env(
        provider_type: ProviderType,
        model: Option<String>,
        settings: &Settings,
    ) -> Result<Self, ConfigError> {
        let api_key = required_env(provider_type.api_key_env())?;
        let model = model.unwrap_or_else(|| provider_type.default_model().to_string());

        Ok(match provider_type {
            ProviderType::OpenAi => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host: settings.hosts.openai.clone(),
                api_key,
                model,
            }),
            ProviderType::Anthropic => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host: settings.hosts.anthropic.clone(),
                api_key,
                model,
            }),
            ProviderType::Google => ProviderConfig::Google(GoogleProviderConfig {
                host: settings.hosts.google.clone(),
                api_key,
                model,
            }),
        })
    }

    pub fn model(&self) -> &str {
        match self {
            ProviderConfig::OpenAi(config) => &config.model,
            ProviderConfig::Anthropic(config) => &config.model,
            ProviderConfig::Google(config) => &config.model,
        }
    }
}
