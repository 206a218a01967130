use super::{
    anthropic::AnthropicProvider, base::Provider, configs::ProviderConfig,
    google::GoogleProvider, openai::OpenAiProvider,
};
use anyhow::Result;
use strum_macros::{Display, EnumIter, EnumString};

#[derive(EnumIter, EnumString, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum ProviderType {
    OpenAi,
    Anthropic,
    Google,
}

impl ProviderType {
    pub fn default_model(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "gpt-4o-mini",
            ProviderType::Anthropic => "claude-3-haiku-20240307",
            ProviderType::Google => "gemini-1.5-flash-latest",
        }
    }

    pub fn api_key_env(&self) -> &'static str {
        match self {
            ProviderType::OpenAi => "OPENAI_API_KEY",
            ProviderType::Anthropic => "ANTHROPIC_API_KEY",
            ProviderType::Google => "GOOGLE_API_KEY",
        }
    }

    /// Pick the vendor that serves a model, defaulting to OpenAI
    pub fn infer_from_model(model: &str) -> Self {
        let model = model.to_lowercase();
        let model = model.rsplit('/').next().unwrap_or(&model);
        if model.starts_with("claude") {
            ProviderType::Anthropic
        } else if model.starts_with("gemini") {
            ProviderType::Google
        } else {
            ProviderType::OpenAi
        }
    }
}

pub fn get_provider(config: ProviderConfig) -> Result<Box<dyn Provider>> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Box::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Box::new(AnthropicProvider::new(anthropic_config)?))
        }
        ProviderConfig::Google(google_config) => Ok(Box::new(GoogleProvider::new(google_config)?)),
    }
}
