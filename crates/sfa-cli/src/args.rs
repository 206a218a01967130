use anyhow::{Context, Result};
use sfa::config::Settings;
use sfa::providers::base::Provider;
use sfa::providers::configs::ProviderConfig;
use sfa::providers::factory::{get_provider, ProviderType};

#[derive(clap::ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
pub enum CliProviderVariant {
    Openai,
    Anthropic,
    Google,
}

impl From<CliProviderVariant> for ProviderType {
    fn from(variant: CliProviderVariant) -> Self {
        match variant {
            CliProviderVariant::Openai => ProviderType::OpenAi,
            CliProviderVariant::Anthropic => ProviderType::Anthropic,
            CliProviderVariant::Google => ProviderType::Google,
        }
    }
}

pub fn load_settings() -> Result<Settings> {
    Settings::new().context("Failed to load settings")
}

/// Build a provider, failing when the vendor's API key is not set
pub fn build_provider(
    provider_type: ProviderType,
    model: Option<String>,
    settings: &Settings,
) -> Result<Box<dyn Provider>> {
    let config = ProviderConfig::from_env(provider_type, model, settings)
        .with_context(|| format!("Cannot use the {} provider", provider_type))?;
    tracing::info!("Using {} model {}", provider_type, config.model());
    get_provider(config)
}
