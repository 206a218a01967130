use config::{Config, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_OPENAI_HOST: &str = "https://api.openai.com";
pub const DEFAULT_ANTHROPIC_HOST: &str = "https://api.anthropic.com";
pub const DEFAULT_GOOGLE_HOST: &str = "https://generativelanguage.googleapis.com";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Maps a dotted settings key to the environment variable that sets it
pub fn to_env_var(field_path: &str) -> String {
    format!("SFA_{}", field_path.to_uppercase().replace('.', "__"))
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_wait_secs")]
    pub wait_secs: u64,
}

impl RetrySettings {
    pub fn wait(&self) -> Duration {
        Duration::from_secs(self.wait_secs)
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            wait_secs: default_wait_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HostSettings {
    #[serde(default = "default_openai_host")]
    pub openai: String,
    #[serde(default = "default_anthropic_host")]
    pub anthropic: String,
    #[serde(default = "default_google_host")]
    pub google: String,
}

impl Default for HostSettings {
    fn default() -> Self {
        Self {
            openai: default_openai_host(),
            anthropic: default_anthropic_host(),
            google: default_google_host(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub hosts: HostSettings,
}

impl Settings {
    /// Defaults, then an optional `sfa.toml` in the working directory, then `SFA_*` variables
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("retry.max_attempts", default_max_attempts())?
            .set_default("retry.wait_secs", default_wait_secs())?
            .set_default("hosts.openai", default_openai_host())?
            .set_default("hosts.anthropic", default_anthropic_host())?
            .set_default("hosts.google", default_google_host())?
            .add_source(File::with_name("sfa").required(false))
            .add_source(
                Environment::with_prefix("SFA")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Settings>() {
            Ok(settings) => Ok(settings),
            Err(config::ConfigError::NotFound(field)) => Err(ConfigError::MissingEnvVar {
                env_var: to_env_var(&field),
            }),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);
                Err(ConfigError::Other(err))
            }
        }
    }
}

/// Read a required environment variable, treating an empty value as unset
pub fn required_env(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(ConfigError::MissingEnvVar {
            env_var: key.to_string(),
        }),
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_wait_secs() -> u64 {
    5
}

fn default_openai_host() -> String {
    DEFAULT_OPENAI_HOST.to_string()
}

fn default_anthropic_host() -> String {
    DEFAULT_ANTHROPIC_HOST.to_string()
}

fn default_google_host() -> String {
    DEFAULT_GOOGLE_HOST.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("SFA_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();

        let settings = Settings::new().unwrap();
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.wait(), Duration::from_secs(5));
        assert_eq!(settings.hosts.openai, DEFAULT_OPENAI_HOST);
        assert_eq!(settings.hosts.anthropic, DEFAULT_ANTHROPIC_HOST);
        assert_eq!(settings.hosts.google, DEFAULT_GOOGLE_HOST);
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("SFA_RETRY__MAX_ATTEMPTS", "5");
        env::set_var("SFA_RETRY__WAIT_SECS", "1");
        env::set_var("SFA_HOSTS__OPENAI", "http://localhost:9999");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.retry.max_attempts, 5);
        assert_eq!(settings.retry.wait_secs, 1);
        assert_eq!(settings.hosts.openai, "http://localhost:9999");
        assert_eq!(settings.hosts.anthropic, DEFAULT_ANTHROPIC_HOST);

        clean_env();
    }

    #[test]
    #[serial]
    fn test_required_env() {
        env::remove_var("SFA_TEST_KEY");
        let err = required_env("SFA_TEST_KEY").unwrap_err();
        assert_eq!(
            err.to_string(),
            "Missing required environment variable: SFA_TEST_KEY"
        );

        env::set_var("SFA_TEST_KEY", "   ");
        assert!(required_env("SFA_TEST_KEY").is_err());

        env::set_var("SFA_TEST_KEY", "secret");
        assert_eq!(required_env("SFA_TEST_KEY").unwrap(), "secret");
        env::remove_var("SFA_TEST_KEY");
    }

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("retry.max_attempts"), "SFA_RETRY__MAX_ATTEMPTS");
        assert_eq!(to_env_var("hosts.google"), "SFA_HOSTS__GOOGLE");
    }
}
