use anyhow::{anyhow, Result};

fn required_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| anyhow!("{name} is not set"))
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

impl OpenAiConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env_or("OPENAI_HOST", "https://api.openai.com"),
            api_key: required_env("OPENAI_API_KEY")?,
            model: env_or("OPENAI_MODEL", "gpt-4o"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AnthropicConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

impl AnthropicConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env_or("ANTHROPIC_HOST", "https://api.anthropic.com"),
            api_key: required_env("ANTHROPIC_API_KEY")?,
            model: env_or("ANTHROPIC_MODEL", "claude-3-5-sonnet-20241022"),
        })
    }
}

#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

impl GoogleConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            host: env_or("GOOGLE_HOST", "https://generativelanguage.googleapis.com"),
            api_key: required_env("GOOGLE_API_KEY")?,
            model: env_or("GOOGLE_MODEL", "gemini-1.5-pro"),
        })
    }
}

/// Unified enum to wrap different provider configurations
#[derive(Debug, Clone)]
pub enum ProviderConfig {
    OpenAi(OpenAiConfig),
    Anthropic(AnthropicConfig),
    Google(GoogleConfig),
}
