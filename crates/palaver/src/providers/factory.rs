use std::sync::Arc;

use strum_macros::EnumIter;

use super::anthropic::AnthropicProvider;
use super::base::ProviderAdapter;
use super::configs::ProviderConfig;
use super::google::GoogleProvider;
use super::openai::OpenAiProvider;
use crate::errors::ChatResult;

#[derive(EnumIter, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    OpenAi,
    Anthropic,
    Google,
}

pub fn get_provider(config: ProviderConfig) -> ChatResult<Arc<dyn ProviderAdapter>> {
    match config {
        ProviderConfig::OpenAi(openai_config) => Ok(Arc::new(OpenAiProvider::new(openai_config)?)),
        ProviderConfig::Anthropic(anthropic_config) => {
            Ok(Arc::new(AnthropicProvider::new(anthropic_config)?))
        }
        ProviderConfig::Google(google_config) => Ok(Arc::new(GoogleProvider::new(google_config)?)),
    }
}
