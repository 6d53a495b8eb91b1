pub mod json;
pub mod prompts;
pub mod providers;

use crate::config::LlmConfig;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

/// A text-completion model. The prompt is fully rendered by the caller.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str, temperature: f32) -> Result<String, LlmError>;
}

/// Builds the configured language model backend.
pub fn build_model(config: &LlmConfig) -> Result<Arc<dyn LanguageModel>, LlmError> {
    let model: Arc<dyn LanguageModel> = match config.backend.as_str() {
        "remote" => Arc::new(providers::remote::RemoteLlmProvider::new(config)?),
        "ollama" => Arc::new(providers::ollama::OllamaProvider::new(config)?),
        _ => {
            return Err(LlmError::ConfigError(format!(
                "Unsupported LLM backend: {}",
                config.backend
            )))
        }
    };

    Ok(model)
}
