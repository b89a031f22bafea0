//! Generation capability: `generate(system_instruction, user_content) -> text`.
//!
//! | Config Value | Generator |
//! |-------------|-----------|
//! | `"disabled"` | [`DisabledGenerator`] |
//! | `"openai"` | [`OpenAiChat`] (any OpenAI-compatible `/chat/completions`) |
//! | `"ollama"` | [`OllamaChat`] (`/api/chat`, non-streaming) |
//!
//! Like the embedding providers, generators make one attempt per call and
//! leave retries to the caller.

use anyhow::{bail, Result};
use async_trait::async_trait;

use crate::config::GenerationConfig;
use crate::error::ProviderError;
use crate::http;

/// Sampling settings for one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

impl GenerationParams {
    /// Settings for answers and classification.
    pub fn answer(config: &GenerationConfig) -> Self {
        GenerationParams {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        }
    }

    /// Settings for document drafting.
    pub fn draft(config: &GenerationConfig) -> Self {
        GenerationParams {
            temperature: config.draft_temperature,
            max_tokens: config.draft_max_tokens,
        }
    }
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        system: &str,
        user: &str,
        params: GenerationParams,
    ) -> Result<String, ProviderError>;
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(
        &self,
        _system: &str,
        _user: &str,
        _params: GenerationParams,
    ) -> Result<String, ProviderError> {
        Err(ProviderError::Disabled("generation"))
    }
}

/// Chat completions against an OpenAI-compatible API. Requires `OPENAI_API_KEY`.
pub struct OpenAiChat {
    model: String,
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl OpenAiChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            model,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system: &str,
        user: &str,
        params: GenerationParams,
    ) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
        });
        let url = format!("{}/chat/completions", self.base_url);
        tracing::debug!(model = %self.model, url = %url, "chat completion request");
        let json =
            http::post_json(&self.client, "openai", &url, Some(&self.api_key), &body).await?;
        json.pointer("/choices/0/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid("openai", "missing choices[0].message.content"))
    }
}

/// Chat against a local Ollama instance.
pub struct OllamaChat {
    model: String,
    url: String,
    client: reqwest::Client,
}

impl OllamaChat {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());
        Ok(Self {
            model,
            url: url.trim_end_matches('/').to_string(),
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for OllamaChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        system: &str,
        user: &str,
        params: GenerationParams,
    ) -> Result<String, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "stream": false,
            "messages": [
                { "role": "system", "content": system },
                { "role": "user", "content": user },
            ],
            "options": {
                "temperature": params.temperature,
                "num_predict": params.max_tokens,
            },
        });
        let url = format!("{}/api/chat", self.url);
        tracing::debug!(model = %self.model, url = %url, "ollama chat request");
        let json = http::post_json(&self.client, "ollama", &url, None, &body).await?;
        json.pointer("/message/content")
            .and_then(|c| c.as_str())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::invalid("ollama", "missing message.content"))
    }
}

pub fn create_generator(config: &GenerationConfig) -> Result<Box<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledGenerator)),
        "openai" => Ok(Box::new(OpenAiChat::new(config)?)),
        "ollama" => Ok(Box::new(OllamaChat::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}
