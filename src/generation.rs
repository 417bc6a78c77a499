//! Generative model abstraction.
//!
//! The answer synthesizer only needs "prompt in, text out" with a sampling
//! temperature, so that is all [`Generator`] exposes. Implementations:
//! - **[`DisabledGenerator`]**: fails every call; used when no backend is configured.
//! - **[`OpenAIChatGenerator`]**: OpenAI chat completions with retry and backoff.

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

use crate::config::GenerationConfig;
use crate::http;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("generation provider is disabled")]
    Disabled,
    #[error("{0}")]
    Request(String),
    #[error("malformed model response: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;
    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError>;
}

/// Builds the generator named by `config.provider`.
pub fn create_generator(config: &GenerationConfig) -> Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIChatGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }
    async fn generate(&self, _prompt: &str, _temperature: f32) -> Result<String, GenerationError> {
        Err(GenerationError::Disabled)
    }
}

/// Chat-completions client. The whole prompt is sent as one user message.
pub struct OpenAIChatGenerator {
    model: String,
    api_key: String,
    base_url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIChatGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            api_key: http::openai_api_key()?,
            base_url: http::openai_base_url(),
            max_retries: config.max_retries,
            client: http::client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Generator for OpenAIChatGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, temperature: f32) -> Result<String, GenerationError> {
        let body = serde_json::json!({
            "model": self.model,
            "temperature": temperature,
            "messages": [{ "role": "user", "content": prompt }],
        });
        let json = http::post_json_with_retry(
            &self.client,
            &format!("{}/chat/completions", self.base_url),
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await
        .map_err(|e| GenerationError::Request(e.to_string()))?;
        parse_chat_response(&json)
    }
}

/// Extracts `choices[0].message.content`.
fn parse_chat_response(json: &Value) -> Result<String, GenerationError> {
    json.get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| GenerationError::Malformed("missing choices[0].message.content".into()))
}
