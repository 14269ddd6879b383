//! Gemini REST client.
//!
//! Implements [`CompletionClient`] over `models/{model}:generateContent` and
//! [`Embedder`] over `models/{model}:embedContent`. Error bodies are folded
//! into the error message together with the HTTP status, so quota and 429
//! responses classify as rate limits.

use anyhow::Context;
use async_trait::async_trait;
use compliance_rag::{Embedder, RetrievalError, RetrievalResult};
use scanward_core::config::ProviderConfig;
use scanward_core::domain::ProviderError;
use scanward_core::provider::CompletionClient;
use serde_json::{json, Value};
use tracing::debug;

const USER_AGENT: &str = concat!("scanward/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone)]
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    embedding_model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(config: &ProviderConfig) -> anyhow::Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.is_empty())
            .context("provider api key is not set (GEMINI_API_KEY)")?;
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("build HTTP client")?;

        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            embedding_model: config.embedding_model.clone(),
            api_key,
        })
    }

    fn url(&self, model: &str, method: &str) -> String {
        format!("{}/models/{}:{}", self.endpoint, model, method)
    }

    async fn post(&self, url: &str, body: &Value) -> Result<Value, String> {
        let response = self
            .http
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| e.without_url().to_string())?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("{} {}", status.as_u16(), text.trim()));
        }
        response
            .json::<Value>()
            .await
            .map_err(|e| e.without_url().to_string())
    }
}

/// Concatenate the text parts of the first candidate.
pub fn extract_text(body: &Value) -> Result<String, ProviderError> {
    let parts = body
        .pointer("/candidates/0/content/parts")
        .and_then(Value::as_array)
        .ok_or_else(|| ProviderError::Hard {
            message: "response has no candidate content".to_string(),
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(Value::as_str))
        .collect();
    Ok(text.trim().to_string())
}

pub fn extract_embedding(body: &Value) -> RetrievalResult<Vec<f32>> {
    let values = body
        .pointer("/embedding/values")
        .and_then(Value::as_array)
        .ok_or_else(|| RetrievalError::Embedding("response has no embedding values".to_string()))?;

    values
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| RetrievalError::Embedding(format!("non-numeric embedding value: {v}")))
        })
        .collect()
}

#[async_trait]
impl CompletionClient for GeminiClient {
    async fn complete(&self, prompt: &str) -> Result<String, ProviderError> {
        let body = json!({ "contents": [{ "parts": [{ "text": prompt }] }] });
        debug!(model = %self.model, prompt_chars = prompt.len(), "generateContent");
        let response = self
            .post(&self.url(&self.model, "generateContent"), &body)
            .await
            .map_err(ProviderError::from_message)?;
        extract_text(&response)
    }
}

#[async_trait]
impl Embedder for GeminiClient {
    async fn embed(&self, text: &str) -> RetrievalResult<Vec<f32>> {
        let body = json!({
            "model": format!("models/{}", self.embedding_model),
            "content": { "parts": [{ "text": text }] },
        });
        let response = self
            .post(&self.url(&self.embedding_model, "embedContent"), &body)
            .await
            .map_err(RetrievalError::Embedding)?;
        extract_embedding(&response)
    }
}
