// src/memory/embeddings.rs
// Embeddings via an OpenAI-compatible /v1/embeddings endpoint

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::traits::EmbeddingProvider;
use crate::error::TriggerError;
use crate::Result;

/// Default embedding model when none is configured
const DEFAULT_MODEL: &str = "text-embedding-3-small";

/// Max characters sent per request; longer text is cut at a char boundary
const MAX_TEXT_CHARS: usize = 12_000;

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

/// HTTP embedding client (OpenAI, Ollama, or anything speaking the same API)
pub struct HttpEmbeddingProvider {
    base_url: String,
    model: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpEmbeddingProvider {
    pub fn new(base_url: &str, model: Option<String>, api_key: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .unwrap_or_default();

        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            http_client,
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model
    }
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/v1/embeddings", self.base_url);
        let input = truncate_chars(text, MAX_TEXT_CHARS);
        if input.len() < text.len() {
            debug!(from = text.len(), to = input.len(), "Truncated text for embedding");
        }

        let body = serde_json::json!({
            "input": input,
            "model": self.model,
        });

        let mut request = self.http_client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TriggerError::Embedding(format!("request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(TriggerError::Embedding(format!(
                "HTTP {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| TriggerError::Embedding(format!("invalid response: {}", e)))?;
        parsed.data.sort_by_key(|d| d.index);

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| TriggerError::Embedding("empty embedding response".to_string()))
    }
}
