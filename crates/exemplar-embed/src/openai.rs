//! OpenAI-compatible `/embeddings` endpoint.

use async_trait::async_trait;
use exemplar_core::config::EmbeddingSettings;
use exemplar_core::{Error, Result};
use serde::Deserialize;

use crate::provider::{EmbedProvider, ProviderError};

pub struct OpenAiProvider {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
    id: String,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiProvider {
    /// Reads the API key from the variable named by `api_key_env`.
    pub fn from_settings(settings: &EmbeddingSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env).map_err(|_| {
            Error::InvalidConfig(format!(
                "embedding provider 'openai' needs an API key in ${}",
                settings.api_key_env
            ))
        })?;
        Self::new(&settings.base_url, &settings.model, api_key, settings.timeout())
    }

    pub fn new(
        base_url: &str,
        model: &str,
        api_key: String,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            api_key,
            id: format!("openai:{}", model),
        })
    }
}

fn classify_send_error(e: reqwest::Error) -> ProviderError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        ProviderError::Transient(e.to_string())
    } else {
        ProviderError::Permanent(e.to_string())
    }
}

fn classify_status(status: reqwest::StatusCode, body: &str) -> ProviderError {
    let msg = format!("embedding API returned {}: {}", status, body.trim());
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        ProviderError::Transient(msg)
    } else {
        ProviderError::Permanent(msg)
    }
}

#[async_trait]
impl EmbedProvider for OpenAiProvider {
    fn embedder_id(&self) -> &str {
        &self.id
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&serde_json::json!({
                "model": self.model,
                "input": texts,
            }))
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let mut result: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Permanent(format!("invalid embedding response: {}", e)))?;
        result.data.sort_by_key(|d| d.index);
        // one entry per input, indexed 0..n
        if result.data.len() != texts.len()
            || result.data.iter().enumerate().any(|(i, d)| d.index != i)
        {
            let indices: Vec<usize> = result.data.iter().map(|d| d.index).collect();
            return Err(ProviderError::Permanent(format!(
                "embedding response indices {:?} do not cover {} inputs",
                indices,
                texts.len()
            )));
        }
        tracing::debug!(model = %self.model, inputs = texts.len(), "embedding batch returned");
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }
}
