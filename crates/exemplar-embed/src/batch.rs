//! Batching and retry on top of a raw [`EmbedProvider`].
//!
//! Inputs are split into batches of at most `batch_size`. Each batch is
//! retried on transient failures with exponential backoff (doubling from
//! `initial_backoff`, capped at `max_backoff`) up to `max_attempts` calls.
//! Exhausted retries or a permanent failure surface as
//! [`Error::EmbeddingUnavailable`]; no partial result is ever returned.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use exemplar_core::config::EmbeddingSettings;
use exemplar_core::{Embedder, Error, Result};

use crate::provider::{EmbedProvider, ProviderError};

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &EmbeddingSettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_backoff: settings.initial_backoff(),
            max_backoff: settings.max_backoff(),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&EmbeddingSettings::default())
    }
}

pub struct BatchEmbedder {
    provider: Arc<dyn EmbedProvider>,
    batch_size: usize,
    retry: RetryPolicy,
}

impl BatchEmbedder {
    pub fn new(provider: Arc<dyn EmbedProvider>, batch_size: usize, retry: RetryPolicy) -> Self {
        Self { provider, batch_size: batch_size.max(1), retry }
    }

    pub fn from_settings(provider: Arc<dyn EmbedProvider>, settings: &EmbeddingSettings) -> Self {
        Self::new(provider, settings.batch_size, RetryPolicy::from_settings(settings))
    }

    async fn embed_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.provider.embed(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(ProviderError::Transient(reason)) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    tracing::warn!(
                        provider = self.provider.embedder_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %reason,
                        "embedding call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::error!(
                        provider = self.provider.embedder_id(),
                        attempt,
                        error = %e,
                        "embedding unavailable"
                    );
                    return Err(Error::EmbeddingUnavailable {
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }
}

/// A response the provider should never produce; retrying will not fix it.
fn malformed(reason: String) -> Error {
    Error::EmbeddingUnavailable { attempts: 1, reason }
}

#[async_trait]
impl Embedder for BatchEmbedder {
    fn embedder_id(&self) -> &str {
        self.provider.embedder_id()
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out: Vec<Vec<f32>> = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let vectors = self.embed_with_retry(batch).await?;
            if vectors.len() != batch.len() {
                return Err(malformed(format!(
                    "provider returned {} vectors for {} inputs",
                    vectors.len(),
                    batch.len()
                )));
            }
            out.extend(vectors);
        }
        if let Some(first) = out.first() {
            let dim = first.len();
            if dim == 0 {
                return Err(malformed("provider returned empty vectors".into()));
            }
            if let Some(bad) = out.iter().find(|v| v.len() != dim) {
                return Err(malformed(format!(
                    "provider returned vectors of mixed length ({} and {})",
                    dim,
                    bad.len()
                )));
            }
        }
        tracing::debug!(
            provider = self.provider.embedder_id(),
            inputs = texts.len(),
            "embedded texts"
        );
        Ok(out)
    }
}
