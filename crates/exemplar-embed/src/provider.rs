use async_trait::async_trait;

/// Failure reported by a single provider call.
///
/// `Transient` failures (rate limits, timeouts, 5xx) are worth retrying;
/// `Permanent` ones (bad credentials, malformed request) are not.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ProviderError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// A raw embedding backend. One call embeds one batch, with no retrying.
#[async_trait]
pub trait EmbedProvider: Send + Sync {
    /// Stable identifier for the provider/model (e.g., `openai:text-embedding-ada-002`).
    fn embedder_id(&self) -> &str;

    /// Compute embeddings for a batch of input texts, one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}
