use async_trait::async_trait;

use crate::error::{Error, Result};

/// Maps texts to fixed-dimension vectors via some embedding capability.
///
/// Implementations may cross a process boundary, so every call is async and
/// fallible. Callers must not assume identical inputs embed identically.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Stable identifier for the provider/model (e.g. `openai:text-embedding-ada-002`).
    fn embedder_id(&self) -> &str;

    /// Embeds `texts` in order; the output has one vector per input.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingUnavailable {
                attempts: 1,
                reason: "no embedding returned for query".to_string(),
            })
    }
}
