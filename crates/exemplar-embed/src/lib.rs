//! exemplar-embed
//!
//! Embedding providers (remote OpenAI-compatible API, deterministic fake,
//! optional on-device model) and the batching/retry adapter that turns any
//! of them into an [`exemplar_core::Embedder`].

mod batch;
mod fake;
#[cfg(feature = "local-model")]
pub mod local;
mod openai;
mod provider;

pub use batch::{BatchEmbedder, RetryPolicy};
pub use fake::FakeProvider;
#[cfg(feature = "local-model")]
pub use local::LocalModelProvider;
pub use openai::OpenAiProvider;
pub use provider::{EmbedProvider, ProviderError};

use std::sync::Arc;

use exemplar_core::config::ProviderKind;
use exemplar_core::{Embedder, Result, Settings};

/// Raw provider selected by the settings, without batching or retries.
pub fn build_provider(settings: &Settings) -> Result<Arc<dyn EmbedProvider>> {
    let embedding = &settings.embedding;
    let provider: Arc<dyn EmbedProvider> = match settings.effective_provider() {
        ProviderKind::Fake => Arc::new(FakeProvider::new(embedding.fake_dim)),
        ProviderKind::OpenAi => Arc::new(OpenAiProvider::from_settings(embedding)?),
        #[cfg(feature = "local-model")]
        ProviderKind::Local => Arc::new(LocalModelProvider::from_settings(settings)?),
        #[cfg(not(feature = "local-model"))]
        ProviderKind::Local => {
            return Err(exemplar_core::Error::InvalidConfig(
                "embedding provider 'local' requires the `local-model` feature".into(),
            ))
        }
    };
    tracing::info!(provider = provider.embedder_id(), "embedding provider selected");
    Ok(provider)
}

/// The configured provider wrapped in a [`BatchEmbedder`].
pub fn build_embedder(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    let provider = build_provider(settings)?;
    Ok(Arc::new(BatchEmbedder::from_settings(provider, &settings.embedding)))
}
