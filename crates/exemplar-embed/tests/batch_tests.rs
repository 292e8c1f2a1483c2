use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use exemplar_core::{Embedder, Error};
use exemplar_embed::{BatchEmbedder, EmbedProvider, ProviderError, RetryPolicy};

/// Fails the first `failures` calls, then echoes `[len, 1.0]` per text.
struct ScriptedProvider {
    failures: u32,
    permanent: bool,
    calls: AtomicU32,
    batch_sizes: Mutex<Vec<usize>>,
}

impl ScriptedProvider {
    fn new(failures: u32, permanent: bool) -> Self {
        Self { failures, permanent, calls: AtomicU32::new(0), batch_sizes: Mutex::new(Vec::new()) }
    }
}

#[async_trait]
impl EmbedProvider for ScriptedProvider {
    fn embedder_id(&self) -> &str {
        "scripted"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(if self.permanent {
                ProviderError::Permanent("401 unauthorized".into())
            } else {
                ProviderError::Transient("429 rate limited".into())
            });
        }
        self.batch_sizes.lock().unwrap().push(texts.len());
        Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
    }
}

fn no_wait(max_attempts: u32) -> RetryPolicy {
    RetryPolicy { max_attempts, initial_backoff: Duration::ZERO, max_backoff: Duration::ZERO }
}

fn texts(n: usize) -> Vec<String> {
    (0..n).map(|i| "x".repeat(i + 1)).collect()
}

#[tokio::test]
async fn splits_into_batches_and_keeps_order() {
    let provider = Arc::new(ScriptedProvider::new(0, false));
    let embedder = BatchEmbedder::new(provider.clone(), 2, no_wait(1));
    let out = embedder.embed_batch(&texts(5)).await.expect("embed");
    assert_eq!(out.len(), 5);
    for (i, v) in out.iter().enumerate() {
        assert_eq!(v[0], (i + 1) as f32);
    }
    assert_eq!(*provider.batch_sizes.lock().unwrap(), vec![2, 2, 1]);
}

#[tokio::test]
async fn transient_failures_are_retried() {
    let provider = Arc::new(ScriptedProvider::new(2, false));
    let embedder = BatchEmbedder::new(provider.clone(), 8, no_wait(3));
    let out = embedder.embed_batch(&texts(3)).await.expect("succeeds on third attempt");
    assert_eq!(out.len(), 3);
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn exhausted_retries_report_unavailable() {
    let provider = Arc::new(ScriptedProvider::new(10, false));
    let embedder = BatchEmbedder::new(provider.clone(), 8, no_wait(3));
    match embedder.embed_batch(&texts(2)).await {
        Err(Error::EmbeddingUnavailable { attempts, .. }) => assert_eq!(attempts, 3),
        other => panic!("expected EmbeddingUnavailable, got {:?}", other),
    }
    assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn permanent_failures_are_not_retried() {
    let provider = Arc::new(ScriptedProvider::new(1, true));
    let embedder = BatchEmbedder::new(provider.clone(), 8, no_wait(5));
    let err = embedder.embed_batch(&texts(1)).await.expect_err("permanent");
    assert!(matches!(err, Error::EmbeddingUnavailable { attempts: 1, .. }));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}

#[test]
fn backoff_doubles_and_caps() {
    let policy = RetryPolicy {
        max_attempts: 6,
        initial_backoff: Duration::from_millis(100),
        max_backoff: Duration::from_millis(350),
    };
    assert_eq!(policy.backoff(1), Duration::from_millis(100));
    assert_eq!(policy.backoff(2), Duration::from_millis(200));
    assert_eq!(policy.backoff(3), Duration::from_millis(350));
    assert_eq!(policy.backoff(30), Duration::from_millis(350));
}

struct ShortProvider;

#[async_trait]
impl EmbedProvider for ShortProvider {
    fn embedder_id(&self) -> &str {
        "short"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().skip(1).map(|_| vec![1.0]).collect())
    }
}

#[tokio::test]
async fn missing_vectors_are_rejected() {
    let embedder = BatchEmbedder::new(Arc::new(ShortProvider), 8, no_wait(1));
    assert!(matches!(
        embedder.embed_batch(&texts(2)).await,
        Err(Error::EmbeddingUnavailable { .. })
    ));
}

struct RaggedProvider;

#[async_trait]
impl EmbedProvider for RaggedProvider {
    fn embedder_id(&self) -> &str {
        "ragged"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(texts.iter().enumerate().map(|(i, _)| vec![1.0; i + 1]).collect())
    }
}

#[tokio::test]
async fn mixed_length_vectors_mean_the_provider_is_broken() {
    let embedder = BatchEmbedder::new(Arc::new(RaggedProvider), 8, no_wait(1));
    let err = embedder.embed_batch(&texts(2)).await.expect_err("ragged vectors");
    match err {
        Error::EmbeddingUnavailable { reason, .. } => {
            assert!(reason.contains("mixed length"), "{}", reason)
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
