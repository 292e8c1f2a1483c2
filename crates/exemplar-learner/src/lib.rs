//! exemplar-learner
//!
//! Orchestrates the pipeline: extract, chunk, embed, store on the way in;
//! embed the query and run a filtered similarity search on the way out.

use serde::Serialize;
use std::sync::Arc;

use exemplar_core::{
    Category, ChunkRecord, Chunker, Embedder, Error, QueryFilter, Result, SearchHit, Settings,
    StoreStats, Tags,
};
use exemplar_extract::{extract_text, normalize_whitespace, DocumentFormat};
use exemplar_vector::VectorStore;

/// Metadata attached to every chunk of one learned document.
#[derive(Debug, Clone, Default)]
pub struct LearnRequest {
    pub category: Category,
    pub tags: Tags,
    /// Usually the upload filename. Generated from the content when absent.
    pub source_id: Option<String>,
}

impl LearnRequest {
    pub fn new(category: Category) -> Self {
        Self { category, ..Self::default() }
    }

    pub fn with_tags(mut self, tags: Tags) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_source_id(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestionSummary {
    pub source_id: String,
    pub chunks_added: usize,
    pub category: Category,
    pub tags: Tags,
}

/// A ranked piece of a previously learned document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Excerpt {
    pub text: String,
    pub score: f32,
    pub source_id: String,
    pub sequence_index: usize,
    pub category: Category,
    pub tags: Tags,
}

impl From<SearchHit> for Excerpt {
    fn from(hit: SearchHit) -> Self {
        let r = hit.record;
        Self {
            text: r.text,
            score: hit.score,
            source_id: r.source_id,
            sequence_index: r.sequence_index,
            category: r.category,
            tags: r.tags,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClearReceipt {
    pub removed: usize,
}

fn content_label(prefix: &str, bytes: &[u8]) -> String {
    let hex = blake3::hash(bytes).to_hex();
    format!("{}-{}", prefix, &hex.as_str()[..16])
}

pub struct ExemplarLearner {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    store: VectorStore,
    min_score: Option<f32>,
}

impl ExemplarLearner {
    pub fn new(chunker: Chunker, embedder: Arc<dyn Embedder>, store: VectorStore) -> Self {
        Self { chunker, embedder, store, min_score: None }
    }

    /// Excerpts scoring below `min_score` are dropped from retrieval results.
    pub fn with_min_score(mut self, min_score: Option<f32>) -> Self {
        self.min_score = min_score;
        self
    }

    /// Opens the configured store and embedding provider.
    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let chunker = Chunker::from_settings(&settings.chunking)?;
        let embedder = exemplar_embed::build_embedder(settings)?;
        let store = VectorStore::open(&settings.store).await?;
        Ok(Self::new(chunker, embedder, store).with_min_score(settings.retrieval.min_score))
    }

    pub fn embedder_id(&self) -> &str {
        self.embedder.embedder_id()
    }

    pub async fn learn_document(
        &self,
        bytes: &[u8],
        format: DocumentFormat,
        request: LearnRequest,
    ) -> Result<IngestionSummary> {
        let text = extract_text(bytes, format)?;
        let source_id = request.source_id.clone().unwrap_or_else(|| content_label("doc", bytes));
        tracing::info!(
            source_id = %source_id,
            %format,
            chars = text.chars().count(),
            "learning document"
        );
        self.ingest(&text, source_id, request).await
    }

    pub async fn learn_text(&self, text: &str, request: LearnRequest) -> Result<IngestionSummary> {
        let text = normalize_whitespace(text);
        if text.is_empty() {
            return Err(Error::EmptyDocument);
        }
        let source_id = request
            .source_id
            .clone()
            .unwrap_or_else(|| content_label("text", text.as_bytes()));
        tracing::info!(source_id = %source_id, chars = text.chars().count(), "learning text");
        self.ingest(&text, source_id, request).await
    }

    /// Chunks and embeds all of `text` before writing anything, then commits
    /// every chunk in one insert.
    async fn ingest(
        &self,
        text: &str,
        source_id: String,
        request: LearnRequest,
    ) -> Result<IngestionSummary> {
        let chunks: Vec<_> = self
            .chunker
            .split(text)
            .into_iter()
            .filter(|c| !c.text.trim().is_empty())
            .collect();
        if chunks.is_empty() {
            return Err(Error::EmptyDocument);
        }
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(Error::EmbeddingUnavailable {
                attempts: 1,
                reason: format!("expected {} embeddings, got {}", chunks.len(), embeddings.len()),
            });
        }

        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| {
                ChunkRecord::new(
                    &source_id,
                    chunk.index,
                    chunk.text,
                    request.category,
                    request.tags.clone(),
                    embedding,
                )
            })
            .collect();
        let chunks_added = self.store.insert(records).await?;
        tracing::info!(
            source_id = %source_id,
            chunks_added,
            category = %request.category,
            "learned"
        );
        Ok(IngestionSummary {
            source_id,
            chunks_added,
            category: request.category,
            tags: request.tags,
        })
    }

    /// Up to `k` excerpts most similar to `query` among those matching `filter`.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        filter: &QueryFilter,
    ) -> Result<Vec<Excerpt>> {
        if query.trim().is_empty() {
            return Err(Error::InvalidInput("query text is empty".into()));
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.embed_query(query).await?;
        let hits = self.store.query(&vector, k, filter).await?;
        let excerpts: Vec<Excerpt> = hits
            .into_iter()
            .filter(|h| self.min_score.map_or(true, |min| h.score >= min))
            .map(Excerpt::from)
            .collect();
        tracing::debug!(k, returned = excerpts.len(), "retrieved excerpts");
        Ok(excerpts)
    }

    pub async fn clear_all(&self) -> Result<ClearReceipt> {
        let removed = self.store.clear().await?;
        Ok(ClearReceipt { removed })
    }

    pub async fn get_stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    pub async fn close(self) {
        self.store.close().await;
    }
}
