use thiserror::Error;

/// Every failure the learning and retrieval pipeline reports to its caller.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Document has no text after normalization")]
    EmptyDocument,

    #[error("Failed to extract text from {format} document: {reason}")]
    Extraction { format: String, reason: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Carries the chunk id, or `query` for a query vector.
    #[error("Embedding for {0} has a NaN or infinite component")]
    NonFiniteEmbedding(String),

    #[error("Embedding service unavailable after {attempts} attempt(s): {reason}")]
    EmbeddingUnavailable { attempts: u32, reason: String },

    #[error("Vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, Error>;
