//! exemplar-core
//!
//! Shared domain types, the error enum, configuration loading and the
//! text chunker used by every stage of the exemplar learning pipeline.

pub mod chunker;
pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use chunker::{Chunk, Chunker};
pub use config::{Config, Settings};
pub use error::{Error, Result};
pub use traits::Embedder;
pub use types::{Category, ChunkRecord, QueryFilter, SearchHit, StoreStats, Tags};
