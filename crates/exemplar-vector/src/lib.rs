//! exemplar-vector
//!
//! LanceDB-backed store of embedded chunk records with filtered cosine
//! search. The full corpus is mirrored in memory so queries never touch disk;
//! every mutation is committed to LanceDB before the mirror is swapped.

pub mod schema;
mod search;
mod store;
pub mod table;

pub use search::cosine_similarity;
pub use store::VectorStore;

use exemplar_core::Error;

pub(crate) fn store_err(e: impl std::fmt::Display) -> Error {
    Error::StoreUnavailable(e.to_string())
}
