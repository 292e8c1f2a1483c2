//! exemplar-extract
//!
//! Turns uploaded document bytes into normalized plain text. The format is
//! resolved once into a [`DocumentFormat`]; each variant has exactly one
//! [`TextExtractor`] strategy.

mod docx;
pub mod format;
pub mod normalize;
mod pdf;
mod text;
mod xlsx;

pub use docx::DocxExtractor;
pub use format::DocumentFormat;
pub use normalize::normalize_whitespace;
pub use pdf::PdfExtractor;
pub use text::PlainTextExtractor;
pub use xlsx::XlsxExtractor;

use exemplar_core::{Error, Result};

/// Capability shared by every format strategy: raw bytes in, text out.
pub trait TextExtractor: Send + Sync {
    fn format(&self) -> DocumentFormat;
    fn extract(&self, bytes: &[u8]) -> Result<String>;
}

/// Extracts and normalizes text; an empty result is an `EmptyDocument` error.
pub fn extract_text(bytes: &[u8], format: DocumentFormat) -> Result<String> {
    let raw = format.extractor().extract(bytes)?;
    let text = normalize_whitespace(&raw);
    if text.is_empty() {
        return Err(Error::EmptyDocument);
    }
    tracing::debug!(%format, bytes = bytes.len(), chars = text.chars().count(), "extracted text");
    Ok(text)
}
