use std::panic::{catch_unwind, AssertUnwindSafe};

use exemplar_core::{Error, Result};
use pdf_extract::extract_text_from_mem;

use crate::{DocumentFormat, TextExtractor};

/// PDF text via `pdf-extract`. Pages are separated by form feeds in the
/// raw output; those are turned into blank lines.
pub struct PdfExtractor;

impl TextExtractor for PdfExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Pdf
    }

    fn extract(&self, bytes: &[u8]) -> Result<String> {
        if !bytes.starts_with(b"%PDF") {
            return Err(failure("missing %PDF header"));
        }
        // pdf-extract panics on some malformed inputs instead of returning an error
        let outcome = catch_unwind(AssertUnwindSafe(|| extract_text_from_mem(bytes)));
        match outcome {
            Ok(Ok(text)) => Ok(text.replace('\u{c}', "\n\n")),
            Ok(Err(e)) => {
                let msg = e.to_string();
                let lower = msg.to_lowercase();
                if lower.contains("encrypted") || lower.contains("password") {
                    return Err(failure("document is password protected"));
                }
                Err(failure(msg))
            }
            Err(_) => Err(failure("parser aborted on malformed content")),
        }
    }
}

fn failure(reason: impl Into<String>) -> Error {
    Error::Extraction { format: DocumentFormat::Pdf.to_string(), reason: reason.into() }
}
