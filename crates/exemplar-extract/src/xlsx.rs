use std::io::Cursor;

use calamine::{Reader, Xlsx};
use exemplar_core::{Error, Result};

use crate::{DocumentFormat, TextExtractor};

/// All sheets in workbook order, rows top to bottom. Cells are joined by a
/// tab, rows by a newline and sheets by a blank line, so each row stays one
/// coherent line for the chunker.
pub struct XlsxExtractor;

impl TextExtractor for XlsxExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Xlsx
    }

    fn extract(&self, bytes: &[u8]) -> Result<String> {
        let mut workbook: Xlsx<_> = Xlsx::new(Cursor::new(bytes))
            .map_err(|e| failure(format!("not an XLSX workbook: {}", e)))?;
        let mut sheets = Vec::new();
        for name in workbook.sheet_names() {
            let range = workbook
                .worksheet_range(&name)
                .map_err(|e| failure(format!("sheet '{}': {}", name, e)))?;
            let rows: Vec<String> = range
                .rows()
                .map(|row| row.iter().map(|cell| cell.to_string()).collect::<Vec<_>>().join("\t"))
                .collect();
            tracing::trace!(sheet = %name, rows = rows.len(), "read worksheet");
            sheets.push(rows.join("\n"));
        }
        Ok(sheets.join("\n\n"))
    }
}

fn failure(reason: impl Into<String>) -> Error {
    Error::Extraction { format: DocumentFormat::Xlsx.to_string(), reason: reason.into() }
}
