use std::io::{Cursor, Read};

use exemplar_core::{Error, Result};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::{DocumentFormat, TextExtractor};

const DOCUMENT_PART: &str = "word/document.xml";

/// Body text of a DOCX container. Paragraph ends become newlines; run-level
/// `w:tab` and `w:br` become a tab and a newline.
pub struct DocxExtractor;

impl TextExtractor for DocxExtractor {
    fn format(&self) -> DocumentFormat {
        DocumentFormat::Docx
    }

    fn extract(&self, bytes: &[u8]) -> Result<String> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
            .map_err(|e| failure(format!("not a DOCX container: {}", e)))?;
        let mut xml = String::new();
        archive
            .by_name(DOCUMENT_PART)
            .map_err(|e| failure(format!("{}: {}", DOCUMENT_PART, e)))?
            .read_to_string(&mut xml)
            .map_err(|e| failure(format!("{}: {}", DOCUMENT_PART, e)))?;
        document_xml_to_text(&xml)
    }
}

fn document_xml_to_text(xml: &str) -> Result<String> {
    let mut reader = Reader::from_str(xml);
    let mut out = String::new();
    let mut in_run = false;
    let mut in_text = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"r" => in_run = true,
                b"t" => in_text = true,
                other => push_run_break(&mut out, other, in_run),
            },
            Ok(Event::Empty(e)) => push_run_break(&mut out, e.local_name().as_ref(), in_run),
            Ok(Event::Text(t)) if in_text => {
                let text = t.unescape().map_err(|e| failure(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"r" => in_run = false,
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(failure(format!(
                    "malformed {} at byte {}: {}",
                    DOCUMENT_PART,
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }
    Ok(out)
}

// `w:tab` also appears in paragraph properties as a tab stop; only runs count.
fn push_run_break(out: &mut String, local_name: &[u8], in_run: bool) {
    if !in_run {
        return;
    }
    match local_name {
        b"tab" => out.push('\t'),
        b"br" | b"cr" => out.push('\n'),
        _ => {}
    }
}

fn failure(reason: impl Into<String>) -> Error {
    Error::Extraction { format: DocumentFormat::Docx.to_string(), reason: reason.into() }
}
