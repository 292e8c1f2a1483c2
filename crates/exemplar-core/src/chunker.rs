//! Bounded-size text segmentation with overlap.
//!
//! Lengths are measured in characters (Unicode scalar values). Each chunk is
//! at most `max_chars` long; consecutive chunks share exactly `overlap`
//! characters so context near a cut point survives in both. Cuts prefer a
//! paragraph break, then a line break, then a sentence end, then any
//! whitespace, searching back at most `lookback` characters from the hard
//! limit before falling back to a hard cut.

use crate::config::ChunkingSettings;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    pub text: String,
    /// Char offset of the first character in the source text.
    pub start: usize,
    /// Char offset one past the last character.
    pub end: usize,
    /// Number of leading characters shared with the previous chunk.
    pub overlap: usize,
}

impl Chunk {
    pub fn char_len(&self) -> usize {
        self.end - self.start
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    overlap: usize,
    lookback: usize,
}

impl Default for Chunker {
    fn default() -> Self {
        let s = ChunkingSettings::default();
        Self { max_chars: s.max_chars, overlap: s.overlap_chars, lookback: s.boundary_lookback }
    }
}

#[derive(Clone, Copy)]
enum Boundary {
    Paragraph,
    Line,
    Sentence,
    Space,
}

const BOUNDARY_PREFERENCE: [Boundary; 4] =
    [Boundary::Paragraph, Boundary::Line, Boundary::Sentence, Boundary::Space];

impl Chunker {
    pub fn new(max_chars: usize, overlap: usize, lookback: usize) -> Result<Self> {
        if max_chars == 0 {
            return Err(Error::InvalidConfig("chunk length must be > 0".into()));
        }
        if overlap >= max_chars {
            return Err(Error::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than chunk length ({})",
                overlap, max_chars
            )));
        }
        Ok(Self { max_chars, overlap, lookback })
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self> {
        Self::new(settings.max_chars, settings.overlap_chars, settings.boundary_lookback)
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn split(&self, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = text.chars().collect();
        let offsets: Vec<usize> = text
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(text.len()))
            .collect();
        let total = chars.len();

        let mut chunks = Vec::new();
        let mut start = 0usize;
        loop {
            let hard_end = (start + self.max_chars).min(total);
            let end = if hard_end == total {
                total
            } else {
                self.find_cut(&chars, start, hard_end)
            };
            let overlap = if chunks.is_empty() { 0 } else { self.overlap };
            chunks.push(Chunk {
                index: chunks.len(),
                text: text[offsets[start]..offsets[end]].to_string(),
                start,
                end,
                overlap,
            });
            if end == total {
                break;
            }
            // end > start + overlap, so every step makes progress
            start = end - self.overlap;
        }
        tracing::trace!(chars = total, chunks = chunks.len(), "split text");
        chunks
    }

    /// Picks the end of the chunk starting at `start`, never past `hard_end`
    /// and never so early that the next chunk would not advance.
    fn find_cut(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = hard_end.saturating_sub(self.lookback).max(start + self.overlap + 1);
        if floor > hard_end {
            return hard_end;
        }
        for boundary in BOUNDARY_PREFERENCE {
            if let Some(cut) = (floor..=hard_end).rev().find(|&c| is_boundary(chars, c, boundary)) {
                return cut;
            }
        }
        hard_end
    }
}

/// Whether cutting right before `chars[cut]` lands on `boundary`.
fn is_boundary(chars: &[char], cut: usize, boundary: Boundary) -> bool {
    let Some(&last) = cut.checked_sub(1).and_then(|i| chars.get(i)) else {
        return false;
    };
    let before_last = cut.checked_sub(2).and_then(|i| chars.get(i)).copied();
    match boundary {
        Boundary::Paragraph => last == '\n' && before_last == Some('\n'),
        Boundary::Line => last == '\n',
        Boundary::Sentence => {
            last.is_whitespace() && matches!(before_last, Some('.') | Some('!') | Some('?'))
        }
        Boundary::Space => last.is_whitespace(),
    }
}

/// Rebuilds the source text by dropping each chunk's overlapping prefix.
pub fn reassemble(chunks: &[Chunk]) -> String {
    let mut out = String::new();
    for chunk in chunks {
        out.extend(chunk.text.chars().skip(chunk.overlap));
    }
    out
}
