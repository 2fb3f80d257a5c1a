use crate::config::validate_chunking;
use crate::error::RagError;
use crate::models::{Chunk, Document};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::ops::Range;

const PARAGRAPH_BREAK: &str = r"\n[ \t]*\n\s*";
const SENTENCE_END: &str = r#"[.!?]["')\]]*\s+"#;
const WHITESPACE: &str = r"\s+";

/// Splits document text into overlapping windows of at most `chunk_size`
/// characters.
///
/// Consecutive chunks share exactly `chunk_overlap` characters, so dropping the
/// first `chunk_overlap` characters of every chunk after the first and
/// concatenating gives back the original text. Cut points prefer a paragraph
/// break, then a sentence end, then any whitespace, and fall back to a hard cut.
#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    breakpoints: [Regex; 3],
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, RagError> {
        validate_chunking(chunk_size, chunk_overlap)?;

        Ok(Self {
            chunk_size,
            chunk_overlap,
            breakpoints: [
                Regex::new(PARAGRAPH_BREAK)?,
                Regex::new(SENTENCE_END)?,
                Regex::new(WHITESPACE)?,
            ],
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Character ranges of each chunk. Empty text gives no ranges.
    pub fn split_ranges(&self, text: &str) -> Vec<Range<usize>> {
        let offsets = char_offsets(text);
        let total = offsets.len() - 1;

        let mut ranges = Vec::new();
        let mut start = 0;

        while start < total {
            if total - start <= self.chunk_size {
                ranges.push(start..total);
                break;
            }

            let hard_end = start + self.chunk_size;
            // Anything at or below start + overlap would stall the cursor.
            let earliest = (start + self.chunk_overlap + 1).max(start + self.chunk_size / 2);
            let end = self
                .natural_end(text, &offsets, start, earliest, hard_end)
                .unwrap_or(hard_end);

            ranges.push(start..end);
            start = end - self.chunk_overlap;
        }

        ranges
    }

    pub fn split_text<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let offsets = char_offsets(text);
        self.split_ranges(text)
            .into_iter()
            .map(|range| &text[offsets[range.start]..offsets[range.end]])
            .collect()
    }

    pub fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let offsets = char_offsets(&document.text);

        self.split_ranges(&document.text)
            .into_iter()
            .enumerate()
            .map(|(index, range)| {
                let text = document.text[offsets[range.start]..offsets[range.end]].to_string();
                let chunk_index = index as u32;
                Chunk {
                    chunk_id: make_chunk_id(&document.source, document.page, chunk_index, &text),
                    source: document.source.clone(),
                    page: document.page,
                    chunk_index,
                    char_start: range.start,
                    text,
                }
            })
            .collect()
    }

    pub fn chunk_all(&self, documents: &[Document]) -> Vec<Chunk> {
        documents
            .iter()
            .flat_map(|document| self.chunk(document))
            .collect()
    }

    fn natural_end(
        &self,
        text: &str,
        offsets: &[usize],
        start: usize,
        earliest: usize,
        hard_end: usize,
    ) -> Option<usize> {
        let window_start = offsets[start];
        let window = &text[window_start..offsets[hard_end]];

        self.breakpoints.iter().find_map(|pattern| {
            pattern
                .find_iter(window)
                .filter_map(|found| offsets.binary_search(&(window_start + found.end())).ok())
                .filter(|end| *end >= earliest)
                .last()
        })
    }
}

/// Byte offset of every char plus a trailing entry for the text length.
fn char_offsets(text: &str) -> Vec<usize> {
    text.char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect()
}

fn make_chunk_id(source: &str, page: Option<u32>, index: u32, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(page.unwrap_or(0).to_le_bytes());
    hasher.update(index.to_le_bytes());
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
