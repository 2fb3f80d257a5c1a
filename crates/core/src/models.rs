use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::time::Duration;
use uuid::Uuid;

pub type Vector = Vec<f32>;

/// Plain text of one loaded file or one PDF page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub source: String,
    pub text: String,
    pub page: Option<u32>,
}

impl Document {
    pub fn new(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            page: None,
        }
    }

    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub source: String,
    pub page: Option<u32>,
    /// Position of the chunk within its document.
    pub chunk_index: u32,
    /// Offset of the first character, counted in chars rather than bytes.
    pub char_start: usize,
    pub text: String,
}

impl Chunk {
    pub fn attribution(&self) -> String {
        match self.page {
            Some(page) => format!("{} (page {page})", self.source),
            None => self.source.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub position: u64,
    pub chunk: Chunk,
    pub vector: Vector,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub position: u64,
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub query: String,
    pub top_k: usize,
    pub min_score: Option<f32>,
    pub hits: Vec<ScoredChunk>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }
}

#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageTimings {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub retrieval: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub generation: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub total: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub request_id: Uuid,
    pub text: String,
    pub retrieval: RetrievalResult,
    pub timings: StageTimings,
    pub model: String,
    pub temperature: f32,
    pub answered_at: DateTime<Utc>,
}

const DISCLAIMER_PHRASES: [&str; 4] = ["consult", "doctor", "healthcare professional", "medical advice"];

/// Heuristic quality signals for one answer. Each of the five checks that
/// passes adds 0.2 to `score`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerQuality {
    pub response_chars: usize,
    pub sources_used: usize,
    pub average_relevance: f32,
    pub contains_disclaimer: bool,
    pub cites_sources: bool,
    pub score: f32,
}

impl Answer {
    /// Scores the answer on length (over 50 chars), breadth (two or more
    /// sources), mean relevance (over 0.7), a disclaimer, and citations. A
    /// citation is a retrieved source name or a `[n]` block marker.
    pub fn quality(&self) -> AnswerQuality {
        let hits = &self.retrieval.hits;
        let response_chars = self.text.chars().count();
        let average_relevance = if hits.is_empty() {
            0.0
        } else {
            hits.iter().map(|hit| hit.score).sum::<f32>() / hits.len() as f32
        };

        let lowered = self.text.to_lowercase();
        let contains_disclaimer = DISCLAIMER_PHRASES
            .iter()
            .any(|phrase| lowered.contains(phrase));
        let cites_sources = hits.iter().enumerate().any(|(rank, hit)| {
            (!hit.chunk.source.is_empty() && self.text.contains(&hit.chunk.source))
                || self.text.contains(&format!("[{}]", rank + 1))
        });

        let passed = [
            response_chars > 50,
            hits.len() >= 2,
            average_relevance > 0.7,
            contains_disclaimer,
            cites_sources,
        ]
        .iter()
        .filter(|check| **check)
        .count();

        AnswerQuality {
            response_chars,
            sources_used: hits.len(),
            average_relevance,
            contains_disclaimer,
            cites_sources,
            score: passed as f32 / 5.0,
        }
    }
}

/// Per-question overrides of the pipeline defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AskOptions {
    pub top_k: Option<usize>,
    pub min_score: Option<f32>,
    pub temperature: Option<f32>,
}

#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestionReport {
    pub documents: usize,
    pub chunks: usize,
    pub first_position: Option<u64>,
    pub index_size: usize,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub elapsed: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub entries: usize,
    pub dimensions: Option<usize>,
    pub sources: Vec<String>,
    pub total_chars: usize,
    pub average_chunk_chars: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineState {
    Empty,
    Indexed,
}
