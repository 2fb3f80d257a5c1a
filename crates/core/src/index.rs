use crate::error::RagError;
use crate::models::{Chunk, IndexEntry, IndexStats, ScoredChunk, Vector};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const FORMAT_VERSION: u32 = 1;

/// Flat cosine-similarity index over chunk vectors.
///
/// Append-only: entries get increasing positions and are never updated or
/// removed. Every vector must share the dimensionality fixed by the first
/// insert.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VectorIndex {
    entries: Vec<IndexEntry>,
    dimensions: Option<usize>,
    next_position: u64,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn dimensions(&self) -> Option<usize> {
        self.dimensions
    }

    pub fn entries(&self) -> &[IndexEntry] {
        &self.entries
    }

    /// Appends the batch and returns the position of its first entry.
    ///
    /// The batch is checked in full before anything is appended, so a
    /// rejected batch leaves the index untouched.
    pub fn insert(
        &mut self,
        batch: impl IntoIterator<Item = (Chunk, Vector)>,
    ) -> Result<Option<u64>, RagError> {
        let batch: Vec<(Chunk, Vector)> = batch.into_iter().collect();
        let Some((_, first)) = batch.first() else {
            return Ok(None);
        };

        let expected = self.dimensions.unwrap_or(first.len());
        for (entry, (_, vector)) in batch.iter().enumerate() {
            if vector.is_empty() {
                return Err(RagError::ZeroLengthVector { entry });
            }
            if vector.iter().any(|value| !value.is_finite()) {
                return Err(RagError::NonFiniteVector { entry });
            }
            if vector.len() != expected {
                return Err(RagError::DimensionMismatch {
                    entry,
                    expected,
                    found: vector.len(),
                });
            }
        }

        let first_position = self.next_position;
        self.dimensions = Some(expected);
        for (chunk, vector) in batch {
            self.entries.push(IndexEntry {
                position: self.next_position,
                chunk,
                vector,
            });
            self.next_position += 1;
        }

        debug!(
            first_position,
            index_size = self.entries.len(),
            dimensions = expected,
            "inserted index entries"
        );
        Ok(Some(first_position))
    }

    /// The `k` entries most similar to `query`, best first. Equal scores keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        let Some(expected) = self.dimensions else {
            return Ok(Vec::new());
        };
        if query.len() != expected {
            return Err(RagError::QueryDimensionMismatch {
                expected,
                found: query.len(),
            });
        }

        let mut scored: Vec<(f32, &IndexEntry)> = self
            .entries
            .iter()
            .map(|entry| (cosine_similarity(query, &entry.vector), entry))
            .collect();

        scored.sort_by(|(left_score, left), (right_score, right)| {
            right_score
                .total_cmp(left_score)
                .then(left.position.cmp(&right.position))
        });

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(score, entry)| ScoredChunk {
                position: entry.position,
                chunk: entry.chunk.clone(),
                score,
            })
            .collect())
    }

    pub fn stats(&self) -> IndexStats {
        let sources = self
            .entries
            .iter()
            .map(|entry| entry.chunk.source.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let total_chars = self
            .entries
            .iter()
            .map(|entry| entry.chunk.text.chars().count())
            .sum::<usize>();
        let average_chunk_chars = if self.entries.is_empty() {
            0.0
        } else {
            total_chars as f64 / self.entries.len() as f64
        };

        IndexStats {
            entries: self.entries.len(),
            dimensions: self.dimensions,
            sources,
            total_chars,
            average_chunk_chars,
        }
    }

    /// Writes the index next to `path` and renames it into place.
    pub fn save(&self, path: &Path) -> Result<(), RagError> {
        let persisted = PersistedIndex {
            version: FORMAT_VERSION,
            dimensions: self.dimensions,
            saved_at: Utc::now(),
            entries: self
                .entries
                .iter()
                .map(|entry| PersistedEntry {
                    position: entry.position,
                    chunk: entry.chunk.clone(),
                    vector: encode_vector(&entry.vector),
                })
                .collect(),
        };
        let bytes = serde_json::to_vec(&persisted)
            .map_err(|error| RagError::IndexPersist(error.to_string()))?;

        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|error| {
                RagError::IndexPersist(format!("{}: {error}", parent.display()))
            })?;
        }

        let staging = staging_path(path);
        fs::write(&staging, bytes)
            .map_err(|error| RagError::IndexPersist(format!("{}: {error}", staging.display())))?;
        fs::rename(&staging, path)
            .map_err(|error| RagError::IndexPersist(format!("{}: {error}", path.display())))?;

        info!(path = %path.display(), entries = self.entries.len(), "saved vector index");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, RagError> {
        let bytes = fs::read(path)
            .map_err(|error| RagError::IndexLoad(format!("{}: {error}", path.display())))?;
        let persisted: PersistedIndex = serde_json::from_slice(&bytes)
            .map_err(|error| RagError::IndexLoad(format!("{}: {error}", path.display())))?;

        if persisted.version != FORMAT_VERSION {
            return Err(RagError::IndexLoad(format!(
                "unsupported index format version {}",
                persisted.version
            )));
        }

        let mut index = VectorIndex {
            entries: Vec::with_capacity(persisted.entries.len()),
            dimensions: persisted.dimensions,
            next_position: 0,
        };

        for entry in persisted.entries {
            let vector = decode_vector(&entry.vector)?;
            if Some(vector.len()) != index.dimensions {
                return Err(RagError::IndexLoad(format!(
                    "entry {} has dimension {}, header says {:?}",
                    entry.position,
                    vector.len(),
                    index.dimensions
                )));
            }
            if vector.iter().any(|value| !value.is_finite()) {
                return Err(RagError::IndexLoad(format!(
                    "entry {} has a NaN or infinite component",
                    entry.position
                )));
            }
            if entry.position < index.next_position {
                return Err(RagError::IndexLoad(format!(
                    "entry positions are not increasing at {}",
                    entry.position
                )));
            }
            index.next_position = entry.position + 1;
            index.entries.push(IndexEntry {
                position: entry.position,
                chunk: entry.chunk,
                vector,
            });
        }

        if index.entries.is_empty() {
            index.dimensions = None;
        }

        info!(path = %path.display(), entries = index.entries.len(), "loaded vector index");
        Ok(index)
    }
}

#[derive(Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    dimensions: Option<usize>,
    saved_at: DateTime<Utc>,
    entries: Vec<PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    position: u64,
    chunk: Chunk,
    /// Little-endian f32 bytes, base64 encoded.
    vector: String,
}

fn encode_vector(vector: &[f32]) -> String {
    let bytes: Vec<u8> = vector.iter().flat_map(|value| value.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

fn decode_vector(encoded: &str) -> Result<Vector, RagError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|error| RagError::IndexLoad(format!("vector payload: {error}")))?;
    if bytes.len() % 4 != 0 {
        return Err(RagError::IndexLoad(format!(
            "vector payload of {} bytes is not a whole number of f32 values",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|word| f32::from_le_bytes([word[0], word[1], word[2], word[3]]))
        .collect())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Cosine similarity; zero when either side has no magnitude.
pub fn cosine_similarity(left: &[f32], right: &[f32]) -> f32 {
    let dot: f32 = left.iter().zip(right).map(|(a, b)| a * b).sum();
    let left_norm = left.iter().map(|value| value * value).sum::<f32>().sqrt();
    let right_norm = right.iter().map(|value| value * value).sum::<f32>().sqrt();
    if left_norm == 0.0 || right_norm == 0.0 {
        return 0.0;
    }
    dot / (left_norm * right_norm)
}
