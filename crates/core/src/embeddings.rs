use crate::error::RagError;
use crate::models::Vector;
use crate::traits::Embedder;
use async_trait::async_trait;
use sha2::{Digest, Sha256};

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 256;

/// Offline embedder for tests and air-gapped use. Each word is padded with
/// boundary markers, cut into character trigrams, and every trigram is hashed
/// into one of `dimensions` buckets. The bucket counts are L2-normalized.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl CharacterNgramEmbedder {
    pub fn embed_text(&self, text: &str) -> Vector {
        let buckets = self.dimensions.max(1);
        let mut vector = vec![0f32; buckets];

        for word in text.split_whitespace() {
            let padded: Vec<char> = std::iter::once('^')
                .chain(word.chars().flat_map(char::to_lowercase))
                .chain(std::iter::once('$'))
                .collect();

            for trigram in padded.windows(3) {
                vector[bucket_of(trigram, buckets)] += 1.0;
            }
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        vector
    }
}

fn bucket_of(trigram: &[char], buckets: usize) -> usize {
    let mut hasher = Sha256::new();
    let mut utf8 = [0u8; 4];
    for c in trigram {
        hasher.update(c.encode_utf8(&mut utf8).as_bytes());
    }
    let digest = hasher.finalize();
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    (u64::from_le_bytes(prefix) % buckets as u64) as usize
}

#[async_trait]
impl Embedder for CharacterNgramEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vector>, RagError> {
        if texts.is_empty() {
            return Err(RagError::EmptyInput);
        }
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vector, RagError> {
        Ok(self.embed_text(text))
    }
}
