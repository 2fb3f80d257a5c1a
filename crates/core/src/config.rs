use crate::error::RagError;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use std::time::Duration;

pub const DEFAULT_CHUNK_SIZE: usize = 1_000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;
pub const DEFAULT_TOP_K: usize = 3;
pub const DEFAULT_TEMPERATURE: f32 = 0.1;
pub const DEFAULT_MAX_TOKENS: u32 = 1_000;
pub const DEFAULT_MAX_CONTEXT_CHARS: usize = 4_000;

/// Tunables for chunking, retrieval and generation.
///
/// `min_score` is a cosine-similarity cutoff in `[-1, 1]`. It is disabled by
/// default, so every one of the `top_k` nearest chunks reaches the generator.
/// `max_context_chars` caps the retrieved text placed in the prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RagConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub top_k: usize,
    pub temperature: f32,
    pub max_tokens: u32,
    pub min_score: Option<f32>,
    pub max_context_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            top_k: DEFAULT_TOP_K,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            min_score: None,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }
}

impl RagConfig {
    pub fn validate(&self) -> Result<(), RagError> {
        validate_chunking(self.chunk_size, self.chunk_overlap)?;
        validate_top_k(self.top_k)?;
        validate_temperature(self.temperature)?;
        validate_min_score(self.min_score)?;

        if self.max_tokens == 0 {
            return Err(RagError::InvalidConfig(
                "max_tokens must be greater than zero".to_string(),
            ));
        }
        if self.max_context_chars == 0 {
            return Err(RagError::InvalidConfig(
                "max_context_chars must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

pub(crate) fn validate_chunking(chunk_size: usize, chunk_overlap: usize) -> Result<(), RagError> {
    if chunk_size == 0 {
        return Err(RagError::InvalidConfig(
            "chunk_size must be greater than zero".to_string(),
        ));
    }
    if chunk_overlap >= chunk_size {
        return Err(RagError::InvalidConfig(format!(
            "chunk_overlap ({chunk_overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

pub(crate) fn validate_top_k(top_k: usize) -> Result<(), RagError> {
    if top_k == 0 {
        return Err(RagError::InvalidConfig(
            "top_k must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn validate_temperature(temperature: f32) -> Result<(), RagError> {
    if !(0.0..=2.0).contains(&temperature) {
        return Err(RagError::InvalidConfig(format!(
            "temperature {temperature} is outside 0.0..=2.0"
        )));
    }
    Ok(())
}

pub(crate) fn validate_min_score(min_score: Option<f32>) -> Result<(), RagError> {
    match min_score {
        Some(score) if !(-1.0..=1.0).contains(&score) => Err(RagError::InvalidConfig(format!(
            "min_score {score} is not a cosine similarity in -1.0..=1.0"
        ))),
        _ => Ok(()),
    }
}

pub const DEFAULT_COHERE_BASE_URL: &str = "https://api.cohere.com";
pub const DEFAULT_EMBEDDING_MODEL: &str = "embed-english-v3.0";
pub const DEFAULT_CHAT_MODEL: &str = "command-r-plus";
pub const DEFAULT_EMBED_BATCH_SIZE: usize = 96;

/// Connection settings for the hosted embedding and chat endpoints.
#[serde_as]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CohereConfig {
    pub base_url: String,
    pub api_key: String,
    pub embedding_model: String,
    pub chat_model: String,
    pub embed_batch_size: usize,
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl CohereConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            base_url: DEFAULT_COHERE_BASE_URL.to_string(),
            api_key: api_key.into(),
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            chat_model: DEFAULT_CHAT_MODEL.to_string(),
            embed_batch_size: DEFAULT_EMBED_BATCH_SIZE,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn validate(&self) -> Result<(), RagError> {
        if self.api_key.trim().is_empty() {
            return Err(RagError::InvalidConfig("api key is empty".to_string()));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::InvalidConfig(
                "embed_batch_size must be greater than zero".to_string(),
            ));
        }
        url::Url::parse(&self.base_url)
            .map_err(|error| RagError::InvalidConfig(format!("base url: {error}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = RagConfig::default();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.top_k, 3);
        assert!((config.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(config.max_tokens, 1000);
        assert_eq!(config.min_score, None);
        assert_eq!(config.max_context_chars, 4000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let config = RagConfig {
            chunk_size: 100,
            chunk_overlap: 100,
            ..RagConfig::default()
        };
        assert!(matches!(config.validate(), Err(RagError::InvalidConfig(_))));
    }

    #[test]
    fn zero_values_are_rejected() {
        for config in [
            RagConfig {
                chunk_size: 0,
                chunk_overlap: 0,
                ..RagConfig::default()
            },
            RagConfig {
                top_k: 0,
                ..RagConfig::default()
            },
            RagConfig {
                max_tokens: 0,
                ..RagConfig::default()
            },
            RagConfig {
                max_context_chars: 0,
                ..RagConfig::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(RagError::InvalidConfig(_))));
        }
    }

    #[test]
    fn min_score_must_be_a_cosine_similarity() {
        let config = RagConfig {
            min_score: Some(1.5),
            ..RagConfig::default()
        };
        assert!(config.validate().is_err());

        let config = RagConfig {
            min_score: Some(0.3),
            ..RagConfig::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_config_fills_in_defaults() -> Result<(), serde_json::Error> {
        let config: RagConfig = serde_json::from_str(r#"{"chunk_size": 500, "chunk_overlap": 50}"#)?;
        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.top_k, DEFAULT_TOP_K);
        Ok(())
    }

    #[test]
    fn cohere_config_requires_api_key() {
        assert!(CohereConfig::new("  ").validate().is_err());
        assert!(CohereConfig::new("key").validate().is_ok());

        let mut config = CohereConfig::new("key");
        config.base_url = "not a url".to_string();
        assert!(config.validate().is_err());
    }
}
