//! Deterministic doubles for the hosted services.

use crate::error::RagError;
use crate::generator::NO_CONTEXT_INSTRUCTION;
use crate::models::Vector;
use crate::traits::{Embedder, GenerationParams, LanguageModel, Prompt};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

const CONCEPTS: [&[&str]; 5] = [
    &["weekday", "weekdays", "monday", "friday"],
    &["hours", "open", "9am", "5pm"],
    &["saturday", "saturdays", "walk-ins", "weekend"],
    &["refund", "refunds", "policy"],
    &["flu", "vaccine", "vaccines", "october"],
];

/// Counts concept keywords, so related wording lands close together.
#[derive(Debug, Default)]
pub struct KeywordEmbedder {
    pub document_calls: AtomicUsize,
}

impl KeywordEmbedder {
    pub fn vector(text: &str) -> Vector {
        let mut vector = vec![0f32; CONCEPTS.len()];
        for word in text.split(|c: char| c.is_whitespace() || ",.?!;:".contains(c)) {
            let word = word.to_lowercase();
            for (slot, keywords) in CONCEPTS.iter().enumerate() {
                if keywords.contains(&word.as_str()) {
                    vector[slot] += 1.0;
                }
            }
        }
        vector
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vector>, RagError> {
        if texts.is_empty() {
            return Err(RagError::EmptyInput);
        }
        self.document_calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts.iter().map(|text| Self::vector(text)).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vector, RagError> {
        Ok(Self::vector(text))
    }
}

/// Fails every document batch; queries still embed.
#[derive(Debug, Default)]
pub struct FailingEmbedder;

#[async_trait]
impl Embedder for FailingEmbedder {
    async fn embed_documents(&self, _texts: &[String]) -> Result<Vec<Vector>, RagError> {
        Err(RagError::EmbeddingService {
            status: Some(503),
            message: "embedding backend unavailable".to_string(),
        })
    }

    async fn embed_query(&self, text: &str) -> Result<Vector, RagError> {
        Ok(KeywordEmbedder::vector(text))
    }
}

/// Answers from the first context block, or declines when told there is no
/// context. Records every prompt it receives.
#[derive(Debug, Default)]
pub struct EchoModel {
    pub prompts: Mutex<Vec<(Prompt, GenerationParams)>>,
}

impl EchoModel {
    pub fn last_prompt(&self) -> Option<(Prompt, GenerationParams)> {
        self.prompts.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl LanguageModel for EchoModel {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn complete(&self, prompt: &Prompt, params: GenerationParams) -> Result<String, RagError> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push((prompt.clone(), params));
        }

        if prompt.message.contains(NO_CONTEXT_INSTRUCTION) {
            return Ok("No relevant information was found in the provided documents.".to_string());
        }

        let first_block = prompt
            .message
            .split("\n\n")
            .find(|block| block.starts_with("[1]"))
            .and_then(|block| block.split_once('\n'))
            .map(|(_, text)| text.trim().to_string())
            .unwrap_or_default();
        Ok(format!("According to the documents: {first_block}"))
    }
}

/// Returns the configured outcome for every call.
#[derive(Debug)]
pub struct ScriptedModel {
    pub reply: Result<String, (Option<u16>, String)>,
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, _prompt: &Prompt, _params: GenerationParams) -> Result<String, RagError> {
        self.reply
            .clone()
            .map_err(|(status, message)| RagError::GenerationService { status, message })
    }
}
