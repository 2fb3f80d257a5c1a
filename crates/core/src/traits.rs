use crate::error::RagError;
use crate::models::Vector;
use async_trait::async_trait;

#[async_trait]
pub trait Embedder {
    /// One vector per input text, in input order.
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vector>, RagError>;

    async fn embed_query(&self, text: &str) -> Result<Vector, RagError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// System instructions.
    pub preamble: String,
    pub message: String,
}

#[async_trait]
pub trait LanguageModel {
    fn model_name(&self) -> &str;

    async fn complete(&self, prompt: &Prompt, params: GenerationParams) -> Result<String, RagError>;
}
