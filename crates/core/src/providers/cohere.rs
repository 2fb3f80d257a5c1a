use crate::config::CohereConfig;
use crate::error::RagError;
use crate::models::Vector;
use crate::traits::{Embedder, GenerationParams, LanguageModel, Prompt};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tracing::{debug, error};
use url::Url;

/// Client for the hosted embedding (`/v1/embed`) and chat (`/v1/chat`)
/// endpoints.
#[derive(Clone)]
pub struct CohereClient {
    client: Client,
    api_key: String,
    embed_url: Url,
    chat_url: Url,
    embedding_model: String,
    chat_model: String,
    batch_size: usize,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    texts: &'a [&'a str],
    model: &'a str,
    input_type: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    message: &'a str,
    preamble: &'a str,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

enum Service {
    Embedding,
    Generation,
}

impl Service {
    fn error(&self, status: Option<u16>, message: String) -> RagError {
        match self {
            Service::Embedding => RagError::EmbeddingService { status, message },
            Service::Generation => RagError::GenerationService { status, message },
        }
    }
}

impl CohereClient {
    pub fn new(config: &CohereConfig) -> Result<Self, RagError> {
        config.validate()?;

        let mut base = Url::parse(&config.base_url)
            .map_err(|error| RagError::InvalidConfig(format!("base url: {error}")))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let join = |endpoint: &str| {
            base.join(endpoint)
                .map_err(|error| RagError::InvalidConfig(format!("endpoint {endpoint}: {error}")))
        };

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|error| RagError::InvalidConfig(format!("http client: {error}")))?;

        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            embed_url: join("v1/embed")?,
            chat_url: join("v1/chat")?,
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            batch_size: config.embed_batch_size,
        })
    }

    pub fn embed_url(&self) -> &Url {
        &self.embed_url
    }

    pub fn chat_url(&self) -> &Url {
        &self.chat_url
    }

    async fn embed_batch(&self, texts: &[&str], input_type: &str) -> Result<Vec<Vector>, RagError> {
        debug!(
            batch_size = texts.len(),
            model = %self.embedding_model,
            input_type,
            "embedding batch"
        );

        let request = EmbedRequest {
            texts,
            model: &self.embedding_model,
            input_type,
        };
        let response = self
            .client
            .post(self.embed_url.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| Service::Embedding.error(None, format!("request failed: {error}")))?;

        let response = check_status(response, Service::Embedding).await?;
        let parsed: EmbedResponse = response.json().await.map_err(|error| {
            Service::Embedding.error(None, format!("failed to parse response: {error}"))
        })?;

        if parsed.embeddings.len() != texts.len() {
            return Err(Service::Embedding.error(
                None,
                format!(
                    "service returned {} vectors for {} texts",
                    parsed.embeddings.len(),
                    texts.len()
                ),
            ));
        }

        Ok(parsed.embeddings)
    }
}

async fn check_status(response: Response, service: Service) -> Result<Response, RagError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&body)
        .map(|parsed| parsed.message)
        .unwrap_or(body);
    error!(%status, %message, "upstream service error");
    Err(service.error(Some(status.as_u16()), message))
}

/// Distinct texts in first-seen order, plus for every input the index of its
/// distinct text.
fn dedupe_texts(texts: &[String]) -> (Vec<&str>, Vec<usize>) {
    let mut seen = HashMap::<Vec<u8>, usize>::new();
    let mut unique = Vec::new();
    let mut mapping = Vec::with_capacity(texts.len());

    for text in texts {
        let digest = Sha256::digest(text.as_bytes()).to_vec();
        let slot = *seen.entry(digest).or_insert_with(|| {
            unique.push(text.as_str());
            unique.len() - 1
        });
        mapping.push(slot);
    }

    (unique, mapping)
}

#[async_trait]
impl Embedder for CohereClient {
    async fn embed_documents(&self, texts: &[String]) -> Result<Vec<Vector>, RagError> {
        if texts.is_empty() {
            return Err(RagError::EmptyInput);
        }

        let (unique, mapping) = dedupe_texts(texts);
        let mut vectors = Vec::with_capacity(unique.len());
        for batch in unique.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch, "search_document").await?);
        }

        debug!(
            texts = texts.len(),
            distinct = unique.len(),
            "embedded documents"
        );
        Ok(mapping.into_iter().map(|slot| vectors[slot].clone()).collect())
    }

    async fn embed_query(&self, text: &str) -> Result<Vector, RagError> {
        self.embed_batch(&[text], "search_query")
            .await?
            .pop()
            .ok_or_else(|| Service::Embedding.error(None, "empty response".to_string()))
    }
}

#[async_trait]
impl LanguageModel for CohereClient {
    fn model_name(&self) -> &str {
        &self.chat_model
    }

    async fn complete(&self, prompt: &Prompt, params: GenerationParams) -> Result<String, RagError> {
        let request = ChatRequest {
            model: &self.chat_model,
            message: &prompt.message,
            preamble: &prompt.preamble,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
        };

        let response = self
            .client
            .post(self.chat_url.clone())
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|error| Service::Generation.error(None, format!("request failed: {error}")))?;

        let response = check_status(response, Service::Generation).await?;
        let parsed: ChatResponse = response.json().await.map_err(|error| {
            Service::Generation.error(None, format!("failed to parse response: {error}"))
        })?;

        Ok(parsed.text)
    }
}
