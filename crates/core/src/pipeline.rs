use crate::chunking::Chunker;
use crate::config::{validate_min_score, validate_temperature, validate_top_k, RagConfig};
use crate::error::{PipelineError, RagError, Stage};
use crate::generator::Generator;
use crate::index::VectorIndex;
use crate::models::{
    Answer, AskOptions, Document, IndexStats, IngestionReport, PipelineState, StageTimings,
};
use crate::retriever::Retriever;
use crate::store::IndexStore;
use crate::traits::{Embedder, GenerationParams, LanguageModel};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Ingestion (chunk, embed, index, persist) and question answering
/// (retrieve, generate) over one owned [`IndexStore`].
///
/// The pipeline is `Empty` until its store holds at least one entry; a store
/// opened over a persisted index starts out `Indexed`.
pub struct Pipeline<E, M> {
    config: RagConfig,
    chunker: Chunker,
    embedder: Arc<E>,
    store: Arc<IndexStore>,
    retriever: Retriever<E>,
    generator: Generator<M>,
}

impl<E, M> Pipeline<E, M>
where
    E: Embedder + Send + Sync,
    M: LanguageModel + Send + Sync,
{
    pub fn new(config: RagConfig, embedder: E, model: M, store: IndexStore) -> Result<Self, RagError> {
        config.validate()?;

        let chunker = Chunker::new(config.chunk_size, config.chunk_overlap)?;
        let embedder = Arc::new(embedder);
        let store = Arc::new(store);
        let retriever = Retriever::new(Arc::clone(&embedder), Arc::clone(&store));
        let generator = Generator::new(
            Arc::new(model),
            GenerationParams {
                temperature: config.temperature,
                max_tokens: config.max_tokens,
            },
        )
        .with_max_context_chars(config.max_context_chars);

        info!(
            chunk_size = config.chunk_size,
            chunk_overlap = config.chunk_overlap,
            top_k = config.top_k,
            temperature = config.temperature,
            max_tokens = config.max_tokens,
            min_score = ?config.min_score,
            max_context_chars = config.max_context_chars,
            model = %generator.model_name(),
            index_path = ?store.path(),
            "pipeline initialized"
        );

        Ok(Self {
            config,
            chunker,
            embedder,
            store,
            retriever,
            generator,
        })
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    pub async fn state(&self) -> PipelineState {
        if self.store.snapshot().await.is_empty() {
            PipelineState::Empty
        } else {
            PipelineState::Indexed
        }
    }

    pub async fn stats(&self) -> IndexStats {
        self.store.snapshot().await.stats()
    }

    /// Adds `documents` to the current index.
    ///
    /// Nothing is inserted unless every chunk embedded successfully, and the
    /// new index only becomes visible once it has been persisted.
    pub async fn ingest(&self, documents: &[Document]) -> Result<IngestionReport, PipelineError> {
        self.write_index(documents, false).await
    }

    /// Builds a fresh index from `documents` and replaces the current one.
    pub async fn rebuild(&self, documents: &[Document]) -> Result<IngestionReport, PipelineError> {
        self.write_index(documents, true).await
    }

    /// Discards the index and its backing file.
    pub async fn reset(&self) -> Result<(), PipelineError> {
        let writer = self.store.lock_writer().await;
        self.store
            .clear(&writer)
            .await
            .map_err(PipelineError::at(Stage::Persistence))?;
        info!("index reset");
        Ok(())
    }

    async fn write_index(
        &self,
        documents: &[Document],
        fresh: bool,
    ) -> Result<IngestionReport, PipelineError> {
        let started = Instant::now();

        let chunks = self.chunker.chunk_all(documents);
        if chunks.is_empty() {
            return Err(PipelineError::at(Stage::Chunking)(RagError::EmptyInput));
        }
        info!(
            documents = documents.len(),
            chunk_count = chunks.len(),
            fresh,
            "chunked documents"
        );

        let writer = self.store.lock_writer().await;

        let texts: Vec<String> = chunks.iter().map(|chunk| chunk.text.clone()).collect();
        let vectors = self
            .embedder
            .embed_documents(&texts)
            .await
            .map_err(|source| {
                error!(error = %source, chunk_count = texts.len(), "embedding failed, index unchanged");
                PipelineError::at(Stage::Embedding)(source)
            })?;
        if vectors.len() != chunks.len() {
            return Err(PipelineError::at(Stage::Embedding)(RagError::EmbeddingService {
                status: None,
                message: format!("expected {} vectors, got {}", chunks.len(), vectors.len()),
            }));
        }

        let mut next = if fresh {
            VectorIndex::new()
        } else {
            (*self.store.snapshot().await).clone()
        };
        let chunk_count = chunks.len();
        let first_position = next
            .insert(chunks.into_iter().zip(vectors))
            .map_err(PipelineError::at(Stage::Indexing))?;
        let index_size = next.len();

        self.store
            .publish(&writer, next)
            .await
            .map_err(PipelineError::at(Stage::Persistence))?;

        let report = IngestionReport {
            documents: documents.len(),
            chunks: chunk_count,
            first_position,
            index_size,
            elapsed: started.elapsed(),
        };
        info!(
            documents = report.documents,
            chunks = report.chunks,
            index_size = report.index_size,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "ingestion complete"
        );
        Ok(report)
    }

    pub async fn ask(&self, query: &str) -> Result<Answer, PipelineError> {
        self.ask_with(query, AskOptions::default()).await
    }

    pub async fn ask_with(&self, query: &str, options: AskOptions) -> Result<Answer, PipelineError> {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        if self.state().await == PipelineState::Empty {
            return Err(PipelineError::NotReady);
        }
        if query.trim().is_empty() {
            return Err(PipelineError::at(Stage::Retrieval)(RagError::EmptyInput));
        }

        let top_k = options.top_k.unwrap_or(self.config.top_k);
        let min_score = options.min_score.or(self.config.min_score);
        validate_top_k(top_k)
            .and_then(|_| validate_min_score(min_score))
            .map_err(PipelineError::at(Stage::Retrieval))?;

        let mut params = self.generator.params();
        if let Some(temperature) = options.temperature {
            validate_temperature(temperature).map_err(PipelineError::at(Stage::Generation))?;
            params.temperature = temperature;
        }

        info!(%request_id, query = %truncate(query, 100), "answering query");

        let retrieval = self
            .retriever
            .retrieve(query, top_k, min_score)
            .await
            .map_err(|source| {
                error!(%request_id, error = %source, "retrieval failed");
                PipelineError::at(Stage::Retrieval)(source)
            })?;
        let retrieval_time = started.elapsed();

        let generation_started = Instant::now();
        let text = self
            .generator
            .generate_with(query, &retrieval, params)
            .await
            .map_err(|source| {
                error!(%request_id, error = %source, "generation failed");
                PipelineError::at(Stage::Generation)(source)
            })?;

        let timings = StageTimings {
            retrieval: retrieval_time,
            generation: generation_started.elapsed(),
            total: started.elapsed(),
        };
        info!(
            %request_id,
            sources = retrieval.len(),
            answer_chars = text.len(),
            retrieval_ms = timings.retrieval.as_millis() as u64,
            generation_ms = timings.generation.as_millis() as u64,
            total_ms = timings.total.as_millis() as u64,
            "answered query"
        );

        Ok(Answer {
            request_id,
            text,
            retrieval,
            timings,
            model: self.generator.model_name().to_string(),
            temperature: params.temperature,
            answered_at: Utc::now(),
        })
    }

    /// Answers each query in turn with the same overrides; one failure does
    /// not stop the rest.
    pub async fn ask_batch(
        &self,
        queries: &[String],
        options: AskOptions,
    ) -> Vec<Result<Answer, PipelineError>> {
        info!(queries = queries.len(), "processing query batch");
        let mut answers = Vec::with_capacity(queries.len());
        for query in queries {
            answers.push(self.ask_with(query, options).await);
        }

        let failed = answers.iter().filter(|answer| answer.is_err()).count();
        if failed > 0 {
            warn!(failed, queries = queries.len(), "some queries in the batch failed");
        }
        answers
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((offset, _)) => format!("{}...", &text[..offset]),
        None => text.to_string(),
    }
}
