pub mod chunking;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod generator;
pub mod index;
pub mod loader;
pub mod models;
pub mod pipeline;
pub mod providers;
pub mod retriever;
pub mod store;
pub mod traits;

#[cfg(test)]
mod testing;

pub use chunking::Chunker;
pub use config::{CohereConfig, RagConfig};
pub use embeddings::{CharacterNgramEmbedder, DEFAULT_EMBEDDING_DIMENSIONS};
pub use error::{IngestError, PipelineError, RagError, Stage};
pub use generator::{Generator, NO_CONTEXT_INSTRUCTION};
pub use index::{cosine_similarity, VectorIndex};
pub use loader::{
    clean_text, discover_documents, load_document, load_files_best_effort,
    load_folder_best_effort, DocumentKind, LoadReport, SkippedFile,
};
pub use models::{
    Answer, AnswerQuality, AskOptions, Chunk, Document, IndexEntry, IndexStats, IngestionReport, PipelineState,
    RetrievalResult, ScoredChunk, StageTimings, Vector,
};
pub use pipeline::Pipeline;
pub use providers::CohereClient;
pub use retriever::Retriever;
pub use store::IndexStore;
pub use traits::{Embedder, GenerationParams, LanguageModel, Prompt};
