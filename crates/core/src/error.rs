use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("path has no file name: {0}")]
    MissingFileName(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("no input to embed")]
    EmptyInput,

    #[error("index has never been populated")]
    EmptyIndex,

    #[error("entry {entry} has dimension {found}, index expects {expected}")]
    DimensionMismatch {
        entry: usize,
        expected: usize,
        found: usize,
    },

    #[error("entry {entry} has a zero-length vector")]
    ZeroLengthVector { entry: usize },

    #[error("entry {entry} has a NaN or infinite component")]
    NonFiniteVector { entry: usize },

    #[error("query vector has dimension {found}, index expects {expected}")]
    QueryDimensionMismatch { expected: usize, found: usize },

    #[error("embedding service error{}: {message}", status_suffix(.status))]
    EmbeddingService { status: Option<u16>, message: String },

    #[error("generation service error{}: {message}", status_suffix(.status))]
    GenerationService { status: Option<u16>, message: String },

    #[error("index load error: {0}")]
    IndexLoad(String),

    #[error("index persist error: {0}")]
    IndexPersist(String),

    #[error("regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl RagError {
    /// Upstream provider failures are the only errors worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingService { .. } | RagError::GenerationService { .. }
        )
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|code| format!(" (status {code})"))
        .unwrap_or_default()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Chunking,
    Embedding,
    Indexing,
    Persistence,
    Retrieval,
    Generation,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Chunking => "chunking",
            Stage::Embedding => "embedding",
            Stage::Indexing => "indexing",
            Stage::Persistence => "persistence",
            Stage::Retrieval => "retrieval",
            Stage::Generation => "generation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline not ready: ingest documents before asking questions")]
    NotReady,

    #[error("{stage} failed: {source}")]
    Stage {
        stage: Stage,
        #[source]
        source: RagError,
    },
}

impl PipelineError {
    pub fn at(stage: Stage) -> impl FnOnce(RagError) -> PipelineError {
        move |source| PipelineError::Stage { stage, source }
    }

    pub fn stage(&self) -> Option<Stage> {
        match self {
            PipelineError::NotReady => None,
            PipelineError::Stage { stage, .. } => Some(*stage),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            PipelineError::NotReady => false,
            PipelineError::Stage { source, .. } => source.is_retryable(),
        }
    }
}

pub type Result<T, E = RagError> = std::result::Result<T, E>;
