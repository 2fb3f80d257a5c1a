use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use docqa_core::config::{
    DEFAULT_CHAT_MODEL, DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE, DEFAULT_COHERE_BASE_URL,
    DEFAULT_EMBEDDING_MODEL, DEFAULT_MAX_CONTEXT_CHARS, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE,
    DEFAULT_TOP_K,
};
use docqa_core::{
    load_files_best_effort, load_folder_best_effort, Answer, AskOptions, CharacterNgramEmbedder,
    CohereClient, CohereConfig, Embedder, IndexStore, LoadReport, Pipeline, PipelineError,
    RagConfig,
};
use serde_json::json;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "docqa", version, about = "Answer questions from your own documents")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Where the vector index is persisted
    #[arg(long, env = "DOCQA_INDEX_PATH", default_value = "data/vector_db/index.json")]
    index_path: PathBuf,

    /// Cohere API base URL
    #[arg(long, env = "COHERE_API_BASE", default_value = DEFAULT_COHERE_BASE_URL)]
    api_base: String,

    /// Cohere API key
    #[arg(long, env = "COHERE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Embedding model name
    #[arg(long, default_value = DEFAULT_EMBEDDING_MODEL)]
    embedding_model: String,

    /// Chat model name
    #[arg(long, default_value = DEFAULT_CHAT_MODEL)]
    chat_model: String,

    /// Maximum characters per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Characters shared by consecutive chunks
    #[arg(long, default_value_t = DEFAULT_CHUNK_OVERLAP)]
    chunk_overlap: usize,

    /// Chunks retrieved per question
    #[arg(long, default_value_t = DEFAULT_TOP_K)]
    top_k: usize,

    /// Sampling temperature
    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,

    /// Maximum tokens per answer
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: u32,

    /// Maximum characters of retrieved context placed in the prompt
    #[arg(long, default_value_t = DEFAULT_MAX_CONTEXT_CHARS)]
    max_context_chars: usize,

    /// Drop retrieved chunks whose cosine score is below this value
    #[arg(long, allow_negative_numbers = true)]
    min_score: Option<f32>,

    /// Embed with the offline character n-gram embedder instead of Cohere
    #[arg(long, default_value_t = false)]
    local_embeddings: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Load .pdf and .txt files and add their chunks to the index.
    Ingest {
        /// Folder searched recursively for documents.
        #[arg(long)]
        folder: Option<PathBuf>,
        /// Individual files to ingest.
        files: Vec<PathBuf>,
        /// Replace the existing index instead of appending to it.
        #[arg(long, default_value_t = false)]
        rebuild: bool,
    },
    /// Answer one or more questions from the indexed documents.
    Ask {
        /// Questions to answer, in order.
        #[arg(required = true)]
        queries: Vec<String>,
        /// Chunks retrieved for this question.
        #[arg(long)]
        top_k: Option<usize>,
        /// Relevance cutoff for this question.
        #[arg(long, allow_negative_numbers = true)]
        min_score: Option<f32>,
        /// Sampling temperature for this question.
        #[arg(long)]
        temperature: Option<f32>,
        /// Print answers, quality metrics and errors as JSON.
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Show what the index holds.
    Info,
    /// Delete the index.
    Reset,
}

impl Cli {
    fn rag_config(&self) -> RagConfig {
        RagConfig {
            chunk_size: self.chunk_size,
            chunk_overlap: self.chunk_overlap,
            top_k: self.top_k,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            min_score: self.min_score,
            max_context_chars: self.max_context_chars,
        }
    }

    fn cohere_config(&self) -> anyhow::Result<CohereConfig> {
        let api_key = self
            .api_key
            .clone()
            .context("a Cohere API key is required (set COHERE_API_KEY or pass --api-key)")?;

        let mut config = CohereConfig::new(api_key);
        config.base_url = self.api_base.clone();
        config.embedding_model = self.embedding_model.clone();
        config.chat_model = self.chat_model.clone();
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        index_path = %cli.index_path.display(),
        "docqa boot"
    );

    match cli.command {
        Command::Info => {
            let store = IndexStore::open(&cli.index_path);
            let stats = store.snapshot().await.stats();

            println!("index: {}", cli.index_path.display());
            println!("entries: {}", stats.entries);
            match stats.dimensions {
                Some(dimensions) => println!("dimensions: {dimensions}"),
                None => println!("dimensions: -"),
            }
            println!("average_chunk_chars: {:.1}", stats.average_chunk_chars);
            println!("sources: {}", stats.sources.len());
            for source in &stats.sources {
                println!("  {source}");
            }
            Ok(())
        }
        Command::Reset => {
            let store = IndexStore::open(&cli.index_path);
            let writer = store.lock_writer().await;
            store.clear(&writer).await?;
            println!("index cleared: {}", cli.index_path.display());
            Ok(())
        }
        _ => {
            let model = CohereClient::new(&cli.cohere_config()?)?;
            if cli.local_embeddings {
                run(cli, CharacterNgramEmbedder::default(), model).await
            } else {
                let embedder = model.clone();
                run(cli, embedder, model).await
            }
        }
    }
}

async fn run<E>(cli: Cli, embedder: E, model: CohereClient) -> anyhow::Result<()>
where
    E: Embedder + Send + Sync,
{
    let store = IndexStore::open(&cli.index_path);
    let pipeline = Pipeline::new(cli.rag_config(), embedder, model, store)?;

    match cli.command {
        Command::Ingest {
            folder,
            files,
            rebuild,
        } => {
            let report = load_sources(folder, &files)?;
            for skipped in &report.skipped_files {
                warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped file");
            }
            if report.documents.is_empty() {
                anyhow::bail!(
                    "no readable documents ({} file(s) skipped)",
                    report.skipped_files.len()
                );
            }

            let ingestion = if rebuild {
                pipeline.rebuild(&report.documents).await?
            } else {
                pipeline.ingest(&report.documents).await?
            };

            println!(
                "{} chunks from {} document section(s) indexed at {} ({} entries total, {} ms)",
                ingestion.chunks,
                ingestion.documents,
                Utc::now().to_rfc3339(),
                ingestion.index_size,
                ingestion.elapsed.as_millis()
            );
            if !report.skipped_files.is_empty() {
                println!("skipped_files={}", report.skipped_files.len());
            }
        }
        Command::Ask {
            queries,
            top_k,
            min_score,
            temperature,
            json,
        } => {
            let options = AskOptions {
                top_k,
                min_score,
                temperature,
            };

            let results = pipeline.ask_batch(&queries, options).await;
            let failed = results.iter().filter(|result| result.is_err()).count();

            if json {
                let rendered: Vec<serde_json::Value> = queries
                    .iter()
                    .zip(&results)
                    .map(|(query, result)| answer_json(query, result))
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rendered)?);
            } else {
                for (query, result) in queries.iter().zip(&results) {
                    match result {
                        Ok(answer) => print_answer(answer),
                        Err(error) => {
                            println!("question: {query}");
                            println!("error: {error}");
                            println!();
                        }
                    }
                }
            }

            if failed > 0 {
                anyhow::bail!("{failed} of {} question(s) failed", queries.len());
            }
        }
        Command::Info | Command::Reset => {}
    }

    Ok(())
}

fn load_sources(folder: Option<PathBuf>, files: &[PathBuf]) -> anyhow::Result<LoadReport> {
    if folder.is_none() && files.is_empty() {
        anyhow::bail!("nothing to ingest: pass --folder or one or more files");
    }

    let mut report = load_files_best_effort(files);
    if let Some(folder) = folder {
        let from_folder = load_folder_best_effort(&folder)
            .with_context(|| format!("loading folder {}", folder.display()))?;
        report.documents.extend(from_folder.documents);
        report.skipped_files.extend(from_folder.skipped_files);
    }
    Ok(report)
}

fn answer_json(query: &str, result: &Result<Answer, PipelineError>) -> serde_json::Value {
    match result {
        Ok(answer) => json!({
            "query": query,
            "answer": answer,
            "quality": answer.quality(),
        }),
        Err(error) => json!({
            "query": query,
            "error": error.to_string(),
            "stage": error.stage().map(|stage| stage.to_string()),
            "retryable": error.is_retryable(),
        }),
    }
}

fn print_answer(answer: &Answer) {
    println!("question: {}", answer.retrieval.query);
    println!("answer: {}", answer.text);

    if answer.retrieval.is_empty() {
        println!("sources: none");
    } else {
        println!("sources:");
        for (rank, hit) in answer.retrieval.hits.iter().enumerate() {
            println!(
                "  [{}] {} score={:.3} chunk={}",
                rank + 1,
                hit.chunk.attribution(),
                hit.score,
                hit.chunk.chunk_id
            );
        }
    }

    println!(
        "timings: retrieval={}ms generation={}ms total={}ms",
        answer.timings.retrieval.as_millis(),
        answer.timings.generation.as_millis(),
        answer.timings.total.as_millis()
    );

    let quality = answer.quality();
    println!(
        "quality: score={:.1} sources={} avg_relevance={:.3} disclaimer={} cites_sources={}",
        quality.score,
        quality.sources_used,
        quality.average_relevance,
        quality.contains_disclaimer,
        quality.cites_sources
    );
    println!();
}
