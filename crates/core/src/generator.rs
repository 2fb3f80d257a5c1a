use crate::config::DEFAULT_MAX_CONTEXT_CHARS;
use crate::error::RagError;
use crate::models::RetrievalResult;
use crate::traits::{GenerationParams, LanguageModel, Prompt};
use std::sync::Arc;
use tracing::{debug, warn};

const PREAMBLE: &str = "You are a helpful medical assistant. Provide accurate, informative \
answers based only on the provided context. Always:\n\
1. Base your answer on the provided context.\n\
2. Be clear and professional.\n\
3. Include a disclaimer when appropriate: your answers are not a substitute for medical advice.\n\
4. Suggest consulting a healthcare professional for serious concerns.\n\
5. Cite the sources you rely on by their bracketed number and name.\n\
6. If the context does not contain the answer, say that no relevant information was found \
instead of guessing.";

/// Sent in place of context when retrieval found nothing.
pub const NO_CONTEXT_INSTRUCTION: &str = "No relevant information was found for this question. \
Tell the user that no relevant information was found in the provided documents. \
Do not answer from general knowledge and do not invent details.";

/// A block cut to fit the context budget is only kept if more than this many
/// characters of budget remain.
const MIN_TRUNCATED_BLOCK: usize = 100;

pub struct Generator<M> {
    model: Arc<M>,
    params: GenerationParams,
    max_context_chars: usize,
}

impl<M> Generator<M>
where
    M: LanguageModel + Send + Sync,
{
    pub fn new(model: Arc<M>, params: GenerationParams) -> Self {
        Self {
            model,
            params,
            max_context_chars: DEFAULT_MAX_CONTEXT_CHARS,
        }
    }

    pub fn with_max_context_chars(mut self, max_context_chars: usize) -> Self {
        self.max_context_chars = max_context_chars;
        self
    }

    pub fn params(&self) -> GenerationParams {
        self.params
    }

    pub fn model_name(&self) -> &str {
        self.model.model_name()
    }

    /// Prompt with the retrieved chunks in rank order, each attributed to its
    /// source, until `max_context_chars` of context is used.
    ///
    /// A block that overflows the budget is cut and ends in `...`, or dropped
    /// when too little budget is left; no later block is added after it.
    pub fn build_prompt(query: &str, context: &RetrievalResult, max_context_chars: usize) -> Prompt {
        let blocks = context_blocks(context, max_context_chars);
        let mut message = String::from("Context:\n\n");

        if blocks.is_empty() {
            message.push_str("(no relevant documents were retrieved)\n\n");
            message.push_str(NO_CONTEXT_INSTRUCTION);
            message.push_str("\n\n");
        } else {
            for block in &blocks {
                message.push_str(block);
            }
        }

        message.push_str(&format!("Question: {}\n\nAnswer:", query.trim()));

        Prompt {
            preamble: PREAMBLE.to_string(),
            message,
        }
    }

    pub async fn generate(&self, query: &str, context: &RetrievalResult) -> Result<String, RagError> {
        self.generate_with(query, context, self.params).await
    }

    pub async fn generate_with(
        &self,
        query: &str,
        context: &RetrievalResult,
        params: GenerationParams,
    ) -> Result<String, RagError> {
        let prompt = Self::build_prompt(query, context, self.max_context_chars);
        if context.is_empty() {
            warn!("no context retrieved, asking model to report missing information");
        }
        debug!(
            model = %self.model.model_name(),
            context_chunks = context.len(),
            prompt_chars = prompt.message.len(),
            temperature = params.temperature,
            max_tokens = params.max_tokens,
            "sending prompt"
        );

        let text = self.model.complete(&prompt, params).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(RagError::GenerationService {
                status: None,
                message: "model returned an empty response".to_string(),
            });
        }

        Ok(text.to_string())
    }
}

/// Context blocks, each charged for its trailing blank line.
fn context_blocks(context: &RetrievalResult, max_context_chars: usize) -> Vec<String> {
    let mut blocks = Vec::with_capacity(context.len());
    let mut used = 0;

    for (rank, hit) in context.hits.iter().enumerate() {
        let block = format!(
            "[{}] {} (relevance {:.3})\n{}\n\n",
            rank + 1,
            hit.chunk.attribution(),
            hit.score,
            hit.chunk.text.trim()
        );
        let cost = block.chars().count();

        if used + cost > max_context_chars {
            let left = max_context_chars - used;
            if left > MIN_TRUNCATED_BLOCK {
                let kept: String = block.chars().take(left - 5).collect();
                blocks.push(format!("{kept}...\n\n"));
            }
            debug!(
                rank = rank + 1,
                dropped = context.len() - blocks.len(),
                max_context_chars,
                "context budget reached"
            );
            break;
        }

        used += cost;
        blocks.push(block);
    }

    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ScoredChunk};
    use crate::testing::{EchoModel, ScriptedModel};

    fn context(hits: &[(&str, Option<u32>, &str, f32)]) -> RetrievalResult {
        RetrievalResult {
            query: "q".to_string(),
            top_k: 3,
            min_score: None,
            hits: hits
                .iter()
                .enumerate()
                .map(|(index, (source, page, text, score))| ScoredChunk {
                    position: index as u64,
                    chunk: Chunk {
                        chunk_id: format!("id-{index}"),
                        source: source.to_string(),
                        page: *page,
                        chunk_index: index as u32,
                        char_start: 0,
                        text: text.to_string(),
                    },
                    score: *score,
                })
                .collect(),
        }
    }

    fn params() -> GenerationParams {
        GenerationParams {
            temperature: 0.1,
            max_tokens: 1000,
        }
    }

    #[test]
    fn prompt_lists_context_in_rank_order_with_sources() {
        let context = context(&[
            ("hours.txt", None, "Open Monday to Friday.", 0.91),
            ("manual.pdf", Some(4), "Closed on holidays.", 0.52),
        ]);
        let prompt = Generator::<EchoModel>::build_prompt("When are you open?", &context, DEFAULT_MAX_CONTEXT_CHARS);

        let first = prompt.message.find("[1] hours.txt (relevance 0.910)");
        let second = prompt.message.find("[2] manual.pdf (page 4) (relevance 0.520)");
        assert!(first.is_some() && second.is_some());
        assert!(first < second);
        assert!(prompt.message.ends_with("Question: When are you open?\n\nAnswer:"));
        assert!(!prompt.message.contains(NO_CONTEXT_INSTRUCTION));
    }

    #[test]
    fn empty_context_prompt_instructs_model_to_decline() {
        let prompt = Generator::<EchoModel>::build_prompt(
            "What is the refund policy?",
            &context(&[]),
            DEFAULT_MAX_CONTEXT_CHARS,
        );

        assert!(prompt.message.contains(NO_CONTEXT_INSTRUCTION));
        assert!(prompt.message.contains("Question: What is the refund policy?"));
    }

    #[test]
    fn preamble_sets_medical_assistant_rules() {
        let prompt = Generator::<EchoModel>::build_prompt("q", &context(&[]), DEFAULT_MAX_CONTEXT_CHARS);
        let preamble = prompt.preamble.to_lowercase();

        assert!(preamble.contains("medical assistant"));
        assert!(preamble.contains("disclaimer"));
        assert!(preamble.contains("consulting a healthcare professional"));
        assert!(preamble.contains("no relevant information was found"));
        assert!(preamble.contains("cite the sources"));
    }

    fn context_section(message: &str) -> &str {
        let start = "Context:\n\n".len();
        let end = message.find("Question:").unwrap_or(message.len());
        &message[start..end]
    }

    #[test]
    fn overflowing_block_is_cut_to_the_budget() {
        let long = "x".repeat(1000);
        let context = context(&[
            ("a.txt", None, long.as_str(), 0.9),
            ("b.txt", None, long.as_str(), 0.8),
            ("c.txt", None, "short", 0.7),
        ]);
        let prompt = Generator::<EchoModel>::build_prompt("q", &context, 1500);
        let section = context_section(&prompt.message);

        assert_eq!(section.chars().count(), 1500);
        assert!(section.contains("[2] b.txt"));
        assert!(section.ends_with("...\n\n"));
        assert!(!section.contains("[3]"));
    }

    #[test]
    fn block_is_dropped_when_little_budget_remains() {
        let long = "x".repeat(1000);
        let context = context(&[
            ("a.txt", None, long.as_str(), 0.9),
            ("b.txt", None, long.as_str(), 0.8),
            ("c.txt", None, "short", 0.7),
        ]);
        let prompt = Generator::<EchoModel>::build_prompt("q", &context, 1100);
        let section = context_section(&prompt.message);

        assert_eq!(section.chars().count(), 1030);
        assert!(section.starts_with("[1] a.txt (relevance 0.900)\n"));
        assert!(!section.contains("[2]"));
        assert!(!section.contains("[3]"));
        assert!(!section.contains("..."));
    }

    #[test]
    fn twenty_large_hits_stay_within_the_default_budget() {
        let long = "word ".repeat(200);
        let hits: Vec<(&str, Option<u32>, &str, f32)> =
            (0..20).map(|_| ("big.txt", None, long.as_str(), 0.5)).collect();
        let prompt = Generator::<EchoModel>::build_prompt("q", &context(&hits), DEFAULT_MAX_CONTEXT_CHARS);

        assert!(context_section(&prompt.message).chars().count() <= DEFAULT_MAX_CONTEXT_CHARS);
    }

    #[tokio::test]
    async fn generation_uses_configured_parameters() -> Result<(), RagError> {
        let model = Arc::new(EchoModel::default());
        let generator = Generator::new(Arc::clone(&model), params());
        let context = context(&[("hours.txt", None, "Open Monday to Friday.", 0.9)]);

        let text = generator.generate("When?", &context).await?;
        assert_eq!(text, "According to the documents: Open Monday to Friday.");

        let (_, sent) = model.last_prompt().ok_or(RagError::EmptyInput)?;
        assert_eq!(sent, params());
        Ok(())
    }

    #[tokio::test]
    async fn empty_model_output_is_an_error() {
        let generator = Generator::new(
            Arc::new(ScriptedModel {
                reply: Ok("   ".to_string()),
            }),
            params(),
        );
        let result = generator.generate("When?", &context(&[])).await;
        assert!(matches!(result, Err(RagError::GenerationService { status: None, .. })));
    }

    #[tokio::test]
    async fn service_failures_are_propagated() {
        let generator = Generator::new(
            Arc::new(ScriptedModel {
                reply: Err((Some(502), "bad gateway".to_string())),
            }),
            params(),
        );
        let result = generator.generate("When?", &context(&[])).await;
        assert!(matches!(
            result,
            Err(RagError::GenerationService { status: Some(502), .. })
        ));
    }
}
