use crate::error::RagError;
use crate::models::RetrievalResult;
use crate::store::IndexStore;
use crate::traits::Embedder;
use std::sync::Arc;
use tracing::{debug, info};

pub struct Retriever<E> {
    embedder: Arc<E>,
    store: Arc<IndexStore>,
}

impl<E> Retriever<E>
where
    E: Embedder + Send + Sync,
{
    pub fn new(embedder: Arc<E>, store: Arc<IndexStore>) -> Self {
        Self { embedder, store }
    }

    /// Nearest chunks for `query`, best first, minus any scoring below
    /// `min_score`. Filtering may leave zero hits; only an empty index is an
    /// error.
    pub async fn retrieve(
        &self,
        query: &str,
        top_k: usize,
        min_score: Option<f32>,
    ) -> Result<RetrievalResult, RagError> {
        let index = self.store.snapshot().await;
        if index.is_empty() {
            return Err(RagError::EmptyIndex);
        }

        let query_vector = self.embedder.embed_query(query).await?;
        let mut hits = index.search(&query_vector, top_k)?;
        let searched = hits.len();

        if let Some(threshold) = min_score {
            hits.retain(|hit| hit.score >= threshold);
        }

        for (rank, hit) in hits.iter().enumerate() {
            debug!(
                rank = rank + 1,
                score = hit.score,
                source = %hit.chunk.attribution(),
                position = hit.position,
                "retrieved chunk"
            );
        }
        info!(
            top_k,
            ?min_score,
            searched,
            kept = hits.len(),
            index_size = index.len(),
            "retrieval complete"
        );

        Ok(RetrievalResult {
            query: query.to_string(),
            top_k,
            min_score,
            hits,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunking::Chunker;
    use crate::index::VectorIndex;
    use crate::models::Document;
    use crate::testing::KeywordEmbedder;

    async fn store_with(texts: &[(&str, &str)]) -> Result<Arc<IndexStore>, RagError> {
        let chunker = Chunker::new(200, 20)?;
        let mut index = VectorIndex::new();
        for (source, text) in texts {
            let chunks = chunker.chunk(&Document::new(*source, *text));
            index.insert(
                chunks
                    .into_iter()
                    .map(|chunk| {
                        let vector = KeywordEmbedder::vector(&chunk.text);
                        (chunk, vector)
                    })
                    .collect::<Vec<_>>(),
            )?;
        }
        Ok(Arc::new(IndexStore::from_index(index, None)))
    }

    #[tokio::test]
    async fn empty_index_is_an_error() {
        let retriever = Retriever::new(
            Arc::new(KeywordEmbedder::default()),
            Arc::new(IndexStore::in_memory()),
        );
        let result = retriever.retrieve("anything", 3, None).await;
        assert!(matches!(result, Err(RagError::EmptyIndex)));
    }

    #[tokio::test]
    async fn best_match_ranks_first() -> Result<(), RagError> {
        let store = store_with(&[
            ("vaccines.txt", "Flu vaccines are available in October."),
            ("hours.txt", "We are open Monday to Friday, 9am to 5pm."),
        ])
        .await?;
        let retriever = Retriever::new(Arc::new(KeywordEmbedder::default()), store);

        let result = retriever.retrieve("What are the weekday hours?", 3, None).await?;
        assert_eq!(result.len(), 2);
        assert_eq!(result.hits[0].chunk.source, "hours.txt");
        assert!(result.hits[0].score > result.hits[1].score);
        Ok(())
    }

    #[tokio::test]
    async fn threshold_may_filter_everything_out() -> Result<(), RagError> {
        let store = store_with(&[("vaccines.txt", "Flu vaccines are available in October.")]).await?;
        let retriever = Retriever::new(Arc::new(KeywordEmbedder::default()), store);

        let result = retriever
            .retrieve("What is the refund policy?", 3, Some(0.3))
            .await?;
        assert!(result.is_empty());
        assert_eq!(result.min_score, Some(0.3));
        Ok(())
    }

    #[tokio::test]
    async fn retrieval_is_deterministic() -> Result<(), RagError> {
        let store = store_with(&[
            ("a.txt", "Open on Monday."),
            ("b.txt", "Open on Friday."),
            ("c.txt", "Open on Saturday."),
        ])
        .await?;
        let retriever = Retriever::new(Arc::new(KeywordEmbedder::default()), store);

        let first = retriever.retrieve("weekday hours", 2, None).await?;
        let second = retriever.retrieve("weekday hours", 2, None).await?;
        assert_eq!(first, second);
        let sources: Vec<&str> = first.hits.iter().map(|hit| hit.chunk.source.as_str()).collect();
        assert_eq!(sources, vec!["a.txt", "b.txt"]);
        Ok(())
    }
}
