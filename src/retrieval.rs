//! Retrieval and relevance filtering.
//!
//! Embed the query with the ingestion provider, take the top `k` chunks
//! from the index, then drop every candidate that is below the threshold
//! or was embedded by a different provider. Survivors are ordered by
//! descending score, ties broken by `(filename, page)`.

use std::cmp::Ordering;
use std::sync::Arc;

use crate::config::RetrievalConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::QueryError;
use crate::models::ScoredChunk;
use crate::retry::{with_retry, RetryPolicy};
use crate::store::VectorIndex;

#[derive(Clone)]
pub struct Retriever {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    retry: RetryPolicy,
}

impl Retriever {
    pub fn new(index: Arc<dyn VectorIndex>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Retriever {
            index,
            embedder,
            retry: RetryPolicy::query(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Evidence for `query`, possibly empty.
    pub async fn retrieve(
        &self,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<ScoredChunk>, QueryError> {
        let vector = with_retry(self.retry, "embed_query", || self.embedder.embed(query)).await?;
        let candidates = self
            .index
            .query(&vector, k)
            .await
            .map_err(QueryError::Storage)?;
        let total = candidates.len();

        let identity = self.embedder.identity();
        let mut foreign = 0usize;
        let mut kept: Vec<ScoredChunk> = candidates
            .into_iter()
            .filter(|c| {
                if c.chunk.embedding_model != identity {
                    foreign += 1;
                    return false;
                }
                c.score >= threshold
            })
            .collect();
        if foreign > 0 {
            tracing::warn!(
                foreign,
                identity = %identity,
                "skipped chunks embedded by another provider; run `lexrag check`"
            );
        }

        kept.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk.filename.cmp(&b.chunk.filename))
                .then_with(|| a.chunk.page.cmp(&b.chunk.page))
        });
        tracing::debug!(candidates = total, retained = kept.len(), threshold, "retrieved");
        Ok(kept)
    }

    /// [`retrieve`](Self::retrieve) with `top_k` and `score_threshold` from config.
    pub async fn retrieve_with(
        &self,
        query: &str,
        config: &RetrievalConfig,
    ) -> Result<Vec<ScoredChunk>, QueryError> {
        self.retrieve(query, config.top_k, config.score_threshold)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use crate::embedding::{DisabledProvider, HashingProvider};
    use crate::models::{Chunk, IndexPoint};
    use crate::store::memory::InMemoryStore;

    async fn seeded(texts: &[(&str, u32, &str)]) -> (Arc<InMemoryStore>, Arc<HashingProvider>) {
        let store = Arc::new(InMemoryStore::new());
        let embedder = Arc::new(HashingProvider::new(HashingProvider::DEFAULT_DIMS));
        let points: Vec<IndexPoint> = texts
            .iter()
            .map(|(filename, page, text)| IndexPoint {
                chunk: Chunk {
                    id: chunk_id(filename, *page, 0),
                    source_hash: filename.to_string(),
                    filename: filename.to_string(),
                    page: *page,
                    ordinal: 0,
                    text: text.to_string(),
                    section: None,
                    embedding_model: embedder.identity(),
                },
                vector: embedder.vectorize(text),
            })
            .collect();
        store.upsert(&points).await.unwrap();
        (store, embedder)
    }

    #[tokio::test]
    async fn test_threshold_filters_candidates() {
        let (store, embedder) = seeded(&[
            ("terms.txt", 1, "Late delivery penalty is 0.1% per day."),
            ("menu.txt", 1, "Soup of the day and fresh bread."),
        ])
        .await;
        let r = Retriever::new(store, embedder);

        let hits = r.retrieve("late delivery penalty", 5, 0.25).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk.filename, "terms.txt");
        assert!(hits.iter().all(|h| h.score >= 0.25));

        let all = r.retrieve("late delivery penalty", 5, -1.0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all[0].score >= all[1].score);
    }

    #[tokio::test]
    async fn test_ties_ordered_by_filename_then_page() {
        let text = "Force majeure excuses performance.";
        let (store, embedder) = seeded(&[("b.txt", 1, text), ("a.txt", 2, text), ("a.txt", 1, text)]).await;
        let r = Retriever::new(store, embedder);
        let hits = r.retrieve("force majeure", 5, 0.0).await.unwrap();
        let order: Vec<(String, u32)> = hits
            .iter()
            .map(|h| (h.chunk.filename.clone(), h.chunk.page))
            .collect();
        assert_eq!(
            order,
            vec![("a.txt".into(), 1), ("a.txt".into(), 2), ("b.txt".into(), 1)]
        );
    }

    #[tokio::test]
    async fn test_foreign_identity_is_skipped() {
        let (store, embedder) = seeded(&[("terms.txt", 1, "Late delivery penalty.")]).await;
        let mut p = store.get_chunk(&chunk_id("terms.txt", 1, 0)).await.unwrap().unwrap();
        p.embedding_model = "openai:text-embedding-3-small".into();
        store
            .upsert(&[IndexPoint {
                vector: embedder.vectorize(&p.text),
                chunk: p,
            }])
            .await
            .unwrap();
        let r = Retriever::new(store, embedder);
        assert!(r.retrieve("late delivery penalty", 5, 0.0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedder_failure_is_unavailable() {
        let store = Arc::new(InMemoryStore::new());
        let r = Retriever::new(store, Arc::new(DisabledProvider)).with_retry_policy(RetryPolicy::none());
        let err = r.retrieve("anything", 5, 0.25).await.unwrap_err();
        assert!(matches!(err, QueryError::Unavailable(_)));
    }
}
