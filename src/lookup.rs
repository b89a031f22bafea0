//! Source lookup: the stored text behind a citation.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::models::Chunk;
use crate::store::VectorIndex;

/// Either a chunk id or a (filename, page) pair.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum SourceRef {
    Chunk { chunk_id: String },
    Page { filename: String, page: u32 },
}

/// Stored passage text for a reference.
#[derive(Debug, Clone, Serialize)]
pub struct SourcePassage {
    pub filename: String,
    pub page: u32,
    /// Chunks of the page in ordinal order.
    pub chunks: Vec<Chunk>,
    /// Chunk texts joined with blank lines.
    pub text: String,
}

impl SourcePassage {
    fn from_chunks(chunks: Vec<Chunk>) -> Option<Self> {
        let first = chunks.first()?;
        Some(SourcePassage {
            filename: first.filename.clone(),
            page: first.page,
            text: chunks
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
            chunks,
        })
    }
}

#[derive(Clone)]
pub struct SourceLookup {
    index: Arc<dyn VectorIndex>,
}

impl SourceLookup {
    pub fn new(index: Arc<dyn VectorIndex>) -> Self {
        SourceLookup { index }
    }

    pub async fn chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        self.index.get_chunk(chunk_id).await
    }

    pub async fn page(&self, filename: &str, page: u32) -> Result<Option<SourcePassage>> {
        let chunks = self.index.chunks_at(filename, page).await?;
        Ok(SourcePassage::from_chunks(chunks))
    }

    pub async fn resolve(&self, source: &SourceRef) -> Result<Option<SourcePassage>> {
        match source {
            SourceRef::Chunk { chunk_id } => Ok(self
                .chunk(chunk_id)
                .await?
                .and_then(|c| SourcePassage::from_chunks(vec![c]))),
            SourceRef::Page { filename, page } => self.page(filename, *page).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::chunk_id;
    use crate::models::IndexPoint;
    use crate::store::memory::InMemoryStore;

    fn point(page: u32, ordinal: u32, text: &str) -> IndexPoint {
        IndexPoint {
            chunk: Chunk {
                id: chunk_id("h1", page, ordinal),
                source_hash: "h1".into(),
                filename: "lease.pdf".into(),
                page,
                ordinal,
                text: text.into(),
                section: None,
                embedding_model: "hashing:sha256-bow".into(),
            },
            vector: vec![1.0],
        }
    }

    #[tokio::test]
    async fn test_resolve_by_page_and_chunk() {
        let store = Arc::new(InMemoryStore::new());
        store
            .upsert(&[point(2, 1, "second part"), point(2, 0, "first part")])
            .await
            .unwrap();
        let lookup = SourceLookup::new(store);

        let page = lookup
            .resolve(&SourceRef::Page {
                filename: "lease.pdf".into(),
                page: 2,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.text, "first part\n\nsecond part");

        let one = lookup
            .resolve(&SourceRef::Chunk {
                chunk_id: chunk_id("h1", 2, 1),
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!((one.filename.as_str(), one.page), ("lease.pdf", 2));
        assert_eq!(one.text, "second part");

        assert!(lookup.page("lease.pdf", 9).await.unwrap().is_none());
    }
}
