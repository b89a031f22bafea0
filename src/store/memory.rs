//! In-memory [`VectorIndex`] and [`DocumentRepository`].
//!
//! `HashMap`s behind `std::sync::RwLock`. Vector search is brute-force
//! cosine similarity over every stored point.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{bail, Result};
use async_trait::async_trait;

use super::{rank, DocumentRepository, VectorIndex};
use crate::embedding::cosine_similarity;
use crate::models::{Chunk, DocumentStatus, IndexPoint, ScoredChunk, SourceDocument};

/// In-memory store for tests and single-process use.
#[derive(Default)]
pub struct InMemoryStore {
    documents: RwLock<HashMap<String, SourceDocument>>,
    points: RwLock<HashMap<String, IndexPoint>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl VectorIndex for InMemoryStore {
    async fn upsert(&self, points: &[IndexPoint]) -> Result<()> {
        let mut stored = write(&self.points);
        for p in points {
            stored.insert(p.chunk.id.clone(), p.clone());
        }
        Ok(())
    }

    async fn replace_source(&self, source_hash: &str, points: &[IndexPoint]) -> Result<()> {
        let mut stored = write(&self.points);
        stored.retain(|_, p| p.chunk.source_hash != source_hash);
        for p in points {
            stored.insert(p.chunk.id.clone(), p.clone());
        }
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let stored = read(&self.points);
        let mut scored: Vec<ScoredChunk> = stored
            .values()
            .map(|p| ScoredChunk {
                chunk: p.chunk.clone(),
                score: cosine_similarity(vector, &p.vector),
            })
            .collect();
        rank(&mut scored, k);
        Ok(scored)
    }

    async fn delete_source(&self, source_hash: &str) -> Result<usize> {
        let mut stored = write(&self.points);
        let before = stored.len();
        stored.retain(|_, p| p.chunk.source_hash != source_hash);
        Ok(before - stored.len())
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        Ok(read(&self.points).get(chunk_id).map(|p| p.chunk.clone()))
    }

    async fn chunks_at(&self, filename: &str, page: u32) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = read(&self.points)
            .values()
            .filter(|p| p.chunk.filename == filename && p.chunk.page == page)
            .map(|p| p.chunk.clone())
            .collect();
        chunks.sort_by(|a, b| (a.ordinal, &a.id).cmp(&(b.ordinal, &b.id)));
        Ok(chunks)
    }

    async fn count(&self) -> Result<usize> {
        Ok(read(&self.points).len())
    }

    async fn stale_sources(&self, identity: &str) -> Result<Vec<String>> {
        let mut hashes: Vec<String> = read(&self.points)
            .values()
            .filter(|p| p.chunk.embedding_model != identity)
            .map(|p| p.chunk.source_hash.clone())
            .collect();
        hashes.sort();
        hashes.dedup();
        Ok(hashes)
    }
}

#[async_trait]
impl DocumentRepository for InMemoryStore {
    async fn get(&self, content_hash: &str) -> Result<Option<SourceDocument>> {
        Ok(read(&self.documents).get(content_hash).cloned())
    }

    async fn register(&self, doc: &SourceDocument) -> Result<SourceDocument> {
        let mut docs = write(&self.documents);
        let stored = docs
            .entry(doc.content_hash.clone())
            .or_insert_with(|| doc.clone());
        Ok(stored.clone())
    }

    async fn set_status(
        &self,
        content_hash: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut docs = write(&self.documents);
        let Some(doc) = docs.get_mut(content_hash) else {
            bail!("unknown document: {}", content_hash);
        };
        doc.status = status;
        doc.error = error.map(str::to_string);
        if status != DocumentStatus::Indexed {
            doc.chunk_count = 0;
        }
        Ok(())
    }

    async fn mark_indexed(
        &self,
        content_hash: &str,
        chunk_count: usize,
        embedding_model: &str,
    ) -> Result<()> {
        let mut docs = write(&self.documents);
        let Some(doc) = docs.get_mut(content_hash) else {
            bail!("unknown document: {}", content_hash);
        };
        doc.status = DocumentStatus::Indexed;
        doc.error = None;
        doc.chunk_count = chunk_count;
        doc.embedding_model = Some(embedding_model.to_string());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SourceDocument>> {
        let mut docs: Vec<SourceDocument> = read(&self.documents).values().cloned().collect();
        docs.sort_by(|a, b| {
            b.uploaded_at
                .cmp(&a.uploaded_at)
                .then_with(|| a.filename.cmp(&b.filename))
        });
        Ok(docs)
    }

    async fn superseded(&self, filename: &str, current_hash: &str) -> Result<Vec<String>> {
        let mut hashes: Vec<String> = read(&self.documents)
            .values()
            .filter(|d| {
                d.filename == filename
                    && d.content_hash != current_hash
                    && matches!(d.status, DocumentStatus::Indexed | DocumentStatus::Failed)
            })
            .map(|d| d.content_hash.clone())
            .collect();
        hashes.sort();
        Ok(hashes)
    }

    async fn remove(&self, content_hash: &str) -> Result<()> {
        write(&self.documents).remove(content_hash);
        Ok(())
    }
}
