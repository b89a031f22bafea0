//! Storage capabilities behind the pipelines.
//!
//! Two traits split the persisted state the way ownership is split:
//!
//! | Trait | Owns | Written by |
//! |-------|------|------------|
//! | [`VectorIndex`] | chunk payloads and their vectors | ingestion only |
//! | [`DocumentRepository`] | `SourceDocument` records and status | ingestion only |
//!
//! The query path only reads. Both backends implement both traits:
//! [`memory::InMemoryStore`] for tests and embedding in other programs,
//! [`sqlite::SqliteStore`] for the CLI and server.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;
pub mod sqlite;

use anyhow::Result;
use async_trait::async_trait;
use std::cmp::Ordering;

use crate::models::{Chunk, DocumentStatus, IndexPoint, ScoredChunk, SourceDocument};

/// Vector storage and nearest-neighbour lookup.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorIndex::upsert) | Insert or overwrite points by chunk id |
/// | [`replace_source`](VectorIndex::replace_source) | Atomically swap all points of one source |
/// | [`query`](VectorIndex::query) | Top-`k` chunks by cosine similarity |
/// | [`delete_source`](VectorIndex::delete_source) | Retire every chunk of one source |
/// | [`get_chunk`](VectorIndex::get_chunk) | Chunk payload by id |
/// | [`chunks_at`](VectorIndex::chunks_at) | Chunks of one (filename, page) |
/// | [`stale_sources`](VectorIndex::stale_sources) | Sources embedded under another identity |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or overwrite points. Chunk ids are deterministic, so writing
    /// the same content twice leaves one copy.
    async fn upsert(&self, points: &[IndexPoint]) -> Result<()>;

    /// Remove every point of `source_hash` and write `points` in its place.
    /// Readers see either the old set or the new set, never a mix.
    async fn replace_source(&self, source_hash: &str, points: &[IndexPoint]) -> Result<()>;

    /// Up to `k` chunks ordered by descending similarity to `vector`.
    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Delete all points of a source; returns how many were removed.
    async fn delete_source(&self, source_hash: &str) -> Result<usize>;

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    /// Chunks of `filename` on `page`, in ordinal order.
    async fn chunks_at(&self, filename: &str, page: u32) -> Result<Vec<Chunk>>;

    async fn count(&self) -> Result<usize>;

    /// Source hashes with at least one chunk embedded under an identity
    /// other than `identity`.
    async fn stale_sources(&self, identity: &str) -> Result<Vec<String>>;
}

/// `SourceDocument` records keyed by content hash.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    async fn get(&self, content_hash: &str) -> Result<Option<SourceDocument>>;

    /// Insert `doc` unless a record with its hash exists. Returns the stored
    /// record either way; an existing record is never downgraded.
    async fn register(&self, doc: &SourceDocument) -> Result<SourceDocument>;

    /// Move a document to `status`, recording `error` for `failed`.
    async fn set_status(
        &self,
        content_hash: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()>;

    /// Move a document to `indexed` with its chunk count and embedding identity.
    async fn mark_indexed(
        &self,
        content_hash: &str,
        chunk_count: usize,
        embedding_model: &str,
    ) -> Result<()>;

    /// All documents, newest upload first.
    async fn list(&self) -> Result<Vec<SourceDocument>>;

    /// Hashes of other settled (`indexed` or `failed`) documents uploaded
    /// under `filename`. Uploads still `pending` or `processing` are left
    /// to finish.
    async fn superseded(&self, filename: &str, current_hash: &str) -> Result<Vec<String>>;

    async fn remove(&self, content_hash: &str) -> Result<()>;
}

/// Descending score, then chunk id for a stable order among equal scores.
pub(crate) fn rank(scored: &mut Vec<ScoredChunk>, k: usize) {
    scored.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
    scored.truncate(k);
}
