//! SQLite-backed [`VectorIndex`] and [`DocumentRepository`].
//!
//! Vectors are stored as little-endian `f32` BLOBs next to the chunk payload
//! and searched brute-force. Source replacement runs in one transaction.

use std::cmp::Ordering;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{DocumentRepository, VectorIndex};
use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::migrate;
use crate::models::{Chunk, DocumentStatus, IndexPoint, ScoredChunk, SourceDocument};

const CHUNK_COLUMNS: &str =
    "id, source_hash, filename, page, ordinal, text, section, embedding_model";

const DOCUMENT_COLUMNS: &str = "content_hash, filename, format, archive_source, uploaded_at, \
     status, error, chunk_count, embedding_model";

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and bring the schema up to date.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn row_to_chunk(row: &SqliteRow) -> Chunk {
    let page: i64 = row.get("page");
    let ordinal: i64 = row.get("ordinal");
    Chunk {
        id: row.get("id"),
        source_hash: row.get("source_hash"),
        filename: row.get("filename"),
        page: page as u32,
        ordinal: ordinal as u32,
        text: row.get("text"),
        section: row.get("section"),
        embedding_model: row.get("embedding_model"),
    }
}

fn row_to_document(row: &SqliteRow) -> Result<SourceDocument> {
    let uploaded_at: i64 = row.get("uploaded_at");
    let status: String = row.get("status");
    let chunk_count: i64 = row.get("chunk_count");
    Ok(SourceDocument {
        content_hash: row.get("content_hash"),
        filename: row.get("filename"),
        format: row.get("format"),
        archive_source: row.get("archive_source"),
        uploaded_at: DateTime::from_timestamp_millis(uploaded_at).unwrap_or_default(),
        status: status.parse()?,
        error: row.get("error"),
        chunk_count: chunk_count as usize,
        embedding_model: row.get("embedding_model"),
    })
}

async fn insert_point<'c, E>(executor: E, point: &IndexPoint) -> Result<()>
where
    E: sqlx::Executor<'c, Database = sqlx::Sqlite>,
{
    let c = &point.chunk;
    sqlx::query(
        r#"
        INSERT INTO chunks (id, source_hash, filename, page, ordinal, text, section,
                            embedding_model, dims, embedding)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            source_hash = excluded.source_hash,
            filename = excluded.filename,
            page = excluded.page,
            ordinal = excluded.ordinal,
            text = excluded.text,
            section = excluded.section,
            embedding_model = excluded.embedding_model,
            dims = excluded.dims,
            embedding = excluded.embedding
        "#,
    )
    .bind(&c.id)
    .bind(&c.source_hash)
    .bind(&c.filename)
    .bind(c.page as i64)
    .bind(c.ordinal as i64)
    .bind(&c.text)
    .bind(&c.section)
    .bind(&c.embedding_model)
    .bind(point.vector.len() as i64)
    .bind(vec_to_blob(&point.vector))
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl VectorIndex for SqliteStore {
    async fn upsert(&self, points: &[IndexPoint]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for p in points {
            insert_point(&mut *tx, p).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_source(&self, source_hash: &str, points: &[IndexPoint]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunks WHERE source_hash = ?")
            .bind(source_hash)
            .execute(&mut *tx)
            .await?;
        for p in points {
            insert_point(&mut *tx, p).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(&self, vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let rows = sqlx::query("SELECT id, embedding FROM chunks")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(String, f32)> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(vector, &blob_to_vec(&blob));
                (row.get("id"), score)
            })
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(k);

        let mut results = Vec::with_capacity(scored.len());
        for (id, score) in scored {
            // A concurrent replace may have removed the row since the scan.
            if let Some(chunk) = self.get_chunk(&id).await? {
                results.push(ScoredChunk { chunk, score });
            }
        }
        Ok(results)
    }

    async fn delete_source(&self, source_hash: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE source_hash = ?")
            .bind(source_hash)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query(&format!("SELECT {} FROM chunks WHERE id = ?", CHUNK_COLUMNS))
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.as_ref().map(row_to_chunk))
    }

    async fn chunks_at(&self, filename: &str, page: u32) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM chunks WHERE filename = ? AND page = ? ORDER BY ordinal ASC, id ASC",
            CHUNK_COLUMNS
        ))
        .bind(filename)
        .bind(page as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(row_to_chunk).collect())
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn stale_sources(&self, identity: &str) -> Result<Vec<String>> {
        let hashes: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT source_hash FROM chunks WHERE embedding_model != ? ORDER BY source_hash",
        )
        .bind(identity)
        .fetch_all(&self.pool)
        .await?;
        Ok(hashes)
    }
}

#[async_trait]
impl DocumentRepository for SqliteStore {
    async fn get(&self, content_hash: &str) -> Result<Option<SourceDocument>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM source_documents WHERE content_hash = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn register(&self, doc: &SourceDocument) -> Result<SourceDocument> {
        sqlx::query(
            r#"
            INSERT INTO source_documents (content_hash, filename, format, archive_source,
                                          uploaded_at, status, error, chunk_count, embedding_model)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(content_hash) DO NOTHING
            "#,
        )
        .bind(&doc.content_hash)
        .bind(&doc.filename)
        .bind(&doc.format)
        .bind(&doc.archive_source)
        .bind(doc.uploaded_at.timestamp_millis())
        .bind(doc.status.as_str())
        .bind(&doc.error)
        .bind(doc.chunk_count as i64)
        .bind(&doc.embedding_model)
        .execute(&self.pool)
        .await?;

        match self.get(&doc.content_hash).await? {
            Some(stored) => Ok(stored),
            None => bail!("document {} vanished after insert", doc.content_hash),
        }
    }

    async fn set_status(
        &self,
        content_hash: &str,
        status: DocumentStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE source_documents
            SET status = ?, error = ?,
                chunk_count = CASE WHEN ? = 'indexed' THEN chunk_count ELSE 0 END
            WHERE content_hash = ?
            "#,
        )
        .bind(status.as_str())
        .bind(error)
        .bind(status.as_str())
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("unknown document: {}", content_hash);
        }
        Ok(())
    }

    async fn mark_indexed(
        &self,
        content_hash: &str,
        chunk_count: usize,
        embedding_model: &str,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE source_documents
            SET status = 'indexed', error = NULL, chunk_count = ?, embedding_model = ?
            WHERE content_hash = ?
            "#,
        )
        .bind(chunk_count as i64)
        .bind(embedding_model)
        .bind(content_hash)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            bail!("unknown document: {}", content_hash);
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SourceDocument>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM source_documents ORDER BY uploaded_at DESC, filename ASC",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_document).collect()
    }

    async fn superseded(&self, filename: &str, current_hash: &str) -> Result<Vec<String>> {
        let hashes: Vec<String> = sqlx::query_scalar(
            "SELECT content_hash FROM source_documents \
             WHERE filename = ? AND content_hash != ? AND status IN ('indexed', 'failed') \
             ORDER BY content_hash",
        )
        .bind(filename)
        .bind(current_hash)
        .fetch_all(&self.pool)
        .await?;
        Ok(hashes)
    }

    async fn remove(&self, content_hash: &str) -> Result<()> {
        sqlx::query("DELETE FROM source_documents WHERE content_hash = ?")
            .bind(content_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
