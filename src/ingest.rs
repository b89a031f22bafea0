//! Ingestion pipeline orchestration.
//!
//! Per document, strictly in order:
//!
//! 1. register by content hash; a hash already indexed with the current
//!    embedding identity short-circuits
//! 2. mark `processing`
//! 3. extract pages and chunk them (blocking pool)
//! 4. batch-embed, retrying transient provider failures with backoff
//! 5. swap the document's chunks into the index in one write
//! 6. mark `indexed` and retire chunks of older uploads with the same filename
//!
//! Any failure after step 2 removes whatever the document had in the index
//! and marks it `failed`. A task dropped mid-way leaves `processing`, which
//! the next attempt redoes.
//!
//! Documents run concurrently up to `ingest.max_concurrency`. The same
//! content hash never runs twice at once, and neither do two uploads under
//! the same filename, so retiring superseded uploads never races a write.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::chunk::{chunk_id, chunk_pages, ChunkParams};
use crate::config::Config;
use crate::embedding::{check_batch, EmbeddingProvider};
use crate::error::{IngestError, LoadError};
use crate::loader::{Expansion, Loader, LoaderLimits, SkippedEntry, SourceFile};
use crate::models::{Chunk, DocumentStatus, IndexPoint, SourceDocument};
use crate::retry::{with_retry, RetryPolicy};
use crate::store::{DocumentRepository, VectorIndex};

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IngestOutcome {
    Indexed { chunks: usize },
    AlreadyIndexed { chunks: usize },
    Failed { reason: String },
}

impl IngestOutcome {
    pub fn status(&self) -> DocumentStatus {
        match self {
            IngestOutcome::Indexed { .. } | IngestOutcome::AlreadyIndexed { .. } => {
                DocumentStatus::Indexed
            }
            IngestOutcome::Failed { .. } => DocumentStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub content_hash: String,
    pub filename: String,
    #[serde(flatten)]
    pub outcome: IngestOutcome,
}

/// Reports for every collected file plus the container entries left out.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    pub files: Vec<IngestReport>,
    pub skipped: Vec<SkippedEntry>,
}

impl BatchReport {
    pub fn count(&self, status: DocumentStatus) -> usize {
        self.files
            .iter()
            .filter(|r| r.outcome.status() == status)
            .count()
    }
}

/// Returned by [`IngestionPipeline::submit`]; poll with the content hash.
#[derive(Debug, Clone, Serialize)]
pub struct IngestTicket {
    pub content_hash: String,
    pub filename: String,
    pub status: DocumentStatus,
}

#[derive(Debug, Default, Serialize)]
pub struct Submission {
    pub tickets: Vec<IngestTicket>,
    pub skipped: Vec<SkippedEntry>,
}

/// One async mutex per key (content hash or filename) currently in use.
#[derive(Clone, Default)]
struct KeyedLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyedLocks {
    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut map = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        map.retain(|_, m| Arc::strong_count(m) > 1);
        map.entry(key.to_string()).or_default().clone()
    }
}

#[derive(Clone)]
pub struct IngestionPipeline {
    index: Arc<dyn VectorIndex>,
    documents: Arc<dyn DocumentRepository>,
    embedder: Arc<dyn EmbeddingProvider>,
    loader: Loader,
    chunking: ChunkParams,
    batch_size: usize,
    retry: RetryPolicy,
    hash_locks: KeyedLocks,
    name_locks: KeyedLocks,
    permits: Arc<Semaphore>,
}

impl IngestionPipeline {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        documents: Arc<dyn DocumentRepository>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: &Config,
    ) -> Self {
        IngestionPipeline {
            index,
            documents,
            embedder,
            loader: Loader::new(LoaderLimits::from(&config.ingest)),
            chunking: ChunkParams::from(&config.chunking),
            batch_size: config.embedding.batch_size.max(1),
            retry: RetryPolicy::ingestion(config.embedding.max_retries),
            hash_locks: KeyedLocks::default(),
            name_locks: KeyedLocks::default(),
            permits: Arc::new(Semaphore::new(config.ingest.max_concurrency.max(1))),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// Ingest one file. Never fails as a whole: problems are reported in
    /// the outcome and recorded on the document.
    pub async fn ingest(&self, file: SourceFile) -> IngestReport {
        // Always hash first, then filename.
        let hash_lock = self.hash_locks.lock_for(&file.content_hash);
        let _hash_guard = hash_lock.lock().await;
        let name_lock = self.name_locks.lock_for(&file.filename);
        let _name_guard = name_lock.lock().await;
        let _permit = self.permits.acquire().await.ok();

        let file = Arc::new(file);
        let outcome = match self.ingest_locked(&file).await {
            Ok(outcome) => outcome,
            Err(err) => {
                let reason = format!("{:#}", err);
                tracing::error!(
                    content_hash = %file.content_hash,
                    filename = %file.filename,
                    error = %reason,
                    "ingestion aborted by storage error"
                );
                if let Err(e) = self.index.delete_source(&file.content_hash).await {
                    tracing::warn!(content_hash = %file.content_hash, error = %e, "could not remove chunks of failed upload");
                }
                if let Err(e) = self
                    .documents
                    .set_status(&file.content_hash, DocumentStatus::Failed, Some(&reason))
                    .await
                {
                    tracing::warn!(content_hash = %file.content_hash, error = %e, "could not record failure");
                }
                IngestOutcome::Failed { reason }
            }
        };

        IngestReport {
            content_hash: file.content_hash.clone(),
            filename: file.filename.clone(),
            outcome,
        }
    }

    async fn ingest_locked(&self, file: &Arc<SourceFile>) -> Result<IngestOutcome> {
        let hash = file.content_hash.as_str();
        let pending = SourceDocument::pending(
            hash,
            &file.filename,
            file.format_str(),
            file.archive_source.as_deref(),
        );
        let existing = self.documents.register(&pending).await?;
        let identity = self.embedder.identity();
        if existing.status == DocumentStatus::Indexed
            && existing.embedding_model.as_deref() == Some(identity.as_str())
        {
            tracing::info!(
                content_hash = hash,
                filename = %file.filename,
                chunks = existing.chunk_count,
                "already indexed"
            );
            return Ok(IngestOutcome::AlreadyIndexed {
                chunks: existing.chunk_count,
            });
        }

        self.documents
            .set_status(hash, DocumentStatus::Processing, None)
            .await?;
        tracing::info!(content_hash = hash, filename = %file.filename, "processing");

        match self.build_and_write(file).await {
            Ok(count) => {
                self.documents.mark_indexed(hash, count, &identity).await?;
                tracing::info!(content_hash = hash, filename = %file.filename, chunks = count, "indexed");
                self.retire_superseded(file).await;
                Ok(IngestOutcome::Indexed { chunks: count })
            }
            Err(err) => {
                let reason = err.to_string();
                self.index.delete_source(hash).await?;
                self.documents
                    .set_status(hash, DocumentStatus::Failed, Some(&reason))
                    .await?;
                tracing::warn!(content_hash = hash, filename = %file.filename, error = %reason, "failed");
                Ok(IngestOutcome::Failed { reason })
            }
        }
    }

    async fn build_and_write(&self, file: &Arc<SourceFile>) -> Result<usize, IngestError> {
        let task_file = Arc::clone(file);
        let params = self.chunking;
        let drafts = tokio::task::spawn_blocking(move || -> Result<_, LoadError> {
            Ok(chunk_pages(task_file.pages()?, params))
        })
        .await
        .map_err(|e| IngestError::Aborted(e.to_string()))??;
        if drafts.is_empty() {
            return Err(LoadError::NoText.into());
        }
        tracing::debug!(content_hash = %file.content_hash, chunks = drafts.len(), "chunked");

        let identity = self.embedder.identity();
        let mut points = Vec::with_capacity(drafts.len());
        for batch in drafts.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
            let vectors = with_retry(self.retry, "embed_batch", || {
                self.embedder.embed_batch(&texts)
            })
            .await?;
            check_batch(
                self.embedder.provider_name(),
                texts.len(),
                self.embedder.dims(),
                &vectors,
            )?;

            for (draft, vector) in batch.iter().zip(vectors) {
                points.push(IndexPoint {
                    chunk: Chunk {
                        id: chunk_id(&file.content_hash, draft.page, draft.ordinal),
                        source_hash: file.content_hash.clone(),
                        filename: file.filename.clone(),
                        page: draft.page,
                        ordinal: draft.ordinal,
                        text: draft.text.clone(),
                        section: draft.section.clone(),
                        embedding_model: identity.clone(),
                    },
                    vector,
                });
            }
        }

        self.index
            .replace_source(&file.content_hash, &points)
            .await
            .map_err(IngestError::Index)?;
        Ok(points.len())
    }

    /// Drop chunks and records of earlier uploads sharing this filename.
    async fn retire_superseded(&self, file: &SourceFile) {
        let old = match self
            .documents
            .superseded(&file.filename, &file.content_hash)
            .await
        {
            Ok(hashes) => hashes,
            Err(e) => {
                tracing::warn!(filename = %file.filename, error = %e, "could not list superseded uploads");
                return;
            }
        };
        for hash in old {
            match self.index.delete_source(&hash).await {
                Ok(removed) => {
                    tracing::info!(content_hash = %hash, filename = %file.filename, removed, "retired superseded upload");
                }
                Err(e) => {
                    tracing::warn!(content_hash = %hash, error = %e, "could not retire chunks");
                    continue;
                }
            }
            if let Err(e) = self.documents.remove(&hash).await {
                tracing::warn!(content_hash = %hash, error = %e, "could not remove superseded record");
            }
        }
    }

    /// Ingest files concurrently. Reports come back in input order; one
    /// file's failure never affects another.
    pub async fn ingest_batch(&self, files: Vec<SourceFile>) -> Vec<IngestReport> {
        let labels: Vec<(String, String)> = files
            .iter()
            .map(|f| (f.content_hash.clone(), f.filename.clone()))
            .collect();

        let mut set = JoinSet::new();
        for (i, file) in files.into_iter().enumerate() {
            let pipeline = self.clone();
            set.spawn(async move { (i, pipeline.ingest(file).await) });
        }

        let mut slots: Vec<Option<IngestReport>> = vec![None; labels.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((i, report)) => slots[i] = Some(report),
                Err(e) => tracing::error!(error = %e, "ingestion task panicked"),
            }
        }

        slots
            .into_iter()
            .zip(labels)
            .map(|(slot, (content_hash, filename))| {
                slot.unwrap_or(IngestReport {
                    content_hash,
                    filename,
                    outcome: IngestOutcome::Failed {
                        reason: "ingestion task aborted".to_string(),
                    },
                })
            })
            .collect()
    }

    /// Expand uploaded bytes (file or ZIP archive) and ingest everything.
    pub async fn ingest_bytes(&self, filename: &str, bytes: Vec<u8>) -> Result<BatchReport> {
        let expansion = self.expand_bytes(filename, bytes).await?;
        Ok(BatchReport {
            files: self.ingest_batch(expansion.files).await,
            skipped: expansion.skipped,
        })
    }

    /// Expand a file or directory on disk and ingest everything.
    pub async fn ingest_path(&self, path: &Path) -> Result<BatchReport> {
        let loader = self.loader.clone();
        let path: PathBuf = path.to_path_buf();
        let expansion = tokio::task::spawn_blocking(move || loader.expand_path(&path)).await??;
        for s in &expansion.skipped {
            tracing::info!(entry = %s.name, reason = %s.reason, "skipped");
        }
        Ok(BatchReport {
            files: self.ingest_batch(expansion.files).await,
            skipped: expansion.skipped,
        })
    }

    /// Register every file as `pending` and ingest in the background.
    ///
    /// Returns immediately with one ticket per file; poll [`status`](Self::status).
    pub async fn submit(&self, filename: &str, bytes: Vec<u8>) -> Result<Submission> {
        let expansion = self.expand_bytes(filename, bytes).await?;

        let mut tickets = Vec::with_capacity(expansion.files.len());
        for file in &expansion.files {
            let stored = self
                .documents
                .register(&SourceDocument::pending(
                    &file.content_hash,
                    &file.filename,
                    file.format_str(),
                    file.archive_source.as_deref(),
                ))
                .await?;
            tickets.push(IngestTicket {
                content_hash: stored.content_hash,
                filename: file.filename.clone(),
                status: stored.status,
            });
        }

        let pipeline = self.clone();
        let files = expansion.files;
        tokio::spawn(async move {
            let reports = pipeline.ingest_batch(files).await;
            tracing::debug!(files = reports.len(), "background ingestion finished");
        });

        Ok(Submission {
            tickets,
            skipped: expansion.skipped,
        })
    }

    pub async fn status(&self, content_hash: &str) -> Result<Option<SourceDocument>> {
        self.documents.get(content_hash).await
    }

    pub async fn documents(&self) -> Result<Vec<SourceDocument>> {
        self.documents.list().await
    }

    /// Sources whose chunks were embedded by a different provider or model
    /// than the one configured now.
    pub async fn stale_sources(&self) -> Result<Vec<String>> {
        self.index.stale_sources(&self.embedder.identity()).await
    }

    async fn expand_bytes(&self, filename: &str, bytes: Vec<u8>) -> Result<Expansion> {
        let loader = self.loader.clone();
        let filename = filename.to_string();
        let expansion =
            tokio::task::spawn_blocking(move || loader.expand_bytes(&filename, bytes)).await?;
        Ok(expansion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use crate::error::ProviderError;
    use crate::extract::tests::build_zip;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn pipeline_with(
        store: Arc<InMemoryStore>,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> IngestionPipeline {
        let mut config = Config::with_db_path("unused.sqlite");
        config.chunking.chunk_size = 200;
        config.chunking.chunk_overlap = 40;
        config.embedding.batch_size = 2;
        IngestionPipeline::new(store.clone(), store, embedder, &config).with_retry_policy(
            RetryPolicy {
                max_retries: 2,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(1),
            },
        )
    }

    fn pipeline(store: Arc<InMemoryStore>) -> IngestionPipeline {
        pipeline_with(store, Arc::new(HashingProvider::new(64)))
    }

    /// Fails every call after the first `ok_calls`, with the given error.
    struct FlakyEmbedder {
        inner: HashingProvider,
        calls: AtomicUsize,
        fail_from: usize,
        fail_until: usize,
        status: u16,
    }

    impl FlakyEmbedder {
        fn new(fail_from: usize, fail_until: usize, status: u16) -> Self {
            FlakyEmbedder {
                inner: HashingProvider::new(64),
                calls: AtomicUsize::new(0),
                fail_from,
                fail_until,
                status,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyEmbedder {
        fn provider_name(&self) -> &str {
            "hashing"
        }
        fn model_name(&self) -> &str {
            "sha256-bow"
        }
        fn dims(&self) -> usize {
            64
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.fail_from && n < self.fail_until {
                return Err(ProviderError::Http {
                    provider: "flaky".into(),
                    status: self.status,
                    body: String::new(),
                });
            }
            self.inner.embed_batch(texts).await
        }
    }

    fn long_text(paragraphs: usize) -> String {
        (0..paragraphs)
            .map(|i| format!("Paragraph {} sets out the supplier obligations in detail.", i))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[tokio::test]
    async fn test_ingest_then_reingest_is_idempotent() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        let bytes = b"Late delivery penalty is 0.1% per day (Article 5.2).".to_vec();

        let first = p.ingest(SourceFile::from_bytes("terms.txt", bytes.clone())).await;
        assert_eq!(first.outcome, IngestOutcome::Indexed { chunks: 1 });
        let second = p.ingest(SourceFile::from_bytes("terms.txt", bytes)).await;
        assert_eq!(second.outcome, IngestOutcome::AlreadyIndexed { chunks: 1 });

        assert_eq!(store.count().await.unwrap(), 1);
        let docs = store.list().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status, DocumentStatus::Indexed);
        assert_eq!(docs[0].embedding_model.as_deref(), Some("hashing:sha256-bow"));
    }

    #[tokio::test]
    async fn test_chunks_carry_page_and_identity() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        let report = p
            .ingest(SourceFile::from_bytes("long.md", long_text(12).into_bytes()))
            .await;
        let IngestOutcome::Indexed { chunks } = report.outcome else {
            panic!("expected indexed, got {:?}", report.outcome);
        };
        assert!(chunks > 1);
        let at = store.chunks_at("long.md", 1).await.unwrap();
        assert_eq!(at.len(), chunks);
        for (i, c) in at.iter().enumerate() {
            assert_eq!(c.ordinal as usize, i);
            assert_eq!(c.id, chunk_id(&report.content_hash, 1, i as u32));
            assert_eq!(c.embedding_model, "hashing:sha256-bow");
        }
    }

    #[tokio::test]
    async fn test_corrupt_file_fails_alone() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        let files = vec![
            SourceFile::from_bytes("a.txt", b"First valid contract text.".to_vec()),
            SourceFile::from_bytes("broken.pdf", b"%PDF-1.4 garbage".to_vec()),
            SourceFile::from_bytes("b.txt", b"Second valid contract text.".to_vec()),
        ];
        let reports = p.ingest_batch(files).await;
        let statuses: Vec<DocumentStatus> = reports.iter().map(|r| r.outcome.status()).collect();
        assert_eq!(
            statuses,
            vec![
                DocumentStatus::Indexed,
                DocumentStatus::Failed,
                DocumentStatus::Indexed
            ]
        );
        let broken = store.get(&reports[1].content_hash).await.unwrap().unwrap();
        assert_eq!(broken.status, DocumentStatus::Failed);
        assert!(broken.error.is_some());
    }

    #[tokio::test]
    async fn test_transient_embedding_errors_are_retried() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline_with(store.clone(), Arc::new(FlakyEmbedder::new(0, 2, 503)));
        let report = p
            .ingest(SourceFile::from_bytes("a.txt", b"Termination requires notice.".to_vec()))
            .await;
        assert_eq!(report.outcome, IngestOutcome::Indexed { chunks: 1 });
    }

    #[tokio::test]
    async fn test_failed_embedding_leaves_no_partial_chunks() {
        let store = Arc::new(InMemoryStore::new());
        // First batch succeeds, every later call is rejected.
        let p = pipeline_with(store.clone(), Arc::new(FlakyEmbedder::new(1, usize::MAX, 400)));
        let report = p
            .ingest(SourceFile::from_bytes("long.md", long_text(12).into_bytes()))
            .await;
        assert!(matches!(report.outcome, IngestOutcome::Failed { .. }));
        assert_eq!(store.count().await.unwrap(), 0);
        let doc = store.get(&report.content_hash).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
    }

    #[tokio::test]
    async fn test_new_version_retires_old_chunks() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        let v1 = p
            .ingest(SourceFile::from_bytes("lease.txt", b"Rent is 100 per month.".to_vec()))
            .await;
        let v2 = p
            .ingest(SourceFile::from_bytes("lease.txt", b"Rent is 120 per month.".to_vec()))
            .await;
        assert_eq!(v2.outcome.status(), DocumentStatus::Indexed);
        assert!(store.get(&v1.content_hash).await.unwrap().is_none());
        let at = store.chunks_at("lease.txt", 1).await.unwrap();
        assert_eq!(at.len(), 1);
        assert_eq!(at[0].source_hash, v2.content_hash);
    }

    #[tokio::test]
    async fn test_concurrent_same_hash_runs_once() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        let bytes = b"Confidentiality survives termination.".to_vec();
        let files = (0..4)
            .map(|_| SourceFile::from_bytes("nda.txt", bytes.clone()))
            .collect();
        let reports = p.ingest_batch(files).await;
        let indexed = reports
            .iter()
            .filter(|r| matches!(r.outcome, IngestOutcome::Indexed { .. }))
            .count();
        let skipped = reports
            .iter()
            .filter(|r| matches!(r.outcome, IngestOutcome::AlreadyIndexed { .. }))
            .count();
        assert_eq!((indexed, skipped), (1, 3));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    /// Holds back any batch mentioning `slow_word`.
    struct SlowOnWord {
        inner: HashingProvider,
        slow_word: &'static str,
        delay: Duration,
    }

    #[async_trait]
    impl EmbeddingProvider for SlowOnWord {
        fn provider_name(&self) -> &str {
            "hashing"
        }
        fn model_name(&self) -> &str {
            "sha256-bow"
        }
        fn dims(&self) -> usize {
            64
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            if texts.iter().any(|t| t.contains(self.slow_word)) {
                tokio::time::sleep(self.delay).await;
            }
            self.inner.embed_batch(texts).await
        }
    }

    #[tokio::test]
    async fn test_same_filename_uploads_leave_one_version() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline_with(
            store.clone(),
            Arc::new(SlowOnWord {
                inner: HashingProvider::new(64),
                slow_word: "100",
                delay: Duration::from_millis(300),
            }),
        );
        let reports = p
            .ingest_batch(vec![
                SourceFile::from_bytes("lease.txt", b"Rent is 100 per month.".to_vec()),
                SourceFile::from_bytes("lease.txt", b"Rent is 120 per month.".to_vec()),
            ])
            .await;
        assert!(reports
            .iter()
            .all(|r| r.outcome.status() == DocumentStatus::Indexed));

        let docs = store.list().await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].status, DocumentStatus::Indexed);
        assert_eq!(store.count().await.unwrap(), 1);
        let at = store.chunks_at("lease.txt", 1).await.unwrap();
        assert_eq!(at.len(), 1);
        assert_eq!(at[0].source_hash, docs[0].content_hash);
    }

    /// Delegates to the in-memory store but rejects `mark_indexed`.
    struct NoMarkRepository(Arc<InMemoryStore>);

    #[async_trait]
    impl DocumentRepository for NoMarkRepository {
        async fn get(&self, content_hash: &str) -> Result<Option<SourceDocument>> {
            self.0.get(content_hash).await
        }
        async fn register(&self, doc: &SourceDocument) -> Result<SourceDocument> {
            self.0.register(doc).await
        }
        async fn set_status(
            &self,
            content_hash: &str,
            status: DocumentStatus,
            error: Option<&str>,
        ) -> Result<()> {
            self.0.set_status(content_hash, status, error).await
        }
        async fn mark_indexed(&self, _: &str, _: usize, _: &str) -> Result<()> {
            anyhow::bail!("database is locked")
        }
        async fn list(&self) -> Result<Vec<SourceDocument>> {
            self.0.list().await
        }
        async fn superseded(&self, filename: &str, current_hash: &str) -> Result<Vec<String>> {
            self.0.superseded(filename, current_hash).await
        }
        async fn remove(&self, content_hash: &str) -> Result<()> {
            self.0.remove(content_hash).await
        }
    }

    #[tokio::test]
    async fn test_storage_error_after_write_removes_chunks() {
        let store = Arc::new(InMemoryStore::new());
        let p = IngestionPipeline::new(
            store.clone(),
            Arc::new(NoMarkRepository(store.clone())),
            Arc::new(HashingProvider::new(64)),
            &Config::with_db_path("unused.sqlite"),
        );
        let report = p
            .ingest(SourceFile::from_bytes("lease.txt", b"Rent is 100 per month.".to_vec()))
            .await;
        let IngestOutcome::Failed { reason } = &report.outcome else {
            panic!("expected failure, got {:?}", report.outcome);
        };
        assert!(reason.contains("database is locked"));
        assert_eq!(store.count().await.unwrap(), 0);
        let doc = store.get(&report.content_hash).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
    }

    /// Never returns.
    struct StalledEmbedder;

    #[async_trait]
    impl EmbeddingProvider for StalledEmbedder {
        fn provider_name(&self) -> &str {
            "hashing"
        }
        fn model_name(&self) -> &str {
            "sha256-bow"
        }
        fn dims(&self) -> usize {
            64
        }
        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_abandoned_ingestion_is_redone() {
        let store = Arc::new(InMemoryStore::new());
        let bytes = b"Notice must be given in writing.".to_vec();
        let file = SourceFile::from_bytes("notice.txt", bytes.clone());
        let hash = file.content_hash.clone();

        let stalled = pipeline_with(store.clone(), Arc::new(StalledEmbedder));
        let dropped = tokio::time::timeout(Duration::from_millis(100), stalled.ingest(file)).await;
        assert!(dropped.is_err());
        let doc = store.get(&hash).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Processing);
        assert_eq!(store.count().await.unwrap(), 0);

        let report = pipeline(store.clone())
            .ingest(SourceFile::from_bytes("notice.txt", bytes))
            .await;
        assert_eq!(report.outcome, IngestOutcome::Indexed { chunks: 1 });
        let doc = store.get(&hash).await.unwrap().unwrap();
        assert_eq!(doc.status, DocumentStatus::Indexed);
    }

    #[tokio::test]
    async fn test_zip_members_record_archive_source() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        let zip = build_zip(&[
            ("docs/a.txt", "Alpha agreement text."),
            ("docs/b.md", "# Beta\n\nBeta agreement text."),
            ("docs/notes.exe", "nope"),
        ]);
        let report = p.ingest_bytes("bundle.zip", zip).await.unwrap();
        assert_eq!(report.count(DocumentStatus::Indexed), 2);
        assert_eq!(report.skipped.len(), 1);
        for r in &report.files {
            let doc = store.get(&r.content_hash).await.unwrap().unwrap();
            assert_eq!(doc.archive_source.as_deref(), Some("bundle.zip"));
        }
    }

    #[tokio::test]
    async fn test_submit_returns_pending_tickets() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        let submission = p
            .submit("memo.txt", b"Payment is due within 30 days.".to_vec())
            .await
            .unwrap();
        assert_eq!(submission.tickets.len(), 1);
        let ticket = &submission.tickets[0];
        assert_eq!(ticket.status, DocumentStatus::Pending);

        let mut status = DocumentStatus::Pending;
        for _ in 0..200 {
            status = p.status(&ticket.content_hash).await.unwrap().unwrap().status;
            if status == DocumentStatus::Indexed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(status, DocumentStatus::Indexed);
    }

    struct RenamedHashing(HashingProvider);

    #[async_trait]
    impl EmbeddingProvider for RenamedHashing {
        fn provider_name(&self) -> &str {
            "hashing"
        }
        fn model_name(&self) -> &str {
            "sha256-bow-v2"
        }
        fn dims(&self) -> usize {
            64
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
            self.0.embed_batch(texts).await
        }
    }

    #[tokio::test]
    async fn test_provider_change_reindexes_same_bytes() {
        let store = Arc::new(InMemoryStore::new());
        let bytes = b"Governing law is the law of England.".to_vec();
        let old = pipeline(store.clone());
        old.ingest(SourceFile::from_bytes("law.txt", bytes.clone())).await;

        let new = pipeline_with(store.clone(), Arc::new(RenamedHashing(HashingProvider::new(64))));
        assert_eq!(new.stale_sources().await.unwrap().len(), 1);
        let report = new.ingest(SourceFile::from_bytes("law.txt", bytes)).await;
        assert_eq!(report.outcome, IngestOutcome::Indexed { chunks: 1 });
        assert!(new.stale_sources().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_sources_after_provider_change() {
        let store = Arc::new(InMemoryStore::new());
        let p = pipeline(store.clone());
        let report = p
            .ingest(SourceFile::from_bytes("a.txt", b"Warranty lasts one year.".to_vec()))
            .await;
        assert!(p.stale_sources().await.unwrap().is_empty());
        assert_eq!(
            store.stale_sources("openai:text-embedding-3-small").await.unwrap(),
            vec![report.content_hash]
        );
    }
}
