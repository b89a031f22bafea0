//! SQLite backend tests against a temporary database file.

use std::sync::Arc;

use tempfile::TempDir;

use legal_rag::app::LegalRag;
use legal_rag::chunk::chunk_id;
use legal_rag::config::Config;
use legal_rag::embedding::HashingProvider;
use legal_rag::error::ProviderError;
use legal_rag::generation::{GenerationParams, Generator};
use legal_rag::models::{AnswerOutcome, Chunk, DocumentStatus, IndexPoint, SourceDocument};
use legal_rag::store::sqlite::SqliteStore;
use legal_rag::store::{DocumentRepository, VectorIndex};

fn temp_config(tmp: &TempDir) -> Config {
    Config::with_db_path(tmp.path().join("data").join("lexrag.sqlite"))
}

fn point(hash: &str, filename: &str, page: u32, ordinal: u32, model: &str, vector: Vec<f32>) -> IndexPoint {
    IndexPoint {
        chunk: Chunk {
            id: chunk_id(hash, page, ordinal),
            source_hash: hash.to_string(),
            filename: filename.to_string(),
            page,
            ordinal,
            text: format!("{} page {} part {}", filename, page, ordinal),
            section: None,
            embedding_model: model.to_string(),
        },
        vector,
    }
}

const MODEL: &str = "hashing:sha256-bow";

#[tokio::test]
async fn test_open_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let cfg = temp_config(&tmp);
    SqliteStore::open(&cfg).await.unwrap();
    let store = SqliteStore::open(&cfg).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 0);
    assert!(cfg.db.path.exists());
}

#[tokio::test]
async fn test_register_never_downgrades() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&temp_config(&tmp)).await.unwrap();

    let doc = SourceDocument::pending("h1", "terms.txt", "txt", None);
    let stored = store.register(&doc).await.unwrap();
    assert_eq!(stored.status, DocumentStatus::Pending);

    store.mark_indexed("h1", 3, MODEL).await.unwrap();
    let again = store.register(&doc).await.unwrap();
    assert_eq!(again.status, DocumentStatus::Indexed);
    assert_eq!(again.chunk_count, 3);
    assert_eq!(again.embedding_model.as_deref(), Some(MODEL));
}

#[tokio::test]
async fn test_failed_status_keeps_reason_and_resets_count() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&temp_config(&tmp)).await.unwrap();
    store
        .register(&SourceDocument::pending("h1", "a.pdf", "pdf", Some("bundle.zip")))
        .await
        .unwrap();
    store.mark_indexed("h1", 4, MODEL).await.unwrap();
    store
        .set_status("h1", DocumentStatus::Failed, Some("corrupt pdf"))
        .await
        .unwrap();

    let doc = store.get("h1").await.unwrap().unwrap();
    assert_eq!(doc.status, DocumentStatus::Failed);
    assert_eq!(doc.error.as_deref(), Some("corrupt pdf"));
    assert_eq!(doc.chunk_count, 0);
    assert_eq!(doc.archive_source.as_deref(), Some("bundle.zip"));

    assert!(store
        .set_status("missing", DocumentStatus::Processing, None)
        .await
        .is_err());
}

#[tokio::test]
async fn test_replace_source_query_and_page_lookup() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&temp_config(&tmp)).await.unwrap();

    store
        .replace_source(
            "h1",
            &[
                point("h1", "a.txt", 1, 0, MODEL, vec![1.0, 0.0]),
                point("h1", "a.txt", 1, 1, MODEL, vec![0.6, 0.8]),
                point("h1", "a.txt", 2, 0, MODEL, vec![0.0, 1.0]),
            ],
        )
        .await
        .unwrap();
    store
        .upsert(&[point("h2", "b.txt", 1, 0, MODEL, vec![0.8, 0.6])])
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 4);

    let hits = store.query(&[1.0, 0.0], 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].chunk.id, chunk_id("h1", 1, 0));
    assert!((hits[0].score - 1.0).abs() < 1e-6);
    assert_eq!(hits[1].chunk.source_hash, "h2");

    let page = store.chunks_at("a.txt", 1).await.unwrap();
    let ordinals: Vec<u32> = page.iter().map(|c| c.ordinal).collect();
    assert_eq!(ordinals, vec![0, 1]);

    // A second replace leaves only the new set.
    store
        .replace_source("h1", &[point("h1", "a.txt", 1, 0, MODEL, vec![1.0, 0.0])])
        .await
        .unwrap();
    assert_eq!(store.count().await.unwrap(), 2);
    assert!(store.get_chunk(&chunk_id("h1", 2, 0)).await.unwrap().is_none());

    assert_eq!(store.delete_source("h1").await.unwrap(), 1);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_stale_and_superseded() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteStore::open(&temp_config(&tmp)).await.unwrap();
    store
        .upsert(&[
            point("h1", "a.txt", 1, 0, MODEL, vec![1.0, 0.0]),
            point("h2", "b.txt", 1, 0, "openai:text-embedding-3-small", vec![1.0, 0.0]),
        ])
        .await
        .unwrap();
    assert_eq!(store.stale_sources(MODEL).await.unwrap(), vec!["h2".to_string()]);

    for hash in ["old", "new", "in-flight"] {
        store
            .register(&SourceDocument::pending(hash, "terms.txt", "txt", None))
            .await
            .unwrap();
    }
    store.mark_indexed("old", 1, MODEL).await.unwrap();
    store
        .set_status("in-flight", DocumentStatus::Processing, None)
        .await
        .unwrap();
    assert_eq!(
        store.superseded("terms.txt", "new").await.unwrap(),
        vec!["old".to_string()]
    );
    store.remove("old").await.unwrap();
    assert!(store.get("old").await.unwrap().is_none());
    assert_eq!(store.list().await.unwrap().len(), 2);
}

struct EchoGenerator;

#[async_trait::async_trait]
impl Generator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(
        &self,
        _system: &str,
        _user: &str,
        _params: GenerationParams,
    ) -> Result<String, ProviderError> {
        Ok("Per [Source 1].".to_string())
    }
}

#[tokio::test]
async fn test_pipeline_over_sqlite_survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let cfg = temp_config(&tmp);

    {
        let store = Arc::new(SqliteStore::open(&cfg).await.unwrap());
        let app = LegalRag::from_parts(
            &cfg,
            store.clone(),
            store,
            Arc::new(HashingProvider::new(HashingProvider::DEFAULT_DIMS)),
            Arc::new(EchoGenerator),
        );
        let report = app
            .ingest
            .ingest_bytes(
                "terms.txt",
                b"Late delivery penalty is 0.1% per day (Article 5.2).".to_vec(),
            )
            .await
            .unwrap();
        assert_eq!(report.count(DocumentStatus::Indexed), 1);
    }

    let store = Arc::new(SqliteStore::open(&cfg).await.unwrap());
    let app = LegalRag::from_parts(
        &cfg,
        store.clone(),
        store,
        Arc::new(HashingProvider::new(HashingProvider::DEFAULT_DIMS)),
        Arc::new(EchoGenerator),
    );
    let answer = app
        .assistant
        .answer("What is the penalty for late delivery?")
        .await
        .unwrap();
    assert_eq!(answer.outcome, AnswerOutcome::Grounded);
    assert_eq!(answer.citations[0].filename, "terms.txt");
    assert_eq!(answer.citations[0].page, 1);
}
