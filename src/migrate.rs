use anyhow::Result;
use sqlx::SqlitePool;

/// Create the schema. Every statement is idempotent.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS source_documents (
            content_hash TEXT PRIMARY KEY,
            filename TEXT NOT NULL,
            format TEXT NOT NULL DEFAULT '',
            archive_source TEXT,
            uploaded_at INTEGER NOT NULL,
            status TEXT NOT NULL,
            error TEXT,
            chunk_count INTEGER NOT NULL DEFAULT 0,
            embedding_model TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Chunk payload and vector live in one row so a source swap is a single
    // transaction over one table.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            id TEXT PRIMARY KEY,
            source_hash TEXT NOT NULL,
            filename TEXT NOT NULL,
            page INTEGER NOT NULL,
            ordinal INTEGER NOT NULL,
            text TEXT NOT NULL,
            section TEXT,
            embedding_model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            embedding BLOB NOT NULL,
            UNIQUE(source_hash, page, ordinal)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_source_hash ON chunks(source_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_filename_page ON chunks(filename, page)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_source_documents_filename ON source_documents(filename)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
