//! # Legal RAG CLI (`lexrag`)
//!
//! ## Usage
//!
//! ```bash
//! lexrag --config ./config/lexrag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `lexrag init` | Create the SQLite database and run schema migrations |
//! | `lexrag ingest <path>...` | Ingest files, directories and ZIP archives |
//! | `lexrag status [hash]` | List documents or show one document's status |
//! | `lexrag ask "<query>"` | Answer a question with citations |
//! | `lexrag draft "<request>"` | Draft a document in Markdown |
//! | `lexrag source` | Show the stored text behind a citation |
//! | `lexrag check` | List documents embedded by a different provider |
//! | `lexrag serve` | Start the HTTP server |
//!
//! Logs go to stderr (`RUST_LOG`, default `info`); results go to stdout.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use legal_rag::app::LegalRag;
use legal_rag::config;
use legal_rag::draft::DraftRequest;
use legal_rag::error::QueryError;
use legal_rag::ingest::IngestOutcome;
use legal_rag::lookup::SourceRef;
use legal_rag::models::AnswerOutcome;
use legal_rag::server;
use legal_rag::store::sqlite::SqliteStore;

/// Citation-backed question answering and drafting over legal documents.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/lexrag.example.toml` for a full example.
#[derive(Parser)]
#[command(name = "lexrag", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/lexrag.toml")]
    config: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Load, chunk, embed and index files, directories or ZIP archives.
    ///
    /// Re-ingesting identical bytes is a no-op. A file that fails is reported
    /// and marked `failed`; the rest of the batch continues.
    Ingest {
        /// Files or directories to ingest.
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// List source documents, or show one by content hash.
    Status { hash: Option<String> },

    /// Ask a question.
    Ask {
        query: String,

        /// Caller identity, echoed in logs.
        #[arg(long)]
        user: Option<String>,
    },

    /// Draft a legal document.
    Draft {
        /// What to draft, e.g. "pre-trial claim for late delivery".
        request: String,

        /// Extra facts to use (names, dates, amounts).
        #[arg(long)]
        context: Option<String>,

        /// Do not search the indexed documents.
        #[arg(long)]
        no_retrieval: bool,

        /// Write the Markdown to this file instead of stdout.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Show the stored passage behind a citation.
    Source {
        #[arg(long, conflicts_with_all = ["filename", "page"])]
        chunk_id: Option<String>,

        #[arg(long, requires = "page")]
        filename: Option<String>,

        #[arg(long, requires = "filename")]
        page: Option<u32>,
    },

    /// List documents whose chunks were embedded by another provider or model.
    Check,

    /// Start the HTTP server on `[server] bind`.
    Serve,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn query_failure(err: QueryError) -> anyhow::Error {
    anyhow::anyhow!("{} ({})", err.user_message(), err)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            SqliteStore::open(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Ingest { paths } => {
            let app = LegalRag::open(&cfg).await?;
            let mut failed = 0usize;
            for path in &paths {
                let report = app
                    .ingest
                    .ingest_path(path)
                    .await
                    .with_context(|| format!("Failed to ingest {}", path.display()))?;
                println!("ingest {}", path.display());
                for file in &report.files {
                    match &file.outcome {
                        IngestOutcome::Indexed { chunks } => {
                            println!("  indexed   {} ({} chunks)", file.filename, chunks)
                        }
                        IngestOutcome::AlreadyIndexed { chunks } => {
                            println!("  unchanged {} ({} chunks)", file.filename, chunks)
                        }
                        IngestOutcome::Failed { reason } => {
                            failed += 1;
                            println!("  failed    {}: {}", file.filename, reason)
                        }
                    }
                }
                for s in &report.skipped {
                    println!("  skipped   {}: {}", s.name, s.reason);
                }
            }
            if failed > 0 {
                bail!("{} file(s) failed to ingest", failed);
            }
            println!("ok");
        }
        Commands::Status { hash } => {
            let app = LegalRag::open(&cfg).await?;
            let docs = match hash {
                Some(h) => match app.ingest.status(&h).await? {
                    Some(doc) => vec![doc],
                    None => bail!("No document with hash {}", h),
                },
                None => app.ingest.documents().await?,
            };
            if docs.is_empty() {
                println!("No documents.");
            }
            for d in docs {
                println!(
                    "{:<10} {:>5} chunks  {}  {}",
                    d.status.as_str(),
                    d.chunk_count,
                    &d.content_hash[..d.content_hash.len().min(12)],
                    d.filename
                );
                if let Some(archive) = &d.archive_source {
                    println!("{:>30} from {}", "", archive);
                }
                if let Some(err) = &d.error {
                    println!("{:>30} error: {}", "", err);
                }
            }
        }
        Commands::Ask { query, user } => {
            let app = LegalRag::open(&cfg).await?;
            tracing::debug!(user = user.as_deref().unwrap_or("-"), "ask");
            let answer = app.assistant.answer(&query).await.map_err(query_failure)?;
            println!("{}", answer.text.trim());
            if answer.outcome == AnswerOutcome::Grounded {
                println!();
                println!("Sources:");
                for (i, c) in answer.citations.iter().enumerate() {
                    println!(
                        "  [{}] {}, page {} (score {:.2}) chunk {}",
                        i + 1,
                        c.filename,
                        c.page,
                        c.score,
                        c.chunk_id
                    );
                }
            }
        }
        Commands::Draft {
            request,
            context,
            no_retrieval,
            output,
        } => {
            let app = LegalRag::open(&cfg).await?;
            let req = DraftRequest {
                request,
                context,
                use_retrieval: !no_retrieval,
            };
            let draft = app.drafter.draft(&req).await.map_err(query_failure)?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &draft.markdown)
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    println!("{} written to {}", draft.title, path.display());
                }
                None => println!("{}", draft.markdown),
            }
            for c in &draft.citations {
                eprintln!("source: {}, page {} ({})", c.filename, c.page, c.chunk_id);
            }
        }
        Commands::Source {
            chunk_id,
            filename,
            page,
        } => {
            let source = match (chunk_id, filename, page) {
                (Some(chunk_id), _, _) => SourceRef::Chunk { chunk_id },
                (None, Some(filename), Some(page)) => SourceRef::Page { filename, page },
                _ => bail!("Pass --chunk-id, or --filename with --page"),
            };
            let app = LegalRag::open(&cfg).await?;
            match app.lookup.resolve(&source).await? {
                Some(passage) => {
                    println!("{}, page {}", passage.filename, passage.page);
                    println!();
                    println!("{}", passage.text);
                }
                None => bail!("No stored passage for that reference"),
            }
        }
        Commands::Check => {
            let app = LegalRag::open(&cfg).await?;
            let stale = app.ingest.stale_sources().await?;
            if stale.is_empty() {
                println!("All chunks match the configured embedding provider.");
            } else {
                println!("{} document(s) need re-ingestion:", stale.len());
                for hash in stale {
                    let name = app
                        .ingest
                        .status(&hash)
                        .await?
                        .map(|d| d.filename)
                        .unwrap_or_default();
                    println!("  {}  {}", hash, name);
                }
            }
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
