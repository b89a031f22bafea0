//! TOML configuration.
//!
//! Every section except `[db]` has defaults, so a minimal file is just:
//!
//! ```toml
//! [db]
//! path = "./data/lexrag.sqlite"
//! ```
//!
//! Values are passed explicitly into the pipelines that need them; nothing
//! reads configuration from global state.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

/// Character-window chunking.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Minimum cosine similarity for a chunk to count as evidence. Tune per
    /// embedding model.
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            score_threshold: default_score_threshold(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.25
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for `ollama` or an OpenAI-compatible endpoint.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_disabled() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_disabled")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_draft_temperature")]
    pub draft_temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_draft_max_tokens")]
    pub draft_max_tokens: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    /// `rules` (lexicon, no network) or `model` (one generation call,
    /// falling back to rules when the call fails).
    #[serde(default = "default_classifier")]
    pub classifier: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_disabled(),
            model: None,
            url: None,
            temperature: default_temperature(),
            draft_temperature: default_draft_temperature(),
            max_tokens: default_max_tokens(),
            draft_max_tokens: default_draft_max_tokens(),
            timeout_secs: default_generation_timeout(),
            classifier: default_classifier(),
        }
    }
}

fn default_temperature() -> f32 {
    0.1
}
fn default_draft_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_draft_max_tokens() -> u32 {
    4000
}
fn default_generation_timeout() -> u64 {
    60
}
fn default_classifier() -> String {
    "rules".to_string()
}

/// Limits applied while expanding uploads.
#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Total uncompressed bytes accepted from one archive.
    #[serde(default = "default_max_archive_bytes")]
    pub max_archive_bytes: u64,
    /// Uncompressed bytes accepted from one archive member.
    #[serde(default = "default_max_entry_bytes")]
    pub max_entry_bytes: u64,
    /// Uncompressed / compressed ratio above which an archive is treated
    /// as a zip bomb.
    #[serde(default = "default_max_compression_ratio")]
    pub max_compression_ratio: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            max_archive_bytes: default_max_archive_bytes(),
            max_entry_bytes: default_max_entry_bytes(),
            max_compression_ratio: default_max_compression_ratio(),
        }
    }
}

fn default_max_concurrency() -> usize {
    4
}
fn default_max_archive_bytes() -> u64 {
    500 * 1024 * 1024
}
fn default_max_entry_bytes() -> u64 {
    50 * 1024 * 1024
}
fn default_max_compression_ratio() -> u64 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_max_upload_bytes() -> usize {
    100 * 1024 * 1024
}

impl Config {
    /// Config with defaults everywhere and the given database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Config {
            db: DbConfig { path: path.into() },
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalConfig::default(),
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            ingest: IngestConfig::default(),
            server: ServerConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.chunking.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            bail!(
                "chunking.chunk_overlap ({}) must be smaller than chunking.chunk_size ({})",
                self.chunking.chunk_overlap,
                self.chunking.chunk_size
            );
        }

        if self.retrieval.top_k < 1 {
            bail!("retrieval.top_k must be >= 1");
        }
        if !(-1.0..=1.0).contains(&self.retrieval.score_threshold) {
            bail!("retrieval.score_threshold must be in [-1.0, 1.0]");
        }

        match self.embedding.provider.as_str() {
            "disabled" | "hashing" | "local" => {}
            "openai" | "ollama" => {
                if self.embedding.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        self.embedding.provider
                    );
                }
                if matches!(self.embedding.dims, None | Some(0)) {
                    bail!(
                        "embedding.dims must be > 0 when provider is '{}'",
                        self.embedding.provider
                    );
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, ollama, or local.",
                other
            ),
        }
        if self.embedding.dims == Some(0) {
            bail!("embedding.dims must be > 0");
        }
        if self.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        match self.generation.provider.as_str() {
            "disabled" => {}
            "openai" | "ollama" => {
                if self.generation.model.is_none() {
                    bail!(
                        "generation.model must be specified when provider is '{}'",
                        self.generation.provider
                    );
                }
            }
            other => bail!(
                "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }
        match self.generation.classifier.as_str() {
            "rules" | "model" => {}
            other => bail!(
                "Unknown generation.classifier: '{}'. Must be rules or model.",
                other
            ),
        }

        if self.ingest.max_concurrency == 0 {
            bail!("ingest.max_concurrency must be > 0");
        }
        if self.ingest.max_compression_ratio == 0 {
            bail!("ingest.max_compression_ratio must be > 0");
        }

        Ok(())
    }
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}
