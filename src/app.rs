//! Wiring from [`Config`] to concrete backends.

use std::sync::Arc;

use anyhow::Result;

use crate::answer::Assistant;
use crate::classify::{IntentClassifier, ModelClassifier, RuleClassifier};
use crate::config::Config;
use crate::draft::Drafter;
use crate::embedding::{create_provider, EmbeddingProvider};
use crate::generation::{create_generator, Generator};
use crate::ingest::IngestionPipeline;
use crate::lookup::SourceLookup;
use crate::retrieval::Retriever;
use crate::store::memory::InMemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::{DocumentRepository, VectorIndex};

/// Every pipeline sharing one index, one repository and one set of providers.
#[derive(Clone)]
pub struct LegalRag {
    pub config: Config,
    pub ingest: IngestionPipeline,
    pub assistant: Arc<Assistant>,
    pub drafter: Arc<Drafter>,
    pub lookup: SourceLookup,
}

impl LegalRag {
    /// SQLite storage and the providers named in the config.
    pub async fn open(config: &Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::open(config).await?);
        let embedder: Arc<dyn EmbeddingProvider> = Arc::from(create_provider(&config.embedding)?);
        let generator: Arc<dyn Generator> = Arc::from(create_generator(&config.generation)?);
        tracing::info!(
            db = %config.db.path.display(),
            embedding = %embedder.identity(),
            generation = generator.model_name(),
            "opened"
        );
        Ok(Self::from_parts(
            config,
            store.clone(),
            store,
            embedder,
            generator,
        ))
    }

    /// In-memory storage with caller-supplied providers.
    pub fn in_memory(
        config: &Config,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let store = Arc::new(InMemoryStore::new());
        Self::from_parts(config, store.clone(), store, embedder, generator)
    }

    pub fn from_parts(
        config: &Config,
        index: Arc<dyn VectorIndex>,
        documents: Arc<dyn DocumentRepository>,
        embedder: Arc<dyn EmbeddingProvider>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let classifier: Arc<dyn IntentClassifier> = match config.generation.classifier.as_str() {
            "model" => Arc::new(ModelClassifier::new(generator.clone())),
            _ => Arc::new(RuleClassifier),
        };
        let retriever = Retriever::new(index.clone(), embedder.clone());
        LegalRag {
            config: config.clone(),
            ingest: IngestionPipeline::new(index.clone(), documents, embedder, config),
            assistant: Arc::new(Assistant::new(
                classifier,
                retriever.clone(),
                generator.clone(),
                config,
            )),
            drafter: Arc::new(Drafter::new(retriever, generator, config)),
            lookup: SourceLookup::new(index),
        }
    }
}
