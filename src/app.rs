//! Component wiring shared by the CLI commands and the server

use crate::answer::Answerer;
use crate::config::{expand_path, Config};
use crate::embedding::{build_provider, EmbeddingProvider};
use crate::error::{HolocronError, Result};
use crate::ingest::IngestPipeline;
use crate::patterns::PatternRegistry;
use crate::retrieval::HybridSearcher;
use crate::store::{IndexHandle, VectorStore};
use std::sync::Arc;
use std::time::Duration;

/// The opened store, embedding provider and query patterns for one config
pub struct App {
    pub config: Config,
    pub provider: Arc<dyn EmbeddingProvider>,
    pub index: Arc<IndexHandle>,
    pub patterns: Arc<PatternRegistry>,
}

impl App {
    /// Open everything `config` points at
    pub fn open(config: Config) -> Result<Self> {
        let provider = build_provider(&config.embedding)?;
        Self::with_provider(config, provider)
    }

    /// Open with an already-built embedding provider
    pub fn with_provider(config: Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let index_path = config.storage.index_path()?;
        if let Some(parent) = index_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| HolocronError::Io {
                source: e,
                context: format!("Failed to create data directory: {:?}", parent),
            })?;
        }
        let store = Arc::new(VectorStore::open(
            &index_path,
            config.indexing.hnsw_params(),
        )?);
        let index = Arc::new(IndexHandle::new(store, config.indexing.table_name.clone()));

        let attributes_file = config
            .patterns
            .attributes_file
            .as_deref()
            .map(expand_path)
            .transpose()?;
        let patterns = Arc::new(PatternRegistry::load(attributes_file.as_deref())?);

        tracing::debug!(
            index = %index_path.display(),
            provider = provider.model_name(),
            "Components ready"
        );

        Ok(Self {
            config,
            provider,
            index,
            patterns,
        })
    }

    pub fn searcher(&self) -> Result<HybridSearcher> {
        Ok(HybridSearcher::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.index),
            Arc::clone(&self.patterns),
            self.config.retrieval.clone(),
        )?)
    }

    pub fn pipeline(&self) -> IngestPipeline {
        IngestPipeline::new(
            Arc::clone(&self.provider),
            Arc::clone(&self.index),
            Duration::from_millis(self.config.embedding.request_delay_ms),
        )
    }

    pub fn answerer(&self, searcher: Arc<HybridSearcher>) -> Answerer {
        Answerer::new(
            searcher,
            Answerer::chat_from_config(&self.config.llm),
            self.config.llm.context_size,
        )
    }
}
