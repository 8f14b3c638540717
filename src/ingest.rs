//! Ingestion pipeline
//!
//! Projects every entity of the corpus to text, embeds it, and replaces the
//! index table with the result. Embedding calls are sequential and paced by
//! a fixed delay. Transient per-entity failures are logged and counted;
//! credential failures abort the run. The table swap is one transaction, so
//! queries see either the previous table or the new one.

use crate::corpus::{Corpus, CorpusError, EntityKind};
use crate::embedding::{EmbeddingError, EmbeddingProvider};
use crate::progress::{ProgressEmitter, ProgressEvent, ProgressKind};
use crate::projection;
use crate::store::{IndexHandle, IndexedRecord, StoreError, TableInfo, TableSource};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Error, Debug)]
pub enum IngestError {
    #[error("An ingestion run is already in progress")]
    AlreadyRunning,

    #[error("Failed to load corpus: {0}")]
    Corpus(#[from] CorpusError),

    #[error("Embedding {id} failed: {source}")]
    Embedding {
        id: String,
        #[source]
        source: EmbeddingError,
    },

    #[error("No entities could be embedded ({failed} failures)")]
    NothingIndexed { failed: usize },

    #[error("Failed to store index: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    pub fn status_code(&self) -> u16 {
        match self {
            IngestError::AlreadyRunning => 409,
            IngestError::Embedding { source, .. } => source.status_code(),
            IngestError::NothingIndexed { .. } => 503,
            IngestError::Corpus(_) | IngestError::Store(_) => 500,
        }
    }
}

/// An entity that was skipped
#[derive(Debug, Clone, Serialize)]
pub struct IngestFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of a completed run
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub table: TableInfo,
    pub total: usize,
    pub indexed: usize,
    pub failed: usize,
    pub failures: Vec<IngestFailure>,
    pub duration_ms: u64,
}

/// Rebuilds the index table from a corpus
pub struct IngestPipeline {
    provider: Arc<dyn EmbeddingProvider>,
    index: Arc<IndexHandle>,
    request_delay: Duration,
    running: Arc<Mutex<()>>,
}

/// Exclusive claim on an [`IngestPipeline`], released on drop
pub struct IngestPermit {
    _guard: OwnedMutexGuard<()>,
}

impl IngestPipeline {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        index: Arc<IndexHandle>,
        request_delay: Duration,
    ) -> Self {
        Self {
            provider,
            index,
            request_delay,
            running: Arc::new(Mutex::new(())),
        }
    }

    /// Whether a run is in progress
    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// Claim the pipeline for one run; fails while another run holds it
    pub fn reserve(&self) -> Result<IngestPermit, IngestError> {
        Arc::clone(&self.running)
            .try_lock_owned()
            .map(|guard| IngestPermit { _guard: guard })
            .map_err(|_| IngestError::AlreadyRunning)
    }

    /// Load the corpus file (with retries) and ingest it
    pub async fn run_from_file(
        &self,
        path: &Path,
        retries: u32,
        backoff: Duration,
        progress: &ProgressEmitter,
    ) -> Result<IngestReport, IngestError> {
        let permit = self.reserve()?;
        self.run_from_file_reserved(permit, path, retries, backoff, progress)
            .await
    }

    /// [`run_from_file`](Self::run_from_file) under an already taken permit
    pub async fn run_from_file_reserved(
        &self,
        permit: IngestPermit,
        path: &Path,
        retries: u32,
        backoff: Duration,
        progress: &ProgressEmitter,
    ) -> Result<IngestReport, IngestError> {
        progress.emit(ProgressEvent::new(
            ProgressKind::LoadingData,
            format!("Loading {}", path.display()),
        ));
        let corpus = match Corpus::load_with_retry(path, retries, backoff).await {
            Ok(corpus) => corpus,
            Err(e) => {
                tracing::error!("Ingestion failed: {}", e);
                progress.emit(ProgressEvent::new(ProgressKind::Error, e.to_string()));
                return Err(e.into());
            }
        };
        self.run_reserved(permit, &corpus, progress).await
    }

    /// Embed every entity of `corpus` and replace the table
    pub async fn run(
        &self,
        corpus: &Corpus,
        progress: &ProgressEmitter,
    ) -> Result<IngestReport, IngestError> {
        let permit = self.reserve()?;
        self.run_reserved(permit, corpus, progress).await
    }

    async fn run_reserved(
        &self,
        _permit: IngestPermit,
        corpus: &Corpus,
        progress: &ProgressEmitter,
    ) -> Result<IngestReport, IngestError> {
        let result = self.run_locked(corpus, progress).await;
        if let Err(e) = &result {
            tracing::error!("Ingestion failed: {}", e);
            progress.emit(ProgressEvent::new(ProgressKind::Error, e.to_string()));
        }
        result
    }

    async fn run_locked(
        &self,
        corpus: &Corpus,
        progress: &ProgressEmitter,
    ) -> Result<IngestReport, IngestError> {
        let started = Instant::now();
        let total = corpus.entity_count();
        let table_name = self.index.table_name().to_string();

        tracing::info!(
            "Ingesting {} entities into '{}' with {}",
            total,
            table_name,
            self.provider.model_name()
        );
        progress.emit(
            ProgressEvent::new(
                ProgressKind::Started,
                format!("Indexing {} entities", total),
            )
            .with_progress(0, total)
            .with_data(serde_json::json!({
                "table": table_name,
                "model": self.provider.model_name(),
            })),
        );

        let mut records = Vec::with_capacity(total);
        let mut failures = Vec::new();
        let mut done = 0;

        for kind in EntityKind::ALL {
            for entity in corpus.entities(kind) {
                if done > 0 && !self.request_delay.is_zero() {
                    tokio::time::sleep(self.request_delay).await;
                }
                done += 1;

                let id = IndexedRecord::record_id(kind, entity.id);
                let text = projection::project(kind, entity, Some(corpus));

                match self.provider.embed(&text).await {
                    Ok(vector) => {
                        let metadata = projection::extract_metadata(kind, entity);
                        records.push(IndexedRecord::new(text, vector, metadata));
                        progress.emit(
                            ProgressEvent::new(ProgressKind::Embedding, format!("Embedded {}", id))
                                .with_progress(done, total),
                        );
                    }
                    Err(e) if e.is_fatal() => {
                        return Err(IngestError::Embedding { id, source: e });
                    }
                    Err(e) => {
                        tracing::warn!("Skipping {}: {}", id, e);
                        progress.emit(
                            ProgressEvent::new(
                                ProgressKind::EntitySkipped,
                                format!("Skipped {}: {}", id, e),
                            )
                            .with_progress(done, total),
                        );
                        failures.push(IngestFailure {
                            id,
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        if records.is_empty() {
            return Err(IngestError::NothingIndexed {
                failed: failures.len(),
            });
        }

        progress.emit(ProgressEvent::new(
            ProgressKind::Storing,
            format!("Writing {} records to '{}'", records.len(), table_name),
        ));

        let indexed = records.len();
        let store = Arc::clone(self.index.store());
        let source = TableSource {
            corpus_hash: Some(corpus.fingerprint().to_string()),
            embedding_model: self.provider.model_name().to_string(),
        };
        let name = table_name.clone();
        let table = tokio::task::spawn_blocking(move || store.create_table(&name, &records, source))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        self.index.reload().await?;

        let report = IngestReport {
            table,
            total,
            indexed,
            failed: failures.len(),
            failures,
            duration_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            "Indexed {}/{} entities into '{}' in {}ms ({} skipped)",
            report.indexed,
            report.total,
            table_name,
            report.duration_ms,
            report.failed
        );
        progress.emit(
            ProgressEvent::new(
                ProgressKind::Complete,
                format!("Indexed {} of {} entities", report.indexed, report.total),
            )
            .with_progress(total, total)
            .with_data(serde_json::json!({
                "indexed": report.indexed,
                "failed": report.failed,
            })),
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use crate::progress::ProgressRegistry;
    use crate::store::{HnswParams, VectorStore};
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    fn corpus() -> Corpus {
        Corpus::from_value(json!({
            "characters": [
                {"id": 1, "name": "Luke Skywalker", "eye_color": "blue"},
                {"id": 4, "name": "Darth Vader", "eye_color": "yellow"}
            ],
            "films": [{"id": 1, "title": "A New Hope", "episode_id": 4}],
            "films_characters": [
                {"film_id": 1, "character_id": 1},
                {"film_id": 1, "character_id": 4}
            ]
        }))
        .unwrap()
    }

    fn index(temp: &TempDir) -> Arc<IndexHandle> {
        let store =
            VectorStore::open(&temp.path().join("index.db"), HnswParams::default()).unwrap();
        Arc::new(IndexHandle::new(Arc::new(store), "swapi_data"))
    }

    /// Fails on texts containing `needle`
    struct FlakyProvider {
        inner: HashingProvider,
        needle: &'static str,
        error: fn() -> EmbeddingError,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            if text.contains(self.needle) {
                return Err((self.error)());
            }
            self.inner.embed_text(text)
        }

        fn dimension(&self) -> usize {
            self.inner.dimension()
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_ingest_all_entities() {
        let temp = TempDir::new().unwrap();
        let index = index(&temp);
        let pipeline = IngestPipeline::new(
            Arc::new(HashingProvider::new(64).unwrap()),
            Arc::clone(&index),
            Duration::ZERO,
        );

        let registry = ProgressRegistry::new(32);
        let mut events = registry.open("run");
        let report = pipeline.run(&corpus(), &registry.emitter("run")).await.unwrap();

        assert_eq!(report.total, 3);
        assert_eq!(report.indexed, 3);
        assert_eq!(report.failed, 0);
        assert_eq!(report.table.dimension, 64);
        assert!(report.table.corpus_hash.is_some());

        let table = index.get().await.unwrap();
        let mut ids: Vec<_> = table.records().iter().map(|r| r.id.clone()).collect();
        ids.sort();
        assert_eq!(ids, vec!["characters_1", "characters_4", "films_1"]);
        assert!(table.records().iter().all(|r| r.vector.len() == 64));

        let vader = table
            .records()
            .iter()
            .find(|r| r.id == "characters_4")
            .unwrap();
        assert!(vader.text.contains("eye color: yellow"));
        assert!(vader.text.contains("Appears in movies: A New Hope"));

        let mut last = None;
        while let Some(event) = events.try_recv() {
            last = Some(event);
        }
        let last = last.unwrap();
        assert_eq!(last.kind, ProgressKind::Complete);
        assert_eq!(last.progress, Some(100));
    }

    #[tokio::test]
    async fn test_transient_failures_are_skipped() {
        let temp = TempDir::new().unwrap();
        let pipeline = IngestPipeline::new(
            Arc::new(FlakyProvider {
                inner: HashingProvider::new(32).unwrap(),
                needle: "Vader",
                error: || EmbeddingError::RateLimited("slow down".to_string()),
            }),
            index(&temp),
            Duration::ZERO,
        );

        let report = pipeline
            .run(&corpus(), &ProgressEmitter::detached())
            .await
            .unwrap();
        assert_eq!(report.indexed, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(report.failures[0].id, "characters_4");
    }

    #[tokio::test]
    async fn test_auth_failure_aborts() {
        let temp = TempDir::new().unwrap();
        let index = index(&temp);
        let pipeline = IngestPipeline::new(
            Arc::new(FlakyProvider {
                inner: HashingProvider::new(32).unwrap(),
                needle: "Star Wars",
                error: || EmbeddingError::Authentication("bad key".to_string()),
            }),
            Arc::clone(&index),
            Duration::ZERO,
        );

        let err = pipeline
            .run(&corpus(), &ProgressEmitter::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Embedding { .. }));
        assert_eq!(err.status_code(), 401);
        assert!(!index.store().is_populated("swapi_data").unwrap());
    }

    #[tokio::test]
    async fn test_rejects_concurrent_runs() {
        let temp = TempDir::new().unwrap();
        let pipeline = IngestPipeline::new(
            Arc::new(HashingProvider::new(32).unwrap()),
            index(&temp),
            Duration::ZERO,
        );

        let permit = pipeline.reserve().unwrap();
        assert!(pipeline.is_running());
        assert!(matches!(pipeline.reserve(), Err(IngestError::AlreadyRunning)));
        let err = pipeline
            .run(&corpus(), &ProgressEmitter::detached())
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::AlreadyRunning));
        assert_eq!(err.status_code(), 409);

        // A second file run is refused before the corpus is even read
        let err = pipeline
            .run_from_file(
                &temp.path().join("missing.json"),
                1,
                Duration::ZERO,
                &ProgressEmitter::detached(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::AlreadyRunning));

        drop(permit);
        assert!(!pipeline.is_running());
        pipeline
            .run(&corpus(), &ProgressEmitter::detached())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_missing_corpus_file() {
        let temp = TempDir::new().unwrap();
        let pipeline = IngestPipeline::new(
            Arc::new(HashingProvider::new(32).unwrap()),
            index(&temp),
            Duration::ZERO,
        );

        let err = pipeline
            .run_from_file(
                &temp.path().join("missing.json"),
                1,
                Duration::from_millis(1),
                &ProgressEmitter::detached(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::Corpus(CorpusError::Read { .. })));
    }
}
