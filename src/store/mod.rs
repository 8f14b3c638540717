//! Vector store
//!
//! Named tables of embedded records persisted in SQLite. Opening a table
//! loads its records and builds an HNSW graph for k-NN search; the
//! [`IndexHandle`] keeps the opened table cached for queries.

mod database;
mod record;
mod table;

pub use database::{Database, DbPool, DbStats};
pub use record::{IndexedRecord, RecordMetadata};
pub use table::{cosine_distance, HnswParams, VectorMatch, VectorTable};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Table '{table}' expects {expected}-dimensional vectors, got {actual}")]
    DimensionMismatch {
        table: String,
        expected: usize,
        actual: usize,
    },

    #[error("Cannot create table '{0}' without records")]
    EmptyTable(String),

    #[error("Duplicate record id '{id}' in table '{table}'")]
    DuplicateId { table: String, id: String },

    #[error("Stored record '{id}' is corrupt: {reason}")]
    Corrupt { id: String, reason: String },

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Serialization error: {0}")]
    Serialization(serde_json::Error),

    #[error("IO error: {context}: {source}")]
    Io {
        source: std::io::Error,
        context: String,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

/// Description of a stored table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub name: String,
    pub dimension: usize,
    pub record_count: usize,
    /// Fingerprint of the corpus the table was built from
    pub corpus_hash: Option<String>,
    pub embedding_model: String,
    /// RFC 3339 creation time
    pub created_at: String,
}

/// Provenance recorded when a table is created
#[derive(Debug, Clone, Default)]
pub struct TableSource {
    pub corpus_hash: Option<String>,
    pub embedding_model: String,
}

/// Persistent collection of vector tables
pub struct VectorStore {
    database: Database,
    hnsw: HnswParams,
}

impl VectorStore {
    /// Open (or create) the store at `path`
    pub fn open(path: &Path, hnsw: HnswParams) -> Result<Self, StoreError> {
        let database = Database::new(path)?;
        tracing::debug!("Opened vector store at {}", path.display());
        Ok(Self { database, hnsw })
    }

    /// Create table `name`, replacing any table of that name atomically
    pub fn create_table(
        &self,
        name: &str,
        records: &[IndexedRecord],
        source: TableSource,
    ) -> Result<TableInfo, StoreError> {
        let first = records
            .first()
            .ok_or_else(|| StoreError::EmptyTable(name.to_string()))?;
        let dimension = first.vector.len();

        let mut seen = std::collections::HashSet::with_capacity(records.len());
        for record in records {
            if record.vector.len() != dimension {
                return Err(StoreError::DimensionMismatch {
                    table: name.to_string(),
                    expected: dimension,
                    actual: record.vector.len(),
                });
            }
            if !seen.insert(record.id.as_str()) {
                return Err(StoreError::DuplicateId {
                    table: name.to_string(),
                    id: record.id.clone(),
                });
            }
        }

        let info = TableInfo {
            name: name.to_string(),
            dimension,
            record_count: records.len(),
            corpus_hash: source.corpus_hash,
            embedding_model: source.embedding_model,
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        self.database.replace_table(&info, records)?;
        tracing::info!(
            "Created table '{}' with {} records ({}D)",
            name,
            info.record_count,
            dimension
        );
        Ok(info)
    }

    /// Load table `name` and build its search graph
    pub fn open_table(&self, name: &str) -> Result<VectorTable, StoreError> {
        let info = self
            .database
            .table_info(name)?
            .ok_or_else(|| StoreError::TableNotFound(name.to_string()))?;
        let records = self.database.load_records(name, None)?;
        VectorTable::build(info, records, &self.hnsw)
    }

    pub fn table_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .database
            .list_tables()?
            .into_iter()
            .map(|t| t.name)
            .collect())
    }

    pub fn table_info(&self, name: &str) -> Result<Option<TableInfo>, StoreError> {
        self.database.table_info(name)
    }

    /// Remove a table; returns whether it existed
    pub fn drop_table(&self, name: &str) -> Result<bool, StoreError> {
        let dropped = self.database.drop_table(name)?;
        if dropped {
            tracing::info!("Dropped table '{}'", name);
        }
        Ok(dropped)
    }

    /// Whether table `name` exists and holds at least one record
    pub fn is_populated(&self, name: &str) -> Result<bool, StoreError> {
        Ok(self
            .database
            .table_info(name)?
            .is_some_and(|t| t.record_count > 0))
    }

    /// First `limit` records of a table, for previews
    pub fn sample_records(&self, name: &str, limit: usize) -> Result<Vec<IndexedRecord>, StoreError> {
        if self.database.table_info(name)?.is_none() {
            return Err(StoreError::TableNotFound(name.to_string()));
        }
        self.database.load_records(name, Some(limit))
    }

    pub fn stats(&self) -> Result<DbStats, StoreError> {
        self.database.stats()
    }
}

/// Cached handle to the table queries run against
pub struct IndexHandle {
    store: Arc<VectorStore>,
    table_name: String,
    cached: RwLock<Option<Arc<VectorTable>>>,
}

impl IndexHandle {
    pub fn new(store: Arc<VectorStore>, table_name: impl Into<String>) -> Self {
        Self {
            store,
            table_name: table_name.into(),
            cached: RwLock::new(None),
        }
    }

    pub fn store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// The opened table, loading it on first use
    pub async fn get(&self) -> Result<Arc<VectorTable>, StoreError> {
        if let Some(table) = self.cached.read().await.as_ref() {
            return Ok(Arc::clone(table));
        }
        self.reload().await
    }

    /// Reopen the table from disk, replacing the cached copy
    pub async fn reload(&self) -> Result<Arc<VectorTable>, StoreError> {
        let mut cached = self.cached.write().await;

        let store = Arc::clone(&self.store);
        let name = self.table_name.clone();
        let table = tokio::task::spawn_blocking(move || store.open_table(&name))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;

        let table = Arc::new(table);
        *cached = Some(Arc::clone(&table));
        tracing::info!(
            "Loaded table '{}' ({} records)",
            self.table_name,
            table.len()
        );
        Ok(table)
    }

    /// Forget the cached table; the next `get` reads from disk
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }

    /// Whether a table is currently cached
    pub async fn is_loaded(&self) -> bool {
        self.cached.read().await.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::EntityKind;
    use tempfile::TempDir;

    fn record(kind: EntityKind, id: i64, vector: Vec<f32>) -> IndexedRecord {
        IndexedRecord::new(
            format!("{} {}", kind, id),
            vector,
            RecordMetadata {
                entity_type: kind,
                entity_id: id,
                name: None,
                title: None,
                episode_id: None,
                director: None,
                producer: None,
                homeworld: None,
                species: None,
            },
        )
    }

    fn store(temp: &TempDir) -> VectorStore {
        VectorStore::open(&temp.path().join("index.db"), HnswParams::default()).unwrap()
    }

    #[test]
    fn test_create_open_drop() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert!(!store.is_populated("swapi_data").unwrap());
        assert!(matches!(
            store.open_table("swapi_data"),
            Err(StoreError::TableNotFound(_))
        ));

        let info = store
            .create_table(
                "swapi_data",
                &[
                    record(EntityKind::Characters, 1, vec![1.0, 0.0, 0.0]),
                    record(EntityKind::Films, 1, vec![0.0, 1.0, 0.0]),
                ],
                TableSource {
                    corpus_hash: Some("hash".to_string()),
                    embedding_model: "test-model".to_string(),
                },
            )
            .unwrap();
        assert_eq!(info.dimension, 3);
        assert_eq!(info.record_count, 2);

        assert!(store.is_populated("swapi_data").unwrap());
        assert_eq!(store.table_names().unwrap(), vec!["swapi_data".to_string()]);

        let table = store.open_table("swapi_data").unwrap();
        let hits = table.vector_search(&[0.0, 1.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].record.id, "films_1");

        let sample = store.sample_records("swapi_data", 1).unwrap();
        assert_eq!(sample.len(), 1);

        assert!(store.drop_table("swapi_data").unwrap());
        assert!(store.table_names().unwrap().is_empty());
    }

    #[test]
    fn test_create_rejects_bad_input() {
        let temp = TempDir::new().unwrap();
        let store = store(&temp);

        assert!(matches!(
            store.create_table("t", &[], TableSource::default()),
            Err(StoreError::EmptyTable(_))
        ));

        let mixed = [
            record(EntityKind::Planets, 1, vec![1.0, 0.0]),
            record(EntityKind::Planets, 2, vec![1.0, 0.0, 0.0]),
        ];
        assert!(matches!(
            store.create_table("t", &mixed, TableSource::default()),
            Err(StoreError::DimensionMismatch { .. })
        ));

        let duplicate = [
            record(EntityKind::Planets, 1, vec![1.0, 0.0]),
            record(EntityKind::Planets, 1, vec![0.0, 1.0]),
        ];
        assert!(matches!(
            store.create_table("t", &duplicate, TableSource::default()),
            Err(StoreError::DuplicateId { .. })
        ));

        assert!(store.table_names().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_handle_reload() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(store(&temp));
        let handle = IndexHandle::new(Arc::clone(&store), "swapi_data");

        assert!(matches!(
            handle.get().await,
            Err(StoreError::TableNotFound(_))
        ));
        assert!(!handle.is_loaded().await);

        store
            .create_table(
                "swapi_data",
                &[record(EntityKind::Species, 1, vec![1.0, 0.0])],
                TableSource::default(),
            )
            .unwrap();
        assert_eq!(handle.get().await.unwrap().len(), 1);

        store
            .create_table(
                "swapi_data",
                &[
                    record(EntityKind::Species, 1, vec![1.0, 0.0]),
                    record(EntityKind::Species, 2, vec![0.0, 1.0]),
                ],
                TableSource::default(),
            )
            .unwrap();
        // Cached copy stays until reloaded
        assert_eq!(handle.get().await.unwrap().len(), 1);
        assert_eq!(handle.reload().await.unwrap().len(), 2);

        handle.invalidate().await;
        assert!(!handle.is_loaded().await);
    }
}
