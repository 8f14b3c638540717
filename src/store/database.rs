//! SQLite database management with migrations
//!
//! Holds every index table and its records; vectors are stored as
//! little-endian f32 blobs.

use super::record::{decode_vector, encode_vector, IndexedRecord, RecordMetadata};
use super::{StoreError, TableInfo};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Database manager with migration support
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection
    pub fn new(db_path: &Path) -> Result<Self, StoreError> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        // Per-connection settings; journal mode is persistent and set once below
        let manager = SqliteConnectionManager::file(db_path).with_init(|conn| {
            conn.execute_batch(
                "
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )
        });

        let pool = Pool::builder()
            .max_size(8)
            .build(manager)
            .map_err(|e| StoreError::Pool(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| StoreError::Pool(format!("Failed to get connection: {}", e)))?;

            // Enable WAL mode so readers are not blocked by a rebuild
            conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        }

        let db = Self { pool };
        db.migrate()?;

        Ok(db)
    }

    /// Get a connection from the pool
    pub fn get_conn(
        &self,
    ) -> Result<r2d2::PooledConnection<SqliteConnectionManager>, StoreError> {
        self.pool
            .get()
            .map_err(|e| StoreError::Pool(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<(), StoreError> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn.query_row(
            "SELECT COALESCE(MAX(version), 0) FROM _migrations",
            [],
            |row| row.get(0),
        )?;

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);

                conn.execute_batch(migration)?;

                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Replace table `info.name` with `records` in one transaction
    pub fn replace_table(&self, info: &TableInfo, records: &[IndexedRecord]) -> Result<(), StoreError> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;

        tx.execute(
            "DELETE FROM index_records WHERE table_name = ?1",
            params![info.name],
        )?;
        tx.execute("DELETE FROM index_tables WHERE name = ?1", params![info.name])?;
        tx.execute(
            "INSERT INTO index_tables
                (name, dimension, record_count, corpus_hash, embedding_model, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                info.name,
                info.dimension as i64,
                info.record_count as i64,
                info.corpus_hash,
                info.embedding_model,
                info.created_at,
            ],
        )?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO index_records
                    (table_name, position, id, text, vector, entity_type, entity_id, metadata)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            )?;
            for (position, record) in records.iter().enumerate() {
                let metadata =
                    serde_json::to_string(&record.metadata).map_err(StoreError::Serialization)?;
                stmt.execute(params![
                    info.name,
                    position as i64,
                    record.id,
                    record.text,
                    encode_vector(&record.vector),
                    record.metadata.entity_type.collection(),
                    record.metadata.entity_id,
                    metadata,
                ])?;
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Table description, if the table exists
    pub fn table_info(&self, name: &str) -> Result<Option<TableInfo>, StoreError> {
        let conn = self.get_conn()?;
        let info = conn
            .query_row(
                "SELECT name, dimension, record_count, corpus_hash, embedding_model, created_at
                 FROM index_tables WHERE name = ?1",
                params![name],
                row_to_info,
            )
            .optional()?;
        Ok(info)
    }

    /// Every table, ordered by name
    pub fn list_tables(&self) -> Result<Vec<TableInfo>, StoreError> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT name, dimension, record_count, corpus_hash, embedding_model, created_at
             FROM index_tables ORDER BY name",
        )?;
        let tables = stmt
            .query_map([], row_to_info)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tables)
    }

    /// Remove a table; returns whether it existed
    pub fn drop_table(&self, name: &str) -> Result<bool, StoreError> {
        let mut conn = self.get_conn()?;
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM index_records WHERE table_name = ?1",
            params![name],
        )?;
        let removed = tx.execute("DELETE FROM index_tables WHERE name = ?1", params![name])?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Records of a table in insertion order, at most `limit` when given
    pub fn load_records(
        &self,
        name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<IndexedRecord>, StoreError> {
        let conn = self.get_conn()?;
        let limit = limit.map(|l| l as i64).unwrap_or(-1);
        let mut stmt = conn.prepare(
            "SELECT id, text, vector, metadata FROM index_records
             WHERE table_name = ?1 ORDER BY position LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![name, limit], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Vec<u8>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, text, vector, metadata)| {
                let vector = decode_vector(&vector).ok_or_else(|| StoreError::Corrupt {
                    id: id.clone(),
                    reason: format!("vector blob of {} bytes", vector.len()),
                })?;
                let metadata: RecordMetadata =
                    serde_json::from_str(&metadata).map_err(|e| StoreError::Corrupt {
                        id: id.clone(),
                        reason: format!("metadata: {}", e),
                    })?;
                Ok(IndexedRecord {
                    id,
                    text,
                    vector,
                    metadata,
                })
            })
            .collect()
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, StoreError> {
        let conn = self.get_conn()?;

        let table_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM index_tables", [], |row| row.get(0))?;
        let record_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM index_records", [], |row| row.get(0))?;
        let vector_bytes: i64 = conn.query_row(
            "SELECT COALESCE(SUM(LENGTH(vector)), 0) FROM index_records",
            [],
            |row| row.get(0),
        )?;

        Ok(DbStats {
            table_count: table_count as usize,
            record_count: record_count as usize,
            vector_bytes: vector_bytes as u64,
        })
    }
}

fn row_to_info(row: &rusqlite::Row<'_>) -> rusqlite::Result<TableInfo> {
    Ok(TableInfo {
        name: row.get(0)?,
        dimension: row.get::<_, i64>(1)? as usize,
        record_count: row.get::<_, i64>(2)? as usize,
        corpus_hash: row.get(3)?,
        embedding_model: row.get(4)?,
        created_at: row.get(5)?,
    })
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub table_count: usize,
    pub record_count: usize,
    pub vector_bytes: u64,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE index_tables (
        name TEXT PRIMARY KEY,
        dimension INTEGER NOT NULL,
        record_count INTEGER NOT NULL,
        corpus_hash TEXT,
        embedding_model TEXT NOT NULL,
        created_at TEXT NOT NULL
    );

    CREATE TABLE index_records (
        table_name TEXT NOT NULL,
        position INTEGER NOT NULL,
        id TEXT NOT NULL,
        text TEXT NOT NULL,
        vector BLOB NOT NULL,
        entity_type TEXT NOT NULL,
        entity_id INTEGER NOT NULL,
        metadata TEXT NOT NULL,  -- JSON RecordMetadata
        PRIMARY KEY (table_name, id),
        FOREIGN KEY (table_name) REFERENCES index_tables(name) ON DELETE CASCADE
    );

    CREATE INDEX idx_records_position ON index_records(table_name, position);
    CREATE INDEX idx_records_entity ON index_records(entity_type, entity_id);
    "#,
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::EntityKind;
    use tempfile::TempDir;

    fn info(name: &str, count: usize) -> TableInfo {
        TableInfo {
            name: name.to_string(),
            dimension: 2,
            record_count: count,
            corpus_hash: Some("abc".to_string()),
            embedding_model: "test".to_string(),
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn record(id: i64, vector: Vec<f32>) -> IndexedRecord {
        IndexedRecord::new(
            format!("record {}", id),
            vector,
            RecordMetadata {
                entity_type: EntityKind::Planets,
                entity_id: id,
                name: Some(format!("Planet {}", id)),
                title: None,
                episode_id: None,
                director: None,
                producer: None,
                homeworld: None,
                species: None,
            },
        )
    }

    #[test]
    fn test_database_creation() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("nested").join("index.db");

        let _db = Database::new(&db_path).unwrap();
        assert!(db_path.exists());
    }

    #[test]
    fn test_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("index.db")).unwrap();

        let conn = db.get_conn().unwrap();
        let version: i32 = conn
            .query_row("SELECT MAX(version) FROM _migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(version, MIGRATIONS.len() as i32);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("index.db");
        {
            let db = Database::new(&path).unwrap();
            db.replace_table(&info("t", 1), &[record(1, vec![1.0, 0.0])])
                .unwrap();
        }
        let db = Database::new(&path).unwrap();
        assert_eq!(db.list_tables().unwrap().len(), 1);
        assert_eq!(db.load_records("t", None).unwrap().len(), 1);
    }

    #[test]
    fn test_replace_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("index.db")).unwrap();

        db.replace_table(
            &info("swapi_data", 2),
            &[record(2, vec![0.0, 1.0]), record(1, vec![1.0, 0.0])],
        )
        .unwrap();

        let records = db.load_records("swapi_data", None).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].id, "planets_2");
        assert_eq!(records[1].vector, vec![1.0, 0.0]);
        assert_eq!(records[1].metadata.name.as_deref(), Some("Planet 1"));

        db.replace_table(&info("swapi_data", 1), &[record(3, vec![0.5, 0.5])])
            .unwrap();
        let records = db.load_records("swapi_data", None).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "planets_3");

        let limited = db.load_records("swapi_data", Some(0)).unwrap();
        assert!(limited.is_empty());
    }

    #[test]
    fn test_drop_table() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("index.db")).unwrap();

        db.replace_table(&info("a", 1), &[record(1, vec![1.0, 0.0])])
            .unwrap();
        assert!(db.drop_table("a").unwrap());
        assert!(!db.drop_table("a").unwrap());
        assert!(db.table_info("a").unwrap().is_none());

        let stats = db.stats().unwrap();
        assert_eq!(stats.table_count, 0);
        assert_eq!(stats.record_count, 0);
    }

    #[test]
    fn test_foreign_keys_enabled() {
        let temp_dir = TempDir::new().unwrap();
        let db = Database::new(&temp_dir.path().join("index.db")).unwrap();
        let conn = db.get_conn().unwrap();

        let fk_enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk_enabled, 1);
    }
}
