//! Vector index implementation using sqlite-vec
//!
//! - rusqlite with the sqlite-vec extension for KNN search
//! - `memory_vectors` vec0 virtual table (cosine distance) for embeddings
//! - `memory_payloads` table for the JSON payload stored next to each vector
//! - Connection pooling for concurrent access (deadpool-sqlite)

use super::{VectorIndex, VectorPayload};
use crate::error::{Result, UnimemError};
use crate::types::MemoryId;
use async_trait::async_trait;
use deadpool_sqlite::{Config, Pool, PoolConfig, Runtime};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use std::sync::Once;
use tracing::{debug, info};

/// Default connection pool size
pub const DEFAULT_POOL_SIZE: usize = 8;

/// Largest k a vec0 KNN query accepts
const MAX_KNN_LIMIT: usize = 4096;

static REGISTER_VEC_EXTENSION: Once = Once::new();

/// Vector index backed by sqlite-vec with connection pooling
pub struct SqliteVectorIndex {
    pool: Pool,
    dimensions: usize,
}

impl SqliteVectorIndex {
    /// Open (or create) a vector index at `db_path` and create its tables
    ///
    /// # Example
    /// ```ignore
    /// let index = SqliteVectorIndex::open("unimem.db", 1536, 8).await?;
    /// ```
    pub async fn open<P: AsRef<Path>>(db_path: P, dimensions: usize, pool_size: usize) -> Result<Self> {
        let path_str = db_path.as_ref().to_string_lossy().to_string();
        info!(
            "Creating vector index pool at: {} (dimensions: {}, pool_size: {})",
            path_str, dimensions, pool_size
        );

        // Auto-extension makes vec0 available on every pooled connection
        REGISTER_VEC_EXTENSION.call_once(|| unsafe {
            use rusqlite::ffi::sqlite3_auto_extension;

            #[allow(clippy::missing_transmute_annotations)]
            sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
        });

        let mut config = Config::new(path_str);
        config.pool = Some(PoolConfig::new(pool_size.max(1)));
        let pool = config.create_pool(Runtime::Tokio1).map_err(|e| {
            UnimemError::Database(format!("Failed to create connection pool: {}", e))
        })?;

        let index = Self { pool, dimensions };
        index.create_tables().await?;
        Ok(index)
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Run `f` on a pooled connection
    async fn interact<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.pool.get().await.map_err(|e| {
            UnimemError::PortUnavailable(format!("Failed to get connection from pool: {}", e))
        })?;

        conn.interact(f)
            .await
            .map_err(|e| UnimemError::Database(format!("Pool interaction failed: {}", e)))?
    }

    /// Create the vec0 virtual table and payload table (idempotent)
    async fn create_tables(&self) -> Result<()> {
        let vec_sql = format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS memory_vectors USING vec0(
                memory_id TEXT PRIMARY KEY,
                embedding FLOAT[{}] distance_metric=cosine
            )",
            self.dimensions
        );

        self.interact(move |conn| {
            conn.execute(&vec_sql, [])
                .map_err(|e| UnimemError::Database(format!("Failed to create vec0 table: {}", e)))?;
            conn.execute(
                "CREATE TABLE IF NOT EXISTS memory_payloads (
                    memory_id TEXT PRIMARY KEY,
                    payload TEXT NOT NULL
                )",
                [],
            )
            .map_err(|e| UnimemError::Database(format!("Failed to create payload table: {}", e)))?;
            Ok(())
        })
        .await?;

        debug!("Vector tables ready");
        Ok(())
    }

    fn check_dimensions(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dimensions {
            return Err(UnimemError::VectorIndex(format!(
                "Embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            )));
        }
        Ok(())
    }

    /// Payload stored for `id`
    pub async fn payload(&self, id: &MemoryId) -> Result<Option<VectorPayload>> {
        let id = id.to_string();
        let raw: Option<String> = self
            .interact(move |conn| {
                conn.query_row(
                    "SELECT payload FROM memory_payloads WHERE memory_id = ?",
                    rusqlite::params![id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(|e| UnimemError::Database(format!("Failed to read payload: {}", e)))
            })
            .await?;

        raw.map(|json| serde_json::from_str(&json).map_err(UnimemError::from))
            .transpose()
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, id: &MemoryId, vector: Vec<f32>, payload: VectorPayload) -> Result<()> {
        self.check_dimensions(&vector)?;
        debug!("Storing vector for memory: {}", id);

        let id = id.to_string();
        let embedding_json = serde_json::to_string(&vector)?;
        let payload_json = serde_json::to_string(&payload)?;

        self.interact(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| UnimemError::Database(format!("Failed to begin transaction: {}", e)))?;

            // Virtual tables don't support INSERT OR REPLACE, so delete first
            tx.execute(
                "DELETE FROM memory_vectors WHERE memory_id = ?",
                rusqlite::params![&id],
            )
            .map_err(|e| UnimemError::Database(format!("Failed to delete existing vector: {}", e)))?;

            tx.execute(
                "INSERT INTO memory_vectors (memory_id, embedding) VALUES (?, vec_f32(?))",
                rusqlite::params![&id, &embedding_json],
            )
            .map_err(|e| UnimemError::Database(format!("Failed to store vector: {}", e)))?;

            tx.execute(
                "INSERT OR REPLACE INTO memory_payloads (memory_id, payload) VALUES (?, ?)",
                rusqlite::params![&id, &payload_json],
            )
            .map_err(|e| UnimemError::Database(format!("Failed to store payload: {}", e)))?;

            tx.commit()
                .map_err(|e| UnimemError::Database(format!("Failed to commit transaction: {}", e)))
        })
        .await
    }

    /// Similarity is reported as `1 - cosine distance`
    async fn search(&self, vector: &[f32], limit: usize) -> Result<Vec<(MemoryId, f32)>> {
        self.check_dimensions(vector)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let query_json = serde_json::to_string(vector)?;

        let results = self
            .interact(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT memory_id, distance
                         FROM memory_vectors
                         WHERE embedding MATCH vec_f32(?)
                         ORDER BY distance
                         LIMIT ?",
                    )
                    .map_err(|e| UnimemError::Database(format!("Failed to prepare search: {}", e)))?;

                let k = limit.min(MAX_KNN_LIMIT) as i64;
                let rows = stmt
                    .query_map(rusqlite::params![query_json, k], |row| {
                        let id: String = row.get(0)?;
                        let distance: f32 = row.get(1)?;
                        Ok((MemoryId::from(id), 1.0 - distance))
                    })
                    .and_then(|mapped| mapped.collect::<rusqlite::Result<Vec<_>>>())
                    .map_err(|e| {
                        UnimemError::Database(format!("Failed to execute vector search: {}", e))
                    })?;
                Ok(rows)
            })
            .await?;

        debug!("Vector search returned {} results", results.len());
        Ok(results)
    }

    async fn delete(&self, ids: &[MemoryId]) -> Result<()> {
        let ids: Vec<String> = ids.iter().map(|id| id.to_string()).collect();

        self.interact(move |conn| {
            let tx = conn
                .transaction()
                .map_err(|e| UnimemError::Database(format!("Failed to begin transaction: {}", e)))?;
            for id in &ids {
                tx.execute(
                    "DELETE FROM memory_vectors WHERE memory_id = ?",
                    rusqlite::params![id],
                )
                .map_err(|e| UnimemError::Database(format!("Failed to delete vector: {}", e)))?;
                tx.execute(
                    "DELETE FROM memory_payloads WHERE memory_id = ?",
                    rusqlite::params![id],
                )
                .map_err(|e| UnimemError::Database(format!("Failed to delete payload: {}", e)))?;
            }
            tx.commit()
                .map_err(|e| UnimemError::Database(format!("Failed to commit transaction: {}", e)))
        })
        .await
    }

    async fn len(&self) -> Result<usize> {
        self.interact(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM memory_vectors", [], |row| row.get(0))
                .map_err(|e| UnimemError::Database(format!("Failed to count vectors: {}", e)))?;
            Ok(count as usize)
        })
        .await
    }
}
