//! Chunk Store - SQLite-backed persistent chunk storage
//!
//! Holds the ordered corpus of document chunks produced by ingestion.
//! Chunk ids are 0-based, assigned at insert time, and stable for the
//! lifetime of the corpus. Storage location: ~/.bankrag/chunks.db

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OpenFlags};
use serde::{Deserialize, Serialize};

// ============================================================================
// Data Directory
// ============================================================================

/// Data directory path (~/.bankrag/)
pub fn get_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".bankrag")
}

// ============================================================================
// Types
// ============================================================================

/// A stored document chunk, the unit of retrieval.
///
/// Immutable once created. The id doubles as the chunk's position in the
/// ordered corpus and is the join key between the sparse and dense indices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub content: String,
    pub source: String,
    pub regulator: String,
    pub jurisdiction: String,
    pub ingested_at: DateTime<Utc>,
}

/// Input form of a chunk, before an id is assigned
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub content: String,
    pub source: String,
    pub regulator: String,
    pub jurisdiction: String,
}

/// Store statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub chunk_count: usize,
    pub total_content_bytes: usize,
    pub chunks_by_source: BTreeMap<String, usize>,
    pub chunks_by_regulator: BTreeMap<String, usize>,
    pub db_path: PathBuf,
}

// ============================================================================
// ChunkStore
// ============================================================================

/// Chunk Store - synchronous chunk persistence
///
/// SQLite-backed storage for the ingested corpus. Read-only during
/// retrieval; written only by the ingestion pipeline.
pub struct ChunkStore {
    conn: Arc<Mutex<Connection>>,
    db_path: PathBuf,
}

impl ChunkStore {
    /// Open the store (created if missing)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent)
                    .context("Failed to create database directory")?;
            }
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .context("Failed to open SQLite database")?;

        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
            db_path: path.to_path_buf(),
        };

        store.initialize()?;
        Ok(store)
    }

    /// Open at the default location (~/.bankrag/chunks.db)
    pub fn open_default() -> Result<Self> {
        let data_dir = get_data_dir();
        if !data_dir.exists() {
            std::fs::create_dir_all(&data_dir)
                .context("Failed to create data directory")?;
        }

        let db_path = data_dir.join("chunks.db");
        Self::open(&db_path)
    }

    /// Database file path
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Initialize the schema
    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        // Chunk ids are positional: AUTOINCREMENT starts at 1, so ids are
        // stored as-is and the 0-based position is id itself (we insert
        // explicit ids).
        conn.execute(
            "CREATE TABLE IF NOT EXISTS chunks (
                id INTEGER PRIMARY KEY,
                content TEXT NOT NULL,
                source TEXT NOT NULL,
                regulator TEXT NOT NULL,
                jurisdiction TEXT NOT NULL,
                created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )
        .context("Failed to create chunks table")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_source ON chunks(source)",
            [],
        )
        .context("Failed to create source index")?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_chunks_regulator ON chunks(regulator)",
            [],
        )
        .context("Failed to create regulator index")?;

        tracing::debug!("Chunk store initialized at {:?}", self.db_path);
        Ok(())
    }

    /// Number of stored chunks
    pub fn count(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .context("Failed to count chunks")?;

        Ok(count as usize)
    }

    /// Append a batch of chunks, assigning sequential 0-based ids
    ///
    /// Ids continue from the current chunk count, so repeated ingestion
    /// runs extend the corpus without renumbering existing chunks.
    ///
    /// # Returns
    /// The ids assigned to the new chunks, in input order.
    pub fn add_chunks(&self, new_chunks: &[NewChunk]) -> Result<Vec<i64>> {
        if new_chunks.is_empty() {
            return Ok(vec![]);
        }

        let mut conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let next_id: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .context("Failed to read chunk count")?;

        let now = Utc::now().to_rfc3339();
        let tx = conn.transaction().context("Failed to start transaction")?;

        let mut ids = Vec::with_capacity(new_chunks.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO chunks (id, content, source, regulator, jurisdiction, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?;

            for (offset, chunk) in new_chunks.iter().enumerate() {
                let id = next_id + offset as i64;
                stmt.execute(params![
                    id,
                    chunk.content,
                    chunk.source,
                    chunk.regulator,
                    chunk.jurisdiction,
                    now,
                ])
                .context("Failed to insert chunk")?;
                ids.push(id);
            }
        }

        tx.commit().context("Failed to commit chunks")?;

        tracing::info!("Stored {} chunks (ids {}..={})", ids.len(), ids[0], ids[ids.len() - 1]);
        Ok(ids)
    }

    /// Load the full corpus, ordered by id
    ///
    /// The returned vector's positions match the chunk ids; the retrieval
    /// core relies on this to resolve sub-index ids without further lookups.
    pub fn load_all(&self) -> Result<Vec<Chunk>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, content, source, regulator, jurisdiction, created_at
             FROM chunks ORDER BY id ASC",
        )?;

        let chunks = stmt
            .query_map([], |row| {
                Ok(Chunk {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    source: row.get(2)?,
                    regulator: row.get(3)?,
                    jurisdiction: row.get(4)?,
                    ingested_at: parse_datetime(row.get::<_, String>(5)?),
                })
            })?
            .filter_map(|r| r.ok())
            .collect();

        Ok(chunks)
    }

    /// Fetch a single chunk by id
    pub fn get_chunk(&self, id: i64) -> Result<Option<Chunk>> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT id, content, source, regulator, jurisdiction, created_at
             FROM chunks WHERE id = ?1",
        )?;

        let chunk = stmt
            .query_row(params![id], |row| {
                Ok(Chunk {
                    id: row.get(0)?,
                    content: row.get(1)?,
                    source: row.get(2)?,
                    regulator: row.get(3)?,
                    jurisdiction: row.get(4)?,
                    ingested_at: parse_datetime(row.get::<_, String>(5)?),
                })
            })
            .ok();

        Ok(chunk)
    }

    /// Store statistics with per-source and per-regulator breakdowns
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM chunks", [], |row| row.get(0))
            .unwrap_or(0);

        let total_size: i64 = conn
            .query_row(
                "SELECT COALESCE(SUM(LENGTH(content)), 0) FROM chunks",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        let mut chunks_by_source = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT source, COUNT(*) FROM chunks GROUP BY source")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows.filter_map(|r| r.ok()) {
            chunks_by_source.insert(row.0, row.1 as usize);
        }

        let mut chunks_by_regulator = BTreeMap::new();
        let mut stmt = conn.prepare("SELECT regulator, COUNT(*) FROM chunks GROUP BY regulator")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows.filter_map(|r| r.ok()) {
            chunks_by_regulator.insert(row.0, row.1 as usize);
        }

        Ok(StoreStats {
            chunk_count: count as usize,
            total_content_bytes: total_size as usize,
            chunks_by_source,
            chunks_by_regulator,
            db_path: self.db_path.clone(),
        })
    }

    /// Remove all chunks (full re-ingestion)
    pub fn clear(&self) -> Result<usize> {
        let conn = self.conn.lock().map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;

        let removed = conn
            .execute("DELETE FROM chunks", [])
            .context("Failed to clear chunks")?;

        tracing::info!("Cleared {} chunks from store", removed);
        Ok(removed)
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse an RFC3339 string into DateTime<Utc>
fn parse_datetime(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_store() -> (TempDir, ChunkStore) {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("test.db");
        let store = ChunkStore::open(&db_path).unwrap();
        (dir, store)
    }

    fn new_chunk(content: &str, source: &str, regulator: &str) -> NewChunk {
        NewChunk {
            content: content.to_string(),
            source: source.to_string(),
            regulator: regulator.to_string(),
            jurisdiction: "International".to_string(),
        }
    }

    #[test]
    fn test_add_chunks_assigns_sequential_ids() {
        let (_dir, store) = create_test_store();

        let ids = store
            .add_chunks(&[
                new_chunk("chunk a", "basel.pdf", "Basel Committee"),
                new_chunk("chunk b", "basel.pdf", "Basel Committee"),
            ])
            .unwrap();
        assert_eq!(ids, vec![0, 1]);

        // A later batch continues from the existing count
        let ids = store
            .add_chunks(&[new_chunk("chunk c", "fatf.pdf", "FATF")])
            .unwrap();
        assert_eq!(ids, vec![2]);
        assert_eq!(store.count().unwrap(), 3);
    }

    #[test]
    fn test_load_all_is_ordered_by_id() {
        let (_dir, store) = create_test_store();

        store
            .add_chunks(&[
                new_chunk("first", "a.pdf", "FATF"),
                new_chunk("second", "a.pdf", "FATF"),
                new_chunk("third", "b.pdf", "Basel Committee"),
            ])
            .unwrap();

        let chunks = store.load_all().unwrap();
        assert_eq!(chunks.len(), 3);
        for (pos, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id, pos as i64);
        }
        assert_eq!(chunks[0].content, "first");
        assert_eq!(chunks[2].source, "b.pdf");
    }

    #[test]
    fn test_get_chunk() {
        let (_dir, store) = create_test_store();

        store
            .add_chunks(&[new_chunk("only one", "rbi.pdf", "Reserve Bank of India")])
            .unwrap();

        let chunk = store.get_chunk(0).unwrap();
        assert!(chunk.is_some());
        assert_eq!(chunk.unwrap().regulator, "Reserve Bank of India");

        assert!(store.get_chunk(99).unwrap().is_none());
    }

    #[test]
    fn test_stats_breakdowns() {
        let (_dir, store) = create_test_store();

        store
            .add_chunks(&[
                new_chunk("1234567890", "a.pdf", "FATF"),
                new_chunk("12345", "a.pdf", "FATF"),
                new_chunk("123", "b.pdf", "Basel Committee"),
            ])
            .unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.chunk_count, 3);
        assert_eq!(stats.total_content_bytes, 18);
        assert_eq!(stats.chunks_by_source.get("a.pdf"), Some(&2));
        assert_eq!(stats.chunks_by_regulator.get("Basel Committee"), Some(&1));
    }

    #[test]
    fn test_clear() {
        let (_dir, store) = create_test_store();

        store
            .add_chunks(&[new_chunk("x", "a.pdf", "FATF")])
            .unwrap();
        assert_eq!(store.count().unwrap(), 1);

        let removed = store.clear().unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count().unwrap(), 0);

        // Ids restart from 0 after clear
        let ids = store
            .add_chunks(&[new_chunk("y", "b.pdf", "FATF")])
            .unwrap();
        assert_eq!(ids, vec![0]);
    }

    #[test]
    fn test_empty_batch() {
        let (_dir, store) = create_test_store();
        let ids = store.add_chunks(&[]).unwrap();
        assert!(ids.is_empty());
    }
}
