//! LanceDB Dense Index - ANN vector search over chunk embeddings
//!
//! Implements the [`DenseIndex`] contract on top of LanceDB. The canonical
//! integer chunk id is written as a column at ingestion time, so query hits
//! carry it directly and never depend on string-id parsing.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow_array::{
    Array, FixedSizeListArray, Float32Array, Int64Array, RecordBatch, RecordBatchIterator,
    StringArray,
};
use arrow_schema::{DataType, Field, Schema};
use async_trait::async_trait;
use lancedb::connection::Connection;
use lancedb::query::{ExecutableQuery, QueryBase};

use crate::embedding::EmbeddingProvider;

use super::dense::{format_chunk_id, DenseHit, DenseIndex};

/// Vector table name
const TABLE_NAME: &str = "chunk_vectors";

// ============================================================================
// Types
// ============================================================================

/// One vector row for insertion
#[derive(Debug, Clone)]
pub struct DenseEntry {
    /// Canonical chunk id (the chunk's position in the corpus)
    pub chunk_id: i64,
    /// Source filename the chunk came from
    pub source: String,
    /// Chunk embedding (document task type)
    pub embedding: Vec<f32>,
}

// ============================================================================
// LanceDenseIndex
// ============================================================================

/// LanceDB-backed dense index
///
/// Embeds query text through the configured provider and runs ANN search.
/// The connection supports concurrent read queries; retrieval never writes.
pub struct LanceDenseIndex {
    db: Connection,
    embedder: Arc<dyn EmbeddingProvider>,
    dimension: i32,
}

impl LanceDenseIndex {
    /// Open the index directory (created if missing)
    pub async fn open(path: &Path, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context("Failed to create LanceDB directory")?;
            }
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow::anyhow!("Invalid path encoding"))?;

        let db = lancedb::connect(path_str)
            .execute()
            .await
            .context("Failed to connect to LanceDB")?;

        let dimension = embedder.dimension() as i32;

        Ok(Self {
            db,
            embedder,
            dimension,
        })
    }

    /// Vector table schema
    fn create_schema(&self) -> Schema {
        Schema::new(vec![
            Field::new("chunk_id", DataType::Int64, false),
            Field::new("id", DataType::Utf8, false),
            Field::new("source", DataType::Utf8, false),
            Field::new(
                "embedding",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension,
                ),
                false,
            ),
        ])
    }

    /// Convert entries into an Arrow RecordBatch
    fn entries_to_batch(&self, entries: &[DenseEntry]) -> Result<RecordBatch> {
        if entries.is_empty() {
            anyhow::bail!("Cannot create batch from empty entries");
        }

        let chunk_ids: Vec<i64> = entries.iter().map(|e| e.chunk_id).collect();
        let ids: Vec<String> = entries
            .iter()
            .map(|e| format_chunk_id(&e.source, e.chunk_id))
            .collect();
        let sources: Vec<&str> = entries.iter().map(|e| e.source.as_str()).collect();

        let embeddings_flat: Vec<f32> = entries
            .iter()
            .flat_map(|e| e.embedding.iter().copied())
            .collect();

        let values = Float32Array::from(embeddings_flat);
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let embeddings_list = FixedSizeListArray::try_new(
            field,
            self.dimension,
            Arc::new(values) as Arc<dyn Array>,
            None,
        )
        .context("Failed to create embedding array")?;

        let batch = RecordBatch::try_new(
            Arc::new(self.create_schema()),
            vec![
                Arc::new(Int64Array::from(chunk_ids)),
                Arc::new(StringArray::from(ids)),
                Arc::new(StringArray::from(sources)),
                Arc::new(embeddings_list),
            ],
        )
        .context("Failed to create RecordBatch")?;

        Ok(batch)
    }

    /// Check whether the vector table exists
    async fn table_exists(&self) -> bool {
        self.db
            .table_names()
            .execute()
            .await
            .map(|names| names.contains(&TABLE_NAME.to_string()))
            .unwrap_or(false)
    }

    /// Insert a batch of vectors
    pub async fn insert_batch(&self, entries: &[DenseEntry]) -> Result<usize> {
        if entries.is_empty() {
            return Ok(0);
        }

        let batch = self.entries_to_batch(entries)?;
        let schema = batch.schema();

        if self.table_exists().await {
            let table = self
                .db
                .open_table(TABLE_NAME)
                .execute()
                .await
                .context("Failed to open table")?;

            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            table
                .add(batches)
                .execute()
                .await
                .context("Failed to add vectors to table")?;
        } else {
            let batches = RecordBatchIterator::new(vec![Ok(batch)], schema);
            self.db
                .create_table(TABLE_NAME, batches)
                .execute()
                .await
                .context("Failed to create table")?;
        }

        Ok(entries.len())
    }

    /// Drop all vectors (full re-ingestion)
    pub async fn clear(&self) -> Result<()> {
        if self.table_exists().await {
            self.db
                .drop_table(TABLE_NAME)
                .await
                .context("Failed to drop vector table")?;
            tracing::info!("Cleared dense index");
        }
        Ok(())
    }
}

#[async_trait]
impl DenseIndex for LanceDenseIndex {
    async fn query(&self, text: &str, n: usize) -> Result<Vec<DenseHit>> {
        if !self.table_exists().await {
            return Ok(vec![]);
        }

        let query_embedding = self
            .embedder
            .embed_query(text)
            .await
            .context("Failed to embed query")?;

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for search")?;

        let results = table
            .vector_search(query_embedding)
            .context("Failed to create vector search")?
            .limit(n)
            .execute()
            .await
            .context("Failed to execute vector search")?;

        use futures::TryStreamExt;
        let batches: Vec<RecordBatch> = results.try_collect().await?;

        let mut hits = Vec::new();

        for batch in batches {
            let chunk_ids = batch
                .column_by_name("chunk_id")
                .and_then(|c| c.as_any().downcast_ref::<Int64Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing chunk_id column"))?;

            let ids = batch
                .column_by_name("id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| anyhow::anyhow!("Missing id column"))?;

            // _distance is appended by LanceDB
            let distances = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>())
                .ok_or_else(|| anyhow::anyhow!("Missing _distance column"))?;

            for i in 0..batch.num_rows() {
                hits.push(DenseHit {
                    id: ids.value(i).to_string(),
                    chunk_id: Some(chunk_ids.value(i)),
                    distance: distances.value(i),
                });
            }
        }

        Ok(hits)
    }

    async fn count(&self) -> Result<usize> {
        if !self.table_exists().await {
            return Ok(0);
        }

        let table = self
            .db
            .open_table(TABLE_NAME)
            .execute()
            .await
            .context("Failed to open table for count")?;

        let count = table.count_rows(None).await.context("Failed to count rows")?;
        Ok(count)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const TEST_DIMENSION: usize = 768;

    /// Deterministic embedder: each text maps to a fixed direction
    struct TestEmbedder;

    #[async_trait]
    impl EmbeddingProvider for TestEmbedder {
        async fn embed_document(&self, text: &str) -> Result<Vec<f32>> {
            Ok(pseudo_embedding(text))
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(pseudo_embedding(text))
        }

        fn dimension(&self) -> usize {
            TEST_DIMENSION
        }

        fn name(&self) -> &str {
            "test-embedder"
        }
    }

    fn pseudo_embedding(text: &str) -> Vec<f32> {
        let mut v = vec![0.0_f32; TEST_DIMENSION];
        for (i, b) in text.bytes().enumerate() {
            v[(i + b as usize) % TEST_DIMENSION] += 1.0;
        }
        v
    }

    fn entry(chunk_id: i64, source: &str, text: &str) -> DenseEntry {
        DenseEntry {
            chunk_id,
            source: source.to_string(),
            embedding: pseudo_embedding(text),
        }
    }

    async fn open_test_index(dir: &TempDir) -> LanceDenseIndex {
        let path = dir.path().join("test.lance");
        LanceDenseIndex::open(&path, Arc::new(TestEmbedder))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_insert_and_count() {
        let dir = TempDir::new().unwrap();
        let index = open_test_index(&dir).await;

        assert_eq!(index.count().await.unwrap(), 0);

        let inserted = index
            .insert_batch(&[
                entry(0, "basel.pdf", "capital adequacy"),
                entry(1, "fatf.pdf", "customer due diligence"),
            ])
            .await
            .unwrap();
        assert_eq!(inserted, 2);
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_query_returns_canonical_ids() {
        let dir = TempDir::new().unwrap();
        let index = open_test_index(&dir).await;

        index
            .insert_batch(&[
                entry(0, "basel.pdf", "capital adequacy"),
                entry(1, "fatf.pdf", "customer due diligence"),
                entry(2, "rbi.pdf", "suspicious transactions"),
            ])
            .await
            .unwrap();

        let hits = index.query("capital adequacy", 2).await.unwrap();
        assert!(!hits.is_empty());
        assert!(hits.len() <= 2);

        for hit in &hits {
            assert!(hit.chunk_id.is_some());
            assert!(hit.id.contains("::chunk_"));
            assert!(hit.distance >= 0.0);
        }

        // An exact text match is the nearest neighbor
        assert_eq!(hits[0].chunk_id, Some(0));
    }

    #[tokio::test]
    async fn test_query_on_missing_table() {
        let dir = TempDir::new().unwrap();
        let index = open_test_index(&dir).await;

        let hits = index.query("anything", 5).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_clear() {
        let dir = TempDir::new().unwrap();
        let index = open_test_index(&dir).await;

        index
            .insert_batch(&[entry(0, "basel.pdf", "capital")])
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 1);

        index.clear().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
    }
}
