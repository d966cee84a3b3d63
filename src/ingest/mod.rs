//! Ingestion pipeline - PDFs to stored, embedded chunks
//!
//! Walks a directory of regulatory PDFs, extracts text, splits it into
//! overlapping chunks tagged with regulator/jurisdiction metadata, persists
//! the chunks, and writes their embeddings to the dense index. Runs as an
//! offline batch step; queries are only served against a completed corpus.

mod chunker;
mod pdf;

pub use chunker::{default_chunker, ChunkConfig, Chunker, SlidingWindowChunker};
pub use pdf::extract_text_from_pdf;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use walkdir::WalkDir;

use crate::embedding::EmbeddingProvider;
use crate::retrieval::{ChunkStore, DenseEntry, LanceDenseIndex, NewChunk};

// ============================================================================
// Regulator Detection
// ============================================================================

/// Infer (regulator, jurisdiction) from a PDF filename
///
/// The corpus convention encodes the issuing body in the filename; unknown
/// files are kept but tagged Unknown/Unknown.
pub fn detect_regulator(filename: &str) -> (&'static str, &'static str) {
    let f = filename.to_lowercase();
    if f.contains("rbi") {
        return ("Reserve Bank of India", "India");
    }
    if f.contains("fatf") {
        return ("FATF", "International");
    }
    if f.contains("basel") {
        return ("Basel Committee", "International");
    }
    if f.contains("uae") || f.contains("cbuae") {
        return ("UAE Central Bank", "UAE");
    }
    ("Unknown", "Unknown")
}

// ============================================================================
// Types
// ============================================================================

/// Outcome of an ingestion run
#[derive(Debug, Clone, Default)]
pub struct IngestStats {
    pub files_processed: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub chunks_created: usize,
}

// ============================================================================
// IngestPipeline
// ============================================================================

/// PDF ingestion pipeline
///
/// Writes to the chunk store and the dense index; the only component that
/// mutates them.
pub struct IngestPipeline {
    store: ChunkStore,
    dense: LanceDenseIndex,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Box<dyn Chunker>,
}

impl IngestPipeline {
    /// Assemble the pipeline from its collaborators
    pub fn new(
        store: ChunkStore,
        dense: LanceDenseIndex,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self {
            store,
            dense,
            embedder,
            chunker: default_chunker(),
        }
    }

    /// Ingest every PDF under a directory
    ///
    /// Files are processed in sorted order for reproducible chunk ids. A
    /// failing file is logged and skipped; the run continues.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<IngestStats> {
        let pdf_files = collect_pdfs(dir)?;

        if pdf_files.is_empty() {
            anyhow::bail!("No PDF files found under {:?}", dir);
        }

        tracing::info!("Found {} PDFs under {:?}", pdf_files.len(), dir);

        let mut stats = IngestStats::default();

        for (file_num, path) in pdf_files.iter().enumerate() {
            println!(
                "[{}/{}] {}",
                file_num + 1,
                pdf_files.len(),
                path.file_name().and_then(|n| n.to_str()).unwrap_or("?")
            );

            match self.ingest_file(path).await {
                Ok(0) => {
                    println!("    skipped: no extractable text");
                    stats.files_skipped += 1;
                }
                Ok(count) => {
                    println!("    {} chunks indexed", count);
                    stats.files_processed += 1;
                    stats.chunks_created += count;
                }
                Err(e) => {
                    tracing::warn!("Failed to ingest {:?}: {:#}", path, e);
                    println!("    failed: {}", e);
                    stats.files_failed += 1;
                }
            }
        }

        Ok(stats)
    }

    /// Ingest a single PDF; returns the number of chunks created
    pub async fn ingest_file(&self, path: &Path) -> Result<usize> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Invalid filename: {:?}", path))?;

        let (regulator, jurisdiction) = detect_regulator(filename);
        tracing::debug!("{}: regulator={}", filename, regulator);

        let pages = extract_text_from_pdf(path)?;
        let full_text = pages
            .into_iter()
            .map(|(_, text)| text)
            .collect::<Vec<_>>()
            .join("\n\n");

        if full_text.trim().len() < 100 {
            return Ok(0);
        }

        let texts = self.chunker.chunk(&full_text);
        if texts.is_empty() {
            return Ok(0);
        }

        let new_chunks: Vec<NewChunk> = texts
            .iter()
            .map(|content| NewChunk {
                content: content.clone(),
                source: filename.to_string(),
                regulator: regulator.to_string(),
                jurisdiction: jurisdiction.to_string(),
            })
            .collect();

        // Persist first so ids exist before vectors reference them
        let ids = self.store.add_chunks(&new_chunks)?;

        let mut entries = Vec::with_capacity(ids.len());
        for (chunk_id, content) in ids.iter().zip(&texts) {
            let embedding = self
                .embedder
                .embed_document(content)
                .await
                .with_context(|| format!("Failed to embed chunk {} of {}", chunk_id, filename))?;

            entries.push(DenseEntry {
                chunk_id: *chunk_id,
                source: filename.to_string(),
                embedding,
            });
        }

        self.dense
            .insert_batch(&entries)
            .await
            .context("Failed to insert vectors")?;

        tracing::info!("Ingested {}: {} chunks", filename, entries.len());
        Ok(entries.len())
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Collect PDF paths under a directory, sorted
fn collect_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        anyhow::bail!("Not a directory: {:?}", dir);
    }

    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                .unwrap_or(false)
        })
        .collect();

    files.sort();
    Ok(files)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_regulator() {
        assert_eq!(
            detect_regulator("RBI_KYC_Master_Direction.pdf"),
            ("Reserve Bank of India", "India")
        );
        assert_eq!(
            detect_regulator("fatf_40_recommendations.pdf"),
            ("FATF", "International")
        );
        assert_eq!(
            detect_regulator("Basel_III_LCR.pdf"),
            ("Basel Committee", "International")
        );
        assert_eq!(
            detect_regulator("cbuae_circular_2023.pdf"),
            ("UAE Central Bank", "UAE")
        );
        assert_eq!(detect_regulator("random_notes.pdf"), ("Unknown", "Unknown"));
    }

    #[test]
    fn test_collect_pdfs_sorted_and_filtered() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("b.pdf"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("a.PDF"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"text").unwrap();

        let files = collect_pdfs(dir.path()).unwrap();
        assert_eq!(files.len(), 2);
        assert!(files[0].file_name().unwrap().to_str().unwrap().starts_with('a'));
    }

    #[test]
    fn test_collect_pdfs_rejects_non_directory() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(collect_pdfs(file.path()).is_err());
    }
}
