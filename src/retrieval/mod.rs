//! Retrieval module - hybrid search over the ingested corpus
//!
//! - Store: SQLite-backed chunk persistence (ordered, 0-based ids)
//! - Sparse: in-memory Okapi BM25 keyword ranking
//! - Dense: LanceDB ANN vector search (external collaborator contract)
//! - Hybrid: weighted merge of both rankings + metadata filtering

mod dense;
mod filter;
mod hybrid;
mod lance;
mod sparse;
mod store;

// Re-exports
pub use dense::{
    distance_to_similarity, format_chunk_id, parse_chunk_id, DenseHit, DenseIndex,
};
pub use filter::MetadataFilter;
pub use hybrid::{HybridRetriever, RetrievalError, RetrievalResult, RetrieverConfig};
pub use lance::{DenseEntry, LanceDenseIndex};
pub use sparse::{tokenize, ScoreMap, SparseIndex};
pub use store::{get_data_dir, Chunk, ChunkStore, NewChunk, StoreStats};
