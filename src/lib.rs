//! bankrag - hybrid retrieval QA over banking regulations
//!
//! Combines LanceDB vector search with in-memory BM25 keyword ranking
//! over a corpus of regulatory PDF chunks, and synthesizes cited answers
//! through a hosted LLM.

pub mod answer;
pub mod cli;
pub mod embedding;
pub mod ingest;
pub mod retrieval;

// Re-exports
pub use answer::{AnswerSynthesizer, RagAnswer, SourceCitation};
pub use embedding::{get_api_key, has_api_key, EmbeddingProvider, GeminiEmbedding};
pub use ingest::{
    default_chunker, detect_regulator, ChunkConfig, Chunker, IngestPipeline, IngestStats,
    SlidingWindowChunker,
};
pub use retrieval::{
    get_data_dir, Chunk, ChunkStore, DenseEntry, DenseHit, DenseIndex, HybridRetriever,
    LanceDenseIndex, MetadataFilter, NewChunk, RetrievalError, RetrievalResult, RetrieverConfig,
    SparseIndex, StoreStats,
};
