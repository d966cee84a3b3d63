//! Dense Index - semantic ranking collaborator contract
//!
//! The dense index is an external service queried by text; it returns
//! nearest neighbors with distances. The canonical integer chunk id is
//! stored alongside each vector at ingestion time, so hits normally carry
//! it directly. Hits without one fall through a legacy resolution path
//! that parses the string id and, failing that, uses the list position.

use anyhow::Result;
use async_trait::async_trait;

/// A single nearest-neighbor hit, nearest first in the returned list
#[derive(Debug, Clone)]
pub struct DenseHit {
    /// String identifier, `"<source>::chunk_<id>"` for locally built indexes
    pub id: String,
    /// Canonical chunk id, present when the index stores it as metadata
    pub chunk_id: Option<i64>,
    /// Raw distance, smaller is closer
    pub distance: f32,
}

/// Dense (vector) index contract
///
/// Implementations must be safe for concurrent read queries; retrieval
/// never mutates the index.
#[async_trait]
pub trait DenseIndex: Send + Sync {
    /// Query by text, returning at most `n` hits ordered nearest first
    async fn query(&self, text: &str, n: usize) -> Result<Vec<DenseHit>>;

    /// Number of indexed vectors
    async fn count(&self) -> Result<usize>;
}

// ============================================================================
// Score & Id Helpers
// ============================================================================

/// Convert a distance to a similarity score in (0, 1]
///
/// Monotonically decreasing in distance; a distance of zero maps to 1.0.
pub fn distance_to_similarity(distance: f32) -> f64 {
    1.0 / (1.0 + f64::from(distance))
}

/// Resolve a hit to a chunk id
///
/// Preference order: the canonical id carried by the hit, then the parsed
/// string id, then the hit's position in the result list. The positional
/// fallback only exists for legacy indexes whose id scheme we cannot parse;
/// it is logged because it can silently point at the wrong chunk.
pub fn resolve_chunk_id(hit: &DenseHit, position: usize) -> i64 {
    if let Some(chunk_id) = hit.chunk_id {
        return chunk_id;
    }

    if let Some(parsed) = parse_chunk_id(&hit.id) {
        return parsed;
    }

    tracing::warn!(
        "Unparsable dense hit id '{}', falling back to list position {}",
        hit.id,
        position
    );
    position as i64
}

/// Parse a chunk id out of a string identifier
///
/// Accepts `"<source>::chunk_<n>"` and bare `"chunk_<n>"` / `"..._<n>"`
/// forms produced by the ingestion pipeline.
pub fn parse_chunk_id(id: &str) -> Option<i64> {
    if let Some((_, suffix)) = id.split_once("::chunk_") {
        return suffix.parse().ok();
    }

    if id.contains("chunk_") {
        return id.rsplit('_').next().and_then(|s| s.parse().ok());
    }

    None
}

/// Build the canonical string identifier for a chunk
pub fn format_chunk_id(source: &str, chunk_id: i64) -> String {
    format!("{}::chunk_{}", source, chunk_id)
}

// ============================================================================
// Tests
// ============================================================================
