//! Hybrid Scorer - weighted merge of dense and sparse rankings
//!
//! Combines the dense (embedding similarity) and sparse (BM25) candidate
//! sets into one ranked list: `combined = alpha * dense + (1 - alpha) * sparse`,
//! then applies optional metadata filtering and truncates to the requested
//! size. The retriever is an explicit context object built once at startup;
//! it holds only read-only state and can serve concurrent queries.

use std::time::Duration;

use anyhow::Result;
use serde::Serialize;
use thiserror::Error;

use super::dense::{distance_to_similarity, resolve_chunk_id, DenseIndex};
use super::filter::MetadataFilter;
use super::sparse::{ScoreMap, SparseIndex};
use super::store::Chunk;

// ============================================================================
// Types
// ============================================================================

/// Dense-index failure surfaced to the caller
///
/// Data-shape problems inside the scorer degrade to empty or reduced
/// results; only the external dense-index boundary produces a typed error,
/// so callers can fall back to sparse-only search.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("dense index unavailable: {0}")]
    Unavailable(String),

    #[error("dense index query timed out after {0:?}")]
    Timeout(Duration),
}

/// One ranked retrieval result, produced per query and never persisted
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub content: String,
    pub source: String,
    pub regulator: String,
    pub jurisdiction: String,
    pub score: f64,
    pub chunk_id: i64,
}

/// Hybrid scoring configuration
#[derive(Debug, Clone)]
pub struct RetrieverConfig {
    /// Dense weight in [0, 1]; sparse weight is `1 - alpha`
    pub alpha: f64,
    /// Candidates requested from each sub-index, never below `top_k`
    pub candidate_window: usize,
    /// Budget for the external dense-index call
    pub dense_timeout: Duration,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            candidate_window: 20,
            dense_timeout: Duration::from_secs(10),
        }
    }
}

impl RetrieverConfig {
    /// Default config with a specific mixing weight (clamped to [0, 1])
    pub fn with_alpha(alpha: f64) -> Self {
        Self {
            alpha: alpha.clamp(0.0, 1.0),
            ..Default::default()
        }
    }

    /// Candidate window for a query, widened when a filter is active
    ///
    /// Filtering happens after ranking, so a filtered query over the base
    /// window can come back empty even when matching chunks exist. A wider
    /// window keeps enough candidates alive to survive the filter.
    fn effective_window(&self, top_k: usize, filtered: bool) -> usize {
        if filtered {
            self.candidate_window.max(4 * top_k)
        } else {
            self.candidate_window.max(top_k)
        }
    }
}

// ============================================================================
// HybridRetriever
// ============================================================================

/// Hybrid retriever over the in-memory corpus
///
/// Owns the ordered chunk list, the BM25 index built from it, and the
/// dense-index client. All state is read-only during queries.
pub struct HybridRetriever {
    chunks: Vec<Chunk>,
    sparse: SparseIndex,
    dense: Box<dyn DenseIndex>,
    config: RetrieverConfig,
}

impl HybridRetriever {
    /// Build the retriever from an ordered chunk corpus
    ///
    /// Chunk positions must match their ids; the sparse index is built
    /// here, before any query is served.
    pub fn new(chunks: Vec<Chunk>, dense: Box<dyn DenseIndex>, config: RetrieverConfig) -> Self {
        let sparse = SparseIndex::build(
            &chunks.iter().map(|c| c.content.as_str()).collect::<Vec<_>>(),
        );

        tracing::info!(
            "Hybrid retriever ready: {} chunks, alpha={}, window={}",
            chunks.len(),
            config.alpha,
            config.candidate_window
        );

        Self {
            chunks,
            sparse,
            dense,
            config,
        }
    }

    /// Number of chunks in the corpus
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Active configuration
    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }

    /// Hybrid search: merged, filtered, truncated ranking
    ///
    /// Returns at most `top_k` results ordered by combined score. An empty
    /// corpus or `top_k == 0` yields an empty list, not an error. Failures
    /// of the dense index surface as [`RetrievalError`] and leave the
    /// sparse-only path available as a fallback.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<RetrievalResult>> {
        if top_k == 0 || self.chunks.is_empty() {
            return Ok(vec![]);
        }

        let window = self.config.effective_window(top_k, filter.is_some());

        let dense_scores = self.dense_scores(query, window).await?;
        let sparse_scores = self.sparse.top_scores(query, window);

        let combined = self.merge_scores(&dense_scores, &sparse_scores);
        Ok(self.rank_and_select(combined, top_k, filter))
    }

    /// Sparse-only search, the fallback when the dense index is down
    pub fn search_sparse(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<RetrievalResult> {
        if top_k == 0 || self.chunks.is_empty() {
            return vec![];
        }

        let window = self.config.effective_window(top_k, filter.is_some());
        let scores = self.sparse.top_scores(query, window);

        let combined = scores.into_iter().collect();
        self.rank_and_select(combined, top_k, filter)
    }

    /// Query the dense index under the configured timeout
    async fn dense_scores(&self, query: &str, window: usize) -> Result<ScoreMap> {
        let hits = tokio::time::timeout(self.config.dense_timeout, self.dense.query(query, window))
            .await
            .map_err(|_| RetrievalError::Timeout(self.config.dense_timeout))?
            .map_err(|e| RetrievalError::Unavailable(e.to_string()))?;

        let mut scores = ScoreMap::with_capacity(hits.len());
        for (position, hit) in hits.iter().enumerate() {
            let chunk_id = resolve_chunk_id(hit, position);
            // Nearest-first ordering: keep the closest hit per chunk
            scores
                .entry(chunk_id)
                .or_insert_with(|| distance_to_similarity(hit.distance));
        }

        Ok(scores)
    }

    /// Weighted union of the two score maps, with defensive bound checks
    fn merge_scores(&self, dense: &ScoreMap, sparse: &ScoreMap) -> Vec<(i64, f64)> {
        let alpha = self.config.alpha;
        let chunk_count = self.chunks.len() as i64;

        let mut ids: Vec<i64> = dense.keys().chain(sparse.keys()).copied().collect();
        ids.sort_unstable();
        ids.dedup();

        let mut combined = Vec::with_capacity(ids.len());
        for id in ids {
            if id < 0 || id >= chunk_count {
                tracing::warn!("Dropping out-of-range chunk id {} from sub-index", id);
                continue;
            }

            let d = dense.get(&id).copied().unwrap_or(0.0);
            let s = sparse.get(&id).copied().unwrap_or(0.0);
            combined.push((id, alpha * d + (1.0 - alpha) * s));
        }

        combined
    }

    /// Sort, filter after ranking, truncate, and resolve chunks
    fn rank_and_select(
        &self,
        mut combined: Vec<(i64, f64)>,
        top_k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Vec<RetrievalResult> {
        // Score descending, chunk id ascending on ties
        combined.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        // Filter after ranking, before truncation: filtered-out candidates
        // are not replaced, so the result may hold fewer than top_k entries.
        if let Some(filter) = filter {
            combined.retain(|&(id, _)| filter.matches(&self.chunks[id as usize]));
        }

        combined.truncate(top_k);

        combined
            .into_iter()
            .map(|(id, score)| {
                let chunk = &self.chunks[id as usize];
                RetrievalResult {
                    content: chunk.content.clone(),
                    source: chunk.source.clone(),
                    regulator: chunk.regulator.clone(),
                    jurisdiction: chunk.jurisdiction.clone(),
                    score,
                    chunk_id: id,
                }
            })
            .collect()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::dense::DenseHit;
    use anyhow::anyhow;
    use async_trait::async_trait;
    use chrono::Utc;

    /// Dense stub replaying a fixed hit list regardless of the query
    struct ScriptedDense {
        hits: Vec<DenseHit>,
    }

    #[async_trait]
    impl DenseIndex for ScriptedDense {
        async fn query(&self, _text: &str, n: usize) -> Result<Vec<DenseHit>> {
            Ok(self.hits.iter().take(n).cloned().collect())
        }

        async fn count(&self) -> Result<usize> {
            Ok(self.hits.len())
        }
    }

    struct FailingDense;

    #[async_trait]
    impl DenseIndex for FailingDense {
        async fn query(&self, _text: &str, _n: usize) -> Result<Vec<DenseHit>> {
            Err(anyhow!("connection refused"))
        }

        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    struct SlowDense;

    #[async_trait]
    impl DenseIndex for SlowDense {
        async fn query(&self, _text: &str, _n: usize) -> Result<Vec<DenseHit>> {
            tokio::time::sleep(Duration::from_millis(250)).await;
            Ok(vec![])
        }

        async fn count(&self) -> Result<usize> {
            Ok(0)
        }
    }

    fn chunk(id: i64, content: &str, source: &str, regulator: &str, jurisdiction: &str) -> Chunk {
        Chunk {
            id,
            content: content.to_string(),
            source: source.to_string(),
            regulator: regulator.to_string(),
            jurisdiction: jurisdiction.to_string(),
            ingested_at: Utc::now(),
        }
    }

    fn banking_corpus() -> Vec<Chunk> {
        vec![
            chunk(
                0,
                "capital adequacy ratio CET1 Basel III minimum 4.5%",
                "basel_iii.pdf",
                "Basel Committee",
                "International",
            ),
            chunk(1, "KYC customer due diligence", "rbi_kyc.pdf", "RBI", "India"),
            chunk(
                2,
                "suspicious transaction reporting AML",
                "rbi_aml.pdf",
                "RBI",
                "India",
            ),
        ]
    }

    fn hit(id: &str, chunk_id: Option<i64>, distance: f32) -> DenseHit {
        DenseHit {
            id: id.to_string(),
            chunk_id,
            distance,
        }
    }

    fn scripted_hits() -> Vec<DenseHit> {
        vec![
            hit("rbi_kyc.pdf::chunk_1", Some(1), 0.4),
            hit("basel_iii.pdf::chunk_0", Some(0), 0.6),
            hit("rbi_aml.pdf::chunk_2", Some(2), 1.2),
        ]
    }

    fn retriever(config: RetrieverConfig) -> HybridRetriever {
        HybridRetriever::new(
            banking_corpus(),
            Box::new(ScriptedDense {
                hits: scripted_hits(),
            }),
            config,
        )
    }

    #[tokio::test]
    async fn test_determinism() {
        let r = retriever(RetrieverConfig::default());

        let a = r.search("CET1 capital ratio", 3, None).await.unwrap();
        let b = r.search("CET1 capital ratio", 3, None).await.unwrap();

        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(&b) {
            assert_eq!(x.chunk_id, y.chunk_id);
            assert!((x.score - y.score).abs() < 1e-12);
        }
    }

    #[tokio::test]
    async fn test_keyword_overlap_dominates() {
        let r = retriever(RetrieverConfig::default());

        let results = r.search("CET1 capital ratio", 1, None).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].chunk_id, 0);
        assert_eq!(results[0].regulator, "Basel Committee");
    }

    #[tokio::test]
    async fn test_filter_excludes_top_candidate() {
        let r = retriever(RetrieverConfig::default());
        let filter = MetadataFilter::by_regulator("RBI");

        let results = r.search("CET1 capital ratio", 3, Some(&filter)).await.unwrap();
        assert!(!results.is_empty());
        for result in &results {
            assert_eq!(result.regulator, "RBI");
            assert_ne!(result.chunk_id, 0);
        }
    }

    #[tokio::test]
    async fn test_filter_no_match_yields_empty() {
        let r = retriever(RetrieverConfig::default());
        let filter = MetadataFilter::by_regulator("No Such Regulator");

        let results = r.search("capital", 3, Some(&filter)).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_truncation_is_prefix_consistent() {
        let r = retriever(RetrieverConfig::default());

        let full = r.search("capital KYC reporting", 3, None).await.unwrap();
        let short = r.search("capital KYC reporting", 2, None).await.unwrap();

        assert_eq!(short.len(), 2);
        for (a, b) in short.iter().zip(&full) {
            assert_eq!(a.chunk_id, b.chunk_id);
        }
    }

    #[tokio::test]
    async fn test_score_bounds_with_normalized_inputs() {
        let r = retriever(RetrieverConfig::default());

        let results = r.search("capital adequacy", 3, None).await.unwrap();
        for result in &results {
            assert!((0.0..=1.0).contains(&result.score), "score {}", result.score);
        }
    }

    #[tokio::test]
    async fn test_empty_corpus_returns_empty() {
        let r = HybridRetriever::new(
            vec![],
            Box::new(ScriptedDense { hits: vec![] }),
            RetrieverConfig::default(),
        );

        let results = r.search("anything", 5, None).await.unwrap();
        assert!(results.is_empty());
        assert!(r.search_sparse("anything", 5, None).is_empty());
    }

    #[tokio::test]
    async fn test_top_k_zero_returns_empty() {
        let r = retriever(RetrieverConfig::default());
        let results = r.search("capital", 0, None).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_alpha_one_reproduces_dense_order() {
        let r = retriever(RetrieverConfig::with_alpha(1.0));

        let results = r.search("unrelated query text", 3, None).await.unwrap();
        let order: Vec<i64> = results.iter().map(|r| r.chunk_id).collect();

        // Scripted dense ranking: chunk 1 (d=0.4), chunk 0 (d=0.6), chunk 2 (d=1.2)
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[tokio::test]
    async fn test_alpha_zero_reproduces_sparse_order() {
        let r = retriever(RetrieverConfig::with_alpha(0.0));

        let results = r.search("CET1 capital ratio", 3, None).await.unwrap();
        let order: Vec<i64> = results.iter().map(|r| r.chunk_id).collect();

        // Only chunk 0 matches; the zero-score tie breaks by id ascending
        assert_eq!(order, vec![0, 1, 2]);
        assert!((results[0].score - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_out_of_range_ids_dropped() {
        let mut hits = scripted_hits();
        hits.push(hit("stale.pdf::chunk_99", Some(99), 0.01));

        let r = HybridRetriever::new(
            banking_corpus(),
            Box::new(ScriptedDense { hits }),
            RetrieverConfig::default(),
        );

        let results = r.search("capital", 5, None).await.unwrap();
        assert!(results.iter().all(|r| r.chunk_id < 3));
    }

    #[tokio::test]
    async fn test_legacy_string_id_resolution() {
        // Hits without a canonical id resolve through string parsing
        let hits = vec![
            hit("basel_iii.pdf::chunk_0", None, 0.3),
            hit("rbi_kyc.pdf::chunk_1", None, 0.9),
        ];

        let r = HybridRetriever::new(
            banking_corpus(),
            Box::new(ScriptedDense { hits }),
            RetrieverConfig::with_alpha(1.0),
        );

        let results = r.search("whatever", 2, None).await.unwrap();
        let order: Vec<i64> = results.iter().map(|r| r.chunk_id).collect();
        assert_eq!(order, vec![0, 1]);
    }

    #[tokio::test]
    async fn test_dense_failure_is_typed_and_sparse_fallback_works() {
        let r = HybridRetriever::new(
            banking_corpus(),
            Box::new(FailingDense),
            RetrieverConfig::default(),
        );

        let err = r.search("capital", 3, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RetrievalError>(),
            Some(RetrievalError::Unavailable(_))
        ));

        let fallback = r.search_sparse("CET1 capital ratio", 1, None);
        assert_eq!(fallback.len(), 1);
        assert_eq!(fallback[0].chunk_id, 0);
    }

    #[tokio::test]
    async fn test_dense_timeout() {
        let config = RetrieverConfig {
            dense_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let r = HybridRetriever::new(banking_corpus(), Box::new(SlowDense), config);

        let err = r.search("capital", 3, None).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RetrievalError>(),
            Some(RetrievalError::Timeout(_))
        ));
    }

    #[test]
    fn test_effective_window_widens_under_filter() {
        let config = RetrieverConfig::default();
        assert_eq!(config.effective_window(3, false), 20);
        assert_eq!(config.effective_window(3, true), 20);
        assert_eq!(config.effective_window(10, true), 40);
        assert_eq!(config.effective_window(50, false), 50);
    }

    #[test]
    fn test_alpha_clamped() {
        assert_eq!(RetrieverConfig::with_alpha(1.5).alpha, 1.0);
        assert_eq!(RetrieverConfig::with_alpha(-0.2).alpha, 0.0);
    }
}
