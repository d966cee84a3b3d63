//! Sparse Index - in-memory Okapi BM25 keyword ranking
//!
//! Built once from the ordered chunk texts at startup; read-only afterwards.
//! Tokenization is deliberately minimal: lowercase + whitespace split, no
//! stemming and no stopword removal, applied identically to corpus and query.

use std::collections::HashMap;

/// BM25 term-frequency saturation
const K1: f64 = 1.5;
/// BM25 length normalization
const B: f64 = 0.75;
/// Floor for negative idf values, as a fraction of the mean idf
const EPSILON: f64 = 0.25;

/// Map from chunk id to normalized relevance score, rebuilt per query
pub type ScoreMap = HashMap<i64, f64>;

/// Lowercase + whitespace tokenization, shared by corpus and query
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

// ============================================================================
// SparseIndex
// ============================================================================

/// Okapi BM25 index over the full chunk corpus
///
/// Scores are deterministic: the same query against the same corpus always
/// produces the same score vector.
pub struct SparseIndex {
    /// Per-document term frequencies, positions matching chunk ids
    doc_freqs: Vec<HashMap<String, usize>>,
    /// Per-document token counts
    doc_lens: Vec<usize>,
    /// Inverse document frequency per term, with negative values floored
    idf: HashMap<String, f64>,
    avg_doc_len: f64,
}

impl SparseIndex {
    /// Build the index from the ordered chunk texts
    pub fn build<S: AsRef<str>>(texts: &[S]) -> Self {
        let mut doc_freqs = Vec::with_capacity(texts.len());
        let mut doc_lens = Vec::with_capacity(texts.len());
        let mut term_doc_count: HashMap<String, usize> = HashMap::new();

        for text in texts {
            let tokens = tokenize(text.as_ref());
            doc_lens.push(tokens.len());

            let mut freqs: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *freqs.entry(token).or_insert(0) += 1;
            }
            for term in freqs.keys() {
                *term_doc_count.entry(term.clone()).or_insert(0) += 1;
            }
            doc_freqs.push(freqs);
        }

        let doc_count = doc_freqs.len();
        let total_len: usize = doc_lens.iter().sum();
        let avg_doc_len = if doc_count > 0 {
            total_len as f64 / doc_count as f64
        } else {
            0.0
        };

        let idf = compute_idf(&term_doc_count, doc_count);

        tracing::debug!(
            "Built BM25 index: {} chunks, {} terms, avg length {:.1}",
            doc_count,
            idf.len(),
            avg_doc_len
        );

        Self {
            doc_freqs,
            doc_lens,
            idf,
            avg_doc_len,
        }
    }

    /// Number of indexed chunks
    pub fn len(&self) -> usize {
        self.doc_freqs.len()
    }

    /// True when no chunks are indexed
    pub fn is_empty(&self) -> bool {
        self.doc_freqs.is_empty()
    }

    /// Raw BM25 score of the query against every chunk (corpus-wide vector)
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let query_tokens = tokenize(query);
        let mut scores = vec![0.0; self.doc_freqs.len()];

        for token in &query_tokens {
            let Some(&idf) = self.idf.get(token) else {
                continue;
            };

            for (doc_id, freqs) in self.doc_freqs.iter().enumerate() {
                let tf = *freqs.get(token).unwrap_or(&0) as f64;
                if tf == 0.0 {
                    continue;
                }

                let dl = self.doc_lens[doc_id] as f64;
                let norm = K1 * (1.0 - B + B * dl / self.avg_doc_len);
                scores[doc_id] += idf * tf * (K1 + 1.0) / (tf + norm);
            }
        }

        scores
    }

    /// Top-k chunk ids with scores normalized by the corpus-wide maximum
    ///
    /// Normalization divides by the per-query maximum over the whole score
    /// vector, keeping the sparse scale stable across queries. A zero
    /// maximum divides by one instead, leaving all scores at zero.
    pub fn top_scores(&self, query: &str, top_k: usize) -> ScoreMap {
        if top_k == 0 || self.is_empty() {
            return ScoreMap::new();
        }

        let raw = self.scores(query);

        let max_score = raw.iter().cloned().fold(0.0_f64, f64::max);
        let divisor = if max_score > 0.0 { max_score } else { 1.0 };

        let mut ranked: Vec<(i64, f64)> = raw
            .iter()
            .enumerate()
            .map(|(id, &score)| (id as i64, score))
            .collect();

        // Score descending, chunk id ascending on ties
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        ranked
            .into_iter()
            .take(top_k)
            .map(|(id, score)| (id, score / divisor))
            .collect()
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Probabilistic idf with the Okapi negative-value floor
///
/// idf(t) = ln((N - df + 0.5) / (df + 0.5)); terms occurring in more than
/// half the corpus go negative and are floored to EPSILON * mean idf.
fn compute_idf(term_doc_count: &HashMap<String, usize>, doc_count: usize) -> HashMap<String, f64> {
    let mut idf = HashMap::with_capacity(term_doc_count.len());
    let mut idf_sum = 0.0;
    let mut negative_terms: Vec<&String> = Vec::new();

    for (term, &df) in term_doc_count {
        let value =
            ((doc_count as f64 - df as f64 + 0.5) / (df as f64 + 0.5)).ln();
        idf_sum += value;
        if value < 0.0 {
            negative_terms.push(term);
        }
        idf.insert(term.clone(), value);
    }

    if !idf.is_empty() {
        let floor = EPSILON * (idf_sum / idf.len() as f64);
        for term in negative_terms {
            idf.insert(term.clone(), floor);
        }
    }

    idf
}

// ============================================================================
// Tests
// ============================================================================
