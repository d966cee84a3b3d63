//! Text chunking
//!
//! Regulatory PDFs extract as flat prose with little reliable structure,
//! so chunking is a plain character sliding window with overlap. Window
//! boundaries are adjusted to UTF-8 character boundaries.

// ============================================================================
// Chunk Configuration
// ============================================================================

/// Chunking settings
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Window size in bytes
    pub chunk_size: usize,
    /// Overlap between consecutive windows in bytes
    pub overlap: usize,
    /// Windows whose trimmed text is at most this long are dropped
    pub min_characters: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1500,
            overlap: 200,
            min_characters: 100,
        }
    }
}

// ============================================================================
// Chunker Trait
// ============================================================================

/// Text chunking strategy
pub trait Chunker: Send + Sync {
    /// Split text into chunks
    fn chunk(&self, text: &str) -> Vec<String>;

    /// Chunker name
    fn name(&self) -> &'static str;
}

// ============================================================================
// SlidingWindowChunker
// ============================================================================

/// Character sliding window with overlap
pub struct SlidingWindowChunker {
    config: ChunkConfig,
}

impl SlidingWindowChunker {
    /// Create with the given settings
    pub fn new(config: ChunkConfig) -> Self {
        assert!(
            config.overlap < config.chunk_size,
            "overlap must be smaller than chunk_size"
        );
        Self { config }
    }

    /// Create with default settings
    pub fn with_defaults() -> Self {
        Self::new(ChunkConfig::default())
    }
}

impl Chunker for SlidingWindowChunker {
    fn chunk(&self, text: &str) -> Vec<String> {
        let mut chunks = Vec::new();
        let step = self.config.chunk_size - self.config.overlap;
        let mut start = 0;

        loop {
            let end = floor_char_boundary(text, start + self.config.chunk_size);
            let window = text[start..end].trim();

            if window.chars().count() > self.config.min_characters {
                chunks.push(window.to_string());
            }

            if end == text.len() {
                break;
            }

            // Advance to the next char boundary at or after start + step
            let mut next = start + step;
            while next < text.len() && !text.is_char_boundary(next) {
                next += 1;
            }
            if next <= start || next >= text.len() {
                break;
            }
            start = next;
        }

        chunks
    }

    fn name(&self) -> &'static str {
        "SlidingWindowChunker"
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Largest char boundary at or below `index`
#[inline]
fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        s.len()
    } else {
        let mut i = index;
        while i > 0 && !s.is_char_boundary(i) {
            i -= 1;
        }
        i
    }
}

// ============================================================================
// Factory Functions
// ============================================================================

/// Default chunker for PDF ingestion
pub fn default_chunker() -> Box<dyn Chunker> {
    Box::new(SlidingWindowChunker::with_defaults())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn small_chunker(chunk_size: usize, overlap: usize, min_characters: usize) -> SlidingWindowChunker {
        SlidingWindowChunker::new(ChunkConfig {
            chunk_size,
            overlap,
            min_characters,
        })
    }

    #[test]
    fn test_empty_text() {
        let chunker = SlidingWindowChunker::with_defaults();
        assert!(chunker.chunk("").is_empty());
    }

    #[test]
    fn test_short_text_below_minimum_dropped() {
        let chunker = SlidingWindowChunker::with_defaults();
        // Under the 100-char minimum: dropped entirely
        assert!(chunker.chunk("too short to index").is_empty());
    }

    #[test]
    fn test_single_window() {
        let chunker = small_chunker(100, 10, 5);
        let text = "the liquidity coverage ratio requires banks to hold liquid assets";
        let chunks = chunker.chunk(text);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], text);
    }

    #[test]
    fn test_windows_overlap() {
        let chunker = small_chunker(20, 5, 3);
        let text = "abcdefghij".repeat(5); // 50 chars
        let chunks = chunker.chunk(&text);

        assert!(chunks.len() > 1);
        // Step is 15, window 20: each window repeats the previous 5 chars
        let first_tail = &chunks[0][15..20];
        assert!(chunks[1].starts_with(first_tail));
    }

    #[test]
    fn test_utf8_boundaries_respected() {
        let chunker = small_chunker(10, 2, 1);
        let text = "규제 준수 문서 텍스트 분할 테스트".repeat(3);
        // Must not panic on multi-byte boundaries
        let chunks = chunker.chunk(&text);
        assert!(!chunks.is_empty());
    }

    #[test]
    fn test_default_config() {
        let config = ChunkConfig::default();
        assert_eq!(config.chunk_size, 1500);
        assert_eq!(config.overlap, 200);
        assert_eq!(config.min_characters, 100);
    }
}
