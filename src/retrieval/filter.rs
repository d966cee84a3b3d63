//! Metadata Filter - typed exact-match constraints on chunk metadata
//!
//! A closed set of filterable fields (source, regulator, jurisdiction)
//! instead of an open key/value map, so a mistyped field name is a compile
//! error rather than a filter that silently matches nothing.

use super::store::Chunk;

/// Exact-match metadata constraint, AND semantics across set fields.
///
/// An empty filter matches every chunk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataFilter {
    pub source: Option<String>,
    pub regulator: Option<String>,
    pub jurisdiction: Option<String>,
}

impl MetadataFilter {
    /// Filter by source filename
    pub fn by_source(source: impl Into<String>) -> Self {
        Self {
            source: Some(source.into()),
            ..Default::default()
        }
    }

    /// Filter by regulator name
    pub fn by_regulator(regulator: impl Into<String>) -> Self {
        Self {
            regulator: Some(regulator.into()),
            ..Default::default()
        }
    }

    /// Filter by jurisdiction
    pub fn by_jurisdiction(jurisdiction: impl Into<String>) -> Self {
        Self {
            jurisdiction: Some(jurisdiction.into()),
            ..Default::default()
        }
    }

    /// Add a source constraint
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Add a regulator constraint
    pub fn with_regulator(mut self, regulator: impl Into<String>) -> Self {
        self.regulator = Some(regulator.into());
        self
    }

    /// Add a jurisdiction constraint
    pub fn with_jurisdiction(mut self, jurisdiction: impl Into<String>) -> Self {
        self.jurisdiction = Some(jurisdiction.into());
        self
    }

    /// True when no field is constrained
    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.regulator.is_none() && self.jurisdiction.is_none()
    }

    /// True when the chunk satisfies every set field (exact equality)
    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(ref source) = self.source {
            if chunk.source != *source {
                return false;
            }
        }
        if let Some(ref regulator) = self.regulator {
            if chunk.regulator != *regulator {
                return false;
            }
        }
        if let Some(ref jurisdiction) = self.jurisdiction {
            if chunk.jurisdiction != *jurisdiction {
                return false;
            }
        }
        true
    }

    /// Build from optional CLI arguments; None when nothing was given
    pub fn from_parts(
        source: Option<String>,
        regulator: Option<String>,
        jurisdiction: Option<String>,
    ) -> Option<Self> {
        let filter = Self {
            source,
            regulator,
            jurisdiction,
        };

        if filter.is_empty() {
            None
        } else {
            Some(filter)
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn chunk(source: &str, regulator: &str, jurisdiction: &str) -> Chunk {
        Chunk {
            id: 0,
            content: "text".to_string(),
            source: source.to_string(),
            regulator: regulator.to_string(),
            jurisdiction: jurisdiction.to_string(),
            ingested_at: Utc::now(),
        }
    }

    #[test]
    fn test_empty_filter_matches_everything() {
        let filter = MetadataFilter::default();
        assert!(filter.is_empty());
        assert!(filter.matches(&chunk("a.pdf", "FATF", "International")));
    }

    #[test]
    fn test_single_field_exact_match() {
        let filter = MetadataFilter::by_regulator("RBI");
        assert!(filter.matches(&chunk("a.pdf", "RBI", "India")));
        assert!(!filter.matches(&chunk("a.pdf", "FATF", "International")));

        // Exact equality, no partial matching
        assert!(!filter.matches(&chunk("a.pdf", "RBI India", "India")));
    }

    #[test]
    fn test_and_semantics() {
        let filter = MetadataFilter::by_regulator("RBI").with_jurisdiction("India");

        assert!(filter.matches(&chunk("a.pdf", "RBI", "India")));
        assert!(!filter.matches(&chunk("a.pdf", "RBI", "UAE")));
        assert!(!filter.matches(&chunk("a.pdf", "FATF", "India")));
    }

    #[test]
    fn test_from_parts() {
        assert!(MetadataFilter::from_parts(None, None, None).is_none());

        let filter = MetadataFilter::from_parts(None, Some("FATF".to_string()), None);
        assert_eq!(filter, Some(MetadataFilter::by_regulator("FATF")));
    }
}
