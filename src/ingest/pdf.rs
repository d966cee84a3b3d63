//! PDF text extraction
//!
//! Extracts text with the pdf-extract crate. Page boundaries are
//! best-effort: form-feed characters when present, separator-line patterns
//! otherwise, falling back to the whole document as one page.

use std::path::Path;

use anyhow::{Context, Result};

/// Extract text from a PDF file
///
/// Returns (page number, text) pairs, page numbers starting at 1. Scanned
/// documents with no extractable text yield a single empty page and a
/// warning rather than an error.
pub fn extract_text_from_pdf(path: &Path) -> Result<Vec<(usize, String)>> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read PDF: {:?}", path))?;

    let text = pdf_extract::extract_text_from_mem(&bytes)
        .with_context(|| format!("Failed to extract text from PDF: {:?}", path))?;

    if text.trim().is_empty() {
        tracing::warn!(
            "No text extracted from PDF: {:?}. It might be a scanned document.",
            path
        );
        return Ok(vec![(1, String::new())]);
    }

    let pages = split_pdf_pages(&text);

    Ok(pages
        .into_iter()
        .enumerate()
        .map(|(i, text)| (i + 1, text))
        .collect())
}

/// Split extracted text into pages
fn split_pdf_pages(text: &str) -> Vec<String> {
    // Form feed (\x0c) is the usual page marker
    let pages: Vec<String> = text
        .split('\x0c')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if pages.len() > 1 {
        return pages;
    }

    // Some PDFs carry textual separators like "--- Page 3 ---"
    let page_pattern = regex::Regex::new(r"(?m)^[\s]*[-=]+[\s]*(?:Page[\s]*)?(\d+)[\s]*[-=]+[\s]*$")
        .expect("Invalid regex");

    if page_pattern.is_match(text) {
        let pages: Vec<String> = page_pattern
            .split(text)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if pages.len() > 1 {
            return pages;
        }
    }

    // No separator found: one page
    vec![text.to_string()]
}

// ============================================================================
// Tests
// ============================================================================
