//! Source documents and segmentation
//!
//! Chunking itself lives outside this crate; only the [`Segmenter`] output
//! contract matters here.

use crate::error::SegmentError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Keyword used when the whole document is a single unit
pub const FULL_DOCUMENT_KEYWORD: &str = "full_document";

/// Normalized research artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Where the document came from (path, URL, identifier)
    pub reference: String,
    /// Normalized text
    pub text: String,
}

impl SourceDocument {
    /// Create document
    #[inline]
    #[must_use]
    pub fn new(reference: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            text: text.into(),
        }
    }
}

/// Keyword-tagged slice of the document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Section keyword
    pub keyword: String,
    /// Chunk text
    pub text: String,
}

impl Chunk {
    /// Create chunk
    #[inline]
    #[must_use]
    pub fn new(keyword: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            keyword: keyword.into(),
            text: text.into(),
        }
    }
}

/// Segmenter output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segmentation {
    /// Document small enough to analyze whole
    FullDocument(String),
    /// Ordered chunks
    Chunks(Vec<Chunk>),
}

impl Segmentation {
    /// Ordered chunks; a full document becomes a single chunk.
    #[must_use]
    pub fn into_chunks(self) -> Vec<Chunk> {
        match self {
            Self::FullDocument(text) => vec![Chunk::new(FULL_DOCUMENT_KEYWORD, text)],
            Self::Chunks(chunks) => chunks,
        }
    }
}

/// Document segmenter
#[async_trait]
pub trait Segmenter: Send + Sync {
    /// Split a document into analysis units.
    ///
    /// # Errors
    /// Document could not be segmented
    async fn segment(&self, document: &SourceDocument) -> Result<Segmentation, SegmentError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_document_becomes_one_chunk() {
        let chunks = Segmentation::FullDocument("abstract".into()).into_chunks();
        assert_eq!(chunks, vec![Chunk::new(FULL_DOCUMENT_KEYWORD, "abstract")]);
    }

    #[test]
    fn chunk_order_is_kept() {
        let chunks = Segmentation::Chunks(vec![
            Chunk::new("method", "b"),
            Chunk::new("abstract", "a"),
        ])
        .into_chunks();
        assert_eq!(chunks[0].keyword, "method");
        assert_eq!(chunks[1].keyword, "abstract");
    }
}
