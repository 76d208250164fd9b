//! Reference repository boundary
//!
//! Discovery, download and indexing of external repositories live outside
//! this crate. The synthesis engine only needs the retrieval contract, and
//! every failure on this path is non-fatal.

use crate::blueprint::TargetFile;
use crate::document::SourceDocument;
use crate::error::ReferenceError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SOURCE_EXTENSIONS: &[&str] = &[
    "py", "rs", "go", "js", "jsx", "mjs", "ts", "tsx", "java", "kt", "scala", "c", "cc", "cpp",
    "cu", "h", "hpp", "jl", "r",
];

const SUPPORT_STEMS: &[&str] = &["__init__", "__main__", "setup", "conftest", "config", "settings", "constants"];

/// Code fragment retrieved for one generation call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagSnippet {
    /// Repository and path the fragment came from
    pub source: String,
    /// Fragment text
    pub content: String,
    /// Retrieval relevance
    pub score: f32,
}

/// Candidate reference repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReferenceRepository {
    /// Display name
    pub name: String,
    /// Clone URL
    pub url: String,
    /// Relevance to the paper
    pub relevance: f32,
}

/// Discovery result
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReferenceIntel {
    /// Repositories worth indexing, best first
    pub repositories: Vec<ReferenceRepository>,
}

impl ReferenceIntel {
    /// Whether discovery found anything
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

/// Discovers and indexes reference repositories
#[async_trait]
pub trait ReferenceSource: Send + Sync {
    /// Find repositories related to the document
    async fn discover(&self, document: &SourceDocument) -> Result<ReferenceIntel, ReferenceError>;

    /// Download and index the discovered repositories
    async fn acquire(&self, intel: &ReferenceIntel) -> Result<Arc<dyn ReferenceIndex>, ReferenceError>;
}

/// Snippet lookup keyed by target
#[async_trait]
pub trait ReferenceIndex: Send + Sync {
    /// Snippets relevant to `target`
    async fn retrieve(&self, target: &TargetFile) -> Result<Vec<RagSnippet>, ReferenceError>;
}

/// Whether retrieval should run for `target`.
///
/// An explicit blueprint hint wins. Otherwise source files qualify, except
/// tests, package initializers and configuration modules.
#[must_use]
pub fn needs_reference(target: &TargetFile) -> bool {
    if let Some(hint) = target.needs_reference {
        return hint;
    }
    let Some(ext) = target.extension() else {
        return false;
    };
    if !SOURCE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()) {
        return false;
    }
    let stem = target.stem().to_ascii_lowercase();
    let in_test_dir = target
        .path
        .split('/')
        .rev()
        .skip(1)
        .any(|dir| dir == "tests" || dir == "test");
    let is_test = in_test_dir
        || stem.starts_with("test_")
        || stem.ends_with("_test")
        || stem.ends_with(".test")
        || stem.ends_with(".spec");
    !is_test && !SUPPORT_STEMS.contains(&stem.as_str())
}
