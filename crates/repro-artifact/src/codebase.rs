//! Generated codebase
//!
//! A [`Codebase`] maps relative file paths to file contents. Insertion order
//! is preserved so that a codebase produced by synthesis iterates in
//! blueprint order.

use crate::hash::ContentHash;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Ordered mapping from relative path to file content
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Codebase {
    files: IndexMap<String, String>,
}

impl Codebase {
    /// Create empty codebase
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a file that must not exist yet.
    ///
    /// # Errors
    /// - `CodebaseError::InvalidPath` if the path is absolute or escapes the root
    /// - `CodebaseError::AlreadyWritten` if the path is already present
    pub fn insert_new(
        &mut self,
        path: impl Into<String>,
        content: impl Into<String>,
    ) -> Result<(), CodebaseError> {
        let path = normalize_path(&path.into())?;
        if self.files.contains_key(&path) {
            return Err(CodebaseError::AlreadyWritten(path));
        }
        self.files.insert(path, content.into());
        Ok(())
    }

    /// Overwrite an existing file.
    ///
    /// # Errors
    /// Returns `CodebaseError::NotFound` if the path is absent
    pub fn replace(&mut self, path: &str, content: impl Into<String>) -> Result<(), CodebaseError> {
        match self.files.get_mut(path) {
            Some(slot) => {
                *slot = content.into();
                Ok(())
            }
            None => Err(CodebaseError::NotFound(path.to_string())),
        }
    }

    /// Remove a file, keeping the order of the remaining ones.
    ///
    /// # Errors
    /// Returns `CodebaseError::NotFound` if the path is absent
    pub fn remove(&mut self, path: &str) -> Result<String, CodebaseError> {
        self.files
            .shift_remove(path)
            .ok_or_else(|| CodebaseError::NotFound(path.to_string()))
    }

    /// File content
    #[inline]
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.files.get(path).map(String::as_str)
    }

    /// Check presence
    #[inline]
    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    /// Paths in insertion order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    /// `(path, content)` pairs in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_str()))
    }

    /// Number of files
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether no file has been recorded
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Fingerprint of the whole codebase (order sensitive)
    #[must_use]
    pub fn fingerprint(&self) -> ContentHash {
        ContentHash::compute_files(self.iter())
    }

    /// Difference from `self` to `other`
    #[must_use]
    pub fn diff(&self, other: &Codebase) -> CodebaseDiff {
        let mut diff = CodebaseDiff::empty();
        for (path, content) in other.iter() {
            match self.get(path) {
                None => diff.added.push(path.to_string()),
                Some(old) if old != content => diff.modified.push(path.to_string()),
                Some(_) => {}
            }
        }
        for path in self.paths() {
            if !other.contains(path) {
                diff.removed.push(path.to_string());
            }
        }
        diff
    }
}

impl FromIterator<(String, String)> for Codebase {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            files: iter.into_iter().collect(),
        }
    }
}

/// Files added, removed and modified between two codebases
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CodebaseDiff {
    /// Paths present only in the newer codebase
    pub added: Vec<String>,
    /// Paths present only in the older codebase
    pub removed: Vec<String>,
    /// Paths whose content changed
    pub modified: Vec<String>,
}

impl CodebaseDiff {
    /// Create empty diff
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Whether nothing changed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Normalize a relative path (`./a//b.py` → `a/b.py`).
///
/// # Errors
/// Returns `CodebaseError::InvalidPath` for empty, absolute, or `..` paths
pub fn normalize_path(path: &str) -> Result<String, CodebaseError> {
    let unified = path.replace('\\', "/");
    if unified.starts_with('/') || unified.contains(':') {
        return Err(CodebaseError::InvalidPath(path.to_string()));
    }
    let mut parts = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Err(CodebaseError::InvalidPath(path.to_string())),
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return Err(CodebaseError::InvalidPath(path.to_string()));
    }
    Ok(parts.join("/"))
}

/// Codebase errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodebaseError {
    /// Path is empty, absolute or escapes the codebase root
    #[error("invalid path: '{0}'")]
    InvalidPath(String),

    /// File was already written
    #[error("file already written: {0}")]
    AlreadyWritten(String),

    /// File does not exist
    #[error("file not found: {0}")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn insert_new_is_write_once() {
        let mut cb = Codebase::new();
        cb.insert_new("src/model.py", "class Model: pass").unwrap();
        let err = cb.insert_new("src/model.py", "other").unwrap_err();
        assert_eq!(err, CodebaseError::AlreadyWritten("src/model.py".into()));
        assert_eq!(cb.get("src/model.py"), Some("class Model: pass"));
    }

    #[test]
    fn insertion_order_is_preserved() {
        let mut cb = Codebase::new();
        for p in ["z.py", "a.py", "m/b.py"] {
            cb.insert_new(p, "").unwrap();
        }
        assert_eq!(cb.paths().collect::<Vec<_>>(), vec!["z.py", "a.py", "m/b.py"]);
    }

    #[test]
    fn normalize_path_rejects_escapes() {
        assert_eq!(normalize_path("./src//a.py").unwrap(), "src/a.py");
        assert!(normalize_path("../etc/passwd").is_err());
        assert!(normalize_path("/abs.py").is_err());
        assert!(normalize_path("C:/x.py").is_err());
        assert!(normalize_path("./").is_err());
    }

    #[test]
    fn diff_reports_changes() {
        let mut before = Codebase::new();
        before.insert_new("a.py", "1").unwrap();
        before.insert_new("b.py", "2").unwrap();

        let mut after = before.clone();
        after.replace("a.py", "10").unwrap();
        after.remove("b.py").unwrap();
        after.insert_new("c.py", "3").unwrap();

        let diff = before.diff(&after);
        assert_eq!(diff.added, vec!["c.py".to_string()]);
        assert_eq!(diff.removed, vec!["b.py".to_string()]);
        assert_eq!(diff.modified, vec!["a.py".to_string()]);
        assert!(before.diff(&before).is_empty());
    }

    #[test]
    fn fingerprint_tracks_content() {
        let mut cb = Codebase::new();
        cb.insert_new("a.py", "x = 1").unwrap();
        let before = cb.fingerprint();
        cb.replace("a.py", "x = 2").unwrap();
        assert_ne!(before, cb.fingerprint());
    }
}
