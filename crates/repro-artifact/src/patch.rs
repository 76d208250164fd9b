//! File-scoped patches
//!
//! A [`Patch`] is an ordered list of [`FileEdit`]s applied to a
//! [`Codebase`] as a unit: either every edit applies and a new codebase is
//! returned, or the input is left untouched and the first failure is
//! reported.
//!
//! Edits are targeted, never whole-codebase regeneration. A set of
//! protected paths (the blueprint targets) can never be deleted.

use crate::codebase::{normalize_path, Codebase, CodebaseDiff, CodebaseError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// A single file-scoped edit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FileEdit {
    /// Replace the single occurrence of `find` in an existing file
    Replace {
        path: String,
        find: String,
        replace: String,
    },
    /// Append text to an existing file
    Append { path: String, content: String },
    /// Create a file that does not exist yet
    Create { path: String, content: String },
    /// Delete a non-protected file
    Delete { path: String },
}

impl FileEdit {
    /// Path the edit targets
    #[inline]
    #[must_use]
    pub fn path(&self) -> &str {
        match self {
            Self::Replace { path, .. }
            | Self::Append { path, .. }
            | Self::Create { path, .. }
            | Self::Delete { path } => path,
        }
    }

    /// Operation name (for logs)
    #[inline]
    #[must_use]
    pub fn op_name(&self) -> &'static str {
        match self {
            Self::Replace { .. } => "replace",
            Self::Append { .. } => "append",
            Self::Create { .. } => "create",
            Self::Delete { .. } => "delete",
        }
    }

    fn apply_to(&self, codebase: &mut Codebase, protected: &HashSet<String>) -> Result<(), PatchError> {
        let path = normalize_path(self.path())?;
        match self {
            Self::Replace { find, replace, .. } => {
                if find.is_empty() {
                    return Err(PatchError::EmptyPattern { path });
                }
                let current = codebase
                    .get(&path)
                    .ok_or_else(|| CodebaseError::NotFound(path.clone()))?;
                let occurrences = current.matches(find.as_str()).count();
                match occurrences {
                    0 => Err(PatchError::PatternNotFound { path }),
                    1 => {
                        let updated = current.replacen(find.as_str(), replace, 1);
                        codebase.replace(&path, updated)?;
                        Ok(())
                    }
                    n => Err(PatchError::AmbiguousPattern { path, occurrences: n }),
                }
            }
            Self::Append { content, .. } => {
                let current = codebase
                    .get(&path)
                    .ok_or_else(|| CodebaseError::NotFound(path.clone()))?;
                let mut updated = current.to_string();
                if !updated.is_empty() && !updated.ends_with('\n') {
                    updated.push('\n');
                }
                updated.push_str(content);
                codebase.replace(&path, updated)?;
                Ok(())
            }
            Self::Create { content, .. } => {
                codebase.insert_new(path, content.clone())?;
                Ok(())
            }
            Self::Delete { .. } => {
                if protected.contains(&path) {
                    return Err(PatchError::ProtectedPath(path));
                }
                codebase.remove(&path)?;
                Ok(())
            }
        }
    }
}

/// Ordered edits applied as a unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    /// Edits in application order
    pub edits: Vec<FileEdit>,
}

impl Patch {
    /// Create patch from edits
    #[inline]
    #[must_use]
    pub fn new(edits: Vec<FileEdit>) -> Self {
        Self { edits }
    }

    /// Whether the patch has no edits
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edits.is_empty()
    }

    /// Apply every edit to a copy of `base`.
    ///
    /// `protected` lists paths that must survive the patch.
    ///
    /// # Errors
    /// Returns the first failing edit; `base` is never modified.
    pub fn apply(&self, base: &Codebase, protected: &HashSet<String>) -> Result<AppliedPatch, PatchError> {
        if self.edits.is_empty() {
            return Err(PatchError::Empty);
        }
        let mut next = base.clone();
        for (index, edit) in self.edits.iter().enumerate() {
            edit.apply_to(&mut next, protected)
                .map_err(|source| PatchError::EditFailed {
                    index,
                    op: edit.op_name(),
                    source: Box::new(source),
                })?;
        }
        let diff = base.diff(&next);
        Ok(AppliedPatch { codebase: next, diff })
    }
}

/// Result of a successfully applied patch
#[derive(Debug, Clone)]
pub struct AppliedPatch {
    /// Patched codebase
    pub codebase: Codebase,
    /// What changed relative to the base
    pub diff: CodebaseDiff,
}

/// Patch application errors
#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    /// Nothing to apply
    #[error("patch contains no edits")]
    Empty,

    /// An edit failed; the whole patch is discarded
    #[error("edit #{index} ({op}) failed: {source}")]
    EditFailed {
        index: usize,
        op: &'static str,
        #[source]
        source: Box<PatchError>,
    },

    /// Replace pattern not present
    #[error("pattern not found in {path}")]
    PatternNotFound { path: String },

    /// Replace pattern matches more than once
    #[error("pattern matches {occurrences} times in {path}")]
    AmbiguousPattern { path: String, occurrences: usize },

    /// Replace pattern is empty
    #[error("empty replace pattern for {path}")]
    EmptyPattern { path: String },

    /// Attempt to delete a protected file
    #[error("refusing to delete protected file {0}")]
    ProtectedPath(String),

    /// Underlying codebase error
    #[error(transparent)]
    Codebase(#[from] CodebaseError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn base() -> Codebase {
        let mut cb = Codebase::new();
        cb.insert_new("main.py", "import model\nprint(model.run())\n").unwrap();
        cb.insert_new("model.py", "def run():\n    return 1\n").unwrap();
        cb
    }

    fn protected() -> HashSet<String> {
        ["main.py", "model.py"].iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn replace_and_create_apply_together() {
        let patch = Patch::new(vec![
            FileEdit::Replace {
                path: "model.py".into(),
                find: "return 1".into(),
                replace: "return 2".into(),
            },
            FileEdit::Create {
                path: "utils/helpers.py".into(),
                content: "X = 1\n".into(),
            },
        ]);
        let applied = patch.apply(&base(), &protected()).unwrap();
        assert_eq!(applied.codebase.get("model.py"), Some("def run():\n    return 2\n"));
        assert_eq!(applied.diff.added, vec!["utils/helpers.py".to_string()]);
        assert_eq!(applied.diff.modified, vec!["model.py".to_string()]);
    }

    #[test]
    fn failing_edit_discards_whole_patch() {
        let original = base();
        let patch = Patch::new(vec![
            FileEdit::Replace {
                path: "model.py".into(),
                find: "return 1".into(),
                replace: "return 2".into(),
            },
            FileEdit::Replace {
                path: "main.py".into(),
                find: "does not exist".into(),
                replace: "".into(),
            },
        ]);
        let err = patch.apply(&original, &protected()).unwrap_err();
        assert!(matches!(err, PatchError::EditFailed { index: 1, .. }));
        assert_eq!(original, base());
    }

    #[test]
    fn protected_file_cannot_be_deleted() {
        let patch = Patch::new(vec![FileEdit::Delete { path: "model.py".into() }]);
        let err = patch.apply(&base(), &protected()).unwrap_err();
        match err {
            PatchError::EditFailed { source, .. } => {
                assert!(matches!(*source, PatchError::ProtectedPath(ref p) if p == "model.py"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn ambiguous_replace_is_rejected() {
        let mut cb = Codebase::new();
        cb.insert_new("a.py", "x = 1\nx = 1\n").unwrap();
        let patch = Patch::new(vec![FileEdit::Replace {
            path: "a.py".into(),
            find: "x = 1".into(),
            replace: "x = 2".into(),
        }]);
        assert!(patch.apply(&cb, &HashSet::new()).is_err());
    }

    #[test]
    fn append_adds_newline_separator() {
        let mut cb = Codebase::new();
        cb.insert_new("a.py", "x = 1").unwrap();
        let patch = Patch::new(vec![FileEdit::Append {
            path: "a.py".into(),
            content: "y = 2\n".into(),
        }]);
        let applied = patch.apply(&cb, &HashSet::new()).unwrap();
        assert_eq!(applied.codebase.get("a.py"), Some("x = 1\ny = 2\n"));
    }

    #[test]
    fn empty_patch_is_an_error() {
        assert!(matches!(Patch::default().apply(&base(), &protected()), Err(PatchError::Empty)));
    }

    #[test]
    fn edits_deserialize_from_tagged_json() {
        let json = r#"[{"op":"create","path":"a.py","content":"1"},{"op":"delete","path":"b.py"}]"#;
        let edits: Vec<FileEdit> = serde_json::from_str(json).unwrap();
        assert_eq!(edits[1], FileEdit::Delete { path: "b.py".into() });
    }
}
