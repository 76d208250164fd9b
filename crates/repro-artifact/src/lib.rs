//! REPRO Artifact System
//!
//! The codebase model shared by the synthesis and refinement phases.
//!
//! # Core Concepts
//!
//! - [`Codebase`]: Ordered path → content mapping
//! - [`Patch`] / [`FileEdit`]: All-or-nothing, file-scoped edits
//! - [`ContentHash`]: 32-byte Blake3 hash for file and codebase fingerprints
//!
//! # Example
//!
//! ```rust,ignore
//! use repro_artifact::{Codebase, FileEdit, Patch};
//!
//! let mut codebase = Codebase::new();
//! codebase.insert_new("model.py", "def run():\n    return 1\n")?;
//!
//! let patch = Patch::new(vec![FileEdit::Replace {
//!     path: "model.py".into(),
//!     find: "return 1".into(),
//!     replace: "return 2".into(),
//! }]);
//! let applied = patch.apply(&codebase, &Default::default())?;
//! println!("modified: {:?}", applied.diff.modified);
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

mod codebase;
mod hash;
mod patch;

pub use codebase::{normalize_path, Codebase, CodebaseDiff, CodebaseError};
pub use hash::ContentHash;
pub use patch::{AppliedPatch, FileEdit, Patch, PatchError};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashSet;

    proptest! {
        #[test]
        fn failed_patch_never_mutates_base(
            files in proptest::collection::btree_map("[a-z]{1,6}\\.py", "[a-z ]{0,20}", 1..5),
            missing in "[A-Z]{8}",
        ) {
            let base: Codebase = files.into_iter().collect();
            let first = base.paths().next().unwrap().to_string();
            let patch = Patch::new(vec![
                FileEdit::Append { path: first.clone(), content: "tail".into() },
                FileEdit::Replace { path: first, find: missing, replace: String::new() },
            ]);
            let before = base.clone();
            prop_assert!(patch.apply(&base, &HashSet::new()).is_err());
            prop_assert_eq!(before, base);
        }
    }
}
