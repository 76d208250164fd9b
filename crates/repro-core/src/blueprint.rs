//! Implementation blueprint
//!
//! The blueprint is the sole input of the synthesis phase:
//! - Ordered target files with roles and declared dependencies
//! - Project metadata, implementation components, environment
//! - Validation entry point used by the sandbox
//!
//! Candidates arrive as YAML text from the merge step. They are scored by a
//! [`CompletenessScorer`] and, once accepted, parsed into an immutable
//! [`Blueprint`] that records how it was accepted.

use crate::checkpoint::AnsweredQuestion;
use crate::error::BlueprintError;
use crate::model::extract_code_block;
use repro_artifact::normalize_path;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Top-level sections a complete candidate must carry
pub const REQUIRED_SECTIONS: [&str; 5] = [
    "project",
    "file_structure",
    "implementation_components",
    "validation",
    "environment",
];

/// Weight of section coverage in the completeness score
const SECTION_WEIGHT: f64 = 0.7;
/// Weight of structural validity in the completeness score
const STRUCTURE_WEIGHT: f64 = 0.3;
/// Multiplier applied to truncated candidates
const TRUNCATION_PENALTY: f64 = 0.5;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlueprintDocument {
    project: ProjectInfo,
    file_structure: Vec<FileSpec>,
    implementation_components: Vec<Component>,
    validation: ValidationSpec,
    environment: EnvironmentSpec,
    #[serde(default)]
    open_questions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct FileSpec {
    path: String,
    #[serde(default, alias = "description")]
    role: String,
    #[serde(default, alias = "dependencies")]
    depends_on: Vec<String>,
    #[serde(default)]
    needs_reference: Option<bool>,
}

/// Project metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// Project name
    pub name: String,
    /// One-paragraph summary of what is being reproduced
    #[serde(default)]
    pub summary: String,
}

/// Algorithm or module the implementation must contain
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Component {
    /// Bare name
    Name(String),
    /// Name with description
    Detailed {
        name: String,
        #[serde(default)]
        description: String,
    },
}

impl Component {
    /// Component name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Name(name) | Self::Detailed { name, .. } => name,
        }
    }
}

/// How a reproduction is validated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationSpec {
    /// File the sandbox runs
    pub entry_point: String,
    /// Expected observable outcomes
    #[serde(default)]
    pub success_criteria: Vec<String>,
}

/// Runtime environment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    /// Implementation language
    #[serde(default)]
    pub language: String,
    /// Third-party packages
    #[serde(default)]
    pub dependencies: Vec<String>,
}

// ---------------------------------------------------------------------------
// Accepted blueprint
// ---------------------------------------------------------------------------

/// One file the synthesis phase must produce
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetFile {
    /// Position in blueprint order
    pub index: usize,
    /// Normalized relative path
    pub path: String,
    /// Semantic role description
    pub role: String,
    /// Paths this file depends on
    pub depends_on: Vec<String>,
    /// Explicit reference-retrieval hint
    pub needs_reference: Option<bool>,
}

impl TargetFile {
    /// File name without directory or extension
    #[must_use]
    pub fn stem(&self) -> &str {
        path_stem(&self.path)
    }

    /// Parent directory (`""` at the root)
    #[must_use]
    pub fn parent(&self) -> &str {
        path_parent(&self.path)
    }

    /// Extension without the dot
    #[must_use]
    pub fn extension(&self) -> Option<&str> {
        path_extension(&self.path)
    }
}

/// Extension of `path` without the dot
#[must_use]
pub fn path_extension(path: &str) -> Option<&str> {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => Some(ext),
        _ => None,
    }
}

/// File name of `path` without its extension
#[must_use]
pub fn path_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

/// Directory part of `path` (`""` at the root)
#[must_use]
pub fn path_parent(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

/// How a blueprint came to be accepted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    /// Passed the completeness gate
    Gate {
        /// Completeness score
        score: f64,
        /// 1-based attempt number
        attempt: u32,
    },
    /// Revised from checkpoint answers
    Resolved {
        /// Questions and the answers that produced the revision
        answers: Vec<AnsweredQuestion>,
    },
}

/// Accepted, immutable implementation plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Blueprint {
    project: ProjectInfo,
    targets: Vec<TargetFile>,
    components: Vec<Component>,
    validation: ValidationSpec,
    environment: EnvironmentSpec,
    open_questions: Vec<String>,
    provenance: Provenance,
    #[serde(skip)]
    raw: String,
}

impl Blueprint {
    /// Parse and validate a YAML candidate.
    ///
    /// A surrounding code fence is stripped. Target paths and the entry
    /// point are normalized.
    ///
    /// # Errors
    /// - `BlueprintError::Schema` if a required section is missing or malformed
    /// - `BlueprintError::NoTargets` if `file_structure` is empty
    /// - `BlueprintError::InvalidPath` / `DuplicateTarget` for bad target paths
    /// - `BlueprintError::MissingEntryPoint` if validation has no entry point
    /// - `BlueprintError::InvalidPath` if the entry point escapes the root
    pub fn parse(raw: &str, provenance: Provenance) -> Result<Self, BlueprintError> {
        let body = extract_code_block(raw);
        let doc: BlueprintDocument = serde_yaml::from_str(body)?;

        if doc.file_structure.is_empty() {
            return Err(BlueprintError::NoTargets);
        }

        let mut seen = HashSet::new();
        let mut targets = Vec::with_capacity(doc.file_structure.len());
        for (index, spec) in doc.file_structure.into_iter().enumerate() {
            let path = normalize_path(&spec.path)?;
            if !seen.insert(path.clone()) {
                return Err(BlueprintError::DuplicateTarget(path));
            }
            let depends_on = spec
                .depends_on
                .iter()
                .filter_map(|d| normalize_path(d).ok())
                .collect();
            targets.push(TargetFile {
                index,
                path,
                role: spec.role.trim().to_string(),
                depends_on,
                needs_reference: spec.needs_reference,
            });
        }

        let mut validation = doc.validation;
        if validation.entry_point.trim().is_empty() {
            return Err(BlueprintError::MissingEntryPoint);
        }
        validation.entry_point = normalize_path(validation.entry_point.trim())?;

        Ok(Self {
            project: doc.project,
            targets,
            components: doc.implementation_components,
            validation,
            environment: doc.environment,
            open_questions: doc
                .open_questions
                .into_iter()
                .map(|q| q.trim().to_string())
                .filter(|q| !q.is_empty())
                .collect(),
            provenance,
            raw: body.to_string(),
        })
    }

    /// Project metadata
    #[inline]
    #[must_use]
    pub fn project(&self) -> &ProjectInfo {
        &self.project
    }

    /// Targets in generation order
    #[inline]
    #[must_use]
    pub fn targets(&self) -> &[TargetFile] {
        &self.targets
    }

    /// Target by path
    #[must_use]
    pub fn target(&self, path: &str) -> Option<&TargetFile> {
        self.targets.iter().find(|t| t.path == path)
    }

    /// Set of target paths (files refinement may never delete)
    #[must_use]
    pub fn target_paths(&self) -> HashSet<String> {
        self.targets.iter().map(|t| t.path.clone()).collect()
    }

    /// Implementation components
    #[inline]
    #[must_use]
    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Validation section
    #[inline]
    #[must_use]
    pub fn validation(&self) -> &ValidationSpec {
        &self.validation
    }

    /// Entry point run by the sandbox
    #[inline]
    #[must_use]
    pub fn entry_point(&self) -> &str {
        &self.validation.entry_point
    }

    /// Environment section
    #[inline]
    #[must_use]
    pub fn environment(&self) -> &EnvironmentSpec {
        &self.environment
    }

    /// Unresolved questions the merge step flagged
    #[inline]
    #[must_use]
    pub fn open_questions(&self) -> &[String] {
        &self.open_questions
    }

    /// Whether the ambiguity checkpoint applies
    #[inline]
    #[must_use]
    pub fn has_open_questions(&self) -> bool {
        !self.open_questions.is_empty()
    }

    /// How this blueprint was accepted
    #[inline]
    #[must_use]
    pub fn provenance(&self) -> &Provenance {
        &self.provenance
    }

    /// YAML text the blueprint was parsed from
    #[inline]
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }
}

// ---------------------------------------------------------------------------
// Completeness gate
// ---------------------------------------------------------------------------

/// Completeness verdict for a candidate
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletenessReport {
    /// Score in `0.0..=1.0`
    pub score: f64,
    /// Required sections absent from the candidate
    pub missing_sections: Vec<String>,
    /// Candidate looks cut off
    pub truncated: bool,
    /// Candidate parses and every target has a path
    pub structure_valid: bool,
}

impl CompletenessReport {
    /// Whether the score reaches `threshold`
    #[inline]
    #[must_use]
    pub fn accepts(&self, threshold: f64) -> bool {
        self.score >= threshold
    }
}

/// Deterministic completeness scorer
pub trait CompletenessScorer: Send + Sync + std::fmt::Debug {
    /// Score a YAML candidate. Must be pure.
    fn score(&self, candidate: &str) -> CompletenessReport;
}

/// Default scorer: section coverage, structure, truncation
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionScorer;

impl SectionScorer {
    /// Create scorer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CompletenessScorer for SectionScorer {
    fn score(&self, candidate: &str) -> CompletenessReport {
        let body = extract_code_block(candidate);
        let top_level = top_level_keys(body);
        let missing_sections: Vec<String> = REQUIRED_SECTIONS
            .iter()
            .filter(|s| !top_level.contains(**s))
            .map(|s| (*s).to_string())
            .collect();

        let parsed = serde_yaml::from_str::<serde_yaml::Value>(body).ok();
        let structure_valid = parsed.as_ref().is_some_and(has_valid_file_structure);
        let truncated = parsed.is_none() || looks_truncated(candidate, body);

        #[allow(clippy::cast_precision_loss)]
        let coverage = (REQUIRED_SECTIONS.len() - missing_sections.len()) as f64
            / REQUIRED_SECTIONS.len() as f64;
        let mut score = SECTION_WEIGHT * coverage
            + if structure_valid { STRUCTURE_WEIGHT } else { 0.0 };
        if truncated {
            score *= TRUNCATION_PENALTY;
        }

        CompletenessReport {
            score,
            missing_sections,
            truncated,
            structure_valid,
        }
    }
}

/// Unindented `key:` lines
fn top_level_keys(body: &str) -> HashSet<&str> {
    body.lines()
        .filter(|line| !line.starts_with([' ', '\t', '#', '-']))
        .filter_map(|line| line.split_once(':'))
        .map(|(key, _)| key.trim().trim_matches(['"', '\'']))
        .filter(|key| !key.is_empty())
        .collect()
}

fn has_valid_file_structure(value: &serde_yaml::Value) -> bool {
    let Some(entries) = value.get("file_structure").and_then(|v| v.as_sequence()) else {
        return false;
    };
    !entries.is_empty()
        && entries.iter().all(|entry| {
            entry
                .get("path")
                .and_then(|p| p.as_str())
                .is_some_and(|p| !p.trim().is_empty())
        })
}

/// Signs that generation stopped mid-document in text that still parses.
///
/// Unclosed brackets and quotes already fail YAML parsing, so only
/// line-shape signals are checked here.
fn looks_truncated(candidate: &str, body: &str) -> bool {
    if body.trim().is_empty() {
        return true;
    }
    if candidate.matches("```").count() % 2 == 1 {
        return true;
    }
    let Some(last) = body.lines().rev().map(str::trim_end).find(|l| !l.trim().is_empty()) else {
        return true;
    };
    last.ends_with(':') || last.ends_with(',') || last.trim() == "-" || last.ends_with(" -")
}
