//! Generative model boundary
//!
//! The model call is opaque: prompts, hosting and transport live behind
//! [`GenerativeModel`]. The engines only see typed requests and responses,
//! and wrap every call in [`bounded`] so a slow provider turns into a
//! `ModelError::Timeout` that consumes retry budget.

use crate::blueprint::Blueprint;
use crate::checkpoint::{AmbiguityQuestion, AnsweredQuestion};
use crate::document::{Chunk, SourceDocument};
use crate::error::ModelError;
use crate::refinement::{FixSuggestion, SandboxTrajectory, StaticIssue};
use crate::synthesis::GenerationContext;
use crate::types::RequestParameters;
use async_trait::async_trait;
use repro_artifact::Codebase;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

/// Which analysis a fan-out branch runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    /// Concepts, components, file layout
    Structure,
    /// Algorithms, hyperparameters, equations
    Technical,
}

impl std::fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Structure => f.write_str("structure"),
            Self::Technical => f.write_str("technical"),
        }
    }
}

/// Headed section of an analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSection {
    /// Section heading
    pub heading: String,
    /// Section body
    pub body: String,
}

/// Output of the structural analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructurePlan {
    /// Sections in document order
    pub sections: Vec<PlanSection>,
}

/// Output of the technical analysis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TechnicalSpec {
    /// Sections in document order
    pub sections: Vec<PlanSection>,
}

/// Analysis result tagged by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuredOutput {
    /// Structural analysis
    Structure(StructurePlan),
    /// Technical analysis
    Technical(TechnicalSpec),
}

impl StructuredOutput {
    /// Kind of this output
    #[inline]
    #[must_use]
    pub fn kind(&self) -> AnalysisKind {
        match self {
            Self::Structure(_) => AnalysisKind::Structure,
            Self::Technical(_) => AnalysisKind::Technical,
        }
    }

    /// Unwrap a structural analysis.
    ///
    /// # Errors
    /// `ModelError::Malformed` if the model answered with the other kind
    pub fn into_structure(self) -> Result<StructurePlan, ModelError> {
        match self {
            Self::Structure(plan) => Ok(plan),
            other => Err(ModelError::Malformed(format!(
                "expected structure analysis, got {}",
                other.kind()
            ))),
        }
    }

    /// Unwrap a technical analysis.
    ///
    /// # Errors
    /// `ModelError::Malformed` if the model answered with the other kind
    pub fn into_technical(self) -> Result<TechnicalSpec, ModelError> {
        match self {
            Self::Technical(spec) => Ok(spec),
            other => Err(ModelError::Malformed(format!(
                "expected technical analysis, got {}",
                other.kind()
            ))),
        }
    }
}

/// Everything a diagnosis call sees
#[derive(Debug, Clone, Copy)]
pub struct DiagnosisRequest<'a> {
    /// Latest sandbox trajectory
    pub trajectory: &'a SandboxTrajectory,
    /// Static issues found before the first run
    pub issues: &'a [StaticIssue],
    /// Current codebase
    pub codebase: &'a Codebase,
    /// Blueprint the codebase implements
    pub blueprint: &'a Blueprint,
}

/// Generative model
///
/// Implementations must be safe to call concurrently: the planning fan-out
/// issues both analyses at once.
#[async_trait]
pub trait GenerativeModel: Send + Sync {
    /// Run one analysis over the ordered chunks
    async fn analyze(
        &self,
        kind: AnalysisKind,
        chunks: &[Chunk],
        params: &RequestParameters,
    ) -> Result<StructuredOutput, ModelError>;

    /// Merge both analyses into a YAML blueprint candidate
    async fn merge(
        &self,
        structure: &StructurePlan,
        technical: &TechnicalSpec,
        params: &RequestParameters,
    ) -> Result<String, ModelError>;

    /// Turn a draft's open questions into user-facing questions
    async fn guiding_questions(
        &self,
        draft: &Blueprint,
        params: &RequestParameters,
    ) -> Result<Vec<AmbiguityQuestion>, ModelError>;

    /// Produce a revised YAML blueprint from the document and answers
    async fn summarize(
        &self,
        document: &SourceDocument,
        answers: &[AnsweredQuestion],
        params: &RequestParameters,
    ) -> Result<String, ModelError>;

    /// Generate the content of one target file
    async fn generate(
        &self,
        context: &GenerationContext<'_>,
        params: &RequestParameters,
    ) -> Result<String, ModelError>;

    /// Propose file-scoped fixes for a failing run
    async fn diagnose(
        &self,
        request: &DiagnosisRequest<'_>,
        params: &RequestParameters,
    ) -> Result<Vec<FixSuggestion>, ModelError>;
}

/// Await a model call, failing with `ModelError::Timeout` after `limit`.
///
/// # Errors
/// The call's own error, or `Timeout`
pub async fn bounded<T, F>(limit: Option<Duration>, call: F) -> Result<T, ModelError>
where
    F: Future<Output = Result<T, ModelError>>,
{
    within(limit, call, ModelError::Timeout).await
}

/// Await any fallible collaborator call, mapping an elapsed `limit`
/// through `elapsed`.
///
/// # Errors
/// The call's own error, or `elapsed(limit)`
pub async fn within<T, E, F>(
    limit: Option<Duration>,
    call: F,
    elapsed: impl FnOnce(Duration) -> E,
) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, call)
            .await
            .map_err(|_| elapsed(limit))?,
        None => call.await,
    }
}

/// Body of the first fenced block, or the whole text when unfenced.
///
/// An unclosed fence yields everything after the opening line.
#[must_use]
pub fn extract_code_block(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after_marker = &text[open + 3..];
    let Some(newline) = after_marker.find('\n') else {
        return "";
    };
    let body = &after_marker[newline + 1..];
    if body.starts_with("```") {
        return "";
    }
    match body.find("\n```") {
        Some(end) => &body[..=end],
        None => body,
    }
}

/// Body of a fence that wraps the whole response, or the text unchanged.
///
/// Fences inside a file (a README's shell block, say) are content and stay.
#[must_use]
pub fn strip_enclosing_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if trimmed.len() < 6 || !trimmed.starts_with("```") || !trimmed.ends_with("```") {
        return text;
    }
    let inner = &trimmed[3..trimmed.len() - 3];
    let Some(newline) = inner.find('\n') else {
        return text;
    };
    if inner[newline + 1..].contains("\n```") {
        return text;
    }
    &inner[newline + 1..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unfenced_text_is_returned_as_is() {
        assert_eq!(extract_code_block("a: 1\n"), "a: 1\n");
    }

    #[test]
    fn fenced_block_is_extracted() {
        let text = "Here you go:\n```python\nprint(1)\n```\ntrailing";
        assert_eq!(extract_code_block(text), "print(1)\n");
    }

    #[test]
    fn unclosed_fence_keeps_tail() {
        assert_eq!(extract_code_block("```yaml\na: 1\nb: 2"), "a: 1\nb: 2");
        assert_eq!(extract_code_block("```\n```"), "");
    }

    #[test]
    fn wrong_analysis_kind_is_malformed() {
        let out = StructuredOutput::Technical(TechnicalSpec::default());
        assert!(matches!(out.into_structure(), Err(ModelError::Malformed(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok::<_, ModelError>(())
        };
        let err = bounded(Some(Duration::from_secs(1)), slow).await.unwrap_err();
        assert_eq!(err, ModelError::Timeout(Duration::from_secs(1)));
    }

    #[tokio::test]
    async fn unbounded_passes_through() {
        let value = bounded(None, async { Ok::<_, ModelError>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[test]
    fn enclosing_fence_is_stripped() {
        assert_eq!(strip_enclosing_fence("```python\nprint(1)\n```\n"), "print(1)\n");
        assert_eq!(strip_enclosing_fence("\n```\nx = 1\n```"), "x = 1\n");
    }

    #[test]
    fn inner_fences_are_content() {
        let readme = "# Repro\n\n```bash\npip install -r requirements.txt\n```\n\nThen run main.py.\n";
        assert_eq!(strip_enclosing_fence(readme), readme);
        let two_blocks = "```bash\nmake\n```\n\ntext\n\n```bash\nmake test\n```";
        assert_eq!(strip_enclosing_fence(two_blocks), two_blocks);
        assert_eq!(strip_enclosing_fence("plain = 1\n"), "plain = 1\n");
    }
}
