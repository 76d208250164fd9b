//! Error types for REPRO Core
//!
//! Provides error handling for:
//! - Configuration loading and validation
//! - Blueprint schema validation
//! - Generative-model calls (timeouts, malformed output)
//! - Planning, synthesis and checkpoint failures
//! - Mapping fatal errors onto pipeline terminal statuses

use crate::types::TerminalStatus;
use repro_artifact::{CodebaseError, PatchError};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level pipeline error
///
/// Every variant is terminal; [`PipelineError::terminal_status`] gives the
/// status reported to the caller.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Document segmentation failed
    #[error("segmentation failed: {0}")]
    Segmentation(#[from] SegmentError),

    /// Planning did not produce a blueprint
    #[error("planning failed: {0}")]
    Planning(#[from] PlanningError),

    /// A synthesis target could not be generated
    #[error("synthesis failed: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Configuration rejected before the run started
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Terminal status reported for this error
    #[must_use]
    pub fn terminal_status(&self) -> TerminalStatus {
        match self {
            Self::Planning(PlanningError::Abandoned) => TerminalStatus::AbandonedAwaitingInput,
            Self::Segmentation(_) | Self::Planning(_) | Self::Config(_) => TerminalStatus::FailedPlanning,
            Self::Synthesis(_) => TerminalStatus::FailedSynthesis,
        }
    }
}

/// Planning Engine errors
#[derive(Debug, thiserror::Error)]
pub enum PlanningError {
    /// Segmenter produced nothing to plan from
    #[error("document produced no chunks")]
    EmptyDocument,

    /// Retry budget exhausted without an accepted candidate
    #[error("incomplete plan after {attempts} attempts (best score {best_score:.2})")]
    IncompletePlan { attempts: u32, best_score: f64 },

    /// The ambiguity checkpoint was abandoned by the external actor
    #[error("ambiguity checkpoint abandoned")]
    Abandoned,

    /// The checkpoint returned an unusable response
    #[error("checkpoint failed: {0}")]
    Checkpoint(#[from] CheckpointError),

    /// The revision produced from user answers failed validation
    #[error("revised blueprint invalid: {0}")]
    RevisionInvalid(#[source] BlueprintError),

    /// The revision call itself failed
    #[error("blueprint revision failed: {0}")]
    RevisionFailed(#[source] ModelError),
}

/// Synthesis Engine errors
#[derive(Debug, thiserror::Error)]
pub enum SynthesisError {
    /// Generation for a single target failed; the phase is aborted
    #[error("generation failed for {target} after {attempts} attempt(s): {source}")]
    GenerationFailure {
        target: String,
        attempts: u32,
        #[source]
        source: ModelError,
    },

    /// Memory entry appended out of target order
    #[error("memory entry for target {index} appended after target {last}")]
    MemoryOrder { index: usize, last: usize },

    /// Generated file could not be recorded
    #[error("codebase error: {0}")]
    Codebase(#[from] CodebaseError),
}

impl SynthesisError {
    /// Target that failed, if any
    #[must_use]
    pub fn target(&self) -> Option<&str> {
        match self {
            Self::GenerationFailure { target, .. } => Some(target),
            Self::MemoryOrder { .. } | Self::Codebase(_) => None,
        }
    }
}

/// Refinement iteration failures
///
/// Never fatal: each one consumes a unit of the retry budget.
#[derive(Debug, thiserror::Error)]
pub enum RefinementError {
    /// Diagnosis call failed or timed out
    #[error("diagnosis failed: {0}")]
    Diagnosis(#[from] ModelError),

    /// Fix could not be applied cleanly and was discarded
    #[error("patch rejected: {0}")]
    PatchRejected(#[from] PatchError),
}

/// Sandbox infrastructure errors
///
/// Recovered by the refinement loop as a failed run.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Codebase could not be written to the sandbox directory
    #[error("failed to materialize {path}: {source}")]
    Materialize {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Process could not be started
    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Entry point is not part of the codebase
    #[error("entry point not found: {0}")]
    MissingEntryPoint(String),

    /// Other I/O failure
    #[error("sandbox io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Human checkpoint errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckpointError {
    /// External actor cancelled the wait
    #[error("checkpoint abandoned")]
    Abandoned,

    /// The answering side went away
    #[error("checkpoint endpoint disconnected")]
    Disconnected,

    /// No answer within the configured window
    #[error("no answer within {0:?}")]
    TimedOut(Duration),

    /// Answer count differs from question count
    #[error("expected {expected} answers, got {actual}")]
    AnswerMismatch { expected: usize, actual: usize },
}

/// Generative-model call errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Call exceeded the caller-supplied timeout
    #[error("model call timed out after {0:?}")]
    Timeout(Duration),

    /// Output did not match the expected shape
    #[error("malformed model output: {0}")]
    Malformed(String),

    /// Transport or provider failure
    #[error("model request failed: {0}")]
    Request(String),
}

/// Blueprint schema errors
#[derive(Debug, thiserror::Error)]
pub enum BlueprintError {
    /// YAML could not be parsed into the blueprint schema
    #[error("blueprint schema error: {0}")]
    Schema(#[from] serde_yaml::Error),

    /// Blueprint lists no target files
    #[error("blueprint has no target files")]
    NoTargets,

    /// Target path invalid
    #[error("invalid target path: {0}")]
    InvalidPath(#[from] CodebaseError),

    /// Two targets share a path
    #[error("duplicate target path: {0}")]
    DuplicateTarget(String),

    /// Validation section lacks an entry point
    #[error("validation entry point is empty")]
    MissingEntryPoint,
}

/// Segmenter errors
#[derive(Debug, thiserror::Error)]
pub enum SegmentError {
    /// Document could not be read or normalized
    #[error("unreadable document {reference}: {message}")]
    Unreadable { reference: String, message: String },

    /// Segmenter-specific failure
    #[error("{0}")]
    Failed(String),

    /// Segmenter did not answer in time
    #[error("segmentation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Reference subsystem errors (never fatal)
#[derive(Debug, thiserror::Error)]
pub enum ReferenceError {
    /// Discovery found nothing usable
    #[error("reference discovery failed: {0}")]
    Discovery(String),

    /// Download or indexing failed
    #[error("reference acquisition failed: {0}")]
    Acquisition(String),

    /// Snippet lookup failed
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// Discovery, acquisition or lookup did not finish in time
    #[error("reference call timed out after {0:?}")]
    TimedOut(Duration),
}

/// Memory extraction errors (recovered locally)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExtractionError {
    /// Nothing to summarize
    #[error("generated content is empty")]
    EmptyContent,

    /// Content is not text
    #[error("generated content is not text")]
    Binary,
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML syntax or schema error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// YAML syntax or schema error
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Extension not recognised
    #[error("unsupported config format: {0}")]
    UnsupportedFormat(String),

    /// Values out of range
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abandoned_checkpoint_maps_to_its_own_status() {
        let err = PipelineError::Planning(PlanningError::Abandoned);
        assert_eq!(err.terminal_status(), TerminalStatus::AbandonedAwaitingInput);
    }

    #[test]
    fn incomplete_plan_maps_to_failed_planning() {
        let err = PipelineError::from(PlanningError::IncompletePlan {
            attempts: 3,
            best_score: 0.5,
        });
        assert_eq!(err.terminal_status(), TerminalStatus::FailedPlanning);
        assert!(err.to_string().contains("incomplete plan after 3 attempts"));
    }

    #[test]
    fn generation_failure_names_target() {
        let err = SynthesisError::GenerationFailure {
            target: "src/model.py".into(),
            attempts: 2,
            source: ModelError::Timeout(Duration::from_secs(5)),
        };
        assert_eq!(err.target(), Some("src/model.py"));
        assert_eq!(
            PipelineError::from(err).terminal_status(),
            TerminalStatus::FailedSynthesis
        );
    }
}
