//! Core types for REPRO
//!
//! Defines the fundamental types shared by the pipeline phases:
//! - Run identifiers
//! - Model request parameters
//! - Progress updates and phases
//! - Terminal statuses

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unique pipeline run identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RunId(pub Ulid);

impl RunId {
    /// Generate new run ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Generation parameters sent with every model request
///
/// Only the planning retry rule (and the synthesis retry rule for a single
/// target) derives new values; a value is never changed mid-attempt.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RequestParameters {
    /// Output token budget
    pub max_output_tokens: u32,
    /// Sampling temperature
    pub temperature: f32,
}

impl Default for RequestParameters {
    fn default() -> Self {
        Self {
            max_output_tokens: 8192,
            temperature: 0.7,
        }
    }
}

impl RequestParameters {
    /// Create parameters
    #[inline]
    #[must_use]
    pub fn new(max_output_tokens: u32, temperature: f32) -> Self {
        Self {
            max_output_tokens,
            temperature,
        }
    }

    /// Copy with temperature lowered by `step`, never below `floor`
    #[inline]
    #[must_use]
    pub fn cooled(self, step: f32, floor: f32) -> Self {
        Self {
            temperature: (self.temperature - step).max(floor).min(self.temperature),
            ..self
        }
    }
}

/// Pipeline phase, as reported to the front-end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Segmenting the source document
    Segmenting,
    /// Blueprint fan-out / fan-in
    Planning,
    /// Waiting on the ambiguity checkpoint
    AwaitingInput,
    /// Discovering and indexing reference repositories
    Indexing,
    /// Sequential code synthesis
    Coding,
    /// Static analysis and sandbox refinement
    Verifying,
    /// Terminal
    Finished,
}

impl Phase {
    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Segmenting => "segmenting",
            Self::Planning => "planning",
            Self::AwaitingInput => "awaiting_input",
            Self::Indexing => "indexing",
            Self::Coding => "coding",
            Self::Verifying => "verifying",
            Self::Finished => "finished",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress update emitted at phase boundaries and after each synthesized file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Current phase
    pub phase: Phase,
    /// Progress, 0..=100
    pub progress: u8,
    /// Human-readable message
    pub message: String,
}

/// Terminal status of a pipeline run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    /// Refinement reached a passing sandbox run
    Completed,
    /// Refinement exhausted its budget; codebase returned best-effort
    CompletedWithUnresolvedFailures,
    /// No blueprint was accepted
    FailedPlanning,
    /// A target could not be generated; no codebase is handed over
    FailedSynthesis,
    /// The ambiguity checkpoint was cancelled externally
    AbandonedAwaitingInput,
}

impl TerminalStatus {
    /// Whether a codebase accompanies this status
    #[inline]
    #[must_use]
    pub fn has_codebase(&self) -> bool {
        matches!(self, Self::Completed | Self::CompletedWithUnresolvedFailures)
    }

    /// Wire name
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::CompletedWithUnresolvedFailures => "completed_with_unresolved_failures",
            Self::FailedPlanning => "failed_planning",
            Self::FailedSynthesis => "failed_synthesis",
            Self::AbandonedAwaitingInput => "abandoned_awaiting_input",
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_generation() {
        assert_ne!(RunId::new(), RunId::new());
    }

    #[test]
    fn cooled_respects_floor() {
        let params = RequestParameters::new(4096, 0.25);
        let cooled = params.cooled(0.2, 0.1);
        assert!(cooled.temperature < params.temperature);
        assert!((cooled.temperature - 0.1).abs() < f32::EPSILON);
        assert_eq!(cooled.max_output_tokens, 4096);

        let already_low = RequestParameters::new(4096, 0.05);
        assert!((already_low.cooled(0.2, 0.1).temperature - 0.05).abs() < f32::EPSILON);
    }

    #[test]
    fn terminal_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&TerminalStatus::CompletedWithUnresolvedFailures).unwrap(),
            "\"completed_with_unresolved_failures\""
        );
        assert_eq!(TerminalStatus::AbandonedAwaitingInput.to_string(), "abandoned_awaiting_input");
        assert!(!TerminalStatus::FailedPlanning.has_codebase());
    }
}
