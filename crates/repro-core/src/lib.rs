//! REPRO Core - paper-to-codebase pipeline
//!
//! Converts a research paper into a runnable codebase in three phases:
//! - Planning: parallel analysis, merge, completeness gate, ambiguity checkpoint
//! - Synthesis: sequential generation with an append-only code memory
//! - Refinement: static check, sandbox execution, bounded repair loop
//!
//! External collaborators (segmenter, generative model, reference index,
//! sandbox) are trait objects supplied by the caller.
//!
//! # Example
//!
//! ```rust,ignore
//! use repro_core::{Pipeline, PipelineConfig, SourceDocument};
//!
//! # async fn example(model: Arc<dyn GenerativeModel>, segmenter: Arc<dyn Segmenter>, sandbox: Arc<dyn Sandbox>) -> Result<(), Box<dyn std::error::Error>> {
//! let config = PipelineConfig::new().with_max_retries(5);
//! let pipeline = Pipeline::new(config, model, segmenter, sandbox);
//!
//! let paper = SourceDocument::new("attention.md", std::fs::read_to_string("attention.md")?);
//! let outcome = pipeline.run(&paper).await?;
//!
//! println!("{}: {} files", outcome.status, outcome.codebase().len());
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod blueprint;
pub mod checkpoint;
pub mod config;
pub mod document;
pub mod error;
pub mod memory;
pub mod model;
pub mod pipeline;
pub mod planning;
pub mod progress;
pub mod reference;
pub mod refinement;
pub mod synthesis;
pub mod types;

// Re-exports for convenience
pub use blueprint::{
    Blueprint, Component, CompletenessReport, CompletenessScorer, EnvironmentSpec, ProjectInfo,
    Provenance, SectionScorer, TargetFile, ValidationSpec, REQUIRED_SECTIONS,
};
pub use checkpoint::{
    checkpoint_channel, AmbiguityQuestion, AnsweredQuestion, CheckpointEndpoint, HumanCheckpoint,
    QuestionRequest, UserAnswer,
};
pub use config::{
    CheckpointConfig, PipelineConfig, PlanningConfig, SandboxConfig, SynthesisConfig,
    TimeoutAction, TimeoutConfig,
};
pub use document::{Chunk, Segmentation, Segmenter, SourceDocument};
pub use error::{
    BlueprintError, CheckpointError, ConfigError, ExtractionError, ModelError, PipelineError,
    PlanningError, ReferenceError, RefinementError, SandboxError, SegmentError, SynthesisError,
};
pub use memory::{select_relevant, CodeMemory, CodeMemoryEntry, MemoryExtractor, SymbolExtractor};
pub use model::{
    AnalysisKind, DiagnosisRequest, GenerativeModel, PlanSection, StructurePlan, StructuredOutput,
    TechnicalSpec,
};
pub use pipeline::{Pipeline, PipelineOutcome};
pub use planning::{
    AttemptOutcome, AttemptRecord, CheckpointOutcome, PlannedBlueprint, PlanningEngine,
    PlanningReport,
};
pub use progress::ProgressReporter;
pub use reference::{
    needs_reference, RagSnippet, ReferenceIndex, ReferenceIntel, ReferenceRepository,
    ReferenceSource,
};
pub use refinement::{
    ConformanceAnalyzer, FixSuggestion, IterationOutcome, RefinementEngine, RefinementIteration,
    RefinementOutcome, RefinementStatus, Sandbox, SandboxRun, SandboxTrajectory, Severity,
    StaticAnalyzer, StaticIssue,
};
pub use synthesis::{GenerationContext, SynthesisEngine, SynthesisOutput, SynthesisReport};
pub use types::{Phase, RequestParameters, RunId, StatusUpdate, TerminalStatus};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for wiring a pipeline
    pub use crate::{
        Blueprint, Chunk, GenerativeModel, Pipeline, PipelineConfig, PipelineOutcome,
        RequestParameters, Sandbox, Segmenter, SourceDocument, TerminalStatus,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
