//! Pipeline orchestrator
//!
//! Runs the three phases strictly in sequence:
//! - Planning: document → accepted blueprint
//! - Synthesis: blueprint → codebase
//! - Refinement: codebase → verified (or best-effort) codebase
//!
//! The blueprint is owned here and lent read-only to the later phases; the
//! codebase is moved from synthesis into refinement.

use crate::blueprint::{Blueprint, CompletenessScorer, SectionScorer};
use crate::checkpoint::HumanCheckpoint;
use crate::config::PipelineConfig;
use crate::document::{Segmenter, SourceDocument};
use crate::error::{PipelineError, ReferenceError, SegmentError};
use crate::memory::{MemoryExtractor, SymbolExtractor};
use crate::model::{within, GenerativeModel};
use crate::planning::{PlanningEngine, PlanningReport};
use crate::progress::{ProgressReporter, DONE, INDEXING, PLANNING_START};
use crate::reference::{ReferenceIndex, ReferenceSource};
use crate::refinement::{ConformanceAnalyzer, RefinementEngine, RefinementOutcome, RefinementStatus, Sandbox, StaticAnalyzer};
use crate::synthesis::{SynthesisEngine, SynthesisReport};
use crate::types::{Phase, RunId, StatusUpdate, TerminalStatus};
use repro_artifact::Codebase;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Result of a run that produced a codebase
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    /// Run identifier
    pub run_id: RunId,
    /// `Completed` or `CompletedWithUnresolvedFailures`
    pub status: TerminalStatus,
    /// Accepted blueprint
    pub blueprint: Blueprint,
    /// Planning attempt log
    pub planning: PlanningReport,
    /// Synthesis summary
    pub synthesis: SynthesisReport,
    /// Refinement result, including the final codebase
    pub refinement: RefinementOutcome,
}

impl PipelineOutcome {
    /// Final codebase
    #[inline]
    #[must_use]
    pub fn codebase(&self) -> &Codebase {
        &self.refinement.codebase
    }
}

/// Paper-to-codebase pipeline
pub struct Pipeline {
    config: PipelineConfig,
    model: Arc<dyn GenerativeModel>,
    segmenter: Arc<dyn Segmenter>,
    sandbox: Arc<dyn Sandbox>,
    reference_source: Option<Arc<dyn ReferenceSource>>,
    checkpoint: Option<HumanCheckpoint>,
    scorer: Arc<dyn CompletenessScorer>,
    extractor: Arc<dyn MemoryExtractor>,
    analyzer: Arc<dyn StaticAnalyzer>,
    progress: ProgressReporter,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("config", &self.config)
            .field("reference_source", &self.reference_source.is_some())
            .field("checkpoint", &self.checkpoint.is_some())
            .field("scorer", &self.scorer)
            .field("extractor", &self.extractor)
            .field("analyzer", &self.analyzer)
            .finish_non_exhaustive()
    }
}

impl Pipeline {
    /// Create pipeline with default scorer, extractor and analyzer
    #[must_use]
    pub fn new(
        config: PipelineConfig,
        model: Arc<dyn GenerativeModel>,
        segmenter: Arc<dyn Segmenter>,
        sandbox: Arc<dyn Sandbox>,
    ) -> Self {
        Self {
            config,
            model,
            segmenter,
            sandbox,
            reference_source: None,
            checkpoint: None,
            scorer: Arc::new(SectionScorer::new()),
            extractor: Arc::new(SymbolExtractor::new()),
            analyzer: Arc::new(ConformanceAnalyzer::new()),
            progress: ProgressReporter::disabled(),
        }
    }

    /// With reference repository source (used only when indexing is enabled)
    #[inline]
    #[must_use]
    pub fn with_reference_source(mut self, source: Arc<dyn ReferenceSource>) -> Self {
        self.reference_source = Some(source);
        self
    }

    /// With ambiguity checkpoint
    #[inline]
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: HumanCheckpoint) -> Self {
        self.checkpoint = Some(checkpoint);
        self
    }

    /// With progress channel
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, sender: mpsc::UnboundedSender<StatusUpdate>) -> Self {
        self.progress = ProgressReporter::new(sender);
        self
    }

    /// With completeness scorer
    #[inline]
    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn CompletenessScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// With memory extractor
    #[inline]
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn MemoryExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// With static analyzer
    #[inline]
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn StaticAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// Configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the pipeline on one document.
    ///
    /// # Workflow
    /// 1. Segment the document
    /// 2. Plan an accepted blueprint (with checkpoint when needed)
    /// 3. Optionally index reference repositories
    /// 4. Synthesize every target in order
    /// 5. Refine in the sandbox
    ///
    /// # Errors
    /// Fatal phase failures; [`PipelineError::terminal_status`] gives the
    /// status to report
    pub async fn run(&self, document: &SourceDocument) -> Result<PipelineOutcome, PipelineError> {
        let run_id = RunId::new();
        tracing::info!(%run_id, reference = %document.reference, "Starting pipeline run");

        match self.run_phases(run_id, document).await {
            Ok(outcome) => {
                self.progress.report(
                    Phase::Finished,
                    DONE,
                    format!("Run finished: {}", outcome.status),
                );
                tracing::info!(%run_id, status = %outcome.status, "Pipeline run finished");
                Ok(outcome)
            }
            Err(e) => {
                let status = e.terminal_status();
                self.progress
                    .report(Phase::Finished, DONE, format!("Run failed: {status}"));
                tracing::error!(%run_id, %status, error = %e, "Pipeline run failed");
                Err(e)
            }
        }
    }

    async fn run_phases(&self, run_id: RunId, document: &SourceDocument) -> Result<PipelineOutcome, PipelineError> {
        self.config.validate()?;
        let timeouts = self.config.timeouts;
        let params = self.config.request_params;

        self.progress
            .report(Phase::Segmenting, PLANNING_START, "Segmenting document");
        let chunks = within(
            timeouts.segmentation(),
            self.segmenter.segment(document),
            SegmentError::TimedOut,
        )
        .await?
        .into_chunks();
        tracing::debug!(chunks = chunks.len(), "Document segmented");

        let mut planner = PlanningEngine::new(Arc::clone(&self.model), self.config.planning)
            .with_scorer(Arc::clone(&self.scorer))
            .with_call_timeout(timeouts.model_call())
            .with_progress(self.progress.clone());
        if let Some(checkpoint) = &self.checkpoint {
            planner = planner.with_checkpoint(checkpoint.clone(), self.config.checkpoint);
        }
        let planned = planner.generate_blueprint(document, &chunks, params).await?;
        let blueprint = planned.blueprint;

        let index = self.acquire_reference_index(document).await;

        let synthesizer = SynthesisEngine::new(Arc::clone(&self.model), self.config.synthesis)
            .with_extractor(Arc::clone(&self.extractor))
            .with_call_timeout(timeouts.model_call())
            .with_reference_timeout(timeouts.reference())
            .with_progress(self.progress.clone());
        let synthesized = synthesizer
            .synthesize(&blueprint, index.as_deref(), &params)
            .await?;

        let refiner = RefinementEngine::new(
            Arc::clone(&self.model),
            Arc::clone(&self.sandbox),
            self.config.max_retries,
        )
        .with_analyzer(Arc::clone(&self.analyzer))
        .with_call_timeout(timeouts.model_call())
        .with_sandbox_timeout(timeouts.sandbox())
        .with_progress(self.progress.clone());
        let refinement = refiner
            .refine(synthesized.codebase, &blueprint, &params)
            .await;

        let status = match refinement.status {
            RefinementStatus::Passed => TerminalStatus::Completed,
            RefinementStatus::Exhausted => TerminalStatus::CompletedWithUnresolvedFailures,
        };

        Ok(PipelineOutcome {
            run_id,
            status,
            blueprint,
            planning: planned.report,
            synthesis: synthesized.report,
            refinement,
        })
    }

    /// Discover and acquire a reference index; failures only disable retrieval
    async fn acquire_reference_index(&self, document: &SourceDocument) -> Option<Arc<dyn ReferenceIndex>> {
        if !self.config.enable_indexing {
            return None;
        }
        let Some(source) = &self.reference_source else {
            tracing::warn!("Indexing enabled but no reference source attached");
            return None;
        };

        let limit = self.config.timeouts.reference();
        self.progress
            .report(Phase::Indexing, INDEXING, "Discovering reference repositories");
        let intel = match within(limit, source.discover(document), ReferenceError::TimedOut).await {
            Ok(intel) if !intel.is_empty() => intel,
            Ok(_) => {
                tracing::info!("No reference repositories found");
                return None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reference discovery failed; continuing without retrieval");
                return None;
            }
        };

        match within(limit, source.acquire(&intel), ReferenceError::TimedOut).await {
            Ok(index) => {
                tracing::info!(repositories = intel.repositories.len(), "Reference index ready");
                Some(index)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Reference acquisition failed; continuing without retrieval");
                None
            }
        }
    }
}
