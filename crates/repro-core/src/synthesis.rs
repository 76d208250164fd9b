//! Synthesis Engine
//!
//! Generates the blueprint's target files one at a time, in blueprint
//! order. Each call sees a fresh [`GenerationContext`]: the blueprint, the
//! memory entries relevant to the target, and (optionally) retrieved
//! reference snippets. Completed files are summarized into the code memory
//! so later targets can build on their interfaces.

use crate::blueprint::{Blueprint, TargetFile};
use crate::config::SynthesisConfig;
use crate::error::{ModelError, ReferenceError, SynthesisError};
use crate::memory::{select_relevant, CodeMemory, CodeMemoryEntry, MemoryExtractor, SymbolExtractor};
use crate::model::{bounded, strip_enclosing_fence, within, GenerativeModel};
use crate::progress::{coding_progress, ProgressReporter};
use crate::reference::{needs_reference, RagSnippet, ReferenceIndex};
use crate::types::{Phase, RequestParameters};
use repro_artifact::{Codebase, ContentHash};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Input to a single generation call
#[derive(Debug, Clone)]
pub struct GenerationContext<'a> {
    /// Accepted blueprint
    pub blueprint: &'a Blueprint,
    /// File to generate
    pub target: &'a TargetFile,
    /// Relevant memory entries, in memory order
    pub memory: Vec<&'a CodeMemoryEntry>,
    /// Retrieved reference snippets for this call only
    pub snippets: Vec<RagSnippet>,
}

/// What synthesis did
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SynthesisReport {
    /// Generated paths, in order
    pub generated: Vec<String>,
    /// Paths whose memory entry could not be extracted
    pub extraction_failures: Vec<String>,
    /// Entries in the final code memory
    pub memory_entries: usize,
    /// Snippets passed to generation calls
    pub snippets_used: usize,
    /// Fingerprint of the produced codebase
    pub fingerprint: ContentHash,
}

/// Codebase plus report
#[derive(Debug, Clone)]
pub struct SynthesisOutput {
    /// One file per blueprint target
    pub codebase: Codebase,
    /// Summary
    pub report: SynthesisReport,
}

/// Sequential, memory-augmented code generator
pub struct SynthesisEngine {
    model: Arc<dyn GenerativeModel>,
    extractor: Arc<dyn MemoryExtractor>,
    config: SynthesisConfig,
    call_timeout: Option<Duration>,
    reference_timeout: Option<Duration>,
    progress: ProgressReporter,
}

impl std::fmt::Debug for SynthesisEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisEngine")
            .field("extractor", &self.extractor)
            .field("config", &self.config)
            .field("call_timeout", &self.call_timeout)
            .field("reference_timeout", &self.reference_timeout)
            .finish_non_exhaustive()
    }
}

impl SynthesisEngine {
    /// Create engine with the default extractor
    #[must_use]
    pub fn new(model: Arc<dyn GenerativeModel>, config: SynthesisConfig) -> Self {
        Self {
            model,
            extractor: Arc::new(SymbolExtractor::new()),
            config,
            call_timeout: None,
            reference_timeout: None,
            progress: ProgressReporter::disabled(),
        }
    }

    /// With memory extractor
    #[inline]
    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn MemoryExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    /// With per-call timeout
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// With per-lookup reference retrieval timeout
    #[inline]
    #[must_use]
    pub fn with_reference_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.reference_timeout = timeout;
        self
    }

    /// With progress reporter
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Generate every target in blueprint order.
    ///
    /// `index` is consulted only for targets that need reference material.
    ///
    /// # Errors
    /// `SynthesisError::GenerationFailure` for the first target whose
    /// attempts are all spent; nothing generated so far is returned
    pub async fn synthesize(
        &self,
        blueprint: &Blueprint,
        index: Option<&dyn ReferenceIndex>,
        params: &RequestParameters,
    ) -> Result<SynthesisOutput, SynthesisError> {
        let targets = blueprint.targets();
        let total = targets.len();
        let mut memory = CodeMemory::new();
        let mut codebase = Codebase::new();
        let mut extraction_failures = Vec::new();
        let mut snippets_used = 0;

        tracing::info!(targets = total, "Starting synthesis");

        for (position, target) in targets.iter().enumerate() {
            let snippets = match index {
                Some(index) if needs_reference(target) => {
                    retrieve(index, target, self.reference_timeout).await
                }
                _ => Vec::new(),
            };
            snippets_used += snippets.len();

            let content = {
                let context = GenerationContext {
                    blueprint,
                    target,
                    memory: select_relevant(&memory, target),
                    snippets,
                };
                tracing::debug!(
                    path = %target.path,
                    memory = context.memory.len(),
                    snippets = context.snippets.len(),
                    "Generating target"
                );
                self.generate_target(&context, params).await?
            };

            let recorded = match self.extractor.extract(target, &content) {
                Ok(entry) => memory.append(entry).map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            if let Err(error) = recorded {
                tracing::warn!(path = %target.path, %error, "Memory entry omitted");
                extraction_failures.push(target.path.clone());
            }
            codebase.insert_new(target.path.clone(), content)?;

            self.progress.report(
                Phase::Coding,
                coding_progress(position + 1, total),
                format!("Generated {} ({}/{total})", target.path, position + 1),
            );
        }

        let fingerprint = codebase.fingerprint();
        tracing::info!(
            files = codebase.len(),
            memory = memory.len(),
            fingerprint = %fingerprint.short(),
            "Synthesis complete"
        );

        Ok(SynthesisOutput {
            report: SynthesisReport {
                generated: codebase.paths().map(str::to_string).collect(),
                extraction_failures,
                memory_entries: memory.len(),
                snippets_used,
                fingerprint,
            },
            codebase,
        })
    }

    async fn generate_target(
        &self,
        context: &GenerationContext<'_>,
        params: &RequestParameters,
    ) -> Result<String, SynthesisError> {
        let max_attempts = self.config.max_generation_attempts.max(1);
        let mut attempt_params = *params;
        let mut last_error = ModelError::Malformed("no attempt made".to_string());

        for attempt in 1..=max_attempts {
            match bounded(self.call_timeout, self.model.generate(context, &attempt_params)).await {
                Ok(raw) => {
                    let code = strip_enclosing_fence(&raw);
                    if !code.trim().is_empty() {
                        return Ok(code.to_string());
                    }
                    last_error = ModelError::Malformed("empty generation".to_string());
                }
                Err(e) => last_error = e,
            }
            tracing::warn!(
                path = %context.target.path,
                attempt,
                error = %last_error,
                "Generation attempt failed"
            );
            attempt_params = attempt_params.cooled(self.config.retry_temperature_step, 0.0);
        }

        Err(SynthesisError::GenerationFailure {
            target: context.target.path.clone(),
            attempts: max_attempts,
            source: last_error,
        })
    }
}

async fn retrieve(
    index: &dyn ReferenceIndex,
    target: &TargetFile,
    limit: Option<Duration>,
) -> Vec<RagSnippet> {
    match within(limit, index.retrieve(target), ReferenceError::TimedOut).await {
        Ok(snippets) => snippets,
        Err(e) => {
            tracing::warn!(path = %target.path, error = %e, "Reference retrieval failed; continuing without snippets");
            Vec::new()
        }
    }
}
