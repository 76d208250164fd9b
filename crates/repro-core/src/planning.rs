//! Planning Engine
//!
//! Turns document chunks into an accepted [`Blueprint`]:
//! 1. Fan-out: structural and technical analyses run concurrently (joined)
//! 2. Fan-in: both are merged into a YAML candidate
//! 3. Completeness gate: deterministic score against a threshold
//! 4. Retry with decayed token budget and lower temperature
//! 5. Ambiguity checkpoint for accepted drafts with open questions

use crate::blueprint::{Blueprint, CompletenessScorer, Provenance, SectionScorer};
use crate::checkpoint::HumanCheckpoint;
use crate::config::{CheckpointConfig, PlanningConfig, TimeoutAction};
use crate::document::{Chunk, SourceDocument};
use crate::error::{CheckpointError, ModelError, PlanningError};
use crate::model::{bounded, AnalysisKind, GenerativeModel};
use crate::progress::{ProgressReporter, PLANNING_DONE, PLANNING_START};
use crate::types::{Phase, RequestParameters};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Why an attempt ended the way it did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Passed the gate and the schema
    Accepted,
    /// Score under the threshold
    BelowThreshold {
        missing_sections: Vec<String>,
        truncated: bool,
    },
    /// Scored high enough but failed schema validation
    SchemaRejected { reason: String },
    /// An analysis or merge call failed or timed out
    CallFailed { reason: String },
}

/// One planning attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttemptRecord {
    /// 1-based attempt number
    pub attempt: u32,
    /// Parameters every call of this attempt used
    pub params: RequestParameters,
    /// Completeness score, when a candidate was produced
    pub score: Option<f64>,
    /// Outcome
    pub outcome: AttemptOutcome,
}

/// What happened at the ambiguity checkpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "checkpoint", rename_all = "snake_case")]
pub enum CheckpointOutcome {
    /// Draft had no open questions
    NotNeeded,
    /// Draft superseded by a revision built from answers
    Resolved { questions: usize },
    /// Draft kept despite open questions
    KeptDraft { reason: String },
}

/// Planning attempt log
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanningReport {
    /// Attempts in order
    pub attempts: Vec<AttemptRecord>,
    /// Parameters of the last attempt
    pub final_params: RequestParameters,
    /// Checkpoint result
    pub checkpoint: CheckpointOutcome,
}

impl PlanningReport {
    /// Number of parameter adjustments made
    #[must_use]
    pub fn adjustments(&self) -> usize {
        self.attempts.len().saturating_sub(1)
    }
}

/// Accepted blueprint with its attempt log
#[derive(Debug, Clone)]
pub struct PlannedBlueprint {
    /// Accepted blueprint
    pub blueprint: Blueprint,
    /// How it was reached
    pub report: PlanningReport,
}

/// Blueprint planner
pub struct PlanningEngine {
    model: Arc<dyn GenerativeModel>,
    scorer: Arc<dyn CompletenessScorer>,
    config: PlanningConfig,
    call_timeout: Option<Duration>,
    checkpoint: Option<HumanCheckpoint>,
    checkpoint_policy: CheckpointConfig,
    progress: ProgressReporter,
}

impl std::fmt::Debug for PlanningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanningEngine")
            .field("scorer", &self.scorer)
            .field("config", &self.config)
            .field("call_timeout", &self.call_timeout)
            .field("checkpoint", &self.checkpoint.is_some())
            .finish_non_exhaustive()
    }
}

impl PlanningEngine {
    /// Create engine with the default scorer and no checkpoint
    #[must_use]
    pub fn new(model: Arc<dyn GenerativeModel>, config: PlanningConfig) -> Self {
        Self {
            model,
            scorer: Arc::new(SectionScorer::new()),
            config,
            call_timeout: None,
            checkpoint: None,
            checkpoint_policy: CheckpointConfig::default(),
            progress: ProgressReporter::disabled(),
        }
    }

    /// With completeness scorer
    #[inline]
    #[must_use]
    pub fn with_scorer(mut self, scorer: Arc<dyn CompletenessScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    /// With per-call timeout
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// With ambiguity checkpoint
    #[inline]
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: HumanCheckpoint, policy: CheckpointConfig) -> Self {
        self.checkpoint = Some(checkpoint);
        self.checkpoint_policy = policy;
        self
    }

    /// With progress reporter
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Produce an accepted blueprint.
    ///
    /// # Errors
    /// - `PlanningError::EmptyDocument` if there are no chunks
    /// - `PlanningError::IncompletePlan` once the attempt budget is spent
    /// - `PlanningError::Abandoned` / `Checkpoint` / `Revision*` from the checkpoint
    pub async fn generate_blueprint(
        &self,
        document: &SourceDocument,
        chunks: &[Chunk],
        initial: RequestParameters,
    ) -> Result<PlannedBlueprint, PlanningError> {
        if chunks.is_empty() {
            return Err(PlanningError::EmptyDocument);
        }

        let max_attempts = self.config.max_attempts;
        let mut params = initial;
        let mut attempts = Vec::new();
        let mut best_score = 0.0_f64;

        for attempt in 1..=max_attempts {
            self.progress.report(
                Phase::Planning,
                planning_progress(attempt, max_attempts),
                format!("Planning attempt {attempt}/{max_attempts}"),
            );
            tracing::debug!(
                attempt,
                max_output_tokens = params.max_output_tokens,
                temperature = params.temperature,
                "Starting planning attempt"
            );

            let (score, outcome, accepted) = match self.run_attempt(chunks, &params).await {
                Ok(candidate) => {
                    let report = self.scorer.score(&candidate);
                    best_score = best_score.max(report.score);
                    if report.accepts(self.config.acceptance_threshold) {
                        let provenance = Provenance::Gate {
                            score: report.score,
                            attempt,
                        };
                        match Blueprint::parse(&candidate, provenance) {
                            Ok(blueprint) => (Some(report.score), AttemptOutcome::Accepted, Some(blueprint)),
                            Err(e) => (
                                Some(report.score),
                                AttemptOutcome::SchemaRejected { reason: e.to_string() },
                                None,
                            ),
                        }
                    } else {
                        (
                            Some(report.score),
                            AttemptOutcome::BelowThreshold {
                                missing_sections: report.missing_sections,
                                truncated: report.truncated,
                            },
                            None,
                        )
                    }
                }
                Err(e) => (None, AttemptOutcome::CallFailed { reason: e.to_string() }, None),
            };

            attempts.push(AttemptRecord {
                attempt,
                params,
                score,
                outcome: outcome.clone(),
            });

            if let Some(draft) = accepted {
                tracing::info!(
                    attempt,
                    score = score.unwrap_or_default(),
                    targets = draft.targets().len(),
                    "Blueprint accepted"
                );
                let (blueprint, checkpoint) = self.resolve_ambiguity(document, draft, &params).await?;
                self.progress
                    .report(Phase::Planning, PLANNING_DONE, "Blueprint accepted");
                return Ok(PlannedBlueprint {
                    blueprint,
                    report: PlanningReport {
                        attempts,
                        final_params: params,
                        checkpoint,
                    },
                });
            }

            tracing::warn!(attempt, ?score, ?outcome, "Blueprint candidate rejected");
            if attempt < max_attempts {
                params = self.config.adjust_params_for_retry(params);
            }
        }

        Err(PlanningError::IncompletePlan {
            attempts: max_attempts,
            best_score,
        })
    }

    /// Fan-out, join, merge
    async fn run_attempt(&self, chunks: &[Chunk], params: &RequestParameters) -> Result<String, ModelError> {
        let (structure, technical) = tokio::join!(
            bounded(
                self.call_timeout,
                self.model.analyze(AnalysisKind::Structure, chunks, params)
            ),
            bounded(
                self.call_timeout,
                self.model.analyze(AnalysisKind::Technical, chunks, params)
            ),
        );
        let structure = structure?.into_structure()?;
        let technical = technical?.into_technical()?;
        bounded(self.call_timeout, self.model.merge(&structure, &technical, params)).await
    }

    async fn resolve_ambiguity(
        &self,
        document: &SourceDocument,
        draft: Blueprint,
        params: &RequestParameters,
    ) -> Result<(Blueprint, CheckpointOutcome), PlanningError> {
        if !draft.has_open_questions() {
            return Ok((draft, CheckpointOutcome::NotNeeded));
        }
        let Some(checkpoint) = &self.checkpoint else {
            tracing::warn!(
                open_questions = draft.open_questions().len(),
                "No checkpoint attached; keeping draft"
            );
            return Ok(keep_draft(draft, "no checkpoint attached"));
        };

        let questions = match bounded(self.call_timeout, self.model.guiding_questions(&draft, params)).await {
            Ok(q) if !q.is_empty() => q,
            Ok(_) => return Ok(keep_draft(draft, "no guiding questions generated")),
            Err(e) => {
                tracing::warn!(error = %e, "Guiding question generation failed; keeping draft");
                return Ok(keep_draft(draft, &e.to_string()));
            }
        };
        let asked = questions.len();

        self.progress.report(
            Phase::AwaitingInput,
            PLANNING_DONE,
            format!("{asked} question(s) need an answer"),
        );

        let answers = match checkpoint.ask(questions, self.checkpoint_policy.timeout()).await {
            Ok(answers) => answers,
            Err(CheckpointError::Abandoned | CheckpointError::Disconnected) => {
                return Err(PlanningError::Abandoned);
            }
            Err(CheckpointError::TimedOut(after)) => match self.checkpoint_policy.on_timeout {
                TimeoutAction::Abandon => return Err(PlanningError::Abandoned),
                TimeoutAction::KeepDraft => {
                    tracing::warn!(?after, "Checkpoint window closed; keeping draft");
                    return Ok(keep_draft(draft, "checkpoint timed out"));
                }
            },
            Err(e) => return Err(e.into()),
        };

        let revised = bounded(
            self.call_timeout,
            self.model.summarize(document, &answers, params),
        )
        .await
        .map_err(PlanningError::RevisionFailed)?;

        let blueprint = Blueprint::parse(&revised, Provenance::Resolved { answers })
            .map_err(PlanningError::RevisionInvalid)?;
        tracing::info!(questions = asked, "Blueprint revised from checkpoint answers");
        Ok((blueprint, CheckpointOutcome::Resolved { questions: asked }))
    }
}

fn keep_draft(draft: Blueprint, reason: &str) -> (Blueprint, CheckpointOutcome) {
    (
        draft,
        CheckpointOutcome::KeptDraft {
            reason: reason.to_string(),
        },
    )
}

fn planning_progress(attempt: u32, max_attempts: u32) -> u8 {
    let span = u32::from(PLANNING_DONE - PLANNING_START);
    let step = span * attempt.saturating_sub(1) / max_attempts.max(1);
    PLANNING_START + u8::try_from(step).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planning_progress_stays_in_band() {
        assert_eq!(planning_progress(1, 3), 5);
        assert!(planning_progress(3, 3) < PLANNING_DONE);
        assert_eq!(planning_progress(1, 0), 5);
    }

    #[test]
    fn adjustments_count_retries() {
        let report = PlanningReport {
            attempts: vec![
                AttemptRecord {
                    attempt: 1,
                    params: RequestParameters::default(),
                    score: Some(0.5),
                    outcome: AttemptOutcome::BelowThreshold {
                        missing_sections: vec![],
                        truncated: true,
                    },
                },
                AttemptRecord {
                    attempt: 2,
                    params: RequestParameters::default(),
                    score: Some(0.9),
                    outcome: AttemptOutcome::Accepted,
                },
            ],
            final_params: RequestParameters::default(),
            checkpoint: CheckpointOutcome::NotNeeded,
        };
        assert_eq!(report.adjustments(), 1);
    }
}
