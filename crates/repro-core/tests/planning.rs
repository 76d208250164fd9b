//! Planning engine scenarios: gate, retries, fan-out

use pretty_assertions::assert_eq;
use repro_core::{
    AnalysisKind, AttemptOutcome, Chunk, CheckpointOutcome, ModelError, PlanningConfig,
    PlanningEngine, PlanningError, Provenance, RequestParameters,
};
use repro_test_utils::{sample_blueprint_yaml, sample_document, BlueprintYaml, ScriptedModel, ScriptedScorer};
use std::sync::Arc;
use std::time::Duration;

fn chunks(n: usize) -> Vec<Chunk> {
    (0..n)
        .map(|i| Chunk::new(format!("section_{i}"), format!("text of section {i}")))
        .collect()
}

fn engine(model: &Arc<ScriptedModel>) -> PlanningEngine {
    PlanningEngine::new(model.clone(), PlanningConfig::default())
}

#[tokio::test]
async fn accepts_complete_candidate_on_first_attempt() {
    let model = Arc::new(ScriptedModel::new().with_merge(sample_blueprint_yaml(3)));
    let scorer = Arc::new(ScriptedScorer::new(&[0.85]));
    let initial = RequestParameters::default();

    let planned = engine(&model)
        .with_scorer(scorer.clone())
        .generate_blueprint(&sample_document(), &chunks(3), initial)
        .await
        .unwrap();

    assert_eq!(planned.report.attempts.len(), 1);
    assert_eq!(planned.report.attempts[0].outcome, AttemptOutcome::Accepted);
    assert_eq!(planned.report.adjustments(), 0);
    assert_eq!(planned.report.final_params, initial);
    assert_eq!(planned.report.checkpoint, CheckpointOutcome::NotNeeded);
    assert!(matches!(
        planned.blueprint.provenance(),
        Provenance::Gate { attempt: 1, score } if (*score - 0.85).abs() < 1e-9
    ));
    assert_eq!(planned.blueprint.targets().len(), 3);
    assert_eq!(scorer.calls(), 1);

    // both analyses and the merge share the attempt's parameters
    let analyses = model.analyze_calls();
    assert_eq!(analyses.len(), 2);
    assert!(analyses.iter().all(|(_, p)| *p == initial));
    assert_eq!(model.merge_params(), vec![initial]);
}

#[tokio::test(start_paused = true)]
async fn analyses_run_concurrently() {
    let model = Arc::new(
        ScriptedModel::new()
            .with_analysis_delay(Duration::from_millis(100))
            .with_merge(sample_blueprint_yaml(2)),
    );

    engine(&model)
        .generate_blueprint(&sample_document(), &chunks(1), RequestParameters::default())
        .await
        .unwrap();

    assert_eq!(model.max_concurrent_analyses(), 2);
    let kinds: Vec<_> = model.analyze_calls().into_iter().map(|(k, _)| k).collect();
    assert!(kinds.contains(&AnalysisKind::Structure));
    assert!(kinds.contains(&AnalysisKind::Technical));
}

#[tokio::test]
async fn low_scores_retry_with_reduced_parameters() {
    let model = Arc::new(ScriptedModel::new().with_default_merge(sample_blueprint_yaml(2)));
    let scorer = Arc::new(ScriptedScorer::new(&[0.6, 0.5, 0.9]));

    let planned = engine(&model)
        .with_scorer(scorer)
        .generate_blueprint(&sample_document(), &chunks(2), RequestParameters::default())
        .await
        .unwrap();

    let attempts = &planned.report.attempts;
    assert_eq!(attempts.len(), 3);
    assert_eq!(planned.report.adjustments(), 2);
    assert!(matches!(attempts[0].outcome, AttemptOutcome::BelowThreshold { .. }));
    assert!(matches!(attempts[1].outcome, AttemptOutcome::BelowThreshold { .. }));
    assert_eq!(attempts[2].outcome, AttemptOutcome::Accepted);

    for pair in attempts.windows(2) {
        assert!(pair[1].params.max_output_tokens < pair[0].params.max_output_tokens);
        assert!(pair[1].params.temperature < pair[0].params.temperature);
    }
    assert_eq!(planned.report.final_params, attempts[2].params);
    assert_eq!(model.merge_params().len(), 3);
}

#[tokio::test]
async fn exhausted_attempts_fail_with_incomplete_plan() {
    let model = Arc::new(ScriptedModel::new().with_default_merge(sample_blueprint_yaml(2)));
    let scorer = Arc::new(ScriptedScorer::new(&[0.6, 0.5, 0.7]));

    let err = engine(&model)
        .with_scorer(scorer)
        .generate_blueprint(&sample_document(), &chunks(2), RequestParameters::default())
        .await
        .unwrap_err();

    match err {
        PlanningError::IncompletePlan { attempts, best_score } => {
            assert_eq!(attempts, 3);
            assert!((best_score - 0.7).abs() < 1e-9);
        }
        other => panic!("unexpected error: {other}"),
    }
    // never a fourth attempt
    assert_eq!(model.merge_params().len(), 3);
}

#[tokio::test]
async fn truncated_candidate_is_rejected_by_the_default_scorer() {
    let truncated = BlueprintYaml::new("attention")
        .target("model.py", "transformer")
        .target("main.py", "entry")
        .truncated()
        .build();
    let model = Arc::new(
        ScriptedModel::new()
            .with_merge(truncated)
            .with_merge(sample_blueprint_yaml(2)),
    );

    let planned = engine(&model)
        .generate_blueprint(&sample_document(), &chunks(1), RequestParameters::default())
        .await
        .unwrap();

    assert!(matches!(
        planned.report.attempts[0].outcome,
        AttemptOutcome::BelowThreshold { truncated: true, .. }
    ));
    assert_eq!(planned.report.attempts[1].outcome, AttemptOutcome::Accepted);
    assert!(planned.report.attempts[1].score.unwrap() >= 0.8);
}

#[tokio::test]
async fn missing_section_lowers_the_score() {
    let incomplete = BlueprintYaml::new("attention")
        .target("main.py", "entry")
        .without_section("implementation_components")
        .without_section("environment")
        .build();
    let model = Arc::new(ScriptedModel::new().with_default_merge(incomplete));

    let err = engine(&model)
        .generate_blueprint(&sample_document(), &chunks(1), RequestParameters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlanningError::IncompletePlan { attempts: 3, .. }));
}

#[tokio::test]
async fn failed_call_consumes_an_attempt() {
    let model = Arc::new(
        ScriptedModel::new()
            .with_analysis_error(ModelError::Request("rate limited".into()))
            .with_merge(sample_blueprint_yaml(2)),
    );

    let planned = engine(&model)
        .generate_blueprint(&sample_document(), &chunks(1), RequestParameters::default())
        .await
        .unwrap();

    let attempts = &planned.report.attempts;
    assert_eq!(attempts.len(), 2);
    assert!(matches!(&attempts[0].outcome, AttemptOutcome::CallFailed { reason } if reason.contains("rate limited")));
    assert_eq!(attempts[0].score, None);
    assert!(attempts[1].params.max_output_tokens < attempts[0].params.max_output_tokens);
}

#[tokio::test]
async fn high_score_that_fails_schema_is_retried() {
    let model = Arc::new(
        ScriptedModel::new()
            .with_merge("project: [unparseable")
            .with_merge(sample_blueprint_yaml(2)),
    );
    let scorer = Arc::new(ScriptedScorer::new(&[0.95]));

    let planned = engine(&model)
        .with_scorer(scorer)
        .generate_blueprint(&sample_document(), &chunks(1), RequestParameters::default())
        .await
        .unwrap();

    assert!(matches!(planned.report.attempts[0].outcome, AttemptOutcome::SchemaRejected { .. }));
    assert_eq!(planned.report.attempts[1].outcome, AttemptOutcome::Accepted);
}

#[tokio::test(start_paused = true)]
async fn slow_model_times_out_every_attempt() {
    let model = Arc::new(
        ScriptedModel::new()
            .with_analysis_delay(Duration::from_secs(10))
            .with_default_merge(sample_blueprint_yaml(2)),
    );

    let err = engine(&model)
        .with_call_timeout(Some(Duration::from_secs(1)))
        .generate_blueprint(&sample_document(), &chunks(1), RequestParameters::default())
        .await
        .unwrap_err();

    assert!(matches!(err, PlanningError::IncompletePlan { attempts: 3, best_score } if best_score == 0.0));
    assert!(model.merge_params().is_empty());
}

#[tokio::test]
async fn empty_document_is_rejected() {
    let model = Arc::new(ScriptedModel::new());
    let err = engine(&model)
        .generate_blueprint(&sample_document(), &[], RequestParameters::default())
        .await
        .unwrap_err();
    assert!(matches!(err, PlanningError::EmptyDocument));
    assert!(model.analyze_calls().is_empty());
}
