//! Property tests for the deterministic parts of the pipeline

use proptest::prelude::*;
use repro_artifact::Codebase;
use repro_core::{
    select_relevant, CodeMemory, CompletenessScorer, MemoryExtractor, PlanningConfig,
    RefinementEngine, RefinementStatus, RequestParameters, SectionScorer, SymbolExtractor,
    TargetFile,
};
use repro_test_utils::{fix_append, parse_blueprint, sample_blueprint_yaml, ScriptedModel, ScriptedSandbox};
use std::sync::Arc;

fn target(index: usize, path: String, role: String, depends_on: Vec<String>) -> TargetFile {
    TargetFile {
        index,
        path,
        role,
        depends_on,
        needs_reference: None,
    }
}

fn module_name() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["model", "data", "train", "utils", "layers", "attention", "__init__"])
        .prop_map(str::to_string)
}

proptest! {
    #[test]
    fn scorer_is_deterministic_and_bounded(candidate in ".{0,400}") {
        let scorer = SectionScorer::new();
        let first = scorer.score(&candidate);
        let second = scorer.score(&candidate);
        prop_assert_eq!(&first, &second);
        prop_assert!((0.0..=1.0).contains(&first.score));
    }

    #[test]
    fn retry_adjustment_never_increases(tokens in 1_u32..65_536, temperature in 0.0_f32..2.0) {
        let config = PlanningConfig::default();
        let current = RequestParameters::new(tokens, temperature);
        let next = config.adjust_params_for_retry(current);

        prop_assert!(next.max_output_tokens <= current.max_output_tokens);
        prop_assert!(next.max_output_tokens >= config.min_output_tokens.min(current.max_output_tokens));
        prop_assert!(next.temperature <= current.temperature);
        prop_assert!(next.temperature >= config.min_temperature.min(current.temperature));
    }

    #[test]
    fn memory_selection_is_pure_and_ordered(
        modules in prop::collection::vec(module_name(), 1..8),
        role_words in prop::collection::vec(module_name(), 0..3),
        dep in prop::option::of(module_name()),
    ) {
        let extractor = SymbolExtractor::new();
        let mut memory = CodeMemory::new();
        for (index, module) in modules.iter().enumerate() {
            let t = target(index, format!("pkg{index}/{module}.py"), module.clone(), Vec::new());
            let entry = extractor.extract(&t, &format!("def {module}_fn():\n    pass\n")).unwrap();
            memory.append(entry).unwrap();
        }

        let position = modules.len() / 2;
        let current = target(
            position,
            "pkg/current.py".into(),
            role_words.join(" "),
            dep.into_iter().collect(),
        );

        let first = select_relevant(&memory, &current);
        let second = select_relevant(&memory, &current);
        prop_assert_eq!(&first, &second);
        prop_assert!(first.iter().all(|e| e.target_index < current.index));
        prop_assert!(first.windows(2).all(|w| w[0].target_index < w[1].target_index));
    }

    #[test]
    fn refinement_terminates_within_budget(
        verdicts in prop::collection::vec(any::<bool>(), 1..8),
        max_retries in 0_u32..6,
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut model = ScriptedModel::new();
        for i in 0..max_retries {
            model = model.with_diagnosis(vec![fix_append("main.py", &format!("# {i}\n"))]);
        }
        let sandbox = Arc::new(ScriptedSandbox::new(&verdicts));
        let blueprint = parse_blueprint(&sample_blueprint_yaml(1));
        let codebase: Codebase = std::iter::once(("main.py".to_string(), "print(1)\n".to_string())).collect();

        let outcome = runtime.block_on(
            RefinementEngine::new(Arc::new(model), sandbox.clone(), max_retries)
                .refine(codebase, &blueprint, &RequestParameters::default()),
        );

        prop_assert!(outcome.attempts <= max_retries);
        prop_assert_eq!(outcome.sandbox_runs, outcome.attempts + 1);
        prop_assert_eq!(sandbox.run_count(), outcome.sandbox_runs as usize);
        match outcome.status {
            RefinementStatus::Passed => prop_assert!(outcome.last_trajectory.exit_code == Some(0)),
            RefinementStatus::Exhausted => prop_assert_eq!(outcome.attempts, max_retries),
        }
    }
}
