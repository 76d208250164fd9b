//! Testing utilities for REPRO workspace
//!
//! Scripted fakes for every external collaborator plus blueprint fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use repro_artifact::{Codebase, FileEdit};
use repro_core::{
    AmbiguityQuestion, AnalysisKind, AnsweredQuestion, Blueprint, Chunk, CompletenessReport,
    CompletenessScorer, DiagnosisRequest, FixSuggestion, GenerationContext, GenerativeModel,
    ModelError, PlanSection, Provenance, RagSnippet, ReferenceError, ReferenceIndex,
    ReferenceIntel, ReferenceRepository, ReferenceSource, RequestParameters, Sandbox,
    SandboxError, SandboxRun, SandboxTrajectory, SegmentError, Segmentation, Segmenter,
    SourceDocument, StructurePlan, StructuredOutput, TargetFile, TechnicalSpec,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Blueprint fixtures
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct FixtureTarget {
    path: String,
    role: String,
    depends_on: Vec<String>,
}

/// YAML blueprint builder
#[derive(Debug, Clone)]
pub struct BlueprintYaml {
    name: String,
    targets: Vec<FixtureTarget>,
    entry_point: Option<String>,
    open_questions: Vec<String>,
    omitted: HashSet<String>,
    truncated: bool,
}

impl BlueprintYaml {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            targets: Vec::new(),
            entry_point: None,
            open_questions: Vec::new(),
            omitted: HashSet::new(),
            truncated: false,
        }
    }

    pub fn target(self, path: &str, role: &str) -> Self {
        self.target_with_deps(path, role, &[])
    }

    pub fn target_with_deps(mut self, path: &str, role: &str, deps: &[&str]) -> Self {
        self.targets.push(FixtureTarget {
            path: path.to_string(),
            role: role.to_string(),
            depends_on: deps.iter().map(|d| (*d).to_string()).collect(),
        });
        self
    }

    /// Entry point (defaults to the last target)
    pub fn entry(mut self, entry_point: &str) -> Self {
        self.entry_point = Some(entry_point.to_string());
        self
    }

    pub fn open_question(mut self, question: &str) -> Self {
        self.open_questions.push(question.to_string());
        self
    }

    pub fn without_section(mut self, section: &str) -> Self {
        self.omitted.insert(section.to_string());
        self
    }

    /// Cut the document mid-list
    pub fn truncated(mut self) -> Self {
        self.truncated = true;
        self
    }

    pub fn build(&self) -> String {
        let mut out = String::new();
        if !self.omitted.contains("project") {
            out.push_str(&format!(
                "project:\n  name: {}\n  summary: Reproduction of {}\n",
                self.name, self.name
            ));
        }
        if !self.omitted.contains("file_structure") {
            out.push_str("file_structure:\n");
            for t in &self.targets {
                out.push_str(&format!("  - path: {}\n    role: \"{}\"\n", t.path, t.role));
                if !t.depends_on.is_empty() {
                    out.push_str(&format!("    depends_on: [{}]\n", t.depends_on.join(", ")));
                }
            }
        }
        if !self.omitted.contains("implementation_components") {
            out.push_str("implementation_components:\n  - name: core\n    description: main algorithm\n");
        }
        if !self.omitted.contains("validation") {
            let entry = self
                .entry_point
                .clone()
                .or_else(|| self.targets.last().map(|t| t.path.clone()))
                .unwrap_or_else(|| "main.py".to_string());
            out.push_str(&format!(
                "validation:\n  entry_point: {entry}\n  success_criteria: [\"runs to completion\"]\n"
            ));
        }
        if !self.open_questions.is_empty() {
            out.push_str("open_questions:\n");
            for q in &self.open_questions {
                out.push_str(&format!("  - \"{q}\"\n"));
            }
        }
        if !self.omitted.contains("environment") {
            out.push_str("environment:\n  language: python\n  dependencies: [numpy");
            if self.truncated {
                return out;
            }
            out.push_str("]\n");
        }
        out
    }
}

/// `n` python targets; the last one (`main.py`) is the entry point
pub fn sample_blueprint_yaml(n: usize) -> String {
    let mut yaml = BlueprintYaml::new("sample");
    for i in 0..n.saturating_sub(1) {
        yaml = yaml.target(&format!("pkg/module_{i}.py"), &format!("component {i}"));
    }
    yaml.target("main.py", "entry point").build()
}

/// Parse fixture YAML as a gate-accepted blueprint
pub fn parse_blueprint(yaml: &str) -> Blueprint {
    Blueprint::parse(yaml, Provenance::Gate { score: 1.0, attempt: 1 }).unwrap()
}

pub fn fix_append(path: &str, content: &str) -> FixSuggestion {
    FixSuggestion {
        path: path.to_string(),
        rationale: format!("append to {path}"),
        edits: vec![FileEdit::Append {
            path: path.to_string(),
            content: content.to_string(),
        }],
    }
}

pub fn fix_replace(path: &str, find: &str, replace: &str) -> FixSuggestion {
    FixSuggestion {
        path: path.to_string(),
        rationale: format!("patch {path}"),
        edits: vec![FileEdit::Replace {
            path: path.to_string(),
            find: find.to_string(),
            replace: replace.to_string(),
        }],
    }
}

// ---------------------------------------------------------------------------
// Scripted model
// ---------------------------------------------------------------------------

/// One recorded `generate` call
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateCall {
    pub path: String,
    pub target_index: usize,
    pub params: RequestParameters,
    pub memory_paths: Vec<String>,
    pub memory_indices: Vec<usize>,
    pub snippets: usize,
}

#[derive(Debug, Default)]
struct ModelScript {
    merges: VecDeque<Result<String, ModelError>>,
    fallback_merge: Option<String>,
    analysis_errors: VecDeque<ModelError>,
    questions: Option<Result<Vec<AmbiguityQuestion>, ModelError>>,
    summaries: VecDeque<Result<String, ModelError>>,
    generations: HashMap<String, VecDeque<Result<String, ModelError>>>,
    diagnoses: VecDeque<Result<Vec<FixSuggestion>, ModelError>>,

    analyze_calls: Vec<(AnalysisKind, RequestParameters)>,
    merge_params: Vec<RequestParameters>,
    generate_calls: Vec<GenerateCall>,
    summarize_calls: Vec<Vec<AnsweredQuestion>>,
    diagnose_calls: usize,
}

/// Generative model driven by queued responses
#[derive(Debug, Default)]
pub struct ScriptedModel {
    script: Mutex<ModelScript>,
    analysis_delay: Option<Duration>,
    generation_delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one merge result
    pub fn with_merge(self, candidate: impl Into<String>) -> Self {
        self.script.lock().merges.push_back(Ok(candidate.into()));
        self
    }

    pub fn with_merge_error(self, error: ModelError) -> Self {
        self.script.lock().merges.push_back(Err(error));
        self
    }

    /// Merge result once the queue is empty
    pub fn with_default_merge(self, candidate: impl Into<String>) -> Self {
        self.script.lock().fallback_merge = Some(candidate.into());
        self
    }

    /// Fail the next analysis call
    pub fn with_analysis_error(self, error: ModelError) -> Self {
        self.script.lock().analysis_errors.push_back(error);
        self
    }

    pub fn with_analysis_delay(mut self, delay: Duration) -> Self {
        self.analysis_delay = Some(delay);
        self
    }

    pub fn with_generation_delay(mut self, delay: Duration) -> Self {
        self.generation_delay = Some(delay);
        self
    }

    pub fn with_questions(self, questions: Vec<AmbiguityQuestion>) -> Self {
        self.script.lock().questions = Some(Ok(questions));
        self
    }

    pub fn with_questions_error(self, error: ModelError) -> Self {
        self.script.lock().questions = Some(Err(error));
        self
    }

    pub fn with_summary(self, yaml: impl Into<String>) -> Self {
        self.script.lock().summaries.push_back(Ok(yaml.into()));
        self
    }

    /// Queue content for a target path (used before the default)
    pub fn with_generation(self, path: &str, content: impl Into<String>) -> Self {
        self.script
            .lock()
            .generations
            .entry(path.to_string())
            .or_default()
            .push_back(Ok(content.into()));
        self
    }

    pub fn with_generation_error(self, path: &str, error: ModelError) -> Self {
        self.script
            .lock()
            .generations
            .entry(path.to_string())
            .or_default()
            .push_back(Err(error));
        self
    }

    pub fn with_diagnosis(self, fixes: Vec<FixSuggestion>) -> Self {
        self.script.lock().diagnoses.push_back(Ok(fixes));
        self
    }

    pub fn with_diagnosis_error(self, error: ModelError) -> Self {
        self.script.lock().diagnoses.push_back(Err(error));
        self
    }

    pub fn analyze_calls(&self) -> Vec<(AnalysisKind, RequestParameters)> {
        self.script.lock().analyze_calls.clone()
    }

    pub fn merge_params(&self) -> Vec<RequestParameters> {
        self.script.lock().merge_params.clone()
    }

    pub fn generate_calls(&self) -> Vec<GenerateCall> {
        self.script.lock().generate_calls.clone()
    }

    pub fn summarize_calls(&self) -> Vec<Vec<AnsweredQuestion>> {
        self.script.lock().summarize_calls.clone()
    }

    pub fn diagnose_calls(&self) -> usize {
        self.script.lock().diagnose_calls
    }

    /// Highest number of analysis calls seen running at once
    pub fn max_concurrent_analyses(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Content generated when nothing is scripted for a path
pub fn default_generation(target: &TargetFile) -> String {
    format!(
        "\"\"\"{}\"\"\"\n\n\ndef {}_entry():\n    return {}\n",
        target.role,
        target.stem().trim_matches('_'),
        target.index
    )
}

#[async_trait]
impl GenerativeModel for ScriptedModel {
    async fn analyze(
        &self,
        kind: AnalysisKind,
        chunks: &[Chunk],
        params: &RequestParameters,
    ) -> Result<StructuredOutput, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.analysis_delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let error = {
            let mut script = self.script.lock();
            script.analyze_calls.push((kind, *params));
            script.analysis_errors.pop_front()
        };
        if let Some(error) = error {
            return Err(error);
        }

        let sections = chunks
            .iter()
            .map(|c| PlanSection {
                heading: c.keyword.clone(),
                body: c.text.clone(),
            })
            .collect();
        Ok(match kind {
            AnalysisKind::Structure => StructuredOutput::Structure(StructurePlan { sections }),
            AnalysisKind::Technical => StructuredOutput::Technical(TechnicalSpec { sections }),
        })
    }

    async fn merge(
        &self,
        _structure: &StructurePlan,
        _technical: &TechnicalSpec,
        params: &RequestParameters,
    ) -> Result<String, ModelError> {
        let mut script = self.script.lock();
        script.merge_params.push(*params);
        match script.merges.pop_front() {
            Some(result) => result,
            None => script
                .fallback_merge
                .clone()
                .ok_or_else(|| ModelError::Malformed("no scripted merge".into())),
        }
    }

    async fn guiding_questions(
        &self,
        draft: &Blueprint,
        _params: &RequestParameters,
    ) -> Result<Vec<AmbiguityQuestion>, ModelError> {
        let scripted = self.script.lock().questions.clone();
        scripted.unwrap_or_else(|| {
            Ok(draft
                .open_questions()
                .iter()
                .map(AmbiguityQuestion::new)
                .collect())
        })
    }

    async fn summarize(
        &self,
        _document: &SourceDocument,
        answers: &[AnsweredQuestion],
        _params: &RequestParameters,
    ) -> Result<String, ModelError> {
        let mut script = self.script.lock();
        script.summarize_calls.push(answers.to_vec());
        script
            .summaries
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::Malformed("no scripted summary".into())))
    }

    async fn generate(
        &self,
        context: &GenerationContext<'_>,
        params: &RequestParameters,
    ) -> Result<String, ModelError> {
        if let Some(delay) = self.generation_delay {
            tokio::time::sleep(delay).await;
        }
        let mut script = self.script.lock();
        script.generate_calls.push(GenerateCall {
            path: context.target.path.clone(),
            target_index: context.target.index,
            params: *params,
            memory_paths: context.memory.iter().map(|e| e.path.clone()).collect(),
            memory_indices: context.memory.iter().map(|e| e.target_index).collect(),
            snippets: context.snippets.len(),
        });
        script
            .generations
            .get_mut(&context.target.path)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(default_generation(context.target)))
    }

    async fn diagnose(
        &self,
        _request: &DiagnosisRequest<'_>,
        _params: &RequestParameters,
    ) -> Result<Vec<FixSuggestion>, ModelError> {
        let mut script = self.script.lock();
        script.diagnose_calls += 1;
        script.diagnoses.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }
}

// ---------------------------------------------------------------------------
// Scripted scorer
// ---------------------------------------------------------------------------

/// Scorer returning queued scores; the last one repeats
#[derive(Debug)]
pub struct ScriptedScorer {
    scores: Mutex<VecDeque<f64>>,
    last: Mutex<f64>,
    calls: AtomicUsize,
}

impl ScriptedScorer {
    pub fn new(scores: &[f64]) -> Self {
        Self {
            scores: Mutex::new(scores.iter().copied().collect()),
            last: Mutex::new(0.0),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl CompletenessScorer for ScriptedScorer {
    fn score(&self, _candidate: &str) -> CompletenessReport {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let score = match self.scores.lock().pop_front() {
            Some(s) => {
                *self.last.lock() = s;
                s
            }
            None => *self.last.lock(),
        };
        CompletenessReport {
            score,
            missing_sections: Vec::new(),
            truncated: score < 0.5,
            structure_valid: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Scripted sandbox
// ---------------------------------------------------------------------------

/// Sandbox returning queued verdicts; the last one repeats
#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    verdicts: Mutex<VecDeque<bool>>,
    last: Mutex<bool>,
    runs: Mutex<Vec<Codebase>>,
}

impl ScriptedSandbox {
    pub fn new(verdicts: &[bool]) -> Self {
        Self {
            verdicts: Mutex::new(verdicts.iter().copied().collect()),
            last: Mutex::new(false),
            runs: Mutex::new(Vec::new()),
        }
    }

    pub fn always_pass() -> Self {
        Self::new(&[true])
    }

    pub fn always_fail() -> Self {
        Self::new(&[false])
    }

    /// Codebases seen, in run order
    pub fn runs(&self) -> Vec<Codebase> {
        self.runs.lock().clone()
    }

    pub fn run_count(&self) -> usize {
        self.runs.lock().len()
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    async fn run(&self, codebase: &Codebase, entry_point: &str) -> Result<SandboxRun, SandboxError> {
        self.runs.lock().push(codebase.clone());
        let success = match self.verdicts.lock().pop_front() {
            Some(v) => {
                *self.last.lock() = v;
                v
            }
            None => *self.last.lock(),
        };
        let run_no = self.runs.lock().len();
        Ok(SandboxRun {
            success,
            trajectory: SandboxTrajectory {
                exit_code: Some(if success { 0 } else { 1 }),
                stdout: format!("run {run_no} of {entry_point}\n"),
                stderr: if success {
                    String::new()
                } else {
                    format!("Traceback: failure in run {run_no}\n")
                },
                duration_ms: 1,
                timed_out: false,
            },
        })
    }
}

// ---------------------------------------------------------------------------
// Segmenter and reference fakes
// ---------------------------------------------------------------------------

/// Segmenter returning a fixed result
#[derive(Debug, Clone)]
pub struct FixedSegmenter {
    result: Result<Segmentation, String>,
    hangs: bool,
}

impl FixedSegmenter {
    pub fn chunks(chunks: &[(&str, &str)]) -> Self {
        Self {
            result: Ok(Segmentation::Chunks(
                chunks.iter().map(|(k, t)| Chunk::new(*k, *t)).collect(),
            )),
            hangs: false,
        }
    }

    pub fn full_document(text: &str) -> Self {
        Self {
            result: Ok(Segmentation::FullDocument(text.to_string())),
            hangs: false,
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            result: Err(message.to_string()),
            hangs: false,
        }
    }

    /// Never answers
    pub fn hanging() -> Self {
        Self {
            result: Err("unreachable".to_string()),
            hangs: true,
        }
    }
}

#[async_trait]
impl Segmenter for FixedSegmenter {
    async fn segment(&self, _document: &SourceDocument) -> Result<Segmentation, SegmentError> {
        if self.hangs {
            std::future::pending::<()>().await;
        }
        self.result.clone().map_err(SegmentError::Failed)
    }
}

/// Reference index backed by a map from target path to snippets
#[derive(Debug, Default)]
pub struct InMemoryReferenceIndex {
    snippets: HashMap<String, Vec<RagSnippet>>,
    failing: HashSet<String>,
    hanging: HashSet<String>,
    queried: Mutex<Vec<String>>,
}

impl InMemoryReferenceIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snippet(mut self, path: &str, content: &str) -> Self {
        self.snippets
            .entry(path.to_string())
            .or_default()
            .push(RagSnippet {
                source: format!("reference/{path}"),
                content: content.to_string(),
                score: 0.9,
            });
        self
    }

    pub fn failing_for(mut self, path: &str) -> Self {
        self.failing.insert(path.to_string());
        self
    }

    /// Lookups for `path` never answer
    pub fn hanging_for(mut self, path: &str) -> Self {
        self.hanging.insert(path.to_string());
        self
    }

    pub fn queried(&self) -> Vec<String> {
        self.queried.lock().clone()
    }
}

#[async_trait]
impl ReferenceIndex for InMemoryReferenceIndex {
    async fn retrieve(&self, target: &TargetFile) -> Result<Vec<RagSnippet>, ReferenceError> {
        self.queried.lock().push(target.path.clone());
        if self.hanging.contains(&target.path) {
            std::future::pending::<()>().await;
        }
        if self.failing.contains(&target.path) {
            return Err(ReferenceError::Retrieval(format!("index unavailable for {}", target.path)));
        }
        Ok(self.snippets.get(&target.path).cloned().unwrap_or_default())
    }
}

/// Reference source handing out a shared in-memory index
#[derive(Debug)]
pub struct InMemoryReferenceSource {
    index: Arc<InMemoryReferenceIndex>,
    discovery_error: Option<String>,
    acquire_hangs: bool,
    discoveries: AtomicUsize,
}

impl InMemoryReferenceSource {
    pub fn new(index: Arc<InMemoryReferenceIndex>) -> Self {
        Self {
            index,
            discovery_error: None,
            acquire_hangs: false,
            discoveries: AtomicUsize::new(0),
        }
    }

    pub fn failing_discovery(mut self, message: &str) -> Self {
        self.discovery_error = Some(message.to_string());
        self
    }

    /// Acquisition never answers
    pub fn hanging_acquire(mut self) -> Self {
        self.acquire_hangs = true;
        self
    }

    pub fn discoveries(&self) -> usize {
        self.discoveries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ReferenceSource for InMemoryReferenceSource {
    async fn discover(&self, _document: &SourceDocument) -> Result<ReferenceIntel, ReferenceError> {
        self.discoveries.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.discovery_error {
            return Err(ReferenceError::Discovery(message.clone()));
        }
        Ok(ReferenceIntel {
            repositories: vec![ReferenceRepository {
                name: "reference".into(),
                url: "https://example.invalid/reference.git".into(),
                relevance: 0.9,
            }],
        })
    }

    async fn acquire(&self, _intel: &ReferenceIntel) -> Result<Arc<dyn ReferenceIndex>, ReferenceError> {
        if self.acquire_hangs {
            std::future::pending::<()>().await;
        }
        let index: Arc<dyn ReferenceIndex> = self.index.clone();
        Ok(index)
    }
}

pub fn sample_document() -> SourceDocument {
    SourceDocument::new("paper.md", "# Attention\nWe propose a model.\n")
}
