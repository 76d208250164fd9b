//! Refinement Engine
//!
//! Static check once, then a bounded execute → diagnose → patch loop:
//!
//! ```text
//! STATIC_CHECK → SANDBOX_RUN → { PASSED | DIAGNOSE → PATCH → SANDBOX_RUN … }
//! ```
//!
//! Patches are all-or-nothing and may never delete a blueprint target.
//! Running out of retries is a status ([`RefinementStatus::Exhausted`]),
//! not an error: the last patched codebase is still handed back.

use crate::blueprint::{path_extension, Blueprint};
use crate::error::{RefinementError, SandboxError};
use crate::model::{bounded, DiagnosisRequest, GenerativeModel};
use crate::progress::{ProgressReporter, VERIFYING};
use crate::types::{Phase, RequestParameters};
use async_trait::async_trait;
use repro_artifact::{AppliedPatch, Codebase, CodebaseDiff, ContentHash, FileEdit, Patch};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Static analysis
// ---------------------------------------------------------------------------

/// Issue severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Will break the run
    Error,
    /// Suspicious
    Warning,
}

/// Finding from static analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaticIssue {
    /// File concerned, if any
    pub path: Option<String>,
    /// Severity
    pub severity: Severity,
    /// Description
    pub message: String,
}

impl StaticIssue {
    fn new(path: Option<&str>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            path: path.map(str::to_string),
            severity,
            message: message.into(),
        }
    }
}

/// Static analyzer run once before the first sandbox execution
pub trait StaticAnalyzer: Send + Sync + std::fmt::Debug {
    /// Inspect the codebase against its blueprint
    fn analyze(&self, codebase: &Codebase, blueprint: &Blueprint) -> Vec<StaticIssue>;
}

/// Blueprint conformance and delimiter checks
#[derive(Debug, Clone, Copy, Default)]
pub struct ConformanceAnalyzer;

impl ConformanceAnalyzer {
    /// Create analyzer
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl StaticAnalyzer for ConformanceAnalyzer {
    fn analyze(&self, codebase: &Codebase, blueprint: &Blueprint) -> Vec<StaticIssue> {
        let mut issues = Vec::new();

        for target in blueprint.targets() {
            if !codebase.contains(&target.path) {
                issues.push(StaticIssue::new(
                    Some(&target.path),
                    Severity::Error,
                    "blueprint target missing from codebase",
                ));
            }
        }

        let entry = blueprint.entry_point();
        if !codebase.contains(entry) {
            issues.push(StaticIssue::new(
                Some(entry),
                Severity::Error,
                "validation entry point missing from codebase",
            ));
        }

        for (path, content) in codebase.iter() {
            if content.trim().is_empty() {
                issues.push(StaticIssue::new(Some(path), Severity::Error, "file is empty"));
                continue;
            }
            let syntax = match path_extension(path) {
                Some("py" | "sh" | "r" | "rb" | "jl") => Some(("#", SCRIPT_QUOTES)),
                Some("rs") => Some(("//", RUST_QUOTES)),
                Some("go" | "js" | "jsx" | "mjs" | "ts" | "tsx" | "java" | "c" | "cc" | "cpp" | "cu" | "h" | "hpp") => {
                    Some(("//", SCRIPT_QUOTES))
                }
                _ => None,
            };
            if let Some((comment, quotes)) = syntax {
                if let Some(message) = delimiter_imbalance(content, comment, quotes) {
                    issues.push(StaticIssue::new(Some(path), Severity::Warning, message));
                }
            }
        }

        issues
    }
}

const SCRIPT_QUOTES: &[char] = &['"', '\'', '`'];
// lifetimes make `'` ambiguous
const RUST_QUOTES: &[char] = &['"'];

/// First delimiter problem, ignoring quoted text and line comments
fn delimiter_imbalance(content: &str, comment: &str, quotes: &[char]) -> Option<String> {
    let mut stack: Vec<(char, usize)> = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line_no = number + 1;
        let mut quote: Option<char> = None;
        let mut escaped = false;
        for (at, ch) in line.char_indices() {
            if let Some(q) = quote {
                if escaped {
                    escaped = false;
                } else if ch == '\\' {
                    escaped = true;
                } else if ch == q {
                    quote = None;
                }
                continue;
            }
            if line[at..].starts_with(comment) {
                break;
            }
            match ch {
                q if quotes.contains(&q) => quote = Some(q),
                '(' | '[' | '{' => stack.push((ch, line_no)),
                ')' | ']' | '}' => {
                    let expected = match ch {
                        ')' => '(',
                        ']' => '[',
                        _ => '{',
                    };
                    match stack.pop() {
                        Some((open, _)) if open == expected => {}
                        Some((open, opened)) => {
                            return Some(format!(
                                "'{ch}' on line {line_no} closes '{open}' from line {opened}"
                            ));
                        }
                        None => return Some(format!("unmatched '{ch}' on line {line_no}")),
                    }
                }
                _ => {}
            }
        }
    }
    stack
        .pop()
        .map(|(open, line_no)| format!("'{open}' on line {line_no} is never closed"))
}

// ---------------------------------------------------------------------------
// Sandbox
// ---------------------------------------------------------------------------

/// Observable result of one sandbox execution
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxTrajectory {
    /// Process exit code; `None` if killed or never started
    pub exit_code: Option<i32>,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Wall-clock duration
    pub duration_ms: u64,
    /// Killed by the timeout
    pub timed_out: bool,
}

impl SandboxTrajectory {
    /// Trajectory for a run that could not be started
    #[must_use]
    pub fn infrastructure_failure(message: impl Into<String>) -> Self {
        Self {
            stderr: message.into(),
            ..Self::default()
        }
    }

    /// Trajectory for a run killed by the timeout
    #[must_use]
    pub fn timed_out(after: Duration) -> Self {
        Self {
            stderr: format!("execution timed out after {}s", after.as_secs()),
            duration_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
            timed_out: true,
            ..Self::default()
        }
    }
}

/// Sandbox verdict
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxRun {
    /// Entry point ran to a successful exit
    pub success: bool,
    /// What happened
    pub trajectory: SandboxTrajectory,
}

impl SandboxRun {
    /// Failed run with the given trajectory
    #[inline]
    #[must_use]
    pub fn failed(trajectory: SandboxTrajectory) -> Self {
        Self {
            success: false,
            trajectory,
        }
    }
}

/// Isolated executor for a codebase
///
/// Every call must run against a fresh copy; nothing carries over between
/// runs.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `entry_point` inside a fresh copy of `codebase`
    async fn run(&self, codebase: &Codebase, entry_point: &str) -> Result<SandboxRun, SandboxError>;
}

// ---------------------------------------------------------------------------
// Refinement loop
// ---------------------------------------------------------------------------

/// Fix proposed for one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixSuggestion {
    /// File the fix is about
    pub path: String,
    /// Diagnosis
    pub rationale: String,
    /// File-scoped edits
    pub edits: Vec<FileEdit>,
}

/// Terminal refinement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefinementStatus {
    /// A sandbox run succeeded
    Passed,
    /// Retry budget spent without a passing run
    Exhausted,
}

/// What one diagnose/patch cycle did
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IterationOutcome {
    /// Patch applied and the sandbox re-ran
    Patched {
        /// Files the patch touched
        diff: CodebaseDiff,
        /// Whether the re-run passed
        passed: bool,
    },
    /// Diagnosis failed or the patch was discarded; no re-run
    Discarded {
        /// Why
        reason: String,
    },
}

/// One diagnose/patch cycle
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RefinementIteration {
    /// 1-based cycle number
    pub attempt: u32,
    /// Outcome
    pub outcome: IterationOutcome,
}

/// Refinement result
#[derive(Debug, Clone)]
pub struct RefinementOutcome {
    /// Final codebase (last successfully patched version)
    pub codebase: Codebase,
    /// Passed or exhausted
    pub status: RefinementStatus,
    /// Diagnose/patch cycles consumed
    pub attempts: u32,
    /// Sandbox executions performed
    pub sandbox_runs: u32,
    /// Static findings carried into every diagnosis
    pub static_issues: Vec<StaticIssue>,
    /// Trajectory of the latest sandbox run
    pub last_trajectory: SandboxTrajectory,
    /// Per-cycle log
    pub iterations: Vec<RefinementIteration>,
    /// Fingerprint of the final codebase
    pub fingerprint: ContentHash,
}

/// Diagnose/patch/re-run loop
pub struct RefinementEngine {
    model: Arc<dyn GenerativeModel>,
    sandbox: Arc<dyn Sandbox>,
    analyzer: Arc<dyn StaticAnalyzer>,
    max_retries: u32,
    call_timeout: Option<Duration>,
    sandbox_timeout: Duration,
    progress: ProgressReporter,
}

impl std::fmt::Debug for RefinementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefinementEngine")
            .field("analyzer", &self.analyzer)
            .field("max_retries", &self.max_retries)
            .field("call_timeout", &self.call_timeout)
            .field("sandbox_timeout", &self.sandbox_timeout)
            .finish_non_exhaustive()
    }
}

impl RefinementEngine {
    /// Create engine with the default analyzer
    #[must_use]
    pub fn new(model: Arc<dyn GenerativeModel>, sandbox: Arc<dyn Sandbox>, max_retries: u32) -> Self {
        Self {
            model,
            sandbox,
            analyzer: Arc::new(ConformanceAnalyzer::new()),
            max_retries,
            call_timeout: None,
            sandbox_timeout: Duration::from_secs(600),
            progress: ProgressReporter::disabled(),
        }
    }

    /// With static analyzer
    #[inline]
    #[must_use]
    pub fn with_analyzer(mut self, analyzer: Arc<dyn StaticAnalyzer>) -> Self {
        self.analyzer = analyzer;
        self
    }

    /// With diagnosis call timeout
    #[inline]
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// With sandbox run timeout
    #[inline]
    #[must_use]
    pub fn with_sandbox_timeout(mut self, timeout: Duration) -> Self {
        self.sandbox_timeout = timeout;
        self
    }

    /// With progress reporter
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, progress: ProgressReporter) -> Self {
        self.progress = progress;
        self
    }

    /// Run the refinement loop to completion.
    ///
    /// Never fails: sandbox, diagnosis and patch failures all consume
    /// budget and end in [`RefinementStatus::Exhausted`] at worst.
    pub async fn refine(
        &self,
        mut codebase: Codebase,
        blueprint: &Blueprint,
        params: &RequestParameters,
    ) -> RefinementOutcome {
        self.progress
            .report(Phase::Verifying, VERIFYING, "Running static analysis");
        let static_issues = self.analyzer.analyze(&codebase, blueprint);
        if !static_issues.is_empty() {
            tracing::warn!(issues = static_issues.len(), "Static analysis reported issues");
        }

        let protected = blueprint.target_paths();
        let entry_point = blueprint.entry_point();

        let mut run = self.execute(&codebase, entry_point).await;
        let mut sandbox_runs = 1;
        let mut attempts = 0;
        let mut iterations = Vec::new();

        while !run.success && attempts < self.max_retries {
            attempts += 1;
            tracing::debug!(attempt = attempts, max = self.max_retries, "Diagnosing failed run");
            self.progress.report(
                Phase::Verifying,
                VERIFYING,
                format!("Repair cycle {attempts}/{}", self.max_retries),
            );

            let request = DiagnosisRequest {
                trajectory: &run.trajectory,
                issues: &static_issues,
                codebase: &codebase,
                blueprint,
            };
            let outcome = match self.propose_patch(&request, &protected, params).await {
                Ok(applied) => {
                    codebase = applied.codebase;
                    run = self.execute(&codebase, entry_point).await;
                    sandbox_runs += 1;
                    tracing::info!(
                        attempt = attempts,
                        modified = applied.diff.modified.len(),
                        added = applied.diff.added.len(),
                        passed = run.success,
                        "Patch applied"
                    );
                    IterationOutcome::Patched {
                        diff: applied.diff,
                        passed: run.success,
                    }
                }
                Err(e) => {
                    tracing::warn!(attempt = attempts, error = %e, "Repair cycle discarded");
                    IterationOutcome::Discarded { reason: e.to_string() }
                }
            };
            iterations.push(RefinementIteration {
                attempt: attempts,
                outcome,
            });
        }

        let status = if run.success {
            RefinementStatus::Passed
        } else {
            RefinementStatus::Exhausted
        };
        let fingerprint = codebase.fingerprint();
        tracing::info!(?status, attempts, sandbox_runs, fingerprint = %fingerprint.short(), "Refinement finished");

        RefinementOutcome {
            codebase,
            status,
            attempts,
            sandbox_runs,
            static_issues,
            last_trajectory: run.trajectory,
            iterations,
            fingerprint,
        }
    }

    async fn propose_patch(
        &self,
        request: &DiagnosisRequest<'_>,
        protected: &HashSet<String>,
        params: &RequestParameters,
    ) -> Result<AppliedPatch, RefinementError> {
        let suggestions = bounded(self.call_timeout, self.model.diagnose(request, params)).await?;
        let patch = Patch::new(suggestions.into_iter().flat_map(|s| s.edits).collect());
        Ok(patch.apply(request.codebase, protected)?)
    }

    async fn execute(&self, codebase: &Codebase, entry_point: &str) -> SandboxRun {
        match tokio::time::timeout(self.sandbox_timeout, self.sandbox.run(codebase, entry_point)).await {
            Ok(Ok(run)) => run,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Sandbox infrastructure failure");
                SandboxRun::failed(SandboxTrajectory::infrastructure_failure(e.to_string()))
            }
            Err(_) => {
                tracing::warn!(timeout = ?self.sandbox_timeout, "Sandbox run timed out");
                SandboxRun::failed(SandboxTrajectory::timed_out(self.sandbox_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blueprint::Provenance;

    const BLUEPRINT: &str = "project:\n  name: demo\nfile_structure:\n  - path: model.py\n  - path: main.py\nimplementation_components: []\nvalidation:\n  entry_point: main.py\nenvironment:\n  language: python\n";

    fn blueprint() -> Blueprint {
        Blueprint::parse(BLUEPRINT, Provenance::Gate { score: 1.0, attempt: 1 }).unwrap()
    }

    #[test]
    fn analyzer_reports_missing_and_empty_files() {
        let mut cb = Codebase::new();
        cb.insert_new("model.py", "   \n").unwrap();
        let issues = ConformanceAnalyzer.analyze(&cb, &blueprint());
        let messages: Vec<_> = issues.iter().map(|i| i.message.as_str()).collect();
        assert!(messages.contains(&"blueprint target missing from codebase"));
        assert!(messages.contains(&"validation entry point missing from codebase"));
        assert!(messages.contains(&"file is empty"));
    }

    #[test]
    fn analyzer_flags_unbalanced_delimiters() {
        let mut cb = Codebase::new();
        cb.insert_new("model.py", "def f(x:\n    return [x\n").unwrap();
        cb.insert_new("main.py", "print('(unbalanced in string')  # ) in comment\n").unwrap();
        let issues = ConformanceAnalyzer.analyze(&cb, &blueprint());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].path.as_deref(), Some("model.py"));
        assert_eq!(issues[0].severity, Severity::Warning);
    }

    #[test]
    fn mismatched_closer_is_reported() {
        let msg = delimiter_imbalance("foo(]\n", "#", SCRIPT_QUOTES).unwrap();
        assert!(msg.contains("closes '('"));
        assert!(delimiter_imbalance("a = {'k': [1, 2]}\n", "#", SCRIPT_QUOTES).is_none());
    }

    #[test]
    fn timed_out_trajectory() {
        let t = SandboxTrajectory::timed_out(Duration::from_secs(2));
        assert!(t.timed_out);
        assert_eq!(t.duration_ms, 2000);
        assert_eq!(t.exit_code, None);
    }
}
