//! REPRO Sandbox - isolated process execution
//!
//! [`ProcessSandbox`] implements the core `Sandbox` trait:
//! - Every run materializes the codebase into a fresh temporary directory
//! - The entry point runs with a cleared environment (selected variables
//!   passed through), no stdin, and captured stdout/stderr
//! - A run that outlives its timeout is killed and reported as failed
//!
//! [`load_codebase`] reads a directory back into a `Codebase`, skipping
//! build and VCS directories.

#![warn(unreachable_pub)]
#![warn(missing_docs)]

use async_trait::async_trait;
use repro_artifact::{normalize_path, Codebase, CodebaseError};
use repro_core::{Sandbox, SandboxConfig, SandboxError, SandboxRun, SandboxTrajectory};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use walkdir::WalkDir;

/// Directories never copied into or out of a sandbox
pub const SKIPPED_DIRS: [&str; 6] = [".git", "target", "node_modules", "__pycache__", ".venv", ".mypy_cache"];

/// Environment variables passed through by default
const DEFAULT_PASSTHROUGH: [&str; 3] = ["PATH", "LANG", "SYSTEMROOT"];

/// Sandbox that runs a local process
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    command: String,
    args: Vec<String>,
    timeout: Duration,
    passthrough: Vec<String>,
}

impl ProcessSandbox {
    /// Create sandbox running `command {entry}`
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: vec!["{entry}".to_string()],
            timeout: Duration::from_secs(600),
            passthrough: DEFAULT_PASSTHROUGH.iter().map(|s| (*s).to_string()).collect(),
        }
    }

    /// Create sandbox from configuration
    #[must_use]
    pub fn from_config(config: &SandboxConfig, timeout: Duration) -> Self {
        Self::new(config.command.clone())
            .with_args(config.args.clone())
            .with_timeout(timeout)
    }

    /// With arguments; `{entry}` is replaced by the entry point
    #[inline]
    #[must_use]
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.args = args;
        self
    }

    /// With run timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// With an extra environment variable passed through
    #[inline]
    #[must_use]
    pub fn with_env_passthrough(mut self, key: impl Into<String>) -> Self {
        self.passthrough.push(key.into());
        self
    }

    fn resolved_args(&self, entry_point: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace("{entry}", entry_point))
            .collect()
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn run(&self, codebase: &Codebase, entry_point: &str) -> Result<SandboxRun, SandboxError> {
        if !codebase.contains(entry_point) {
            return Err(SandboxError::MissingEntryPoint(entry_point.to_string()));
        }

        let workdir = tempfile::Builder::new().prefix("repro-sandbox-").tempdir()?;
        materialize(codebase, workdir.path()).await?;

        let mut command = Command::new(&self.command);
        command
            .args(self.resolved_args(entry_point))
            .current_dir(workdir.path())
            .env_clear()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.passthrough {
            if let Ok(value) = std::env::var(key) {
                command.env(key, value);
            }
        }

        tracing::debug!(
            command = %self.command,
            entry_point,
            dir = %workdir.path().display(),
            "Starting sandbox run"
        );
        let started = Instant::now();
        let child = command.spawn().map_err(|source| SandboxError::Spawn {
            command: self.command.clone(),
            source,
        })?;

        // dropping the child on timeout kills it
        let Ok(output) = tokio::time::timeout(self.timeout, child.wait_with_output()).await else {
            tracing::warn!(timeout = ?self.timeout, entry_point, "Sandbox run timed out");
            return Ok(SandboxRun::failed(SandboxTrajectory::timed_out(self.timeout)));
        };
        let output = output?;

        let trajectory = SandboxTrajectory {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            timed_out: false,
        };
        tracing::debug!(exit_code = ?trajectory.exit_code, duration_ms = trajectory.duration_ms, "Sandbox run finished");

        Ok(SandboxRun {
            success: output.status.success(),
            trajectory,
        })
    }
}

/// Write every file of `codebase` under `root`.
///
/// # Errors
/// `SandboxError::Materialize` naming the file that could not be written
pub async fn materialize(codebase: &Codebase, root: &Path) -> Result<(), SandboxError> {
    for (path, content) in codebase.iter() {
        let full = root.join(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SandboxError::Materialize {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|source| SandboxError::Materialize { path: full, source })?;
    }
    Ok(())
}

/// Read a directory into a codebase.
///
/// Files are added in sorted path order. Non-UTF-8 files are skipped.
///
/// # Errors
/// Directory walk or read failures
pub fn load_codebase(root: &Path) -> Result<Codebase, LoadError> {
    let mut codebase = Codebase::new();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| {
            e.depth() == 0 || !SKIPPED_DIRS.contains(&e.file_name().to_string_lossy().as_ref())
        });

    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let full = entry.path();
        let relative = full
            .strip_prefix(root)
            .map_err(|_| LoadError::OutsideRoot(full.to_path_buf()))?;
        let bytes = std::fs::read(full).map_err(|source| LoadError::Io {
            path: full.to_path_buf(),
            source,
        })?;
        let Ok(content) = String::from_utf8(bytes) else {
            tracing::debug!(path = %full.display(), "Skipping non-UTF-8 file");
            continue;
        };
        let key = normalize_path(&relative.to_string_lossy())?;
        codebase.insert_new(key, content)?;
    }
    Ok(codebase)
}

/// Directory loading errors
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// Directory walk failed
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// File could not be read
    #[error("io error reading {path}: {source}")]
    Io {
        /// File being read
        path: PathBuf,
        /// Underlying failure
        #[source]
        source: std::io::Error,
    },

    /// Walked entry is not under the root
    #[error("path outside root: {0}")]
    OutsideRoot(PathBuf),

    /// Path rejected by the codebase model
    #[error(transparent)]
    Codebase(#[from] CodebaseError),
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sh_sandbox() -> ProcessSandbox {
        ProcessSandbox::new("sh").with_timeout(Duration::from_secs(10))
    }

    fn codebase(files: &[(&str, &str)]) -> Codebase {
        files
            .iter()
            .map(|(p, c)| ((*p).to_string(), (*c).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn successful_run_captures_output() {
        let cb = codebase(&[("main.sh", ". lib/helpers.sh\ngreet\n"), ("lib/helpers.sh", "greet() { echo hello; }\n")]);
        let run = sh_sandbox().run(&cb, "main.sh").await.unwrap();
        assert!(run.success);
        assert_eq!(run.trajectory.stdout.trim(), "hello");
        assert_eq!(run.trajectory.exit_code, Some(0));
    }

    #[tokio::test]
    async fn failing_run_reports_stderr() {
        let cb = codebase(&[("main.sh", "echo boom >&2\nexit 3\n")]);
        let run = sh_sandbox().run(&cb, "main.sh").await.unwrap();
        assert!(!run.success);
        assert_eq!(run.trajectory.exit_code, Some(3));
        assert_eq!(run.trajectory.stderr.trim(), "boom");
    }

    #[tokio::test]
    async fn every_run_starts_fresh() {
        let cb = codebase(&[("main.sh", "test ! -e marker || exit 1\ntouch marker\n")]);
        let sandbox = sh_sandbox();
        assert!(sandbox.run(&cb, "main.sh").await.unwrap().success);
        assert!(sandbox.run(&cb, "main.sh").await.unwrap().success);
    }

    #[tokio::test]
    async fn environment_is_cleared() {
        std::env::set_var("REPRO_SANDBOX_SECRET", "leak");
        let cb = codebase(&[("main.sh", "printf '%s' \"$REPRO_SANDBOX_SECRET\"\n")]);
        let run = sh_sandbox().run(&cb, "main.sh").await.unwrap();
        assert_eq!(run.trajectory.stdout, "");
    }

    #[tokio::test]
    async fn timeout_is_a_failed_run() {
        let cb = codebase(&[("main.sh", "sleep 5\n")]);
        let run = sh_sandbox()
            .with_timeout(Duration::from_millis(200))
            .run(&cb, "main.sh")
            .await
            .unwrap();
        assert!(!run.success);
        assert!(run.trajectory.timed_out);
    }

    #[tokio::test]
    async fn missing_entry_point_is_an_error() {
        let cb = codebase(&[("other.sh", "true\n")]);
        let err = sh_sandbox().run(&cb, "main.sh").await.unwrap_err();
        assert!(matches!(err, SandboxError::MissingEntryPoint(p) if p == "main.sh"));
    }

    #[test]
    fn load_skips_vcs_and_build_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::create_dir_all(root.join("__pycache__")).unwrap();
        std::fs::write(root.join("main.py"), "print(1)\n").unwrap();
        std::fs::write(root.join("src/model.py"), "X = 1\n").unwrap();
        std::fs::write(root.join(".git/HEAD"), "ref\n").unwrap();
        std::fs::write(root.join("__pycache__/model.pyc"), [0xff_u8, 0xfe]).unwrap();

        let cb = load_codebase(root).unwrap();
        assert_eq!(cb.paths().collect::<Vec<_>>(), vec!["main.py", "src/model.py"]);
    }

    #[test]
    fn from_config_substitutes_entry() {
        let sandbox = ProcessSandbox::from_config(&SandboxConfig::default(), Duration::from_secs(1));
        assert_eq!(sandbox.resolved_args("run.py"), vec!["run.py".to_string()]);
    }
}
