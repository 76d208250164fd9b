//! Pipeline configuration
//!
//! [`PipelineConfig`] can be built in code with `with_*` methods or loaded
//! from TOML / YAML. Every section has defaults, so a config file only needs
//! to name what it overrides. Call [`PipelineConfig::validate`] before use;
//! the loaders do it for you.

use crate::error::ConfigError;
use crate::types::RequestParameters;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Top-level pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Query reference repositories during synthesis
    pub enable_indexing: bool,
    /// Maximum diagnose/patch cycles during refinement
    pub max_retries: u32,
    /// Initial model request parameters
    pub request_params: RequestParameters,
    /// Planning gate and retry policy
    pub planning: PlanningConfig,
    /// Per-target generation policy
    pub synthesis: SynthesisConfig,
    /// Model and sandbox timeouts
    pub timeouts: TimeoutConfig,
    /// Ambiguity checkpoint policy
    pub checkpoint: CheckpointConfig,
    /// Process sandbox command
    pub sandbox: SandboxConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            enable_indexing: false,
            max_retries: 3,
            request_params: RequestParameters::default(),
            planning: PlanningConfig::default(),
            synthesis: SynthesisConfig::default(),
            timeouts: TimeoutConfig::default(),
            checkpoint: CheckpointConfig::default(),
            sandbox: SandboxConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With reference indexing enabled or disabled
    #[inline]
    #[must_use]
    pub fn with_indexing(mut self, enabled: bool) -> Self {
        self.enable_indexing = enabled;
        self
    }

    /// With refinement retry budget
    #[inline]
    #[must_use]
    pub fn with_max_retries(mut self, max: u32) -> Self {
        self.max_retries = max;
        self
    }

    /// With initial request parameters
    #[inline]
    #[must_use]
    pub fn with_request_params(mut self, params: RequestParameters) -> Self {
        self.request_params = params;
        self
    }

    /// With planning policy
    #[inline]
    #[must_use]
    pub fn with_planning(mut self, planning: PlanningConfig) -> Self {
        self.planning = planning;
        self
    }

    /// With synthesis policy
    #[inline]
    #[must_use]
    pub fn with_synthesis(mut self, synthesis: SynthesisConfig) -> Self {
        self.synthesis = synthesis;
        self
    }

    /// With timeouts
    #[inline]
    #[must_use]
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// With checkpoint policy
    #[inline]
    #[must_use]
    pub fn with_checkpoint(mut self, checkpoint: CheckpointConfig) -> Self {
        self.checkpoint = checkpoint;
        self
    }

    /// With sandbox command
    #[inline]
    #[must_use]
    pub fn with_sandbox(mut self, sandbox: SandboxConfig) -> Self {
        self.sandbox = sandbox;
        self
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    /// Syntax, schema or range errors
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate a YAML document.
    ///
    /// # Errors
    /// Syntax, schema or range errors
    pub fn from_yaml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.toml`, `.yaml` or `.yml` file.
    ///
    /// # Errors
    /// I/O, unsupported extension, syntax, schema or range errors
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_str(&contents),
            Some("yaml" | "yml") => Self::from_yaml_str(&contents),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Check value ranges.
    ///
    /// # Errors
    /// `ConfigError::Invalid` naming the first offending field
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.request_params.max_output_tokens == 0 {
            return invalid("request_params.max_output_tokens must be > 0");
        }
        if !(0.0..=2.0).contains(&self.request_params.temperature) {
            return invalid("request_params.temperature must be within 0.0..=2.0");
        }

        let p = &self.planning;
        if p.max_attempts == 0 {
            return invalid("planning.max_attempts must be > 0");
        }
        if !(0.0..=1.0).contains(&p.acceptance_threshold) {
            return invalid("planning.acceptance_threshold must be within 0.0..=1.0");
        }
        if !(p.token_decay > 0.0 && p.token_decay < 1.0) {
            return invalid("planning.token_decay must be within (0.0, 1.0)");
        }
        if p.min_output_tokens == 0 {
            return invalid("planning.min_output_tokens must be > 0");
        }
        if p.temperature_step <= 0.0 {
            return invalid("planning.temperature_step must be > 0");
        }
        if p.min_temperature < 0.0 {
            return invalid("planning.min_temperature must be >= 0");
        }

        if self.synthesis.max_generation_attempts == 0 {
            return invalid("synthesis.max_generation_attempts must be > 0");
        }
        if self.synthesis.retry_temperature_step < 0.0 {
            return invalid("synthesis.retry_temperature_step must be >= 0");
        }

        let t = &self.timeouts;
        if [t.model_call_secs, Some(t.sandbox_secs), t.segmentation_secs, t.reference_secs].contains(&Some(0)) {
            return invalid("timeouts must be > 0 seconds");
        }
        if self.checkpoint.timeout_secs == Some(0) {
            return invalid("checkpoint.timeout_secs must be > 0 when set");
        }
        if self.sandbox.command.trim().is_empty() {
            return invalid("sandbox.command must not be empty");
        }
        Ok(())
    }
}

/// Planning gate and retry policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanningConfig {
    /// Attempts before giving up with an incomplete plan
    pub max_attempts: u32,
    /// Minimum completeness score for acceptance
    pub acceptance_threshold: f64,
    /// Multiplicative decay applied to the token budget on retry
    pub token_decay: f64,
    /// Token budget floor
    pub min_output_tokens: u32,
    /// Temperature decrease applied on retry
    pub temperature_step: f32,
    /// Temperature floor
    pub min_temperature: f32,
}

impl Default for PlanningConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            acceptance_threshold: 0.8,
            token_decay: 0.75,
            min_output_tokens: 2048,
            temperature_step: 0.2,
            min_temperature: 0.1,
        }
    }
}

impl PlanningConfig {
    /// Derive the parameters for the next attempt.
    ///
    /// Both values decrease (or stay at their floor); neither ever grows.
    #[must_use]
    pub fn adjust_params_for_retry(&self, current: RequestParameters) -> RequestParameters {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let decayed = (f64::from(current.max_output_tokens) * self.token_decay).floor() as u32;
        let max_output_tokens = decayed
            .max(self.min_output_tokens)
            .min(current.max_output_tokens);
        RequestParameters {
            max_output_tokens,
            ..current.cooled(self.temperature_step, self.min_temperature)
        }
    }
}

/// Per-target generation policy
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SynthesisConfig {
    /// Attempts per target before the phase aborts
    pub max_generation_attempts: u32,
    /// Temperature decrease between attempts on the same target
    pub retry_temperature_step: f32,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_generation_attempts: 2,
            retry_temperature_step: 0.2,
        }
    }
}

/// Model and sandbox timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutConfig {
    /// Per model call; `None` waits indefinitely
    pub model_call_secs: Option<u64>,
    /// Per sandbox run
    pub sandbox_secs: u64,
    /// Document segmentation; `None` waits indefinitely
    pub segmentation_secs: Option<u64>,
    /// Each reference discovery, acquisition or lookup; `None` waits indefinitely
    pub reference_secs: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            model_call_secs: Some(300),
            sandbox_secs: 600,
            segmentation_secs: Some(300),
            reference_secs: Some(900),
        }
    }
}

impl TimeoutConfig {
    /// Model call timeout
    #[inline]
    #[must_use]
    pub fn model_call(&self) -> Option<Duration> {
        self.model_call_secs.map(Duration::from_secs)
    }

    /// Sandbox run timeout
    #[inline]
    #[must_use]
    pub fn sandbox(&self) -> Duration {
        Duration::from_secs(self.sandbox_secs)
    }

    /// Segmentation timeout
    #[inline]
    #[must_use]
    pub fn segmentation(&self) -> Option<Duration> {
        self.segmentation_secs.map(Duration::from_secs)
    }

    /// Reference call timeout
    #[inline]
    #[must_use]
    pub fn reference(&self) -> Option<Duration> {
        self.reference_secs.map(Duration::from_secs)
    }
}

/// What to do when the checkpoint window closes without answers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutAction {
    /// Terminate with `abandoned_awaiting_input`
    #[default]
    Abandon,
    /// Proceed with the gate-accepted draft
    KeepDraft,
}

/// Ambiguity checkpoint policy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CheckpointConfig {
    /// Answer window; `None` waits until answered or cancelled
    pub timeout_secs: Option<u64>,
    /// Action when the window closes
    pub on_timeout: TimeoutAction,
}

impl CheckpointConfig {
    /// Answer window
    #[inline]
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Process sandbox command
///
/// `{entry}` in `args` is replaced with the validation entry point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SandboxConfig {
    /// Interpreter or launcher
    pub command: String,
    /// Arguments
    pub args: Vec<String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            command: "python3".to_string(),
            args: vec!["{entry}".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_validate() {
        let config = PipelineConfig::default();
        config.validate().unwrap();
        assert_eq!(config.planning.max_attempts, 3);
        assert!((config.planning.acceptance_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.max_retries, 3);
        assert!(!config.enable_indexing);
    }

    #[test]
    fn toml_overrides_only_named_fields() {
        let config = PipelineConfig::from_toml_str(
            r#"
            max_retries = 5
            enable_indexing = true

            [planning]
            acceptance_threshold = 0.9

            [checkpoint]
            timeout_secs = 120
            on_timeout = "keep_draft"
            "#,
        )
        .unwrap();
        assert_eq!(config.max_retries, 5);
        assert!(config.enable_indexing);
        assert!((config.planning.acceptance_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(config.planning.max_attempts, 3);
        assert_eq!(config.checkpoint.on_timeout, TimeoutAction::KeepDraft);
        assert_eq!(config.checkpoint.timeout(), Some(Duration::from_secs(120)));
    }

    #[test]
    fn yaml_is_accepted() {
        let config = PipelineConfig::from_yaml_str(
            "request_params:\n  max_output_tokens: 4096\n  temperature: 0.3\n",
        )
        .unwrap();
        assert_eq!(config.request_params, RequestParameters::new(4096, 0.3));
    }

    #[test]
    fn out_of_range_threshold_is_rejected() {
        let err = PipelineConfig::from_toml_str("[planning]\nacceptance_threshold = 1.5\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("acceptance_threshold")));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(PipelineConfig::from_toml_str("max_retry = 2\n").is_err());
    }

    #[test]
    fn zero_reference_timeout_is_rejected() {
        let err = PipelineConfig::from_toml_str("[timeouts]\nreference_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(msg) if msg.contains("timeouts")));
        let config = PipelineConfig::from_toml_str("[timeouts]\nsegmentation_secs = 30\n").unwrap();
        assert_eq!(config.timeouts.segmentation(), Some(Duration::from_secs(30)));
        assert_eq!(config.timeouts.reference(), Some(Duration::from_secs(900)));
    }

    #[test]
    fn unsupported_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, "").unwrap();
        assert!(matches!(
            PipelineConfig::from_path(&path),
            Err(ConfigError::UnsupportedFormat(ext)) if ext == "ini"
        ));
    }

    #[test]
    fn toml_file_is_loaded_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("repro.toml");
        std::fs::write(&path, "max_retries = 1\n").unwrap();
        assert_eq!(PipelineConfig::from_path(&path).unwrap().max_retries, 1);
    }

    #[test]
    fn retry_adjustment_decays_with_floors() {
        let planning = PlanningConfig::default();
        let first = RequestParameters::new(8192, 0.7);
        let second = planning.adjust_params_for_retry(first);
        assert_eq!(second.max_output_tokens, 6144);
        assert!((second.temperature - 0.5).abs() < 1e-6);

        let floor = planning.adjust_params_for_retry(RequestParameters::new(2100, 0.15));
        assert_eq!(floor.max_output_tokens, 2048);
        assert!((floor.temperature - 0.1).abs() < 1e-6);
    }
}
