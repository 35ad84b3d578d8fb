//! Immutable per-invocation configuration for one orchestrator run.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

/// Filter restricting which evals a suite execution covers.
///
/// Eval names are `category/name` composites; a regex filter matches the
/// pattern anywhere in that composite, a substring filter matches literally.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "pattern", rename_all = "lowercase")]
pub enum EvalFilter {
    Regex(String),
    Substring(String),
}

impl EvalFilter {
    /// Build a regex filter, validating the pattern up front.
    pub fn regex(pattern: impl Into<String>) -> Result<Self, regex::Error> {
        let pattern = pattern.into();
        regex::Regex::new(&pattern)?;
        Ok(Self::Regex(pattern))
    }

    /// Build a literal substring filter.
    pub fn substring(needle: impl Into<String>) -> Self {
        Self::Substring(needle.into())
    }

    /// Whether an eval name passes the filter.
    pub fn matches(&self, eval_name: &str) -> bool {
        match self {
            // The pattern was validated at construction; a record that arrived
            // through serde with a bad pattern matches nothing.
            Self::Regex(pattern) => regex::Regex::new(pattern)
                .map(|re| re.is_match(eval_name))
                .unwrap_or(false),
            Self::Substring(needle) => eval_name.contains(needle.as_str()),
        }
    }
}

/// Immutable configuration for one orchestrator invocation.
///
/// Created once at startup and never mutated. Everything tunable about a run
/// lives here: the repetition count, the plateau threshold, the iteration
/// budget, the lock liveness window, and the adapter timeouts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOptions {
    /// Model identifier, e.g. `claude-3-5-sonnet-latest`.
    pub model: String,
    /// Provider identifier, e.g. `anthropic`.
    pub provider: String,
    /// Unique id for this invocation.
    #[serde(default = "default_run_id")]
    pub run_id: String,
    /// Optional eval-name filter passed through to the eval runner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<EvalFilter>,
    /// Path to the guideline document under refinement.
    pub guideline_path: PathBuf,
    /// Directory holding lock records, checkpoints, and run logs.
    pub state_dir: PathBuf,
    /// Times the suite is executed per iteration to measure stability.
    #[serde(default = "default_repetitions")]
    pub repetitions: usize,
    /// Consecutive non-improving iterations after which the run plateaus.
    #[serde(default = "default_plateau_threshold")]
    pub plateau_threshold: u32,
    /// Hard cap on refinement iterations.
    #[serde(default = "default_iteration_budget")]
    pub iteration_budget: u32,
    /// Seconds after which a silent lock holder is considered dead.
    #[serde(default = "default_liveness_window_secs")]
    pub liveness_window_secs: u64,
    /// Timeout for one eval-suite execution, in seconds.
    #[serde(default = "default_runner_timeout_secs")]
    pub runner_timeout_secs: u64,
    /// Timeout for one failure-analyzer call, in seconds.
    #[serde(default = "default_analyzer_timeout_secs")]
    pub analyzer_timeout_secs: u64,
    /// Bounded retry attempts for a failing analyzer call.
    #[serde(default = "default_analyzer_attempts")]
    pub analyzer_attempts: u32,
}

impl RunOptions {
    /// Create options with a fresh run id and default tunables.
    pub fn new(
        model: impl Into<String>,
        provider: impl Into<String>,
        guideline_path: impl Into<PathBuf>,
        state_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            model: model.into(),
            provider: provider.into(),
            run_id: default_run_id(),
            filter: None,
            guideline_path: guideline_path.into(),
            state_dir: state_dir.into(),
            repetitions: default_repetitions(),
            plateau_threshold: default_plateau_threshold(),
            iteration_budget: default_iteration_budget(),
            liveness_window_secs: default_liveness_window_secs(),
            runner_timeout_secs: default_runner_timeout_secs(),
            analyzer_timeout_secs: default_analyzer_timeout_secs(),
            analyzer_attempts: default_analyzer_attempts(),
        }
    }

    /// Filesystem-safe `<model>__<provider>` key naming this run's lock and
    /// checkpoint files.
    pub fn model_key(&self) -> String {
        format!(
            "{}__{}",
            sanitize_key_component(&self.model),
            sanitize_key_component(&self.provider)
        )
    }

    /// Path of this run's lock record.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir
            .join("locks")
            .join(format!("{}.json", self.model_key()))
    }

    /// Path of this run's latest checkpoint.
    pub fn checkpoint_path(&self) -> PathBuf {
        self.state_dir
            .join("checkpoints")
            .join(format!("{}.json", self.model_key()))
    }

    /// Path of this run's append-only log.
    pub fn run_log_path(&self) -> PathBuf {
        self.state_dir
            .join("logs")
            .join(format!("{}.log", self.model_key()))
    }
}

/// Split a `<model>__<provider>` key back into its components.
pub fn split_model_key(key: &str) -> Option<(String, String)> {
    key.split_once("__")
        .map(|(model, provider)| (model.to_string(), provider.to_string()))
}

fn sanitize_key_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn default_run_id() -> String {
    Uuid::new_v4().to_string()
}

fn default_repetitions() -> usize {
    3
}

fn default_plateau_threshold() -> u32 {
    5
}

fn default_iteration_budget() -> u32 {
    50
}

fn default_liveness_window_secs() -> u64 {
    120
}

fn default_runner_timeout_secs() -> u64 {
    1800
}

fn default_analyzer_timeout_secs() -> u64 {
    120
}

fn default_analyzer_attempts() -> u32 {
    3
}
