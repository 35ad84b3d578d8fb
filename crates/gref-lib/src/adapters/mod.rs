//! Seams to the external eval runner, failure analyzer, and guideline merge.
//!
//! All three are black boxes to the orchestrator: blocking calls with
//! timeouts, invoked through object-safe traits so tests can script them.

use anyhow::Result;
use async_trait::async_trait;
use gref_types::{
    EvalFilter, EvalResult, EvalRunResult, FailureAnalysis, GuidelineEdit, GuidelineRef,
    GuidelineSection,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod http;

pub use http::{HttpEvalRunner, HttpFailureAnalyzer, HttpGuidelineStore};

/// One suite-execution request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvalRunRequest {
    pub run_id: String,
    /// Guideline document the candidate model is primed with.
    pub guideline_path: PathBuf,
    /// Optional eval-name filter; the runner executes only matching evals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<EvalFilter>,
    /// Which of the N repetitions this execution is, zero-based.
    pub repetition: usize,
}

/// Executes the example suite against a guideline document and reports
/// per-eval pass/fail results.
#[async_trait]
pub trait EvalSuiteRunner: Send + Sync {
    async fn run_suite(&self, request: &EvalRunRequest) -> Result<EvalRunResult>;
}

/// Context handed to the analyzer alongside the failing eval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub run_id: String,
    pub eval: EvalResult,
    /// Expected-versus-produced summary of the eval's output files.
    pub diff: String,
}

/// Produces a root-cause analysis and a suggested guideline edit for one
/// consistently-failing eval. Calls may fail transiently.
#[async_trait]
pub trait FailureAnalyzer: Send + Sync {
    async fn analyze(&self, request: &AnalysisRequest) -> Result<FailureAnalysis>;
}

/// Owns the guideline document: loads its section tree and applies suggested
/// edits. The textual merge itself is external; the orchestrator only
/// sequences the call and persists the resulting document reference.
#[async_trait]
pub trait GuidelineStore: Send + Sync {
    async fn document(&self) -> Result<GuidelineSection>;
    async fn apply_edits(&self, edits: &[GuidelineEdit]) -> Result<GuidelineRef>;
}
